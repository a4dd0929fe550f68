//! Text analysis shared by the full-text operators.

/// Splits text on non-alphanumeric characters and lowercases each token.
pub fn tokenize(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|token| !token.is_empty())
        .map(str::to_lowercase)
        .collect()
}

/// Any query token present in the text.
pub fn match_any(text: &str, query: &str) -> bool {
    let tokens = tokenize(text);
    tokenize(query).iter().any(|q| tokens.contains(q))
}

/// Query tokens appear contiguously and in order.
pub fn match_phrase(text: &str, query: &str) -> bool {
    let tokens = tokenize(text);
    let phrase = tokenize(query);
    if phrase.is_empty() {
        return false;
    }
    tokens
        .windows(phrase.len())
        .any(|window| window == phrase.as_slice())
}

/// Like [`match_phrase`], with the last query token matched as a prefix.
pub fn match_phrase_prefix(text: &str, query: &str) -> bool {
    let tokens = tokenize(text);
    let phrase = tokenize(query);
    let Some((last, head)) = phrase.split_last() else {
        return false;
    };
    tokens.windows(phrase.len()).any(|window| {
        window[..head.len()] == *head && window[head.len()].starts_with(last.as_str())
    })
}

/// Simple query string: `+word` must appear, `-word` must not, and when no
/// word is required at least one bare word must appear.
pub fn simple_query(text: &str, query: &str) -> bool {
    let tokens = tokenize(text);
    let mut required = Vec::new();
    let mut excluded = Vec::new();
    let mut optional = Vec::new();
    for raw in query.split_whitespace() {
        let (bucket, word) = match raw.strip_prefix('+') {
            Some(word) => (&mut required, word),
            None => match raw.strip_prefix('-') {
                Some(word) => (&mut excluded, word),
                None => (&mut optional, raw),
            },
        };
        bucket.extend(tokenize(word));
    }
    if excluded.iter().any(|word| tokens.contains(word)) {
        return false;
    }
    if !required.iter().all(|word| tokens.contains(word)) {
        return false;
    }
    !required.is_empty() || optional.is_empty() || optional.iter().any(|word| tokens.contains(word))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tokens_are_lowercased_and_split_on_punctuation() {
        assert_eq!(tokenize("Fonds d'archives, 1914-1918"), vec![
            "fonds", "d", "archives", "1914", "1918"
        ]);
    }

    #[test]
    fn phrase_and_prefix_matching() {
        let text = "Correspondance du préfet de la Seine";
        assert!(match_any(text, "seine marne"));
        assert!(match_phrase(text, "préfet de la"));
        assert!(!match_phrase(text, "la préfet"));
        assert!(match_phrase_prefix(text, "de la sei"));
        assert!(!match_phrase_prefix(text, "du sei"));
    }

    #[test]
    fn simple_query_honours_operators() {
        let text = "registre des naissances";
        assert!(simple_query(text, "+registre naissances"));
        assert!(!simple_query(text, "+registre -naissances"));
        assert!(simple_query(text, "mariages naissances"));
        assert!(!simple_query(text, "mariages deces"));
    }
}
