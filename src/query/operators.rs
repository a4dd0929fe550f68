use crate::error::ArkError;
use crate::model::{ANCESTOR_DEPTHS_FIELD, Document, GraphNode, Value};
use crate::query::plan::{Bound, Expr, Order, UpdateAction};
use crate::search::analysis;
use lru::LruCache;
use regex::Regex;
use std::borrow::Cow;
use std::cmp::Ordering;
use std::num::NonZeroUsize;

const PATTERN_CACHE_CAPACITY: usize = 256;

/// Compiled regex and wildcard patterns keyed by their source; predicates are
/// evaluated once per candidate node, so compiling on every call is wasteful.
static PATTERN_CACHE: once_cell::sync::Lazy<parking_lot::Mutex<LruCache<String, Regex>>> =
    once_cell::sync::Lazy::new(|| {
        let cap = NonZeroUsize::new(PATTERN_CACHE_CAPACITY).unwrap_or(NonZeroUsize::MIN);
        parking_lot::Mutex::new(LruCache::new(cap))
    });

fn cached_pattern(key: String, source: impl FnOnce() -> String) -> Option<Regex> {
    if let Some(regex) = PATTERN_CACHE.lock().get(&key) {
        return Some(regex.clone());
    }
    let regex = Regex::new(&source()).ok()?;
    PATTERN_CACHE.lock().put(key, regex.clone());
    Some(regex)
}

/// Full-match regex.
pub fn compile_regex(pattern: &str) -> Option<Regex> {
    cached_pattern(format!("re:{pattern}"), || format!("^(?:{pattern})$"))
}

/// `*` matches any run of characters, `?` exactly one.
pub fn compile_wildcard(pattern: &str) -> Option<Regex> {
    cached_pattern(format!("wc:{pattern}"), || {
        let escaped = regex::escape(pattern)
            .replace("\\*", ".*")
            .replace("\\?", ".");
        format!("^{escaped}$")
    })
}

/// Anything predicates can be evaluated against: stored nodes, or the source
/// documents returned by the search index.
pub trait FieldSource {
    fn field(&self, path: &str) -> Option<Cow<'_, Value>>;
}

impl FieldSource for GraphNode {
    fn field(&self, path: &str) -> Option<Cow<'_, Value>> {
        GraphNode::field(self, path)
    }
}

impl FieldSource for Document {
    fn field(&self, path: &str) -> Option<Cow<'_, Value>> {
        // `_uds.<id>` keys on the whole ancestor id, dots included
        if let Some(ancestor) = path
            .strip_prefix(ANCESTOR_DEPTHS_FIELD)
            .and_then(|rest| rest.strip_prefix('.'))
        {
            return match self.get(ANCESTOR_DEPTHS_FIELD)? {
                Value::Object(depths) => depths.get(ancestor).map(Cow::Borrowed),
                _ => None,
            };
        }
        self.get(path).map(Cow::Borrowed)
    }
}

fn compare_values(left: &Value, right: &Value) -> Option<Ordering> {
    let comparable = matches!(
        (left, right),
        (
            Value::Integer(_) | Value::Float(_),
            Value::Integer(_) | Value::Float(_)
        )
    ) || std::mem::discriminant(left) == std::mem::discriminant(right);
    comparable.then(|| left.cmp(right))
}

/// Scalars are tested directly; lists are tested element-wise.
fn any_element(value: &Value, mut test: impl FnMut(&Value) -> bool) -> bool {
    match value {
        Value::List(items) => items.iter().any(test),
        other => test(other),
    }
}

/// Equality also accepts a whole-list match.
fn any_equal(value: &Value, target: &Value) -> bool {
    value == target || any_element(value, |v| v == target)
}

fn any_text(value: &Value, mut test: impl FnMut(&str) -> bool) -> bool {
    any_element(value, |v| v.as_str().is_some_and(&mut test))
}

fn satisfies_bound(value: &Value, bound: &Bound, lower: bool) -> bool {
    compare_values(value, &bound.value).is_some_and(|ordering| match (lower, bound.inclusive) {
        (true, true) => ordering.is_ge(),
        (true, false) => ordering.is_gt(),
        (false, true) => ordering.is_le(),
        (false, false) => ordering.is_lt(),
    })
}

fn is_present(value: Option<&Value>) -> bool {
    value.is_some_and(|v| !v.is_empty_like())
}

pub fn eval_expr<S: FieldSource + ?Sized>(expr: &Expr, source: &S) -> bool {
    let lookup = |field: &str| source.field(field);
    let ordered = |field: &str, target: &Value, accept: fn(Ordering) -> bool| {
        lookup(field).is_some_and(|value| {
            any_element(&value, |v| compare_values(v, target).is_some_and(accept))
        })
    };
    match expr {
        Expr::Eq(field, target) => lookup(field).is_some_and(|v| any_equal(&v, target)),
        Expr::Ne(field, target) => !lookup(field).is_some_and(|v| any_equal(&v, target)),
        Expr::Lt(field, target) => ordered(field, target, Ordering::is_lt),
        Expr::Lte(field, target) => ordered(field, target, Ordering::is_le),
        Expr::Gt(field, target) => ordered(field, target, Ordering::is_gt),
        Expr::Gte(field, target) => ordered(field, target, Ordering::is_ge),
        Expr::Range {
            field,
            lower,
            upper,
        } => lookup(field).is_some_and(|value| {
            any_element(&value, |v| {
                lower.as_ref().is_none_or(|b| satisfies_bound(v, b, true))
                    && upper.as_ref().is_none_or(|b| satisfies_bound(v, b, false))
            })
        }),
        Expr::In(field, targets) => lookup(field)
            .is_some_and(|value| targets.iter().any(|target| any_equal(&value, target))),
        Expr::Nin(field, targets) => !lookup(field)
            .is_some_and(|value| targets.iter().any(|target| any_equal(&value, target))),
        Expr::Exists(field) => is_present(lookup(field).as_deref()),
        Expr::Missing(field) => !is_present(lookup(field).as_deref()),
        Expr::IsNull(field) => lookup(field).is_none_or(|v| v.is_null()),
        Expr::Size(field, size) => {
            lookup(field).is_some_and(|v| matches!(&*v, Value::List(items) if items.len() == *size))
        }
        Expr::Term(field, target) => lookup(field).is_some_and(|v| any_equal(&v, target)),
        Expr::Prefix(field, prefix) => {
            lookup(field).is_some_and(|v| any_text(&v, |s| s.starts_with(prefix.as_str())))
        }
        Expr::Wildcard(field, pattern) => compile_wildcard(pattern)
            .is_some_and(|re| lookup(field).is_some_and(|v| any_text(&v, |s| re.is_match(s)))),
        Expr::Regex(field, pattern) => compile_regex(pattern)
            .is_some_and(|re| lookup(field).is_some_and(|v| any_text(&v, |s| re.is_match(s)))),
        Expr::Match(field, query) => lookup(field)
            .is_some_and(|v| any_text(&v, |s| analysis::match_any(s, query))),
        Expr::MatchPhrase(field, query) => lookup(field)
            .is_some_and(|v| any_text(&v, |s| analysis::match_phrase(s, query))),
        Expr::MatchPhrasePrefix(field, query) => lookup(field)
            .is_some_and(|v| any_text(&v, |s| analysis::match_phrase_prefix(s, query))),
        Expr::Search(field, query) => lookup(field)
            .is_some_and(|v| any_text(&v, |s| analysis::simple_query(s, query))),
        Expr::And(items) => items.iter().all(|item| eval_expr(item, source)),
        Expr::Or(items) => items.iter().any(|item| eval_expr(item, source)),
        Expr::Not(inner) => !eval_expr(inner, source),
    }
}

/// Multi-key ordering; a missing field sorts before any present value.
pub fn compare_by<S: FieldSource + ?Sized>(a: &S, b: &S, order_by: &[(String, Order)]) -> Ordering {
    for (field, order) in order_by {
        let ordering = a.field(field).cmp(&b.field(field));
        let ordering = match order {
            Order::Asc => ordering,
            Order::Desc => ordering.reverse(),
        };
        if ordering != Ordering::Equal {
            return ordering;
        }
    }
    Ordering::Equal
}

/// Materialized view of `node` restricted to `projection` (all fields when empty).
pub fn project(node: &GraphNode, projection: &[String]) -> Document {
    if projection.is_empty() {
        return node.materialize();
    }
    let mut doc = Document::new();
    for field in projection {
        if let Some(value) = node.field(field) {
            doc.set(field, value.into_owned());
        }
    }
    doc
}

fn numeric_sum(current: Option<&Value>, by: &Value, field: &str) -> Result<Value, ArkError> {
    let current = current.unwrap_or(&Value::Integer(0));
    match (current, by) {
        (Value::Integer(a), Value::Integer(b)) => a
            .checked_add(*b)
            .map(Value::Integer)
            .ok_or_else(|| ArkError::Validation(format!("increment overflows '{field}'"))),
        _ => match (current.as_f64(), by.as_f64()) {
            (Some(a), Some(b)) => Ok(Value::Float(a + b)),
            _ => Err(ArkError::Validation(format!(
                "cannot increment {} field '{field}' by {}",
                current.type_name(),
                by.type_name()
            ))),
        },
    }
}

fn list_at(content: &Document, field: &str) -> Result<Vec<Value>, ArkError> {
    match content.get(field) {
        None | Some(Value::Null) => Ok(Vec::new()),
        Some(Value::List(items)) => Ok(items.clone()),
        Some(other) => Err(ArkError::Validation(format!(
            "field '{field}' is a {}, not a list",
            other.type_name()
        ))),
    }
}

/// Applies `actions` atomically to `content`. Returns whether anything changed.
pub fn apply_updates(content: &mut Document, actions: &[UpdateAction]) -> Result<bool, ArkError> {
    let mut next = content.clone();
    for action in actions {
        match action {
            UpdateAction::Set(field, value) => next.set(field, value.clone()),
            UpdateAction::Unset(field) => {
                next.remove(field);
            }
            UpdateAction::Inc(field, by) => {
                let sum = numeric_sum(next.get(field), by, field)?;
                next.set(field, sum);
            }
            UpdateAction::Min(field, value) => {
                if next.get(field).is_none_or(|current| value < current) {
                    next.set(field, value.clone());
                }
            }
            UpdateAction::Max(field, value) => {
                if next.get(field).is_none_or(|current| value > current) {
                    next.set(field, value.clone());
                }
            }
            UpdateAction::Push(field, values) => {
                let mut items = list_at(&next, field)?;
                items.extend(values.iter().cloned());
                next.set(field, Value::List(items));
            }
            UpdateAction::AddToSet(field, values) => {
                let mut items = list_at(&next, field)?;
                for value in values {
                    if !items.contains(value) {
                        items.push(value.clone());
                    }
                }
                next.set(field, Value::List(items));
            }
            UpdateAction::Pull(field, values) => {
                if next.get(field).is_some() {
                    let mut items = list_at(&next, field)?;
                    items.retain(|item| !values.contains(item));
                    next.set(field, Value::List(items));
                }
            }
            UpdateAction::Rename(from, to) => {
                if let Some(value) = next.remove(from) {
                    next.set(to, value);
                }
            }
        }
    }
    let changed = next != *content;
    *content = next;
    Ok(changed)
}
