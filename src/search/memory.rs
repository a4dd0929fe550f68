use crate::error::{ArkError, StoreTarget};
use crate::model::{CollectionKind, Document, IdSet, NodeId, Value};
use crate::query::operators::eval_expr;
use crate::query::plan::{Bound, Expr};
use crate::search::{SearchHit, SearchIndex};
use crate::storage::memory::Fault;
use parking_lot::{Mutex, RwLock};
use serde_json::{Map, Value as Json};
use std::collections::BTreeMap;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum SearchOp {
    Search,
    Index,
    Remove,
}

/// In-process search index interpreting the query DSL over stored sources.
#[derive(Debug, Default)]
pub struct MemorySearchIndex {
    entries: RwLock<BTreeMap<(CollectionKind, NodeId), Document>>,
    faults: Mutex<BTreeMap<SearchOp, Fault>>,
    search_latency: Mutex<Option<Duration>>,
}

impl MemorySearchIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, kind: CollectionKind, id: &NodeId) -> bool {
        self.entries.read().contains_key(&(kind, id.clone()))
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    pub fn inject_failure(&self, op: SearchOp, fault: Fault) {
        self.faults.lock().insert(op, fault);
    }

    pub fn clear_failure(&self, op: SearchOp) {
        self.faults.lock().remove(&op);
    }

    /// Delays every search by `latency`; `None` restores immediate answers.
    pub fn set_search_latency(&self, latency: Option<Duration>) {
        *self.search_latency.lock() = latency;
    }

    fn check(&self, op: SearchOp) -> Result<(), ArkError> {
        match self.faults.lock().get(&op) {
            None => Ok(()),
            Some(Fault::Unavailable) => Err(ArkError::Unavailable {
                target: StoreTarget::SearchIndex,
                message: format!("injected {op:?} failure"),
            }),
            Some(Fault::Timeout) => Err(ArkError::Timeout {
                target: StoreTarget::SearchIndex,
            }),
        }
    }
}

fn malformed(message: impl Into<String>) -> ArkError {
    ArkError::Decode(format!("malformed search query: {}", message.into()))
}

fn as_object<'a>(value: &'a Json, clause: &str) -> Result<&'a Map<String, Json>, ArkError> {
    value
        .as_object()
        .ok_or_else(|| malformed(format!("'{clause}' expects an object")))
}

/// `{ "<field>": <body> }` as used by term-level and match clauses.
fn single_field<'a>(value: &'a Json, clause: &str) -> Result<(&'a String, &'a Json), ArkError> {
    let object = as_object(value, clause)?;
    let mut fields = object.iter();
    match (fields.next(), fields.next()) {
        (Some(field), None) => Ok(field),
        _ => Err(malformed(format!("'{clause}' expects exactly one field"))),
    }
}

/// Accepts both the short form and `{ "<key>": value }`.
fn unwrap_body<'a>(body: &'a Json, key: &str) -> &'a Json {
    body.as_object().and_then(|o| o.get(key)).unwrap_or(body)
}

fn text_body(body: &Json, key: &str, clause: &str) -> Result<String, ArkError> {
    unwrap_body(body, key)
        .as_str()
        .map(str::to_string)
        .ok_or_else(|| malformed(format!("'{clause}' expects a string")))
}

fn clause_list(value: Option<&Json>) -> Result<Vec<Expr>, ArkError> {
    match value {
        None => Ok(Vec::new()),
        Some(Json::Array(items)) => items.iter().map(parse_query).collect(),
        Some(single) => Ok(vec![parse_query(single)?]),
    }
}

fn range_bound(spec: &Map<String, Json>, inclusive: &str, exclusive: &str) -> Option<Bound> {
    spec.get(inclusive)
        .map(|v| Bound::inclusive(Value::from(v.clone())))
        .or_else(|| spec.get(exclusive).map(|v| Bound::exclusive(Value::from(v.clone()))))
}

/// Parses the query DSL into the predicate tree evaluated against sources.
pub fn parse_query(query: &Json) -> Result<Expr, ArkError> {
    let (clause, body) = single_field(query, "query")?;
    match clause.as_str() {
        "match_all" => Ok(Expr::all()),
        "match_none" => Ok(Expr::none()),
        "bool" => {
            let spec = as_object(body, "bool")?;
            let mut required = clause_list(spec.get("must"))?;
            required.extend(clause_list(spec.get("filter"))?);
            required.extend(
                clause_list(spec.get("must_not"))?
                    .into_iter()
                    .map(Expr::not),
            );
            let should = clause_list(spec.get("should"))?;
            let min_should = spec
                .get("minimum_should_match")
                .and_then(Json::as_u64)
                .unwrap_or(u64::from(required.is_empty()));
            if !should.is_empty() && min_should > 0 {
                required.push(Expr::Or(should));
            }
            Ok(Expr::And(required))
        }
        "ids" => {
            let values = unwrap_body(body, "values")
                .as_array()
                .ok_or_else(|| malformed("'ids' expects a list of values"))?;
            Ok(Expr::In(
                "_id".into(),
                values.iter().cloned().map(Value::from).collect(),
            ))
        }
        "term" => {
            let (field, body) = single_field(body, "term")?;
            Ok(Expr::Term(
                field.clone(),
                Value::from(unwrap_body(body, "value").clone()),
            ))
        }
        "terms" => {
            let (field, body) = single_field(body, "terms")?;
            let values = body
                .as_array()
                .ok_or_else(|| malformed("'terms' expects a list of values"))?;
            Ok(Expr::In(
                field.clone(),
                values.iter().cloned().map(Value::from).collect(),
            ))
        }
        "range" => {
            let (field, body) = single_field(body, "range")?;
            let spec = as_object(body, "range")?;
            Ok(Expr::Range {
                field: field.clone(),
                lower: range_bound(spec, "gte", "gt"),
                upper: range_bound(spec, "lte", "lt"),
            })
        }
        "exists" => {
            let field = text_body(body, "field", "exists")?;
            Ok(Expr::Exists(field))
        }
        "match" | "match_phrase" | "match_phrase_prefix" | "prefix" | "wildcard" | "regexp" => {
            let (field, body) = single_field(body, clause)?;
            let key = match clause.as_str() {
                "prefix" | "wildcard" | "regexp" => "value",
                _ => "query",
            };
            let text = text_body(body, key, clause)?;
            let field = field.clone();
            Ok(match clause.as_str() {
                "match" => Expr::Match(field, text),
                "match_phrase" => Expr::MatchPhrase(field, text),
                "match_phrase_prefix" => Expr::MatchPhrasePrefix(field, text),
                "prefix" => Expr::Prefix(field, text),
                "wildcard" => Expr::Wildcard(field, text),
                _ => Expr::Regex(field, text),
            })
        }
        "simple_query_string" => {
            let spec = as_object(body, "simple_query_string")?;
            let text = spec
                .get("query")
                .and_then(Json::as_str)
                .ok_or_else(|| malformed("'simple_query_string' expects a query"))?;
            let fields = spec
                .get("fields")
                .and_then(Json::as_array)
                .ok_or_else(|| malformed("'simple_query_string' expects fields"))?;
            Ok(Expr::Or(
                fields
                    .iter()
                    .filter_map(Json::as_str)
                    .map(|field| Expr::Search(field.to_string(), text.to_string()))
                    .collect(),
            ))
        }
        other => Err(malformed(format!("unsupported clause '{other}'"))),
    }
}

impl SearchIndex for MemorySearchIndex {
    async fn search(
        &self,
        kind: CollectionKind,
        query: &Json,
        limit: usize,
    ) -> Result<Vec<SearchHit>, ArkError> {
        let latency = *self.search_latency.lock();
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }
        self.check(SearchOp::Search)?;
        let expr = parse_query(query)?;
        let entries = self.entries.read();
        Ok(entries
            .iter()
            .filter(|((entry_kind, _), source)| *entry_kind == kind && eval_expr(&expr, *source))
            .take(limit)
            .map(|((_, id), source)| SearchHit {
                id: id.clone(),
                source: source.clone(),
            })
            .collect())
    }

    async fn index(
        &self,
        kind: CollectionKind,
        id: &NodeId,
        source: Document,
    ) -> Result<(), ArkError> {
        self.check(SearchOp::Index)?;
        self.entries.write().insert((kind, id.clone()), source);
        Ok(())
    }

    async fn remove(&self, kind: CollectionKind, ids: &IdSet) -> Result<u64, ArkError> {
        self.check(SearchOp::Remove)?;
        let mut entries = self.entries.write();
        Ok(ids
            .iter()
            .filter(|id| entries.remove(&(kind, (*id).clone())).is_some())
            .count() as u64)
    }
}
