//! Per-backend rendering of a step's predicate plus its graph constraint.
//! The executor only ever sees `Translation`s, never backend syntax.

use crate::error::StoreTarget;
use crate::model::{IdSet, Value};
use crate::query::depth::Constraint;
use crate::query::plan::{Bound, Expr};
use serde_json::{Value as Json, json};

/// Native query plus a predicate the executor must still check on each hit,
/// for constraints the backend cannot express.
#[derive(Debug, Clone, PartialEq)]
pub struct Translation<Q> {
    pub native: Q,
    pub post_filter: Option<Expr>,
}

pub trait QueryTranslator {
    type Native;
    const TARGET: StoreTarget;

    fn translate(
        &self,
        predicate: Option<&Expr>,
        constraint: &Constraint,
    ) -> Result<Translation<Self::Native>, String>;
}

fn ancestor_distance_bound(ids: &IdSet, max_distance: u32) -> Expr {
    Expr::Or(
        ids.iter()
            .map(|id| Expr::lte(&format!("_uds.{id}"), Value::Integer(max_distance as i64)))
            .collect(),
    )
}

/// Renders into the predicate language evaluated by the document store,
/// which addresses the reserved graph fields directly.
#[derive(Debug, Clone, Copy, Default)]
pub struct DocumentTranslator;

impl DocumentTranslator {
    fn constraint_expr(constraint: &Constraint) -> Expr {
        match constraint {
            Constraint::Unconstrained => Expr::all(),
            Constraint::IdIn(ids) => Expr::ids_in("_id", ids),
            Constraint::ParentsAny(ids) => Expr::ids_in("_up", ids),
            Constraint::AncestorsAny(ids) => Expr::ids_in("_us", ids),
            Constraint::AncestorsWithin { ids, max_distance } => {
                ancestor_distance_bound(ids, *max_distance)
            }
            Constraint::DepthSpans(level) => {
                Expr::lte("_min", *level as i64).and(Expr::gte("_max", *level as i64))
            }
            Constraint::MaxDepthAtMost(level) => Expr::lte("_max", *level as i64),
            Constraint::NoParents => Expr::Size("_up".into(), 0),
            Constraint::All(items) => Expr::And(items.iter().map(Self::constraint_expr).collect()),
        }
    }
}

impl QueryTranslator for DocumentTranslator {
    type Native = Expr;
    const TARGET: StoreTarget = StoreTarget::PrimaryStore;

    fn translate(
        &self,
        predicate: Option<&Expr>,
        constraint: &Constraint,
    ) -> Result<Translation<Expr>, String> {
        let native = predicate
            .cloned()
            .unwrap_or_else(Expr::all)
            .and(Self::constraint_expr(constraint));
        Ok(Translation {
            native,
            post_filter: None,
        })
    }
}

/// Renders into the search engine's JSON query DSL. The per-ancestor distance
/// bound has no native form there and comes back as a post-filter.
#[derive(Debug, Clone, Copy, Default)]
pub struct SearchTranslator;

fn id_values(ids: &IdSet) -> Json {
    Json::Array(ids.iter().map(|id| Json::from(id.as_str())).collect())
}

fn range_clause(field: &str, lower: Option<&Bound>, upper: Option<&Bound>) -> Json {
    let mut spec = serde_json::Map::new();
    if let Some(bound) = lower {
        let key = if bound.inclusive { "gte" } else { "gt" };
        spec.insert(key.into(), bound.value.to_json());
    }
    if let Some(bound) = upper {
        let key = if bound.inclusive { "lte" } else { "lt" };
        spec.insert(key.into(), bound.value.to_json());
    }
    json!({ "range": { field: spec } })
}

fn must_not(clause: Json) -> Json {
    json!({ "bool": { "must_not": [clause] } })
}

impl SearchTranslator {
    fn predicate(expr: &Expr) -> Result<Json, String> {
        Ok(match expr {
            Expr::Eq(field, value) | Expr::Term(field, value) => {
                json!({ "term": { field: value.to_json() } })
            }
            Expr::Ne(field, value) => must_not(json!({ "term": { field: value.to_json() } })),
            Expr::Lt(field, value) => range_clause(field, None, Some(&Bound::exclusive(value.clone()))),
            Expr::Lte(field, value) => range_clause(field, None, Some(&Bound::inclusive(value.clone()))),
            Expr::Gt(field, value) => range_clause(field, Some(&Bound::exclusive(value.clone())), None),
            Expr::Gte(field, value) => range_clause(field, Some(&Bound::inclusive(value.clone())), None),
            Expr::Range {
                field,
                lower,
                upper,
            } => range_clause(field, lower.as_ref(), upper.as_ref()),
            Expr::In(field, values) => {
                let values: Vec<Json> = values.iter().map(Value::to_json).collect();
                json!({ "terms": { field: values } })
            }
            Expr::Nin(field, values) => {
                let values: Vec<Json> = values.iter().map(Value::to_json).collect();
                must_not(json!({ "terms": { field: values } }))
            }
            Expr::Exists(field) => json!({ "exists": { "field": field } }),
            Expr::Missing(field) | Expr::IsNull(field) => {
                must_not(json!({ "exists": { "field": field } }))
            }
            Expr::Size(field, _) => {
                return Err(format!("size({field}) cannot be evaluated by the search index"));
            }
            Expr::Wildcard(field, pattern) => json!({ "wildcard": { field: { "value": pattern } } }),
            Expr::Regex(field, pattern) => json!({ "regexp": { field: { "value": pattern } } }),
            Expr::Prefix(field, prefix) => json!({ "prefix": { field: { "value": prefix } } }),
            Expr::Match(field, query) => json!({ "match": { field: { "query": query } } }),
            Expr::MatchPhrase(field, query) => {
                json!({ "match_phrase": { field: { "query": query } } })
            }
            Expr::MatchPhrasePrefix(field, query) => {
                json!({ "match_phrase_prefix": { field: { "query": query } } })
            }
            Expr::Search(field, query) => {
                json!({ "simple_query_string": { "query": query, "fields": [field] } })
            }
            Expr::And(items) if items.is_empty() => json!({ "match_all": {} }),
            Expr::Or(items) if items.is_empty() => json!({ "match_none": {} }),
            Expr::And(items) => {
                let clauses = items.iter().map(Self::predicate).collect::<Result<Vec<_>, _>>()?;
                json!({ "bool": { "must": clauses } })
            }
            Expr::Or(items) => {
                let clauses = items.iter().map(Self::predicate).collect::<Result<Vec<_>, _>>()?;
                json!({ "bool": { "should": clauses, "minimum_should_match": 1 } })
            }
            Expr::Not(inner) => must_not(Self::predicate(inner)?),
        })
    }

    fn constraint(constraint: &Constraint, filters: &mut Vec<Json>, post: &mut Vec<Expr>) {
        match constraint {
            Constraint::Unconstrained => {}
            Constraint::IdIn(ids) => filters.push(json!({ "ids": { "values": id_values(ids) } })),
            Constraint::ParentsAny(ids) => filters.push(json!({ "terms": { "_up": id_values(ids) } })),
            Constraint::AncestorsAny(ids) => {
                filters.push(json!({ "terms": { "_us": id_values(ids) } }))
            }
            Constraint::AncestorsWithin { ids, max_distance } => {
                filters.push(json!({ "terms": { "_us": id_values(ids) } }));
                post.push(ancestor_distance_bound(ids, *max_distance));
            }
            Constraint::DepthSpans(level) => {
                filters.push(json!({ "range": { "_min": { "lte": level } } }));
                filters.push(json!({ "range": { "_max": { "gte": level } } }));
            }
            Constraint::MaxDepthAtMost(level) => {
                filters.push(json!({ "range": { "_max": { "lte": level } } }))
            }
            Constraint::NoParents => filters.push(must_not(json!({ "exists": { "field": "_up" } }))),
            Constraint::All(items) => {
                for item in items {
                    Self::constraint(item, filters, post);
                }
            }
        }
    }
}

impl QueryTranslator for SearchTranslator {
    type Native = Json;
    const TARGET: StoreTarget = StoreTarget::SearchIndex;

    fn translate(
        &self,
        predicate: Option<&Expr>,
        constraint: &Constraint,
    ) -> Result<Translation<Json>, String> {
        let must = match predicate {
            Some(expr) => vec![Self::predicate(expr)?],
            None => Vec::new(),
        };
        let mut filters = Vec::new();
        let mut post = Vec::new();
        Self::constraint(constraint, &mut filters, &mut post);
        let post_filter = match post.len() {
            0 => None,
            1 => post.pop(),
            _ => Some(Expr::And(post)),
        };
        Ok(Translation {
            native: json!({ "bool": { "must": must, "filter": filters } }),
            post_filter,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Document, GraphNode, Unit, id_set};
    use crate::query::operators::eval_expr;

    #[test]
    fn document_translation_addresses_reserved_fields() {
        let translation = DocumentTranslator
            .translate(
                Some(&Expr::eq("Title", "x")),
                &Constraint::AncestorsWithin {
                    ids: id_set(["a"]),
                    max_distance: 2,
                },
            )
            .expect("translate");
        assert_eq!(translation.post_filter, None);
        assert_eq!(translation.native.to_string(), "and(Title = \"x\", or(_uds.a <= 2))");
    }

    #[test]
    fn document_translation_of_depth_constraints_evaluates_on_units() {
        let root = Unit::new("r", Document::new());
        let mut child = Unit::new("c", Document::new());
        child.link_under(&root).expect("link");
        let (root, child) = (GraphNode::from(root), GraphNode::from(child));

        let roots = DocumentTranslator
            .translate(None, &Constraint::NoParents)
            .expect("translate")
            .native;
        assert!(eval_expr(&roots, &root));
        assert!(!eval_expr(&roots, &child));

        let level_two = DocumentTranslator
            .translate(None, &Constraint::DepthSpans(2))
            .expect("translate")
            .native;
        assert!(eval_expr(&level_two, &child));
        assert!(!eval_expr(&level_two, &root));
    }

    #[test]
    fn search_translation_defers_distance_bound() {
        let translation = SearchTranslator
            .translate(
                Some(&Expr::matches("Title", "war")),
                &Constraint::AncestorsWithin {
                    ids: id_set(["a"]),
                    max_distance: 3,
                },
            )
            .expect("translate");
        assert_eq!(
            translation.native,
            json!({
                "bool": {
                    "must": [{ "match": { "Title": { "query": "war" } } }],
                    "filter": [{ "terms": { "_us": ["a"] } }]
                }
            })
        );
        assert_eq!(
            translation.post_filter,
            Some(Expr::Or(vec![Expr::lte("_uds.a", 3)]))
        );
    }

    #[test]
    fn search_translation_rejects_size() {
        let err = SearchTranslator
            .translate(
                Some(&Expr::Size("Tags".into(), 2).and(Expr::matches("Title", "x"))),
                &Constraint::Unconstrained,
            )
            .expect_err("size unsupported");
        assert!(err.contains("size(Tags)"));
    }
}
