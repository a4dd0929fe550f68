use crate::error::ArkError;
use crate::model::{CollectionKind, Document, IdSet, NodeId, Value, is_reserved_field};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Order {
    Asc,
    Desc,
}

/// One side of a range predicate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bound {
    pub value: Value,
    pub inclusive: bool,
}

impl Bound {
    pub fn inclusive(value: impl Into<Value>) -> Self {
        Self {
            value: value.into(),
            inclusive: true,
        }
    }

    pub fn exclusive(value: impl Into<Value>) -> Self {
        Self {
            value: value.into(),
            inclusive: false,
        }
    }
}

/// Predicate over node fields. Field names are dotted paths into content or
/// one of the reserved graph fields.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Expr {
    Eq(String, Value),
    Ne(String, Value),
    Lt(String, Value),
    Lte(String, Value),
    Gt(String, Value),
    Gte(String, Value),
    Range {
        field: String,
        lower: Option<Bound>,
        upper: Option<Bound>,
    },
    In(String, Vec<Value>),
    Nin(String, Vec<Value>),
    Exists(String),
    Missing(String),
    IsNull(String),
    Size(String, usize),
    /// Exact, non-analysed value match.
    Term(String, Value),
    Wildcard(String, String),
    Regex(String, String),
    Prefix(String, String),
    Match(String, String),
    MatchPhrase(String, String),
    MatchPhrasePrefix(String, String),
    /// Simple query string: `+word` required, `-word` excluded, bare words optional.
    Search(String, String),
    /// Empty conjunction matches everything.
    And(Vec<Expr>),
    /// Empty disjunction matches nothing.
    Or(Vec<Expr>),
    Not(Box<Expr>),
}

impl Expr {
    pub fn all() -> Expr {
        Expr::And(Vec::new())
    }

    pub fn none() -> Expr {
        Expr::Or(Vec::new())
    }

    pub fn eq(field: &str, value: impl Into<Value>) -> Expr {
        Expr::Eq(field.to_string(), value.into())
    }

    pub fn gte(field: &str, value: impl Into<Value>) -> Expr {
        Expr::Gte(field.to_string(), value.into())
    }

    pub fn lte(field: &str, value: impl Into<Value>) -> Expr {
        Expr::Lte(field.to_string(), value.into())
    }

    pub fn matches(field: &str, query: &str) -> Expr {
        Expr::Match(field.to_string(), query.to_string())
    }

    pub fn ids_in(field: &str, ids: &IdSet) -> Expr {
        Expr::In(
            field.to_string(),
            ids.iter().map(|id| Value::from(id.as_str())).collect(),
        )
    }

    /// Conjunction that flattens nested `And` nodes.
    pub fn and(self, rhs: Expr) -> Expr {
        let mut items = match self {
            Expr::And(items) => items,
            other => vec![other],
        };
        match rhs {
            Expr::And(more) => items.extend(more),
            other => items.push(other),
        }
        Expr::And(items)
    }

    pub fn or(self, rhs: Expr) -> Expr {
        let mut items = match self {
            Expr::Or(items) => items,
            other => vec![other],
        };
        match rhs {
            Expr::Or(more) => items.extend(more),
            other => items.push(other),
        }
        Expr::Or(items)
    }

    #[allow(clippy::should_implement_trait)]
    pub fn not(self) -> Expr {
        Expr::Not(Box::new(self))
    }

    /// True when the tree contains an analysed full-text operator.
    pub fn is_full_text(&self) -> bool {
        match self {
            Expr::Match(..)
            | Expr::MatchPhrase(..)
            | Expr::MatchPhrasePrefix(..)
            | Expr::Search(..) => true,
            Expr::And(items) | Expr::Or(items) => items.iter().any(Expr::is_full_text),
            Expr::Not(inner) => inner.is_full_text(),
            _ => false,
        }
    }

    /// Nesting depth of the tree; leaves count as 1.
    pub fn depth(&self) -> usize {
        match self {
            Expr::And(items) | Expr::Or(items) => {
                1 + items.iter().map(Expr::depth).max().unwrap_or(0)
            }
            Expr::Not(inner) => 1 + inner.depth(),
            _ => 1,
        }
    }

    pub fn validate_depth(&self, max_depth: usize) -> Result<(), ArkError> {
        let depth = self.depth();
        if depth > max_depth {
            return Err(ArkError::Validation(format!(
                "expression depth {depth} exceeds maximum allowed depth of {max_depth}"
            )));
        }
        Ok(())
    }

    /// Checks that every regex and wildcard pattern compiles.
    pub fn validate_patterns(&self) -> Result<(), ArkError> {
        match self {
            Expr::Regex(field, pattern) => crate::query::operators::compile_regex(pattern)
                .map(|_| ())
                .ok_or_else(|| {
                    ArkError::Validation(format!("invalid regex on '{field}': {pattern}"))
                }),
            Expr::Wildcard(field, pattern) => {
                crate::query::operators::compile_wildcard(pattern)
                    .map(|_| ())
                    .ok_or_else(|| {
                        ArkError::Validation(format!("invalid wildcard on '{field}': {pattern}"))
                    })
            }
            Expr::And(items) | Expr::Or(items) => {
                items.iter().try_for_each(Expr::validate_patterns)
            }
            Expr::Not(inner) => inner.validate_patterns(),
            _ => Ok(()),
        }
    }
}

fn write_values(f: &mut fmt::Formatter<'_>, values: &[Value]) -> fmt::Result {
    write!(f, "[")?;
    for (i, value) in values.iter().enumerate() {
        if i > 0 {
            write!(f, ", ")?;
        }
        write!(f, "{}", value.to_json())?;
    }
    write!(f, "]")
}

fn write_list(f: &mut fmt::Formatter<'_>, op: &str, items: &[Expr]) -> fmt::Result {
    write!(f, "{op}(")?;
    for (i, item) in items.iter().enumerate() {
        if i > 0 {
            write!(f, ", ")?;
        }
        write!(f, "{item}")?;
    }
    write!(f, ")")
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expr::Eq(c, v) => write!(f, "{c} = {}", v.to_json()),
            Expr::Ne(c, v) => write!(f, "{c} != {}", v.to_json()),
            Expr::Lt(c, v) => write!(f, "{c} < {}", v.to_json()),
            Expr::Lte(c, v) => write!(f, "{c} <= {}", v.to_json()),
            Expr::Gt(c, v) => write!(f, "{c} > {}", v.to_json()),
            Expr::Gte(c, v) => write!(f, "{c} >= {}", v.to_json()),
            Expr::Range {
                field,
                lower,
                upper,
            } => {
                write!(f, "range({field}, ")?;
                match lower {
                    Some(b) => write!(f, "{}{}", if b.inclusive { "[" } else { "(" }, b.value.to_json())?,
                    None => write!(f, "(-inf")?,
                }
                write!(f, ", ")?;
                match upper {
                    Some(b) => write!(f, "{}{}", b.value.to_json(), if b.inclusive { "]" } else { ")" })?,
                    None => write!(f, "+inf)")?,
                }
                write!(f, ")")
            }
            Expr::In(c, values) => {
                write!(f, "{c} in ")?;
                write_values(f, values)
            }
            Expr::Nin(c, values) => {
                write!(f, "{c} nin ")?;
                write_values(f, values)
            }
            Expr::Exists(c) => write!(f, "exists({c})"),
            Expr::Missing(c) => write!(f, "missing({c})"),
            Expr::IsNull(c) => write!(f, "is_null({c})"),
            Expr::Size(c, n) => write!(f, "size({c}) = {n}"),
            Expr::Term(c, v) => write!(f, "term({c}, {})", v.to_json()),
            Expr::Wildcard(c, p) => write!(f, "wildcard({c}, {p:?})"),
            Expr::Regex(c, p) => write!(f, "regex({c}, {p:?})"),
            Expr::Prefix(c, p) => write!(f, "prefix({c}, {p:?})"),
            Expr::Match(c, q) => write!(f, "match({c}, {q:?})"),
            Expr::MatchPhrase(c, q) => write!(f, "match_phrase({c}, {q:?})"),
            Expr::MatchPhrasePrefix(c, q) => write!(f, "match_phrase_prefix({c}, {q:?})"),
            Expr::Search(c, q) => write!(f, "search({c}, {q:?})"),
            Expr::And(items) if items.is_empty() => write!(f, "all"),
            Expr::Or(items) if items.is_empty() => write!(f, "none"),
            Expr::And(items) => write_list(f, "and", items),
            Expr::Or(items) => write_list(f, "or", items),
            Expr::Not(inner) => write!(f, "not({inner})"),
        }
    }
}

/// Depth parameters of a filter step. Zero means "not set" for both.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DepthSpec {
    /// Absolute level (1 = graph roots).
    pub exact: u32,
    /// Edge distance from the previous result; negative ascends.
    pub relative: i32,
}

impl DepthSpec {
    pub fn is_set(&self) -> bool {
        self.exact > 0 || self.relative != 0
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Step {
    /// Explicit id set.
    Path(IdSet),
    Filter {
        expr: Option<Expr>,
        depth: DepthSpec,
    },
}

impl Step {
    pub fn path<I, T>(ids: I) -> Step
    where
        I: IntoIterator<Item = T>,
        T: Into<NodeId>,
    {
        Step::Path(crate::model::id_set(ids))
    }

    pub fn filter(expr: Expr) -> Step {
        Step::Filter {
            expr: Some(expr),
            depth: DepthSpec::default(),
        }
    }

    pub fn any() -> Step {
        Step::Filter {
            expr: None,
            depth: DepthSpec::default(),
        }
    }

    pub fn at_depth(self, exact: u32) -> Step {
        self.map_depth(|depth| depth.exact = exact)
    }

    pub fn relative(self, relative: i32) -> Step {
        self.map_depth(|depth| depth.relative = relative)
    }

    fn map_depth(self, apply: impl FnOnce(&mut DepthSpec)) -> Step {
        match self {
            Step::Filter { expr, mut depth } => {
                apply(&mut depth);
                Step::Filter { expr, depth }
            }
            path => path,
        }
    }

    pub fn expr(&self) -> Option<&Expr> {
        match self {
            Step::Filter { expr, .. } => expr.as_ref(),
            Step::Path(_) => None,
        }
    }

    pub fn depth(&self) -> DepthSpec {
        match self {
            Step::Filter { depth, .. } => *depth,
            Step::Path(_) => DepthSpec::default(),
        }
    }
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Step::Path(ids) => {
                write!(f, "path(")?;
                for (i, id) in ids.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{id}")?;
                }
                write!(f, ")")
            }
            Step::Filter { expr, depth } => {
                match expr {
                    Some(expr) => write!(f, "{expr}")?,
                    None => write!(f, "all")?,
                }
                if depth.exact > 0 {
                    write!(f, " @depth={}", depth.exact)?;
                }
                if depth.relative != 0 {
                    write!(f, " @relative={:+}", depth.relative)?;
                }
                Ok(())
            }
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SelectSpec {
    /// Empty projection returns full documents.
    pub projection: Vec<String>,
    pub order_by: Vec<(String, Order)>,
    pub offset: usize,
    pub limit: Option<usize>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InsertSpec {
    /// Generated when absent.
    pub id: Option<NodeId>,
    pub parent_ids: IdSet,
    pub content: Document,
}

impl InsertSpec {
    pub fn new(content: Document) -> Self {
        Self {
            content,
            ..Self::default()
        }
    }

    pub fn with_id(mut self, id: impl Into<NodeId>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn with_parents<I, T>(mut self, ids: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<NodeId>,
    {
        self.parent_ids.extend(ids.into_iter().map(Into::into));
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpdateAction {
    Set(String, Value),
    Unset(String),
    Inc(String, Value),
    Min(String, Value),
    Max(String, Value),
    Push(String, Vec<Value>),
    AddToSet(String, Vec<Value>),
    Pull(String, Vec<Value>),
    Rename(String, String),
}

impl UpdateAction {
    /// Fields written by the action.
    pub fn targets(&self) -> Vec<&str> {
        match self {
            UpdateAction::Set(field, _)
            | UpdateAction::Unset(field)
            | UpdateAction::Inc(field, _)
            | UpdateAction::Min(field, _)
            | UpdateAction::Max(field, _)
            | UpdateAction::Push(field, _)
            | UpdateAction::AddToSet(field, _)
            | UpdateAction::Pull(field, _) => vec![field.as_str()],
            UpdateAction::Rename(from, to) => vec![from.as_str(), to.as_str()],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    Select(SelectSpec),
    Insert(InsertSpec),
    Update(Vec<UpdateAction>),
    Delete,
}

impl Action {
    pub fn name(&self) -> &'static str {
        match self {
            Action::Select(_) => "select",
            Action::Insert(_) => "insert",
            Action::Update(_) => "update",
            Action::Delete => "delete",
        }
    }

    pub fn is_insert(&self) -> bool {
        matches!(self, Action::Insert(_))
    }
}

/// Parsed multi-step request, as handed over by the query parser.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedRequest {
    pub collection: CollectionKind,
    pub roots: IdSet,
    pub steps: Vec<Step>,
    pub action: Action,
}

impl ParsedRequest {
    fn new(collection: CollectionKind, action: Action) -> Self {
        Self {
            collection,
            roots: IdSet::new(),
            steps: Vec::new(),
            action,
        }
    }

    pub fn select(collection: CollectionKind) -> Self {
        Self::new(collection, Action::Select(SelectSpec::default()))
    }

    pub fn insert(collection: CollectionKind, spec: InsertSpec) -> Self {
        Self::new(collection, Action::Insert(spec))
    }

    pub fn update(collection: CollectionKind, actions: Vec<UpdateAction>) -> Self {
        Self::new(collection, Action::Update(actions))
    }

    pub fn delete(collection: CollectionKind) -> Self {
        Self::new(collection, Action::Delete)
    }

    pub fn with_roots<I, T>(mut self, ids: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<NodeId>,
    {
        self.roots.extend(ids.into_iter().map(Into::into));
        self
    }

    pub fn step(mut self, step: Step) -> Self {
        self.steps.push(step);
        self
    }

    pub fn project(mut self, fields: &[&str]) -> Self {
        if let Action::Select(spec) = &mut self.action {
            spec.projection = fields.iter().map(|f| f.to_string()).collect();
        }
        self
    }

    pub fn order_by(mut self, field: &str, order: Order) -> Self {
        if let Action::Select(spec) = &mut self.action {
            spec.order_by.push((field.to_string(), order));
        }
        self
    }

    pub fn offset(mut self, offset: usize) -> Self {
        if let Action::Select(spec) = &mut self.action {
            spec.offset = offset;
        }
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        if let Action::Select(spec) = &mut self.action {
            spec.limit = Some(limit);
        }
        self
    }

    /// Shape checks that do not depend on stored data.
    pub fn validate(&self, max_expr_depth: usize, max_depth: u32) -> Result<(), ArkError> {
        for (index, step) in self.steps.iter().enumerate() {
            let rank = index + 1;
            if let Some(expr) = step.expr() {
                expr.validate_depth(max_expr_depth)?;
                expr.validate_patterns()?;
            }
            let depth = step.depth();
            if depth.exact > max_depth || depth.relative.unsigned_abs() > max_depth {
                return Err(ArkError::Validation(format!(
                    "step {rank} depth exceeds maximum of {max_depth}"
                )));
            }
            if depth.is_set() && self.collection == CollectionKind::ObjectGroups {
                return Err(ArkError::Validation(format!(
                    "step {rank}: object group steps take no depth parameters"
                )));
            }
        }
        if let Action::Update(actions) = &self.action {
            if actions.is_empty() {
                return Err(ArkError::Validation("update without actions".into()));
            }
            for field in actions.iter().flat_map(UpdateAction::targets) {
                if is_reserved_field(field) {
                    return Err(ArkError::Validation(format!(
                        "update may not target reserved field '{field}'"
                    )));
                }
            }
        }
        if let Action::Insert(spec) = &self.action
            && let Some(field) = spec.content.iter().map(|(k, _)| k).find(|k| is_reserved_field(k))
        {
            return Err(ArkError::Validation(format!(
                "insert content may not carry reserved field '{field}'"
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nested_and_is_flattened_and_depth_counted() {
        let expr = Expr::eq("a", 1).and(Expr::eq("b", 2)).and(Expr::eq("c", 3));
        assert!(matches!(&expr, Expr::And(items) if items.len() == 3));
        assert_eq!(expr.depth(), 2);

        let mut deep = Expr::eq("a", 1);
        for _ in 0..40 {
            deep = deep.not();
        }
        assert!(deep.validate_depth(32).is_err());
        assert!(expr.validate_depth(32).is_ok());
    }

    #[test]
    fn full_text_detection_descends_into_boolean_operators() {
        assert!(!Expr::eq("Title", "x").is_full_text());
        assert!(Expr::eq("a", 1).or(Expr::matches("Title", "war")).is_full_text());
        assert!(Expr::Search("Title".into(), "+war".into()).not().is_full_text());
    }

    #[test]
    fn steps_render_for_diagnostics() {
        let step = Step::filter(Expr::eq("Title", "A")).relative(-2);
        assert_eq!(step.to_string(), "Title = \"A\" @relative=-2");
        assert_eq!(Step::path(["b", "a"]).to_string(), "path(a, b)");
        assert_eq!(Step::any().at_depth(3).to_string(), "all @depth=3");
    }

    #[test]
    fn validation_rejects_reserved_updates_and_object_group_depth() {
        let update = ParsedRequest::update(
            CollectionKind::Units,
            vec![UpdateAction::Set("_up".into(), Value::Null)],
        );
        assert!(update.validate(32, 100).is_err());

        let og = ParsedRequest::select(CollectionKind::ObjectGroups).step(Step::any().relative(1));
        assert!(og.validate(32, 100).is_err());

        let too_deep = ParsedRequest::select(CollectionKind::Units).step(Step::any().at_depth(101));
        assert!(too_deep.validate(32, 100).is_err());

        let bad_regex = ParsedRequest::select(CollectionKind::Units)
            .step(Step::filter(Expr::Regex("Title".into(), "(".into())));
        assert!(bad_regex.validate(32, 100).is_err());

        let ok = ParsedRequest::select(CollectionKind::Units)
            .step(Step::filter(Expr::eq("Title", "x")).relative(2))
            .order_by("Title", Order::Asc)
            .limit(10);
        ok.validate(32, 100).expect("valid request");
    }
}
