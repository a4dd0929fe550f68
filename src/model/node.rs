use crate::error::ArkError;
use crate::model::document::{Document, Value};
use compact_str::CompactString;
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

pub const ID_FIELD: &str = "_id";
pub const PARENTS_FIELD: &str = "_up";
pub const ANCESTOR_DEPTHS_FIELD: &str = "_uds";
pub const ANCESTORS_FIELD: &str = "_us";
pub const MIN_DEPTH_FIELD: &str = "_min";
pub const MAX_DEPTH_FIELD: &str = "_max";
pub const CHILD_COUNT_FIELD: &str = "_nbc";

/// Fields owned by the graph layer; content updates may not target them.
pub const RESERVED_FIELDS: [&str; 7] = [
    ID_FIELD,
    PARENTS_FIELD,
    ANCESTOR_DEPTHS_FIELD,
    ANCESTORS_FIELD,
    MIN_DEPTH_FIELD,
    MAX_DEPTH_FIELD,
    CHILD_COUNT_FIELD,
];

pub fn is_reserved_field(path: &str) -> bool {
    let head = path.split('.').next().unwrap_or(path);
    RESERVED_FIELDS.contains(&head)
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(CompactString);

impl NodeId {
    pub fn new(id: impl Into<CompactString>) -> Self {
        Self(id.into())
    }

    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string().into())
    }

    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.0.as_str())
    }
}

impl From<&str> for NodeId {
    fn from(value: &str) -> Self {
        Self(value.into())
    }
}

impl From<String> for NodeId {
    fn from(value: String) -> Self {
        Self(value.into())
    }
}

pub type IdSet = BTreeSet<NodeId>;

pub fn id_set<I, T>(ids: I) -> IdSet
where
    I: IntoIterator<Item = T>,
    T: Into<NodeId>,
{
    ids.into_iter().map(Into::into).collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum CollectionKind {
    Units,
    ObjectGroups,
}

impl CollectionKind {
    pub fn as_str(self) -> &'static str {
        match self {
            CollectionKind::Units => "unit",
            CollectionKind::ObjectGroups => "object_group",
        }
    }
}

impl fmt::Display for CollectionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Archival description node. Depth levels are 1-based: a root sits at level 1
/// and `ancestor_depths` records edge distances (a direct parent is at 1).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Unit {
    pub id: NodeId,
    pub parent_ids: IdSet,
    pub ancestor_depths: BTreeMap<NodeId, u32>,
    pub min_depth: u32,
    pub max_depth: u32,
    pub child_count: u64,
    pub content: Document,
}

impl Unit {
    pub fn new(id: impl Into<NodeId>, content: Document) -> Self {
        Self {
            id: id.into(),
            parent_ids: IdSet::new(),
            ancestor_depths: BTreeMap::new(),
            min_depth: 1,
            max_depth: 1,
            child_count: 0,
            content,
        }
    }

    pub fn is_root(&self) -> bool {
        self.parent_ids.is_empty()
    }

    pub fn ancestor_distance(&self, id: &NodeId) -> Option<u32> {
        self.ancestor_depths.get(id).copied()
    }

    /// True when this unit is one of `scope` or descends from one of them.
    pub fn is_within(&self, scope: &IdSet) -> bool {
        scope.contains(&self.id) || scope.iter().any(|id| self.ancestor_depths.contains_key(id))
    }

    /// True when some id of `ancestors` is recorded at a distance of at most
    /// `max_distance`.
    pub fn has_ancestor_within(&self, ancestors: &IdSet, max_distance: u32) -> bool {
        ancestors.iter().any(|id| {
            self.ancestor_depths
                .get(id)
                .is_some_and(|distance| *distance <= max_distance)
        })
    }

    /// Links this unit under `parent`, merging the parent's ancestry into the
    /// denormalized depth fields. Returns `false` when the link already exists.
    pub fn link_under(&mut self, parent: &Unit) -> Result<bool, ArkError> {
        if parent.id == self.id || parent.ancestor_depths.contains_key(&self.id) {
            return Err(ArkError::Conflict(format!(
                "linking unit '{}' under '{}' would create a cycle",
                self.id, parent.id
            )));
        }
        let first_parent = self.parent_ids.is_empty();
        if !self.parent_ids.insert(parent.id.clone()) {
            return Ok(false);
        }
        merge_min(&mut self.ancestor_depths, parent.id.clone(), 1);
        for (ancestor, distance) in &parent.ancestor_depths {
            merge_min(&mut self.ancestor_depths, ancestor.clone(), distance + 1);
        }
        let min = parent.min_depth + 1;
        let max = parent.max_depth + 1;
        if first_parent {
            self.min_depth = min;
            self.max_depth = max;
        } else {
            self.min_depth = self.min_depth.min(min);
            self.max_depth = self.max_depth.max(max);
        }
        Ok(true)
    }
}

fn merge_min(depths: &mut BTreeMap<NodeId, u32>, id: NodeId, distance: u32) {
    depths
        .entry(id)
        .and_modify(|current| *current = (*current).min(distance))
        .or_insert(distance);
}

/// Leaf node grouping the binary object versions attached to one or more units.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectGroup {
    pub id: NodeId,
    pub parent_ids: IdSet,
    pub content: Document,
}

impl ObjectGroup {
    pub fn new(id: impl Into<NodeId>, content: Document) -> Self {
        Self {
            id: id.into(),
            parent_ids: IdSet::new(),
            content,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GraphNode {
    Unit(Unit),
    ObjectGroup(ObjectGroup),
}

impl GraphNode {
    pub fn id(&self) -> &NodeId {
        match self {
            GraphNode::Unit(unit) => &unit.id,
            GraphNode::ObjectGroup(og) => &og.id,
        }
    }

    pub fn kind(&self) -> CollectionKind {
        match self {
            GraphNode::Unit(_) => CollectionKind::Units,
            GraphNode::ObjectGroup(_) => CollectionKind::ObjectGroups,
        }
    }

    pub fn parent_ids(&self) -> &IdSet {
        match self {
            GraphNode::Unit(unit) => &unit.parent_ids,
            GraphNode::ObjectGroup(og) => &og.parent_ids,
        }
    }

    pub fn content(&self) -> &Document {
        match self {
            GraphNode::Unit(unit) => &unit.content,
            GraphNode::ObjectGroup(og) => &og.content,
        }
    }

    pub fn content_mut(&mut self) -> &mut Document {
        match self {
            GraphNode::Unit(unit) => &mut unit.content,
            GraphNode::ObjectGroup(og) => &mut og.content,
        }
    }

    pub fn as_unit(&self) -> Option<&Unit> {
        match self {
            GraphNode::Unit(unit) => Some(unit),
            GraphNode::ObjectGroup(_) => None,
        }
    }

    pub fn into_unit(self) -> Option<Unit> {
        match self {
            GraphNode::Unit(unit) => Some(unit),
            GraphNode::ObjectGroup(_) => None,
        }
    }

    /// Resolves a field path, including the reserved graph fields.
    pub fn field(&self, path: &str) -> Option<Cow<'_, Value>> {
        match path {
            ID_FIELD => Some(Cow::Owned(Value::from(self.id().as_str()))),
            PARENTS_FIELD => Some(Cow::Owned(id_list(self.parent_ids().iter()))),
            _ => match self {
                GraphNode::Unit(unit) => match path {
                    ANCESTORS_FIELD => Some(Cow::Owned(id_list(unit.ancestor_depths.keys()))),
                    ANCESTOR_DEPTHS_FIELD => Some(Cow::Owned(depth_object(unit))),
                    MIN_DEPTH_FIELD => Some(Cow::Owned(Value::Integer(unit.min_depth as i64))),
                    MAX_DEPTH_FIELD => Some(Cow::Owned(Value::Integer(unit.max_depth as i64))),
                    CHILD_COUNT_FIELD => {
                        Some(Cow::Owned(Value::Integer(unit.child_count as i64)))
                    }
                    _ => match path.strip_prefix("_uds.") {
                        // ancestor ids are opaque, so the remainder is not split further
                        Some(ancestor) => unit
                            .ancestor_depths
                            .get(&NodeId::from(ancestor))
                            .map(|distance| Cow::Owned(Value::Integer(*distance as i64))),
                        None => unit.content.get(path).map(Cow::Borrowed),
                    },
                },
                GraphNode::ObjectGroup(og) => og.content.get(path).map(Cow::Borrowed),
            },
        }
    }

    /// Full document view: content plus the reserved graph fields.
    pub fn materialize(&self) -> Document {
        let mut doc = self.content().clone();
        doc.set(ID_FIELD, Value::from(self.id().as_str()));
        doc.set(PARENTS_FIELD, id_list(self.parent_ids().iter()));
        if let GraphNode::Unit(unit) = self {
            doc.set(ANCESTORS_FIELD, id_list(unit.ancestor_depths.keys()));
            doc.set(ANCESTOR_DEPTHS_FIELD, depth_object(unit));
            doc.set(MIN_DEPTH_FIELD, Value::Integer(unit.min_depth as i64));
            doc.set(MAX_DEPTH_FIELD, Value::Integer(unit.max_depth as i64));
            doc.set(CHILD_COUNT_FIELD, Value::Integer(unit.child_count as i64));
        }
        doc
    }
}

fn id_list<'a>(ids: impl Iterator<Item = &'a NodeId>) -> Value {
    Value::List(ids.map(|id| Value::from(id.as_str())).collect())
}

fn depth_object(unit: &Unit) -> Value {
    Value::Object(
        unit.ancestor_depths
            .iter()
            .map(|(id, depth)| (id.to_string(), Value::Integer(*depth as i64)))
            .collect(),
    )
}

impl From<Unit> for GraphNode {
    fn from(value: Unit) -> Self {
        GraphNode::Unit(value)
    }
}

impl From<ObjectGroup> for GraphNode {
    fn from(value: ObjectGroup) -> Self {
        GraphNode::ObjectGroup(value)
    }
}
