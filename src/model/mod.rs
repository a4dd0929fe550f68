pub mod document;
pub mod node;

pub use document::{Document, Value};
pub use node::{
    ANCESTOR_DEPTHS_FIELD, ANCESTORS_FIELD, CHILD_COUNT_FIELD, CollectionKind, GraphNode,
    ID_FIELD, IdSet, MAX_DEPTH_FIELD, MIN_DEPTH_FIELD, NodeId, ObjectGroup, PARENTS_FIELD,
    RESERVED_FIELDS, Unit, id_set, is_reserved_field,
};
