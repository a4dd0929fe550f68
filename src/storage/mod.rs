//! Primary document store adapter: the source of truth for Units and
//! ObjectGroups.

pub mod memory;

use crate::error::ArkError;
use crate::model::{CollectionKind, Document, GraphNode, IdSet, NodeId};
use crate::query::plan::{Expr, Order, UpdateAction};
use std::future::Future;

/// Select-time shaping of materialized documents.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FindOptions {
    pub projection: Vec<String>,
    pub order_by: Vec<(String, Order)>,
    pub offset: usize,
    pub limit: Option<usize>,
}

/// Primitives the pipeline needs from the primary store. Filters are
/// expressed in the predicate language; reserved graph fields (`_up`, `_us`,
/// `_uds.<id>`, `_min`, `_max`) are addressable like content fields.
pub trait DocumentStore: Send + Sync + 'static {
    /// Ids of matching nodes, at most `limit` of them.
    fn find_ids(
        &self,
        kind: CollectionKind,
        filter: &Expr,
        limit: usize,
    ) -> impl Future<Output = Result<IdSet, ArkError>> + Send;

    fn find_nodes(
        &self,
        kind: CollectionKind,
        filter: &Expr,
        limit: usize,
    ) -> impl Future<Output = Result<Vec<GraphNode>, ArkError>> + Send;

    /// Materializes `ids` shaped by `options`.
    fn fetch_documents(
        &self,
        kind: CollectionKind,
        ids: &IdSet,
        options: &FindOptions,
    ) -> impl Future<Output = Result<Vec<(NodeId, Document)>, ArkError>> + Send;

    fn get(
        &self,
        kind: CollectionKind,
        id: &NodeId,
    ) -> impl Future<Output = Result<Option<GraphNode>, ArkError>> + Send;

    fn exists(
        &self,
        kind: CollectionKind,
        id: &NodeId,
    ) -> impl Future<Output = Result<bool, ArkError>> + Send;

    /// Fails with [`ArkError::AlreadyExists`] when the id is taken.
    fn insert(&self, node: GraphNode) -> impl Future<Output = Result<(), ArkError>> + Send;

    /// Applies content updates to every node of `ids`; returns how many changed.
    fn update_many(
        &self,
        kind: CollectionKind,
        ids: &IdSet,
        actions: &[UpdateAction],
    ) -> impl Future<Output = Result<u64, ArkError>> + Send;

    /// Returns the ids actually deleted.
    fn delete_many(
        &self,
        kind: CollectionKind,
        ids: &IdSet,
    ) -> impl Future<Output = Result<IdSet, ArkError>> + Send;

    /// Union of the ancestor maps of `ids`, keeping ancestors within
    /// `max_distance`. One aggregate round-trip regardless of `ids` size.
    fn aggregate_ancestors(
        &self,
        ids: &IdSet,
        max_distance: u32,
    ) -> impl Future<Output = Result<IdSet, ArkError>> + Send;

    /// Links Unit `child` under Unit `parent`, updating the child's ancestry
    /// and the parent's child counter.
    fn attach_unit(
        &self,
        parent: &NodeId,
        child: &NodeId,
    ) -> impl Future<Output = Result<(), ArkError>> + Send;

    fn attach_object_group(
        &self,
        parent: &NodeId,
        object_group: &NodeId,
    ) -> impl Future<Output = Result<(), ArkError>> + Send;
}
