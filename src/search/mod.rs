//! Full-text search index adapter. Queries are JSON documents in the
//! engine's query DSL (`bool`, `terms`, `range`, `match`, ...).

pub mod analysis;
pub mod memory;

use crate::error::ArkError;
use crate::model::{CollectionKind, Document, IdSet, NodeId};
use std::future::Future;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchHit {
    pub id: NodeId,
    /// Indexed source, including the reserved graph fields.
    pub source: Document,
}

pub trait SearchIndex: Send + Sync + 'static {
    fn search(
        &self,
        kind: CollectionKind,
        query: &serde_json::Value,
        limit: usize,
    ) -> impl Future<Output = Result<Vec<SearchHit>, ArkError>> + Send;

    /// Indexes or replaces the source of `id`.
    fn index(
        &self,
        kind: CollectionKind,
        id: &NodeId,
        source: Document,
    ) -> impl Future<Output = Result<(), ArkError>> + Send;

    /// Returns how many entries were removed.
    fn remove(
        &self,
        kind: CollectionKind,
        ids: &IdSet,
    ) -> impl Future<Output = Result<u64, ArkError>> + Send;
}
