pub mod cache;
pub mod config;
pub mod error;
pub mod model;
pub mod query;
pub mod search;
pub mod storage;

pub use crate::cache::RecencyCache;
pub use crate::config::{ArkConfig, IndexConsistency};
pub use crate::error::{ArkError, ArkErrorCode, StoreTarget};
pub use crate::model::{CollectionKind, Document, GraphNode, IdSet, NodeId, ObjectGroup, Unit, Value};
pub use crate::query::{
    Action, AuthorizationScope, DepthSpec, Expr, InsertSpec, Order, ParsedRequest,
    PipelineError, PipelineErrorKind, PipelineExecutor, PipelineWarning, ReconcileReport,
    SelectSpec, Step, StepResult, UpdateAction,
};
pub use crate::search::SearchIndex;
pub use crate::search::memory::MemorySearchIndex;
pub use crate::storage::DocumentStore;
pub use crate::storage::memory::MemoryStore;
