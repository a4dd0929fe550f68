pub mod collection;
pub mod depth;
pub mod error;
pub mod executor;
pub mod operators;
pub mod plan;
pub mod result;
pub mod translate;

pub use error::{PipelineError, PipelineErrorKind};
pub use executor::{AuthorizationScope, PipelineExecutor, ReconcileReport};
pub use plan::{
    Action, Bound, DepthSpec, Expr, InsertSpec, Order, ParsedRequest, SelectSpec, Step,
    UpdateAction,
};
pub use result::{PipelineWarning, StepResult};
