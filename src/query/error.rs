use crate::error::{ArkError, StoreTarget};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PipelineErrorKind {
    /// A step, or root resolution, left an empty working set where a
    /// non-empty one was required.
    NoResultAtRank,
    AlreadyExists,
    ParentNotFound,
    /// Store or index fault.
    ExecutionFailure,
    InvalidStatementShape,
    ResultLimitExceeded,
}

impl PipelineErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            PipelineErrorKind::NoResultAtRank => "no_result_at_rank",
            PipelineErrorKind::AlreadyExists => "already_exists",
            PipelineErrorKind::ParentNotFound => "parent_not_found",
            PipelineErrorKind::ExecutionFailure => "execution_failure",
            PipelineErrorKind::InvalidStatementShape => "invalid_statement_shape",
            PipelineErrorKind::ResultLimitExceeded => "result_limit_exceeded",
        }
    }
}

/// Structured pipeline failure. `rank` is 1-based for steps; rank 0 stands
/// for root resolution and request validation. Finalization failures carry
/// the rank of the last step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineError {
    pub kind: PipelineErrorKind,
    pub rank: usize,
    pub step: Option<String>,
    pub previous: Option<String>,
    pub target: Option<StoreTarget>,
    pub message: String,
}

impl PipelineError {
    pub fn new(kind: PipelineErrorKind, rank: usize, message: impl Into<String>) -> Self {
        Self {
            kind,
            rank,
            step: None,
            previous: None,
            target: None,
            message: message.into(),
        }
    }

    pub fn no_result(rank: usize, step: Option<String>, previous: String) -> Self {
        Self {
            step,
            previous: Some(previous),
            ..Self::new(PipelineErrorKind::NoResultAtRank, rank, "no result")
        }
    }

    pub fn invalid_shape(rank: usize, message: impl Into<String>) -> Self {
        Self::new(PipelineErrorKind::InvalidStatementShape, rank, message)
    }

    /// Maps an adapter error raised at `rank` onto a pipeline error kind.
    pub fn from_store(rank: usize, target: StoreTarget, err: ArkError) -> Self {
        let kind = match &err {
            ArkError::AlreadyExists { .. } => PipelineErrorKind::AlreadyExists,
            ArkError::NotFound { .. } => PipelineErrorKind::ParentNotFound,
            ArkError::Validation(_) | ArkError::InvalidConfig { .. } => {
                PipelineErrorKind::InvalidStatementShape
            }
            _ => PipelineErrorKind::ExecutionFailure,
        };
        Self {
            target: Some(err.target().unwrap_or(target)),
            ..Self::new(kind, rank, err.to_string())
        }
    }

    pub fn with_step(mut self, step: impl fmt::Display) -> Self {
        self.step = Some(step.to_string());
        self
    }

    pub fn with_previous(mut self, previous: String) -> Self {
        self.previous = Some(previous);
        self
    }

    pub fn code_str(&self) -> &'static str {
        self.kind.as_str()
    }
}

impl fmt::Display for PipelineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            PipelineErrorKind::NoResultAtRank => write!(f, "no result at rank {}", self.rank)?,
            kind => write!(f, "{} at rank {}: {}", kind.as_str(), self.rank, self.message)?,
        }
        if let Some(target) = self.target {
            write!(f, " (target={target})")?;
        }
        if let Some(step) = &self.step {
            write!(f, "; step: {step}")?;
        }
        if let Some(previous) = &self.previous {
            write!(f, "; previous: {previous}")?;
        }
        Ok(())
    }
}

impl std::error::Error for PipelineError {}
