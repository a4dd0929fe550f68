use crate::model::CollectionKind;
use thiserror::Error;

/// Backend an adapter-level failure originated from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StoreTarget {
    PrimaryStore,
    SearchIndex,
}

impl StoreTarget {
    pub fn as_str(self) -> &'static str {
        match self {
            StoreTarget::PrimaryStore => "primary_store",
            StoreTarget::SearchIndex => "search_index",
        }
    }
}

impl std::fmt::Display for StoreTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArkErrorCode {
    Decode,
    Validation,
    InvalidConfig,
    Unavailable,
    UnitAlreadyExists,
    ObjectGroupAlreadyExists,
    UnitNotFound,
    ObjectGroupNotFound,
    Conflict,
    Timeout,
}

impl ArkErrorCode {
    pub fn as_str(self) -> &'static str {
        match self {
            ArkErrorCode::Decode => "decode",
            ArkErrorCode::Validation => "validation",
            ArkErrorCode::InvalidConfig => "invalid_config",
            ArkErrorCode::Unavailable => "unavailable",
            ArkErrorCode::UnitAlreadyExists => "unit_already_exists",
            ArkErrorCode::ObjectGroupAlreadyExists => "object_group_already_exists",
            ArkErrorCode::UnitNotFound => "unit_not_found",
            ArkErrorCode::ObjectGroupNotFound => "object_group_not_found",
            ArkErrorCode::Conflict => "conflict",
            ArkErrorCode::Timeout => "timeout",
        }
    }
}

/// Errors raised by the storage and search adapters and by configuration.
#[derive(Debug, Clone, Error)]
pub enum ArkError {
    #[error("decode error: {0}")]
    Decode(String),
    #[error("validation error: {0}")]
    Validation(String),
    #[error("invalid config: {message}")]
    InvalidConfig { message: String },
    #[error("{target} unavailable: {message}")]
    Unavailable { target: StoreTarget, message: String },
    #[error("{kind} '{id}' already exists")]
    AlreadyExists { kind: CollectionKind, id: String },
    #[error("{kind} '{id}' not found")]
    NotFound { kind: CollectionKind, id: String },
    #[error("conflict error: {0}")]
    Conflict(String),
    #[error("{target} timeout")]
    Timeout { target: StoreTarget },
}

impl ArkError {
    pub fn code(&self) -> ArkErrorCode {
        match self {
            ArkError::Decode(_) => ArkErrorCode::Decode,
            ArkError::Validation(_) => ArkErrorCode::Validation,
            ArkError::InvalidConfig { .. } => ArkErrorCode::InvalidConfig,
            ArkError::Unavailable { .. } => ArkErrorCode::Unavailable,
            ArkError::AlreadyExists { kind, .. } => match kind {
                CollectionKind::Units => ArkErrorCode::UnitAlreadyExists,
                CollectionKind::ObjectGroups => ArkErrorCode::ObjectGroupAlreadyExists,
            },
            ArkError::NotFound { kind, .. } => match kind {
                CollectionKind::Units => ArkErrorCode::UnitNotFound,
                CollectionKind::ObjectGroups => ArkErrorCode::ObjectGroupNotFound,
            },
            ArkError::Conflict(_) => ArkErrorCode::Conflict,
            ArkError::Timeout { .. } => ArkErrorCode::Timeout,
        }
    }

    pub fn code_str(&self) -> &'static str {
        self.code().as_str()
    }

    /// Backend the error came from, when it is an infrastructure fault.
    pub fn target(&self) -> Option<StoreTarget> {
        match self {
            ArkError::Unavailable { target, .. } | ArkError::Timeout { target } => Some(*target),
            _ => None,
        }
    }
}
