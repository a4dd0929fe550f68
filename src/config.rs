use crate::error::ArkError;

/// How a Unit insert treats a failed write to the search index once the
/// primary store write has succeeded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum IndexConsistency {
    /// Queue the unit for reconciliation and report the insert as successful.
    #[default]
    Deferred,
    /// Queue the unit for reconciliation and fail the pipeline.
    Strict,
}

/// Runtime configuration for a pipeline executor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArkConfig {
    /// Largest exact or relative depth a step may request.
    pub max_depth: u32,
    pub recency_cache_capacity: usize,
    /// Upper bound on ids a single step may yield before the pipeline aborts.
    pub max_step_ids: usize,
    pub max_expr_depth: usize,
    pub index_consistency: IndexConsistency,
    pub trace_requests: bool,
    /// Number of ids rendered when a result is described in diagnostics.
    pub describe_id_limit: usize,
}

impl Default for ArkConfig {
    fn default() -> Self {
        Self {
            max_depth: 100,
            recency_cache_capacity: 4096,
            max_step_ids: 100_000,
            max_expr_depth: 32,
            index_consistency: IndexConsistency::Deferred,
            trace_requests: false,
            describe_id_limit: 16,
        }
    }
}

impl ArkConfig {
    pub fn development() -> Self {
        Self {
            recency_cache_capacity: 256,
            trace_requests: true,
            describe_id_limit: 64,
            ..Self::default()
        }
    }

    /// Profile for deployments where a unit must never be reported as inserted
    /// while it is still missing from the search index.
    pub fn strict_indexing() -> Self {
        Self {
            index_consistency: IndexConsistency::Strict,
            ..Self::default()
        }
    }

    pub fn with_max_depth(mut self, max_depth: u32) -> Self {
        self.max_depth = max_depth;
        self
    }

    pub fn with_recency_cache_capacity(mut self, capacity: usize) -> Self {
        self.recency_cache_capacity = capacity;
        self
    }

    pub fn with_max_step_ids(mut self, max_step_ids: usize) -> Self {
        self.max_step_ids = max_step_ids;
        self
    }

    pub fn with_index_consistency(mut self, consistency: IndexConsistency) -> Self {
        self.index_consistency = consistency;
        self
    }

    pub fn with_trace_requests(mut self, trace_requests: bool) -> Self {
        self.trace_requests = trace_requests;
        self
    }

    pub fn validate(&self) -> Result<(), ArkError> {
        if self.max_depth == 0 {
            return Err(ArkError::InvalidConfig {
                message: "max_depth must be > 0".into(),
            });
        }
        if self.recency_cache_capacity == 0 {
            return Err(ArkError::InvalidConfig {
                message: "recency_cache_capacity must be > 0".into(),
            });
        }
        if self.max_step_ids == 0 {
            return Err(ArkError::InvalidConfig {
                message: "max_step_ids must be > 0".into(),
            });
        }
        if self.max_expr_depth == 0 {
            return Err(ArkError::InvalidConfig {
                message: "max_expr_depth must be > 0".into(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::{ArkConfig, IndexConsistency};

    #[test]
    fn profiles_validate() {
        ArkConfig::default().validate().expect("default");
        ArkConfig::development().validate().expect("development");
        let strict = ArkConfig::strict_indexing();
        strict.validate().expect("strict");
        assert_eq!(strict.index_consistency, IndexConsistency::Strict);
    }

    #[test]
    fn zero_bounds_are_rejected() {
        let err = ArkConfig::default()
            .with_max_depth(0)
            .validate()
            .expect_err("zero depth");
        assert_eq!(err.code_str(), "invalid_config");
        assert!(
            ArkConfig::default()
                .with_recency_cache_capacity(0)
                .validate()
                .is_err()
        );
        assert!(ArkConfig::default().with_max_step_ids(0).validate().is_err());
    }
}
