use crate::cache::RecencyCache;
use crate::config::{ArkConfig, IndexConsistency};
use crate::error::{ArkError, StoreTarget};
use crate::model::{CollectionKind, GraphNode, ID_FIELD, IdSet, NodeId, Unit, id_set};
use crate::query::collection::{NodeCollection, ObjectGroupCollection, UnitCollection};
use crate::query::depth::{Constraint, StepPlan};
use crate::query::error::{PipelineError, PipelineErrorKind};
use crate::query::operators::eval_expr;
use crate::query::plan::{Action, Expr, InsertSpec, ParsedRequest, SelectSpec, Step, UpdateAction};
use crate::query::result::{PipelineWarning, StepResult};
use crate::query::translate::{DocumentTranslator, QueryTranslator, SearchTranslator};
use crate::search::SearchIndex;
use crate::storage::{DocumentStore, FindOptions};
use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Part of the graph a caller may traverse. An empty id set is unrestricted.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum AuthorizationScope {
    #[default]
    Unrestricted,
    Within(IdSet),
}

impl AuthorizationScope {
    pub fn within<I, T>(ids: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<NodeId>,
    {
        let ids = id_set(ids);
        if ids.is_empty() {
            AuthorizationScope::Unrestricted
        } else {
            AuthorizationScope::Within(ids)
        }
    }

    pub fn restricted_ids(&self) -> Option<&IdSet> {
        match self {
            AuthorizationScope::Within(ids) if !ids.is_empty() => Some(ids),
            _ => None,
        }
    }
}

/// Outcome of a search index reconciliation pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    pub reindexed: usize,
    /// Pending ids whose unit no longer exists.
    pub dropped: usize,
    pub pending: usize,
}

fn primary(rank: usize) -> impl Fn(ArkError) -> PipelineError {
    move |err| PipelineError::from_store(rank, StoreTarget::PrimaryStore, err)
}

/// Runs parsed multi-step requests against the primary store and the search
/// index.
pub struct PipelineExecutor<S, I> {
    store: Arc<S>,
    index: Arc<I>,
    cache: Arc<RecencyCache>,
    config: ArkConfig,
    /// Units durable in the primary store whose index write failed.
    reindex_backlog: Mutex<IdSet>,
}

impl<S: DocumentStore, I: SearchIndex> PipelineExecutor<S, I> {
    pub fn new(
        store: Arc<S>,
        index: Arc<I>,
        cache: Arc<RecencyCache>,
        config: ArkConfig,
    ) -> Result<Self, ArkError> {
        config.validate()?;
        Ok(Self {
            store,
            index,
            cache,
            config,
            reindex_backlog: Mutex::new(IdSet::new()),
        })
    }

    /// Executor with a private recency cache sized from `config`.
    pub fn standalone(store: Arc<S>, index: Arc<I>, config: ArkConfig) -> Result<Self, ArkError> {
        let cache = Arc::new(RecencyCache::new(config.recency_cache_capacity));
        Self::new(store, index, cache, config)
    }

    pub fn config(&self) -> &ArkConfig {
        &self.config
    }

    pub fn cache(&self) -> &Arc<RecencyCache> {
        &self.cache
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    pub fn index(&self) -> &Arc<I> {
        &self.index
    }

    /// Units waiting to be re-indexed.
    pub fn pending_reindex(&self) -> IdSet {
        self.reindex_backlog.lock().clone()
    }

    pub async fn execute(
        &self,
        request: ParsedRequest,
        scope: AuthorizationScope,
    ) -> Result<StepResult, PipelineError> {
        self.execute_tracked(request, scope, &AtomicUsize::new(0)).await
    }

    /// [`execute`](Self::execute) bounded by `timeout`. Side effects already
    /// applied when the deadline fires are kept. The resulting
    /// `ExecutionFailure` carries the rank that was running; it has no target
    /// because no backend reported a fault.
    pub async fn execute_with_timeout(
        &self,
        request: ParsedRequest,
        scope: AuthorizationScope,
        timeout: Duration,
    ) -> Result<StepResult, PipelineError> {
        let progress = AtomicUsize::new(0);
        let outcome =
            tokio::time::timeout(timeout, self.execute_tracked(request, scope, &progress)).await;
        outcome.unwrap_or_else(|_| {
            let rank = progress.load(Ordering::Relaxed);
            warn!(rank, ?timeout, "pipeline deadline elapsed");
            Err(PipelineError::new(
                PipelineErrorKind::ExecutionFailure,
                rank,
                format!("pipeline timed out after {timeout:?}"),
            ))
        })
    }

    /// `progress` holds the rank being executed.
    async fn execute_tracked(
        &self,
        request: ParsedRequest,
        scope: AuthorizationScope,
        progress: &AtomicUsize,
    ) -> Result<StepResult, PipelineError> {
        let collection = request.collection;
        let action = request.action.name();
        let steps = request.steps.len();
        let outcome = match collection {
            CollectionKind::Units => self.run::<UnitCollection>(request, &scope, progress).await,
            CollectionKind::ObjectGroups => {
                self.run::<ObjectGroupCollection>(request, &scope, progress).await
            }
        };
        match &outcome {
            Ok(result) if self.config.trace_requests => info!(
                collection = %collection,
                action,
                steps,
                count = result.count(),
                warnings = result.warnings().len(),
                "pipeline completed"
            ),
            Ok(_) => {}
            Err(err) if err.kind == PipelineErrorKind::ExecutionFailure => error!(
                collection = %collection,
                action,
                rank = err.rank,
                backend = ?err.target,
                error = %err,
                "pipeline aborted"
            ),
            Err(err) => debug!(
                collection = %collection,
                action,
                rank = err.rank,
                kind = err.kind.as_str(),
                "pipeline stopped"
            ),
        }
        outcome
    }

    async fn run<C: NodeCollection>(
        &self,
        request: ParsedRequest,
        scope: &AuthorizationScope,
        progress: &AtomicUsize,
    ) -> Result<StepResult, PipelineError> {
        request
            .validate(self.config.max_expr_depth, self.config.max_depth)
            .map_err(|err| PipelineError::invalid_shape(0, err.to_string()))?;
        let ParsedRequest {
            roots,
            steps,
            action,
            ..
        } = request;

        let declared = roots.len();
        let mut current = self.resolve_roots::<C>(roots, scope).await?;
        // An insert may start from nothing, but never from roots that were
        // declared and then filtered out.
        let anchored = declared > 0 || scope.restricted_ids().is_some();
        if current.is_empty() && anchored && (declared > 0 || !action.is_insert()) {
            return Err(PipelineError::no_result(
                0,
                None,
                format!("none of {declared} declared root(s) within the authorization scope"),
            ));
        }

        let total = steps.len();
        for (index, step) in steps.iter().enumerate() {
            let rank = index + 1;
            progress.store(rank, Ordering::Relaxed);
            let allow_empty = rank == total && action.is_insert();
            current = self
                .run_step::<C>(rank, step, current, index == 0, allow_empty)
                .await?;
        }
        self.finalize::<C>(action, current, total).await
    }

    async fn resolve_roots<C: NodeCollection>(
        &self,
        roots: IdSet,
        scope: &AuthorizationScope,
    ) -> Result<StepResult, PipelineError> {
        let declared = roots.len();
        let Some(scope_ids) = scope.restricted_ids() else {
            return Ok(if roots.is_empty() {
                StepResult::empty(C::KIND)
            } else {
                StepResult::from_ids(CollectionKind::Units, roots)
            });
        };
        if roots.is_empty() {
            let limit = self.config.max_step_ids;
            let result = C::scope_roots(&*self.store, scope_ids, limit.saturating_add(1))
                .await
                .map_err(primary(0))?;
            if result.len() > limit {
                return Err(PipelineError::new(
                    PipelineErrorKind::ResultLimitExceeded,
                    0,
                    format!("authorization scope resolves to more than {limit} {}", C::KIND),
                ));
            }
            return Ok(result);
        }

        let candidates = self
            .store
            .find_nodes(CollectionKind::Units, &Expr::ids_in(ID_FIELD, &roots), declared)
            .await
            .map_err(primary(0))?;
        let resolved: IdSet = candidates
            .iter()
            .filter_map(GraphNode::as_unit)
            .filter(|unit| unit.is_within(scope_ids))
            .map(|unit| unit.id.clone())
            .collect();
        let mut result = StepResult::from_ids(CollectionKind::Units, resolved);
        if result.len() < declared {
            warn!(
                declared,
                resolved = result.len(),
                "declared roots narrowed by authorization scope"
            );
            result.push_warning(PipelineWarning::RootsNarrowed {
                declared,
                resolved: result.len(),
            });
        }
        Ok(result)
    }

    /// Executes one step. `prev` is consumed whatever the outcome.
    async fn run_step<C: NodeCollection>(
        &self,
        rank: usize,
        step: &Step,
        prev: StepResult,
        first_step: bool,
        allow_empty: bool,
    ) -> Result<StepResult, PipelineError> {
        let previous = prev.describe(self.config.describe_id_limit);
        let limit = self.config.max_step_ids;
        let with_context = |err: PipelineError| err.with_step(step).with_previous(previous.clone());

        let ids = match step {
            Step::Path(path) if prev.is_empty() => path.clone(),
            Step::Path(path) => C::filter_path(&*self.store, path, &prev, limit.saturating_add(1))
                .await
                .map_err(primary(rank))
                .map_err(with_context)?,
            Step::Filter { expr, depth } => {
                let constraint = match C::plan_step(*depth, &prev, first_step) {
                    StepPlan::Match(constraint) => constraint,
                    StepPlan::Ascending { from, distance } => {
                        let ancestors = self
                            .store
                            .aggregate_ancestors(&from, distance)
                            .await
                            .map_err(primary(rank))
                            .map_err(with_context)?;
                        debug!(rank, distance, ancestors = ancestors.len(), "aggregated ancestors");
                        Constraint::IdIn(ancestors)
                    }
                };
                self.dispatch::<C>(rank, expr.as_ref(), &constraint)
                    .await
                    .map_err(with_context)?
            }
        };

        if ids.len() > limit {
            return Err(with_context(PipelineError::new(
                PipelineErrorKind::ResultLimitExceeded,
                rank,
                format!("step yielded more than {limit} ids"),
            )));
        }
        if ids.is_empty() && !allow_empty {
            return Err(PipelineError::no_result(rank, Some(step.to_string()), previous));
        }
        debug!(rank, ids = ids.len(), "step completed");
        let (_, _, warnings) = prev.into_parts();
        Ok(StepResult::from_ids(C::KIND, ids).carry_warnings(warnings))
    }

    /// Sends the step to the search index when it needs full-text matching on
    /// an indexed kind, otherwise to the primary store.
    async fn dispatch<C: NodeCollection>(
        &self,
        rank: usize,
        expr: Option<&Expr>,
        constraint: &Constraint,
    ) -> Result<IdSet, PipelineError> {
        let limit = self.config.max_step_ids.saturating_add(1);
        let full_text = expr.is_some_and(Expr::is_full_text) && C::indexed_for_search();
        if full_text {
            let translation = SearchTranslator
                .translate(expr, constraint)
                .map_err(|message| PipelineError::invalid_shape(rank, message))?;
            debug!(
                rank,
                backend = %SearchTranslator::TARGET,
                query = %translation.native,
                post_filter = translation.post_filter.is_some(),
                "dispatching step"
            );
            let hits = self
                .index
                .search(C::KIND, &translation.native, limit)
                .await
                .map_err(|err| PipelineError::from_store(rank, SearchTranslator::TARGET, err))?;
            if hits.len() > self.config.max_step_ids {
                return Err(PipelineError::new(
                    PipelineErrorKind::ResultLimitExceeded,
                    rank,
                    format!("search matched more than {} ids", self.config.max_step_ids),
                ));
            }
            return Ok(hits
                .into_iter()
                .filter(|hit| {
                    translation
                        .post_filter
                        .as_ref()
                        .is_none_or(|filter| eval_expr(filter, &hit.source))
                })
                .map(|hit| hit.id)
                .collect());
        }

        let translation = DocumentTranslator
            .translate(expr, constraint)
            .map_err(|message| PipelineError::invalid_shape(rank, message))?;
        debug!(
            rank,
            backend = %DocumentTranslator::TARGET,
            query = %translation.native,
            "dispatching step"
        );
        match &translation.post_filter {
            None => self
                .store
                .find_ids(C::KIND, &translation.native, limit)
                .await
                .map_err(primary(rank)),
            Some(filter) => Ok(self
                .store
                .find_nodes(C::KIND, &translation.native, limit)
                .await
                .map_err(primary(rank))?
                .into_iter()
                .filter(|node| eval_expr(filter, node))
                .map(|node| node.id().clone())
                .collect()),
        }
    }

    async fn finalize<C: NodeCollection>(
        &self,
        action: Action,
        incoming: StepResult,
        rank: usize,
    ) -> Result<StepResult, PipelineError> {
        let name = action.name();
        match action {
            Action::Insert(spec) => self.insert::<C>(spec, incoming, rank).await,
            Action::Select(spec) => {
                let (ids, warnings) = self.finalization_input::<C>(name, incoming, rank)?;
                let result = self.select::<C>(spec, &ids, rank).await?;
                Ok(result.carry_warnings(warnings))
            }
            Action::Update(actions) => {
                let (ids, warnings) = self.finalization_input::<C>(name, incoming, rank)?;
                let result = self.update::<C>(&actions, ids, rank).await?;
                Ok(result.carry_warnings(warnings))
            }
            Action::Delete => {
                let (ids, warnings) = self.finalization_input::<C>(name, incoming, rank)?;
                let result = self.delete::<C>(&ids, rank).await?;
                Ok(result.carry_warnings(warnings))
            }
        }
    }

    /// Ids a select, update or delete applies to: non-empty and of kind `C`.
    fn finalization_input<C: NodeCollection>(
        &self,
        action: &str,
        incoming: StepResult,
        rank: usize,
    ) -> Result<(IdSet, Vec<PipelineWarning>), PipelineError> {
        let previous = incoming.describe(self.config.describe_id_limit);
        let stage = format!("{action} finalization");
        if incoming.is_empty() {
            return Err(PipelineError::no_result(rank, Some(stage), previous));
        }
        if incoming.kind() != C::KIND {
            return Err(PipelineError::invalid_shape(
                rank,
                format!("{action} over {} needs {} ids", C::KIND, C::KIND),
            )
            .with_step(stage)
            .with_previous(previous));
        }
        let (_, ids, warnings) = incoming.into_parts();
        Ok((ids, warnings))
    }

    async fn select<C: NodeCollection>(
        &self,
        spec: SelectSpec,
        ids: &IdSet,
        rank: usize,
    ) -> Result<StepResult, PipelineError> {
        let SelectSpec {
            projection,
            order_by,
            offset,
            limit,
        } = spec;
        let options = FindOptions {
            projection,
            order_by,
            offset,
            limit,
        };
        let rows = self
            .store
            .fetch_documents(C::KIND, ids, &options)
            .await
            .map_err(primary(rank))?;
        Ok(StepResult::with_documents(C::KIND, rows))
    }

    async fn update<C: NodeCollection>(
        &self,
        actions: &[UpdateAction],
        ids: IdSet,
        rank: usize,
    ) -> Result<StepResult, PipelineError> {
        let modified = self
            .store
            .update_many(C::KIND, &ids, actions)
            .await
            .map_err(primary(rank))?;
        debug!(matched = ids.len(), modified, "update applied");
        Ok(StepResult::from_ids(C::KIND, ids).with_count(modified))
    }

    async fn delete<C: NodeCollection>(
        &self,
        ids: &IdSet,
        rank: usize,
    ) -> Result<StepResult, PipelineError> {
        let deleted = self
            .store
            .delete_many(C::KIND, ids)
            .await
            .map_err(primary(rank))?;
        for id in &deleted {
            self.cache.evict(id);
        }
        if C::indexed_for_search() && !deleted.is_empty() {
            self.reindex_backlog
                .lock()
                .retain(|id| !deleted.contains(id));
            if let Err(err) = self.index.remove(C::KIND, &deleted).await {
                warn!(
                    deleted = deleted.len(),
                    error = %err,
                    "deleted units could not be removed from the search index"
                );
            }
        }
        Ok(StepResult::from_ids(C::KIND, deleted))
    }

    /// Parent lookup for insert: recency cache first, primary store on a miss.
    async fn resolve_parent(&self, rank: usize, id: &NodeId) -> Result<Arc<Unit>, PipelineError> {
        if let Some(unit) = self.cache.get(id) {
            return Ok(unit);
        }
        match self
            .store
            .get(CollectionKind::Units, id)
            .await
            .map_err(primary(rank))?
        {
            Some(GraphNode::Unit(unit)) => Ok(self.cache.put(unit)),
            _ => Err(PipelineError::new(
                PipelineErrorKind::ParentNotFound,
                rank,
                format!("parent unit '{id}' not found"),
            )),
        }
    }

    async fn insert<C: NodeCollection>(
        &self,
        spec: InsertSpec,
        incoming: StepResult,
        rank: usize,
    ) -> Result<StepResult, PipelineError> {
        let previous = incoming.describe(self.config.describe_id_limit);
        if !incoming.is_empty() && incoming.kind() != CollectionKind::Units {
            return Err(PipelineError::invalid_shape(
                rank,
                format!("insert parents must be units, not {}", incoming.kind()),
            )
            .with_previous(previous));
        }
        let InsertSpec {
            id,
            parent_ids,
            content,
        } = spec;
        let id = id.unwrap_or_else(NodeId::generate);

        let taken = self
            .store
            .exists(C::KIND, &id)
            .await
            .map_err(primary(rank))?;
        if taken {
            return Err(PipelineError::new(
                PipelineErrorKind::AlreadyExists,
                rank,
                format!("{} '{id}' already exists", C::KIND),
            )
            .with_previous(previous));
        }

        let (_, mut parents, warnings) = incoming.into_parts();
        parents.extend(parent_ids);
        if parents.is_empty() && C::requires_parent() {
            return Err(PipelineError::new(
                PipelineErrorKind::ParentNotFound,
                rank,
                format!("{} '{id}' must attach to at least one unit", C::KIND),
            ));
        }
        for parent in &parents {
            self.resolve_parent(rank, parent)
                .await
                .map_err(|err| err.with_previous(previous.clone()))?;
        }

        self.store
            .insert(C::build(id.clone(), content))
            .await
            .map_err(primary(rank))?;
        for parent in &parents {
            if let Err(err) = C::attach(&*self.store, parent, &id).await {
                warn!(id = %id, parent = %parent, error = %err, "attach failed after insert");
                return Err(PipelineError {
                    target: Some(StoreTarget::PrimaryStore),
                    ..PipelineError::new(
                        PipelineErrorKind::ExecutionFailure,
                        rank,
                        format!("'{id}' persisted but not attached under '{parent}': {err}"),
                    )
                });
            }
        }

        let stored = self
            .store
            .get(C::KIND, &id)
            .await
            .map_err(primary(rank))?
            .ok_or_else(|| {
                PipelineError::new(
                    PipelineErrorKind::ExecutionFailure,
                    rank,
                    format!("'{id}' missing right after insert"),
                )
            })?;
        let document = stored.materialize();
        let mut result = StepResult::with_documents(C::KIND, vec![(id.clone(), document.clone())])
            .carry_warnings(warnings);
        if let GraphNode::Unit(unit) = stored {
            self.cache.put(unit);
        }

        if C::indexed_for_search()
            && let Err(err) = self.index.index(C::KIND, &id, document).await
        {
            self.reindex_backlog.lock().insert(id.clone());
            match self.config.index_consistency {
                IndexConsistency::Deferred => {
                    warn!(id = %id, error = %err, "search indexing deferred");
                    result.push_warning(PipelineWarning::IndexDeferred { id });
                }
                IndexConsistency::Strict => {
                    return Err(PipelineError {
                        target: Some(StoreTarget::SearchIndex),
                        ..PipelineError::new(
                            PipelineErrorKind::ExecutionFailure,
                            rank,
                            format!("'{id}' persisted but not indexed: {err}"),
                        )
                    });
                }
            }
        }
        Ok(result)
    }

    /// Re-indexes every pending Unit from its primary-store state. Units that
    /// still fail stay pending; a primary store failure stops the pass.
    pub async fn reconcile_search_index(&self) -> Result<ReconcileReport, ArkError> {
        let pending: Vec<NodeId> = self.reindex_backlog.lock().iter().cloned().collect();
        let mut report = ReconcileReport::default();
        for id in pending {
            let Some(node) = self.store.get(CollectionKind::Units, &id).await? else {
                self.reindex_backlog.lock().remove(&id);
                report.dropped += 1;
                continue;
            };
            match self
                .index
                .index(CollectionKind::Units, &id, node.materialize())
                .await
            {
                Ok(()) => {
                    self.reindex_backlog.lock().remove(&id);
                    report.reindexed += 1;
                }
                Err(err) => warn!(id = %id, error = %err, "re-index still failing"),
            }
        }
        report.pending = self.reindex_backlog.lock().len();
        if report.reindexed > 0 || report.dropped > 0 {
            info!(
                reindexed = report.reindexed,
                dropped = report.dropped,
                pending = report.pending,
                "search index reconciled"
            );
        }
        Ok(report)
    }
}
