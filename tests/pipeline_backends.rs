use arkdb::model::id_set;
use arkdb::search::memory::SearchOp;
use arkdb::storage::memory::{Fault, StoreOp};
use arkdb::{
    ArkConfig, AuthorizationScope, CollectionKind, Document, DocumentStore, Expr, InsertSpec,
    MemorySearchIndex, MemoryStore, ParsedRequest, PipelineErrorKind, PipelineExecutor,
    PipelineWarning, SearchIndex, Step, StepResult, StoreTarget, Value,
};
use std::sync::Arc;
use std::time::Duration;

struct Harness {
    store: Arc<MemoryStore>,
    index: Arc<MemorySearchIndex>,
    exec: PipelineExecutor<MemoryStore, MemorySearchIndex>,
}

fn harness(config: ArkConfig) -> Harness {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
    let store = Arc::new(MemoryStore::new());
    let index = Arc::new(MemorySearchIndex::new());
    let exec = PipelineExecutor::standalone(Arc::clone(&store), Arc::clone(&index), config)
        .expect("executor");
    Harness { store, index, exec }
}

impl Harness {
    async fn unit(&self, id: &str, parents: &[&str], title: &str) -> StepResult {
        let spec = InsertSpec::new(Document::new().with("Title", title)).with_id(id);
        self.exec
            .execute(
                ParsedRequest::insert(CollectionKind::Units, spec)
                    .with_roots(parents.iter().copied()),
                AuthorizationScope::Unrestricted,
            )
            .await
            .expect("insert unit")
    }

    /// r -> a -> b -> c, all titled "Registre ...".
    async fn chain(&self) {
        self.unit("r", &[], "Registre general").await;
        self.unit("a", &["r"], "Registre des actes").await;
        self.unit("b", &["a"], "Registre annexe").await;
        self.unit("c", &["b"], "Registre tardif").await;
    }
}

fn full_text_below(root: &str, relative: i32) -> ParsedRequest {
    ParsedRequest::select(CollectionKind::Units)
        .with_roots([root])
        .step(Step::filter(Expr::matches("Title", "registre")).relative(relative))
}

#[tokio::test]
async fn full_text_steps_apply_the_distance_bound_after_search() {
    let h = harness(ArkConfig::default());
    h.chain().await;
    assert!(h.index.contains(CollectionKind::Units, &"c".into()));

    let within_two = h
        .exec
        .execute(full_text_below("r", 2), AuthorizationScope::Unrestricted)
        .await
        .expect("search");
    assert_eq!(within_two.ids(), &id_set(["a", "b"]));

    let children = h
        .exec
        .execute(full_text_below("a", 1), AuthorizationScope::Unrestricted)
        .await
        .expect("search");
    assert_eq!(children.ids(), &id_set(["b"]));
}

#[tokio::test]
async fn distance_bound_agrees_across_backends_for_dotted_ids() {
    let h = harness(ArkConfig::default());
    h.unit("fonds.1", &[], "Fonds").await;
    h.unit("c", &["fonds.1"], "Carton").await;
    h.unit("g", &["c"], "war diary").await;
    let below_fonds = |expr: Expr| {
        ParsedRequest::select(CollectionKind::Units)
            .with_roots(["fonds.1"])
            .step(Step::filter(expr).relative(2))
    };

    let stored = h
        .exec
        .execute(
            below_fonds(Expr::eq("Title", "war diary")),
            AuthorizationScope::Unrestricted,
        )
        .await
        .expect("primary store");
    assert_eq!(stored.ids(), &id_set(["g"]));

    let searched = h
        .exec
        .execute(
            below_fonds(Expr::matches("Title", "war")),
            AuthorizationScope::Unrestricted,
        )
        .await
        .expect("search index");
    assert_eq!(searched.ids(), stored.ids());
}

#[tokio::test]
async fn full_text_on_object_groups_stays_on_the_primary_store() {
    let h = harness(ArkConfig::default());
    h.unit("r", &[], "Fonds").await;
    let spec = InsertSpec::new(Document::new().with("Usage", "Master copy")).with_id("g");
    h.exec
        .execute(
            ParsedRequest::insert(CollectionKind::ObjectGroups, spec).with_roots(["r"]),
            AuthorizationScope::Unrestricted,
        )
        .await
        .expect("object group");
    assert!(!h.index.contains(CollectionKind::ObjectGroups, &"g".into()));
    h.index.inject_failure(SearchOp::Search, Fault::Unavailable);

    let found = h
        .exec
        .execute(
            ParsedRequest::select(CollectionKind::ObjectGroups)
                .step(Step::filter(Expr::matches("Usage", "master"))),
            AuthorizationScope::Unrestricted,
        )
        .await
        .expect("store evaluates full text");
    assert_eq!(found.ids(), &id_set(["g"]));
}

#[tokio::test]
async fn delete_evicts_cache_and_search_entries() {
    let h = harness(ArkConfig::default());
    h.chain().await;
    assert!(h.exec.cache().get(&"c".into()).is_some());

    let deleted = h
        .exec
        .execute(
            ParsedRequest::delete(CollectionKind::Units).with_roots(["c"]),
            AuthorizationScope::Unrestricted,
        )
        .await
        .expect("delete");
    assert_eq!(deleted.count(), 1);
    assert!(h.exec.cache().get(&"c".into()).is_none());
    assert!(!h.index.contains(CollectionKind::Units, &"c".into()));
    assert!(!h
        .store
        .exists(CollectionKind::Units, &"c".into())
        .await
        .expect("exists"));

    let remaining = h
        .exec
        .execute(full_text_below("r", 5), AuthorizationScope::Unrestricted)
        .await
        .expect("search");
    assert_eq!(remaining.ids(), &id_set(["a", "b"]));
}

#[tokio::test]
async fn delete_survives_a_search_index_outage() {
    let h = harness(ArkConfig::default());
    h.chain().await;
    h.index.inject_failure(SearchOp::Remove, Fault::Timeout);

    let deleted = h
        .exec
        .execute(
            ParsedRequest::delete(CollectionKind::Units).with_roots(["c"]),
            AuthorizationScope::Unrestricted,
        )
        .await
        .expect("primary delete wins");
    assert_eq!(deleted.ids(), &id_set(["c"]));
    assert!(h.index.contains(CollectionKind::Units, &"c".into()));
}

#[tokio::test]
async fn deferred_indexing_queues_and_reconciles() {
    let h = harness(ArkConfig::default());
    h.unit("r", &[], "Fonds").await;
    h.index.inject_failure(SearchOp::Index, Fault::Unavailable);

    let inserted = h.unit("a", &["r"], "Dossier").await;
    assert_eq!(
        inserted.warnings(),
        &[PipelineWarning::IndexDeferred { id: "a".into() }]
    );
    assert_eq!(h.exec.pending_reindex(), id_set(["a"]));

    let report = h.exec.reconcile_search_index().await.expect("reconcile");
    assert_eq!(report.reindexed, 0);
    assert_eq!(report.pending, 1);

    h.index.clear_failure(SearchOp::Index);
    let report = h.exec.reconcile_search_index().await.expect("reconcile");
    assert_eq!(report.reindexed, 1);
    assert_eq!(report.pending, 0);
    let source = h
        .index
        .search(
            CollectionKind::Units,
            &serde_json::json!({ "ids": { "values": ["a"] } }),
            10,
        )
        .await
        .expect("search");
    assert_eq!(source.len(), 1);
    assert_eq!(source[0].source.get("_us"), Some(&Value::List(vec!["r".into()])));
}

#[tokio::test]
async fn reconcile_drops_units_deleted_meanwhile() {
    let h = harness(ArkConfig::default());
    h.index.inject_failure(SearchOp::Index, Fault::Unavailable);
    h.unit("r", &[], "Fonds").await;
    h.index.clear_failure(SearchOp::Index);

    h.exec
        .execute(
            ParsedRequest::delete(CollectionKind::Units).with_roots(["r"]),
            AuthorizationScope::Unrestricted,
        )
        .await
        .expect("delete");
    assert!(h.exec.pending_reindex().is_empty());
    let report = h.exec.reconcile_search_index().await.expect("reconcile");
    assert_eq!(report.reindexed, 0);
    assert_eq!(report.pending, 0);
}

#[tokio::test]
async fn strict_indexing_fails_but_keeps_the_unit() {
    let h = harness(ArkConfig::strict_indexing());
    h.unit("r", &[], "Fonds").await;
    h.index.inject_failure(SearchOp::Index, Fault::Timeout);

    let spec = InsertSpec::new(Document::new().with("Title", "Dossier")).with_id("a");
    let err = h
        .exec
        .execute(
            ParsedRequest::insert(CollectionKind::Units, spec).with_roots(["r"]),
            AuthorizationScope::Unrestricted,
        )
        .await
        .expect_err("strict indexing");
    assert_eq!(err.kind, PipelineErrorKind::ExecutionFailure);
    assert_eq!(err.target, Some(StoreTarget::SearchIndex));
    assert!(h
        .store
        .exists(CollectionKind::Units, &"a".into())
        .await
        .expect("exists"));
    assert_eq!(h.exec.pending_reindex(), id_set(["a"]));
}

#[tokio::test]
async fn store_faults_carry_rank_and_target() {
    let h = harness(ArkConfig::default());
    h.chain().await;

    h.store.inject_failure(StoreOp::Find, Fault::Timeout);
    let err = h
        .exec
        .execute(
            ParsedRequest::select(CollectionKind::Units)
                .with_roots(["r"])
                .step(Step::any().relative(1)),
            AuthorizationScope::Unrestricted,
        )
        .await
        .expect_err("find timeout");
    assert_eq!(err.kind, PipelineErrorKind::ExecutionFailure);
    assert_eq!(err.rank, 1);
    assert_eq!(err.target, Some(StoreTarget::PrimaryStore));
    assert_eq!(err.previous.as_deref(), Some("1 unit id(s): [r]"));
    h.store.clear_failure(StoreOp::Find);

    h.index.inject_failure(SearchOp::Search, Fault::Unavailable);
    let err = h
        .exec
        .execute(full_text_below("r", 2), AuthorizationScope::Unrestricted)
        .await
        .expect_err("search outage");
    assert_eq!(err.kind, PipelineErrorKind::ExecutionFailure);
    assert_eq!(err.target, Some(StoreTarget::SearchIndex));
    assert!(err.to_string().contains("search_index"));
}

#[tokio::test]
async fn failed_attach_leaves_the_inserted_unit_in_place() {
    let h = harness(ArkConfig::default());
    h.unit("r", &[], "Fonds").await;
    h.store.inject_failure(StoreOp::Attach, Fault::Unavailable);

    let spec = InsertSpec::new(Document::new().with("Title", "Dossier")).with_id("a");
    let err = h
        .exec
        .execute(
            ParsedRequest::insert(CollectionKind::Units, spec).with_roots(["r"]),
            AuthorizationScope::Unrestricted,
        )
        .await
        .expect_err("attach outage");
    assert_eq!(err.kind, PipelineErrorKind::ExecutionFailure);
    assert_eq!(err.target, Some(StoreTarget::PrimaryStore));
    assert!(h
        .store
        .exists(CollectionKind::Units, &"a".into())
        .await
        .expect("exists"));
}

#[tokio::test]
async fn oversized_steps_are_rejected() {
    let h = harness(ArkConfig::default().with_max_step_ids(2));
    h.unit("r", &[], "Fonds").await;
    for id in ["a", "b", "c"] {
        h.unit(id, &["r"], "Dossier").await;
    }
    let err = h
        .exec
        .execute(
            ParsedRequest::select(CollectionKind::Units)
                .with_roots(["r"])
                .step(Step::any().relative(1)),
            AuthorizationScope::Unrestricted,
        )
        .await
        .expect_err("three children");
    assert_eq!(err.kind, PipelineErrorKind::ResultLimitExceeded);
    assert_eq!(err.rank, 1);
}

#[tokio::test]
async fn execution_within_deadline_succeeds() {
    let h = harness(ArkConfig::development());
    h.chain().await;
    let result = h
        .exec
        .execute_with_timeout(
            full_text_below("r", 3),
            AuthorizationScope::Unrestricted,
            Duration::from_secs(5),
        )
        .await
        .expect("within deadline");
    assert_eq!(result.ids(), &id_set(["a", "b", "c"]));
}

#[tokio::test]
async fn object_group_scope_is_bounded_by_groups_not_units() {
    let h = harness(ArkConfig::default().with_max_step_ids(2));
    h.unit("r", &[], "Fonds").await;
    for id in ["a", "b", "c"] {
        h.unit(id, &["r"], "Dossier").await;
    }
    let attach_group = |id: &'static str, parent: &'static str| {
        let spec = InsertSpec::new(Document::new().with("Usage", "master")).with_id(id);
        ParsedRequest::insert(CollectionKind::ObjectGroups, spec).with_roots([parent])
    };
    h.exec
        .execute(attach_group("g", "c"), AuthorizationScope::Unrestricted)
        .await
        .expect("object group");

    let groups = || ParsedRequest::select(CollectionKind::ObjectGroups).step(Step::any());
    let found = h
        .exec
        .execute(groups(), AuthorizationScope::within(["r"]))
        .await
        .expect("g hangs inside the scope");
    assert_eq!(found.ids(), &id_set(["g"]));

    for (id, parent) in [("g2", "a"), ("g3", "b")] {
        h.exec
            .execute(attach_group(id, parent), AuthorizationScope::Unrestricted)
            .await
            .expect("object group");
    }
    let err = h
        .exec
        .execute(groups(), AuthorizationScope::within(["r"]))
        .await
        .expect_err("three groups in scope");
    assert_eq!(err.kind, PipelineErrorKind::ResultLimitExceeded);
    assert_eq!(err.rank, 0);
}

#[tokio::test]
async fn deadline_reports_the_rank_that_was_running() {
    let h = harness(ArkConfig::default());
    h.chain().await;
    h.index.set_search_latency(Some(Duration::from_secs(5)));

    let err = h
        .exec
        .execute_with_timeout(
            ParsedRequest::select(CollectionKind::Units)
                .with_roots(["r"])
                .step(Step::any().relative(1))
                .step(Step::filter(Expr::matches("Title", "registre")).relative(2)),
            AuthorizationScope::Unrestricted,
            Duration::from_millis(50),
        )
        .await
        .expect_err("search stalls past the deadline");
    assert_eq!(err.kind, PipelineErrorKind::ExecutionFailure);
    assert_eq!(err.rank, 2);
    assert_eq!(err.target, None);
    assert!(err.to_string().contains("timed out"));
}
