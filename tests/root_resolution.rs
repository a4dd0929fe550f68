use arkdb::{
    ArkConfig, AuthorizationScope, CollectionKind, Document, DocumentStore, IdSet,
    MemorySearchIndex, MemoryStore, NodeId, ParsedRequest, PipelineErrorKind, PipelineExecutor,
    Unit,
};
use proptest::prelude::*;
use std::collections::BTreeSet;
use std::sync::Arc;

fn unit_id(i: usize) -> NodeId {
    NodeId::from(format!("u{i}"))
}

fn picked(mask: u16, n: usize) -> BTreeSet<usize> {
    (0..n).filter(|i| mask & (1 << i) != 0).collect()
}

/// Indices reachable upwards from `node`, itself included.
fn lineage(node: usize, parents: &[Vec<usize>]) -> BTreeSet<usize> {
    let mut seen = BTreeSet::new();
    let mut stack = vec![node];
    while let Some(current) = stack.pop() {
        if seen.insert(current) {
            stack.extend(parents[current].iter().copied());
        }
    }
    seen
}

async fn load(parents: &[Vec<usize>]) -> Arc<MemoryStore> {
    let store = Arc::new(MemoryStore::new());
    for (child, links) in parents.iter().enumerate() {
        store
            .insert(Unit::new(unit_id(child), Document::new()).into())
            .await
            .expect("insert");
        for parent in links {
            store
                .attach_unit(&unit_id(*parent), &unit_id(child))
                .await
                .expect("attach");
        }
    }
    store
}

fn dag() -> impl Strategy<Value = Vec<Vec<usize>>> {
    prop::collection::vec((any::<u8>(), any::<u8>(), any::<bool>()), 1..10).prop_map(|seeds| {
        seeds
            .iter()
            .enumerate()
            .map(|(i, (first, second, two))| {
                if i == 0 {
                    return Vec::new();
                }
                let mut links = vec![*first as usize % i];
                if *two {
                    links.push(*second as usize % i);
                }
                links.sort_unstable();
                links.dedup();
                links
            })
            .collect()
    })
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn declared_roots_are_kept_iff_within_scope(
        parents in dag(),
        scope_mask in any::<u16>(),
        root_mask in 1u16..,
    ) {
        let n = parents.len();
        let scope = picked(scope_mask, n);
        let mut declared = picked(root_mask, n);
        if declared.is_empty() {
            declared.insert(0);
        }
        let expected: IdSet = declared
            .iter()
            .filter(|i| scope.is_empty() || !lineage(**i, &parents).is_disjoint(&scope))
            .map(|i| unit_id(*i))
            .collect();

        let runtime = tokio::runtime::Builder::new_current_thread()
            .build()
            .expect("runtime");
        let outcome = runtime.block_on(async {
            let store = load(&parents).await;
            let exec = PipelineExecutor::standalone(
                store,
                Arc::new(MemorySearchIndex::new()),
                ArkConfig::default(),
            )
            .expect("executor");
            exec.execute(
                ParsedRequest::select(CollectionKind::Units)
                    .with_roots(declared.iter().map(|i| unit_id(*i))),
                AuthorizationScope::within(scope.iter().map(|i| unit_id(*i))),
            )
            .await
        });

        match outcome {
            Ok(result) => prop_assert_eq!(result.ids(), &expected),
            Err(err) => {
                prop_assert!(expected.is_empty());
                prop_assert_eq!(err.kind, PipelineErrorKind::NoResultAtRank);
                prop_assert_eq!(err.rank, 0);
            }
        }
    }
}
