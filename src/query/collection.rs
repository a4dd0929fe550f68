use crate::error::ArkError;
use crate::model::{
    ANCESTORS_FIELD, CollectionKind, Document, GraphNode, ID_FIELD, IdSet, NodeId, ObjectGroup,
    PARENTS_FIELD, Unit,
};
use crate::query::depth::{StepPlan, plan_object_group_step, plan_unit_step};
use crate::query::plan::{DepthSpec, Expr};
use crate::query::result::StepResult;
use crate::storage::DocumentStore;
use std::collections::BTreeMap;
use std::future::Future;

/// Traversal contract shared by the two node kinds. The pipeline is
/// monomorphised over one implementation when a request enters.
pub trait NodeCollection: Send + Sync + 'static {
    const KIND: CollectionKind;

    fn has_depth_metadata() -> bool;

    /// Whether full-text predicates on this kind run against the search index.
    fn indexed_for_search() -> bool;

    /// Whether an inserted node must attach to at least one parent Unit.
    fn requires_parent() -> bool;

    fn plan_step(depth: DepthSpec, prev: &StepResult, first_step: bool) -> StepPlan;

    /// Ids of nodes of this kind directly attached under `parents`.
    fn resolve_children<S: DocumentStore>(
        store: &S,
        parents: &IdSet,
        limit: usize,
    ) -> impl Future<Output = Result<IdSet, ArkError>> + Send;

    /// Direct parents of each node of `ids` that exists.
    fn resolve_parents<S: DocumentStore>(
        store: &S,
        ids: &IdSet,
    ) -> impl Future<Output = Result<BTreeMap<NodeId, IdSet>, ArkError>> + Send;

    /// Working set for a restricted scope when no roots were declared; at
    /// most `limit` ids come back.
    fn scope_roots<S: DocumentStore>(
        store: &S,
        scope: &IdSet,
        limit: usize,
    ) -> impl Future<Output = Result<StepResult, ArkError>> + Send;

    /// Keeps the path ids that equal or hang below the previous result.
    fn filter_path<S: DocumentStore>(
        store: &S,
        path: &IdSet,
        prev: &StepResult,
        limit: usize,
    ) -> impl Future<Output = Result<IdSet, ArkError>> + Send;

    fn build(id: NodeId, content: Document) -> GraphNode;

    fn attach<S: DocumentStore>(
        store: &S,
        parent: &NodeId,
        child: &NodeId,
    ) -> impl Future<Output = Result<(), ArkError>> + Send;
}

async fn parent_map<S: DocumentStore>(
    store: &S,
    kind: CollectionKind,
    ids: &IdSet,
) -> Result<BTreeMap<NodeId, IdSet>, ArkError> {
    let nodes = store
        .find_nodes(kind, &Expr::ids_in(ID_FIELD, ids), ids.len())
        .await?;
    Ok(nodes
        .into_iter()
        .map(|node| (node.id().clone(), node.parent_ids().clone()))
        .collect())
}

/// `ids` plus every Unit below them. Never truncated: it only feeds lookups
/// whose own output is bounded by the caller.
async fn unit_closure<S: DocumentStore>(store: &S, ids: &IdSet) -> Result<IdSet, ArkError> {
    let mut closure = store
        .find_ids(CollectionKind::Units, &Expr::ids_in(ANCESTORS_FIELD, ids), usize::MAX)
        .await?;
    closure.extend(ids.iter().cloned());
    Ok(closure)
}

#[derive(Debug, Clone, Copy, Default)]
pub struct UnitCollection;

impl NodeCollection for UnitCollection {
    const KIND: CollectionKind = CollectionKind::Units;

    fn has_depth_metadata() -> bool {
        true
    }

    fn indexed_for_search() -> bool {
        true
    }

    fn requires_parent() -> bool {
        false
    }

    fn plan_step(depth: DepthSpec, prev: &StepResult, first_step: bool) -> StepPlan {
        plan_unit_step(depth, prev.ids(), first_step)
    }

    async fn resolve_children<S: DocumentStore>(
        store: &S,
        parents: &IdSet,
        limit: usize,
    ) -> Result<IdSet, ArkError> {
        store
            .find_ids(Self::KIND, &Expr::ids_in(PARENTS_FIELD, parents), limit)
            .await
    }

    async fn resolve_parents<S: DocumentStore>(
        store: &S,
        ids: &IdSet,
    ) -> Result<BTreeMap<NodeId, IdSet>, ArkError> {
        parent_map(store, Self::KIND, ids).await
    }

    async fn scope_roots<S: DocumentStore>(
        _store: &S,
        scope: &IdSet,
        _limit: usize,
    ) -> Result<StepResult, ArkError> {
        Ok(StepResult::from_ids(Self::KIND, scope.clone()))
    }

    async fn filter_path<S: DocumentStore>(
        store: &S,
        path: &IdSet,
        prev: &StepResult,
        limit: usize,
    ) -> Result<IdSet, ArkError> {
        let nodes = store
            .find_nodes(Self::KIND, &Expr::ids_in(ID_FIELD, path), path.len())
            .await?;
        Ok(nodes
            .iter()
            .filter_map(GraphNode::as_unit)
            .filter(|unit| unit.is_within(prev.ids()))
            .map(|unit| unit.id.clone())
            .take(limit)
            .collect())
    }

    fn build(id: NodeId, content: Document) -> GraphNode {
        GraphNode::Unit(Unit::new(id, content))
    }

    async fn attach<S: DocumentStore>(
        store: &S,
        parent: &NodeId,
        child: &NodeId,
    ) -> Result<(), ArkError> {
        store.attach_unit(parent, child).await
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ObjectGroupCollection;

impl NodeCollection for ObjectGroupCollection {
    const KIND: CollectionKind = CollectionKind::ObjectGroups;

    fn has_depth_metadata() -> bool {
        false
    }

    fn indexed_for_search() -> bool {
        false
    }

    fn requires_parent() -> bool {
        true
    }

    fn plan_step(_depth: DepthSpec, prev: &StepResult, _first_step: bool) -> StepPlan {
        let prev_holds_units = prev.kind() == CollectionKind::Units;
        StepPlan::Match(plan_object_group_step(prev.ids(), prev_holds_units))
    }

    async fn resolve_children<S: DocumentStore>(
        store: &S,
        parents: &IdSet,
        limit: usize,
    ) -> Result<IdSet, ArkError> {
        store
            .find_ids(Self::KIND, &Expr::ids_in(PARENTS_FIELD, parents), limit)
            .await
    }

    async fn resolve_parents<S: DocumentStore>(
        store: &S,
        ids: &IdSet,
    ) -> Result<BTreeMap<NodeId, IdSet>, ArkError> {
        parent_map(store, Self::KIND, ids).await
    }

    /// Object groups carry no ancestry, so the scope is widened to every Unit
    /// below it before looking for attached groups.
    async fn scope_roots<S: DocumentStore>(
        store: &S,
        scope: &IdSet,
        limit: usize,
    ) -> Result<StepResult, ArkError> {
        let closure = unit_closure(store, scope).await?;
        let groups = Self::resolve_children(store, &closure, limit).await?;
        Ok(StepResult::from_ids(Self::KIND, groups))
    }

    async fn filter_path<S: DocumentStore>(
        store: &S,
        path: &IdSet,
        prev: &StepResult,
        limit: usize,
    ) -> Result<IdSet, ArkError> {
        if prev.kind() == Self::KIND {
            return Ok(path.intersection(prev.ids()).cloned().collect());
        }
        let closure = unit_closure(store, prev.ids()).await?;
        let parents = Self::resolve_parents(store, path).await?;
        Ok(parents
            .into_iter()
            .filter(|(_, parent_ids)| !parent_ids.is_disjoint(&closure))
            .map(|(id, _)| id)
            .take(limit)
            .collect())
    }

    fn build(id: NodeId, content: Document) -> GraphNode {
        GraphNode::ObjectGroup(ObjectGroup::new(id, content))
    }

    async fn attach<S: DocumentStore>(
        store: &S,
        parent: &NodeId,
        child: &NodeId,
    ) -> Result<(), ArkError> {
        store.attach_object_group(parent, child).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::id_set;
    use crate::storage::memory::MemoryStore;

    async fn graph() -> MemoryStore {
        let store = MemoryStore::new();
        for id in ["r", "a", "b", "x"] {
            store
                .insert(UnitCollection::build(id.into(), Document::new()))
                .await
                .expect("unit");
        }
        UnitCollection::attach(&store, &"r".into(), &"a".into()).await.expect("a");
        UnitCollection::attach(&store, &"a".into(), &"b".into()).await.expect("b");
        for (og, parent) in [("g1", "b"), ("g2", "x")] {
            store
                .insert(ObjectGroupCollection::build(og.into(), Document::new()))
                .await
                .expect("og");
            ObjectGroupCollection::attach(&store, &parent.into(), &og.into())
                .await
                .expect("attach og");
        }
        store
    }

    #[tokio::test]
    async fn children_and_parents_per_kind() {
        let store = graph().await;
        let children = UnitCollection::resolve_children(&store, &id_set(["r"]), usize::MAX)
            .await
            .expect("children");
        assert_eq!(children, id_set(["a"]));

        let groups = ObjectGroupCollection::resolve_children(&store, &id_set(["b", "x"]), usize::MAX)
            .await
            .expect("groups");
        assert_eq!(groups, id_set(["g1", "g2"]));

        let parents = ObjectGroupCollection::resolve_parents(&store, &id_set(["g1", "nope"]))
            .await
            .expect("parents");
        assert_eq!(parents.len(), 1);
        assert_eq!(parents[&NodeId::from("g1")], id_set(["b"]));
        assert!(UnitCollection::has_depth_metadata());
        assert!(!ObjectGroupCollection::has_depth_metadata());
    }

    #[tokio::test]
    async fn scope_roots_of_object_groups_follow_the_unit_closure() {
        let store = graph().await;
        let roots = ObjectGroupCollection::scope_roots(&store, &id_set(["r"]), usize::MAX)
            .await
            .expect("scope roots");
        assert_eq!(roots.kind(), CollectionKind::ObjectGroups);
        assert_eq!(roots.ids(), &id_set(["g1"]));

        let narrow = ObjectGroupCollection::scope_roots(&store, &id_set(["r"]), 1)
            .await
            .expect("scope roots under a tight bound");
        assert_eq!(narrow.ids(), &id_set(["g1"]));
    }

    #[tokio::test]
    async fn path_filtering_keeps_descendants_only() {
        let store = graph().await;
        let prev = StepResult::from_ids(CollectionKind::Units, id_set(["a"]));
        let units = UnitCollection::filter_path(&store, &id_set(["a", "b", "x"]), &prev, usize::MAX)
            .await
            .expect("units");
        assert_eq!(units, id_set(["a", "b"]));

        let groups = ObjectGroupCollection::filter_path(&store, &id_set(["g1", "g2"]), &prev, usize::MAX)
            .await
            .expect("groups");
        assert_eq!(groups, id_set(["g1"]));
    }
}
