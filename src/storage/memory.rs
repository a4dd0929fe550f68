use crate::error::{ArkError, StoreTarget};
use crate::model::{CollectionKind, Document, GraphNode, IdSet, NodeId};
use crate::query::depth::fold_ancestor_depths;
use crate::query::operators::{apply_updates, compare_by, eval_expr, project};
use crate::query::plan::{Expr, UpdateAction};
use crate::storage::{DocumentStore, FindOptions};
use im::OrdMap;
use parking_lot::{Mutex, RwLock};
use std::collections::BTreeMap;

/// Store primitive a fault can be injected into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum StoreOp {
    Find,
    Fetch,
    Get,
    Insert,
    Update,
    Delete,
    Aggregate,
    Attach,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fault {
    Unavailable,
    Timeout,
}

#[derive(Debug, Clone, Default)]
struct Collections {
    units: OrdMap<NodeId, GraphNode>,
    object_groups: OrdMap<NodeId, GraphNode>,
}

impl Collections {
    fn of(&self, kind: CollectionKind) -> &OrdMap<NodeId, GraphNode> {
        match kind {
            CollectionKind::Units => &self.units,
            CollectionKind::ObjectGroups => &self.object_groups,
        }
    }

    fn of_mut(&mut self, kind: CollectionKind) -> &mut OrdMap<NodeId, GraphNode> {
        match kind {
            CollectionKind::Units => &mut self.units,
            CollectionKind::ObjectGroups => &mut self.object_groups,
        }
    }
}

/// In-process primary store over persistent maps. Writes that touch several
/// nodes mutate a structural-sharing copy and publish it only on success.
#[derive(Debug, Default)]
pub struct MemoryStore {
    data: RwLock<Collections>,
    faults: Mutex<BTreeMap<StoreOp, Fault>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores `node` as-is, replacing any previous version. Depth metadata is
    /// taken verbatim, which lets callers load graphs maintained elsewhere.
    pub fn load(&self, node: GraphNode) {
        let mut data = self.data.write();
        data.of_mut(node.kind()).insert(node.id().clone(), node);
    }

    pub fn len(&self, kind: CollectionKind) -> usize {
        self.data.read().of(kind).len()
    }

    pub fn is_empty(&self) -> bool {
        let data = self.data.read();
        data.units.is_empty() && data.object_groups.is_empty()
    }

    /// Makes every later call of `op` fail until cleared.
    pub fn inject_failure(&self, op: StoreOp, fault: Fault) {
        self.faults.lock().insert(op, fault);
    }

    pub fn clear_failure(&self, op: StoreOp) {
        self.faults.lock().remove(&op);
    }

    fn check(&self, op: StoreOp) -> Result<(), ArkError> {
        match self.faults.lock().get(&op) {
            None => Ok(()),
            Some(Fault::Unavailable) => Err(ArkError::Unavailable {
                target: StoreTarget::PrimaryStore,
                message: format!("injected {op:?} failure"),
            }),
            Some(Fault::Timeout) => Err(ArkError::Timeout {
                target: StoreTarget::PrimaryStore,
            }),
        }
    }

    fn matching(&self, kind: CollectionKind, filter: &Expr, limit: usize) -> Vec<GraphNode> {
        let data = self.data.read();
        data.of(kind)
            .values()
            .filter(|node| eval_expr(filter, *node))
            .take(limit)
            .cloned()
            .collect()
    }
}

fn not_found(kind: CollectionKind, id: &NodeId) -> ArkError {
    ArkError::NotFound {
        kind,
        id: id.to_string(),
    }
}

impl DocumentStore for MemoryStore {
    async fn find_ids(
        &self,
        kind: CollectionKind,
        filter: &Expr,
        limit: usize,
    ) -> Result<IdSet, ArkError> {
        self.check(StoreOp::Find)?;
        Ok(self
            .matching(kind, filter, limit)
            .iter()
            .map(|node| node.id().clone())
            .collect())
    }

    async fn find_nodes(
        &self,
        kind: CollectionKind,
        filter: &Expr,
        limit: usize,
    ) -> Result<Vec<GraphNode>, ArkError> {
        self.check(StoreOp::Find)?;
        Ok(self.matching(kind, filter, limit))
    }

    async fn fetch_documents(
        &self,
        kind: CollectionKind,
        ids: &IdSet,
        options: &FindOptions,
    ) -> Result<Vec<(NodeId, Document)>, ArkError> {
        self.check(StoreOp::Fetch)?;
        let data = self.data.read();
        let collection = data.of(kind);
        let mut nodes: Vec<&GraphNode> = ids.iter().filter_map(|id| collection.get(id)).collect();
        if !options.order_by.is_empty() {
            nodes.sort_by(|a, b| compare_by(*a, *b, &options.order_by));
        }
        Ok(nodes
            .into_iter()
            .skip(options.offset)
            .take(options.limit.unwrap_or(usize::MAX))
            .map(|node| (node.id().clone(), project(node, &options.projection)))
            .collect())
    }

    async fn get(&self, kind: CollectionKind, id: &NodeId) -> Result<Option<GraphNode>, ArkError> {
        self.check(StoreOp::Get)?;
        Ok(self.data.read().of(kind).get(id).cloned())
    }

    async fn exists(&self, kind: CollectionKind, id: &NodeId) -> Result<bool, ArkError> {
        self.check(StoreOp::Get)?;
        Ok(self.data.read().of(kind).contains_key(id))
    }

    async fn insert(&self, node: GraphNode) -> Result<(), ArkError> {
        self.check(StoreOp::Insert)?;
        let mut data = self.data.write();
        let collection = data.of_mut(node.kind());
        if collection.contains_key(node.id()) {
            return Err(ArkError::AlreadyExists {
                kind: node.kind(),
                id: node.id().to_string(),
            });
        }
        collection.insert(node.id().clone(), node);
        Ok(())
    }

    async fn update_many(
        &self,
        kind: CollectionKind,
        ids: &IdSet,
        actions: &[UpdateAction],
    ) -> Result<u64, ArkError> {
        self.check(StoreOp::Update)?;
        let mut data = self.data.write();
        let mut next = data.of(kind).clone();
        let mut modified = 0;
        for id in ids {
            if let Some(node) = next.get_mut(id)
                && apply_updates(node.content_mut(), actions)?
            {
                modified += 1;
            }
        }
        *data.of_mut(kind) = next;
        Ok(modified)
    }

    async fn delete_many(&self, kind: CollectionKind, ids: &IdSet) -> Result<IdSet, ArkError> {
        self.check(StoreOp::Delete)?;
        let mut data = self.data.write();
        let collection = data.of_mut(kind);
        Ok(ids
            .iter()
            .filter(|id| collection.remove(*id).is_some())
            .cloned()
            .collect())
    }

    async fn aggregate_ancestors(
        &self,
        ids: &IdSet,
        max_distance: u32,
    ) -> Result<IdSet, ArkError> {
        self.check(StoreOp::Aggregate)?;
        let data = self.data.read();
        let maps = ids
            .iter()
            .filter_map(|id| data.units.get(id))
            .filter_map(GraphNode::as_unit)
            .map(|unit| &unit.ancestor_depths);
        Ok(fold_ancestor_depths(maps, max_distance))
    }

    async fn attach_unit(&self, parent: &NodeId, child: &NodeId) -> Result<(), ArkError> {
        self.check(StoreOp::Attach)?;
        let mut data = self.data.write();
        let parent_unit = data
            .units
            .get(parent)
            .and_then(GraphNode::as_unit)
            .cloned()
            .ok_or_else(|| not_found(CollectionKind::Units, parent))?;
        let linked = match data.units.get_mut(child) {
            Some(GraphNode::Unit(unit)) => unit.link_under(&parent_unit)?,
            _ => return Err(not_found(CollectionKind::Units, child)),
        };
        if linked && let Some(GraphNode::Unit(unit)) = data.units.get_mut(parent) {
            unit.child_count += 1;
        }
        Ok(())
    }

    async fn attach_object_group(
        &self,
        parent: &NodeId,
        object_group: &NodeId,
    ) -> Result<(), ArkError> {
        self.check(StoreOp::Attach)?;
        let mut data = self.data.write();
        if !data.units.contains_key(parent) {
            return Err(not_found(CollectionKind::Units, parent));
        }
        match data.object_groups.get_mut(object_group) {
            Some(GraphNode::ObjectGroup(og)) => {
                og.parent_ids.insert(parent.clone());
                Ok(())
            }
            _ => Err(not_found(CollectionKind::ObjectGroups, object_group)),
        }
    }
}
