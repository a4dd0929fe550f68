use crate::model::{CollectionKind, Document, IdSet, NodeId};
use std::fmt::Write;

/// Non-fatal conditions collected while a pipeline runs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PipelineWarning {
    /// Authorization dropped some of the declared roots.
    RootsNarrowed { declared: usize, resolved: usize },
    /// The node is durable but its search index write was deferred.
    IndexDeferred { id: NodeId },
}

/// Pipeline accumulator. Each step takes the previous result by value, so a
/// result can only ever be read by the step that follows it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepResult {
    kind: CollectionKind,
    ids: IdSet,
    ordered: Vec<NodeId>,
    documents: Vec<Document>,
    count: u64,
    warnings: Vec<PipelineWarning>,
}

impl StepResult {
    pub fn empty(kind: CollectionKind) -> Self {
        Self::from_ids(kind, IdSet::new())
    }

    pub fn from_ids(kind: CollectionKind, ids: IdSet) -> Self {
        let count = ids.len() as u64;
        Self {
            kind,
            ids,
            ordered: Vec::new(),
            documents: Vec::new(),
            count,
            warnings: Vec::new(),
        }
    }

    /// Result holding materialized documents in their returned order.
    pub fn with_documents(kind: CollectionKind, rows: Vec<(NodeId, Document)>) -> Self {
        let (ordered, documents): (Vec<NodeId>, Vec<Document>) = rows.into_iter().unzip();
        Self {
            kind,
            ids: ordered.iter().cloned().collect(),
            count: documents.len() as u64,
            ordered,
            documents,
            warnings: Vec::new(),
        }
    }

    pub(crate) fn with_count(mut self, count: u64) -> Self {
        self.count = count;
        self
    }

    pub(crate) fn push_warning(&mut self, warning: PipelineWarning) {
        self.warnings.push(warning);
    }

    pub(crate) fn carry_warnings(mut self, warnings: Vec<PipelineWarning>) -> Self {
        let mut merged = warnings;
        merged.append(&mut self.warnings);
        self.warnings = merged;
        self
    }

    pub fn kind(&self) -> CollectionKind {
        self.kind
    }

    pub fn ids(&self) -> &IdSet {
        &self.ids
    }

    /// Ids in document order when documents were materialized, otherwise
    /// in id order.
    pub fn ordered_ids(&self) -> Vec<&NodeId> {
        if self.ordered.is_empty() {
            self.ids.iter().collect()
        } else {
            self.ordered.iter().collect()
        }
    }

    pub fn documents(&self) -> &[Document] {
        &self.documents
    }

    pub fn count(&self) -> u64 {
        self.count
    }

    pub fn warnings(&self) -> &[PipelineWarning] {
        &self.warnings
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    /// Consumes the result, leaving nothing behind for a second reader.
    pub fn into_parts(self) -> (CollectionKind, IdSet, Vec<PipelineWarning>) {
        (self.kind, self.ids, self.warnings)
    }

    /// Short rendering for diagnostics, listing at most `limit` ids.
    pub fn describe(&self, limit: usize) -> String {
        let mut out = format!("{} {} id(s)", self.ids.len(), self.kind);
        if self.ids.is_empty() {
            return out;
        }
        out.push_str(": [");
        for (i, id) in self.ids.iter().take(limit).enumerate() {
            if i > 0 {
                out.push_str(", ");
            }
            let _ = write!(out, "{id}");
        }
        if self.ids.len() > limit {
            let _ = write!(out, ", ... +{}", self.ids.len() - limit);
        }
        out.push(']');
        out
    }
}
