//graph.rs
use crate::config::SessionConfig;
use crate::constraint::{ConstraintDef, ConstraintId};
use crate::nodes::{NodeKind, StreamNode};
use crate::session::Session;
use crate::tuple::NodeId;
use crate::{GreynetError, Result, Score};
use rustc_hash::FxHashMap as HashMap;
use slotmap::SlotMap;
use smallvec::SmallVec;
use std::any::TypeId;
use std::sync::Arc;

/// An immutable, fully wired constraint network.
///
/// Built once by [`ConstraintBuilder::build`](crate::ConstraintBuilder::build)
/// and shared through `Arc` by any number of sessions, one per worker thread.
#[derive(Debug)]
pub struct ConstraintGraph<S: Score> {
    nodes: SlotMap<NodeId, StreamNode<S>>,
    sources: HashMap<TypeId, SmallVec<[NodeId; 2]>>,
    layers: Vec<Vec<NodeId>>,
    constraints: Vec<NodeId>,
    constraint_index: HashMap<ConstraintId, NodeId>,
}

impl<S: Score> ConstraintGraph<S> {
    pub(crate) fn new(
        nodes: SlotMap<NodeId, StreamNode<S>>,
        constraints: Vec<NodeId>,
        constraint_index: HashMap<ConstraintId, NodeId>,
    ) -> Self {
        let mut sources: HashMap<TypeId, SmallVec<[NodeId; 2]>> = HashMap::default();
        let mut layers: Vec<Vec<NodeId>> = Vec::new();
        for (id, node) in nodes.iter() {
            if let NodeKind::ForEach { fact_type, .. } = &node.kind {
                sources.entry(*fact_type).or_default().push(id);
            }
            if node.kind.produces_tuples() {
                if layers.len() <= node.layer {
                    layers.resize_with(node.layer + 1, Vec::new);
                }
                layers[node.layer].push(id);
            }
        }
        Self {
            nodes,
            sources,
            layers,
            constraints,
            constraint_index,
        }
    }

    pub fn node(&self, id: NodeId) -> Result<&StreamNode<S>> {
        self.nodes
            .get(id)
            .ok_or_else(|| GreynetError::invalid_index(format!("unknown node {:?}", id)))
    }

    pub fn nodes(&self) -> impl Iterator<Item = (NodeId, &StreamNode<S>)> {
        self.nodes.iter()
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Source nodes consuming facts of `fact_type`.
    pub fn sources_for(&self, fact_type: TypeId) -> &[NodeId] {
        self.sources.get(&fact_type).map_or(&[], |ids| ids.as_slice())
    }

    /// Tuple-producing nodes grouped by propagation layer, lowest first.
    pub fn layers(&self) -> &[Vec<NodeId>] {
        &self.layers
    }

    /// Constraint leaves in declaration order.
    pub fn constraints(&self) -> &[NodeId] {
        &self.constraints
    }

    pub fn constraint_node(&self, id: &ConstraintId) -> Result<NodeId> {
        self.constraint_index
            .get(id)
            .copied()
            .ok_or_else(|| GreynetError::ConstraintNotFound(id.to_string()))
    }

    pub fn constraint_def(&self, node: NodeId) -> Result<&ConstraintDef<S>> {
        self.node(node)?.constraint().ok_or_else(|| {
            GreynetError::invalid_index(format!("node {:?} is not a constraint", node))
        })
    }

    pub fn constraint_ids(&self) -> impl Iterator<Item = &ConstraintId> + '_ {
        self.constraints
            .iter()
            .filter_map(|id| self.nodes.get(*id).and_then(|n| n.constraint()).map(|def| &def.id))
    }

    /// Opens a session with the default configuration.
    pub fn create_session(self: &Arc<Self>) -> Session<S> {
        Session::new(Arc::clone(self), SessionConfig::default())
    }

    pub fn create_session_with(self: &Arc<Self>, config: SessionConfig) -> Result<Session<S>> {
        config.validate()?;
        Ok(Session::new(Arc::clone(self), config))
    }
}
