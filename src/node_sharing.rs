use crate::functions::FunctionId;
use crate::joiner::JoinerKey;
use crate::nodes::{NodeKind, StreamNode};
use crate::tuple::NodeId;
use crate::{GreynetError, Result, Score};
use rustc_hash::FxHashMap as HashMap;
use slotmap::SlotMap;
use smallvec::SmallVec;
use std::any::TypeId;
use tracing::trace;

/// Structural identity of a node: operator, constructor arguments, parents.
///
/// Children are not part of the key. Constraint leaves have no key and are
/// never shared.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum NodeKey {
    ForEach {
        fact_type: TypeId,
        include_unassigned: bool,
    },
    Filter {
        parent: NodeId,
        predicate: FunctionId,
    },
    Join {
        left: NodeId,
        right: NodeId,
        joiners: SmallVec<[JoinerKey; 2]>,
    },
    IfExists {
        left: NodeId,
        right: NodeId,
        should_exist: bool,
        joiners: SmallVec<[JoinerKey; 2]>,
    },
    GroupBy {
        parent: NodeId,
        key: Option<FunctionId>,
        collector: Option<usize>,
    },
    Map {
        parent: NodeId,
        mapper: FunctionId,
        arity: usize,
    },
    Flatten {
        parent: NodeId,
        flattener: FunctionId,
    },
    Distinct {
        parent: NodeId,
    },
    Concat {
        left: NodeId,
        right: NodeId,
    },
}

fn parent(node: &StreamNode<impl Score>, index: usize) -> Result<NodeId> {
    node.parents.get(index).copied().ok_or_else(|| {
        GreynetError::constraint_builder_error(format!("{} node is missing parent {}", node.name(), index))
    })
}

impl NodeKey {
    pub fn of<S: Score>(node: &StreamNode<S>) -> Result<Option<NodeKey>> {
        let key = match &node.kind {
            NodeKind::ForEach { fact_type, include_unassigned, .. } => NodeKey::ForEach {
                fact_type: *fact_type,
                include_unassigned: *include_unassigned,
            },
            NodeKind::Filter { predicate } => NodeKey::Filter {
                parent: parent(node, 0)?,
                predicate: FunctionId::of(predicate),
            },
            NodeKind::Join { joiners } => NodeKey::Join {
                left: parent(node, 0)?,
                right: parent(node, 1)?,
                joiners: joiners.sharing_keys().iter().copied().collect(),
            },
            NodeKind::IfExists { should_exist, joiners } => NodeKey::IfExists {
                left: parent(node, 0)?,
                right: parent(node, 1)?,
                should_exist: *should_exist,
                joiners: joiners.sharing_keys().iter().copied().collect(),
            },
            NodeKind::GroupBy { key, collector } => NodeKey::GroupBy {
                parent: parent(node, 0)?,
                key: key.as_ref().map(FunctionId::of),
                collector: collector.as_ref().map(|c| c.id()),
            },
            NodeKind::Map { mapper } => NodeKey::Map {
                parent: parent(node, 0)?,
                mapper: FunctionId::of(mapper),
                arity: node.arity,
            },
            NodeKind::FlattenLast { flattener } => NodeKey::Flatten {
                parent: parent(node, 0)?,
                flattener: FunctionId::of(flattener),
            },
            NodeKind::Distinct => NodeKey::Distinct {
                parent: parent(node, 0)?,
            },
            NodeKind::Concat => NodeKey::Concat {
                left: parent(node, 0)?,
                right: parent(node, 1)?,
            },
            NodeKind::Constraint(_) => return Ok(None),
        };
        Ok(Some(key))
    }
}

/// Hash-consing cache of one factory.
#[derive(Debug, Default)]
pub struct NodeSharingManager {
    nodes: HashMap<NodeKey, NodeId>,
}

impl NodeSharingManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the canonical node for `candidate` and whether it was created now.
    ///
    /// `initializer` runs once, on first occurrence, before the node is
    /// registered. On a cache hit the candidate is dropped untouched.
    pub fn share<S: Score>(
        &mut self,
        nodes: &mut SlotMap<NodeId, StreamNode<S>>,
        mut candidate: StreamNode<S>,
        initializer: impl FnOnce(&mut StreamNode<S>) -> Result<()>,
    ) -> Result<(NodeId, bool)> {
        if !candidate.children.is_empty() {
            return Err(GreynetError::ChildAttachedBeforeSharing);
        }
        let key = NodeKey::of(&candidate)?;
        if let Some(existing) = key.as_ref().and_then(|k| self.nodes.get(k)) {
            trace!(event = "node_shared", node = candidate.name(), id = ?existing);
            return Ok((*existing, false));
        }
        initializer(&mut candidate)?;
        let id = nodes.insert(candidate);
        if let Some(key) = key {
            self.nodes.insert(key, id);
        }
        Ok((id, true))
    }

    pub fn get_node(&self, key: &NodeKey) -> Option<NodeId> {
        self.nodes.get(key).copied()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}
