//nodes.rs
use crate::collectors::CollectorSupplier;
use crate::constraint::ConstraintDef;
use crate::functions::{FactFlattener, FactPredicate, GroupKeyFn, TupleMapper, TuplePredicate};
use crate::joiner::JoinerSet;
use crate::node_operations::ChildLink;
use crate::tuple::NodeId;
use crate::Score;
use smallvec::SmallVec;
use std::any::TypeId;

/// Operator of a stream node together with its constructor arguments.
#[derive(Clone)]
pub enum NodeKind<S: Score> {
    /// Source of all facts of one type.
    ForEach {
        fact_type: TypeId,
        type_name: &'static str,
        include_unassigned: bool,
        /// Resolved from the visibility registry when the node is first shared.
        visibility: Option<FactPredicate>,
    },
    Filter {
        predicate: TuplePredicate,
    },
    Join {
        joiners: JoinerSet,
    },
    IfExists {
        should_exist: bool,
        joiners: JoinerSet,
    },
    GroupBy {
        key: Option<GroupKeyFn>,
        collector: Option<CollectorSupplier>,
    },
    Map {
        mapper: TupleMapper,
    },
    FlattenLast {
        flattener: FactFlattener,
    },
    Distinct,
    Concat,
    Constraint(ConstraintDef<S>),
}

impl<S: Score> NodeKind<S> {
    pub fn name(&self) -> &'static str {
        match self {
            NodeKind::ForEach { .. } => "ForEach",
            NodeKind::Filter { .. } => "Filter",
            NodeKind::Join { .. } => "Join",
            NodeKind::IfExists { should_exist: true, .. } => "IfExists",
            NodeKind::IfExists { should_exist: false, .. } => "IfNotExists",
            NodeKind::GroupBy { .. } => "GroupBy",
            NodeKind::Map { .. } => "Map",
            NodeKind::FlattenLast { .. } => "FlattenLast",
            NodeKind::Distinct => "Distinct",
            NodeKind::Concat => "Concat",
            NodeKind::Constraint(_) => "Constraint",
        }
    }

    /// Filters and constraint leaves forward synchronously and own no tuples.
    pub fn produces_tuples(&self) -> bool {
        !matches!(self, NodeKind::Filter { .. } | NodeKind::Constraint(_))
    }
}

impl<S: Score> std::fmt::Debug for NodeKind<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NodeKind::ForEach { type_name, include_unassigned, .. } => f
                .debug_struct("ForEach")
                .field("type_name", type_name)
                .field("include_unassigned", include_unassigned)
                .finish(),
            NodeKind::Constraint(def) => f.debug_tuple("Constraint").field(&def.id).finish(),
            other => f.write_str(other.name()),
        }
    }
}

/// One immutable operator of a constraint graph.
#[derive(Debug, Clone)]
pub struct StreamNode<S: Score> {
    pub kind: NodeKind<S>,
    pub parents: SmallVec<[NodeId; 2]>,
    pub children: Vec<ChildLink>,
    pub arity: usize,
    /// Propagation layer: sources are 0, every other node sits above all its parents.
    pub layer: usize,
}

impl<S: Score> StreamNode<S> {
    pub fn new(kind: NodeKind<S>, parents: SmallVec<[NodeId; 2]>, arity: usize, layer: usize) -> Self {
        Self {
            kind,
            parents,
            children: Vec::new(),
            arity,
            layer,
        }
    }

    pub fn name(&self) -> &'static str {
        self.kind.name()
    }

    pub fn is_constraint(&self) -> bool {
        matches!(self.kind, NodeKind::Constraint(_))
    }

    pub fn constraint(&self) -> Option<&ConstraintDef<S>> {
        match &self.kind {
            NodeKind::Constraint(def) => Some(def),
            _ => None,
        }
    }
}
