//factory.rs
use crate::collectors::CollectorSupplier;
use crate::constraint::{ConstraintDef, ConstraintId, ImpactType, DEFAULT_CONSTRAINT_PACKAGE};
use crate::functions::{FactFlattener, FactPredicate, GroupKeyFn, Indicter, MatchWeigher, TupleMapper, TuplePredicate};
use crate::graph::ConstraintGraph;
use crate::joiner::{Joiner, JoinerSet};
use crate::node_operations::{ChildLink, InputSide};
use crate::node_sharing::NodeSharingManager;
use crate::nodes::{NodeKind, StreamNode};
use crate::tuple::{NodeId, MAX_ARITY};
use crate::{GreynetError, GreynetFact, Result, Score};
use rustc_hash::{FxHashMap as HashMap, FxHashSet as HashSet};
use slotmap::SlotMap;
use smallvec::{smallvec, SmallVec};
use std::any::TypeId;
use tracing::debug;

/// Joiners the factory creates itself and caches so that streams using them still share.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BuiltinJoiner {
    /// Excludes pairs of the same fact.
    OtherFact,
    /// Keeps only pairs ordered by fact id.
    UniquePair,
}

/// Collects node definitions while streams are declared.
///
/// Errors found while declaring streams are recorded, not returned: the
/// stream that failed becomes inert and [`build`](Self::build) reports the
/// first recorded error.
pub struct ConstraintFactory<S: Score> {
    nodes: SlotMap<NodeId, StreamNode<S>>,
    sharing: NodeSharingManager,
    visibility: HashMap<TypeId, FactPredicate>,
    resolved_sources: HashSet<TypeId>,
    constraints: Vec<NodeId>,
    constraint_index: HashMap<ConstraintId, NodeId>,
    builtin_joiners: HashMap<(BuiltinJoiner, TypeId), Joiner>,
    package: String,
    errors: Vec<GreynetError>,
    finalized: bool,
}

impl<S: Score> ConstraintFactory<S> {
    pub fn new() -> Self {
        Self {
            nodes: SlotMap::with_key(),
            sharing: NodeSharingManager::new(),
            visibility: HashMap::default(),
            resolved_sources: HashSet::default(),
            constraints: Vec::new(),
            constraint_index: HashMap::default(),
            builtin_joiners: HashMap::default(),
            package: DEFAULT_CONSTRAINT_PACKAGE.to_string(),
            errors: Vec::new(),
            finalized: false,
        }
    }

    pub fn set_package(&mut self, package: impl Into<String>) {
        self.package = package.into();
    }

    pub fn package(&self) -> &str {
        &self.package
    }

    pub fn record(&mut self, error: GreynetError) {
        self.errors.push(error);
    }

    pub fn errors(&self) -> &[GreynetError] {
        &self.errors
    }

    pub fn node(&self, id: NodeId) -> Option<&StreamNode<S>> {
        self.nodes.get(id)
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Gates `for_each::<T>()` on `predicate`. Must precede the first such stream.
    pub fn register_visibility(&mut self, fact_type: TypeId, type_name: &str, predicate: FactPredicate) {
        if self.resolved_sources.contains(&fact_type) {
            self.record(GreynetError::constraint_builder_error(format!(
                "visibility for {} registered after its source stream was built",
                type_name
            )));
            return;
        }
        self.visibility.insert(fact_type, predicate);
    }

    /// Returns the cached builtin joiner, creating it on first use.
    pub fn builtin_joiner(&mut self, kind: BuiltinJoiner, fact_type: TypeId, make: impl FnOnce() -> Joiner) -> Joiner {
        self.builtin_joiners.entry((kind, fact_type)).or_insert_with(make).clone()
    }

    fn arity_of(&self, id: NodeId) -> Option<usize> {
        self.nodes.get(id).map(|node| node.arity)
    }

    fn add_node(&mut self, kind: NodeKind<S>, parents: SmallVec<[NodeId; 2]>, arity: usize) -> Option<NodeId> {
        if self.finalized {
            self.record(GreynetError::FactoryFinalized);
            return None;
        }
        if arity == 0 || arity > MAX_ARITY {
            self.record(GreynetError::constraint_builder_error(format!(
                "{} stream of arity {} is outside 1..={}",
                kind.name(),
                arity,
                MAX_ARITY
            )));
            return None;
        }
        let mut layer = 0;
        for parent in &parents {
            match self.nodes.get(*parent) {
                Some(node) => layer = layer.max(node.layer + 1),
                None => {
                    self.record(GreynetError::constraint_builder_error(format!(
                        "parent {:?} does not belong to this factory",
                        parent
                    )));
                    return None;
                }
            }
        }

        let candidate = StreamNode::new(kind, parents.clone(), arity, layer);
        let visibility = &self.visibility;
        let shared = self.sharing.share(&mut self.nodes, candidate, |node| {
            if let NodeKind::ForEach { fact_type, include_unassigned: false, visibility: slot, .. } = &mut node.kind {
                let fact_type = *fact_type;
                *slot = visibility.get(&fact_type).cloned();
            }
            Ok(())
        });
        match shared {
            Ok((id, true)) => {
                self.attach(id, &parents);
                Some(id)
            }
            Ok((id, false)) => Some(id),
            Err(error) => {
                self.record(error);
                None
            }
        }
    }

    fn attach(&mut self, child: NodeId, parents: &[NodeId]) {
        let binary = parents.len() == 2;
        for (i, parent) in parents.iter().enumerate() {
            let side = match (binary, i) {
                (false, _) => InputSide::Only,
                (true, 0) => InputSide::Left,
                (true, _) => InputSide::Right,
            };
            if let Some(node) = self.nodes.get_mut(*parent) {
                node.children.push(ChildLink { node: child, side });
            }
        }
    }

    pub fn for_each<T: GreynetFact>(&mut self, include_unassigned: bool) -> Option<NodeId> {
        let fact_type = TypeId::of::<T>();
        let kind = NodeKind::ForEach {
            fact_type,
            type_name: std::any::type_name::<T>(),
            include_unassigned,
            visibility: None,
        };
        let id = self.add_node(kind, SmallVec::new(), 1)?;
        self.resolved_sources.insert(fact_type);
        Some(id)
    }

    pub fn filter(&mut self, parent: Option<NodeId>, predicate: TuplePredicate) -> Option<NodeId> {
        let parent = parent?;
        let arity = self.arity_of(parent)?;
        self.add_node(NodeKind::Filter { predicate }, smallvec![parent], arity)
    }

    pub fn join(&mut self, left: Option<NodeId>, right: Option<NodeId>, joiners: Vec<Joiner>) -> Option<NodeId> {
        let (left, right) = (left?, right?);
        let (left_arity, right_arity) = (self.arity_of(left)?, self.arity_of(right)?);
        if left_arity + right_arity > MAX_ARITY {
            self.record(GreynetError::IncompatibleJoinArity {
                left: left_arity,
                right: right_arity,
                max: MAX_ARITY,
            });
            return None;
        }
        let kind = NodeKind::Join {
            joiners: JoinerSet::new(joiners),
        };
        self.add_node(kind, smallvec![left, right], left_arity + right_arity)
    }

    pub fn if_exists(
        &mut self,
        left: Option<NodeId>,
        right: Option<NodeId>,
        should_exist: bool,
        joiners: Vec<Joiner>,
    ) -> Option<NodeId> {
        let (left, right) = (left?, right?);
        let arity = self.arity_of(left)?;
        let kind = NodeKind::IfExists {
            should_exist,
            joiners: JoinerSet::new(joiners),
        };
        self.add_node(kind, smallvec![left, right], arity)
    }

    pub fn group_by(
        &mut self,
        parent: Option<NodeId>,
        key: Option<GroupKeyFn>,
        collector: Option<CollectorSupplier>,
    ) -> Option<NodeId> {
        let parent = parent?;
        let arity = usize::from(key.is_some()) + usize::from(collector.is_some());
        if arity == 0 {
            self.record(GreynetError::constraint_builder_error(
                "group_by needs a key function, a collector or both",
            ));
            return None;
        }
        self.add_node(NodeKind::GroupBy { key, collector }, smallvec![parent], arity)
    }

    pub fn map(&mut self, parent: Option<NodeId>, mapper: TupleMapper, arity: usize) -> Option<NodeId> {
        let parent = parent?;
        self.add_node(NodeKind::Map { mapper }, smallvec![parent], arity)
    }

    pub fn flatten_last(&mut self, parent: Option<NodeId>, flattener: FactFlattener) -> Option<NodeId> {
        let parent = parent?;
        let arity = self.arity_of(parent)?;
        self.add_node(NodeKind::FlattenLast { flattener }, smallvec![parent], arity)
    }

    pub fn distinct(&mut self, parent: Option<NodeId>) -> Option<NodeId> {
        let parent = parent?;
        let arity = self.arity_of(parent)?;
        self.add_node(NodeKind::Distinct, smallvec![parent], arity)
    }

    pub fn concat(&mut self, left: Option<NodeId>, right: Option<NodeId>) -> Option<NodeId> {
        let (left, right) = (left?, right?);
        let (left_arity, right_arity) = (self.arity_of(left)?, self.arity_of(right)?);
        if left_arity != right_arity {
            self.record(GreynetError::constraint_builder_error(format!(
                "cannot concat streams of arity {} and {}",
                left_arity, right_arity
            )));
            return None;
        }
        self.add_node(NodeKind::Concat, smallvec![left, right], left_arity)
    }

    pub fn add_constraint(
        &mut self,
        parent: Option<NodeId>,
        name: String,
        weight: S,
        impact: ImpactType,
        weigher: Option<MatchWeigher>,
    ) -> Option<NodeId> {
        let parent = parent?;
        let id = ConstraintId::new(self.package.clone(), name);
        if self.constraint_index.contains_key(&id) {
            self.record(GreynetError::DuplicateConstraint(id.to_string()));
            return None;
        }
        let arity = self.arity_of(parent)?;
        let def = ConstraintDef {
            id: id.clone(),
            weight,
            impact,
            weigher,
            indicter: None,
        };
        let node = self.add_node(NodeKind::Constraint(def), smallvec![parent], arity)?;
        self.constraints.push(node);
        self.constraint_index.insert(id, node);
        Some(node)
    }

    pub fn set_indicter(&mut self, constraint: Option<NodeId>, indicter: Indicter) {
        let Some(constraint) = constraint else {
            return;
        };
        if let Some(NodeKind::Constraint(def)) = self.nodes.get_mut(constraint).map(|n| &mut n.kind) {
            def.indicter = Some(indicter);
        }
    }

    /// Finalizes the factory into an immutable graph.
    ///
    /// Nodes that feed no constraint are pruned. After this call every
    /// further declaration is an error.
    pub fn build(&mut self) -> Result<ConstraintGraph<S>> {
        if self.finalized {
            return Err(GreynetError::FactoryFinalized);
        }
        self.finalized = true;
        if !self.errors.is_empty() {
            debug!(event = "graph_build_failed", errors = self.errors.len());
            return Err(self.errors.remove(0));
        }

        let mut reachable: HashSet<NodeId> = HashSet::default();
        let mut stack = self.constraints.clone();
        while let Some(id) = stack.pop() {
            if reachable.insert(id) {
                if let Some(node) = self.nodes.get(id) {
                    stack.extend(node.parents.iter().copied());
                }
            }
        }
        let mut nodes = std::mem::take(&mut self.nodes);
        let declared = nodes.len();
        nodes.retain(|id, _| reachable.contains(&id));
        for node in nodes.values_mut() {
            node.children.retain(|link| reachable.contains(&link.node));
        }

        debug!(
            event = "graph_built",
            nodes = nodes.len(),
            pruned = declared - nodes.len(),
            shared = self.sharing.len(),
            constraints = self.constraints.len()
        );
        Ok(ConstraintGraph::new(
            nodes,
            std::mem::take(&mut self.constraints),
            std::mem::take(&mut self.constraint_index),
        ))
    }
}

impl<S: Score> Default for ConstraintFactory<S> {
    fn default() -> Self {
        Self::new()
    }
}

impl<S: Score> std::fmt::Debug for ConstraintFactory<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConstraintFactory")
            .field("nodes", &self.nodes.len())
            .field("constraints", &self.constraints.len())
            .field("package", &self.package)
            .field("errors", &self.errors.len())
            .field("finalized", &self.finalized)
            .finish()
    }
}
