//network.rs
use crate::constraint::ConstraintMemory;
use crate::fact::FactRef;
use crate::graph::ConstraintGraph;
use crate::group_node::GroupMemory;
use crate::join_nodes::{ExistsMemory, JoinMemory};
use crate::node_memory::{ConcatMemory, DistinctMemory, FilterMemory, FlattenMemory, MapMemory, NodeMemory};
use crate::node_operations::{ChildLink, InputSide, NodeOperation};
use crate::nodes::NodeKind;
use crate::scheduler::BatchScheduler;
use crate::state::TupleState;
use crate::tuple::{NodeId, TupleId, TupleSources};
use crate::{GreynetError, ResourceLimits, Result, Score};
use slotmap::SecondaryMap;
use tracing::trace;

/// Runtime state of one graph instance: tuples, dirty queues and node memories.
#[derive(Debug)]
pub struct Network<S: Score> {
    scheduler: BatchScheduler,
    memories: SecondaryMap<NodeId, NodeMemory<S>>,
    limits: ResourceLimits,
    operations: usize,
}

fn empty_memory<S: Score>(kind: &NodeKind<S>) -> NodeMemory<S> {
    match kind {
        NodeKind::ForEach { .. } => NodeMemory::Source,
        NodeKind::Filter { .. } => NodeMemory::Filter(FilterMemory::default()),
        NodeKind::Join { .. } => NodeMemory::Join(JoinMemory::default()),
        NodeKind::IfExists { .. } => NodeMemory::Exists(ExistsMemory::default()),
        NodeKind::GroupBy { .. } => NodeMemory::Group(GroupMemory::default()),
        NodeKind::Map { .. } => NodeMemory::Map(MapMemory::default()),
        NodeKind::FlattenLast { .. } => NodeMemory::Flatten(FlattenMemory::default()),
        NodeKind::Distinct => NodeMemory::Distinct(DistinctMemory::default()),
        NodeKind::Concat => NodeMemory::Concat(ConcatMemory::default()),
        NodeKind::Constraint(def) => NodeMemory::Constraint(ConstraintMemory::new(def.weight)),
    }
}

impl<S: Score> Network<S> {
    pub fn new(graph: &ConstraintGraph<S>, limits: ResourceLimits) -> Self {
        let mut network = Self {
            scheduler: BatchScheduler::with_limits(limits.clone()),
            memories: SecondaryMap::new(),
            limits,
            operations: 0,
        };
        network.reset(graph);
        network
    }

    /// Drops every tuple and recreates empty node memories.
    pub fn reset(&mut self, graph: &ConstraintGraph<S>) {
        self.scheduler.clear();
        self.memories.clear();
        for (id, node) in graph.nodes() {
            if node.kind.produces_tuples() {
                self.scheduler.register_node(id);
            }
            self.memories.insert(id, empty_memory(&node.kind));
        }
    }

    pub fn insert_source(&mut self, node: NodeId, fact: FactRef) -> Result<TupleId> {
        self.scheduler.create(node, smallvec::smallvec![fact], TupleSources::None)
    }

    pub fn update_source(&mut self, tuple: TupleId, fact: FactRef) -> Result<()> {
        self.scheduler.set_facts(tuple, smallvec::smallvec![fact])?;
        self.scheduler.update(tuple)
    }

    pub fn retract_source(&mut self, tuple: TupleId) -> Result<()> {
        self.scheduler.retract(tuple)
    }

    /// Propagates every pending change, layer by layer. Returns the number of tuples drained.
    pub fn flush(&mut self, graph: &ConstraintGraph<S>) -> Result<usize> {
        self.operations = 0;
        let mut drained = 0;
        for layer in graph.layers() {
            for &node in layer {
                drained += self.drain(graph, node)?;
            }
        }
        if drained > 0 {
            trace!(event = "flush", drained, operations = self.operations, tuples = self.scheduler.tuple_count());
        }
        Ok(drained)
    }

    fn drain(&mut self, graph: &ConstraintGraph<S>, node: NodeId) -> Result<usize> {
        match (&graph.node(node)?.kind, self.memories.get_mut(node)) {
            (NodeKind::GroupBy { .. }, Some(NodeMemory::Group(memory))) => {
                memory.refresh(node, &mut self.scheduler)?
            }
            (NodeKind::IfExists { should_exist, .. }, Some(NodeMemory::Exists(memory))) => {
                memory.refresh(node, *should_exist, &mut self.scheduler)?
            }
            _ => {}
        }

        let queue = self.scheduler.take_queue(node);
        let drained = queue.len();
        for id in queue {
            match self.scheduler.state(id)? {
                TupleState::Creating => {
                    self.scheduler.set_state(id, TupleState::Ok)?;
                    self.forward(graph, node, NodeOperation::Insert, id)?;
                }
                TupleState::Updating => {
                    self.scheduler.set_state(id, TupleState::Ok)?;
                    self.forward(graph, node, NodeOperation::Update, id)?;
                }
                TupleState::Dying => {
                    self.forward(graph, node, NodeOperation::Retract, id)?;
                    self.scheduler.release(id);
                }
                TupleState::Aborting => self.scheduler.release(id),
                TupleState::Ok | TupleState::Dead => {}
            }
        }
        Ok(drained)
    }

    fn forward(&mut self, graph: &ConstraintGraph<S>, node: NodeId, op: NodeOperation, id: TupleId) -> Result<()> {
        for link in &graph.node(node)?.children {
            self.deliver(graph, *link, op, id)?;
        }
        Ok(())
    }

    fn deliver(&mut self, graph: &ConstraintGraph<S>, link: ChildLink, op: NodeOperation, id: TupleId) -> Result<()> {
        self.operations += 1;
        self.limits.check_operation_limit(self.operations)?;

        let target = link.node;
        let node = graph.node(target)?;
        let scheduler = &mut self.scheduler;
        let memory = self.memories.get_mut(target).ok_or_else(|| {
            GreynetError::consistency_violation(format!("node {:?} has no memory", target))
        })?;

        match (&node.kind, memory) {
            (NodeKind::Filter { predicate }, NodeMemory::Filter(m)) => {
                if let Some(next) = m.accept(predicate, scheduler, op, id)? {
                    self.forward(graph, target, next, id)?;
                }
                Ok(())
            }
            (NodeKind::Join { joiners }, NodeMemory::Join(m)) => match op {
                NodeOperation::Insert => m.insert(target, joiners, scheduler, link.side, id),
                NodeOperation::Update => m.update(target, joiners, scheduler, link.side, id),
                NodeOperation::Retract => m.retract(scheduler, link.side, id),
            },
            (NodeKind::IfExists { joiners, .. }, NodeMemory::Exists(m)) => match (link.side, op) {
                (InputSide::Right, NodeOperation::Insert) => m.insert_right(joiners, scheduler, id),
                (InputSide::Right, NodeOperation::Update) => m.update_right(joiners, scheduler, id),
                (InputSide::Right, NodeOperation::Retract) => m.retract_right(id),
                (_, NodeOperation::Insert) => m.insert_left(joiners, scheduler, id),
                (_, NodeOperation::Update) => m.update_left(joiners, scheduler, id),
                (_, NodeOperation::Retract) => m.retract_left(scheduler, id),
            },
            (NodeKind::GroupBy { key, collector }, NodeMemory::Group(m)) => match op {
                NodeOperation::Insert => m.insert(key.as_ref(), collector.as_ref(), scheduler, id),
                NodeOperation::Update => m.update(key.as_ref(), collector.as_ref(), scheduler, id),
                NodeOperation::Retract => m.retract(id),
            },
            (NodeKind::Map { mapper }, NodeMemory::Map(m)) => match op {
                NodeOperation::Insert => m.insert(target, node.arity, mapper, scheduler, id),
                NodeOperation::Update => m.update(node.arity, mapper, scheduler, id),
                NodeOperation::Retract => m.retract(scheduler, id),
            },
            (NodeKind::FlattenLast { flattener }, NodeMemory::Flatten(m)) => match op {
                NodeOperation::Insert => m.insert(target, flattener, scheduler, id),
                NodeOperation::Update => {
                    m.retract(scheduler, id)?;
                    m.insert(target, flattener, scheduler, id)
                }
                NodeOperation::Retract => m.retract(scheduler, id),
            },
            (NodeKind::Distinct, NodeMemory::Distinct(m)) => match op {
                NodeOperation::Insert => m.insert(target, scheduler, id),
                NodeOperation::Update => m.update(target, scheduler, id),
                NodeOperation::Retract => m.retract(scheduler, id),
            },
            (NodeKind::Concat, NodeMemory::Concat(m)) => match op {
                NodeOperation::Insert => m.insert(target, scheduler, link.side, id),
                NodeOperation::Update => m.update(scheduler, link.side, id),
                NodeOperation::Retract => m.retract(scheduler, link.side, id),
            },
            (NodeKind::Constraint(def), NodeMemory::Constraint(m)) => match op {
                NodeOperation::Insert => m.insert(def, id, &scheduler.view(id)?),
                NodeOperation::Update => m.update(def, id, &scheduler.view(id)?),
                NodeOperation::Retract => m.retract(def, id),
            },
            (kind, _) => Err(GreynetError::consistency_violation(format!(
                "{} node {:?} received a tuple it cannot process",
                kind.name(),
                target
            ))),
        }
    }

    /// Sum of every constraint total.
    pub fn score(&self, graph: &ConstraintGraph<S>) -> Result<S> {
        graph
            .constraints()
            .iter()
            .filter_map(|id| self.constraint_memory(*id))
            .try_fold(S::null_score(), |acc, memory| {
                acc.checked_add(&memory.total())
                    .ok_or_else(|| GreynetError::overflow("sum of constraint totals"))
            })
    }

    pub fn constraint_memory(&self, node: NodeId) -> Option<&ConstraintMemory<S>> {
        match self.memories.get(node) {
            Some(NodeMemory::Constraint(memory)) => Some(memory),
            _ => None,
        }
    }

    pub fn constraint_memory_mut(&mut self, node: NodeId) -> Option<&mut ConstraintMemory<S>> {
        match self.memories.get_mut(node) {
            Some(NodeMemory::Constraint(memory)) => Some(memory),
            _ => None,
        }
    }

    pub fn memory(&self, node: NodeId) -> Option<&NodeMemory<S>> {
        self.memories.get(node)
    }

    pub fn scheduler(&self) -> &BatchScheduler {
        &self.scheduler
    }

    pub fn tuple_count(&self) -> usize {
        self.scheduler.tuple_count()
    }

    pub fn pending(&self) -> usize {
        self.scheduler.pending()
    }

    /// Checks the invariants that must hold between flushes.
    pub fn validate_consistency(&self, graph: &ConstraintGraph<S>) -> Result<()> {
        if self.scheduler.pending() != 0 {
            return Err(GreynetError::consistency_violation(format!(
                "{} tuples still queued after flush",
                self.scheduler.pending()
            )));
        }
        if let Some((id, tuple)) = self.scheduler.tuples().find(|(_, t)| t.state != TupleState::Ok) {
            return Err(GreynetError::consistency_violation(format!(
                "tuple {:?} left in state {:?}",
                id, tuple.state
            )));
        }
        for (id, memory) in self.memories.iter() {
            let dirty = match memory {
                NodeMemory::Group(m) => m.has_dirty(),
                NodeMemory::Exists(m) => m.has_dirty(),
                _ => false,
            };
            if dirty {
                return Err(GreynetError::consistency_violation(format!(
                    "node {:?} has unrefreshed state",
                    id
                )));
            }
        }
        for &node in graph.constraints() {
            let Some(memory) = self.constraint_memory(node) else {
                continue;
            };
            let mut total = S::null_score();
            for (tuple, entry) in memory.matches() {
                let state = self.scheduler.state(tuple)?;
                if !state.is_live() {
                    return Err(GreynetError::consistency_violation(format!(
                        "constraint {} matches tuple {:?} in state {:?}",
                        graph.constraint_def(node)?.id,
                        tuple,
                        state
                    )));
                }
                total = total
                    .checked_add(&entry.score)
                    .ok_or_else(|| GreynetError::overflow("sum of constraint matches"))?;
            }
            if total != memory.total() {
                return Err(GreynetError::consistency_violation(format!(
                    "constraint {} total {} differs from the sum of its matches {}",
                    graph.constraint_def(node)?.id,
                    memory.total(),
                    total
                )));
            }
        }
        Ok(())
    }
}
