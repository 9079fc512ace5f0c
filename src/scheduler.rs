//scheduler.rs
use crate::arena::TupleArena;
use crate::state::TupleState;
use crate::tuple::{NodeId, Tuple, TupleFacts, TupleId, TupleSources, TupleView};
use crate::{GreynetError, ResourceLimits, Result};
use slotmap::SecondaryMap;

/// Owns the tuples of a session and the per-node dirty queues.
///
/// Fact changes and node reactions only mark tuples dirty here; nothing is
/// propagated until the network drains a node's queue.
#[derive(Debug)]
pub struct BatchScheduler {
    tuples: TupleArena,
    queues: SecondaryMap<NodeId, Vec<TupleId>>,
    pending: usize,
}

impl BatchScheduler {
    pub fn new() -> Self {
        Self::with_limits(ResourceLimits::default())
    }

    pub fn with_limits(limits: ResourceLimits) -> Self {
        Self {
            tuples: TupleArena::with_limits(limits),
            queues: SecondaryMap::new(),
            pending: 0,
        }
    }

    /// Registers a node that owns tuples.
    pub fn register_node(&mut self, node: NodeId) {
        self.queues.insert(node, Vec::new());
    }

    fn enqueue(&mut self, node: NodeId, id: TupleId) -> Result<()> {
        let queue = self.queues.get_mut(node).ok_or_else(|| {
            GreynetError::consistency_violation(format!("node {:?} has no dirty queue", node))
        })?;
        queue.push(id);
        self.pending += 1;
        Ok(())
    }

    /// Creates a tuple in state `Creating` and queues it at its node.
    pub fn create(&mut self, node: NodeId, facts: TupleFacts, sources: TupleSources) -> Result<TupleId> {
        let id = self.tuples.acquire(Tuple::new(node, facts, sources))?;
        if let Err(e) = self.enqueue(node, id) {
            self.tuples.release(id);
            return Err(e);
        }
        Ok(id)
    }

    /// Marks a propagated tuple as changed. Pending tuples absorb the update.
    pub fn update(&mut self, id: TupleId) -> Result<()> {
        let tuple = self.tuples.get_mut(id)?;
        match tuple.state {
            TupleState::Ok => {
                tuple.state = TupleState::Updating;
                let node = tuple.node;
                self.enqueue(node, id)
            }
            TupleState::Creating | TupleState::Updating => Ok(()),
            state => Err(GreynetError::consistency_violation(format!(
                "tuple cannot be updated in state {:?}",
                state
            ))),
        }
    }

    /// Marks a tuple for removal.
    pub fn retract(&mut self, id: TupleId) -> Result<()> {
        let tuple = self.tuples.get_mut(id)?;
        match tuple.state {
            TupleState::Creating => {
                tuple.state = TupleState::Aborting;
                Ok(())
            }
            TupleState::Ok => {
                tuple.state = TupleState::Dying;
                let node = tuple.node;
                self.enqueue(node, id)
            }
            TupleState::Updating => {
                tuple.state = TupleState::Dying;
                Ok(())
            }
            state => Err(GreynetError::consistency_violation(format!(
                "tuple cannot be retracted in state {:?}",
                state
            ))),
        }
    }

    pub fn set_facts(&mut self, id: TupleId, facts: TupleFacts) -> Result<()> {
        self.tuples.get_mut(id)?.facts = facts;
        Ok(())
    }

    pub fn set_state(&mut self, id: TupleId, state: TupleState) -> Result<()> {
        self.tuples.get_mut(id)?.state = state;
        Ok(())
    }

    pub fn state(&self, id: TupleId) -> Result<TupleState> {
        Ok(self.tuples.get(id)?.state)
    }

    pub fn sources(&self, id: TupleId) -> Result<TupleSources> {
        Ok(self.tuples.get(id)?.sources)
    }

    pub fn tuple(&self, id: TupleId) -> Result<&Tuple> {
        self.tuples.get(id)
    }

    pub fn view(&self, id: TupleId) -> Result<TupleView<'_>> {
        Ok(self.tuples.get(id)?.view())
    }

    pub fn facts(&self, id: TupleId) -> Result<&TupleFacts> {
        Ok(&self.tuples.get(id)?.facts)
    }

    /// Takes every tuple queued at `node`, leaving the queue empty.
    pub fn take_queue(&mut self, node: NodeId) -> Vec<TupleId> {
        let queue = self
            .queues
            .get_mut(node)
            .map(std::mem::take)
            .unwrap_or_default();
        self.pending -= queue.len();
        queue
    }

    pub fn release(&mut self, id: TupleId) {
        self.tuples.release(id);
    }

    /// Number of tuples waiting in dirty queues.
    pub fn pending(&self) -> usize {
        self.pending
    }

    pub fn tuple_count(&self) -> usize {
        self.tuples.len()
    }

    pub fn tuples(&self) -> impl Iterator<Item = (TupleId, &Tuple)> {
        self.tuples.iter()
    }

    pub fn clear(&mut self) {
        self.tuples.clear();
        for (_, queue) in self.queues.iter_mut() {
            queue.clear();
        }
        self.pending = 0;
    }
}

impl Default for BatchScheduler {
    fn default() -> Self {
        Self::new()
    }
}
