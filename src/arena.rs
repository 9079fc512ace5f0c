//arena.rs
use crate::state::TupleState;
use crate::tuple::{Tuple, TupleId};
use crate::{GreynetError, ResourceLimits, Result};
use generational_arena::Arena;

/// Tuple storage of one session, with generation-checked ids.
pub struct TupleArena {
    arena: Arena<Tuple>,
    limits: ResourceLimits,
}

impl TupleArena {
    pub fn new() -> Self {
        Self::with_limits(ResourceLimits::default())
    }

    pub fn with_limits(limits: ResourceLimits) -> Self {
        Self {
            arena: Arena::new(),
            limits,
        }
    }

    pub fn acquire(&mut self, tuple: Tuple) -> Result<TupleId> {
        self.limits.check_tuple_limit(self.arena.len() + 1)?;
        Ok(self.arena.insert(tuple))
    }

    pub fn get(&self, id: TupleId) -> Result<&Tuple> {
        self.arena
            .get(id)
            .ok_or_else(|| GreynetError::invalid_index(format!("stale or unknown tuple {:?}", id)))
    }

    pub fn get_mut(&mut self, id: TupleId) -> Result<&mut Tuple> {
        self.arena
            .get_mut(id)
            .ok_or_else(|| GreynetError::invalid_index(format!("stale or unknown tuple {:?}", id)))
    }

    pub fn contains(&self, id: TupleId) -> bool {
        self.arena.contains(id)
    }

    /// Removes the tuple, marking it dead. Releasing twice is a no-op.
    pub fn release(&mut self, id: TupleId) -> Option<Tuple> {
        self.arena.remove(id).map(|mut tuple| {
            tuple.state = TupleState::Dead;
            tuple
        })
    }

    pub fn len(&self) -> usize {
        self.arena.len()
    }

    pub fn is_empty(&self) -> bool {
        self.arena.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (TupleId, &Tuple)> {
        self.arena.iter()
    }

    pub fn clear(&mut self) {
        self.arena.clear();
    }
}

impl std::fmt::Debug for TupleArena {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TupleArena")
            .field("live_tuples", &self.arena.len())
            .field("max_tuples", &self.limits.max_tuples)
            .finish()
    }
}

impl Default for TupleArena {
    fn default() -> Self {
        Self::new()
    }
}
