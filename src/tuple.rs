// tuple.rs
use crate::fact::{FactRef, GreynetFact};
use crate::state::TupleState;
use crate::{GreynetError, Result};
use generational_arena::Index;
use slotmap::new_key_type;
use smallvec::SmallVec;

/// Largest number of facts a tuple can carry.
pub const MAX_ARITY: usize = 4;

new_key_type! {
    /// Identifies a node of a constraint graph.
    pub struct NodeId;
}

/// Identifies a tuple inside a session's arena. Stale ids are detected on access.
pub type TupleId = Index;

pub type TupleFacts = SmallVec<[FactRef; MAX_ARITY]>;

/// The input tuples an output tuple was derived from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TupleSources {
    None,
    Single(TupleId),
    Pair(TupleId, TupleId),
}

#[derive(Debug, Clone)]
pub struct Tuple {
    pub facts: TupleFacts,
    pub node: NodeId,
    pub state: TupleState,
    pub sources: TupleSources,
}

impl Tuple {
    pub fn new(node: NodeId, facts: TupleFacts, sources: TupleSources) -> Self {
        Self {
            facts,
            node,
            state: TupleState::Creating,
            sources,
        }
    }

    #[inline]
    pub fn arity(&self) -> usize {
        self.facts.len()
    }

    pub fn view(&self) -> TupleView<'_> {
        TupleView::new(&self.facts)
    }
}

/// Borrowed, typed access to the facts of a tuple.
///
/// This is what predicates, mappers and collectors receive.
#[derive(Debug, Clone, Copy)]
pub struct TupleView<'a> {
    facts: &'a [FactRef],
}

impl<'a> TupleView<'a> {
    pub fn new(facts: &'a [FactRef]) -> Self {
        Self { facts }
    }

    #[inline]
    pub fn arity(&self) -> usize {
        self.facts.len()
    }

    pub fn facts(&self) -> &'a [FactRef] {
        self.facts
    }

    pub fn fact(&self, index: usize) -> Result<&'a dyn GreynetFact> {
        self.fact_ref(index).map(|f| f.as_ref())
    }

    pub fn fact_ref(&self, index: usize) -> Result<&'a FactRef> {
        self.facts
            .get(index)
            .ok_or_else(|| GreynetError::invalid_arity(index + 1, self.facts.len()))
    }

    /// Downcasts the fact at `index`.
    pub fn get<T: GreynetFact>(&self, index: usize) -> Result<&'a T> {
        let fact = self.fact(index)?;
        fact.as_any().downcast_ref::<T>().ok_or_else(|| {
            GreynetError::type_mismatch(std::any::type_name::<T>(), fact.type_name())
        })
    }

    pub fn last(&self) -> Result<&'a FactRef> {
        self.facts
            .last()
            .ok_or_else(|| GreynetError::invalid_arity(1, 0))
    }
}
