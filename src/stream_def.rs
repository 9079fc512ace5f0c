// stream_def.rs - Typed constraint streams
//
// A `Stream` is a handle on one node of the factory; every operator adds (or
// reuses) a node and returns a new handle. The arity marker only exists at
// compile time so that `join` and the typed helpers line up.

use crate::collectors::CollectorSupplier;
use crate::constraint::{ConstraintId, ImpactType};
use crate::fact::FactRef;
use crate::factory::{BuiltinJoiner, ConstraintFactory};
use crate::functions::{
    fact_flattener, group_key, indicter, match_weigher, tuple_mapper, FactFlattener, GroupKeyFn, MatchWeigher,
    Predicates, TupleMapper, TuplePredicate,
};
use crate::joiner::{Joiner, Joiners};
use crate::tuple::{NodeId, TupleFacts, TupleView};
use crate::{GreynetFact, Result, Score};
use std::any::TypeId;
use std::cell::RefCell;
use std::marker::PhantomData;
use std::rc::Rc;

// Arity marker types
#[derive(Debug, Clone, Copy)]
pub struct Arity1;
#[derive(Debug, Clone, Copy)]
pub struct Arity2;
#[derive(Debug, Clone, Copy)]
pub struct Arity3;
#[derive(Debug, Clone, Copy)]
pub struct Arity4;

pub trait Arity {
    const ARITY: usize;
}

impl Arity for Arity1 {
    const ARITY: usize = 1;
}
impl Arity for Arity2 {
    const ARITY: usize = 2;
}
impl Arity for Arity3 {
    const ARITY: usize = 3;
}
impl Arity for Arity4 {
    const ARITY: usize = 4;
}

/// Arity of `Self` joined with `B`.
pub trait JoinArity<B: Arity>: Arity {
    type Output: Arity;
}

macro_rules! join_arity {
    ($($left:ty, $right:ty => $out:ty;)*) => {
        $(impl JoinArity<$right> for $left {
            type Output = $out;
        })*
    };
}

join_arity! {
    Arity1, Arity1 => Arity2;
    Arity1, Arity2 => Arity3;
    Arity2, Arity1 => Arity3;
    Arity1, Arity3 => Arity4;
    Arity3, Arity1 => Arity4;
    Arity2, Arity2 => Arity4;
}

pub type SharedFactory<S> = Rc<RefCell<ConstraintFactory<S>>>;

/// A constraint stream of tuples of arity `A`.
///
/// A stream whose declaration failed is inert: later operators on it do
/// nothing and the failure is reported by `ConstraintBuilder::build`.
pub struct Stream<A: Arity, S: Score> {
    node: Option<NodeId>,
    factory: SharedFactory<S>,
    _arity: PhantomData<A>,
}

impl<A: Arity, S: Score> Clone for Stream<A, S> {
    fn clone(&self) -> Self {
        Self::wrap(self.node, &self.factory)
    }
}

impl<A: Arity, S: Score> std::fmt::Debug for Stream<A, S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Stream")
            .field("arity", &A::ARITY)
            .field("node", &self.node)
            .finish()
    }
}

impl<A: Arity, S: Score> Stream<A, S> {
    pub(crate) fn wrap<B: Arity>(node: Option<NodeId>, factory: &SharedFactory<S>) -> Stream<B, S> {
        Stream {
            node,
            factory: Rc::clone(factory),
            _arity: PhantomData,
        }
    }

    /// Node backing this stream; `None` when its declaration failed.
    pub fn node_id(&self) -> Option<NodeId> {
        self.node
    }

    pub fn arity(&self) -> usize {
        A::ARITY
    }

    /// Keeps tuples for which `predicate` holds. Reusing the same handle shares the node.
    pub fn filter_with(&self, predicate: TuplePredicate) -> Self {
        let node = self.factory.borrow_mut().filter(self.node, predicate);
        Self::wrap(node, &self.factory)
    }

    pub fn filter_tuple<F>(&self, predicate: F) -> Self
    where
        F: Fn(&TupleView) -> Result<bool> + Send + Sync + 'static,
    {
        self.filter_with(Predicates::tuple(predicate))
    }

    /// Joins with `other`; an output concatenates the left and right facts.
    pub fn join<B>(&self, other: &Stream<B, S>, joiners: Vec<Joiner>) -> Stream<A::Output, S>
    where
        B: Arity,
        A: JoinArity<B>,
    {
        let node = self.factory.borrow_mut().join(self.node, other.node, joiners);
        Self::wrap(node, &self.factory)
    }

    /// Passes tuples that have at least one match in `other`.
    pub fn if_exists<B: Arity>(&self, other: &Stream<B, S>, joiners: Vec<Joiner>) -> Self {
        let node = self.factory.borrow_mut().if_exists(self.node, other.node, true, joiners);
        Self::wrap(node, &self.factory)
    }

    /// Passes tuples that have no match in `other`.
    pub fn if_not_exists<B: Arity>(&self, other: &Stream<B, S>, joiners: Vec<Joiner>) -> Self {
        let node = self.factory.borrow_mut().if_exists(self.node, other.node, false, joiners);
        Self::wrap(node, &self.factory)
    }

    /// Groups by `key` and collects each group; outputs `(key, result)`.
    pub fn group_by<K, F>(&self, key: F, collector: CollectorSupplier) -> Stream<Arity2, S>
    where
        K: GreynetFact,
        F: Fn(&TupleView) -> Result<K> + Send + Sync + 'static,
    {
        self.group_by_with(group_key(move |t| Ok(Rc::new(key(t)?) as FactRef)), collector)
    }

    pub fn group_by_with(&self, key: GroupKeyFn, collector: CollectorSupplier) -> Stream<Arity2, S> {
        let node = self.factory.borrow_mut().group_by(self.node, Some(key), Some(collector));
        Self::wrap(node, &self.factory)
    }

    /// Distinct group keys; outputs `(key)`.
    pub fn group_by_key<K, F>(&self, key: F) -> Stream<Arity1, S>
    where
        K: GreynetFact,
        F: Fn(&TupleView) -> Result<K> + Send + Sync + 'static,
    {
        self.group_by_key_with(group_key(move |t| Ok(Rc::new(key(t)?) as FactRef)))
    }

    pub fn group_by_key_with(&self, key: GroupKeyFn) -> Stream<Arity1, S> {
        let node = self.factory.borrow_mut().group_by(self.node, Some(key), None);
        Self::wrap(node, &self.factory)
    }

    /// Collects the whole stream into one `(result)` tuple.
    pub fn aggregate(&self, collector: CollectorSupplier) -> Stream<Arity1, S> {
        let node = self.factory.borrow_mut().group_by(self.node, None, Some(collector));
        Self::wrap(node, &self.factory)
    }

    /// Replaces each tuple by the facts `mapper` returns; they must number `B::ARITY`.
    pub fn map_tuple<B, F>(&self, mapper: F) -> Stream<B, S>
    where
        B: Arity,
        F: Fn(&TupleView) -> Result<TupleFacts> + Send + Sync + 'static,
    {
        self.map_with(tuple_mapper(mapper))
    }

    pub fn map_with<B: Arity>(&self, mapper: TupleMapper) -> Stream<B, S> {
        let node = self.factory.borrow_mut().map(self.node, mapper, B::ARITY);
        Self::wrap(node, &self.factory)
    }

    /// Expands the last fact into one tuple per item, keeping the prefix.
    pub fn flatten_last<F>(&self, flattener: F) -> Self
    where
        F: Fn(&dyn GreynetFact) -> Result<Vec<FactRef>> + Send + Sync + 'static,
    {
        self.flatten_last_with(fact_flattener(flattener))
    }

    pub fn flatten_last_with(&self, flattener: FactFlattener) -> Self {
        let node = self.factory.borrow_mut().flatten_last(self.node, flattener);
        Self::wrap(node, &self.factory)
    }

    /// Collapses tuples with equal facts into one.
    pub fn distinct(&self) -> Self {
        let node = self.factory.borrow_mut().distinct(self.node);
        Self::wrap(node, &self.factory)
    }

    /// Union of both streams, duplicates included.
    pub fn concat(&self, other: &Stream<A, S>) -> Self {
        let node = self.factory.borrow_mut().concat(self.node, other.node);
        Self::wrap(node, &self.factory)
    }

    fn impact(&self, name: &str, weight: S, impact: ImpactType, weigher: Option<MatchWeigher>) -> ConstraintHandle<S> {
        let node = self
            .factory
            .borrow_mut()
            .add_constraint(self.node, name.to_string(), weight, impact, weigher);
        ConstraintHandle {
            node,
            factory: Rc::clone(&self.factory),
        }
    }

    pub fn penalize(&self, name: &str, weight: S) -> ConstraintHandle<S> {
        self.impact(name, weight, ImpactType::Penalty, None)
    }

    pub fn reward(&self, name: &str, weight: S) -> ConstraintHandle<S> {
        self.impact(name, weight, ImpactType::Reward, None)
    }

    /// Penalizes each match by `weight × weigher(tuple)`.
    pub fn penalize_by<F>(&self, name: &str, weight: S, weigher: F) -> ConstraintHandle<S>
    where
        F: Fn(&TupleView) -> Result<i64> + Send + Sync + 'static,
    {
        self.impact(name, weight, ImpactType::Penalty, Some(match_weigher(weigher)))
    }

    pub fn reward_by<F>(&self, name: &str, weight: S, weigher: F) -> ConstraintHandle<S>
    where
        F: Fn(&TupleView) -> Result<i64> + Send + Sync + 'static,
    {
        self.impact(name, weight, ImpactType::Reward, Some(match_weigher(weigher)))
    }
}

impl<S: Score> Stream<Arity1, S> {
    pub fn filter<A, F>(&self, predicate: F) -> Self
    where
        A: GreynetFact,
        F: Fn(&A) -> bool + Send + Sync + 'static,
    {
        self.filter_with(Predicates::uni(predicate))
    }

    pub fn map<A, K, F>(&self, mapper: F) -> Stream<Arity1, S>
    where
        A: GreynetFact,
        K: GreynetFact,
        F: Fn(&A) -> K + Send + Sync + 'static,
    {
        self.map_tuple(move |t| Ok(smallvec::smallvec![Rc::new(mapper(t.get::<A>(0)?)) as FactRef]))
    }

    /// Replaces each fact by the items `items` returns.
    pub fn flatten<A, I, F>(&self, items: F) -> Stream<Arity1, S>
    where
        A: GreynetFact,
        I: GreynetFact,
        F: Fn(&A) -> Vec<I> + Send + Sync + 'static,
    {
        self.flatten_last(move |fact| match fact.as_any().downcast_ref::<A>() {
            Some(a) => Ok(items(a).into_iter().map(|i| Rc::new(i) as FactRef).collect()),
            None => Err(crate::GreynetError::type_mismatch(
                std::any::type_name::<A>(),
                fact.type_name(),
            )),
        })
    }

    /// Passes facts for which some *other* fact of type `T` matches.
    pub fn if_exists_other<T: GreynetFact>(&self, joiners: Vec<Joiner>) -> Self {
        self.exists_other::<T>(true, false, joiners)
    }

    /// Like [`Stream::if_exists_other`], also matching facts hidden by visibility.
    pub fn if_exists_other_including_unassigned<T: GreynetFact>(&self, joiners: Vec<Joiner>) -> Self {
        self.exists_other::<T>(true, true, joiners)
    }

    /// Passes facts for which no *other* fact of type `T` matches.
    pub fn if_not_exists_other<T: GreynetFact>(&self, joiners: Vec<Joiner>) -> Self {
        self.exists_other::<T>(false, false, joiners)
    }

    pub fn if_not_exists_other_including_unassigned<T: GreynetFact>(&self, joiners: Vec<Joiner>) -> Self {
        self.exists_other::<T>(false, true, joiners)
    }

    fn exists_other<T: GreynetFact>(
        &self,
        should_exist: bool,
        include_unassigned: bool,
        mut joiners: Vec<Joiner>,
    ) -> Self {
        let node = {
            let mut factory = self.factory.borrow_mut();
            let other = factory.for_each::<T>(include_unassigned);
            let exclusion = factory.builtin_joiner(BuiltinJoiner::OtherFact, TypeId::of::<T>(), || {
                Joiners::filtering_tuple(|l, r| Ok(!l.fact(0)?.eq_fact(r.fact(0)?)))
            });
            joiners.push(exclusion);
            factory.if_exists(self.node, other, should_exist, joiners)
        };
        Self::wrap(node, &self.factory)
    }

    pub fn penalize_with<A, F>(&self, name: &str, weight: S, weigher: F) -> ConstraintHandle<S>
    where
        A: GreynetFact,
        F: Fn(&A) -> i64 + Send + Sync + 'static,
    {
        self.penalize_by(name, weight, move |t| Ok(weigher(t.get::<A>(0)?)))
    }

    pub fn reward_with<A, F>(&self, name: &str, weight: S, weigher: F) -> ConstraintHandle<S>
    where
        A: GreynetFact,
        F: Fn(&A) -> i64 + Send + Sync + 'static,
    {
        self.reward_by(name, weight, move |t| Ok(weigher(t.get::<A>(0)?)))
    }
}

impl<S: Score> Stream<Arity2, S> {
    pub fn filter<A, B, F>(&self, predicate: F) -> Self
    where
        A: GreynetFact,
        B: GreynetFact,
        F: Fn(&A, &B) -> bool + Send + Sync + 'static,
    {
        self.filter_with(Predicates::bi(predicate))
    }

    pub fn map<A, B, K, F>(&self, mapper: F) -> Stream<Arity1, S>
    where
        A: GreynetFact,
        B: GreynetFact,
        K: GreynetFact,
        F: Fn(&A, &B) -> K + Send + Sync + 'static,
    {
        self.map_tuple(move |t| {
            let mapped = mapper(t.get::<A>(0)?, t.get::<B>(1)?);
            Ok(smallvec::smallvec![Rc::new(mapped) as FactRef])
        })
    }

    pub fn penalize_with<A, B, F>(&self, name: &str, weight: S, weigher: F) -> ConstraintHandle<S>
    where
        A: GreynetFact,
        B: GreynetFact,
        F: Fn(&A, &B) -> i64 + Send + Sync + 'static,
    {
        self.penalize_by(name, weight, move |t| Ok(weigher(t.get::<A>(0)?, t.get::<B>(1)?)))
    }

    pub fn reward_with<A, B, F>(&self, name: &str, weight: S, weigher: F) -> ConstraintHandle<S>
    where
        A: GreynetFact,
        B: GreynetFact,
        F: Fn(&A, &B) -> i64 + Send + Sync + 'static,
    {
        self.reward_by(name, weight, move |t| Ok(weigher(t.get::<A>(0)?, t.get::<B>(1)?)))
    }
}

impl<S: Score> Stream<Arity3, S> {
    pub fn filter<A, B, C, F>(&self, predicate: F) -> Self
    where
        A: GreynetFact,
        B: GreynetFact,
        C: GreynetFact,
        F: Fn(&A, &B, &C) -> bool + Send + Sync + 'static,
    {
        self.filter_with(Predicates::tri(predicate))
    }
}

/// A declared constraint leaf.
pub struct ConstraintHandle<S: Score> {
    node: Option<NodeId>,
    factory: SharedFactory<S>,
}

impl<S: Score> ConstraintHandle<S> {
    /// Overrides which facts a match blames; by default every fact of the tuple.
    pub fn indict_with<F>(self, f: F) -> Self
    where
        F: Fn(&TupleView) -> Result<Vec<FactRef>> + Send + Sync + 'static,
    {
        self.factory.borrow_mut().set_indicter(self.node, indicter(f));
        self
    }

    pub fn node_id(&self) -> Option<NodeId> {
        self.node
    }

    pub fn id(&self) -> Option<ConstraintId> {
        let factory = self.factory.borrow();
        factory
            .node(self.node?)
            .and_then(|node| node.constraint())
            .map(|def| def.id.clone())
    }
}

impl<S: Score> std::fmt::Debug for ConstraintHandle<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConstraintHandle").field("node", &self.node).finish()
    }
}
