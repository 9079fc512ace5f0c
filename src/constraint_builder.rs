//constraint_builder.rs
use crate::factory::{BuiltinJoiner, ConstraintFactory};
use crate::functions::Predicates;
use crate::graph::ConstraintGraph;
use crate::joiner::{Joiner, Joiners};
use crate::stream_def::{Arity1, Arity2, SharedFactory, Stream};
use crate::{GreynetFact, Result, Score};
use std::any::TypeId;
use std::cell::RefCell;
use std::rc::Rc;
use std::sync::Arc;

/// Entry point for declaring constraint streams.
///
/// ```
/// use greystream::prelude::*;
///
/// #[derive(Debug)]
/// struct Shift { id: i64, hours: i64 }
/// greynet_fact!(Shift, id);
///
/// let builder = ConstraintBuilder::<SimpleScore>::new();
/// builder
///     .for_each::<Shift>()
///     .filter(|s: &Shift| s.hours > 10)
///     .penalize("long shift", SimpleScore::ONE);
/// let graph = builder.build().unwrap();
///
/// let mut session = graph.create_session();
/// session.insert(Shift { id: 1, hours: 12 }).unwrap();
/// assert_eq!(session.calculate_score().unwrap(), SimpleScore::of(-1));
/// ```
#[derive(Debug)]
pub struct ConstraintBuilder<S: Score> {
    factory: SharedFactory<S>,
}

impl<S: Score> ConstraintBuilder<S> {
    pub fn new() -> Self {
        Self {
            factory: Rc::new(RefCell::new(ConstraintFactory::new())),
        }
    }

    /// Package of the constraints declared from now on.
    pub fn with_package(self, package: &str) -> Self {
        self.set_package(package);
        self
    }

    pub fn set_package(&self, package: &str) -> &Self {
        self.factory.borrow_mut().set_package(package);
        self
    }

    /// Hides facts of type `T` failing `predicate` from `for_each::<T>()`.
    ///
    /// Must be called before the first `for_each::<T>()`.
    pub fn register_visibility<T, F>(&self, predicate: F) -> &Self
    where
        T: GreynetFact,
        F: Fn(&T) -> bool + Send + Sync + 'static,
    {
        self.factory.borrow_mut().register_visibility(
            TypeId::of::<T>(),
            std::any::type_name::<T>(),
            Predicates::fact(predicate),
        );
        self
    }

    /// Every visible fact of type `T`.
    pub fn for_each<T: GreynetFact>(&self) -> Stream<Arity1, S> {
        let node = self.factory.borrow_mut().for_each::<T>(false);
        Stream::<Arity1, S>::wrap(node, &self.factory)
    }

    /// Every fact of type `T`, ignoring registered visibility.
    pub fn for_each_including_unassigned<T: GreynetFact>(&self) -> Stream<Arity1, S> {
        let node = self.factory.borrow_mut().for_each::<T>(true);
        Stream::<Arity1, S>::wrap(node, &self.factory)
    }

    /// Each unordered pair of distinct `T` facts once, lower fact id first.
    pub fn for_each_unique_pair<T: GreynetFact>(&self, mut joiners: Vec<Joiner>) -> Stream<Arity2, S> {
        let node = {
            let mut factory = self.factory.borrow_mut();
            let source = factory.for_each::<T>(false);
            let ordering = factory.builtin_joiner(BuiltinJoiner::UniquePair, TypeId::of::<T>(), || {
                Joiners::filtering_tuple(|l, r| Ok(l.fact(0)?.fact_id() < r.fact(0)?.fact_id()))
            });
            joiners.push(ordering);
            factory.join(source, source, joiners)
        };
        Stream::<Arity1, S>::wrap(node, &self.factory)
    }

    /// Finalizes the declarations into a graph shareable across threads.
    pub fn build(self) -> Result<Arc<ConstraintGraph<S>>> {
        let graph = self.factory.borrow_mut().build()?;
        Ok(Arc::new(graph))
    }
}

impl<S: Score> Default for ConstraintBuilder<S> {
    fn default() -> Self {
        Self::new()
    }
}
