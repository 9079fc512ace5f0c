// functions.rs - Shared user function handles
//
// Every user closure is stored behind an `Arc` so a built graph is `Send + Sync`
// and so that two streams built from the same handle share their nodes.
use crate::fact::{FactRef, GreynetFact};
use crate::indexer::IndexProperty;
use crate::tuple::{TupleFacts, TupleView};
use crate::Result;
use std::rc::Rc;
use std::sync::Arc;

pub type FactPredicate = Arc<dyn Fn(&dyn GreynetFact) -> Result<bool> + Send + Sync>;
pub type TuplePredicate = Arc<dyn Fn(&TupleView) -> Result<bool> + Send + Sync>;
pub type PairPredicate = Arc<dyn Fn(&TupleView, &TupleView) -> Result<bool> + Send + Sync>;
pub type TupleMapper = Arc<dyn Fn(&TupleView) -> Result<TupleFacts> + Send + Sync>;
pub type GroupKeyFn = Arc<dyn Fn(&TupleView) -> Result<FactRef> + Send + Sync>;
pub type FactFlattener = Arc<dyn Fn(&dyn GreynetFact) -> Result<Vec<FactRef>> + Send + Sync>;
pub type MatchWeigher = Arc<dyn Fn(&TupleView) -> Result<i64> + Send + Sync>;
pub type Indicter = Arc<dyn Fn(&TupleView) -> Result<Vec<FactRef>> + Send + Sync>;
pub type KeyExtractor = Arc<dyn Fn(&TupleView) -> Result<Rc<dyn IndexProperty>> + Send + Sync>;

macro_rules! handle_constructor {
    ($(#[$doc:meta])* $name:ident, $alias:ident, $($sig:tt)*) => {
        $(#[$doc])*
        pub fn $name<F>(f: F) -> $alias
        where
            F: $($sig)* + Send + Sync + 'static,
        {
            Arc::new(f)
        }
    };
}

handle_constructor!(fact_predicate, FactPredicate, Fn(&dyn GreynetFact) -> Result<bool>);
handle_constructor!(tuple_predicate, TuplePredicate, Fn(&TupleView) -> Result<bool>);
handle_constructor!(pair_predicate, PairPredicate, Fn(&TupleView, &TupleView) -> Result<bool>);
handle_constructor!(tuple_mapper, TupleMapper, Fn(&TupleView) -> Result<TupleFacts>);
handle_constructor!(group_key, GroupKeyFn, Fn(&TupleView) -> Result<FactRef>);
handle_constructor!(fact_flattener, FactFlattener, Fn(&dyn GreynetFact) -> Result<Vec<FactRef>>);
handle_constructor!(
    /// Match weight of a tuple, multiplied into the constraint weight.
    match_weigher, MatchWeigher, Fn(&TupleView) -> Result<i64>
);
handle_constructor!(indicter, Indicter, Fn(&TupleView) -> Result<Vec<FactRef>>);
handle_constructor!(key_extractor, KeyExtractor, Fn(&TupleView) -> Result<Rc<dyn IndexProperty>>);

/// Pointer identity of a shared function, used as its sharing key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FunctionId(pub usize);

impl FunctionId {
    pub fn of<F: ?Sized>(f: &Arc<F>) -> Self {
        FunctionId(Arc::as_ptr(f) as *const () as usize)
    }
}

/// Constructors for typed predicates.
///
/// Keep the returned handle and pass it to several streams to let them share
/// the filter node:
///
/// ```
/// use greystream::{greynet_fact, Predicates};
///
/// #[derive(Debug)]
/// struct Shift { id: i64, hours: i64 }
/// greynet_fact!(Shift, id);
///
/// let long_shift = Predicates::uni(|s: &Shift| s.hours > 8);
/// let _again = long_shift.clone();
/// ```
pub struct Predicates;

impl Predicates {
    pub fn uni<A, F>(f: F) -> TuplePredicate
    where
        A: GreynetFact,
        F: Fn(&A) -> bool + Send + Sync + 'static,
    {
        Self::tuple(move |t| Ok(f(t.get::<A>(0)?)))
    }

    pub fn bi<A, B, F>(f: F) -> TuplePredicate
    where
        A: GreynetFact,
        B: GreynetFact,
        F: Fn(&A, &B) -> bool + Send + Sync + 'static,
    {
        Self::tuple(move |t| Ok(f(t.get::<A>(0)?, t.get::<B>(1)?)))
    }

    pub fn tri<A, B, C, F>(f: F) -> TuplePredicate
    where
        A: GreynetFact,
        B: GreynetFact,
        C: GreynetFact,
        F: Fn(&A, &B, &C) -> bool + Send + Sync + 'static,
    {
        Self::tuple(move |t| Ok(f(t.get::<A>(0)?, t.get::<B>(1)?, t.get::<C>(2)?)))
    }

    pub fn tuple<F>(f: F) -> TuplePredicate
    where
        F: Fn(&TupleView) -> Result<bool> + Send + Sync + 'static,
    {
        tuple_predicate(f)
    }

    pub fn fact<A, F>(f: F) -> FactPredicate
    where
        A: GreynetFact,
        F: Fn(&A) -> bool + Send + Sync + 'static,
    {
        fact_predicate(move |fact| match fact.as_any().downcast_ref::<A>() {
            Some(a) => Ok(f(a)),
            None => Err(crate::GreynetError::type_mismatch(
                std::any::type_name::<A>(),
                fact.type_name(),
            )),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_function_id_is_pointer_identity() {
        let p = Predicates::uni(|v: &i64| *v > 0);
        let q = p.clone();
        let r = Predicates::uni(|v: &i64| *v > 0);
        assert_eq!(FunctionId::of(&p), FunctionId::of(&q));
        assert_ne!(FunctionId::of(&p), FunctionId::of(&r));
    }

    #[test]
    fn test_typed_predicate_reports_mismatch() {
        let p = Predicates::uni(|v: &i64| *v > 0);
        let facts: TupleFacts = smallvec::smallvec![Rc::new(String::from("x")) as FactRef];
        assert!(p(&TupleView::new(&facts)).is_err());

        let facts: TupleFacts = smallvec::smallvec![Rc::new(4i64) as FactRef];
        assert!(p(&TupleView::new(&facts)).unwrap());
    }
}
