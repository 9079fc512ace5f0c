// fact.rs - GreynetFact trait and identity keys
use std::any::{Any, TypeId};
use std::collections::hash_map::DefaultHasher;
use std::fmt::Debug;
use std::hash::{Hash, Hasher};
use std::rc::Rc;

use crate::tuple::TupleFacts;

/// Core trait for all facts flowing through a session.
///
/// A fact's identity is its concrete type plus [`fact_id`](Self::fact_id):
/// two values with the same type and id are the same fact, which is how an
/// update swaps in a new version of an existing fact. The trait is
/// object-safe to allow storage in `Rc<dyn GreynetFact>`.
pub trait GreynetFact: Debug + 'static {
    /// Returns the identifier of the fact, unique within its type.
    fn fact_id(&self) -> i64;

    /// Returns the fact as a `&dyn Any` for downcasting.
    fn as_any(&self) -> &dyn Any;

    /// Hash consistent with [`eq_fact`](Self::eq_fact).
    fn hash_fact(&self) -> u64 {
        let mut hasher = DefaultHasher::new();
        self.as_any().type_id().hash(&mut hasher);
        self.fact_id().hash(&mut hasher);
        hasher.finish()
    }

    /// Identity comparison, defaulting to same type and same `fact_id`.
    fn eq_fact(&self, other: &dyn GreynetFact) -> bool {
        self.as_any().type_id() == other.as_any().type_id() && self.fact_id() == other.fact_id()
    }

    /// Whether `other` is exactly this version of the fact.
    ///
    /// Domain facts compare by pointer; value facts override this to compare by value.
    fn same_content(&self, other: &dyn GreynetFact) -> bool {
        (self as *const Self).cast::<()>() == (other as *const dyn GreynetFact).cast::<()>()
    }

    fn type_name(&self) -> &'static str {
        std::any::type_name::<Self>()
    }
}

/// Shared handle to a fact.
pub type FactRef = Rc<dyn GreynetFact>;

/// Downcast a trait object to a concrete type
pub fn downcast_fact<T: GreynetFact>(fact: &dyn GreynetFact) -> Option<&T> {
    fact.as_any().downcast_ref::<T>()
}

/// Session identity of a fact: concrete type plus id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FactKey {
    pub type_id: TypeId,
    pub id: i64,
}

impl FactKey {
    pub fn of(fact: &dyn GreynetFact) -> Self {
        Self {
            type_id: fact.as_any().type_id(),
            id: fact.fact_id(),
        }
    }
}

/// Hash-map key comparing a fact by [`GreynetFact::eq_fact`].
#[derive(Debug, Clone)]
pub struct ValueKey(pub FactRef);

impl PartialEq for ValueKey {
    fn eq(&self, other: &Self) -> bool {
        self.0.eq_fact(other.0.as_ref())
    }
}

impl Eq for ValueKey {}

impl Hash for ValueKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        state.write_u64(self.0.hash_fact());
    }
}

/// Hash-map key comparing a whole fact array element-wise.
#[derive(Debug, Clone)]
pub struct FactsKey(pub TupleFacts);

impl PartialEq for FactsKey {
    fn eq(&self, other: &Self) -> bool {
        facts_equal(&self.0, &other.0)
    }
}

impl Eq for FactsKey {}

impl Hash for FactsKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        state.write_usize(self.0.len());
        for fact in &self.0 {
            state.write_u64(fact.hash_fact());
        }
    }
}

/// Element-wise identity comparison of two fact arrays.
pub fn facts_equal(a: &[FactRef], b: &[FactRef]) -> bool {
    a.len() == b.len() && a.iter().zip(b).all(|(x, y)| x.eq_fact(y.as_ref()))
}

/// Element-wise content comparison; true when nothing downstream could observe a change.
pub fn facts_unchanged(a: &[FactRef], b: &[FactRef]) -> bool {
    a.len() == b.len() && a.iter().zip(b).all(|(x, y)| x.same_content(y.as_ref()))
}

/// Implements [`GreynetFact`] for a struct using one of its integer fields as the id.
///
/// ```
/// use greystream::greynet_fact;
///
/// #[derive(Debug, Clone)]
/// struct Shift { id: i64, employee: Option<i64> }
/// greynet_fact!(Shift, id);
/// ```
#[macro_export]
macro_rules! greynet_fact {
    ($t:ty, $id:ident) => {
        impl $crate::GreynetFact for $t {
            fn fact_id(&self) -> i64 {
                self.$id as i64
            }

            fn as_any(&self) -> &dyn ::std::any::Any {
                self
            }
        }
    };
}
