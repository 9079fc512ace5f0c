// fact_impls.rs - GreynetFact for value types
//
// Values have no natural id, so their identity is the value itself. They show
// up as group keys, collector results and mapped tuple elements.
use crate::fact::{FactRef, GreynetFact};
use std::any::Any;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

fn value_hash<T: Hash + 'static>(value: &T) -> u64 {
    let mut hasher = DefaultHasher::new();
    std::any::TypeId::of::<T>().hash(&mut hasher);
    value.hash(&mut hasher);
    hasher.finish()
}

macro_rules! impl_greynet_fact_for_value {
    ($T:ty, $id:expr) => {
        impl GreynetFact for $T {
            fn fact_id(&self) -> i64 {
                let id: fn(&$T) -> i64 = $id;
                id(self)
            }

            fn as_any(&self) -> &dyn Any {
                self
            }

            fn hash_fact(&self) -> u64 {
                value_hash(self)
            }

            fn eq_fact(&self, other: &dyn GreynetFact) -> bool {
                other.as_any().downcast_ref::<$T>().map_or(false, |o| o == self)
            }

            fn same_content(&self, other: &dyn GreynetFact) -> bool {
                self.eq_fact(other)
            }
        }
    };
}

impl_greynet_fact_for_value!(i64, |v| *v);
impl_greynet_fact_for_value!(i32, |v| *v as i64);
impl_greynet_fact_for_value!(u32, |v| *v as i64);
impl_greynet_fact_for_value!(u64, |v| *v as i64);
impl_greynet_fact_for_value!(usize, |v| *v as i64);
impl_greynet_fact_for_value!(bool, |v| *v as i64);
impl_greynet_fact_for_value!(char, |v| *v as i64);
impl_greynet_fact_for_value!(String, |v| value_hash(v) as i64);
impl_greynet_fact_for_value!(&'static str, |v| value_hash(v) as i64);

impl GreynetFact for f64 {
    fn fact_id(&self) -> i64 {
        self.to_bits() as i64
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn hash_fact(&self) -> u64 {
        value_hash(&self.to_bits())
    }

    fn eq_fact(&self, other: &dyn GreynetFact) -> bool {
        other
            .as_any()
            .downcast_ref::<f64>()
            .map_or(false, |o| o.to_bits() == self.to_bits())
    }

    fn same_content(&self, other: &dyn GreynetFact) -> bool {
        self.eq_fact(other)
    }
}

/// Ordered list of facts, the result of the `to_list` collectors.
#[derive(Debug, Clone, Default)]
pub struct FactList(pub Vec<FactRef>);

impl FactList {
    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &FactRef> {
        self.0.iter()
    }

    /// Downcasts every element, skipping those of another type.
    pub fn items<T: GreynetFact>(&self) -> impl Iterator<Item = &T> {
        self.0.iter().filter_map(|f| f.as_any().downcast_ref::<T>())
    }
}

impl GreynetFact for FactList {
    fn fact_id(&self) -> i64 {
        self.hash_fact() as i64
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn hash_fact(&self) -> u64 {
        let mut hasher = DefaultHasher::new();
        self.0.len().hash(&mut hasher);
        for fact in &self.0 {
            fact.hash_fact().hash(&mut hasher);
        }
        hasher.finish()
    }

    fn eq_fact(&self, other: &dyn GreynetFact) -> bool {
        other
            .as_any()
            .downcast_ref::<FactList>()
            .map_or(false, |o| crate::fact::facts_equal(&self.0, &o.0))
    }

    fn same_content(&self, other: &dyn GreynetFact) -> bool {
        other
            .as_any()
            .downcast_ref::<FactList>()
            .map_or(false, |o| crate::fact::facts_unchanged(&self.0, &o.0))
    }
}
