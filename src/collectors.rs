// collectors.rs

use crate::fact::{FactRef, GreynetFact, ValueKey};
use crate::fact_impls::FactList;
use crate::tuple::TupleView;
use crate::{GreynetError, Result};
use rustc_hash::FxHashMap as HashMap;
use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt::Debug;
use std::rc::Rc;
use std::sync::atomic::{AtomicUsize, Ordering as AtomicOrdering};
use std::sync::Arc;

/// Token returned by an insertion that undoes exactly that insertion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UndoReceipt {
    Unit,
    Value(i64),
    Slot(u64),
}

/// An undoable accumulator of one group.
pub trait BaseCollector: Debug {
    /// Adds a member and returns the receipt that removes it again.
    fn insert(&mut self, item: &TupleView) -> Result<UndoReceipt>;

    /// Removes a previously inserted member.
    fn retract(&mut self, receipt: UndoReceipt) -> Result<()>;

    /// Current result, `None` when there is nothing to report.
    fn current_value(&self) -> Option<FactRef>;

    fn is_empty(&self) -> bool;
}

fn wrong_receipt(collector: &str, receipt: UndoReceipt) -> GreynetError {
    GreynetError::consistency_violation(format!("{} cannot undo {:?}", collector, receipt))
}

pub type ValueMapper = Arc<dyn Fn(&TupleView) -> Result<i64> + Send + Sync>;
pub type ItemMapper = Arc<dyn Fn(&TupleView) -> Result<FactRef> + Send + Sync>;

#[derive(Default, Debug)]
pub struct CountCollector {
    count: usize,
}

impl BaseCollector for CountCollector {
    fn insert(&mut self, _item: &TupleView) -> Result<UndoReceipt> {
        self.count += 1;
        Ok(UndoReceipt::Unit)
    }

    fn retract(&mut self, _receipt: UndoReceipt) -> Result<()> {
        self.count = self.count.checked_sub(1).ok_or_else(|| {
            GreynetError::consistency_violation("count collector retracted below zero")
        })?;
        Ok(())
    }

    fn current_value(&self) -> Option<FactRef> {
        Some(Rc::new(self.count))
    }

    fn is_empty(&self) -> bool {
        self.count == 0
    }
}

/// Running sum; with `average` set, reports `total / count` as `f64`.
pub struct SumCollector {
    mapping: ValueMapper,
    total: i64,
    count: usize,
    average: bool,
}

impl Debug for SumCollector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SumCollector")
            .field("total", &self.total)
            .field("count", &self.count)
            .field("average", &self.average)
            .finish()
    }
}

impl BaseCollector for SumCollector {
    fn insert(&mut self, item: &TupleView) -> Result<UndoReceipt> {
        let value = (self.mapping)(item)?;
        self.total = self
            .total
            .checked_add(value)
            .ok_or_else(|| GreynetError::overflow(format!("sum {} + {}", self.total, value)))?;
        self.count += 1;
        Ok(UndoReceipt::Value(value))
    }

    fn retract(&mut self, receipt: UndoReceipt) -> Result<()> {
        let UndoReceipt::Value(value) = receipt else {
            return Err(wrong_receipt("sum", receipt));
        };
        let count = self
            .count
            .checked_sub(1)
            .ok_or_else(|| GreynetError::consistency_violation("sum collector retracted below zero"))?;
        self.total = self
            .total
            .checked_sub(value)
            .ok_or_else(|| GreynetError::overflow(format!("sum {} - {}", self.total, value)))?;
        self.count = count;
        Ok(())
    }

    fn current_value(&self) -> Option<FactRef> {
        if !self.average {
            Some(Rc::new(self.total))
        } else if self.count == 0 {
            None
        } else {
            Some(Rc::new(self.total as f64 / self.count as f64))
        }
    }

    fn is_empty(&self) -> bool {
        self.count == 0
    }
}

pub type Comparator<V> = Arc<dyn Fn(&V, &V) -> Ordering + Send + Sync>;

/// A member value ranked by the collector's comparator. Ties keep insertion order.
struct Ranked<V> {
    value: V,
    slot: u64,
    comparator: Comparator<V>,
}

impl<V> PartialEq for Ranked<V> {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl<V> Eq for Ranked<V> {}

impl<V> PartialOrd for Ranked<V> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<V> Ord for Ranked<V> {
    fn cmp(&self, other: &Self) -> Ordering {
        (self.comparator)(&self.value, &other.value).then(self.slot.cmp(&other.slot))
    }
}

/// Min or max over a comparator-ordered multiset of extracted values.
pub struct ExtremumCollector<V: GreynetFact + Clone> {
    mapping: Arc<dyn Fn(&TupleView) -> Result<V> + Send + Sync>,
    comparator: Comparator<V>,
    values: BTreeSet<Ranked<V>>,
    slots: HashMap<u64, V>,
    next_slot: u64,
    max: bool,
}

impl<V: GreynetFact + Clone> Debug for ExtremumCollector<V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct(if self.max { "MaxCollector" } else { "MinCollector" })
            .field("members", &self.slots.len())
            .field("current", &self.current())
            .finish()
    }
}

impl<V: GreynetFact + Clone> ExtremumCollector<V> {
    fn current(&self) -> Option<&V> {
        let ranked = if self.max {
            self.values.last()
        } else {
            self.values.first()
        };
        ranked.map(|r| &r.value)
    }
}

impl<V: GreynetFact + Clone> BaseCollector for ExtremumCollector<V> {
    fn insert(&mut self, item: &TupleView) -> Result<UndoReceipt> {
        let value = (self.mapping)(item)?;
        let slot = self.next_slot;
        self.next_slot += 1;
        self.values.insert(Ranked {
            value: value.clone(),
            slot,
            comparator: Arc::clone(&self.comparator),
        });
        self.slots.insert(slot, value);
        Ok(UndoReceipt::Slot(slot))
    }

    fn retract(&mut self, receipt: UndoReceipt) -> Result<()> {
        let UndoReceipt::Slot(slot) = receipt else {
            return Err(wrong_receipt("min/max", receipt));
        };
        let value = self
            .slots
            .remove(&slot)
            .ok_or_else(|| wrong_receipt("min/max", receipt))?;
        let ranked = Ranked {
            value,
            slot,
            comparator: Arc::clone(&self.comparator),
        };
        if !self.values.remove(&ranked) {
            return Err(GreynetError::consistency_violation(format!(
                "min/max slot {} missing from the ordered values",
                slot
            )));
        }
        Ok(())
    }

    fn current_value(&self) -> Option<FactRef> {
        self.current().map(|v| Rc::new(v.clone()) as FactRef)
    }

    fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}

/// Collects items in insertion order.
pub struct ListCollector {
    mapping: ItemMapper,
    items: BTreeMap<u64, FactRef>,
    next_slot: u64,
}

impl Debug for ListCollector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ListCollector")
            .field("items", &self.items.len())
            .finish()
    }
}

impl BaseCollector for ListCollector {
    fn insert(&mut self, item: &TupleView) -> Result<UndoReceipt> {
        let fact = (self.mapping)(item)?;
        let slot = self.next_slot;
        self.next_slot += 1;
        self.items.insert(slot, fact);
        Ok(UndoReceipt::Slot(slot))
    }

    fn retract(&mut self, receipt: UndoReceipt) -> Result<()> {
        match receipt {
            UndoReceipt::Slot(slot) if self.items.remove(&slot).is_some() => Ok(()),
            _ => Err(wrong_receipt("list", receipt)),
        }
    }

    fn current_value(&self) -> Option<FactRef> {
        Some(Rc::new(FactList(self.items.values().cloned().collect())))
    }

    fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

/// Number of distinct items, by fact identity.
pub struct CountDistinctCollector {
    mapping: ItemMapper,
    counts: HashMap<ValueKey, usize>,
    slots: HashMap<u64, ValueKey>,
    next_slot: u64,
}

impl Debug for CountDistinctCollector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CountDistinctCollector")
            .field("distinct", &self.counts.len())
            .field("members", &self.slots.len())
            .finish()
    }
}

impl BaseCollector for CountDistinctCollector {
    fn insert(&mut self, item: &TupleView) -> Result<UndoReceipt> {
        let key = ValueKey((self.mapping)(item)?);
        *self.counts.entry(key.clone()).or_insert(0) += 1;
        let slot = self.next_slot;
        self.next_slot += 1;
        self.slots.insert(slot, key);
        Ok(UndoReceipt::Slot(slot))
    }

    fn retract(&mut self, receipt: UndoReceipt) -> Result<()> {
        let UndoReceipt::Slot(slot) = receipt else {
            return Err(wrong_receipt("count_distinct", receipt));
        };
        let key = self
            .slots
            .remove(&slot)
            .ok_or_else(|| wrong_receipt("count_distinct", receipt))?;
        if let Some(count) = self.counts.get_mut(&key) {
            *count -= 1;
            if *count == 0 {
                self.counts.remove(&key);
            }
        }
        Ok(())
    }

    fn current_value(&self) -> Option<FactRef> {
        Some(Rc::new(self.counts.len()))
    }

    fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}

static NEXT_COLLECTOR_ID: AtomicUsize = AtomicUsize::new(1);

/// Creates a fresh accumulator per group.
///
/// Two group nodes share only when they use the same supplier (or clones of it).
#[derive(Clone)]
pub struct CollectorSupplier {
    id: usize,
    factory: Arc<dyn Fn() -> Box<dyn BaseCollector> + Send + Sync>,
}

impl CollectorSupplier {
    pub fn new(factory: impl Fn() -> Box<dyn BaseCollector> + Send + Sync + 'static) -> Self {
        Self {
            id: NEXT_COLLECTOR_ID.fetch_add(1, AtomicOrdering::Relaxed),
            factory: Arc::new(factory),
        }
    }

    fn with_id(id: usize, factory: impl Fn() -> Box<dyn BaseCollector> + Send + Sync + 'static) -> Self {
        Self {
            id,
            factory: Arc::new(factory),
        }
    }

    #[inline]
    pub fn create(&self) -> Box<dyn BaseCollector> {
        (self.factory)()
    }

    #[inline]
    pub fn id(&self) -> usize {
        self.id
    }
}

impl PartialEq for CollectorSupplier {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for CollectorSupplier {}

impl std::hash::Hash for CollectorSupplier {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl Debug for CollectorSupplier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CollectorSupplier").field("id", &self.id).finish()
    }
}

fn value_mapper<F>(f: F) -> ValueMapper
where
    F: Fn(&TupleView) -> Result<i64> + Send + Sync + 'static,
{
    Arc::new(f)
}

fn item_mapper<F>(f: F) -> ItemMapper
where
    F: Fn(&TupleView) -> Result<FactRef> + Send + Sync + 'static,
{
    Arc::new(f)
}

/// Built-in collector suppliers.
pub struct Collectors;

impl Collectors {
    /// Number of members. Stateless, so every `count()` shares one identity.
    pub fn count() -> CollectorSupplier {
        CollectorSupplier::with_id(0, || Box::new(CountCollector::default()) as Box<dyn BaseCollector>)
    }

    pub fn sum<A, F>(f: F) -> CollectorSupplier
    where
        A: GreynetFact,
        F: Fn(&A) -> i64 + Send + Sync + 'static,
    {
        Self::sum_tuple(move |t| Ok(f(t.get::<A>(0)?)))
    }

    pub fn sum_tuple<F>(f: F) -> CollectorSupplier
    where
        F: Fn(&TupleView) -> Result<i64> + Send + Sync + 'static,
    {
        Self::summing(value_mapper(f), false)
    }

    /// Arithmetic mean as `f64`.
    pub fn average<A, F>(f: F) -> CollectorSupplier
    where
        A: GreynetFact,
        F: Fn(&A) -> i64 + Send + Sync + 'static,
    {
        Self::average_tuple(move |t| Ok(f(t.get::<A>(0)?)))
    }

    pub fn average_tuple<F>(f: F) -> CollectorSupplier
    where
        F: Fn(&TupleView) -> Result<i64> + Send + Sync + 'static,
    {
        Self::summing(value_mapper(f), true)
    }

    fn summing(mapping: ValueMapper, average: bool) -> CollectorSupplier {
        CollectorSupplier::new(move || {
            Box::new(SumCollector {
                mapping: mapping.clone(),
                total: 0,
                count: 0,
                average,
            }) as Box<dyn BaseCollector>
        })
    }

    /// Smallest value of the first fact's mapping, by natural order.
    pub fn min<A, K, F>(f: F) -> CollectorSupplier
    where
        A: GreynetFact,
        K: GreynetFact + Ord + Clone,
        F: Fn(&A) -> K + Send + Sync + 'static,
    {
        Self::min_by(move |t: &TupleView| Ok(f(t.get::<A>(0)?)), |a: &K, b: &K| a.cmp(b))
    }

    pub fn max<A, K, F>(f: F) -> CollectorSupplier
    where
        A: GreynetFact,
        K: GreynetFact + Ord + Clone,
        F: Fn(&A) -> K + Send + Sync + 'static,
    {
        Self::max_by(move |t: &TupleView| Ok(f(t.get::<A>(0)?)), |a: &K, b: &K| a.cmp(b))
    }

    /// Smallest value mapped from a tuple of any arity, ordered by `comparator`.
    pub fn min_by<V, F, C>(mapping: F, comparator: C) -> CollectorSupplier
    where
        V: GreynetFact + Clone,
        F: Fn(&TupleView) -> Result<V> + Send + Sync + 'static,
        C: Fn(&V, &V) -> Ordering + Send + Sync + 'static,
    {
        Self::extremum(mapping, comparator, false)
    }

    /// Largest value mapped from a tuple of any arity, ordered by `comparator`.
    pub fn max_by<V, F, C>(mapping: F, comparator: C) -> CollectorSupplier
    where
        V: GreynetFact + Clone,
        F: Fn(&TupleView) -> Result<V> + Send + Sync + 'static,
        C: Fn(&V, &V) -> Ordering + Send + Sync + 'static,
    {
        Self::extremum(mapping, comparator, true)
    }

    fn extremum<V, F, C>(mapping: F, comparator: C, max: bool) -> CollectorSupplier
    where
        V: GreynetFact + Clone,
        F: Fn(&TupleView) -> Result<V> + Send + Sync + 'static,
        C: Fn(&V, &V) -> Ordering + Send + Sync + 'static,
    {
        let mapping: Arc<dyn Fn(&TupleView) -> Result<V> + Send + Sync> = Arc::new(mapping);
        let comparator: Comparator<V> = Arc::new(comparator);
        CollectorSupplier::new(move || {
            Box::new(ExtremumCollector {
                mapping: mapping.clone(),
                comparator: comparator.clone(),
                values: BTreeSet::new(),
                slots: HashMap::default(),
                next_slot: 0,
                max,
            }) as Box<dyn BaseCollector>
        })
    }

    /// The first fact of every member, in insertion order.
    pub fn to_list() -> CollectorSupplier {
        Self::to_list_of(|t| Ok(t.fact_ref(0)?.clone()))
    }

    pub fn to_list_of<F>(f: F) -> CollectorSupplier
    where
        F: Fn(&TupleView) -> Result<FactRef> + Send + Sync + 'static,
    {
        let mapping = item_mapper(f);
        CollectorSupplier::new(move || {
            Box::new(ListCollector {
                mapping: mapping.clone(),
                items: BTreeMap::new(),
                next_slot: 0,
            }) as Box<dyn BaseCollector>
        })
    }

    pub fn count_distinct<F>(f: F) -> CollectorSupplier
    where
        F: Fn(&TupleView) -> Result<FactRef> + Send + Sync + 'static,
    {
        let mapping = item_mapper(f);
        CollectorSupplier::new(move || {
            Box::new(CountDistinctCollector {
                mapping: mapping.clone(),
                counts: HashMap::default(),
                slots: HashMap::default(),
                next_slot: 0,
            }) as Box<dyn BaseCollector>
        })
    }

    pub fn custom(factory: impl Fn() -> Box<dyn BaseCollector> + Send + Sync + 'static) -> CollectorSupplier {
        CollectorSupplier::new(factory)
    }
}
