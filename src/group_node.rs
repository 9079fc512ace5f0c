//group_node.rs
use crate::collectors::{BaseCollector, CollectorSupplier, UndoReceipt};
use crate::fact::{facts_unchanged, FactRef, ValueKey};
use crate::functions::GroupKeyFn;
use crate::scheduler::BatchScheduler;
use crate::tuple::{NodeId, TupleFacts, TupleId, TupleSources};
use crate::{GreynetError, Result};
use rustc_hash::{FxHashMap as HashMap, FxHashSet as HashSet};

/// Group identity; `None` for a keyless aggregate over the whole stream.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct GroupKey(Option<ValueKey>);

#[derive(Debug)]
struct Group {
    key_fact: Option<FactRef>,
    accumulator: Option<Box<dyn BaseCollector>>,
    size: usize,
    output: Option<TupleId>,
}

#[derive(Debug)]
struct Member {
    key: GroupKey,
    receipt: UndoReceipt,
}

/// Per-group accumulators of a group-by node.
///
/// Membership changes are applied to the accumulators immediately; the group
/// outputs are brought up to date once per flush by [`refresh`](Self::refresh).
#[derive(Debug, Default)]
pub struct GroupMemory {
    groups: HashMap<GroupKey, Group>,
    members: HashMap<TupleId, Member>,
    dirty: HashSet<GroupKey>,
}

impl GroupMemory {
    pub fn size(&self) -> usize {
        self.members.len()
    }

    pub fn group_count(&self) -> usize {
        self.groups.len()
    }

    pub fn has_dirty(&self) -> bool {
        !self.dirty.is_empty()
    }

    pub fn insert(
        &mut self,
        key_fn: Option<&GroupKeyFn>,
        collector: Option<&CollectorSupplier>,
        scheduler: &BatchScheduler,
        input: TupleId,
    ) -> Result<()> {
        let view = scheduler.view(input)?;
        let key_fact = key_fn.map(|f| f(&view)).transpose()?;
        let key = GroupKey(key_fact.clone().map(ValueKey));
        let group = self.groups.entry(key.clone()).or_insert_with(|| Group {
            key_fact: None,
            accumulator: collector.map(CollectorSupplier::create),
            size: 0,
            output: None,
        });
        let receipt = match group.accumulator.as_mut() {
            Some(accumulator) => accumulator.insert(&view)?,
            None => UndoReceipt::Unit,
        };
        group.size += 1;
        if key_fact.is_some() {
            group.key_fact = key_fact;
        }
        self.dirty.insert(key.clone());
        self.members.insert(input, Member { key, receipt });
        Ok(())
    }

    pub fn retract(&mut self, input: TupleId) -> Result<()> {
        let member = self.members.remove(&input).ok_or_else(|| {
            GreynetError::consistency_violation(format!("GroupBy node holds no member {:?}", input))
        })?;
        let group = self.groups.get_mut(&member.key).ok_or_else(|| {
            GreynetError::consistency_violation(format!("group of member {:?} is missing", input))
        })?;
        if let Some(accumulator) = group.accumulator.as_mut() {
            accumulator.retract(member.receipt)?;
        }
        group.size -= 1;
        self.dirty.insert(member.key);
        Ok(())
    }

    /// Membership may move between groups, so an update is retract plus insert.
    pub fn update(
        &mut self,
        key_fn: Option<&GroupKeyFn>,
        collector: Option<&CollectorSupplier>,
        scheduler: &BatchScheduler,
        input: TupleId,
    ) -> Result<()> {
        self.retract(input)?;
        self.insert(key_fn, collector, scheduler, input)
    }

    /// Emits, updates or retracts the output of every group touched since the last refresh.
    pub fn refresh(&mut self, node: NodeId, scheduler: &mut BatchScheduler) -> Result<()> {
        for key in std::mem::take(&mut self.dirty) {
            let Some(group) = self.groups.get_mut(&key) else {
                continue;
            };
            if group.size == 0 {
                if let Some(output) = group.output.take() {
                    scheduler.retract(output)?;
                }
                self.groups.remove(&key);
                continue;
            }

            let facts = group_facts(group);
            match (facts, group.output) {
                (Some(facts), None) => {
                    group.output = Some(scheduler.create(node, facts, TupleSources::None)?);
                }
                (Some(facts), Some(output)) => {
                    if !facts_unchanged(scheduler.facts(output)?, &facts) {
                        scheduler.set_facts(output, facts)?;
                        scheduler.update(output)?;
                    }
                }
                (None, Some(output)) => {
                    group.output = None;
                    scheduler.retract(output)?;
                }
                (None, None) => {}
            }
        }
        Ok(())
    }
}

/// `(key, result)`, `(key)` or `(result)`; `None` when the collector has nothing to report.
fn group_facts(group: &Group) -> Option<TupleFacts> {
    let mut facts = TupleFacts::new();
    if let Some(key) = &group.key_fact {
        facts.push(key.clone());
    }
    if let Some(accumulator) = &group.accumulator {
        facts.push(accumulator.current_value()?);
    }
    Some(facts)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collectors::Collectors;
    use crate::functions::group_key;
    use crate::state::TupleState;
    use slotmap::SlotMap;
    use std::rc::Rc;

    #[derive(Debug)]
    struct Shift {
        id: i64,
        day: i64,
        hours: i64,
    }
    crate::greynet_fact!(Shift, id);

    struct Fixture {
        scheduler: BatchScheduler,
        source: NodeId,
        node: NodeId,
        next_id: i64,
    }

    impl Fixture {
        fn new() -> Self {
            let mut ids: SlotMap<NodeId, ()> = SlotMap::with_key();
            let (source, node) = (ids.insert(()), ids.insert(()));
            let mut scheduler = BatchScheduler::new();
            scheduler.register_node(source);
            scheduler.register_node(node);
            Self { scheduler, source, node, next_id: 0 }
        }

        fn shift(&mut self, day: i64, hours: i64) -> TupleId {
            self.next_id += 1;
            let fact = Rc::new(Shift { id: self.next_id, day, hours }) as FactRef;
            let id = self
                .scheduler
                .create(self.source, smallvec::smallvec![fact], TupleSources::None)
                .unwrap();
            self.scheduler.take_queue(self.source);
            id
        }

        fn outputs(&mut self) -> Vec<(TupleId, TupleState)> {
            let ids = self.scheduler.take_queue(self.node);
            ids.into_iter()
                .map(|id| {
                    let state = self.scheduler.state(id).unwrap();
                    match state {
                        TupleState::Dying | TupleState::Aborting => self.scheduler.release(id),
                        _ => self.scheduler.set_state(id, TupleState::Ok).unwrap(),
                    }
                    (id, state)
                })
                .collect()
        }

        fn result(&self, output: TupleId) -> i64 {
            *self.scheduler.view(output).unwrap().get::<i64>(1).unwrap()
        }
    }

    #[test]
    fn test_group_lifecycle_with_sum() {
        let mut fx = Fixture::new();
        let key = group_key(|t| Ok(Rc::new(t.get::<Shift>(0)?.day) as FactRef));
        let sum = Collectors::sum(|s: &Shift| s.hours);
        let mut memory = GroupMemory::default();

        let a = fx.shift(1, 8);
        let b = fx.shift(1, 4);
        memory.insert(Some(&key), Some(&sum), &fx.scheduler, a).unwrap();
        memory.insert(Some(&key), Some(&sum), &fx.scheduler, b).unwrap();
        memory.refresh(fx.node, &mut fx.scheduler).unwrap();
        let created = fx.outputs();
        assert_eq!(created.len(), 1);
        let output = created[0].0;
        assert_eq!(fx.result(output), 12);

        memory.retract(a).unwrap();
        memory.refresh(fx.node, &mut fx.scheduler).unwrap();
        assert_eq!(fx.outputs(), vec![(output, TupleState::Updating)]);
        assert_eq!(fx.result(output), 4);

        memory.retract(b).unwrap();
        memory.refresh(fx.node, &mut fx.scheduler).unwrap();
        assert_eq!(fx.outputs(), vec![(output, TupleState::Dying)]);
        assert_eq!(memory.group_count(), 0);
    }

    #[test]
    fn test_unchanged_result_is_not_propagated() {
        let mut fx = Fixture::new();
        let mut memory = GroupMemory::default();
        let count = Collectors::count();
        let a = fx.shift(2, 8);
        memory.insert(None, Some(&count), &fx.scheduler, a).unwrap();
        memory.refresh(fx.node, &mut fx.scheduler).unwrap();
        assert_eq!(fx.outputs().len(), 1);

        memory.update(None, Some(&count), &fx.scheduler, a).unwrap();
        memory.refresh(fx.node, &mut fx.scheduler).unwrap();
        assert!(fx.outputs().is_empty());
    }

    #[test]
    fn test_member_moves_between_groups() {
        let mut fx = Fixture::new();
        let key = group_key(|t| Ok(Rc::new(t.get::<Shift>(0)?.day) as FactRef));
        let mut memory = GroupMemory::default();
        let a = fx.shift(1, 8);
        memory.insert(Some(&key), None, &fx.scheduler, a).unwrap();
        memory.refresh(fx.node, &mut fx.scheduler).unwrap();
        fx.outputs();

        let moved = Rc::new(Shift { id: 1, day: 3, hours: 8 }) as FactRef;
        fx.scheduler.set_facts(a, smallvec::smallvec![moved]).unwrap();
        memory.update(Some(&key), None, &fx.scheduler, a).unwrap();
        memory.refresh(fx.node, &mut fx.scheduler).unwrap();
        let states: Vec<TupleState> = fx.outputs().into_iter().map(|(_, s)| s).collect();
        assert_eq!(states.len(), 2);
        assert!(states.contains(&TupleState::Creating));
        assert!(states.contains(&TupleState::Dying));
    }
}
