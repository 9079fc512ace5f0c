//join_nodes.rs
use crate::indexer::{Indexer, IndexerKey};
use crate::joiner::JoinerSet;
use crate::node_operations::InputSide;
use crate::scheduler::BatchScheduler;
use crate::tuple::{NodeId, TupleFacts, TupleId, TupleSources, TupleView};
use crate::{GreynetError, Result};
use rustc_hash::{FxHashMap as HashMap, FxHashSet as HashSet};

fn side_key(joiners: &JoinerSet, side: InputSide, tuple: &TupleView) -> Result<IndexerKey> {
    match side {
        InputSide::Right => joiners.right_key(tuple),
        _ => joiners.left_key(tuple),
    }
}

fn unknown_tuple(node: &str, id: TupleId) -> GreynetError {
    GreynetError::consistency_violation(format!("{} node does not hold tuple {:?}", node, id))
}

/// One side of a join: its index and the outputs each of its tuples takes part in.
#[derive(Debug, Default)]
struct JoinSide {
    index: Indexer,
    keys: HashMap<TupleId, IndexerKey>,
    outputs: HashMap<TupleId, HashSet<TupleId>>,
}

/// Index-based equality join with optional filtering joiners.
#[derive(Debug, Default)]
pub struct JoinMemory {
    left: JoinSide,
    right: JoinSide,
}

impl JoinMemory {
    pub fn size(&self) -> usize {
        self.left.keys.len() + self.right.keys.len()
    }

    pub fn output_count(&self) -> usize {
        self.left.outputs.values().map(HashSet::len).sum()
    }

    fn sides(&mut self, side: InputSide) -> (&mut JoinSide, &mut JoinSide) {
        match side {
            InputSide::Right => (&mut self.right, &mut self.left),
            _ => (&mut self.left, &mut self.right),
        }
    }

    fn orient(side: InputSide, input: TupleId, other: TupleId) -> (TupleId, TupleId) {
        match side {
            InputSide::Right => (other, input),
            _ => (input, other),
        }
    }

    /// Facts of the joined pair, or `None` when a filtering joiner rejects it.
    fn joined_facts(
        joiners: &JoinerSet,
        scheduler: &BatchScheduler,
        left: TupleId,
        right: TupleId,
    ) -> Result<Option<TupleFacts>> {
        let (l, r) = (scheduler.view(left)?, scheduler.view(right)?);
        if !joiners.test(&l, &r)? {
            return Ok(None);
        }
        Ok(Some(l.facts().iter().chain(r.facts()).cloned().collect()))
    }

    fn create_pair(
        &mut self,
        node: NodeId,
        scheduler: &mut BatchScheduler,
        left: TupleId,
        right: TupleId,
        facts: TupleFacts,
    ) -> Result<()> {
        let output = scheduler.create(node, facts, TupleSources::Pair(left, right))?;
        self.left.outputs.entry(left).or_default().insert(output);
        self.right.outputs.entry(right).or_default().insert(output);
        Ok(())
    }

    fn retract_output(&mut self, side: InputSide, scheduler: &mut BatchScheduler, output: TupleId) -> Result<()> {
        let partner = match (side, scheduler.sources(output)?) {
            (InputSide::Right, TupleSources::Pair(left, _)) => left,
            (_, TupleSources::Pair(_, right)) => right,
            (_, sources) => {
                return Err(GreynetError::consistency_violation(format!(
                    "join output {:?} has sources {:?}",
                    output, sources
                )))
            }
        };
        let (_, other) = self.sides(side);
        if let Some(outputs) = other.outputs.get_mut(&partner) {
            outputs.remove(&output);
        }
        scheduler.retract(output)
    }

    pub fn insert(
        &mut self,
        node: NodeId,
        joiners: &JoinerSet,
        scheduler: &mut BatchScheduler,
        side: InputSide,
        input: TupleId,
    ) -> Result<()> {
        let key = side_key(joiners, side, &scheduler.view(input)?)?;
        let (own, other) = self.sides(side);
        let candidates: Vec<TupleId> = other.index.matches(&key).collect();
        own.index.put(key.clone(), input);
        own.keys.insert(input, key);
        own.outputs.entry(input).or_default();

        for candidate in candidates {
            let (left, right) = Self::orient(side, input, candidate);
            if let Some(facts) = Self::joined_facts(joiners, scheduler, left, right)? {
                self.create_pair(node, scheduler, left, right, facts)?;
            }
        }
        Ok(())
    }

    pub fn update(
        &mut self,
        node: NodeId,
        joiners: &JoinerSet,
        scheduler: &mut BatchScheduler,
        side: InputSide,
        input: TupleId,
    ) -> Result<()> {
        let key = side_key(joiners, side, &scheduler.view(input)?)?;
        let (own, other) = self.sides(side);
        let old_key = own.keys.get(&input).ok_or_else(|| unknown_tuple("Join", input))?;
        if *old_key != key {
            self.retract(scheduler, side, input)?;
            return self.insert(node, joiners, scheduler, side, input);
        }

        // Same bucket: only the filtering joiners can change the outcome.
        let mut existing: HashMap<TupleId, TupleId> = HashMap::default();
        for &output in own.outputs.get(&input).into_iter().flatten() {
            let partner = match (side, scheduler.sources(output)?) {
                (InputSide::Right, TupleSources::Pair(left, _)) => left,
                (_, TupleSources::Pair(_, right)) => right,
                _ => continue,
            };
            existing.insert(partner, output);
        }
        let candidates: Vec<TupleId> = other.index.matches(&key).collect();

        for candidate in candidates {
            let (left, right) = Self::orient(side, input, candidate);
            let facts = Self::joined_facts(joiners, scheduler, left, right)?;
            match (facts, existing.remove(&candidate)) {
                (Some(facts), Some(output)) => {
                    scheduler.set_facts(output, facts)?;
                    scheduler.update(output)?;
                }
                (Some(facts), None) => self.create_pair(node, scheduler, left, right, facts)?,
                (None, Some(output)) => {
                    if let Some(outputs) = self.sides(side).0.outputs.get_mut(&input) {
                        outputs.remove(&output);
                    }
                    self.retract_output(side, scheduler, output)?;
                }
                (None, None) => {}
            }
        }
        for (_, output) in existing {
            if let Some(outputs) = self.sides(side).0.outputs.get_mut(&input) {
                outputs.remove(&output);
            }
            self.retract_output(side, scheduler, output)?;
        }
        Ok(())
    }

    pub fn retract(&mut self, scheduler: &mut BatchScheduler, side: InputSide, input: TupleId) -> Result<()> {
        let (own, _) = self.sides(side);
        let key = own.keys.remove(&input).ok_or_else(|| unknown_tuple("Join", input))?;
        own.index.remove(&key, input);
        let outputs = own.outputs.remove(&input).unwrap_or_default();
        for output in outputs {
            self.retract_output(side, scheduler, output)?;
        }
        Ok(())
    }
}

#[derive(Debug, Default)]
struct ExistsCounter {
    matches: HashSet<TupleId>,
    output: Option<TupleId>,
}

/// State of an `if_exists` / `if_not_exists` node.
///
/// Right-side changes only mark the affected left tuples dirty; whether a
/// left tuple passes is settled once per flush, in [`refresh`](Self::refresh).
#[derive(Debug, Default)]
pub struct ExistsMemory {
    left_index: Indexer,
    right_index: Indexer,
    left_keys: HashMap<TupleId, IndexerKey>,
    right_keys: HashMap<TupleId, IndexerKey>,
    counters: HashMap<TupleId, ExistsCounter>,
    right_lefts: HashMap<TupleId, HashSet<TupleId>>,
    dirty: HashSet<TupleId>,
}

impl ExistsMemory {
    pub fn size(&self) -> usize {
        self.left_keys.len() + self.right_keys.len()
    }

    pub fn has_dirty(&self) -> bool {
        !self.dirty.is_empty()
    }

    fn find_matches(
        &mut self,
        joiners: &JoinerSet,
        scheduler: &BatchScheduler,
        left: TupleId,
        key: &IndexerKey,
    ) -> Result<HashSet<TupleId>> {
        let view = scheduler.view(left)?;
        let mut matches = HashSet::default();
        for right in self.right_index.matches(key) {
            if joiners.test(&view, &scheduler.view(right)?)? {
                matches.insert(right);
            }
        }
        for right in &matches {
            self.right_lefts.entry(*right).or_default().insert(left);
        }
        Ok(matches)
    }

    fn forget_matches(&mut self, left: TupleId, matches: &HashSet<TupleId>) {
        for right in matches {
            if let Some(lefts) = self.right_lefts.get_mut(right) {
                lefts.remove(&left);
                if lefts.is_empty() {
                    self.right_lefts.remove(right);
                }
            }
        }
    }

    pub fn insert_left(&mut self, joiners: &JoinerSet, scheduler: &BatchScheduler, left: TupleId) -> Result<()> {
        let key = joiners.left_key(&scheduler.view(left)?)?;
        let matches = self.find_matches(joiners, scheduler, left, &key)?;
        self.left_index.put(key.clone(), left);
        self.left_keys.insert(left, key);
        self.counters.insert(left, ExistsCounter { matches, output: None });
        self.dirty.insert(left);
        Ok(())
    }

    pub fn update_left(&mut self, joiners: &JoinerSet, scheduler: &mut BatchScheduler, left: TupleId) -> Result<()> {
        let key = joiners.left_key(&scheduler.view(left)?)?;
        let old_key = self.left_keys.insert(left, key.clone()).ok_or_else(|| unknown_tuple("Exists", left))?;
        if old_key != key {
            self.left_index.remove(&old_key, left);
            self.left_index.put(key.clone(), left);
        }
        let old = self.counters.get_mut(&left).ok_or_else(|| unknown_tuple("Exists", left))?;
        let old_matches = std::mem::take(&mut old.matches);
        self.forget_matches(left, &old_matches);
        let matches = self.find_matches(joiners, scheduler, left, &key)?;

        let counter = self.counters.get_mut(&left).ok_or_else(|| unknown_tuple("Exists", left))?;
        counter.matches = matches;
        if let Some(output) = counter.output {
            let facts = scheduler.facts(left)?.clone();
            scheduler.set_facts(output, facts)?;
            scheduler.update(output)?;
        }
        self.dirty.insert(left);
        Ok(())
    }

    pub fn retract_left(&mut self, scheduler: &mut BatchScheduler, left: TupleId) -> Result<()> {
        let key = self.left_keys.remove(&left).ok_or_else(|| unknown_tuple("Exists", left))?;
        self.left_index.remove(&key, left);
        self.dirty.remove(&left);
        if let Some(counter) = self.counters.remove(&left) {
            self.forget_matches(left, &counter.matches);
            if let Some(output) = counter.output {
                scheduler.retract(output)?;
            }
        }
        Ok(())
    }

    pub fn insert_right(&mut self, joiners: &JoinerSet, scheduler: &BatchScheduler, right: TupleId) -> Result<()> {
        let key = joiners.right_key(&scheduler.view(right)?)?;
        let view = scheduler.view(right)?;
        let mut lefts = HashSet::default();
        for left in self.left_index.matches(&key) {
            if joiners.test(&scheduler.view(left)?, &view)? {
                lefts.insert(left);
            }
        }
        for left in &lefts {
            if let Some(counter) = self.counters.get_mut(left) {
                counter.matches.insert(right);
            }
            self.dirty.insert(*left);
        }
        if !lefts.is_empty() {
            self.right_lefts.insert(right, lefts);
        }
        self.right_index.put(key.clone(), right);
        self.right_keys.insert(right, key);
        Ok(())
    }

    pub fn update_right(&mut self, joiners: &JoinerSet, scheduler: &BatchScheduler, right: TupleId) -> Result<()> {
        self.retract_right(right)?;
        self.insert_right(joiners, scheduler, right)
    }

    pub fn retract_right(&mut self, right: TupleId) -> Result<()> {
        let key = self.right_keys.remove(&right).ok_or_else(|| unknown_tuple("Exists", right))?;
        self.right_index.remove(&key, right);
        for left in self.right_lefts.remove(&right).unwrap_or_default() {
            if let Some(counter) = self.counters.get_mut(&left) {
                counter.matches.remove(&right);
            }
            self.dirty.insert(left);
        }
        Ok(())
    }

    /// Creates or retracts the output of every dirty left tuple.
    pub fn refresh(&mut self, node: NodeId, should_exist: bool, scheduler: &mut BatchScheduler) -> Result<()> {
        for left in std::mem::take(&mut self.dirty) {
            let Some(counter) = self.counters.get_mut(&left) else {
                continue;
            };
            let passes = !counter.matches.is_empty() == should_exist;
            match (passes, counter.output) {
                (true, None) => {
                    let facts = scheduler.facts(left)?.clone();
                    counter.output = Some(scheduler.create(node, facts, TupleSources::Single(left))?);
                }
                (false, Some(output)) => {
                    counter.output = None;
                    scheduler.retract(output)?;
                }
                _ => {}
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fact::FactRef;
    use crate::joiner::Joiners;
    use crate::state::TupleState;
    use slotmap::SlotMap;
    use std::rc::Rc;

    struct Fixture {
        scheduler: BatchScheduler,
        source: NodeId,
        node: NodeId,
    }

    impl Fixture {
        fn new() -> Self {
            let mut ids: SlotMap<NodeId, ()> = SlotMap::with_key();
            let (source, node) = (ids.insert(()), ids.insert(()));
            let mut scheduler = BatchScheduler::new();
            scheduler.register_node(source);
            scheduler.register_node(node);
            Self { scheduler, source, node }
        }

        fn tuple(&mut self, value: i64) -> TupleId {
            let id = self
                .scheduler
                .create(self.source, smallvec::smallvec![Rc::new(value) as FactRef], TupleSources::None)
                .unwrap();
            self.scheduler.set_state(id, TupleState::Ok).unwrap();
            self.scheduler.take_queue(self.source);
            id
        }

        fn settle(&mut self) -> Vec<TupleId> {
            let ids = self.scheduler.take_queue(self.node);
            for id in &ids {
                match self.scheduler.state(*id).unwrap() {
                    TupleState::Aborting | TupleState::Dying => self.scheduler.release(*id),
                    _ => self.scheduler.set_state(*id, TupleState::Ok).unwrap(),
                }
            }
            ids
        }
    }

    fn by_value() -> JoinerSet {
        JoinerSet::new(vec![Joiners::equal_by(|v: &i64| v % 10)])
    }

    #[test]
    fn test_join_pairs_follow_keys() {
        let mut fx = Fixture::new();
        let joiners = by_value();
        let mut join = JoinMemory::default();
        let (l1, r1, r2) = (fx.tuple(1), fx.tuple(11), fx.tuple(12));

        join.insert(fx.node, &joiners, &mut fx.scheduler, InputSide::Right, r1).unwrap();
        join.insert(fx.node, &joiners, &mut fx.scheduler, InputSide::Right, r2).unwrap();
        join.insert(fx.node, &joiners, &mut fx.scheduler, InputSide::Left, l1).unwrap();
        let created = fx.settle();
        assert_eq!(created.len(), 1);
        assert_eq!(
            fx.scheduler.sources(created[0]).unwrap(),
            TupleSources::Pair(l1, r1)
        );

        // Moving r2 into l1's bucket creates the second pair.
        fx.scheduler.set_facts(r2, smallvec::smallvec![Rc::new(21i64) as FactRef]).unwrap();
        join.update(fx.node, &joiners, &mut fx.scheduler, InputSide::Right, r2).unwrap();
        assert_eq!(fx.settle().len(), 1);
        assert_eq!(join.output_count(), 2);

        join.retract(&mut fx.scheduler, InputSide::Left, l1).unwrap();
        assert_eq!(join.output_count(), 0);
        assert_eq!(fx.settle().len(), 2);
        assert_eq!(fx.scheduler.tuple_count(), 3);
    }

    #[test]
    fn test_join_same_key_update_rechecks_filters() {
        let mut fx = Fixture::new();
        let joiners = JoinerSet::new(vec![
            Joiners::equal_by(|v: &i64| v % 10),
            Joiners::less_than(|l: &i64| *l, |r: &i64| *r),
        ]);
        let mut join = JoinMemory::default();
        let (l, r) = (fx.tuple(1), fx.tuple(11));

        join.insert(fx.node, &joiners, &mut fx.scheduler, InputSide::Left, l).unwrap();
        join.insert(fx.node, &joiners, &mut fx.scheduler, InputSide::Right, r).unwrap();
        let pair = fx.settle()[0];

        fx.scheduler.set_facts(l, smallvec::smallvec![Rc::new(21i64) as FactRef]).unwrap();
        join.update(fx.node, &joiners, &mut fx.scheduler, InputSide::Left, l).unwrap();
        assert_eq!(fx.scheduler.state(pair).unwrap(), TupleState::Dying);
        assert_eq!(join.output_count(), 0);
    }

    #[test]
    fn test_exists_counts_matches_per_left() {
        let mut fx = Fixture::new();
        let joiners = by_value();
        let mut exists = ExistsMemory::default();
        let (l, r1, r2) = (fx.tuple(3), fx.tuple(13), fx.tuple(23));

        exists.insert_left(&joiners, &fx.scheduler, l).unwrap();
        exists.refresh(fx.node, true, &mut fx.scheduler).unwrap();
        assert!(fx.settle().is_empty());

        exists.insert_right(&joiners, &fx.scheduler, r1).unwrap();
        exists.insert_right(&joiners, &fx.scheduler, r2).unwrap();
        exists.refresh(fx.node, true, &mut fx.scheduler).unwrap();
        let output = fx.settle();
        assert_eq!(output.len(), 1);

        exists.retract_right(r1).unwrap();
        exists.refresh(fx.node, true, &mut fx.scheduler).unwrap();
        assert_eq!(fx.scheduler.state(output[0]).unwrap(), TupleState::Ok);

        exists.retract_right(r2).unwrap();
        exists.refresh(fx.node, true, &mut fx.scheduler).unwrap();
        assert_eq!(fx.scheduler.state(output[0]).unwrap(), TupleState::Dying);
    }

    #[test]
    fn test_not_exists_flip_within_one_round_aborts() {
        let mut fx = Fixture::new();
        let joiners = by_value();
        let mut exists = ExistsMemory::default();
        let (l, r) = (fx.tuple(4), fx.tuple(14));

        exists.insert_left(&joiners, &fx.scheduler, l).unwrap();
        exists.insert_right(&joiners, &fx.scheduler, r).unwrap();
        exists.retract_right(r).unwrap();
        exists.insert_right(&joiners, &fx.scheduler, r).unwrap();
        exists.refresh(fx.node, false, &mut fx.scheduler).unwrap();
        assert!(fx.settle().is_empty());
    }
}
