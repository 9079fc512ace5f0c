//node_memory.rs
//
// Session-side state of every node. The graph itself never changes; all
// mutable operator state lives here, keyed by `NodeId`.
use crate::constraint::ConstraintMemory;
use crate::fact::{facts_unchanged, FactsKey};
use crate::functions::{FactFlattener, TupleMapper, TuplePredicate};
use crate::group_node::GroupMemory;
use crate::join_nodes::{ExistsMemory, JoinMemory};
use crate::node_operations::{InputSide, NodeOperation};
use crate::scheduler::BatchScheduler;
use crate::tuple::{NodeId, TupleFacts, TupleId, TupleSources};
use crate::{GreynetError, Result, Score};
use rustc_hash::{FxHashMap as HashMap, FxHashSet as HashSet};
use smallvec::SmallVec;

#[derive(Debug)]
pub enum NodeMemory<S: Score> {
    Source,
    Filter(FilterMemory),
    Join(JoinMemory),
    Exists(ExistsMemory),
    Group(GroupMemory),
    Map(MapMemory),
    Flatten(FlattenMemory),
    Distinct(DistinctMemory),
    Concat(ConcatMemory),
    Constraint(ConstraintMemory<S>),
}

impl<S: Score> NodeMemory<S> {
    /// Number of input tuples the node currently holds state for.
    pub fn size(&self) -> usize {
        match self {
            NodeMemory::Source => 0,
            NodeMemory::Filter(m) => m.passed.len(),
            NodeMemory::Join(m) => m.size(),
            NodeMemory::Exists(m) => m.size(),
            NodeMemory::Group(m) => m.size(),
            NodeMemory::Map(m) => m.outputs.len(),
            NodeMemory::Flatten(m) => m.outputs.len(),
            NodeMemory::Distinct(m) => m.members.len(),
            NodeMemory::Concat(m) => m.outputs.len(),
            NodeMemory::Constraint(m) => m.match_count(),
        }
    }
}

fn missing_input(node: &str, input: TupleId) -> GreynetError {
    GreynetError::consistency_violation(format!("{} node holds no state for tuple {:?}", node, input))
}

/// Input tuples currently passing the predicate.
#[derive(Debug, Default)]
pub struct FilterMemory {
    passed: HashSet<TupleId>,
}

impl FilterMemory {
    /// Decides what, if anything, the filter forwards for this input.
    pub fn accept(
        &mut self,
        predicate: &TuplePredicate,
        scheduler: &BatchScheduler,
        op: NodeOperation,
        input: TupleId,
    ) -> Result<Option<NodeOperation>> {
        Ok(match op {
            NodeOperation::Insert => {
                if predicate(&scheduler.view(input)?)? {
                    self.passed.insert(input);
                    Some(NodeOperation::Insert)
                } else {
                    None
                }
            }
            NodeOperation::Update => {
                let was = self.passed.contains(&input);
                let now = predicate(&scheduler.view(input)?)?;
                match (was, now) {
                    (true, true) => Some(NodeOperation::Update),
                    (false, true) => {
                        self.passed.insert(input);
                        Some(NodeOperation::Insert)
                    }
                    (true, false) => {
                        self.passed.remove(&input);
                        Some(NodeOperation::Retract)
                    }
                    (false, false) => None,
                }
            }
            NodeOperation::Retract => self.passed.remove(&input).then_some(NodeOperation::Retract),
        })
    }
}

#[derive(Debug, Default)]
pub struct MapMemory {
    outputs: HashMap<TupleId, TupleId>,
}

impl MapMemory {
    pub fn insert(
        &mut self,
        node: NodeId,
        arity: usize,
        mapper: &TupleMapper,
        scheduler: &mut BatchScheduler,
        input: TupleId,
    ) -> Result<()> {
        let facts = Self::map(arity, mapper, scheduler, input)?;
        let output = scheduler.create(node, facts, TupleSources::Single(input))?;
        self.outputs.insert(input, output);
        Ok(())
    }

    pub fn update(
        &mut self,
        arity: usize,
        mapper: &TupleMapper,
        scheduler: &mut BatchScheduler,
        input: TupleId,
    ) -> Result<()> {
        let output = *self.outputs.get(&input).ok_or_else(|| missing_input("Map", input))?;
        let facts = Self::map(arity, mapper, scheduler, input)?;
        if facts_unchanged(scheduler.facts(output)?, &facts) {
            return Ok(());
        }
        scheduler.set_facts(output, facts)?;
        scheduler.update(output)
    }

    pub fn retract(&mut self, scheduler: &mut BatchScheduler, input: TupleId) -> Result<()> {
        let output = self.outputs.remove(&input).ok_or_else(|| missing_input("Map", input))?;
        scheduler.retract(output)
    }

    fn map(arity: usize, mapper: &TupleMapper, scheduler: &BatchScheduler, input: TupleId) -> Result<TupleFacts> {
        let facts = mapper(&scheduler.view(input)?)?;
        if facts.len() != arity {
            return Err(GreynetError::invalid_arity(arity, facts.len()));
        }
        Ok(facts)
    }
}

/// Expands the last fact of each input into one output per item.
#[derive(Debug, Default)]
pub struct FlattenMemory {
    outputs: HashMap<TupleId, SmallVec<[TupleId; 4]>>,
}

impl FlattenMemory {
    pub fn insert(
        &mut self,
        node: NodeId,
        flattener: &FactFlattener,
        scheduler: &mut BatchScheduler,
        input: TupleId,
    ) -> Result<()> {
        let rows: Vec<TupleFacts> = {
            let view = scheduler.view(input)?;
            let prefix = &view.facts()[..view.arity().saturating_sub(1)];
            flattener(view.last()?.as_ref())?
                .into_iter()
                .map(|item| {
                    let mut facts: TupleFacts = prefix.iter().cloned().collect();
                    facts.push(item);
                    facts
                })
                .collect()
        };
        let mut outputs = SmallVec::new();
        for facts in rows {
            outputs.push(scheduler.create(node, facts, TupleSources::Single(input))?);
        }
        self.outputs.insert(input, outputs);
        Ok(())
    }

    pub fn retract(&mut self, scheduler: &mut BatchScheduler, input: TupleId) -> Result<()> {
        let outputs = self.outputs.remove(&input).ok_or_else(|| missing_input("FlattenLast", input))?;
        for output in outputs {
            scheduler.retract(output)?;
        }
        Ok(())
    }
}

#[derive(Debug)]
struct DistinctClass {
    count: usize,
    output: TupleId,
}

/// Collapses inputs with equal facts into a single output.
#[derive(Debug, Default)]
pub struct DistinctMemory {
    classes: HashMap<FactsKey, DistinctClass>,
    members: HashMap<TupleId, FactsKey>,
}

impl DistinctMemory {
    pub fn insert(&mut self, node: NodeId, scheduler: &mut BatchScheduler, input: TupleId) -> Result<()> {
        let key = FactsKey(scheduler.facts(input)?.clone());
        match self.classes.get_mut(&key) {
            Some(class) => class.count += 1,
            None => {
                let output = scheduler.create(node, key.0.clone(), TupleSources::Single(input))?;
                self.classes.insert(key.clone(), DistinctClass { count: 1, output });
            }
        }
        self.members.insert(input, key);
        Ok(())
    }

    pub fn update(&mut self, node: NodeId, scheduler: &mut BatchScheduler, input: TupleId) -> Result<()> {
        let old = self.members.get(&input).ok_or_else(|| missing_input("Distinct", input))?;
        let facts = scheduler.facts(input)?.clone();
        if FactsKey(facts.clone()) == *old {
            let class = self.classes.get(old).ok_or_else(|| missing_input("Distinct", input))?;
            let output = class.output;
            if !facts_unchanged(scheduler.facts(output)?, &facts) {
                scheduler.set_facts(output, facts)?;
                scheduler.update(output)?;
            }
            return Ok(());
        }
        self.retract(scheduler, input)?;
        self.insert(node, scheduler, input)
    }

    pub fn retract(&mut self, scheduler: &mut BatchScheduler, input: TupleId) -> Result<()> {
        let key = self.members.remove(&input).ok_or_else(|| missing_input("Distinct", input))?;
        let class = self.classes.get_mut(&key).ok_or_else(|| missing_input("Distinct", input))?;
        class.count -= 1;
        if class.count == 0 {
            let output = class.output;
            self.classes.remove(&key);
            scheduler.retract(output)?;
        }
        Ok(())
    }
}

/// Bag union of two streams of equal arity.
#[derive(Debug, Default)]
pub struct ConcatMemory {
    outputs: HashMap<(InputSide, TupleId), TupleId>,
}

impl ConcatMemory {
    pub fn insert(&mut self, node: NodeId, scheduler: &mut BatchScheduler, side: InputSide, input: TupleId) -> Result<()> {
        let facts = scheduler.facts(input)?.clone();
        let output = scheduler.create(node, facts, TupleSources::Single(input))?;
        self.outputs.insert((side, input), output);
        Ok(())
    }

    pub fn update(&mut self, scheduler: &mut BatchScheduler, side: InputSide, input: TupleId) -> Result<()> {
        let output = *self
            .outputs
            .get(&(side, input))
            .ok_or_else(|| missing_input("Concat", input))?;
        let facts = scheduler.facts(input)?.clone();
        scheduler.set_facts(output, facts)?;
        scheduler.update(output)
    }

    pub fn retract(&mut self, scheduler: &mut BatchScheduler, side: InputSide, input: TupleId) -> Result<()> {
        let output = self
            .outputs
            .remove(&(side, input))
            .ok_or_else(|| missing_input("Concat", input))?;
        scheduler.retract(output)
    }
}
