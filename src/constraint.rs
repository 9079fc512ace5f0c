// constraint.rs

use crate::fact::FactRef;
use crate::functions::{Indicter, MatchWeigher};
use crate::tuple::{TupleId, TupleView};
use crate::{GreynetError, Result, Score};
use rustc_hash::FxHashMap as HashMap;
use std::fmt;

pub const DEFAULT_CONSTRAINT_PACKAGE: &str = "default";

/// Fully qualified constraint name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConstraintId {
    pub package: String,
    pub name: String,
}

impl ConstraintId {
    pub fn new(package: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            package: package.into(),
            name: name.into(),
        }
    }

    pub fn of(name: impl Into<String>) -> Self {
        Self::new(DEFAULT_CONSTRAINT_PACKAGE, name)
    }
}

impl fmt::Display for ConstraintId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.package, self.name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ImpactType {
    Penalty,
    Reward,
}

impl ImpactType {
    pub fn sign(self) -> i64 {
        match self {
            ImpactType::Penalty => -1,
            ImpactType::Reward => 1,
        }
    }
}

/// Definition of a constraint leaf.
#[derive(Clone)]
pub struct ConstraintDef<S: Score> {
    pub id: ConstraintId,
    pub weight: S,
    pub impact: ImpactType,
    pub weigher: Option<MatchWeigher>,
    pub indicter: Option<Indicter>,
}

impl<S: Score> ConstraintDef<S> {
    pub fn match_weight(&self, tuple: &TupleView) -> Result<i64> {
        match &self.weigher {
            Some(weigher) => weigher(tuple),
            None => Ok(1),
        }
    }

    /// `weight × match_weight × sign`
    pub fn impact(&self, weight: S, match_weight: i64) -> Result<S> {
        match_weight
            .checked_mul(self.impact.sign())
            .and_then(|scalar| weight.checked_multiply(scalar))
            .ok_or_else(|| {
                GreynetError::overflow(format!(
                    "constraint {}: weight {} times match weight {}",
                    self.id, weight, match_weight
                ))
            })
    }

    /// Facts blamed for a match; by default every fact of the tuple.
    pub fn indicted_facts(&self, tuple: &TupleView) -> Result<Vec<FactRef>> {
        match &self.indicter {
            Some(indicter) => indicter(tuple),
            None => Ok(tuple.facts().to_vec()),
        }
    }
}

impl<S: Score> fmt::Debug for ConstraintDef<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConstraintDef")
            .field("id", &self.id)
            .field("weight", &self.weight)
            .field("impact", &self.impact)
            .field("weighted", &self.weigher.is_some())
            .finish()
    }
}

#[derive(Debug, Clone, Copy)]
pub struct MatchEntry<S: Score> {
    pub match_weight: i64,
    pub score: S,
}

/// Session state of one constraint leaf: its matches and running total.
#[derive(Debug)]
pub struct ConstraintMemory<S: Score> {
    weight: S,
    matches: HashMap<TupleId, MatchEntry<S>>,
    total: S,
}

impl<S: Score> ConstraintMemory<S> {
    pub fn new(weight: S) -> Self {
        Self {
            weight,
            matches: HashMap::default(),
            total: S::null_score(),
        }
    }

    pub fn insert(&mut self, def: &ConstraintDef<S>, id: TupleId, tuple: &TupleView) -> Result<()> {
        let match_weight = def.match_weight(tuple)?;
        let score = def.impact(self.weight, match_weight)?;
        if self.matches.contains_key(&id) {
            return Err(GreynetError::consistency_violation(format!(
                "constraint {} matched tuple {:?} twice",
                def.id, id
            )));
        }
        self.total = self
            .total
            .checked_add(&score)
            .ok_or_else(|| total_overflow(def))?;
        self.matches.insert(id, MatchEntry { match_weight, score });
        Ok(())
    }

    pub fn update(&mut self, def: &ConstraintDef<S>, id: TupleId, tuple: &TupleView) -> Result<()> {
        self.retract(def, id)?;
        self.insert(def, id, tuple)
    }

    pub fn retract(&mut self, def: &ConstraintDef<S>, id: TupleId) -> Result<()> {
        let entry = self.matches.remove(&id).ok_or_else(|| {
            GreynetError::consistency_violation(format!(
                "constraint {} has no match for tuple {:?}",
                def.id, id
            ))
        })?;
        self.total = self
            .total
            .checked_sub(&entry.score)
            .ok_or_else(|| total_overflow(def))?;
        Ok(())
    }

    /// Replaces the weight and recomputes every match from its stored match weight.
    ///
    /// On overflow nothing changes.
    pub fn set_weight(&mut self, def: &ConstraintDef<S>, weight: S) -> Result<()> {
        let mut rescored = Vec::with_capacity(self.matches.len());
        let mut total = S::null_score();
        for (id, entry) in &self.matches {
            let score = def.impact(weight, entry.match_weight)?;
            total = total.checked_add(&score).ok_or_else(|| total_overflow(def))?;
            rescored.push((*id, score));
        }
        for (id, score) in rescored {
            if let Some(entry) = self.matches.get_mut(&id) {
                entry.score = score;
            }
        }
        self.weight = weight;
        self.total = total;
        Ok(())
    }

    pub fn weight(&self) -> S {
        self.weight
    }

    pub fn total(&self) -> S {
        self.total
    }

    pub fn match_count(&self) -> usize {
        self.matches.len()
    }

    pub fn matches(&self) -> impl Iterator<Item = (TupleId, &MatchEntry<S>)> {
        self.matches.iter().map(|(id, entry)| (*id, entry))
    }

    pub fn clear(&mut self) {
        self.matches.clear();
        self.total = S::null_score();
    }
}

fn total_overflow<S: Score>(def: &ConstraintDef<S>) -> GreynetError {
    GreynetError::overflow(format!("total of constraint {}", def.id))
}
