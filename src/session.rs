//session.rs
use crate::analysis::{ConstraintMatch, ConstraintMatchTotal, Indictment, NetworkStatistics, ScoreExplanation};
use crate::config::{EnvironmentMode, PropagationMode, SessionConfig};
use crate::constraint::ConstraintId;
use crate::fact::{FactKey, FactRef};
use crate::graph::ConstraintGraph;
use crate::network::Network;
use crate::nodes::NodeKind;
use crate::tuple::{NodeId, TupleId};
use crate::{GreynetError, GreynetFact, Result, Score};
use rustc_hash::{FxHashMap as HashMap, FxHashSet as HashSet};
use smallvec::SmallVec;
use std::any::TypeId;
use std::rc::Rc;
use std::sync::Arc;
use tracing::{debug, trace, warn};

#[derive(Debug)]
struct SourceFact {
    fact: FactRef,
    /// One entry per source node of the fact's type; `None` while the fact is hidden there.
    tuples: SmallVec<[(NodeId, Option<TupleId>); 2]>,
}

/// Working memory over one [`ConstraintGraph`].
///
/// Fact changes are queued and propagated on [`flush`](Self::flush), which
/// [`calculate_score`](Self::calculate_score) performs first. A propagation
/// failure poisons the session: the error is returned once and every later
/// call fails with [`GreynetError::SessionPoisoned`].
#[derive(Debug)]
pub struct Session<S: Score> {
    graph: Arc<ConstraintGraph<S>>,
    network: Network<S>,
    facts: HashMap<FactKey, SourceFact>,
    config: SessionConfig,
    weight_overrides: HashMap<ConstraintId, S>,
    poisoned: bool,
}

fn is_visible<S: Score>(graph: &ConstraintGraph<S>, node: NodeId, fact: &FactRef) -> Result<bool> {
    match &graph.node(node)?.kind {
        NodeKind::ForEach { include_unassigned: true, .. } => Ok(true),
        NodeKind::ForEach { visibility: Some(predicate), .. } => predicate(fact.as_ref()),
        _ => Ok(true),
    }
}

fn fact_key_of<T: GreynetFact>(id: i64) -> FactKey {
    FactKey {
        type_id: TypeId::of::<T>(),
        id,
    }
}

fn apply_weights<S: Score>(
    network: &mut Network<S>,
    graph: &ConstraintGraph<S>,
    overrides: &HashMap<ConstraintId, S>,
) -> Result<()> {
    for (id, weight) in overrides {
        let node = graph.constraint_node(id)?;
        let def = graph.constraint_def(node)?;
        if let Some(memory) = network.constraint_memory_mut(node) {
            memory.set_weight(def, *weight)?;
        }
    }
    Ok(())
}

impl<S: Score> Session<S> {
    pub(crate) fn new(graph: Arc<ConstraintGraph<S>>, config: SessionConfig) -> Self {
        let network = Network::new(&graph, config.limits.clone());
        debug!(
            event = "session_created",
            nodes = graph.node_count(),
            constraints = graph.constraints().len(),
            mode = ?config.environment_mode
        );
        Self {
            graph,
            network,
            facts: HashMap::default(),
            config,
            weight_overrides: HashMap::default(),
            poisoned: false,
        }
    }

    pub fn graph(&self) -> &Arc<ConstraintGraph<S>> {
        &self.graph
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn is_poisoned(&self) -> bool {
        self.poisoned
    }

    fn check_poisoned(&self) -> Result<()> {
        if self.poisoned {
            return Err(GreynetError::SessionPoisoned);
        }
        Ok(())
    }

    fn guard<T>(&mut self, result: Result<T>) -> Result<T> {
        if let Err(error) = &result {
            if error.poisons_session() {
                self.poisoned = true;
                warn!(event = "session_poisoned", error = %error);
            }
        }
        result
    }

    fn after_change(&mut self) -> Result<()> {
        if self.config.propagation == PropagationMode::Immediate {
            self.flush()?;
        }
        Ok(())
    }

    // Fact lifecycle

    pub fn insert<T: GreynetFact>(&mut self, fact: T) -> Result<()> {
        self.insert_fact(Rc::new(fact))
    }

    /// Inserts a shared fact. Its type and id must not be in the session yet.
    pub fn insert_fact(&mut self, fact: FactRef) -> Result<()> {
        self.insert_all(vec![fact])
    }

    pub fn insert_batch<T, I>(&mut self, facts: I) -> Result<()>
    where
        T: GreynetFact,
        I: IntoIterator<Item = T>,
    {
        self.insert_all(facts.into_iter().map(|f| Rc::new(f) as FactRef).collect())
    }

    fn insert_all(&mut self, facts: Vec<FactRef>) -> Result<()> {
        self.check_poisoned()?;
        let mut seen: HashSet<FactKey> = HashSet::default();
        for fact in &facts {
            let key = FactKey::of(fact.as_ref());
            if self.facts.contains_key(&key) || !seen.insert(key) {
                return Err(GreynetError::duplicate_fact(fact.type_name(), key.id));
            }
        }
        self.config.limits.check_fact_limit(self.facts.len() + facts.len())?;

        let result = facts.into_iter().try_for_each(|fact| self.attach(fact));
        self.guard(result)?;
        self.after_change()
    }

    fn attach(&mut self, fact: FactRef) -> Result<()> {
        let key = FactKey::of(fact.as_ref());
        let mut tuples = SmallVec::new();
        for &node in self.graph.sources_for(key.type_id) {
            let tuple = if is_visible(&self.graph, node, &fact)? {
                Some(self.network.insert_source(node, Rc::clone(&fact))?)
            } else {
                None
            };
            tuples.push((node, tuple));
        }
        self.facts.insert(key, SourceFact { fact, tuples });
        Ok(())
    }

    /// Replaces the fact with the same type and id by `fact`.
    pub fn update<T: GreynetFact>(&mut self, fact: T) -> Result<()> {
        self.update_fact(Rc::new(fact))
    }

    pub fn update_fact(&mut self, fact: FactRef) -> Result<()> {
        self.update_all(vec![fact])
    }

    pub fn update_batch<T, I>(&mut self, facts: I) -> Result<()>
    where
        T: GreynetFact,
        I: IntoIterator<Item = T>,
    {
        self.update_all(facts.into_iter().map(|f| Rc::new(f) as FactRef).collect())
    }

    fn update_all(&mut self, facts: Vec<FactRef>) -> Result<()> {
        self.check_poisoned()?;
        for fact in &facts {
            let key = FactKey::of(fact.as_ref());
            if !self.facts.contains_key(&key) {
                return Err(GreynetError::fact_not_found(fact.type_name(), key.id));
            }
        }
        let result = facts.into_iter().try_for_each(|fact| self.refresh(fact));
        self.guard(result)?;
        self.after_change()
    }

    fn refresh(&mut self, fact: FactRef) -> Result<()> {
        let key = FactKey::of(fact.as_ref());
        let entry = self
            .facts
            .get_mut(&key)
            .ok_or_else(|| GreynetError::fact_not_found(fact.type_name(), key.id))?;
        for (node, tuple) in entry.tuples.iter_mut() {
            let visible = is_visible(&self.graph, *node, &fact)?;
            match (*tuple, visible) {
                (Some(id), true) => self.network.update_source(id, Rc::clone(&fact))?,
                (Some(id), false) => {
                    self.network.retract_source(id)?;
                    *tuple = None;
                }
                (None, true) => *tuple = Some(self.network.insert_source(*node, Rc::clone(&fact))?),
                (None, false) => {}
            }
        }
        entry.fact = fact;
        Ok(())
    }

    /// Retracts the fact with the same type and id as `fact`.
    pub fn retract<T: GreynetFact>(&mut self, fact: &T) -> Result<()> {
        self.retract_keys(vec![(fact_key_of::<T>(fact.fact_id()), std::any::type_name::<T>())])
    }

    pub fn retract_by_id<T: GreynetFact>(&mut self, id: i64) -> Result<()> {
        self.retract_keys(vec![(fact_key_of::<T>(id), std::any::type_name::<T>())])
    }

    pub fn retract_fact(&mut self, fact: &FactRef) -> Result<()> {
        self.retract_keys(vec![(FactKey::of(fact.as_ref()), fact.type_name())])
    }

    pub fn retract_batch<'a, T, I>(&mut self, facts: I) -> Result<()>
    where
        T: GreynetFact,
        I: IntoIterator<Item = &'a T>,
    {
        let keys = facts
            .into_iter()
            .map(|f| (fact_key_of::<T>(f.fact_id()), std::any::type_name::<T>()))
            .collect();
        self.retract_keys(keys)
    }

    fn retract_keys(&mut self, keys: Vec<(FactKey, &'static str)>) -> Result<()> {
        self.check_poisoned()?;
        let mut seen: HashSet<FactKey> = HashSet::default();
        for (key, type_name) in &keys {
            if !self.facts.contains_key(key) || !seen.insert(*key) {
                return Err(GreynetError::fact_not_found(*type_name, key.id));
            }
        }
        let result = keys.into_iter().try_for_each(|(key, _)| self.detach(key));
        self.guard(result)?;
        self.after_change()
    }

    fn detach(&mut self, key: FactKey) -> Result<()> {
        let Some(entry) = self.facts.remove(&key) else {
            return Ok(());
        };
        for (_, tuple) in entry.tuples {
            if let Some(id) = tuple {
                self.network.retract_source(id)?;
            }
        }
        Ok(())
    }

    pub fn contains<T: GreynetFact>(&self, id: i64) -> bool {
        self.facts.contains_key(&fact_key_of::<T>(id))
    }

    /// Current version of a fact in the session.
    pub fn fact<T: GreynetFact>(&self, id: i64) -> Option<&T> {
        self.facts
            .get(&fact_key_of::<T>(id))
            .and_then(|entry| entry.fact.as_any().downcast_ref::<T>())
    }

    // Propagation and scoring

    /// Propagates every queued change. Returns the number of tuples processed.
    pub fn flush(&mut self) -> Result<usize> {
        self.check_poisoned()?;
        let result = self.network.flush(&self.graph);
        self.guard(result)
    }

    /// Flushes, then returns the sum of every constraint total.
    pub fn calculate_score(&mut self) -> Result<S> {
        self.flush()?;
        let score = self.network.score(&self.graph)?;
        trace!(event = "score_calculated", score = %score, facts = self.facts.len());
        match self.config.environment_mode {
            EnvironmentMode::Production => {}
            EnvironmentMode::FastAssert => {
                let result = self.network.validate_consistency(&self.graph);
                self.guard(result)?;
            }
            EnvironmentMode::FullAssert => {
                let result = self.network.validate_consistency(&self.graph);
                self.guard(result)?;
                let result = self.check_against_rebuild(score);
                self.guard(result)?;
            }
        }
        Ok(score)
    }

    /// Scores the current facts in a fresh network and compares with `score`.
    fn check_against_rebuild(&self, score: S) -> Result<()> {
        let mut fresh = Network::new(&self.graph, self.config.limits.clone());
        apply_weights(&mut fresh, &self.graph, &self.weight_overrides)?;
        for entry in self.facts.values() {
            for (node, tuple) in &entry.tuples {
                if tuple.is_some() {
                    fresh.insert_source(*node, Rc::clone(&entry.fact))?;
                }
            }
        }
        fresh.flush(&self.graph)?;
        let rebuilt = fresh.score(&self.graph)?;
        if rebuilt != score {
            warn!(event = "score_corruption", incremental = %score, rebuilt = %rebuilt);
            return Err(GreynetError::ScoreCorruption {
                incremental: score.to_string(),
                rebuilt: rebuilt.to_string(),
            });
        }
        Ok(())
    }

    /// Retracts every fact and resets all node memories. Weight overrides are kept.
    pub fn clear(&mut self) -> Result<()> {
        self.check_poisoned()?;
        self.network.reset(&self.graph);
        self.facts.clear();
        let result = apply_weights(&mut self.network, &self.graph, &self.weight_overrides);
        self.guard(result)
    }

    // Weights

    /// Overrides a constraint's weight and recomputes its current matches.
    pub fn set_constraint_weight(&mut self, id: &ConstraintId, weight: S) -> Result<()> {
        self.check_poisoned()?;
        let node = self.graph.constraint_node(id)?;
        let def = self.graph.constraint_def(node)?;
        let memory = self.network.constraint_memory_mut(node).ok_or_else(|| {
            GreynetError::consistency_violation(format!("constraint {} has no memory", id))
        })?;
        memory.set_weight(def, weight)?;
        self.weight_overrides.insert(id.clone(), weight);
        debug!(event = "constraint_weight_set", constraint = %id, weight = %weight);
        Ok(())
    }

    pub fn constraint_weight(&self, id: &ConstraintId) -> Result<S> {
        let node = self.graph.constraint_node(id)?;
        self.network
            .constraint_memory(node)
            .map(|memory| memory.weight())
            .ok_or_else(|| GreynetError::consistency_violation(format!("constraint {} has no memory", id)))
    }

    // Explanation

    /// Matches and totals of every constraint, in declaration order.
    pub fn constraint_match_totals(&mut self) -> Result<Vec<ConstraintMatchTotal<S>>> {
        self.flush()?;
        let result = self.collect_match_totals();
        self.guard(result)
    }

    fn collect_match_totals(&self) -> Result<Vec<ConstraintMatchTotal<S>>> {
        let mut totals = Vec::with_capacity(self.graph.constraints().len());
        for &node in self.graph.constraints() {
            let def = self.graph.constraint_def(node)?;
            let Some(memory) = self.network.constraint_memory(node) else {
                continue;
            };
            let mut matches = Vec::with_capacity(memory.match_count());
            for (tuple, entry) in memory.matches() {
                let view = self.network.scheduler().view(tuple)?;
                matches.push(ConstraintMatch {
                    constraint_id: def.id.clone(),
                    facts: view.facts().to_vec(),
                    match_weight: entry.match_weight,
                    score: entry.score,
                    indicted: def.indicted_facts(&view)?,
                });
            }
            matches.sort_by_key(|m| m.facts.iter().map(|f| f.fact_id()).collect::<Vec<_>>());
            totals.push(ConstraintMatchTotal {
                constraint_id: def.id.clone(),
                weight: memory.weight(),
                total: memory.total(),
                matches,
            });
        }
        Ok(totals)
    }

    /// Per-fact blame, most penalized first.
    pub fn indictments(&mut self) -> Result<Vec<Indictment<S>>> {
        let totals = self.constraint_match_totals()?;
        Ok(indict(&totals))
    }

    pub fn indictment_for<T: GreynetFact>(&mut self, fact: &T) -> Result<Option<Indictment<S>>> {
        let key = fact_key_of::<T>(fact.fact_id());
        Ok(self
            .indictments()?
            .into_iter()
            .find(|indictment| FactKey::of(indictment.fact.as_ref()) == key))
    }

    /// Score with its breakdown by constraint and by fact.
    pub fn explain(&mut self) -> Result<ScoreExplanation<S>> {
        let score = self.calculate_score()?;
        let constraint_match_totals = self.constraint_match_totals()?;
        let indictments = indict(&constraint_match_totals);
        Ok(ScoreExplanation {
            score,
            constraint_match_totals,
            indictments,
        })
    }

    // Introspection

    pub fn fact_count(&self) -> usize {
        self.facts.len()
    }

    /// Live tuples across the whole network, queued ones included.
    pub fn tuple_count(&self) -> usize {
        self.network.tuple_count()
    }

    pub fn validate_consistency(&self) -> Result<()> {
        self.network.validate_consistency(&self.graph)
    }

    pub fn statistics(&self) -> NetworkStatistics {
        let mut stats = NetworkStatistics {
            total_nodes: self.graph.node_count(),
            constraint_count: self.graph.constraints().len(),
            fact_count: self.facts.len(),
            total_tuples: self.network.tuple_count(),
            pending_tuples: self.network.pending(),
            ..NetworkStatistics::default()
        };
        for (id, node) in self.graph.nodes() {
            *stats.node_type_counts.entry(node.name().to_string()).or_insert(0) += 1;
            stats.memory_entries += self.network.memory(id).map_or(0, |m| m.size());
        }
        stats
    }
}

fn indict<S: Score>(totals: &[ConstraintMatchTotal<S>]) -> Vec<Indictment<S>> {
    let mut by_fact: HashMap<FactKey, Indictment<S>> = HashMap::default();
    for total in totals {
        for m in &total.matches {
            let mut blamed: HashSet<FactKey> = HashSet::default();
            for fact in &m.indicted {
                let key = FactKey::of(fact.as_ref());
                if !blamed.insert(key) {
                    continue;
                }
                let indictment = by_fact.entry(key).or_insert_with(|| Indictment {
                    fact: Rc::clone(fact),
                    score: S::null_score(),
                    matches: Vec::new(),
                });
                indictment.score = indictment.score + m.score;
                indictment.matches.push(m.clone());
            }
        }
    }
    let mut indictments: Vec<Indictment<S>> = by_fact.into_values().collect();
    indictments.sort_by(|a, b| {
        a.score
            .partial_cmp(&b.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.fact.type_name().cmp(b.fact.type_name()))
            .then_with(|| a.fact.fact_id().cmp(&b.fact.fact_id()))
    });
    indictments
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{EnvironmentMode, PropagationMode};
    use crate::joiner::Joiners;
    use crate::score::{HardSoftScore, SimpleScore};
    use crate::{ConstraintBuilder, ResourceLimits};

    #[derive(Debug, Clone)]
    struct Lesson {
        id: i64,
        room: Option<i64>,
        slot: i64,
    }
    crate::greynet_fact!(Lesson, id);

    fn lesson(id: i64, room: Option<i64>, slot: i64) -> Lesson {
        Lesson { id, room, slot }
    }

    fn room_conflicts() -> Arc<ConstraintGraph<HardSoftScore>> {
        let builder = ConstraintBuilder::<HardSoftScore>::new();
        builder.register_visibility(|l: &Lesson| l.room.is_some());
        builder
            .for_each_unique_pair::<Lesson>(vec![
                Joiners::equal(|l: &Lesson| l.room, |l: &Lesson| l.room),
                Joiners::equal(|l: &Lesson| l.slot, |l: &Lesson| l.slot),
            ])
            .penalize("room conflict", HardSoftScore::ONE_HARD);
        builder
            .for_each_including_unassigned::<Lesson>()
            .filter(|l: &Lesson| l.room.is_none())
            .penalize("unassigned", HardSoftScore::ONE_SOFT);
        builder.build().unwrap()
    }

    #[test]
    fn test_visibility_follows_updates() {
        let graph = room_conflicts();
        let mut session = graph.create_session();
        session.insert(lesson(1, Some(1), 1)).unwrap();
        session.insert(lesson(2, None, 1)).unwrap();
        assert_eq!(session.calculate_score().unwrap(), HardSoftScore::of(0, -1));

        session.update(lesson(2, Some(1), 1)).unwrap();
        assert_eq!(session.calculate_score().unwrap(), HardSoftScore::of(-1, 0));

        session.update(lesson(1, None, 1)).unwrap();
        assert_eq!(session.calculate_score().unwrap(), HardSoftScore::of(0, -1));
        assert_eq!(session.fact::<Lesson>(1).unwrap().room, None);
    }

    #[test]
    fn test_lookup_errors_leave_session_usable() {
        let graph = room_conflicts();
        let mut session = graph.create_session();
        session.insert(lesson(1, Some(1), 1)).unwrap();
        assert!(matches!(
            session.insert(lesson(1, Some(2), 1)),
            Err(GreynetError::DuplicateFact { id: 1, .. })
        ));
        assert!(matches!(
            session.retract_by_id::<Lesson>(9),
            Err(GreynetError::FactNotFound { id: 9, .. })
        ));
        assert!(session
            .insert_batch(vec![lesson(2, None, 1), lesson(2, None, 2)])
            .is_err());
        assert_eq!(session.fact_count(), 1);
        assert!(!session.is_poisoned());
        assert_eq!(session.calculate_score().unwrap(), HardSoftScore::ZERO);
    }

    #[test]
    fn test_closure_error_poisons() {
        let builder = ConstraintBuilder::<SimpleScore>::new();
        builder
            .for_each::<Lesson>()
            .filter_tuple(|t| Ok(*t.get::<i64>(0)? > 0))
            .penalize("broken", SimpleScore::ONE);
        let graph = builder.build().unwrap();
        let mut session = graph.create_session();
        session.insert(lesson(1, None, 1)).unwrap();
        assert!(matches!(session.flush(), Err(GreynetError::TypeMismatch { .. })));
        assert!(session.is_poisoned());
        assert!(matches!(session.calculate_score(), Err(GreynetError::SessionPoisoned)));
    }

    #[test]
    fn test_weight_override_survives_clear() {
        let graph = room_conflicts();
        let mut session = graph.create_session();
        let id = ConstraintId::of("unassigned");
        session.insert(lesson(1, None, 1)).unwrap();
        session.set_constraint_weight(&id, HardSoftScore::of_soft(5)).unwrap();
        assert_eq!(session.calculate_score().unwrap(), HardSoftScore::of_soft(-5));

        session.clear().unwrap();
        assert_eq!(session.tuple_count(), 0);
        session.insert(lesson(1, None, 1)).unwrap();
        assert_eq!(session.calculate_score().unwrap(), HardSoftScore::of_soft(-5));
        assert_eq!(session.constraint_weight(&id).unwrap(), HardSoftScore::of_soft(5));
        assert!(matches!(
            session.set_constraint_weight(&ConstraintId::of("missing"), HardSoftScore::ZERO),
            Err(GreynetError::ConstraintNotFound(_))
        ));
    }

    #[test]
    fn test_immediate_mode_and_full_assert() {
        let graph = room_conflicts();
        let config = SessionConfig::default()
            .with_propagation(PropagationMode::Immediate)
            .with_environment_mode(EnvironmentMode::FullAssert);
        let mut session = graph.create_session_with(config).unwrap();
        session.insert(lesson(1, Some(1), 1)).unwrap();
        session.insert(lesson(2, Some(1), 1)).unwrap();
        assert_eq!(session.statistics().pending_tuples, 0);
        assert_eq!(session.calculate_score().unwrap(), HardSoftScore::of_hard(-1));
        session.retract_by_id::<Lesson>(2).unwrap();
        assert_eq!(session.calculate_score().unwrap(), HardSoftScore::ZERO);
    }

    #[test]
    fn test_fact_limit() {
        let graph = room_conflicts();
        let limits = ResourceLimits {
            max_facts: 1,
            ..ResourceLimits::default()
        };
        let mut session = graph
            .create_session_with(SessionConfig::default().with_limits(limits))
            .unwrap();
        session.insert(lesson(1, None, 1)).unwrap();
        assert!(matches!(
            session.insert(lesson(2, None, 1)),
            Err(GreynetError::ResourceLimit { .. })
        ));
        assert!(!session.is_poisoned());
    }

    #[test]
    fn test_indictments_blame_both_lessons() {
        let graph = room_conflicts();
        let mut session = graph.create_session();
        session
            .insert_batch(vec![lesson(1, Some(1), 1), lesson(2, Some(1), 1), lesson(3, None, 2)])
            .unwrap();
        let explanation = session.explain().unwrap();
        assert_eq!(explanation.score, HardSoftScore::of(-1, -1));
        let conflict = explanation.total_for(&ConstraintId::of("room conflict")).unwrap();
        assert_eq!(conflict.match_count(), 1);
        assert_eq!(explanation.indictments.len(), 3);
        assert_eq!(explanation.indictments[0].score, HardSoftScore::of_hard(-1));

        let third = session.indictment_for(&lesson(3, None, 2)).unwrap().unwrap();
        assert_eq!(third.score, HardSoftScore::of_soft(-1));
        assert!(session.indictment_for(&lesson(4, None, 2)).unwrap().is_none());
    }
}
