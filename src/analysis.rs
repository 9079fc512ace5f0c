//analysis.rs
//! Score explanation and network statistics

use crate::constraint::ConstraintId;
use crate::fact::FactRef;
use crate::Score;
use rustc_hash::FxHashMap as HashMap;
use std::fmt;

/// One tuple currently matched by a constraint.
#[derive(Debug, Clone)]
pub struct ConstraintMatch<S: Score> {
    pub constraint_id: ConstraintId,
    pub facts: Vec<FactRef>,
    pub match_weight: i64,
    pub score: S,
    /// Facts this match is blamed on.
    pub indicted: Vec<FactRef>,
}

/// All matches of one constraint and their summed impact.
#[derive(Debug, Clone)]
pub struct ConstraintMatchTotal<S: Score> {
    pub constraint_id: ConstraintId,
    pub weight: S,
    pub total: S,
    pub matches: Vec<ConstraintMatch<S>>,
}

impl<S: Score> ConstraintMatchTotal<S> {
    pub fn match_count(&self) -> usize {
        self.matches.len()
    }
}

/// Everything one fact is blamed for.
#[derive(Debug, Clone)]
pub struct Indictment<S: Score> {
    pub fact: FactRef,
    pub score: S,
    pub matches: Vec<ConstraintMatch<S>>,
}

impl<S: Score> Indictment<S> {
    pub fn match_count(&self) -> usize {
        self.matches.len()
    }

    /// Matches of this fact per constraint.
    pub fn match_counts(&self) -> HashMap<ConstraintId, usize> {
        let mut counts = HashMap::default();
        for m in &self.matches {
            *counts.entry(m.constraint_id.clone()).or_insert(0) += 1;
        }
        counts
    }
}

/// Breakdown of a score by constraint and by fact.
#[derive(Debug, Clone)]
pub struct ScoreExplanation<S: Score> {
    pub score: S,
    pub constraint_match_totals: Vec<ConstraintMatchTotal<S>>,
    pub indictments: Vec<Indictment<S>>,
}

impl<S: Score> ScoreExplanation<S> {
    pub fn is_feasible(&self) -> bool {
        self.score.is_feasible()
    }

    pub fn total_for(&self, id: &ConstraintId) -> Option<&ConstraintMatchTotal<S>> {
        self.constraint_match_totals.iter().find(|t| &t.constraint_id == id)
    }

    /// Human-readable report: the score, then every constraint with matches,
    /// then the `limit` most penalized facts.
    pub fn summary(&self, limit: usize) -> String {
        let mut out = format!("Score: {}{}\n", self.score, if self.is_feasible() { "" } else { " (infeasible)" });
        let mut broken: Vec<&ConstraintMatchTotal<S>> =
            self.constraint_match_totals.iter().filter(|t| t.match_count() > 0).collect();
        if broken.is_empty() {
            out.push_str("No constraint matches.\n");
            return out;
        }
        broken.sort_by(|a, b| a.total.partial_cmp(&b.total).unwrap_or(std::cmp::Ordering::Equal));
        out.push_str("Constraint matches:\n");
        for total in broken {
            out.push_str(&format!(
                "  {:>12}  {} ({} matches)\n",
                total.total.to_string(),
                total.constraint_id,
                total.match_count()
            ));
        }
        if !self.indictments.is_empty() && limit > 0 {
            out.push_str("Indicted facts:\n");
            for indictment in self.indictments.iter().take(limit) {
                out.push_str(&format!(
                    "  {:>12}  {:?} ({} matches)\n",
                    indictment.score.to_string(),
                    indictment.fact,
                    indictment.match_count()
                ));
            }
        }
        out
    }
}

impl<S: Score> fmt::Display for ScoreExplanation<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.summary(5))
    }
}

#[derive(Debug, Clone, Default)]
pub struct NetworkStatistics {
    pub total_nodes: usize,
    pub node_type_counts: HashMap<String, usize>,
    pub constraint_count: usize,
    pub fact_count: usize,
    pub total_tuples: usize,
    pub pending_tuples: usize,
    /// Input tuples held in node memories across the network.
    pub memory_entries: usize,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::score::HardSoftScore;
    use std::rc::Rc;

    fn one_match(score: HardSoftScore) -> ConstraintMatch<HardSoftScore> {
        ConstraintMatch {
            constraint_id: ConstraintId::of("room conflict"),
            facts: vec![Rc::new(1i64) as FactRef],
            match_weight: 1,
            score,
            indicted: vec![Rc::new(1i64) as FactRef],
        }
    }

    #[test]
    fn test_summary_lists_broken_constraints() {
        let m = one_match(HardSoftScore::of_hard(-1));
        let explanation = ScoreExplanation {
            score: HardSoftScore::of_hard(-1),
            constraint_match_totals: vec![
                ConstraintMatchTotal {
                    constraint_id: ConstraintId::of("room conflict"),
                    weight: HardSoftScore::ONE_HARD,
                    total: HardSoftScore::of_hard(-1),
                    matches: vec![m.clone()],
                },
                ConstraintMatchTotal {
                    constraint_id: ConstraintId::of("unused"),
                    weight: HardSoftScore::ONE_SOFT,
                    total: HardSoftScore::ZERO,
                    matches: vec![],
                },
            ],
            indictments: vec![Indictment {
                fact: Rc::new(1i64),
                score: HardSoftScore::of_hard(-1),
                matches: vec![m],
            }],
        };
        let summary = explanation.summary(3);
        assert!(summary.contains("infeasible"));
        assert!(summary.contains("default/room conflict (1 matches)"));
        assert!(!summary.contains("unused"));
        assert_eq!(explanation.indictments[0].match_counts()[&ConstraintId::of("room conflict")], 1);
    }
}
