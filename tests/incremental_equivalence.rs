use greystream::prelude::*;
use greystream::{ConstraintGraph, EnvironmentMode};
use proptest::prelude::*;
use std::collections::BTreeMap;
use std::sync::Arc;

#[derive(Debug, Clone)]
struct Shift {
    id: i64,
    employee: i64,
    hours: i64,
}
greynet_fact!(Shift, id);

fn graph() -> Arc<ConstraintGraph<HardSoftScore>> {
    let builder = ConstraintBuilder::<HardSoftScore>::new();
    let shifts = builder.for_each::<Shift>();
    shifts
        .group_by(|t| Ok(t.get::<Shift>(0)?.employee), Collectors::sum(|s: &Shift| s.hours))
        .filter(|_: &i64, total: &i64| *total > 12)
        .penalize_by("overtime", HardSoftScore::ONE_SOFT, |t| Ok(*t.get::<i64>(1)? - 12));
    builder
        .for_each_unique_pair::<Shift>(vec![Joiners::equal(|s: &Shift| s.employee, |s: &Shift| s.employee)])
        .filter(|a: &Shift, b: &Shift| a.hours + b.hours > 14)
        .penalize("double shift", HardSoftScore::ONE_HARD);
    shifts
        .filter(|s: &Shift| s.hours > 9)
        .concat(&shifts.filter(|s: &Shift| s.hours < 2))
        .penalize("odd length", HardSoftScore::ONE_SOFT);
    shifts
        .map::<Shift, i64, _>(|s| s.employee)
        .distinct()
        .reward("employees on duty", HardSoftScore::of_soft(3));
    shifts
        .if_exists_other::<Shift>(vec![Joiners::equal(|s: &Shift| s.hours, |s: &Shift| s.hours)])
        .penalize("same length", HardSoftScore::ONE_SOFT);
    shifts
        .aggregate(Collectors::max(|s: &Shift| s.hours))
        .penalize_by("longest", HardSoftScore::ONE_SOFT, |t| Ok(*t.get::<i64>(0)?));
    builder.build().unwrap()
}

#[derive(Debug, Clone)]
enum Op {
    Put(i64, i64, i64),
    Remove(i64),
}

fn op() -> impl Strategy<Value = Op> {
    prop_oneof![
        3 => (0i64..8, 0i64..3, 0i64..12).prop_map(|(id, employee, hours)| Op::Put(id, employee, hours)),
        1 => (0i64..8).prop_map(Op::Remove),
    ]
}

fn score_from_scratch(graph: &Arc<ConstraintGraph<HardSoftScore>>, shifts: Vec<Shift>) -> HardSoftScore {
    let mut session = graph.create_session();
    session.insert_batch(shifts).unwrap();
    session.calculate_score().unwrap()
}

#[derive(Debug, Clone)]
struct Job {
    id: i64,
    site: i64,
    load: i64,
}
greynet_fact!(Job, id);

#[derive(Debug, Clone)]
struct Crew {
    id: i64,
    site: i64,
    tools: Vec<i64>,
}
greynet_fact!(Crew, id);

fn site_graph() -> Arc<ConstraintGraph<HardSoftScore>> {
    let builder = ConstraintBuilder::<HardSoftScore>::new();
    let jobs = builder.for_each::<Job>();
    let crews = builder.for_each::<Crew>();
    let same_site = Joiners::equal(|j: &Job| j.site, |c: &Crew| c.site);
    let staffed = jobs.join(&crews, vec![same_site.clone()]);

    staffed
        .group_by(
            |t| Ok(t.get::<Crew>(1)?.id),
            Collectors::sum_tuple(|t| Ok(t.get::<Job>(0)?.load)),
        )
        .filter(|_: &i64, load: &i64| *load > 6)
        .penalize_by("crew overloaded", HardSoftScore::ONE_SOFT, |t| Ok(*t.get::<i64>(1)? - 6));
    staffed
        .group_by(
            |t| Ok(t.get::<Job>(0)?.site),
            Collectors::min_by(|t| Ok(t.get::<Crew>(1)?.id), |a: &i64, b: &i64| a.cmp(b)),
        )
        .penalize_by("lead crew", HardSoftScore::ONE_SOFT, |t| Ok(*t.get::<i64>(1)?));
    staffed
        .filter(|j: &Job, c: &Crew| j.load > c.tools.len() as i64)
        .penalize("under-equipped", HardSoftScore::ONE_SOFT);
    jobs.if_not_exists(&crews, vec![same_site])
        .penalize("unstaffed site", HardSoftScore::ONE_HARD);
    crews
        .flatten(|c: &Crew| c.tools.clone())
        .distinct()
        .reward("tool kinds", HardSoftScore::of_soft(2));
    builder.build().unwrap()
}

#[derive(Debug, Clone)]
enum SiteOp {
    PutJob(i64, i64, i64),
    PutCrew(i64, i64, Vec<i64>),
    DropJob(i64),
    DropCrew(i64),
    Flush,
}

fn site_op() -> impl Strategy<Value = SiteOp> {
    prop_oneof![
        3 => (0i64..6, 0i64..3, 0i64..6).prop_map(|(id, site, load)| SiteOp::PutJob(id, site, load)),
        3 => (0i64..6, 0i64..3, prop::collection::vec(0i64..4, 0..3))
            .prop_map(|(id, site, tools)| SiteOp::PutCrew(id, site, tools)),
        1 => (0i64..6).prop_map(SiteOp::DropJob),
        1 => (0i64..6).prop_map(SiteOp::DropCrew),
        1 => Just(SiteOp::Flush),
    ]
}

proptest! {
    #[test]
    fn incremental_score_matches_rebuild(ops in prop::collection::vec(op(), 1..60), flush_every in 1usize..6) {
        let graph = graph();
        let config = SessionConfig::default().with_environment_mode(EnvironmentMode::FullAssert);
        let mut session = graph.create_session_with(config).unwrap();
        let mut model: BTreeMap<i64, Shift> = BTreeMap::new();

        for (step, op) in ops.into_iter().enumerate() {
            match op {
                Op::Put(id, employee, hours) => {
                    let shift = Shift { id, employee, hours };
                    if model.insert(id, shift.clone()).is_some() {
                        session.update(shift).unwrap();
                    } else {
                        session.insert(shift).unwrap();
                    }
                }
                Op::Remove(id) => {
                    if model.remove(&id).is_some() {
                        session.retract_by_id::<Shift>(id).unwrap();
                    } else {
                        prop_assert!(session.retract_by_id::<Shift>(id).is_err());
                    }
                }
            }
            if step % flush_every == 0 {
                session.flush().unwrap();
                prop_assert!(session.validate_consistency().is_ok());
            }
        }

        let incremental = session.calculate_score().unwrap();
        let rebuilt = score_from_scratch(&graph, model.values().cloned().collect());
        prop_assert_eq!(incremental, rebuilt);
        prop_assert_eq!(session.fact_count(), model.len());
    }

    #[test]
    fn score_is_independent_of_insertion_order(
        shifts in prop::collection::btree_map(0i64..12, (0i64..3, 0i64..12), 0..12)
    ) {
        let graph = graph();
        let shifts: Vec<Shift> = shifts
            .into_iter()
            .map(|(id, (employee, hours))| Shift { id, employee, hours })
            .collect();
        let forward = score_from_scratch(&graph, shifts.clone());
        let backward = score_from_scratch(&graph, shifts.into_iter().rev().collect());
        prop_assert_eq!(forward, backward);
    }

    #[test]
    fn retracting_everything_leaves_no_tuples(
        shifts in prop::collection::btree_map(0i64..12, (0i64..3, 0i64..12), 1..12)
    ) {
        let graph = graph();
        let mut session = graph.create_session();
        let shifts: Vec<Shift> = shifts
            .into_iter()
            .map(|(id, (employee, hours))| Shift { id, employee, hours })
            .collect();
        session.insert_batch(shifts.clone()).unwrap();
        session.calculate_score().unwrap();
        session.retract_batch(&shifts).unwrap();
        prop_assert_eq!(session.calculate_score().unwrap(), HardSoftScore::ZERO);
        greystream::assert_no_leaks!(session);
    }

    #[test]
    fn two_type_network_matches_rebuild(ops in prop::collection::vec(site_op(), 1..80)) {
        let graph = site_graph();
        let config = SessionConfig::default().with_environment_mode(EnvironmentMode::FullAssert);
        let mut session = graph.create_session_with(config).unwrap();
        let mut jobs: BTreeMap<i64, Job> = BTreeMap::new();
        let mut crews: BTreeMap<i64, Crew> = BTreeMap::new();

        for op in ops {
            match op {
                SiteOp::PutJob(id, site, load) => {
                    let job = Job { id, site, load };
                    if jobs.insert(id, job.clone()).is_some() {
                        session.update(job).unwrap();
                    } else {
                        session.insert(job).unwrap();
                    }
                }
                SiteOp::PutCrew(id, site, tools) => {
                    let crew = Crew { id, site, tools };
                    if crews.insert(id, crew.clone()).is_some() {
                        session.update(crew).unwrap();
                    } else {
                        session.insert(crew).unwrap();
                    }
                }
                SiteOp::DropJob(id) => {
                    prop_assert_eq!(session.retract_by_id::<Job>(id).is_ok(), jobs.remove(&id).is_some());
                }
                SiteOp::DropCrew(id) => {
                    prop_assert_eq!(session.retract_by_id::<Crew>(id).is_ok(), crews.remove(&id).is_some());
                }
                SiteOp::Flush => {
                    session.flush().unwrap();
                    prop_assert!(session.validate_consistency().is_ok());
                }
            }
        }

        let incremental = session.calculate_score().unwrap();
        let mut fresh = graph.create_session();
        fresh.insert_batch(jobs.values().cloned()).unwrap();
        fresh.insert_batch(crews.values().cloned()).unwrap();
        prop_assert_eq!(incremental, fresh.calculate_score().unwrap());

        session.retract_batch(jobs.values()).unwrap();
        session.retract_batch(crews.values()).unwrap();
        prop_assert_eq!(session.calculate_score().unwrap(), HardSoftScore::ZERO);
        greystream::assert_no_leaks!(session);
    }
}
