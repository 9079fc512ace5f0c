use greystream::prelude::*;
use greystream::{assert_no_leaks, ConstraintId, HardMediumSoftScore};

#[derive(Debug, Clone)]
struct A {
    id: i64,
    x: i64,
}
greynet_fact!(A, id);

#[derive(Debug, Clone)]
struct B {
    id: i64,
    x: i64,
}
greynet_fact!(B, id);

#[derive(Debug, Clone)]
struct Shift {
    id: i64,
    employee: i64,
    hours: i64,
}
greynet_fact!(Shift, id);

#[derive(Debug, Clone)]
struct Employee {
    id: i64,
    name: String,
    skills: Vec<String>,
}
greynet_fact!(Employee, id);

#[derive(Debug, Clone)]
struct Room {
    id: i64,
    building: i64,
}
greynet_fact!(Room, id);

fn shift(id: i64, employee: i64, hours: i64) -> Shift {
    Shift { id, employee, hours }
}

fn employee(id: i64, name: &str, skills: &[&str]) -> Employee {
    Employee {
        id,
        name: name.to_string(),
        skills: skills.iter().map(|s| s.to_string()).collect(),
    }
}

#[test]
fn test_join_pairs_a_with_next_b() {
    let builder = ConstraintBuilder::<SimpleScore>::new();
    builder
        .for_each::<A>()
        .join(&builder.for_each::<B>(), vec![Joiners::equal(|a: &A| a.x, |b: &B| b.x - 1)])
        .penalize("a before b", SimpleScore::ONE);
    let graph = builder.build().unwrap();
    let mut session = graph.create_session();

    session.insert(A { id: 1, x: 1 }).unwrap();
    session.insert(B { id: 2, x: 2 }).unwrap();
    session.insert(B { id: 3, x: 3 }).unwrap();
    assert_eq!(session.calculate_score().unwrap(), SimpleScore::of(-1));
    let totals = session.constraint_match_totals().unwrap();
    assert_eq!(totals.len(), 1);
    assert_eq!(totals[0].match_count(), 1);
    assert_eq!(totals[0].matches[0].facts[1].fact_id(), 2);

    session.retract_by_id::<B>(2).unwrap();
    assert_eq!(session.calculate_score().unwrap(), SimpleScore::ZERO);

    session.update(B { id: 3, x: 2 }).unwrap();
    assert_eq!(session.calculate_score().unwrap(), SimpleScore::of(-1));

    session.retract_by_id::<A>(1).unwrap();
    session.retract_by_id::<B>(3).unwrap();
    session.flush().unwrap();
    assert_no_leaks!(session);
}

#[test]
fn test_group_by_sum_over_limit() {
    let builder = ConstraintBuilder::<SimpleScore>::new();
    builder
        .for_each::<Shift>()
        .group_by(|t| Ok(t.get::<Shift>(0)?.employee), Collectors::sum(|s: &Shift| s.hours))
        .filter(|_: &i64, total: &i64| *total > 10)
        .penalize_by("overtime", SimpleScore::ONE, |t| Ok(*t.get::<i64>(1)? - 10));
    let graph = builder.build().unwrap();
    let mut session = graph.create_session();

    session
        .insert_batch(vec![shift(1, 7, 8), shift(2, 7, 6), shift(3, 8, 4)])
        .unwrap();
    assert_eq!(session.calculate_score().unwrap(), SimpleScore::of(-4));

    session.update(shift(2, 8, 6)).unwrap();
    assert_eq!(session.calculate_score().unwrap(), SimpleScore::ZERO);

    session.update(shift(3, 8, 9)).unwrap();
    assert_eq!(session.calculate_score().unwrap(), SimpleScore::of(-5));

    session.retract_batch(&[shift(1, 7, 8), shift(2, 8, 6), shift(3, 8, 9)]).unwrap();
    assert_eq!(session.calculate_score().unwrap(), SimpleScore::ZERO);
    assert_no_leaks!(session);
}

#[test]
fn test_aggregates_recover_after_removing_extremes() {
    let builder = ConstraintBuilder::<HardMediumSoftScore>::new();
    let shifts = builder.for_each::<Shift>();
    shifts
        .aggregate(Collectors::min(|s: &Shift| s.hours))
        .reward_by("min", HardMediumSoftScore::of_hard(1), |t| Ok(*t.get::<i64>(0)?));
    shifts
        .aggregate(Collectors::max(|s: &Shift| s.hours))
        .reward_by("max", HardMediumSoftScore::of_medium(1), |t| Ok(*t.get::<i64>(0)?));
    shifts
        .aggregate(Collectors::sum(|s: &Shift| s.hours))
        .reward_by("sum", HardMediumSoftScore::of_soft(1), |t| Ok(*t.get::<i64>(0)?));
    let graph = builder.build().unwrap();
    let mut session = graph.create_session();

    session
        .insert_batch(vec![shift(1, 1, 5), shift(2, 1, 1), shift(3, 1, 9)])
        .unwrap();
    assert_eq!(session.calculate_score().unwrap(), HardMediumSoftScore::of(1, 9, 15));

    session.retract_by_id::<Shift>(2).unwrap();
    assert_eq!(session.calculate_score().unwrap(), HardMediumSoftScore::of(5, 9, 14));

    session.retract_by_id::<Shift>(3).unwrap();
    assert_eq!(session.calculate_score().unwrap(), HardMediumSoftScore::of(5, 5, 5));

    session.retract_by_id::<Shift>(1).unwrap();
    assert_eq!(session.calculate_score().unwrap(), HardMediumSoftScore::ZERO);
    assert_no_leaks!(session);
}

#[test]
fn test_comparator_min_over_joined_pairs() {
    let builder = ConstraintBuilder::<SimpleScore>::new();
    let latest_first = |l: &i64, r: &i64| r.cmp(l);
    builder
        .for_each::<A>()
        .join(&builder.for_each::<B>(), vec![Joiners::equal(|a: &A| a.x, |b: &B| b.x)])
        .group_by(
            |t| Ok(t.get::<A>(0)?.id),
            Collectors::min_by(|t| Ok(t.get::<B>(1)?.id), latest_first),
        )
        .penalize_by("latest partner", SimpleScore::ONE, |t| Ok(*t.get::<i64>(1)?));
    let graph = builder.build().unwrap();
    let mut session = graph.create_session();

    session.insert(A { id: 1, x: 1 }).unwrap();
    session
        .insert_batch(vec![B { id: 10, x: 1 }, B { id: 20, x: 1 }, B { id: 30, x: 2 }])
        .unwrap();
    assert_eq!(session.calculate_score().unwrap(), SimpleScore::of(-20));

    session.retract_by_id::<B>(20).unwrap();
    assert_eq!(session.calculate_score().unwrap(), SimpleScore::of(-10));

    session.update(B { id: 30, x: 1 }).unwrap();
    assert_eq!(session.calculate_score().unwrap(), SimpleScore::of(-30));

    session.retract_by_id::<A>(1).unwrap();
    assert_eq!(session.calculate_score().unwrap(), SimpleScore::ZERO);
    session.retract_by_id::<B>(10).unwrap();
    session.retract_by_id::<B>(30).unwrap();
    session.flush().unwrap();
    assert_no_leaks!(session);
}

#[test]
fn test_sum_overflow_fails_and_poisons_session() {
    let builder = ConstraintBuilder::<SimpleScore>::new();
    builder
        .for_each::<A>()
        .group_by(|_| Ok(0i64), Collectors::sum(|a: &A| a.x))
        .penalize_by("total x", SimpleScore::ONE, |t| Ok(*t.get::<i64>(1)?));
    let graph = builder.build().unwrap();
    let mut session = graph.create_session();

    session.insert(A { id: 1, x: i64::MAX }).unwrap();
    assert_eq!(session.calculate_score().unwrap(), SimpleScore::of(-i64::MAX));

    session.insert(A { id: 2, x: 1 }).unwrap();
    assert!(matches!(session.calculate_score(), Err(GreynetError::Overflow { .. })));
    assert!(session.is_poisoned());
    assert!(matches!(
        session.insert(A { id: 3, x: 0 }),
        Err(GreynetError::SessionPoisoned)
    ));
}

#[test]
fn test_average_per_group() {
    let builder = ConstraintBuilder::<SimpleScore>::new();
    builder
        .for_each::<Shift>()
        .group_by(|t| Ok(t.get::<Shift>(0)?.employee), Collectors::average(|s: &Shift| s.hours))
        .penalize_by("average x10", SimpleScore::ONE, |t| Ok((*t.get::<f64>(1)? * 10.0) as i64));
    let graph = builder.build().unwrap();
    let mut session = graph.create_session();

    session.insert_batch(vec![shift(1, 1, 4), shift(2, 1, 7)]).unwrap();
    assert_eq!(session.calculate_score().unwrap(), SimpleScore::of(-55));
    session.retract_by_id::<Shift>(1).unwrap();
    assert_eq!(session.calculate_score().unwrap(), SimpleScore::of(-70));
}

#[test]
fn test_if_not_exists_tracks_right_side() {
    #[derive(Debug)]
    struct Lesson {
        id: i64,
        building: i64,
    }
    greynet_fact!(Lesson, id);

    let builder = ConstraintBuilder::<SimpleScore>::new();
    let rooms = builder.for_each::<Room>();
    builder
        .for_each::<Lesson>()
        .if_not_exists(&rooms, vec![Joiners::equal(|l: &Lesson| l.building, |r: &Room| r.building)])
        .penalize("no room in building", SimpleScore::ONE);
    builder
        .for_each::<Lesson>()
        .if_exists(&rooms, vec![Joiners::equal(|l: &Lesson| l.building, |r: &Room| r.building)])
        .reward("room available", SimpleScore::of(10));
    let graph = builder.build().unwrap();
    let mut session = graph.create_session();

    session.insert(Lesson { id: 1, building: 1 }).unwrap();
    assert_eq!(session.calculate_score().unwrap(), SimpleScore::of(-1));

    session.insert(Room { id: 1, building: 1 }).unwrap();
    session.insert(Room { id: 2, building: 1 }).unwrap();
    assert_eq!(session.calculate_score().unwrap(), SimpleScore::of(10));

    session.retract_by_id::<Room>(1).unwrap();
    assert_eq!(session.calculate_score().unwrap(), SimpleScore::of(10));

    session.update(Room { id: 2, building: 2 }).unwrap();
    assert_eq!(session.calculate_score().unwrap(), SimpleScore::of(-1));

    session.update(Lesson { id: 1, building: 2 }).unwrap();
    assert_eq!(session.calculate_score().unwrap(), SimpleScore::of(10));
}

#[test]
fn test_if_exists_other_excludes_the_fact_itself() {
    let builder = ConstraintBuilder::<SimpleScore>::new();
    builder
        .for_each::<Employee>()
        .if_exists_other::<Employee>(vec![Joiners::equal(
            |e: &Employee| e.name.clone(),
            |e: &Employee| e.name.clone(),
        )])
        .penalize("duplicate name", SimpleScore::ONE);
    let graph = builder.build().unwrap();
    let mut session = graph.create_session();

    session.insert(employee(1, "ann", &[])).unwrap();
    assert_eq!(session.calculate_score().unwrap(), SimpleScore::ZERO);
    session.insert(employee(2, "ann", &[])).unwrap();
    assert_eq!(session.calculate_score().unwrap(), SimpleScore::of(-2));
    session.update(employee(2, "bob", &[])).unwrap();
    assert_eq!(session.calculate_score().unwrap(), SimpleScore::ZERO);
}

#[test]
fn test_if_exists_other_including_unassigned_sees_hidden_facts() {
    #[derive(Debug)]
    struct Slot {
        id: i64,
        teacher: i64,
        room: Option<i64>,
    }
    greynet_fact!(Slot, id);

    let builder = ConstraintBuilder::<SimpleScore>::new();
    builder.register_visibility(|s: &Slot| s.room.is_some());
    let same_teacher = Joiners::equal(|s: &Slot| s.teacher, |s: &Slot| s.teacher);
    let slots = builder.for_each::<Slot>();
    slots
        .if_exists_other_including_unassigned::<Slot>(vec![same_teacher.clone()])
        .penalize("teacher busy anywhere", SimpleScore::ONE);
    slots
        .if_exists_other::<Slot>(vec![same_teacher])
        .penalize("teacher busy in a room", SimpleScore::of(10));
    let graph = builder.build().unwrap();
    let mut session = graph.create_session();

    session.insert(Slot { id: 1, teacher: 1, room: Some(1) }).unwrap();
    session.insert(Slot { id: 2, teacher: 1, room: None }).unwrap();
    assert_eq!(session.calculate_score().unwrap(), SimpleScore::of(-1));

    session.update(Slot { id: 2, teacher: 1, room: Some(2) }).unwrap();
    assert_eq!(session.calculate_score().unwrap(), SimpleScore::of(-22));

    session.retract_by_id::<Slot>(1).unwrap();
    assert_eq!(session.calculate_score().unwrap(), SimpleScore::ZERO);
    session.retract_by_id::<Slot>(2).unwrap();
    session.flush().unwrap();
    assert_no_leaks!(session);
}

#[test]
fn test_unique_pairs_count_each_conflict_once() {
    let builder = ConstraintBuilder::<SimpleScore>::new();
    builder
        .for_each_unique_pair::<Shift>(vec![Joiners::equal(|s: &Shift| s.employee, |s: &Shift| s.employee)])
        .penalize("double booked", SimpleScore::ONE);
    let graph = builder.build().unwrap();
    let mut session = graph.create_session();

    session
        .insert_batch(vec![shift(1, 1, 8), shift(2, 1, 8), shift(3, 1, 8), shift(4, 2, 8)])
        .unwrap();
    assert_eq!(session.calculate_score().unwrap(), SimpleScore::of(-3));
    session.update(shift(4, 1, 8)).unwrap();
    assert_eq!(session.calculate_score().unwrap(), SimpleScore::of(-6));
}

#[test]
fn test_flatten_then_distinct_counts_skills() {
    let builder = ConstraintBuilder::<SimpleScore>::new();
    builder
        .for_each::<Employee>()
        .flatten::<Employee, String, _>(|e| e.skills.clone())
        .distinct()
        .aggregate(Collectors::count())
        .reward_by("distinct skills", SimpleScore::ONE, |t| Ok(*t.get::<usize>(0)? as i64));
    let graph = builder.build().unwrap();
    let mut session = graph.create_session();

    session.insert(employee(1, "ann", &["rust", "go"])).unwrap();
    session.insert(employee(2, "bob", &["rust"])).unwrap();
    assert_eq!(session.calculate_score().unwrap(), SimpleScore::of(2));

    session.retract_by_id::<Employee>(1).unwrap();
    assert_eq!(session.calculate_score().unwrap(), SimpleScore::of(1));

    session.update(employee(2, "bob", &["c", "zig", "c"])).unwrap();
    assert_eq!(session.calculate_score().unwrap(), SimpleScore::of(2));

    session.retract_by_id::<Employee>(2).unwrap();
    session.flush().unwrap();
    assert_no_leaks!(session);
}

#[test]
fn test_concat_keeps_both_branches() {
    let builder = ConstraintBuilder::<SimpleScore>::new();
    let shifts = builder.for_each::<Shift>();
    let long = shifts.filter(|s: &Shift| s.hours > 8);
    let short = shifts.filter(|s: &Shift| s.hours < 2);
    long.concat(&short).penalize("odd length", SimpleScore::ONE);
    let graph = builder.build().unwrap();
    let mut session = graph.create_session();

    session
        .insert_batch(vec![shift(1, 1, 9), shift(2, 1, 1), shift(3, 1, 5)])
        .unwrap();
    assert_eq!(session.calculate_score().unwrap(), SimpleScore::of(-2));
    session.update(shift(1, 1, 0)).unwrap();
    assert_eq!(session.calculate_score().unwrap(), SimpleScore::of(-2));
    session.update(shift(3, 1, 12)).unwrap();
    assert_eq!(session.calculate_score().unwrap(), SimpleScore::of(-3));
    session.update(shift(2, 1, 4)).unwrap();
    assert_eq!(session.calculate_score().unwrap(), SimpleScore::of(-2));
}

#[test]
fn test_map_then_distinct_counts_employees() {
    let builder = ConstraintBuilder::<SimpleScore>::new();
    builder
        .for_each::<Shift>()
        .map::<Shift, i64, _>(|s| s.employee)
        .distinct()
        .penalize("employees on duty", SimpleScore::ONE);
    let graph = builder.build().unwrap();
    let mut session = graph.create_session();

    session
        .insert_batch(vec![shift(1, 1, 8), shift(2, 1, 8), shift(3, 2, 8)])
        .unwrap();
    assert_eq!(session.calculate_score().unwrap(), SimpleScore::of(-2));
    session.retract_by_id::<Shift>(1).unwrap();
    assert_eq!(session.calculate_score().unwrap(), SimpleScore::of(-2));
    session.update(shift(2, 2, 8)).unwrap();
    assert_eq!(session.calculate_score().unwrap(), SimpleScore::of(-1));
}

#[test]
fn test_weights_packages_and_explanation() {
    let builder = ConstraintBuilder::<HardSoftScore>::new().with_package("roster");
    let shifts = builder.for_each::<Shift>();
    shifts
        .filter(|s: &Shift| s.hours > 8)
        .penalize_with("long shift", HardSoftScore::ONE_SOFT, |s: &Shift| s.hours - 8);
    shifts
        .join(&builder.for_each::<Employee>(), vec![Joiners::equal(|s: &Shift| s.employee, |e: &Employee| e.id)])
        .filter(|_: &Shift, e: &Employee| e.skills.is_empty())
        .penalize("unskilled", HardSoftScore::ONE_HARD)
        .indict_with(|t| Ok(vec![t.fact_ref(1)?.clone()]));
    let graph = builder.build().unwrap();
    let mut session = graph.create_session();

    session.insert(employee(1, "ann", &[])).unwrap();
    session.insert_batch(vec![shift(10, 1, 10), shift(11, 1, 12)]).unwrap();
    assert_eq!(session.calculate_score().unwrap(), HardSoftScore::of(-2, -6));

    let explanation = session.explain().unwrap();
    let unskilled = ConstraintId::new("roster", "unskilled");
    assert_eq!(explanation.total_for(&unskilled).unwrap().match_count(), 2);
    assert_eq!(explanation.indictments[0].fact.fact_id(), 1);
    assert_eq!(explanation.indictments[0].score, HardSoftScore::of_hard(-2));
    assert!(explanation.to_string().contains("roster/long shift"));

    session
        .set_constraint_weight(&ConstraintId::new("roster", "long shift"), HardSoftScore::of_soft(2))
        .unwrap();
    assert_eq!(session.calculate_score().unwrap(), HardSoftScore::of(-2, -12));

    let ann = session.indictment_for(&employee(1, "ann", &[])).unwrap().unwrap();
    assert_eq!(ann.match_count(), 2);
    assert!(session.indictment_for(&shift(10, 1, 10)).unwrap().is_some());
}
