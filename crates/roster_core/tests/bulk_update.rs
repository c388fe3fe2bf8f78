use roster_core::{
    Assignment, BulkCachePolicy, BulkUpdate, Database, Member, MemberField, MemberId,
    MemberRepository, Operand, Operator, RepoError, Repository, Sort, Specification,
    SpecificationExecutor, StoreConfig, Team, TeamRepository, ValidationError,
};

const AGES: [i32; 7] = [10, 12, 14, 19, 20, 21, 40];

fn seeded_with(config: StoreConfig) -> (Database, Vec<Member>) {
    let db = Database::open_in_memory_with_config(config).unwrap();
    let members = db
        .transaction(|uow| {
            let repo = MemberRepository::new(uow);
            AGES.iter()
                .enumerate()
                .map(|(index, age)| {
                    repo.save(Member::with_age(format!("member{}", index + 1), *age))
                })
                .collect::<Result<Vec<_>, _>>()
        })
        .unwrap();
    (db, members)
}

fn ages_by_username(db: &Database) -> Vec<(String, i32)> {
    db.transaction(|uow| {
        MemberRepository::new(uow).find_all_sorted(&Sort::asc(MemberField::Username))
    })
        .unwrap()
        .into_iter()
        .map(|member| (member.username, member.age))
        .collect()
}

#[test]
fn bulk_age_plus_updates_only_qualifying_rows() {
    let (db, _) = seeded_with(StoreConfig::default());

    let affected = db
        .transaction(|uow| MemberRepository::new(uow).bulk_age_plus(14))
        .unwrap();
    assert_eq!(affected, 5);

    let ages: Vec<i32> = ages_by_username(&db).into_iter().map(|(_, age)| age).collect();
    assert_eq!(ages, vec![10, 12, 15, 20, 21, 22, 41]);
}

#[test]
fn bulk_update_bumps_versions_of_affected_rows() {
    let (db, members) = seeded_with(StoreConfig::default());
    db.transaction(|uow| MemberRepository::new(uow).bulk_age_plus(40))
        .unwrap();

    let oldest = members.last().unwrap().id.unwrap();
    let youngest = members[0].id.unwrap();
    let (oldest, youngest) = db
        .transaction(|uow| {
            let repo = MemberRepository::new(uow);
            Ok((repo.find_by_id(oldest)?, repo.find_by_id(youngest)?))
        })
        .unwrap();
    assert_eq!(oldest.unwrap().version, 1);
    assert_eq!(youngest.unwrap().version, 0);
}

#[test]
fn retain_policy_keeps_stale_cached_copy() {
    let (db, members) = seeded_with(StoreConfig::default());
    let id = members[2].id.unwrap();

    let uow = db.begin().unwrap();
    let repo = MemberRepository::new(&uow);
    assert_eq!(repo.find_by_id(id).unwrap().unwrap().age, 14);

    assert_eq!(repo.bulk_age_plus(14).unwrap(), 5);
    assert_eq!(repo.find_by_id(id).unwrap().unwrap().age, 14);
    assert_eq!(repo.find_read_only_by_id(id).unwrap().unwrap().age, 15);

    uow.clear();
    assert_eq!(repo.find_by_id(id).unwrap().unwrap().age, 15);
    uow.commit().unwrap();
}

#[test]
fn clear_all_policy_makes_cached_reads_fresh() {
    let config = StoreConfig {
        bulk_cache_policy: BulkCachePolicy::ClearAll,
        ..StoreConfig::default()
    };
    let (db, members) = seeded_with(config);
    let updated = members[2].id.unwrap();
    let untouched = members[0].id.unwrap();

    let uow = db.begin().unwrap();
    let repo = MemberRepository::new(&uow);
    repo.find_by_id(updated).unwrap();
    repo.find_by_id(untouched).unwrap();
    assert_eq!(uow.tracked_count(), 2);

    repo.bulk_age_plus(14).unwrap();
    assert_eq!(uow.tracked_count(), 0);
    assert_eq!(repo.find_by_id(updated).unwrap().unwrap().age, 15);
    uow.commit().unwrap();
}

#[test]
fn evict_affected_policy_drops_only_touched_rows() {
    let (db, members) = seeded_with(StoreConfig::default());
    let updated = members[2].id.unwrap();
    let untouched = members[0].id.unwrap();

    let uow = db.begin().unwrap();
    let repo = MemberRepository::new(&uow);
    repo.find_by_id(updated).unwrap();
    repo.find_by_id(untouched).unwrap();

    let update = BulkUpdate::new(
        Specification::condition(MemberField::Age, Operator::GreaterThanEqual, Operand::value(14))
            .unwrap(),
        vec![Assignment::add(MemberField::Age, 1).unwrap()],
    )
    .unwrap()
    .with_cache_policy(BulkCachePolicy::EvictAffected);
    assert_eq!(repo.bulk_update(&update).unwrap(), 5);

    assert!(!uow.contains::<Member>(updated));
    assert!(uow.contains::<Member>(untouched));
    assert_eq!(repo.find_by_id(updated).unwrap().unwrap().age, 15);
    uow.commit().unwrap();
}

#[test]
fn pending_saves_are_flushed_before_the_update() {
    let (db, _) = seeded_with(StoreConfig::default());
    let affected = db
        .transaction(|uow| {
            let repo = MemberRepository::new(uow);
            repo.save(Member::with_age("late", 30))?;
            repo.bulk_age_plus(30)
        })
        .unwrap();
    assert_eq!(affected, 2);
}

#[test]
fn set_assignment_can_move_members_to_a_team() {
    let (db, members) = seeded_with(StoreConfig::default());
    let ids: Vec<MemberId> = members[..2].iter().map(|member| member.id.unwrap()).collect();

    let (team, moved) = db
        .transaction(|uow| {
            let team = TeamRepository::new(uow).save(Team::new("teamA"))?;
            let spec = Specification::condition(
                MemberField::Id,
                Operator::In,
                Operand::list(ids.iter().map(|id| *id.as_uuid())),
            )?;
            let assignments = vec![Assignment::set(MemberField::TeamId, team.id.unwrap())?];
            let moved = MemberRepository::new(uow).update_where(spec, assignments)?;
            Ok((team, moved))
        })
        .unwrap();
    assert_eq!(moved, 2);

    let in_team = db
        .transaction(|uow| {
            MemberRepository::new(uow)
                .count_matching(&Specification::equal(MemberField::TeamId, team.id.unwrap())?)
        })
        .unwrap();
    assert_eq!(in_team, 2);
}

#[test]
fn invalid_assignments_are_rejected_before_sql() {
    let (db, _) = seeded_with(StoreConfig::default());
    let uow = db.begin().unwrap();
    let repo = MemberRepository::new(&uow);

    let err = repo
        .update_where(Specification::All, Vec::new())
        .unwrap_err();
    assert!(matches!(
        err,
        RepoError::Validation(ValidationError::EmptyAssignments)
    ));
    assert!(matches!(
        Assignment::set(MemberField::Version, 3),
        Err(ValidationError::InvalidAssignment { field: "version", .. })
    ));
    assert!(matches!(
        Assignment::add(MemberField::Username, 1),
        Err(ValidationError::InvalidAssignment { .. })
    ));
    assert!(!uow.is_aborted());
}

#[test]
fn failing_bulk_update_aborts_the_unit() {
    let (db, _) = seeded_with(StoreConfig::default());
    let uow = db.begin().unwrap();
    let repo = MemberRepository::new(&uow);
    repo.save(Member::with_age("pending", 50)).unwrap();

    // age - 100 violates the CHECK (age >= 0) constraint.
    let err = repo
        .update_where(
            Specification::All,
            vec![Assignment::add(MemberField::Age, -100).unwrap()],
        )
        .unwrap_err();
    assert!(matches!(err, RepoError::ConstraintViolation(_)));
    assert!(uow.is_aborted());
    assert!(matches!(
        repo.count().unwrap_err(),
        RepoError::TransactionAborted
    ));
    assert!(matches!(
        uow.commit().unwrap_err(),
        RepoError::TransactionAborted
    ));

    let ages: Vec<i32> = ages_by_username(&db).into_iter().map(|(_, age)| age).collect();
    assert_eq!(ages, AGES.to_vec());
}
