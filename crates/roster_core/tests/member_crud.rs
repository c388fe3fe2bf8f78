use roster_core::{
    Database, Member, MemberId, MemberRepository, RepoError, Repository, Team, TeamId,
    TeamRepository, ValidationError,
};

fn save_member(db: &Database, member: Member) -> Member {
    db.transaction(|uow| MemberRepository::new(uow).save(member))
        .unwrap()
}

#[test]
fn save_assigns_id_and_find_returns_equal_entity() {
    let db = Database::open_in_memory().unwrap();
    let saved = save_member(&db, Member::with_age("memberA", 10));
    let id = saved.id.unwrap();

    let loaded = db
        .transaction(|uow| MemberRepository::new(uow).find_by_id(id))
        .unwrap()
        .unwrap();
    assert_eq!(loaded, saved);
    assert_eq!(loaded.username, "memberA");
    assert_eq!(loaded.age, 10);
    assert_eq!(loaded.version, 0);
}

#[test]
fn saved_member_is_visible_inside_the_unit_before_commit() {
    let db = Database::open_in_memory().unwrap();
    let uow = db.begin().unwrap();
    let repo = MemberRepository::new(&uow);

    let saved = repo.save(Member::new("memberA")).unwrap();
    assert_eq!(uow.pending_count(), 1);
    assert_eq!(repo.find_by_id(saved.id.unwrap()).unwrap(), Some(saved));
    assert_eq!(repo.count().unwrap(), 1);
    uow.commit().unwrap();
}

#[test]
fn count_matches_find_all_and_find_all_is_ordered_by_id() {
    let db = Database::open_in_memory().unwrap();
    let (count, all) = db
        .transaction(|uow| {
            let repo = MemberRepository::new(uow);
            for name in ["member1", "member2", "member3"] {
                repo.save(Member::new(name))?;
            }
            Ok((repo.count()?, repo.find_all()?))
        })
        .unwrap();

    assert_eq!(count, 3);
    assert_eq!(all.len(), 3);
    let ids: Vec<MemberId> = all.iter().map(|member| member.id.unwrap()).collect();
    let mut sorted = ids.clone();
    sorted.sort_by_key(|id| id.to_string());
    assert_eq!(ids, sorted);
}

#[test]
fn delete_then_find_yields_none() {
    let db = Database::open_in_memory().unwrap();
    let member1 = save_member(&db, Member::new("member1"));
    let member2 = save_member(&db, Member::new("member2"));

    db.transaction(|uow| {
        let repo = MemberRepository::new(uow);
        repo.delete(&member1)?;
        repo.delete_by_id(member2.id.unwrap())
    })
    .unwrap();

    let (first, second, count) = db
        .transaction(|uow| {
            let repo = MemberRepository::new(uow);
            Ok((
                repo.find_by_id(member1.id.unwrap())?,
                repo.find_by_id(member2.id.unwrap())?,
                repo.count()?,
            ))
        })
        .unwrap();
    assert_eq!(first, None);
    assert_eq!(second, None);
    assert_eq!(count, 0);
}

#[test]
fn deleting_absent_or_unsaved_member_is_not_found() {
    let db = Database::open_in_memory().unwrap();
    let uow = db.begin().unwrap();
    let repo = MemberRepository::new(&uow);

    let err = repo.delete_by_id(MemberId::new()).unwrap_err();
    assert!(matches!(err, RepoError::NotFound { entity: "member", .. }));

    let err = repo.delete(&Member::new("never saved")).unwrap_err();
    assert!(matches!(err, RepoError::NotFound { .. }));
    assert!(!uow.is_aborted());
    uow.rollback().unwrap();
}

#[test]
fn saving_existing_id_updates_row_and_bumps_version() {
    let db = Database::open_in_memory().unwrap();
    let mut member = save_member(&db, Member::with_age("member1", 10));
    member.username = "member1-renamed".to_string();
    member.age = 11;
    save_member(&db, member.clone());

    let loaded = db
        .transaction(|uow| MemberRepository::new(uow).find_by_id(member.id.unwrap()))
        .unwrap()
        .unwrap();
    assert_eq!(loaded.username, "member1-renamed");
    assert_eq!(loaded.age, 11);
    assert_eq!(loaded.version, 1);
}

#[test]
fn repeated_saves_in_one_unit_coalesce_into_one_write() {
    let db = Database::open_in_memory().unwrap();
    let uow = db.begin().unwrap();
    let repo = MemberRepository::new(&uow);

    let mut member = repo.save(Member::with_age("member1", 10)).unwrap();
    member.age = 20;
    let member = repo.save(member).unwrap();
    assert_eq!(uow.pending_count(), 1);
    uow.commit().unwrap();

    let loaded = db
        .transaction(|uow| MemberRepository::new(uow).find_by_id(member.id.unwrap()))
        .unwrap()
        .unwrap();
    assert_eq!(loaded.age, 20);
    assert_eq!(loaded.version, 0);
}

#[test]
fn invalid_member_is_rejected_before_queueing() {
    let db = Database::open_in_memory().unwrap();
    let uow = db.begin().unwrap();
    let repo = MemberRepository::new(&uow);

    let err = repo.save(Member::with_age("   ", 10)).unwrap_err();
    assert!(matches!(
        err,
        RepoError::Validation(ValidationError::InvalidEntity(_))
    ));
    let err = repo.save(Member::with_age("member1", -1)).unwrap_err();
    assert!(matches!(err, RepoError::Validation(_)));
    assert_eq!(uow.pending_count(), 0);
    assert!(!uow.is_aborted());
}

#[test]
fn identity_map_returns_tracked_copy_until_cleared() {
    let db = Database::open_in_memory().unwrap();
    let member = save_member(&db, Member::with_age("member1", 10));
    let id = member.id.unwrap();

    let uow = db.begin().unwrap();
    let repo = MemberRepository::new(&uow);
    let first = repo.find_by_id(id).unwrap().unwrap();
    assert!(uow.contains::<Member>(id));
    assert_eq!(uow.tracked_count(), 1);

    let second = repo.find_by_id(id).unwrap().unwrap();
    assert_eq!(first, second);
    assert_eq!(repo.find_read_only_by_id(id).unwrap(), Some(first));

    uow.clear();
    assert!(!uow.contains::<Member>(id));
    assert!(repo.exists_by_id(id).unwrap());
    uow.commit().unwrap();
}

#[test]
fn find_all_by_ids_skips_missing_ids() {
    let db = Database::open_in_memory().unwrap();
    let member1 = save_member(&db, Member::new("member1"));
    let member2 = save_member(&db, Member::new("member2"));

    let found = db
        .transaction(|uow| {
            MemberRepository::new(uow).find_all_by_ids(&[
                member1.id.unwrap(),
                MemberId::new(),
                member2.id.unwrap(),
            ])
        })
        .unwrap();
    let mut names: Vec<String> = found.into_iter().map(|member| member.username).collect();
    names.sort();
    assert_eq!(names, vec!["member1", "member2"]);
}

#[test]
fn rollback_discards_queued_and_flushed_writes() {
    let db = Database::open_in_memory().unwrap();
    let uow = db.begin().unwrap();
    let repo = MemberRepository::new(&uow);
    repo.save(Member::new("member1")).unwrap();
    uow.flush().unwrap();
    repo.save(Member::new("member2")).unwrap();
    uow.rollback().unwrap();

    let count = db
        .transaction(|uow| MemberRepository::new(uow).count())
        .unwrap();
    assert_eq!(count, 0);
}

#[test]
fn dropping_an_open_unit_rolls_back() {
    let db = Database::open_in_memory().unwrap();
    {
        let uow = db.begin().unwrap();
        MemberRepository::new(&uow)
            .save(Member::new("member1"))
            .unwrap();
        uow.flush().unwrap();
    }

    let count = db
        .transaction(|uow| MemberRepository::new(uow).count())
        .unwrap();
    assert_eq!(count, 0);
}

#[test]
fn member_referencing_missing_team_is_a_constraint_violation() {
    let db = Database::open_in_memory().unwrap();
    let mut ghost = Team::new("ghost");
    ghost.id = Some(TeamId::new());

    let err = db
        .transaction(|uow| {
            MemberRepository::new(uow).save(Member::with_team("member1", 10, &ghost))
        })
        .unwrap_err();
    assert!(matches!(err, RepoError::ConstraintViolation(_)));

    let team = db
        .transaction(|uow| TeamRepository::new(uow).save(Team::new("teamA")))
        .unwrap();
    let member = save_member(&db, Member::with_team("member1", 10, &team));
    assert_eq!(member.team_id, team.id);
}

#[test]
fn in_memory_reader_sees_committed_state_while_a_writer_is_open() {
    let db = Database::open_in_memory().unwrap();
    save_member(&db, Member::new("member1"));

    let writer = db.begin().unwrap();
    MemberRepository::new(&writer)
        .save(Member::new("member2"))
        .unwrap();
    writer.flush().unwrap();

    let during = db
        .transaction(|uow| MemberRepository::new(uow).count())
        .unwrap();
    assert_eq!(during, 1);

    writer.commit().unwrap();
    let after = db
        .transaction(|uow| MemberRepository::new(uow).count())
        .unwrap();
    assert_eq!(after, 2);
}
