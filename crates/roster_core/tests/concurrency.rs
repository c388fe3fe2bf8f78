use roster_core::engine::Projection;
use roster_core::{
    ConcurrencyMode, Database, LockMode, Member, MemberId, MemberRepository, MemberSpec,
    PageRequest, RepoError, Repository, Sort, Specification, SpecificationExecutor,
    SqliteRepository, StoreConfig,
};
use rusqlite::Row;
use std::thread;
use std::time::Duration;
use tempfile::TempDir;

fn open(config: StoreConfig) -> (TempDir, Database) {
    let dir = tempfile::tempdir().unwrap();
    let db = Database::open_with_config(dir.path().join("roster.db"), config).unwrap();
    (dir, db)
}

fn optimistic() -> StoreConfig {
    StoreConfig {
        member_concurrency: ConcurrencyMode::Optimistic,
        ..StoreConfig::default()
    }
}

fn short_timeouts() -> StoreConfig {
    StoreConfig {
        lock_timeout_ms: 150,
        ..StoreConfig::default()
    }
}

fn insert(db: &Database, username: &str, age: i32) -> MemberId {
    db.transaction(|uow| MemberRepository::new(uow).save(Member::with_age(username, age)))
        .unwrap()
        .id
        .unwrap()
}

fn load(db: &Database, id: MemberId) -> Member {
    db.transaction(|uow| MemberRepository::new(uow).find_by_id(id))
        .unwrap()
        .unwrap()
}

#[test]
fn optimistic_mode_rejects_stale_commit() {
    let (_dir, db) = open(optimistic());
    let id = insert(&db, "member1", 10);

    let first = db.begin().unwrap();
    let second = db.begin().unwrap();
    let mut first_copy = MemberRepository::new(&first).find_by_id(id).unwrap().unwrap();
    let mut second_copy = MemberRepository::new(&second).find_by_id(id).unwrap().unwrap();

    first_copy.age = 11;
    MemberRepository::new(&first).save(first_copy).unwrap();
    first.commit().unwrap();

    second_copy.age = 12;
    MemberRepository::new(&second).save(second_copy).unwrap();
    let err = second.commit().unwrap_err();
    assert!(matches!(
        err,
        RepoError::Conflict {
            entity: "member",
            expected_version: 0,
            ..
        }
    ));

    let stored = load(&db, id);
    assert_eq!(stored.age, 11);
    assert_eq!(stored.version, 1);
}

#[test]
fn optimistic_conflict_aborts_the_unit() {
    let (_dir, db) = open(optimistic());
    let id = insert(&db, "member1", 10);
    let other = insert(&db, "member2", 20);

    let stale = db.begin().unwrap();
    let repo = MemberRepository::new(&stale);
    let mut copy = repo.find_by_id(id).unwrap().unwrap();

    db.transaction(|uow| {
        let repo = MemberRepository::new(uow);
        let mut fresh = repo.find_by_id(id)?.unwrap();
        fresh.age = 30;
        repo.save(fresh).map(|_| ())
    })
    .unwrap();

    let mut untouched = repo.find_by_id(other).unwrap().unwrap();
    untouched.age = 21;
    repo.save(untouched).unwrap();
    copy.age = 99;
    repo.save(copy).unwrap();

    assert!(matches!(stale.flush().unwrap_err(), RepoError::Conflict { .. }));
    assert!(stale.is_aborted());
    assert!(matches!(
        repo.find_by_id(other).unwrap_err(),
        RepoError::TransactionAborted
    ));
    stale.rollback().unwrap();

    assert_eq!(load(&db, id).age, 30);
    assert_eq!(load(&db, other).age, 20);
}

#[test]
fn returned_copy_can_be_saved_again_in_a_later_unit() {
    let (_dir, db) = open(optimistic());
    let id = insert(&db, "member1", 10);

    let mut saved = db
        .transaction(|uow| {
            let repo = MemberRepository::new(uow);
            let mut member = repo.find_by_id(id)?.unwrap();
            member.age = 11;
            repo.save(member)
        })
        .unwrap();
    assert_eq!(saved.version, 1);
    assert_eq!(load(&db, id), saved);

    saved.age = 12;
    let resaved = db
        .transaction(|uow| MemberRepository::new(uow).save(saved))
        .unwrap();
    assert_eq!(resaved.version, 2);
    assert_eq!(load(&db, id), resaved);
}

#[test]
fn optimistic_save_of_a_row_deleted_elsewhere_is_a_conflict() {
    let (_dir, db) = open(optimistic());
    let id = insert(&db, "member1", 10);

    let stale = db.begin().unwrap();
    let repo = MemberRepository::new(&stale);
    let mut copy = repo.find_by_id(id).unwrap().unwrap();

    db.transaction(|uow| MemberRepository::new(uow).delete_by_id(id))
        .unwrap();

    copy.age = 99;
    repo.save(copy).unwrap();
    let err = stale.commit().unwrap_err();
    assert!(matches!(
        err,
        RepoError::Conflict {
            entity: "member",
            expected_version: 0,
            ..
        }
    ));

    let gone = db
        .transaction(|uow| MemberRepository::new(uow).find_by_id(id))
        .unwrap();
    assert_eq!(gone, None);
}

#[test]
fn reads_inside_a_unit_share_one_snapshot() {
    let (_dir, db) = open(StoreConfig::default());
    insert(&db, "member1", 10);

    let reader = db.begin().unwrap();
    let repo = MemberRepository::new(&reader);
    assert_eq!(repo.count().unwrap(), 1);

    insert(&db, "member2", 20);

    assert_eq!(repo.find_all().unwrap().len(), 1);
    let page = repo
        .find_page(&Specification::All, &PageRequest::of(0, 10).unwrap())
        .unwrap();
    assert_eq!(page.content.len(), 1);
    assert_eq!(page.total_elements, 1);
    reader.commit().unwrap();

    let count = db
        .transaction(|uow| MemberRepository::new(uow).count())
        .unwrap();
    assert_eq!(count, 2);
}

#[test]
fn first_write_moves_reads_to_the_latest_committed_state() {
    let (_dir, db) = open(StoreConfig::default());
    insert(&db, "member1", 10);

    let unit = db.begin().unwrap();
    let repo = MemberRepository::new(&unit);
    assert_eq!(repo.count().unwrap(), 1);

    insert(&db, "member2", 20);

    repo.save(Member::new("member3")).unwrap();
    assert_eq!(repo.count().unwrap(), 3);
    unit.commit().unwrap();
}

#[test]
fn last_writer_wins_by_default() {
    let (_dir, db) = open(StoreConfig::default());
    let id = insert(&db, "member1", 10);

    let first = db.begin().unwrap();
    let second = db.begin().unwrap();
    let mut first_copy = MemberRepository::new(&first).find_by_id(id).unwrap().unwrap();
    let mut second_copy = MemberRepository::new(&second).find_by_id(id).unwrap().unwrap();

    first_copy.age = 11;
    MemberRepository::new(&first).save(first_copy).unwrap();
    first.commit().unwrap();

    second_copy.age = 12;
    MemberRepository::new(&second).save(second_copy).unwrap();
    second.commit().unwrap();

    let stored = load(&db, id);
    assert_eq!(stored.age, 12);
    assert_eq!(stored.version, 2);
}

#[test]
fn uncommitted_writes_are_invisible_to_other_units() {
    let (_dir, db) = open(StoreConfig::default());
    let writer = db.begin().unwrap();
    MemberRepository::new(&writer)
        .save(Member::new("member1"))
        .unwrap();
    writer.flush().unwrap();

    let seen_before = db
        .transaction(|uow| MemberRepository::new(uow).count())
        .unwrap();
    writer.commit().unwrap();
    let seen_after = db
        .transaction(|uow| MemberRepository::new(uow).count())
        .unwrap();

    assert_eq!(seen_before, 0);
    assert_eq!(seen_after, 1);
}

#[test]
fn pessimistic_write_lock_times_out_other_thread() {
    let (_dir, db) = open(short_timeouts());
    let id = insert(&db, "member1", 10);

    let holder = db.begin().unwrap();
    let locked = MemberRepository::new(&holder)
        .find_lock_by_username("member1")
        .unwrap();
    assert_eq!(locked.len(), 1);

    let blocked = thread::scope(|scope| {
        scope
            .spawn(|| {
                let uow = db.begin()?;
                MemberRepository::new(&uow).find_lock_by_username("member1")
            })
            .join()
            .unwrap()
    });
    match blocked {
        Err(RepoError::LockTimeout { resource }) => {
            assert_eq!(resource, format!("member:{id}"));
        }
        other => panic!("expected lock timeout, got {other:?}"),
    }

    holder.commit().unwrap();

    let after_release = thread::scope(|scope| {
        scope
            .spawn(|| {
                let uow = db.begin()?;
                let rows = MemberRepository::new(&uow).find_lock_by_username("member1")?;
                uow.commit()?;
                Ok::<_, RepoError>(rows.len())
            })
            .join()
            .unwrap()
    });
    assert_eq!(after_release.unwrap(), 1);
}

#[test]
fn shared_read_locks_coexist_but_block_writers() {
    let (_dir, db) = open(short_timeouts());
    let id = insert(&db, "member1", 10);

    let reader = db.begin().unwrap();
    MemberRepository::new(&reader)
        .find_locked(&MemberSpec::username("member1"), LockMode::PessimisticRead)
        .unwrap();

    let (second_reader, writer) = thread::scope(|scope| {
        let second_reader = scope
            .spawn(|| {
                let uow = db.begin()?;
                let rows = MemberRepository::new(&uow)
                    .find_locked(&MemberSpec::username("member1"), LockMode::PessimisticRead)?;
                uow.commit()?;
                Ok::<_, RepoError>(rows.len())
            })
            .join()
            .unwrap();
        let writer = scope
            .spawn(|| {
                let uow = db.begin()?;
                let repo = MemberRepository::new(&uow);
                let mut member = repo.find_by_id(id)?.unwrap();
                member.age = 50;
                repo.save(member)?;
                uow.commit()
            })
            .join()
            .unwrap();
        (second_reader, writer)
    });

    assert_eq!(second_reader.unwrap(), 1);
    assert!(matches!(writer, Err(RepoError::LockTimeout { .. })));
    reader.commit().unwrap();
    assert_eq!(load(&db, id).age, 10);
}

#[test]
fn sqlite_writer_lock_contention_is_a_lock_timeout() {
    let (_dir, db) = open(short_timeouts());

    let first = db.begin().unwrap();
    MemberRepository::new(&first)
        .save(Member::new("member1"))
        .unwrap();
    first.flush().unwrap();

    let second = thread::scope(|scope| {
        scope
            .spawn(|| {
                let uow = db.begin()?;
                MemberRepository::new(&uow).save(Member::new("member2"))?;
                uow.commit()
            })
            .join()
            .unwrap()
    });
    assert!(matches!(second, Err(RepoError::LockTimeout { .. })));

    first.commit().unwrap();
    let count = db
        .transaction(|uow| MemberRepository::new(uow).count())
        .unwrap();
    assert_eq!(count, 1);
}

#[test]
fn units_on_separate_threads_commit_independently() {
    let (_dir, db) = open(StoreConfig::default());

    thread::scope(|scope| {
        for worker in 0..4 {
            let db = &db;
            scope.spawn(move || {
                db.transaction(|uow| {
                    let repo = MemberRepository::new(uow);
                    for index in 0..5 {
                        repo.save(Member::with_age(format!("worker{worker}-{index}"), index))?;
                    }
                    Ok(())
                })
                .unwrap();
            });
        }
    });

    let count = db
        .transaction(|uow| MemberRepository::new(uow).count())
        .unwrap();
    assert_eq!(count, 20);
}

#[test]
fn idle_cancel_does_not_poison_the_unit() {
    fn assert_send_sync<T: Send + Sync>(_: &T) {}

    let (_dir, db) = open(StoreConfig::default());
    insert(&db, "member1", 10);

    let uow = db.begin().unwrap();
    let handle = uow.cancel_handle();
    assert_send_sync(&handle);
    thread::scope(|scope| {
        scope.spawn(|| handle.cancel());
    });

    assert_eq!(MemberRepository::new(&uow).count().unwrap(), 1);
    assert!(!uow.is_aborted());
    uow.commit().unwrap();
}

/// Pairs every member row with a recursive count that never terminates.
struct EndlessCount(i64);

impl Projection<Member> for EndlessCount {
    const COLUMNS_SQL: &'static str =
        "(WITH RECURSIVE n(x) AS (SELECT 1 UNION ALL SELECT x + 1 FROM n) SELECT MAX(x) FROM n)";

    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self(row.get(0)?))
    }
}

#[test]
fn cancel_interrupts_a_running_query() {
    let (_dir, db) = open(StoreConfig::default());
    insert(&db, "member1", 10);

    let uow = db.begin().unwrap();
    let handle = uow.cancel_handle();
    let worker = thread::spawn(move || {
        let result = SqliteRepository::<Member>::new(&uow)
            .find_projected::<EndlessCount>(&Specification::All, &Sort::unsorted())
            .map(|rows| rows.len());
        (uow, result)
    });
    // The interrupt only lands once the statement is running.
    while !worker.is_finished() {
        handle.cancel();
        thread::sleep(Duration::from_millis(10));
    }

    let (uow, result) = worker.join().unwrap();
    assert!(matches!(result, Err(RepoError::Cancelled)));
    assert!(!uow.is_aborted());
    assert_eq!(MemberRepository::new(&uow).count().unwrap(), 1);
    uow.commit().unwrap();
}
