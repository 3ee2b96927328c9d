use rusqlite::hooks::{AuthAction, AuthContext, Authorization, TransactionOperation};
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use tempfile::TempDir;
use txsync_core::{
    ConnectionSource, DataAccess, DataAccessError, DataSourceConfig, DbLocation, DriverSource,
    ExecutionContext, Member, MemberRepository, PooledSource, SqliteMemberRepository,
    TransactionError, TransactionManager, TransactionRegistry, TransactionTemplate, TxError,
};

struct Fixture {
    _dir: Option<TempDir>,
    source: Arc<PooledSource>,
    manager: Arc<TransactionManager>,
    template: TransactionTemplate,
    repo: SqliteMemberRepository,
}

fn fixture() -> Fixture {
    let dir = tempfile::tempdir().unwrap();
    let config = DataSourceConfig::file(dir.path().join("sync.db"));
    fixture_with(Some(dir), &config)
}

fn memory_fixture(name: &str) -> Fixture {
    let config = DataSourceConfig {
        location: DbLocation::Memory {
            name: name.to_string(),
        },
        ..DataSourceConfig::default()
    };
    fixture_with(None, &config)
}

fn fixture_with(dir: Option<TempDir>, config: &DataSourceConfig) -> Fixture {
    let source = Arc::new(PooledSource::open(config).unwrap());
    let registry = Arc::new(TransactionRegistry::new());
    let manager = Arc::new(TransactionManager::new(source.clone(), registry.clone()));
    let access = Arc::new(DataAccess::new(source.clone(), registry));
    Fixture {
        _dir: dir,
        source,
        template: TransactionTemplate::new(manager.clone()),
        manager,
        repo: SqliteMemberRepository::new(access),
    }
}

fn balance(fx: &Fixture, member_id: &str) -> i64 {
    fx.repo
        .find_by_id(&ExecutionContext::new(), member_id)
        .unwrap()
        .money
}

#[test]
fn repository_calls_in_one_transaction_share_one_connection() {
    let fx = fixture();
    let ctx = ExecutionContext::new();

    let status = fx.manager.begin(&ctx).unwrap();
    fx.repo.save(&ctx, &Member::new("memberA", 100)).unwrap();
    fx.repo.save(&ctx, &Member::new("memberB", 200)).unwrap();
    fx.repo.update(&ctx, "memberA", 50).unwrap();
    assert_eq!(fx.repo.find_by_id(&ctx, "memberA").unwrap().money, 50);

    assert_eq!(fx.source.stats().acquired, 1);
    assert_eq!(fx.source.stats().released, 0);

    fx.manager.commit(status).unwrap();
    assert_eq!(fx.source.stats().acquired, 1);
    assert_eq!(fx.source.stats().released, 1);
    assert!(fx.manager.registry().active_contexts().is_empty());
}

#[test]
fn committed_scenario_is_visible_on_fresh_connection() {
    let fx = fixture();
    let ctx = ExecutionContext::new();

    let status = fx.manager.begin(&ctx).unwrap();
    fx.repo.save(&ctx, &Member::new("memberA", 10_000)).unwrap();
    fx.repo.save(&ctx, &Member::new("memberB", 10_000)).unwrap();
    fx.repo.update(&ctx, "memberA", 8_000).unwrap();
    fx.repo.update(&ctx, "memberB", 12_000).unwrap();
    fx.manager.commit(status).unwrap();

    assert_eq!(balance(&fx, "memberA"), 8_000);
    assert_eq!(balance(&fx, "memberB"), 12_000);
    assert!(fx.manager.registry().lookup(&ctx).is_none());
}

#[test]
fn business_failure_before_second_update_rolls_back_first() {
    let fx = fixture();
    fx.repo
        .save(&ExecutionContext::new(), &Member::new("memberA", 10_000))
        .unwrap();
    let ctx = ExecutionContext::new();

    let result = fx.template.execute(&ctx, |_| {
        fx.repo
            .update(&ctx, "memberA", 8_000)
            .map_err(|err| err.to_string())?;
        Err::<(), _>("business rule violated".to_string())
    });

    assert!(matches!(result, Err(TxError::Work(ref message)) if message == "business rule violated"));
    assert_eq!(balance(&fx, "memberA"), 10_000);
}

#[test]
fn non_transactional_calls_acquire_and_release_per_call() {
    let fx = fixture();
    let ctx = ExecutionContext::new();

    fx.repo.save(&ctx, &Member::new("memberA", 100)).unwrap();
    fx.repo.find_by_id(&ctx, "memberA").unwrap();

    assert_eq!(fx.source.stats().acquired, 2);
    assert_eq!(fx.source.stats().outstanding(), 0);
    assert!(!fx.manager.registry().is_bound(&ctx));
}

#[test]
fn second_begin_on_same_context_joins() {
    let fx = fixture();
    let ctx = ExecutionContext::new();

    let outer = fx.manager.begin(&ctx).unwrap();
    let inner = fx.manager.begin(&ctx).unwrap();
    assert!(outer.is_new());
    assert!(!inner.is_new());
    assert_eq!(outer.connection_id(), inner.connection_id());
    assert_eq!(fx.source.stats().acquired, 1);

    fx.manager.commit(inner).unwrap();
    assert!(fx.manager.registry().is_bound(&ctx));
    fx.manager.commit(outer).unwrap();
    assert!(!fx.manager.registry().is_bound(&ctx));
}

#[test]
fn uncommitted_writes_are_invisible_to_other_contexts() {
    let fx = fixture();
    fx.repo
        .save(&ExecutionContext::new(), &Member::new("memberA", 10_000))
        .unwrap();
    let ctx = ExecutionContext::new();

    let status = fx.manager.begin(&ctx).unwrap();
    fx.repo.update(&ctx, "memberA", 1).unwrap();
    assert_eq!(fx.repo.find_by_id(&ctx, "memberA").unwrap().money, 1);
    assert_eq!(balance(&fx, "memberA"), 10_000);

    fx.manager.commit(status).unwrap();
    assert_eq!(balance(&fx, "memberA"), 1);
}

#[test]
fn rollback_discards_writes_and_clears_binding() {
    let fx = fixture();
    let ctx = ExecutionContext::new();

    let status = fx.manager.begin(&ctx).unwrap();
    fx.repo.save(&ctx, &Member::new("memberA", 100)).unwrap();
    fx.manager.rollback(status).unwrap();

    assert!(fx
        .repo
        .find_by_id(&ExecutionContext::new(), "memberA")
        .is_err());
    assert!(fx.manager.registry().active_contexts().is_empty());
    assert_eq!(fx.source.stats().outstanding(), 0);
}

#[test]
fn complete_commits_or_rolls_back_by_flag() {
    let fx = fixture();
    let ctx = ExecutionContext::new();

    let status = fx.manager.begin(&ctx).unwrap();
    fx.repo.save(&ctx, &Member::new("kept", 1)).unwrap();
    fx.manager.complete(status, true).unwrap();

    let status = fx.manager.begin(&ctx).unwrap();
    fx.repo.save(&ctx, &Member::new("dropped", 1)).unwrap();
    fx.manager.complete(status, false).unwrap();

    assert_eq!(balance(&fx, "kept"), 1);
    assert!(fx
        .repo
        .find_by_id(&ExecutionContext::new(), "dropped")
        .is_err());
}

#[test]
fn released_connection_is_back_in_autocommit_mode() {
    let fx = fixture();
    let ctx = ExecutionContext::new();

    let status = fx.manager.begin(&ctx).unwrap();
    let bound = fx.manager.registry().lookup(&ctx).unwrap();
    assert!(!bound.lock().is_autocommit());
    drop(bound);
    fx.manager.rollback(status).unwrap();

    let handle = fx.source.acquire().unwrap();
    assert!(handle.is_autocommit());
    fx.source.release(handle);
}

#[test]
fn template_commits_successful_work() {
    let fx = fixture();
    let ctx = ExecutionContext::new();

    let saved = fx
        .template
        .execute(&ctx, |status| {
            assert!(status.is_new());
            fx.repo.save(&ctx, &Member::new("memberA", 42))
        })
        .unwrap();

    assert_eq!(saved.member_id, "memberA");
    assert_eq!(balance(&fx, "memberA"), 42);
    assert_eq!(fx.source.stats().outstanding(), 0);
}

#[test]
fn template_rolls_back_failed_work_as_work_error() {
    let fx = fixture();
    let ctx = ExecutionContext::new();

    let err = fx
        .template
        .execute(&ctx, |_| {
            fx.repo.save(&ctx, &Member::new("memberA", 42))?;
            fx.repo.find_by_id(&ctx, "missing")
        })
        .unwrap_err();

    assert!(!err.is_commit_failure());
    assert!(matches!(err, TxError::Work(_)));
    assert!(fx
        .repo
        .find_by_id(&ExecutionContext::new(), "memberA")
        .is_err());
    assert!(!fx.manager.registry().is_bound(&ctx));
}

#[test]
fn template_rolls_back_when_work_panics() {
    let fx = fixture();
    fx.repo
        .save(&ExecutionContext::new(), &Member::new("memberA", 10))
        .unwrap();
    let ctx = ExecutionContext::new();

    let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
        fx.template.execute(&ctx, |_| -> Result<(), String> {
            fx.repo.update(&ctx, "memberA", 0).unwrap();
            panic!("work exploded");
        })
    }));

    assert!(outcome.is_err());
    assert_eq!(balance(&fx, "memberA"), 10);
    assert!(!fx.manager.registry().is_bound(&ctx));
    assert_eq!(fx.source.stats().outstanding(), 0);
}

#[test]
fn inner_failure_marks_outer_transaction_rollback_only() {
    let fx = fixture();
    let ctx = ExecutionContext::new();

    let err = fx
        .template
        .execute(&ctx, |_| -> Result<(), String> {
            fx.repo.save(&ctx, &Member::new("memberA", 1)).unwrap();
            let inner = fx.template.execute(&ctx, |status| {
                assert!(!status.is_new());
                Err::<(), _>("inner failed".to_string())
            });
            assert!(matches!(inner, Err(TxError::Work(_))));
            Ok(())
        })
        .unwrap_err();

    assert!(err.is_commit_failure());
    assert!(matches!(err, TxError::Tx(TransactionError::RollbackOnly(c)) if c == ctx));
    assert!(fx
        .repo
        .find_by_id(&ExecutionContext::new(), "memberA")
        .is_err());
}

#[test]
fn deferred_constraint_failure_surfaces_as_commit_failure() {
    let fx = fixture();
    let setup = fx.source.acquire().unwrap();
    setup
        .execute_batch(
            "CREATE TABLE parent (id INTEGER PRIMARY KEY);
             CREATE TABLE child (
                 id INTEGER PRIMARY KEY,
                 parent_id INTEGER NOT NULL
                     REFERENCES parent(id) DEFERRABLE INITIALLY DEFERRED
             );",
        )
        .unwrap();
    fx.source.release(setup);

    let registry = fx.manager.registry().clone();
    let access = DataAccess::new(fx.source.clone(), registry);
    let ctx = ExecutionContext::new();

    let err = fx
        .template
        .execute(&ctx, |_| {
            access.execute_update(
                &ctx,
                "insert_child",
                "INSERT INTO child (id, parent_id) VALUES (?1, ?2);",
                [1_i64, 99],
            )
        })
        .unwrap_err();

    assert!(err.is_commit_failure());
    match err {
        TxError::Tx(TransactionError::Commit(cause)) => {
            assert!(!cause.is_duplicate_key());
            assert_eq!(cause.error_code(), "data_integrity");
        }
        other => panic!("expected commit failure, got {other:?}"),
    }
    assert!(!fx.manager.registry().is_bound(&ctx));
    assert_eq!(fx.source.stats().outstanding(), 0);

    let check = fx.source.acquire().unwrap();
    let rows: i64 = check
        .query_row("SELECT COUNT(*) FROM child;", [], |row| row.get(0))
        .unwrap();
    assert_eq!(rows, 0);
    fx.source.release(check);
}

#[test]
fn concurrent_contexts_use_distinct_connections() {
    let fx = fixture();
    let ctx_a = ExecutionContext::new();
    let ctx_b = ExecutionContext::new();

    let status = fx.manager.begin(&ctx_a).unwrap();
    fx.repo.save(&ctx_a, &Member::new("memberA", 1)).unwrap();
    assert!(fx.repo.find_by_id(&ctx_b, "memberA").is_err());
    assert_eq!(fx.source.stats().acquired, 2);
    assert!(!fx.manager.registry().is_bound(&ctx_b));

    fx.manager.commit(status).unwrap();
    assert_eq!(fx.repo.find_by_id(&ctx_b, "memberA").unwrap().money, 1);
}

fn run_parallel_increments(fx: Fixture) {
    let fx = Arc::new(fx);
    fx.repo
        .save(&ExecutionContext::new(), &Member::new("counter", 0))
        .unwrap();

    let workers = (0..8)
        .map(|_| {
            let fx = Arc::clone(&fx);
            std::thread::spawn(move || {
                let ctx = ExecutionContext::new();
                fx.template
                    .execute(&ctx, |_| {
                        let current = fx.repo.find_by_id(&ctx, "counter")?;
                        fx.repo.update(&ctx, "counter", current.money + 1)
                    })
                    .unwrap();
            })
        })
        .collect::<Vec<_>>();
    for worker in workers {
        worker.join().unwrap();
    }

    assert_eq!(balance(&fx, "counter"), 8);
    assert!(fx.manager.registry().active_contexts().is_empty());
    assert_eq!(fx.source.stats().outstanding(), 0);
}

#[test]
fn parallel_transactions_are_isolated_per_context() {
    run_parallel_increments(fixture());
}

#[test]
fn parallel_transactions_wait_for_each_other_on_memory_database() {
    run_parallel_increments(memory_fixture("parallel_memory"));
}

#[test]
fn memory_database_reader_sees_committed_state_after_writer_finishes() {
    let fx = memory_fixture("memory_visibility");
    let writer = ExecutionContext::new();

    let status = fx.manager.begin(&writer).unwrap();
    fx.repo.save(&writer, &Member::new("memberA", 1)).unwrap();
    fx.manager.commit(status).unwrap();

    assert_eq!(balance(&fx, "memberA"), 1);
    assert_eq!(fx.source.stats().outstanding(), 0);
}

#[test]
fn driver_source_supports_the_same_transaction_flow() {
    let config = DataSourceConfig {
        location: DbLocation::Memory {
            name: "transaction_sync_driver".to_string(),
        },
        ..DataSourceConfig::default()
    };
    let source = Arc::new(DriverSource::open(&config).unwrap());
    let registry = Arc::new(TransactionRegistry::new());
    let manager = Arc::new(TransactionManager::new(source.clone(), registry.clone()));
    let repo = SqliteMemberRepository::new(Arc::new(DataAccess::new(source.clone(), registry)));
    let ctx = ExecutionContext::new();

    let status = manager.begin(&ctx).unwrap();
    repo.save(&ctx, &Member::new("memberA", 5)).unwrap();
    manager.commit(status).unwrap();

    let status = manager.begin(&ctx).unwrap();
    repo.update(&ctx, "memberA", 0).unwrap();
    manager.rollback(status).unwrap();

    assert_eq!(repo.find_by_id(&ctx, "memberA").unwrap().money, 5);
    assert_eq!(source.stats().outstanding(), 0);
}

#[test]
fn exhausted_pool_fails_begin_as_transient_and_leaves_no_binding() {
    let dir = tempfile::tempdir().unwrap();
    let config = DataSourceConfig {
        max_size: 1,
        connection_timeout_ms: 50,
        ..DataSourceConfig::file(dir.path().join("exhausted.db"))
    };
    let fx = fixture_with(Some(dir), &config);
    let held = fx.source.acquire().unwrap();
    let ctx = ExecutionContext::new();

    let err = fx.manager.begin(&ctx).unwrap_err();

    assert!(matches!(
        err,
        TransactionError::Begin(DataAccessError::TransientFailure(_))
    ));
    assert!(!fx.manager.registry().is_bound(&ctx));
    fx.source.release(held);
    assert_eq!(fx.source.stats().outstanding(), 0);
}

#[test]
fn failed_rollback_is_not_escalated_and_connection_is_released() {
    let dir = tempfile::tempdir().unwrap();
    let source = Arc::new(
        DriverSource::open(&DataSourceConfig::file(dir.path().join("deny.db"))).unwrap(),
    );
    let registry = Arc::new(TransactionRegistry::new());
    let manager = TransactionManager::new(source.clone(), registry.clone());
    let repo = SqliteMemberRepository::new(Arc::new(DataAccess::new(
        source.clone(),
        registry.clone(),
    )));
    let ctx = ExecutionContext::new();

    let status = manager.begin(&ctx).unwrap();
    repo.save(&ctx, &Member::new("memberA", 1)).unwrap();
    let bound = registry.lookup(&ctx).unwrap();
    bound.lock().authorizer(Some(|auth: AuthContext<'_>| match auth.action {
        AuthAction::Transaction {
            operation: TransactionOperation::Rollback,
        } => Authorization::Deny,
        _ => Authorization::Allow,
    }));
    drop(bound);

    manager.rollback(status).unwrap();

    assert!(!registry.is_bound(&ctx));
    assert_eq!(source.stats().outstanding(), 0);
    assert!(repo.find_by_id(&ctx, "memberA").is_err());
}
