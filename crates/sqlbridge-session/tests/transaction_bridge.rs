//! Transaction coordination between a query session and a mock ORM runtime.

use asupersync::runtime::RuntimeBuilder;
use asupersync::{Cx, Outcome};
use sqlbridge_core::{
    BoxFuture, CompiledQuery, DatabaseConnection, Driver, Error, IsolationLevel, QueryError,
    RawClient, RawOutput, RawStatement, Row, StatementKind, TransactionBody,
    TransactionErrorKind, TransactionOptions, TransactionSettings, Value,
};
use sqlbridge_session::{QuerySession, RawDriver};
use std::sync::{Arc, Mutex};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
enum OpenMode {
    /// Run the body, commit when it returns Ok
    #[default]
    Normal,
    /// Fail before running the body
    FailOpen,
    /// Finish without ever running the body
    SkipBody,
    /// Run the body, then fail the native commit
    FailCommit,
}

#[derive(Default)]
struct MockState {
    events: Vec<String>,
    execute_output: Option<RawOutput>,
    mode: OpenMode,
    options: Vec<TransactionOptions>,
}

#[derive(Clone)]
struct MockClient {
    state: Arc<Mutex<MockState>>,
    scope: &'static str,
}

impl MockClient {
    fn new() -> (Self, Arc<Mutex<MockState>>) {
        let state = Arc::new(Mutex::new(MockState::default()));
        (
            Self {
                state: Arc::clone(&state),
                scope: "root",
            },
            state,
        )
    }

    fn record(&self, event: String) {
        self.state.lock().unwrap().events.push(event);
    }
}

impl RawClient for MockClient {
    fn query_raw<'a>(
        &'a self,
        _cx: &'a Cx,
        sql: &'a str,
        params: &'a [Value],
    ) -> BoxFuture<'a, Outcome<RawOutput, Error>> {
        self.record(format!("{}:query:{}", self.scope, sql));
        let row = Row::new(vec!["params".to_string()], vec![Value::from(params.len() as i64)]);
        Box::pin(async move { Outcome::Ok(RawOutput::Rows(vec![row])) })
    }

    fn execute_raw<'a>(
        &'a self,
        _cx: &'a Cx,
        sql: &'a str,
        _params: &'a [Value],
    ) -> BoxFuture<'a, Outcome<RawOutput, Error>> {
        self.record(format!("{}:execute:{}", self.scope, sql));
        let output = self
            .state
            .lock()
            .unwrap()
            .execute_output
            .clone()
            .unwrap_or(RawOutput::Count(1));
        Box::pin(async move { Outcome::Ok(output) })
    }

    fn transaction(
        &self,
        _cx: &Cx,
        options: TransactionOptions,
        body: TransactionBody,
    ) -> BoxFuture<'static, Outcome<(), Error>> {
        let state = Arc::clone(&self.state);
        Box::pin(async move {
            let mode = {
                let mut guard = state.lock().unwrap();
                guard.events.push("begin".to_string());
                guard.options.push(options);
                guard.mode
            };
            match mode {
                OpenMode::FailOpen => {
                    return Outcome::Err(Error::Custom("unable to start transaction".into()));
                }
                OpenMode::SkipBody => return Outcome::Ok(()),
                OpenMode::Normal | OpenMode::FailCommit => {}
            }

            let tx: Arc<dyn RawClient> = Arc::new(MockClient {
                state: Arc::clone(&state),
                scope: "tx",
            });
            let outcome = body(tx).await;
            let mut guard = state.lock().unwrap();
            match (&outcome, mode) {
                (Outcome::Ok(()), OpenMode::FailCommit) => {
                    guard.events.push("commit-failed".to_string());
                    Outcome::Err(Error::Query(QueryError {
                        sql: None,
                        sqlstate: Some("40001".to_string()),
                        message: "could not serialize access".to_string(),
                        source: None,
                    }))
                }
                (Outcome::Ok(()), _) => {
                    guard.events.push("commit".to_string());
                    outcome
                }
                _ => {
                    guard.events.push("rollback".to_string());
                    outcome
                }
            }
        })
    }

    fn transaction_batch<'a>(
        &'a self,
        _cx: &'a Cx,
        statements: Vec<RawStatement>,
        _options: TransactionOptions,
    ) -> BoxFuture<'a, Outcome<Vec<RawOutput>, Error>> {
        let outputs = statements.iter().map(|_| RawOutput::Count(1)).collect();
        Box::pin(async move { Outcome::Ok(outputs) })
    }
}

fn unwrap_outcome<T: std::fmt::Debug>(outcome: Outcome<T, Error>) -> T {
    match outcome {
        Outcome::Ok(v) => v,
        other => std::panic::panic_any(format!("unexpected outcome: {other:?}")),
    }
}

fn expect_err<T: std::fmt::Debug>(outcome: Outcome<T, Error>) -> Error {
    match outcome {
        Outcome::Err(e) => e,
        other => std::panic::panic_any(format!("expected error, got: {other:?}")),
    }
}

fn events(state: &Arc<Mutex<MockState>>) -> Vec<String> {
    state.lock().unwrap().events.clone()
}

fn select(sql: &str) -> CompiledQuery {
    CompiledQuery::new(StatementKind::Select, sql, vec![Value::Int(1)])
}

fn update(sql: &str) -> CompiledQuery {
    CompiledQuery::new(StatementKind::Update, sql, vec![])
}

#[test]
fn test_commit_without_begin_fails() {
    let rt = RuntimeBuilder::current_thread()
        .build()
        .expect("create asupersync runtime");
    let cx = Cx::for_testing();
    let (client, _state) = MockClient::new();
    let mut session = QuerySession::new(Arc::new(client));

    rt.block_on(async {
        let err = expect_err(session.commit_transaction(&cx).await);
        assert_eq!(
            err.transaction_kind(),
            Some(TransactionErrorKind::NoActiveTransaction)
        );
        assert!(err.to_string().contains("No transaction to commit"));
    });
}

#[test]
fn test_rollback_without_begin_fails() {
    let rt = RuntimeBuilder::current_thread()
        .build()
        .expect("create asupersync runtime");
    let cx = Cx::for_testing();
    let (client, _state) = MockClient::new();
    let mut session = QuerySession::new(Arc::new(client));

    rt.block_on(async {
        let err = expect_err(session.rollback_transaction(&cx).await);
        assert!(err.is_transaction_state());
        assert_eq!(err.code(), "P2028");
        assert!(err.to_string().to_lowercase().contains("no transaction to rollback"));
    });
}

#[test]
fn test_begin_then_commit_routes_queries_through_transaction() {
    let rt = RuntimeBuilder::current_thread()
        .build()
        .expect("create asupersync runtime");
    let cx = Cx::for_testing();
    let (client, state) = MockClient::new();
    let mut session = QuerySession::new(Arc::new(client));

    rt.block_on(async {
        unwrap_outcome(
            session
                .begin_transaction(&cx, TransactionSettings::default())
                .await,
        );
        assert!(session.has_transaction());
        assert_eq!(session.transaction_depth(), 1);

        let result = unwrap_outcome(session.execute(&cx, &select("SELECT 1")).await);
        assert_eq!(result.rows.len(), 1);
        assert_eq!(result.num_affected_rows, 0);

        unwrap_outcome(session.commit_transaction(&cx).await);
        assert!(!session.has_transaction());
        assert!(session.transaction_session().is_none());

        unwrap_outcome(session.execute(&cx, &select("SELECT 2")).await);
    });

    assert_eq!(
        events(&state),
        vec![
            "begin".to_string(),
            "tx:query:SELECT 1".to_string(),
            "commit".to_string(),
            "root:query:SELECT 2".to_string(),
        ]
    );
}

#[test]
fn test_second_begin_reuses_open_transaction() {
    let rt = RuntimeBuilder::current_thread()
        .build()
        .expect("create asupersync runtime");
    let cx = Cx::for_testing();
    let (client, state) = MockClient::new();
    let mut session = QuerySession::new(Arc::new(client));

    rt.block_on(async {
        unwrap_outcome(
            session
                .begin_transaction(&cx, TransactionSettings::default())
                .await,
        );
        let first = session.transaction_session().map(std::ptr::from_ref);

        unwrap_outcome(
            session
                .begin_transaction(
                    &cx,
                    TransactionSettings::new().isolation_level(IsolationLevel::Serializable),
                )
                .await,
        );
        let second = session.transaction_session().map(std::ptr::from_ref);

        assert_eq!(first, second);
        assert_eq!(session.transaction_depth(), 1);
        unwrap_outcome(session.commit_transaction(&cx).await);
    });

    let begins = events(&state).iter().filter(|e| *e == "begin").count();
    assert_eq!(begins, 1);
}

#[test]
fn test_rollback_fails_and_clears_transaction() {
    let rt = RuntimeBuilder::current_thread()
        .build()
        .expect("create asupersync runtime");
    let cx = Cx::for_testing();
    let (client, state) = MockClient::new();
    let mut session = QuerySession::new(Arc::new(client));

    rt.block_on(async {
        unwrap_outcome(
            session
                .begin_transaction(&cx, TransactionSettings::default())
                .await,
        );

        let err = expect_err(session.rollback_transaction(&cx).await);
        assert_eq!(err.transaction_kind(), Some(TransactionErrorKind::Aborted));
        assert!(!session.has_transaction());

        let err = expect_err(session.commit_transaction(&cx).await);
        assert_eq!(
            err.transaction_kind(),
            Some(TransactionErrorKind::NoActiveTransaction)
        );
        let err = expect_err(session.rollback_transaction(&cx).await);
        assert_eq!(
            err.transaction_kind(),
            Some(TransactionErrorKind::NoActiveTransaction)
        );
    });

    // The parked body never returned, so the runtime never committed.
    assert!(!events(&state).iter().any(|e| e == "commit"));
}

#[test]
fn test_commit_succeeds_exactly_once() {
    let rt = RuntimeBuilder::current_thread()
        .build()
        .expect("create asupersync runtime");
    let cx = Cx::for_testing();
    let (client, state) = MockClient::new();
    let mut session = QuerySession::new(Arc::new(client));

    rt.block_on(async {
        unwrap_outcome(
            session
                .begin_transaction(&cx, TransactionSettings::default())
                .await,
        );
        unwrap_outcome(session.commit_transaction(&cx).await);
        assert!(expect_err(session.commit_transaction(&cx).await).is_transaction_state());
    });

    let commits = events(&state).iter().filter(|e| *e == "commit").count();
    assert_eq!(commits, 1);
}

#[test]
fn test_commit_surfaces_runtime_failure_and_still_clears() {
    let rt = RuntimeBuilder::current_thread()
        .build()
        .expect("create asupersync runtime");
    let cx = Cx::for_testing();
    let (client, state) = MockClient::new();
    state.lock().unwrap().mode = OpenMode::FailCommit;
    let mut session = QuerySession::new(Arc::new(client));

    rt.block_on(async {
        unwrap_outcome(
            session
                .begin_transaction(&cx, TransactionSettings::default())
                .await,
        );
        let err = expect_err(session.commit_transaction(&cx).await);
        assert_eq!(err.sqlstate(), Some("40001"));
        assert!(!session.has_transaction());
    });

    assert!(events(&state).contains(&"commit-failed".to_string()));
}

#[test]
fn test_begin_propagates_runtime_open_failure() {
    let rt = RuntimeBuilder::current_thread()
        .build()
        .expect("create asupersync runtime");
    let cx = Cx::for_testing();
    let (client, state) = MockClient::new();
    state.lock().unwrap().mode = OpenMode::FailOpen;
    let mut session = QuerySession::new(Arc::new(client));

    rt.block_on(async {
        let err = expect_err(
            session
                .begin_transaction(&cx, TransactionSettings::default())
                .await,
        );
        assert_eq!(err.to_string(), "unable to start transaction");
        assert!(!session.has_transaction());
    });
}

#[test]
fn test_begin_fails_when_runtime_never_runs_body() {
    let rt = RuntimeBuilder::current_thread()
        .build()
        .expect("create asupersync runtime");
    let cx = Cx::for_testing();
    let (client, state) = MockClient::new();
    state.lock().unwrap().mode = OpenMode::SkipBody;
    let mut session = QuerySession::new(Arc::new(client));

    rt.block_on(async {
        let err = expect_err(
            session
                .begin_transaction(&cx, TransactionSettings::default())
                .await,
        );
        assert_eq!(err.transaction_kind(), Some(TransactionErrorKind::NotStarted));
        assert!(!session.has_transaction());
    });
}

#[test]
fn test_uncommitted_transaction_stays_parked() {
    let rt = RuntimeBuilder::current_thread()
        .build()
        .expect("create asupersync runtime");
    let cx = Cx::for_testing();
    let (client, state) = MockClient::new();
    let mut session = QuerySession::new(Arc::new(client));

    rt.block_on(async {
        unwrap_outcome(
            session
                .begin_transaction(&cx, TransactionSettings::default())
                .await,
        );
        for _ in 0..3 {
            unwrap_outcome(session.execute(&cx, &update("UPDATE t SET a = 1")).await);
        }
        assert!(session.has_transaction());
    });

    let recorded = events(&state);
    assert_eq!(recorded.len(), 4);
    assert!(!recorded.iter().any(|e| e == "commit" || e == "rollback"));
}

#[test]
fn test_isolation_level_reaches_runtime() {
    let rt = RuntimeBuilder::current_thread()
        .build()
        .expect("create asupersync runtime");
    let cx = Cx::for_testing();
    let (client, state) = MockClient::new();
    let options = TransactionOptions::default().timeout(250);
    let mut session = QuerySession::with_options(Arc::new(client), options);

    rt.block_on(async {
        unwrap_outcome(
            session
                .begin_transaction(
                    &cx,
                    TransactionSettings::new().isolation_level(IsolationLevel::RepeatableRead),
                )
                .await,
        );
        unwrap_outcome(session.commit_transaction(&cx).await);
    });

    let recorded = state.lock().unwrap().options.clone();
    assert_eq!(recorded.len(), 1);
    assert_eq!(
        recorded[0].native_isolation_level(),
        Some("RepeatableRead")
    );
    assert_eq!(recorded[0].timeout_ms, 250);
}

#[test]
fn test_mutation_uses_row_count_path() {
    let rt = RuntimeBuilder::current_thread()
        .build()
        .expect("create asupersync runtime");
    let cx = Cx::for_testing();
    let (client, state) = MockClient::new();
    let session = QuerySession::new(Arc::new(client));

    rt.block_on(async {
        state.lock().unwrap().execute_output = Some(RawOutput::Text("3".to_string()));
        let result = unwrap_outcome(session.execute(&cx, &update("UPDATE t SET a = 1")).await);
        assert_eq!(result.num_affected_rows, 3);
        assert!(result.rows.is_empty());

        state.lock().unwrap().execute_output = Some(RawOutput::Text("many".to_string()));
        let result = unwrap_outcome(session.execute(&cx, &update("UPDATE t SET a = 2")).await);
        assert_eq!(result.num_affected_rows, 0);

        let returning = update("UPDATE t SET a = 3 RETURNING a").with_returning();
        let result = unwrap_outcome(session.execute(&cx, &returning).await);
        assert_eq!(result.rows.len(), 1);
        // Row-path output carries no count.
        assert_eq!(result.num_affected_rows, 0);
    });

    assert_eq!(
        events(&state),
        vec![
            "root:execute:UPDATE t SET a = 1".to_string(),
            "root:execute:UPDATE t SET a = 2".to_string(),
            "root:query:UPDATE t SET a = 3 RETURNING a".to_string(),
        ]
    );
}

#[test]
fn test_stream_query_is_unsupported() {
    let rt = RuntimeBuilder::current_thread()
        .build()
        .expect("create asupersync runtime");
    let cx = Cx::for_testing();
    let (client, _state) = MockClient::new();
    let session = QuerySession::new(Arc::new(client));

    rt.block_on(async {
        for chunk in [0, 1, 1_000] {
            let err = expect_err(session.stream_query(&cx, &select("SELECT 1"), chunk).await);
            assert!(err.is_unsupported());
            assert_eq!(err.code(), "P6006");
        }
    });
}

#[test]
fn test_driver_forwards_to_sessions() {
    let rt = RuntimeBuilder::current_thread()
        .build()
        .expect("create asupersync runtime");
    let cx = Cx::for_testing();
    let (client, state) = MockClient::new();
    let driver = RawDriver::new(Arc::new(client));

    rt.block_on(async {
        unwrap_outcome(driver.init(&cx).await);
        let mut conn = unwrap_outcome(driver.acquire_connection(&cx).await);
        let other = unwrap_outcome(driver.acquire_connection(&cx).await);

        unwrap_outcome(
            driver
                .begin_transaction(&cx, &mut conn, TransactionSettings::default())
                .await,
        );
        assert!(conn.has_transaction());
        assert!(!other.has_transaction());

        unwrap_outcome(driver.commit_transaction(&cx, &mut conn).await);
        assert!(!conn.has_transaction());

        let err = expect_err(driver.rollback_transaction(&cx, &mut conn).await);
        assert!(err.to_string().contains("No transaction to rollback"));

        unwrap_outcome(driver.release_connection(&cx, conn).await);
        unwrap_outcome(driver.release_connection(&cx, other).await);
        unwrap_outcome(driver.destroy(&cx).await);
    });

    assert_eq!(events(&state), vec!["begin".to_string(), "commit".to_string()]);
}
