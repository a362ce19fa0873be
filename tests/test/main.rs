use may::go;
use may_pq::{
    named_params, params, Array, CoConnection, Config, Connection, Encoding, ErrorClass, Format,
    Prepare, TransactionStatus,
};
use server::{MockServer, Msg, PID, SECRET};
use std::sync::{Arc, Mutex};

mod live;
mod server;

fn init_log() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn connect_with(server: &MockServer, s: &str) -> Connection {
    init_log();
    let config = s.parse::<Config>().unwrap();
    let conn = config.connect_raw(server.socket()).unwrap();
    server.take_log();
    conn
}

fn connect(server: &MockServer) -> Connection {
    connect_with(server, "user=tester dbname=test")
}

fn parses(log: &[Msg]) -> Vec<String> {
    log.iter()
        .filter_map(|m| match m {
            Msg::Parse { name, .. } => Some(name.clone()),
            _ => None,
        })
        .collect()
}

fn queries(log: &[Msg]) -> Vec<String> {
    log.iter()
        .filter_map(|m| match m {
            Msg::Query(q) => Some(q.clone()),
            _ => None,
        })
        .collect()
}

#[test]
fn startup() {
    init_log();
    let server = MockServer::new();
    let mut config = Config::new();
    config
        .user("tester")
        .dbname("test")
        .application_name("may_pq tests");
    let conn = config.connect_raw(server.socket()).unwrap();

    match &server.take_log()[0] {
        Msg::Startup(params) => {
            assert!(params.contains(&("user".to_string(), "tester".to_string())));
            assert!(params.contains(&("database".to_string(), "test".to_string())));
            assert!(params.contains(&("client_encoding".to_string(), "UTF8".to_string())));
            assert!(params.contains(&("application_name".to_string(), "may_pq tests".to_string())));
        }
        m => panic!("unexpected message {:?}", m),
    }
    assert_eq!(conn.backend_pid(), PID);
    assert_eq!(conn.transaction_status(), TransactionStatus::Idle);
    assert_eq!(conn.parameter_status("server_version").as_deref(), Some("16.2"));
    assert_eq!(conn.client_encoding(), Encoding::Utf8);
    assert!(!conn.closed());
    assert!(!conn.autocommit());
}

#[test]
fn cleartext_password() {
    init_log();
    let server = MockServer::with_password("secret");
    "user=tester password=secret"
        .parse::<Config>()
        .unwrap()
        .connect_raw(server.socket())
        .unwrap();
    assert!(server
        .take_log()
        .contains(&Msg::Password(b"secret".to_vec())));
}

#[test]
fn wrong_password() {
    init_log();
    let server = MockServer::with_password("secret");
    let err = "user=tester password=nope"
        .parse::<Config>()
        .unwrap()
        .connect_raw(server.socket())
        .unwrap_err();
    assert_eq!(err.code(), Some("28P01"));
    assert_eq!(err.class(), ErrorClass::Database);
}

#[test]
fn missing_password() {
    init_log();
    let server = MockServer::with_password("secret");
    let err = "user=tester"
        .parse::<Config>()
        .unwrap()
        .connect_raw(server.socket())
        .unwrap_err();
    assert_eq!(err.class(), ErrorClass::Programming);
}

#[test]
fn simple_query() {
    let server = MockServer::new();
    let conn = connect_with(&server, "user=tester autocommit=on");

    let mut cur = conn.execute("select 1", None).unwrap();
    assert_eq!(queries(&server.take_log()), vec!["select 1"]);
    assert_eq!(cur.rowcount(), 1);
    assert_eq!(cur.status_message(), Some("SELECT 1"));
    let description = cur.description().unwrap();
    assert_eq!(description[0].name(), "?column?");
    assert_eq!(description[0].type_oid(), 23);

    let row = cur.fetch_one().unwrap().unwrap();
    assert_eq!(row.get::<_, i32>(0), 1);
    assert!(cur.fetch_one().unwrap().is_none());
    assert_eq!(conn.transaction_status(), TransactionStatus::Idle);
}

#[test]
fn query_with_params() {
    let server = MockServer::new();
    let conn = connect_with(&server, "user=tester autocommit=on");

    let mut cur = conn.cursor();
    cur.execute("select %s as x", Some(&params!["hello".to_string()]))
        .unwrap();
    let log = server.take_log();
    match &log[0] {
        Msg::Parse { name, query, .. } => {
            assert_eq!(name, "");
            assert_eq!(query, "select $1 as x");
        }
        m => panic!("unexpected message {:?}", m),
    }
    match &log[1] {
        Msg::Bind { params, .. } => assert_eq!(params, &vec![Some(b"hello".to_vec())]),
        m => panic!("unexpected message {:?}", m),
    }

    let rows = cur.fetch_all().unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].get::<_, String>("x"), "hello");
}

#[test]
fn named_params_are_reordered() {
    let server = MockServer::new();
    let conn = connect_with(&server, "user=tester autocommit=on");

    let mut cur = conn.cursor();
    cur.execute(
        "select %(b)s, %(a)s, %(b)s",
        Some(&named_params! { "a" => 1i32, "b" => 2i32 }),
    )
    .unwrap();
    let log = server.take_log();
    match &log[0] {
        Msg::Parse { query, types, .. } => {
            assert_eq!(query, "select $1, $2, $1");
            assert_eq!(types, &vec![23, 23]);
        }
        m => panic!("unexpected message {:?}", m),
    }
    match &log[1] {
        Msg::Bind { params, .. } => {
            assert_eq!(params, &vec![Some(b"2".to_vec()), Some(b"1".to_vec())])
        }
        m => panic!("unexpected message {:?}", m),
    }
    assert_eq!(cur.param_types(), &[23, 23]);
    assert_eq!(cur.param_formats(), &[Format::Text, Format::Text]);
}

#[test]
fn binary_results() {
    let server = MockServer::new();
    let conn = connect_with(&server, "user=tester autocommit=on");

    let mut cur = conn.cursor_with_format(Format::Binary);
    cur.execute("select %b", Some(&params![7i32])).unwrap();
    match &server.take_log()[1] {
        Msg::Bind {
            formats,
            params,
            result_formats,
            ..
        } => {
            assert_eq!(formats, &vec![1]);
            assert_eq!(params, &vec![Some(7i32.to_be_bytes().to_vec())]);
            assert_eq!(result_formats, &vec![1]);
        }
        m => panic!("unexpected message {:?}", m),
    }
    let row = cur.fetch_one().unwrap().unwrap();
    assert_eq!(row.columns()[0].format(), Format::Binary);
    assert_eq!(row.get::<_, i32>(0), 7);
}

#[test]
fn array_parameters_and_results() {
    let server = MockServer::new();
    let conn = connect_with(&server, "user=tester autocommit=on");

    let mut cur = conn.cursor_with_format(Format::Binary);
    cur.execute("select %b", Some(&params![vec![1i32, 2, 3]])).unwrap();
    assert_eq!(cur.param_types(), &[1007]);
    let row = cur.fetch_one().unwrap().unwrap();
    let array = row.get::<_, Array<i32>>(0);
    assert_eq!(array.into_elements(), vec![Some(1), Some(2), Some(3)]);

    let strings = vec!["a".to_string(), "b c".to_string()];
    let mut cur = conn.execute("select %s", Some(&params![strings])).unwrap();
    assert_eq!(cur.param_types(), &[0]);
    let binds = server
        .take_log()
        .into_iter()
        .filter_map(|m| match m {
            Msg::Bind { params, .. } => Some(params),
            _ => None,
        })
        .collect::<Vec<_>>();
    assert_eq!(binds.last(), Some(&vec![Some(b"{a,\"b c\"}".to_vec())]));
    let row = cur.fetch_one().unwrap().unwrap();
    assert_eq!(row.get::<_, String>(0), "{a,\"b c\"}");
}

#[test]
fn fetch_many_and_rownumber() {
    let server = MockServer::new();
    let conn = connect_with(&server, "user=tester autocommit=on");

    let mut cur = conn.execute("select generate_series(1, 3) as n", None).unwrap();
    assert_eq!(cur.rownumber(), Some(0));
    let rows = cur.fetch_many(2).unwrap();
    assert_eq!(
        rows.iter().map(|r| r.get::<_, i32>("n")).collect::<Vec<_>>(),
        vec![1, 2]
    );
    assert_eq!(cur.rownumber(), Some(2));
    let rows = cur.fetch_all().unwrap();
    assert_eq!(rows.len(), 1);
    assert!(cur.fetch_many(2).unwrap().is_empty());
}

#[test]
fn several_statements() {
    let server = MockServer::new();
    let conn = connect_with(&server, "user=tester autocommit=on");

    let mut cur = conn
        .execute("insert into t values (1); select 1", None)
        .unwrap();
    assert_eq!(cur.rowcount(), 1);
    assert_eq!(cur.status_message(), Some("INSERT 0 1"));
    assert!(cur.description().is_none());
    assert_eq!(cur.fetch_one().unwrap_err().class(), ErrorClass::Programming);

    assert!(cur.nextset());
    assert_eq!(cur.fetch_all().unwrap().len(), 1);
    assert!(!cur.nextset());
}

#[test]
fn server_error() {
    let server = MockServer::new();
    let conn = connect_with(&server, "user=tester autocommit=on");

    let err = conn.execute("fail", None).unwrap_err();
    assert_eq!(err.class(), ErrorClass::Database);
    assert_eq!(err.code(), Some("42601"));
    let db = err.as_db_error().unwrap();
    assert_eq!(db.severity(), "ERROR");
    assert_eq!(conn.transaction_status(), TransactionStatus::Idle);

    // the connection is still usable
    conn.execute("select 1", None).unwrap();
}

#[test]
fn parse_error_with_params() {
    let server = MockServer::new();
    let conn = connect_with(&server, "user=tester autocommit=on");

    let err = conn
        .execute("select syntax error %s", Some(&params![1i32]))
        .unwrap_err();
    assert_eq!(err.code(), Some("42601"));
    conn.execute("select 1", None).unwrap();
}

#[test]
fn programming_errors_send_nothing() {
    let server = MockServer::new();
    let conn = connect_with(&server, "user=tester autocommit=on");

    let err = conn
        .execute("select %s, %s", Some(&params![1i32]))
        .unwrap_err();
    assert_eq!(err.class(), ErrorClass::Programming);

    let err = conn
        .execute("select %(a)s", Some(&named_params! { "b" => 1i32 }))
        .unwrap_err();
    assert_eq!(err.class(), ErrorClass::Programming);

    let err = conn.execute("select %", Some(&params![])).unwrap_err();
    assert_eq!(err.class(), ErrorClass::Programming);

    assert!(server.take_log().is_empty());
}

#[test]
fn implicit_transaction() {
    let server = MockServer::new();
    let conn = connect(&server);

    conn.execute("select 1", None).unwrap();
    assert_eq!(queries(&server.take_log()), vec!["begin", "select 1"]);
    assert_eq!(conn.transaction_status(), TransactionStatus::InTrans);

    conn.execute("select 1", None).unwrap();
    assert_eq!(queries(&server.take_log()), vec!["select 1"]);

    conn.commit().unwrap();
    assert_eq!(queries(&server.take_log()), vec!["commit"]);
    assert_eq!(conn.transaction_status(), TransactionStatus::Idle);

    // nothing to end
    conn.commit().unwrap();
    conn.rollback().unwrap();
    assert!(server.take_log().is_empty());
}

#[test]
fn failed_transaction() {
    let server = MockServer::new();
    let conn = connect(&server);

    conn.execute("fail", None).unwrap_err();
    assert_eq!(conn.transaction_status(), TransactionStatus::InError);
    let err = conn.execute("select 1", None).unwrap_err();
    assert_eq!(err.code(), Some("25P02"));

    conn.rollback().unwrap();
    assert_eq!(conn.transaction_status(), TransactionStatus::Idle);
}

#[test]
fn autocommit() {
    let server = MockServer::new();
    let conn = connect(&server);

    conn.set_autocommit(true).unwrap();
    assert!(conn.autocommit());
    conn.execute("select 1", None).unwrap();
    assert_eq!(queries(&server.take_log()), vec!["select 1"]);

    conn.set_autocommit(false).unwrap();
    conn.execute("select 1", None).unwrap();
    let err = conn.set_autocommit(true).unwrap_err();
    assert_eq!(err.class(), ErrorClass::Programming);
    assert!(err.to_string().contains("INTRANS"));
}

#[test]
fn autocommit_is_locked_inside_a_block() {
    let server = MockServer::new();
    let conn = connect(&server);

    conn.transaction(None, false, |conn| {
        // the server is idle again, but the block is still open
        conn.execute("commit", None)?;
        assert_eq!(conn.transaction_status(), TransactionStatus::Idle);
        let err = conn.set_autocommit(true).unwrap_err();
        assert_eq!(err.class(), ErrorClass::Programming);
        assert!(err.to_string().contains("transaction() context"));
        Ok(())
    })
    .unwrap();
    assert!(!conn.autocommit());
    conn.set_autocommit(true).unwrap();
}

#[test]
fn transaction_block() {
    let server = MockServer::new();
    let conn = connect(&server);

    let value = conn
        .transaction(None, false, |conn| {
            conn.execute("insert into t values (1)", None)?;
            conn.transaction(None, false, |conn| {
                conn.execute("insert into t values (2)", None)?;
                Ok(())
            })?;
            Ok(42)
        })
        .unwrap();
    assert_eq!(value, 42);
    assert_eq!(
        queries(&server.take_log()),
        vec![
            "begin",
            "insert into t values (1)",
            "savepoint \"_pg3_2\"",
            "insert into t values (2)",
            "release savepoint \"_pg3_2\"",
            "commit",
        ]
    );
    assert_eq!(conn.transaction_status(), TransactionStatus::Idle);
}

#[test]
fn transaction_block_in_transaction() {
    let server = MockServer::new();
    let conn = connect(&server);

    conn.execute("select 1", None).unwrap();
    conn.transaction(None, false, |_| Ok(())).unwrap();
    assert_eq!(
        queries(&server.take_log()),
        vec![
            "begin",
            "select 1",
            "savepoint \"_pg3_1\"",
            "release savepoint \"_pg3_1\"",
        ]
    );
    assert_eq!(conn.transaction_status(), TransactionStatus::InTrans);
}

#[test]
fn named_savepoint() {
    let server = MockServer::new();
    let conn = connect(&server);

    conn.transaction(Some("outer"), false, |conn| {
        conn.transaction(Some("in\"ner"), false, |_| Ok(()))
    })
    .unwrap();
    assert_eq!(
        queries(&server.take_log()),
        vec![
            "begin; savepoint \"outer\"",
            "savepoint \"in\"\"ner\"",
            "release savepoint \"in\"\"ner\"",
            "commit",
        ]
    );
}

#[test]
fn transaction_block_rollback() {
    let server = MockServer::new();
    let conn = connect(&server);

    let err = conn
        .transaction(None, false, |conn| {
            conn.execute("fail", None)?;
            Ok(())
        })
        .unwrap_err();
    assert_eq!(err.code(), Some("42601"));
    assert_eq!(queries(&server.take_log()), vec!["begin", "fail", "rollback"]);
    assert_eq!(conn.transaction_status(), TransactionStatus::Idle);

    conn.transaction(None, true, |conn| {
        conn.transaction(None, false, |conn| {
            conn.execute("fail", None).map(|_| ())
        })
        .unwrap_err();
        // the savepoint recovered the transaction
        assert_eq!(conn.transaction_status(), TransactionStatus::InTrans);
        Ok(())
    })
    .unwrap();
    assert_eq!(
        queries(&server.take_log()),
        vec![
            "begin",
            "savepoint \"_pg3_2\"",
            "fail",
            "rollback to savepoint \"_pg3_2\"; release savepoint \"_pg3_2\"",
            "rollback",
        ]
    );
}

#[test]
fn transaction_block_panic() {
    let server = MockServer::new();
    let conn = connect(&server);

    let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
        conn.transaction(None, false, |_| -> Result<(), may_pq::Error> { panic!("boom") })
    }));
    assert!(result.is_err());
    assert_eq!(queries(&server.take_log()), vec!["begin", "rollback"]);

    // the block is gone
    conn.set_autocommit(true).unwrap();
}

#[test]
fn commit_forbidden_in_block() {
    let server = MockServer::new();
    let conn = connect(&server);

    conn.transaction(None, false, |conn| {
        assert_eq!(conn.commit().unwrap_err().class(), ErrorClass::Programming);
        assert_eq!(conn.rollback().unwrap_err().class(), ErrorClass::Programming);
        let err = conn.set_autocommit(true).unwrap_err();
        assert!(err.to_string().contains("transaction() context"));
        Ok(())
    })
    .unwrap();
    assert_eq!(queries(&server.take_log()), vec!["begin", "commit"]);
}

#[test]
fn prepare_threshold() {
    let server = MockServer::new();
    let conn = connect_with(&server, "user=tester autocommit=on prepare_threshold=2");
    assert_eq!(conn.prepare_threshold(), Some(2));

    let mut cur = conn.cursor();
    for _ in 0..2 {
        cur.execute("select %s", Some(&params![1i32])).unwrap();
        assert_eq!(parses(&server.take_log()), vec![""]);
    }

    cur.execute("select %s", Some(&params![1i32])).unwrap();
    let log = server.take_log();
    assert_eq!(parses(&log), vec!["_pg3_1"]);
    assert!(log.iter().any(|m| matches!(
        m,
        Msg::Bind { statement, .. } if statement == "_pg3_1"
    )));
    assert_eq!(cur.fetch_one().unwrap().unwrap().get::<_, i32>(0), 1);

    cur.execute("select %s", Some(&params![2i32])).unwrap();
    let log = server.take_log();
    assert!(parses(&log).is_empty());
    assert_eq!(cur.fetch_one().unwrap().unwrap().get::<_, i32>(0), 2);

    // queries without parameters follow the same policy
    for _ in 0..2 {
        cur.execute("select 1", None).unwrap();
        assert_eq!(queries(&server.take_log()), vec!["select 1"]);
    }
    cur.execute("select 1", None).unwrap();
    let log = server.take_log();
    assert!(queries(&log).is_empty());
    match &log[0] {
        Msg::Parse { name, query, types } => {
            assert_eq!(name, "_pg3_2");
            assert_eq!(query, "select 1");
            assert!(types.is_empty());
        }
        m => panic!("unexpected message {:?}", m),
    }
    assert_eq!(cur.fetch_one().unwrap().unwrap().get::<_, i32>(0), 1);

    cur.execute("select 1", None).unwrap();
    let log = server.take_log();
    assert!(parses(&log).is_empty());
    assert!(log.iter().any(|m| matches!(
        m,
        Msg::Bind { statement, .. } if statement == "_pg3_2"
    )));
}

#[test]
fn several_statements_are_not_prepared() {
    let server = MockServer::new();
    let conn = connect_with(&server, "user=tester autocommit=on prepare_threshold=0");

    for _ in 0..3 {
        let mut cur = conn.execute("insert into t values (1); select 1", None).unwrap();
        assert!(cur.nextset());
        let log = server.take_log();
        assert!(parses(&log).is_empty());
        assert_eq!(queries(&log), vec!["insert into t values (1); select 1"]);
    }
}

#[test]
fn prepare_hints() {
    let server = MockServer::new();
    let conn = connect_with(&server, "user=tester autocommit=on prepare_threshold=none");

    let mut cur = conn.cursor();
    cur.execute_with("select %s", Some(&params![1i32]), Prepare::Never)
        .unwrap();
    assert_eq!(parses(&server.take_log()), vec![""]);

    cur.execute_with("select %s", Some(&params![1i32]), Prepare::Force)
        .unwrap();
    assert_eq!(parses(&server.take_log()), vec!["_pg3_1"]);

    // prepared, but not used
    cur.execute_with("select %s", Some(&params![1i32]), Prepare::Never)
        .unwrap();
    assert_eq!(parses(&server.take_log()), vec![""]);
}

#[test]
fn prepared_statements_are_evicted() {
    let server = MockServer::new();
    let conn = connect_with(
        &server,
        "user=tester autocommit=on prepare_threshold=0 prepared_max=1",
    );

    conn.execute("select %s as a", Some(&params![1i32])).unwrap();
    assert_eq!(parses(&server.take_log()), vec!["_pg3_1"]);

    conn.execute("select %s as b", Some(&params![1i32])).unwrap();
    let log = server.take_log();
    assert_eq!(queries(&log), vec!["DEALLOCATE _pg3_1"]);
    assert_eq!(parses(&log), vec!["_pg3_2"]);

    conn.set_prepared_max(5);
    assert_eq!(conn.prepared_max(), 5);
}

#[test]
fn notice_handlers() {
    let server = MockServer::new();
    let conn = connect_with(&server, "user=tester autocommit=on");

    let received = Arc::new(Mutex::new(vec![]));
    conn.add_notice_handler(|_| panic!("a broken handler"));
    let r = received.clone();
    let id = conn.add_notice_handler(move |notice| {
        r.lock().unwrap().push(notice.message().to_string());
    });

    conn.execute("notice", None).unwrap();
    assert_eq!(*received.lock().unwrap(), vec!["hello"]);

    conn.remove_notice_handler(id).unwrap();
    conn.execute("notice", None).unwrap();
    assert_eq!(received.lock().unwrap().len(), 1);
    assert_eq!(
        conn.remove_notice_handler(id).unwrap_err().class(),
        ErrorClass::Programming
    );
}

#[test]
fn notify_handlers() {
    let server = MockServer::new();
    let conn = connect_with(&server, "user=tester autocommit=on");

    let received = Arc::new(Mutex::new(vec![]));
    let r = received.clone();
    conn.add_notify_handler(move |n| r.lock().unwrap().push(n.clone()));

    conn.execute("notify chan, 'payload'", None).unwrap();
    let received = received.lock().unwrap();
    assert_eq!(received.len(), 1);
    assert_eq!(received[0].channel, "chan");
    assert_eq!(received[0].payload, "payload");
    assert_eq!(received[0].pid, 99);
}

#[test]
fn notifies_iterator() {
    let server = MockServer::new();
    let conn = connect_with(&server, "user=tester autocommit=on");

    server.notify("jobs", "1");
    server.notify("jobs", "2");
    let notifies = conn
        .notifies()
        .take(2)
        .map(|n| n.unwrap().payload)
        .collect::<Vec<_>>();
    assert_eq!(notifies, vec!["1", "2"]);
}

#[test]
fn shutdown_while_idle() {
    let server = MockServer::new();
    let conn = connect_with(&server, "user=tester autocommit=on");

    server.shutdown();
    let mut notifies = conn.notifies();
    let err = notifies.next().unwrap().unwrap_err();
    assert_eq!(err.code(), Some("57P01"));
    assert_eq!(err.class(), ErrorClass::Database);
    assert!(notifies.next().is_none());
    assert!(conn.closed());
}

#[test]
fn client_encoding() {
    let server = MockServer::new();
    let conn = connect_with(&server, "user=tester autocommit=on");

    let err = conn.set_client_encoding("latin1").unwrap_err();
    assert_eq!(err.class(), ErrorClass::NotSupported);
    assert!(server.take_log().is_empty());

    conn.set_client_encoding("sql_ascii").unwrap();
    assert_eq!(conn.client_encoding(), Encoding::SqlAscii);
    match &server.take_log()[1] {
        Msg::Bind { params, .. } => assert_eq!(params, &vec![Some(b"SQL_ASCII".to_vec())]),
        m => panic!("unexpected message {:?}", m),
    }
}

#[test]
fn copy_is_not_supported() {
    let server = MockServer::new();
    let conn = connect_with(&server, "user=tester autocommit=on");

    let err = conn.execute("copy t from stdin", None).unwrap_err();
    assert_eq!(err.class(), ErrorClass::NotSupported);
    assert!(server
        .take_log()
        .iter()
        .any(|m| matches!(m, Msg::CopyFail(_))));

    let err = conn
        .execute("copy t from stdin -- %s", Some(&params![1i32]))
        .unwrap_err();
    assert_eq!(err.class(), ErrorClass::NotSupported);

    // the connection is usable again
    conn.execute("select 1", None).unwrap();
}

#[test]
fn cursor_adapters() {
    struct Doubled;

    impl may_pq::Loader for Doubled {
        fn format(&self) -> Format {
            Format::Text
        }

        fn load(&self, data: &[u8]) -> Result<Box<dyn std::any::Any + Send>, may_pq::Error> {
            let value: i32 = std::str::from_utf8(data).unwrap().parse().unwrap();
            Ok(Box::new(value * 2))
        }
    }

    let server = MockServer::new();
    let conn = connect_with(&server, "user=tester autocommit=on");

    let mut cur = conn.cursor();
    cur.register_loader(23, Doubled);
    cur.execute("select 1", None).unwrap();
    assert_eq!(cur.fetch_one().unwrap().unwrap().get::<_, i32>(0), 2);

    // other cursors are unaffected
    let mut cur = conn.execute("select 1", None).unwrap();
    assert_eq!(cur.fetch_one().unwrap().unwrap().get::<_, i32>(0), 1);

    conn.register_loader(23, Doubled);
    let mut cur = conn.execute("select 1", None).unwrap();
    assert_eq!(cur.fetch_one().unwrap().unwrap().get::<_, i32>(0), 2);
}

#[test]
fn close() {
    let server = MockServer::new();
    let conn = connect(&server);

    conn.close();
    assert!(conn.closed());
    assert!(server.terminated());
    assert_eq!(conn.transaction_status(), TransactionStatus::Unknown);

    let err = conn.execute("select 1", None).unwrap_err();
    assert_eq!(err.class(), ErrorClass::Operational);
    assert!(err.is_closed());

    // closing twice is fine
    conn.close();
}

#[test]
fn drop_terminates() {
    let server = MockServer::new();
    drop(connect(&server));
    assert!(server.terminated());
}

#[test]
fn cancel_without_host() {
    let server = MockServer::new();
    let conn = connect(&server);
    assert_eq!(conn.cancel().unwrap_err().class(), ErrorClass::Operational);

    let mut sent = vec![];
    conn.cancel_token()
        .cancel_query_raw(std::io::Cursor::new(&mut sent))
        .unwrap();
    assert_eq!(&sent[8..12], &PID.to_be_bytes());
    assert_eq!(&sent[12..16], &SECRET.to_be_bytes());
}

#[test]
fn coroutine_connection() {
    init_log();
    let server = MockServer::new();
    let s = server.clone();
    let h = go!(move || {
        let config = "user=tester".parse::<Config>().unwrap();
        let conn: CoConnection = config.connect_raw_co(s.socket()).unwrap();
        let value = conn
            .transaction(None, false, |conn| {
                let mut cur = conn.execute("select %s", Some(&params![5i32]))?;
                Ok(cur.fetch_one()?.map(|row| row.get::<_, i32>(0)))
            })
            .unwrap();
        conn.close();
        value
    });
    assert_eq!(h.join().unwrap(), Some(5));
    let log = server.take_log();
    assert_eq!(queries(&log), vec!["begin", "commit"]);
    assert!(server.terminated());
}
