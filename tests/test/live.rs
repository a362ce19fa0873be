//! Tests against a real server, listening on port 5433.

use may::go;
use may_pq::{params, Connection, ErrorClass, Format, TransactionStatus};
use std::time::Duration;

const CONNINFO: &str = "host=localhost port=5433 user=postgres";

fn connect(s: &str) -> Connection {
    may_pq::connect(s).unwrap()
}

#[test]
#[ignore]
fn smoke_test() {
    let conn = connect(CONNINFO);
    let mut cur = conn.execute("select %s::int", Some(&params![1i32])).unwrap();
    assert_eq!(cur.fetch_one().unwrap().unwrap().get::<_, i32>(0), 1);
    assert_eq!(conn.transaction_status(), TransactionStatus::InTrans);
    conn.rollback().unwrap();
    conn.close();
}

#[test]
#[ignore]
fn binary_cursor() {
    let conn = connect(CONNINFO);
    let mut cur = conn.cursor_with_format(Format::Binary);
    cur.execute("select %b::int8, %s::text", Some(&params![42i64, "hi"]))
        .unwrap();
    let row = cur.fetch_one().unwrap().unwrap();
    assert_eq!(row.get::<_, i64>(0), 42);
    assert_eq!(row.get::<_, String>(1), "hi");
    conn.close();
}

#[test]
#[ignore]
fn wrong_port() {
    let err = may_pq::connect("host=localhost port=1 user=postgres connect_timeout=2").unwrap_err();
    assert_eq!(err.class(), ErrorClass::Operational);
}

#[test]
#[ignore]
fn cancel_query() {
    let conn = connect(&format!("{} autocommit=on", CONNINFO));
    let token = conn.cancel_token();
    let h = go!(move || {
        may::coroutine::sleep(Duration::from_millis(200));
        token.cancel_query().unwrap();
    });
    let err = conn.execute("select pg_sleep(10)", None).unwrap_err();
    assert_eq!(err.code(), Some("57014"));
    h.join().unwrap();
    conn.close();
}

#[test]
#[ignore]
fn listen_notify() {
    let conn = connect(&format!("{} autocommit=on", CONNINFO));
    conn.execute("listen jobs", None).unwrap();
    conn.execute("notify jobs, 'hello'", None).unwrap();
    let n = conn.notifies().next().unwrap().unwrap();
    assert_eq!(n.channel, "jobs");
    assert_eq!(n.payload, "hello");
    assert_eq!(n.pid, conn.backend_pid());
    conn.close();
}

#[test]
#[ignore]
fn coroutines() {
    let handles = (0..4)
        .map(|i: i32| {
            go!(move || {
                let conn = may_pq::connect_co(CONNINFO).unwrap();
                let mut cur = conn.execute("select %s::int", Some(&params![i])).unwrap();
                let value = cur.fetch_one().unwrap().unwrap().get::<_, i32>(0);
                conn.close();
                value
            })
        })
        .collect::<Vec<_>>();
    let values = handles
        .into_iter()
        .map(|h| h.join().unwrap())
        .collect::<Vec<_>>();
    assert_eq!(values, vec![0, 1, 2, 3]);
}
