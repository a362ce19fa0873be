//! An in-memory backend speaking just enough of the protocol to drive a
//! connection: it answers every frontend message as soon as it is written.

use bytes::{BufMut, BytesMut};
use may_pq::generators::Wait;
use may_pq::{Socket, Transport};
use std::collections::HashMap;
use std::io::{self, Read, Write};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

pub const PID: i32 = 4242;
pub const SECRET: i32 = 77;

const INT4: u32 = 23;
const TEXT: u32 = 25;

/// A frontend message received by the server.
#[derive(Debug, Clone, PartialEq)]
pub enum Msg {
    Startup(Vec<(String, String)>),
    Password(Vec<u8>),
    Query(String),
    Parse {
        name: String,
        query: String,
        types: Vec<u32>,
    },
    Bind {
        statement: String,
        formats: Vec<i16>,
        params: Vec<Option<Vec<u8>>>,
        result_formats: Vec<i16>,
    },
    Describe,
    Execute,
    Sync,
    CopyFail(String),
    Terminate,
    Other(u8),
}

#[derive(Default)]
struct Plan {
    notices: Vec<String>,
    notifications: Vec<(String, String)>,
    parameters: Vec<(String, String)>,
    error: Option<(&'static str, String)>,
    copy_in: bool,
    columns: Option<Vec<(String, u32)>>,
    rows: Vec<Vec<Option<Vec<u8>>>>,
    tag: String,
}

impl Plan {
    fn command(tag: &str) -> Plan {
        Plan {
            tag: tag.to_string(),
            ..Plan::default()
        }
    }

    fn error(code: &'static str, message: &str) -> Plan {
        Plan {
            error: Some((code, message.to_string())),
            ..Plan::default()
        }
    }
}

struct Portal {
    query: String,
    types: Vec<u32>,
    params: Vec<Option<Vec<u8>>>,
    binary: bool,
}

struct State {
    password: Option<Vec<u8>>,
    started: bool,
    from_client: BytesMut,
    to_client: BytesMut,
    log: Vec<Msg>,
    tx: u8,
    statements: HashMap<String, (String, Vec<u32>)>,
    portal: Option<Portal>,
    pending: Option<Plan>,
    extended: bool,
    skip_until_sync: bool,
    copy_in: bool,
    closed: bool,
}

/// The fake backend; clones share the same state.
#[derive(Clone)]
pub struct MockServer(Arc<Mutex<State>>);

impl MockServer {
    pub fn new() -> MockServer {
        MockServer(Arc::new(Mutex::new(State {
            password: None,
            started: false,
            from_client: BytesMut::new(),
            to_client: BytesMut::new(),
            log: vec![],
            tx: b'I',
            statements: HashMap::new(),
            portal: None,
            pending: None,
            extended: false,
            skip_until_sync: false,
            copy_in: false,
            closed: false,
        })))
    }

    /// Requires a cleartext password at startup.
    pub fn with_password(password: &str) -> MockServer {
        let server = MockServer::new();
        server.state().password = Some(password.as_bytes().to_vec());
        server
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.0.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn socket(&self) -> Socket {
        Socket::custom(self.clone())
    }

    /// Returns the messages received since the last call.
    pub fn take_log(&self) -> Vec<Msg> {
        std::mem::take(&mut self.state().log)
    }

    /// Sends a notification to the client out of band.
    pub fn notify(&self, channel: &str, payload: &str) {
        let mut state = self.state();
        notification(&mut state.to_client, channel, payload);
    }

    /// Ends the session the way an administrator shutdown does.
    pub fn shutdown(&self) {
        let mut state = self.state();
        message(&mut state.to_client, b'E', |b| {
            fields(
                b,
                "FATAL",
                "57P01",
                "terminating connection due to administrator command",
            )
        });
        state.closed = true;
    }

    pub fn terminated(&self) -> bool {
        self.state().closed
    }
}

impl Read for MockServer {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let mut state = self.state();
        if state.to_client.is_empty() {
            if state.closed {
                return Ok(0);
            }
            return Err(io::ErrorKind::WouldBlock.into());
        }
        let n = buf.len().min(state.to_client.len());
        buf[..n].copy_from_slice(&state.to_client.split_to(n));
        Ok(n)
    }
}

impl Write for MockServer {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut state = self.state();
        state.from_client.extend_from_slice(buf);
        while let Some(msg) = state.next_message() {
            state.handle(msg);
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Transport for MockServer {
    fn poll_ready(&mut self, wait: Wait, _: Duration) -> io::Result<bool> {
        let state = self.state();
        if wait == Wait::R && state.to_client.is_empty() && !state.closed {
            // the client would wait forever
            return Err(io::Error::new(
                io::ErrorKind::TimedOut,
                "the mock server has nothing to send",
            ));
        }
        Ok(true)
    }
}

fn cstr(buf: &mut &[u8]) -> String {
    let end = buf.iter().position(|b| *b == 0).unwrap_or(buf.len());
    let s = String::from_utf8_lossy(&buf[..end]).into_owned();
    *buf = &buf[(end + 1).min(buf.len())..];
    s
}

fn get_i16(buf: &mut &[u8]) -> i16 {
    let v = i16::from_be_bytes([buf[0], buf[1]]);
    *buf = &buf[2..];
    v
}

fn get_i32(buf: &mut &[u8]) -> i32 {
    let v = i32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]]);
    *buf = &buf[4..];
    v
}

fn message(buf: &mut BytesMut, tag: u8, body: impl FnOnce(&mut BytesMut)) {
    buf.put_u8(tag);
    let base = buf.len();
    buf.put_i32(0);
    body(buf);
    let len = (buf.len() - base) as i32;
    buf[base..base + 4].copy_from_slice(&len.to_be_bytes());
}

fn put_cstr(buf: &mut BytesMut, s: &str) {
    buf.put_slice(s.as_bytes());
    buf.put_u8(0);
}

fn fields(buf: &mut BytesMut, severity: &str, code: &str, text: &str) {
    buf.put_u8(b'S');
    put_cstr(buf, severity);
    buf.put_u8(b'V');
    put_cstr(buf, severity);
    buf.put_u8(b'C');
    put_cstr(buf, code);
    buf.put_u8(b'M');
    put_cstr(buf, text);
    buf.put_u8(0);
}

fn notification(buf: &mut BytesMut, channel: &str, payload: &str) {
    message(buf, b'A', |b| {
        b.put_i32(99);
        put_cstr(b, channel);
        put_cstr(b, payload);
    });
}

fn parameter_status(buf: &mut BytesMut, name: &str, value: &str) {
    message(buf, b'S', |b| {
        put_cstr(b, name);
        put_cstr(b, value);
    });
}

impl State {
    fn next_message(&mut self) -> Option<Msg> {
        if !self.started {
            if self.from_client.len() < 4 {
                return None;
            }
            let len = i32::from_be_bytes([
                self.from_client[0],
                self.from_client[1],
                self.from_client[2],
                self.from_client[3],
            ]) as usize;
            if self.from_client.len() < len {
                return None;
            }
            let data = self.from_client.split_to(len);
            let mut body = &data[8..];
            let mut params = vec![];
            while !body.is_empty() && body[0] != 0 {
                let key = cstr(&mut body);
                let value = cstr(&mut body);
                params.push((key, value));
            }
            self.started = true;
            return Some(Msg::Startup(params));
        }

        if self.from_client.len() < 5 {
            return None;
        }
        let tag = self.from_client[0];
        let len = i32::from_be_bytes([
            self.from_client[1],
            self.from_client[2],
            self.from_client[3],
            self.from_client[4],
        ]) as usize;
        if self.from_client.len() < len + 1 {
            return None;
        }
        let data = self.from_client.split_to(len + 1);
        let mut body = &data[5..];
        let msg = match tag {
            b'p' => Msg::Password(body.split_last().map_or(vec![], |(_, b)| b.to_vec())),
            b'Q' => Msg::Query(cstr(&mut body)),
            b'P' => {
                let name = cstr(&mut body);
                let query = cstr(&mut body);
                let n = get_i16(&mut body);
                let types = (0..n).map(|_| get_i32(&mut body) as u32).collect();
                Msg::Parse { name, query, types }
            }
            b'B' => {
                let _portal = cstr(&mut body);
                let statement = cstr(&mut body);
                let n = get_i16(&mut body);
                let formats = (0..n).map(|_| get_i16(&mut body)).collect();
                let n = get_i16(&mut body);
                let params = (0..n)
                    .map(|_| {
                        let len = get_i32(&mut body);
                        if len < 0 {
                            return None;
                        }
                        let (value, rest) = body.split_at(len as usize);
                        body = rest;
                        Some(value.to_vec())
                    })
                    .collect();
                let n = get_i16(&mut body);
                let result_formats = (0..n).map(|_| get_i16(&mut body)).collect();
                Msg::Bind {
                    statement,
                    formats,
                    params,
                    result_formats,
                }
            }
            b'D' => Msg::Describe,
            b'E' => Msg::Execute,
            b'S' => Msg::Sync,
            b'f' => Msg::CopyFail(cstr(&mut body)),
            b'X' => Msg::Terminate,
            tag => Msg::Other(tag),
        };
        Some(msg)
    }

    fn ready(&mut self) {
        let tx = self.tx;
        message(&mut self.to_client, b'Z', |b| b.put_u8(tx));
    }

    fn error(&mut self, code: &str, text: &str) {
        if self.tx == b'T' {
            self.tx = b'E';
        }
        message(&mut self.to_client, b'E', |b| fields(b, "ERROR", code, text));
    }

    fn startup_done(&mut self) {
        let out = &mut self.to_client;
        message(out, b'R', |b| b.put_i32(0));
        parameter_status(out, "client_encoding", "UTF8");
        parameter_status(out, "server_version", "16.2");
        message(out, b'K', |b| {
            b.put_i32(PID);
            b.put_i32(SECRET);
        });
        self.ready();
    }

    fn handle(&mut self, msg: Msg) {
        self.log.push(msg.clone());

        if self.copy_in {
            // a Sync is ignored during a copy
            if let Msg::CopyFail(_) = msg {
                self.copy_in = false;
                self.error("57014", "COPY from stdin failed");
                if self.extended {
                    self.skip_until_sync = true;
                } else {
                    self.ready();
                }
            }
            return;
        }
        if self.skip_until_sync {
            if msg == Msg::Sync {
                self.skip_until_sync = false;
                self.ready();
            }
            return;
        }

        match msg {
            Msg::Startup(_) => {
                if self.password.is_some() {
                    message(&mut self.to_client, b'R', |b| b.put_i32(3));
                } else {
                    self.startup_done();
                }
            }
            Msg::Password(password) => {
                if Some(&password) == self.password.as_ref() {
                    self.startup_done();
                } else {
                    message(&mut self.to_client, b'E', |b| {
                        fields(b, "FATAL", "28P01", "password authentication failed")
                    });
                    self.closed = true;
                }
            }
            Msg::Query(sql) => {
                self.extended = false;
                for statement in sql.split(';').map(str::trim).filter(|s| !s.is_empty()) {
                    let plan = self.plan(statement, &[], &[], false);
                    if !self.send_head(&plan, false) {
                        break;
                    }
                    if plan.copy_in {
                        return;
                    }
                    self.send_body(plan);
                }
                self.ready();
            }
            Msg::Parse { name, query, types } => {
                self.extended = true;
                if query.contains("syntax error") {
                    self.error("42601", "syntax error at or near \"error\"");
                    self.skip_until_sync = true;
                } else {
                    self.statements.insert(name, (query, types));
                    message(&mut self.to_client, b'1', |_| {});
                }
            }
            Msg::Bind {
                statement,
                params,
                result_formats,
                ..
            } => {
                self.extended = true;
                match self.statements.get(&statement) {
                    Some((query, types)) => {
                        self.portal = Some(Portal {
                            query: query.clone(),
                            types: types.clone(),
                            params,
                            binary: result_formats.first() == Some(&1),
                        });
                        message(&mut self.to_client, b'2', |_| {});
                    }
                    None => {
                        self.error("26000", "prepared statement does not exist");
                        self.skip_until_sync = true;
                    }
                }
            }
            Msg::Describe => {
                let portal = match self.portal.take() {
                    Some(portal) => portal,
                    None => return,
                };
                let plan = self.plan(&portal.query, &portal.params, &portal.types, portal.binary);
                if !self.send_head(&plan, portal.binary) {
                    self.skip_until_sync = true;
                    return;
                }
                if plan.columns.is_none() && !plan.copy_in {
                    message(&mut self.to_client, b'n', |_| {});
                }
                self.pending = Some(plan);
            }
            Msg::Execute => {
                if let Some(plan) = self.pending.take() {
                    if !plan.copy_in {
                        self.send_body(plan);
                    }
                }
            }
            Msg::Sync => self.ready(),
            Msg::Terminate => self.closed = true,
            Msg::CopyFail(_) | Msg::Other(_) => {}
        }
    }

    // side messages, errors and the row description; false after an error
    fn send_head(&mut self, plan: &Plan, binary: bool) -> bool {
        for (name, value) in &plan.parameters {
            parameter_status(&mut self.to_client, name, value);
        }
        for text in &plan.notices {
            message(&mut self.to_client, b'N', |b| fields(b, "NOTICE", "00000", text));
        }
        for (channel, payload) in &plan.notifications {
            notification(&mut self.to_client, channel, payload);
        }
        if let Some((code, text)) = &plan.error {
            self.error(code, text);
            return false;
        }
        if plan.copy_in {
            message(&mut self.to_client, b'G', |b| {
                b.put_i8(0);
                b.put_i16(0);
            });
            self.copy_in = true;
            return true;
        }
        if let Some(columns) = &plan.columns {
            message(&mut self.to_client, b'T', |b| {
                b.put_i16(columns.len() as i16);
                for (name, oid) in columns {
                    put_cstr(b, name);
                    b.put_i32(0);
                    b.put_i16(0);
                    b.put_u32(*oid);
                    b.put_i16(-1);
                    b.put_i32(-1);
                    b.put_i16(binary as i16);
                }
            });
        }
        true
    }

    fn send_body(&mut self, plan: Plan) {
        for row in &plan.rows {
            message(&mut self.to_client, b'D', |b| {
                b.put_i16(row.len() as i16);
                for value in row {
                    match value {
                        Some(value) => {
                            b.put_i32(value.len() as i32);
                            b.put_slice(value);
                        }
                        None => b.put_i32(-1),
                    }
                }
            });
        }
        message(&mut self.to_client, b'C', |b| put_cstr(b, &plan.tag));
    }

    fn plan(&mut self, sql: &str, params: &[Option<Vec<u8>>], types: &[u32], binary: bool) -> Plan {
        let lower = sql.trim().to_lowercase();

        if self.tx == b'E' && !lower.starts_with("rollback") {
            return Plan::error(
                "25P02",
                "current transaction is aborted, commands ignored until end of transaction block",
            );
        }

        if lower.starts_with("begin") {
            self.tx = b'T';
            Plan::command("BEGIN")
        } else if lower.starts_with("commit") {
            self.tx = b'I';
            Plan::command("COMMIT")
        } else if lower.starts_with("rollback to savepoint") {
            self.tx = b'T';
            Plan::command("ROLLBACK")
        } else if lower.starts_with("rollback") {
            self.tx = b'I';
            Plan::command("ROLLBACK")
        } else if lower.starts_with("savepoint") {
            Plan::command("SAVEPOINT")
        } else if lower.starts_with("release") {
            Plan::command("RELEASE")
        } else if lower.starts_with("deallocate") {
            Plan::command("DEALLOCATE")
        } else if lower.starts_with("insert") {
            Plan::command("INSERT 0 1")
        } else if lower.starts_with("copy") {
            Plan {
                copy_in: true,
                ..Plan::default()
            }
        } else if lower.contains("fail") {
            Plan::error("42601", "syntax error at or near \"fail\"")
        } else if lower.starts_with("notice") {
            Plan {
                notices: vec!["hello".to_string()],
                ..Plan::command("DO")
            }
        } else if lower.starts_with("notify") {
            Plan {
                notifications: vec![("chan".to_string(), "payload".to_string())],
                ..Plan::command("NOTIFY")
            }
        } else if lower.starts_with("select set_config('client_encoding'") {
            let value = params
                .first()
                .cloned()
                .flatten()
                .map(|v| String::from_utf8_lossy(&v).into_owned())
                .unwrap_or_default();
            Plan {
                parameters: vec![("client_encoding".to_string(), value.clone())],
                columns: Some(vec![("set_config".to_string(), TEXT)]),
                rows: vec![vec![Some(value.into_bytes())]],
                ..Plan::command("SELECT 1")
            }
        } else if lower.starts_with("select generate_series") {
            Plan {
                columns: Some(vec![("n".to_string(), INT4)]),
                rows: (1..=3)
                    .map(|i: i32| vec![Some(int4(i, binary))])
                    .collect(),
                ..Plan::command("SELECT 3")
            }
        } else if lower.starts_with("select") {
            let name = lower
                .rsplit_once(" as ")
                .map_or("?column?".to_string(), |(_, n)| n.trim().to_string());
            let (columns, row) = if params.is_empty() {
                (vec![(name, INT4)], vec![Some(int4(1, binary))])
            } else {
                let columns = params
                    .iter()
                    .enumerate()
                    .map(|(i, _)| {
                        let oid = types.get(i).copied().filter(|t| *t != 0).unwrap_or(TEXT);
                        (name.clone(), oid)
                    })
                    .collect();
                (columns, params.to_vec())
            };
            Plan {
                columns: Some(columns),
                rows: vec![row],
                ..Plan::command("SELECT 1")
            }
        } else {
            Plan::command("OK")
        }
    }
}

fn int4(value: i32, binary: bool) -> Vec<u8> {
    if binary {
        value.to_be_bytes().to_vec()
    } else {
        value.to_string().into_bytes()
    }
}
