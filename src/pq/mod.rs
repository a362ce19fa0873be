//! A thin native client for the PostgreSQL frontend/backend protocol.
//!
//! [`PgConn`] never blocks: `send_*` only buffer messages, [`PgConn::flush`]
//! writes what the socket accepts and [`PgConn::consume_input`] parses what
//! the socket has. The step machines in [`generators`](crate::generators)
//! build every operation on top of these calls.

use crate::adapt::Format;
use crate::error::DbError;
use crate::oids::Oid;
use crate::socket::Socket;
use crate::Error;
use bytes::{BufMut, Bytes, BytesMut};
use fallible_iterator::FallibleIterator;
use log::{debug, error};
use postgres_protocol::message::backend::Message;
use postgres_protocol::message::frontend;
use postgres_protocol::IsNull;
use std::collections::{HashMap, VecDeque};
use std::io;
use std::sync::Arc;

mod codec;
pub(crate) mod connect;
mod result;

pub(crate) use self::codec::{nonblock_read, nonblock_write};
pub use self::result::{Column, ExecStatus, PgResult};
pub(crate) use self::result::RawRow;

/// The state of the transaction of a connection, as last reported by the
/// server.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionStatus {
    /// No transaction is in progress.
    Idle,
    /// A command is in progress.
    Active,
    /// A transaction block is in progress.
    InTrans,
    /// A transaction block failed and must be rolled back.
    InError,
    /// The connection is bad, or closed.
    Unknown,
}

impl TransactionStatus {
    /// The upper case name of the status.
    pub fn name(self) -> &'static str {
        match self {
            TransactionStatus::Idle => "IDLE",
            TransactionStatus::Active => "ACTIVE",
            TransactionStatus::InTrans => "INTRANS",
            TransactionStatus::InError => "INERROR",
            TransactionStatus::Unknown => "UNKNOWN",
        }
    }
}

/// The state of the link to the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnStatus {
    /// The connection is usable.
    Ok,
    /// The connection broke, or was closed.
    Bad,
}

/// An asynchronous notification received from the server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notify {
    /// The channel the notification was sent on.
    pub channel: String,
    /// The payload of the notification.
    pub payload: String,
    /// The process id of the backend that sent the notification.
    pub pid: i32,
}

pub(crate) type NoticeSlot = Box<dyn FnMut(&DbError) + Send>;
pub(crate) type NotifySlot = Box<dyn FnMut(&Notify) + Send>;

/// The protocol state of a connection.
pub struct PgConn {
    socket: Socket,
    status: ConnStatus,
    // the status byte of the last ReadyForQuery
    tx_status: u8,
    busy: bool,
    write_buf: BytesMut,
    read_buf: BytesMut,
    parameters: HashMap<String, String>,
    process_id: i32,
    secret_key: i32,
    results: VecDeque<PgResult>,
    current: Option<PgResult>,
    preparing: bool,
    // the command in progress uses the extended protocol
    extended: bool,
    notifies: VecDeque<Notify>,
    notice_handler: Option<NoticeSlot>,
    notify_handler: Option<NotifySlot>,
}

impl std::fmt::Debug for PgConn {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PgConn")
            .field("socket", &self.socket)
            .field("status", &self.status)
            .field("transaction_status", &self.transaction_status())
            .field("process_id", &self.process_id)
            .finish()
    }
}

impl PgConn {
    pub(crate) fn new(socket: Socket) -> PgConn {
        PgConn {
            socket,
            status: ConnStatus::Ok,
            tx_status: 0,
            busy: false,
            write_buf: BytesMut::with_capacity(4096),
            read_buf: BytesMut::with_capacity(4096),
            parameters: HashMap::new(),
            process_id: 0,
            secret_key: 0,
            results: VecDeque::new(),
            current: None,
            preparing: false,
            extended: false,
            notifies: VecDeque::new(),
            notice_handler: None,
            notify_handler: None,
        }
    }

    pub(crate) fn socket(&mut self) -> &mut Socket {
        &mut self.socket
    }

    /// The state of the link to the server.
    pub fn status(&self) -> ConnStatus {
        self.status
    }

    /// The state of the transaction on the server.
    pub fn transaction_status(&self) -> TransactionStatus {
        if self.status == ConnStatus::Bad {
            return TransactionStatus::Unknown;
        }
        if self.busy {
            return TransactionStatus::Active;
        }
        match self.tx_status {
            b'I' => TransactionStatus::Idle,
            b'T' => TransactionStatus::InTrans,
            b'E' => TransactionStatus::InError,
            _ => TransactionStatus::Unknown,
        }
    }

    /// A runtime parameter reported by the server, e.g. `server_version`.
    pub fn parameter_status(&self, name: &str) -> Option<&str> {
        self.parameters.get(name).map(String::as_str)
    }

    /// The process id of the backend serving the connection.
    pub fn backend_pid(&self) -> i32 {
        self.process_id
    }

    pub(crate) fn secret_key(&self) -> i32 {
        self.secret_key
    }

    pub(crate) fn set_backend_key(&mut self, process_id: i32, secret_key: i32) {
        self.process_id = process_id;
        self.secret_key = secret_key;
    }

    pub(crate) fn set_parameter(&mut self, name: &str, value: &str) {
        self.parameters.insert(name.to_string(), value.to_string());
    }

    pub(crate) fn set_notice_handler(&mut self, handler: NoticeSlot) {
        self.notice_handler = Some(handler);
    }

    pub(crate) fn set_notify_handler(&mut self, handler: NotifySlot) {
        self.notify_handler = Some(handler);
    }

    /// Sends a simple query, possibly made of several statements.
    pub(crate) fn send_query(&mut self, query: &[u8]) -> Result<(), Error> {
        self.check_idle()?;
        let query = query_str(query)?;
        debug!("sending query: {}", query);
        frontend::query(query, &mut self.write_buf).map_err(Error::encode)?;
        self.extended = false;
        self.start();
        Ok(())
    }

    /// Sends a query with parameters through an unnamed statement.
    pub(crate) fn send_query_params(
        &mut self,
        query: &[u8],
        params: &[Option<Bytes>],
        types: &[Oid],
        formats: &[Format],
        result_format: Format,
    ) -> Result<(), Error> {
        self.check_idle()?;
        let query = query_str(query)?;
        debug!("sending query with {} params: {}", params.len(), query);
        let r = frontend::parse("", query, types.iter().copied(), &mut self.write_buf)
            .map_err(Error::encode)
            .and_then(|_| self.write_execute("", params, formats, result_format));
        if let Err(e) = r {
            self.write_buf.clear();
            return Err(e);
        }
        self.extended = true;
        self.start();
        Ok(())
    }

    /// Sends the preparation of a named statement.
    ///
    /// Its result is a `CommandOk` with no tag.
    pub(crate) fn send_prepare(
        &mut self,
        name: &str,
        query: &[u8],
        types: &[Oid],
    ) -> Result<(), Error> {
        self.check_idle()?;
        let query = query_str(query)?;
        debug!("preparing {}: {}", name, query);
        frontend::parse(name, query, types.iter().copied(), &mut self.write_buf)
            .map_err(Error::encode)?;
        frontend::sync(&mut self.write_buf);
        self.preparing = true;
        self.extended = true;
        self.start();
        Ok(())
    }

    /// Sends the execution of a statement prepared before.
    pub(crate) fn send_query_prepared(
        &mut self,
        name: &str,
        params: &[Option<Bytes>],
        formats: &[Format],
        result_format: Format,
    ) -> Result<(), Error> {
        self.check_idle()?;
        debug!("executing prepared statement {}", name);
        if let Err(e) = self.write_execute(name, params, formats, result_format) {
            self.write_buf.clear();
            return Err(e);
        }
        self.extended = true;
        self.start();
        Ok(())
    }

    fn write_execute(
        &mut self,
        statement: &str,
        params: &[Option<Bytes>],
        formats: &[Format],
        result_format: Format,
    ) -> Result<(), Error> {
        let r = frontend::bind(
            "",
            statement,
            formats.iter().map(|f| *f as i16),
            params,
            |param, buf| match param {
                Some(value) => {
                    buf.put_slice(value);
                    Ok(IsNull::No)
                }
                None => Ok(IsNull::Yes),
            },
            Some(result_format as i16),
            &mut self.write_buf,
        );
        match r {
            Ok(()) => {}
            Err(frontend::BindError::Conversion(e)) => return Err(Error::conversion(e)),
            Err(frontend::BindError::Serialization(e)) => return Err(Error::encode(e)),
        }
        frontend::describe(b'P', "", &mut self.write_buf).map_err(Error::encode)?;
        frontend::execute("", 0, &mut self.write_buf).map_err(Error::encode)?;
        frontend::sync(&mut self.write_buf);
        Ok(())
    }

    /// Buffers a raw frontend message, e.g. during startup.
    pub(crate) fn write_buf(&mut self) -> &mut BytesMut {
        &mut self.write_buf
    }

    fn check_idle(&self) -> Result<(), Error> {
        if self.status == ConnStatus::Bad {
            return Err(Error::closed());
        }
        if self.busy {
            return Err(Error::programming("another command is already in progress"));
        }
        Ok(())
    }

    fn start(&mut self) {
        self.busy = true;
        self.current = None;
        self.results.clear();
    }

    /// Writes the buffered messages, returning whether all were written.
    pub(crate) fn flush(&mut self) -> Result<bool, Error> {
        if self.write_buf.is_empty() {
            return Ok(true);
        }
        if self.status == ConnStatus::Bad {
            return Err(Error::closed());
        }
        match nonblock_write(&mut self.socket, &self.write_buf) {
            Ok(n) => {
                let _ = self.write_buf.split_to(n);
                Ok(self.write_buf.is_empty())
            }
            Err(e) => Err(self.fail(e)),
        }
    }

    /// Reads what is available on the socket and processes the complete
    /// messages.
    pub(crate) fn consume_input(&mut self) -> Result<(), Error> {
        if self.status == ConnStatus::Bad {
            return Err(Error::closed());
        }
        if let Err(e) = nonblock_read(&mut self.socket, &mut self.read_buf) {
            // process what arrived before the failure, e.g. a FATAL error
            self.process_input()?;
            return Err(self.fail(e));
        }
        self.process_input()
    }

    fn fail(&mut self, e: io::Error) -> Error {
        error!("connection error: {}", e);
        self.status = ConnStatus::Bad;
        self.busy = false;
        match e.kind() {
            io::ErrorKind::UnexpectedEof => Error::closed(),
            _ => Error::io(e),
        }
    }

    fn process_input(&mut self) -> Result<(), Error> {
        while let Some(msg) = codec::decode(&mut self.read_buf, self.busy).map_err(Error::parse)? {
            self.process_message(msg)?;
        }
        Ok(())
    }

    fn process_message(&mut self, msg: Message) -> Result<(), Error> {
        match msg {
            Message::ParameterStatus(body) => {
                let name = body.name().map_err(Error::parse)?;
                let value = body.value().map_err(Error::parse)?;
                self.set_parameter(name, value);
            }
            Message::NoticeResponse(body) => {
                let notice = DbError::parse(&mut body.fields()).map_err(Error::parse)?;
                self.notice(&notice);
            }
            Message::NotificationResponse(body) => {
                self.notifies.push_back(Notify {
                    channel: body.channel().map_err(Error::parse)?.to_string(),
                    payload: body.message().map_err(Error::parse)?.to_string(),
                    pid: body.process_id(),
                });
            }
            Message::ParseComplete => {
                if self.preparing {
                    self.preparing = false;
                    self.results
                        .push_back(PgResult::new(ExecStatus::CommandOk, Arc::from(vec![])));
                }
            }
            Message::RowDescription(body) => {
                let columns = body
                    .fields()
                    .map(|f| {
                        Ok(Column::new(
                            f.name().to_string(),
                            f.type_oid(),
                            Format::from_code(f.format()),
                        ))
                    })
                    .collect::<Vec<_>>()
                    .map_err(Error::parse)?;
                self.current = Some(PgResult::new(ExecStatus::TuplesOk, Arc::from(columns)));
            }
            Message::DataRow(body) => {
                let ranges = body.ranges().collect::<Vec<_>>().map_err(Error::parse)?;
                let row = RawRow::new(Bytes::copy_from_slice(body.buffer()), ranges);
                match &mut self.current {
                    Some(result) => result.push_row(row),
                    None => return Err(Error::unexpected_message()),
                }
            }
            Message::CommandComplete(body) => {
                let tag = body.tag().map_err(Error::parse)?.to_string();
                let mut result = self
                    .current
                    .take()
                    .unwrap_or_else(|| PgResult::new(ExecStatus::CommandOk, Arc::from(vec![])));
                result.set_command_tag(tag);
                self.results.push_back(result);
            }
            Message::EmptyQueryResponse => {
                self.current = None;
                self.results
                    .push_back(PgResult::new(ExecStatus::EmptyQuery, Arc::from(vec![])));
            }
            Message::ErrorResponse(body) => {
                let e = DbError::parse(&mut body.fields()).map_err(Error::parse)?;
                if !self.busy {
                    error!("server error on idle connection: {}", e);
                    if matches!(e.severity(), "FATAL" | "PANIC") {
                        self.status = ConnStatus::Bad;
                    }
                    return Err(Error::db(e));
                }
                self.current = None;
                self.preparing = false;
                self.results.push_back(PgResult::error(e));
            }
            Message::CopyInResponse(_) => {
                self.copy_result(ExecStatus::CopyIn);
                // no data to send: end the copy, the server replies with an error
                frontend::copy_fail("COPY FROM STDIN is not supported", &mut self.write_buf)
                    .map_err(Error::encode)?;
                // a Sync sent during the copy is ignored
                if self.extended {
                    frontend::sync(&mut self.write_buf);
                }
            }
            Message::CopyOutResponse(_) => self.copy_result(ExecStatus::CopyOut),
            Message::ReadyForQuery(body) => {
                self.tx_status = body.status();
                self.busy = false;
                self.preparing = false;
            }
            Message::BindComplete
            | Message::NoData
            | Message::ParameterDescription(_)
            | Message::PortalSuspended
            | Message::CloseComplete
            | Message::CopyData(_)
            | Message::CopyDone => {}
            _ => return Err(Error::unexpected_message()),
        }
        Ok(())
    }

    fn copy_result(&mut self, status: ExecStatus) {
        self.current = None;
        self.results.push_back(PgResult::new(status, Arc::from(vec![])));
    }

    fn notice(&mut self, notice: &DbError) {
        match &mut self.notice_handler {
            Some(handler) => handler(notice),
            None => debug!("notice: {}", notice),
        }
    }

    /// Whether `get_result` would need more input to return.
    pub(crate) fn is_busy(&self) -> bool {
        self.busy && self.results.is_empty()
    }

    /// The next result of the command in progress; `None` once all were
    /// returned.
    pub(crate) fn get_result(&mut self) -> Option<PgResult> {
        self.results.pop_front()
    }

    /// Hands the notifications received so far to the notify handler.
    pub(crate) fn dispatch_notifies(&mut self) {
        if let Some(handler) = &mut self.notify_handler {
            while let Some(n) = self.notifies.pop_front() {
                handler(&n);
            }
        }
    }

    pub(crate) fn take_notifies(&mut self) -> Vec<Notify> {
        self.notifies.drain(..).collect()
    }

    /// Reads the next message of the startup phase, if one is complete.
    pub(crate) fn read_message(&mut self) -> Result<Option<Message>, Error> {
        if self.status == ConnStatus::Bad {
            return Err(Error::closed());
        }
        if let Some(msg) = codec::decode(&mut self.read_buf, true).map_err(Error::parse)? {
            return Ok(Some(msg));
        }
        if let Err(e) = nonblock_read(&mut self.socket, &mut self.read_buf) {
            if let Some(msg) = codec::decode(&mut self.read_buf, true).map_err(Error::parse)? {
                return Ok(Some(msg));
            }
            return Err(self.fail(e));
        }
        codec::decode(&mut self.read_buf, true).map_err(Error::parse)
    }

    /// Marks the end of the startup phase.
    pub(crate) fn set_ready(&mut self, tx_status: u8) {
        self.tx_status = tx_status;
        self.busy = false;
    }

    /// Sends `Terminate` and closes the socket.
    pub(crate) fn finish(&mut self) {
        if self.status == ConnStatus::Bad {
            return;
        }
        frontend::terminate(&mut self.write_buf);
        let _ = nonblock_write(&mut self.socket, &self.write_buf);
        self.write_buf.clear();
        let _ = self.socket.shutdown();
        self.status = ConnStatus::Bad;
        self.busy = false;
    }
}

fn query_str(query: &[u8]) -> Result<&str, Error> {
    std::str::from_utf8(query).map_err(|e| Error::data(format!("invalid query encoding: {}", e)))
}
