use crate::adapt::{AdaptersMap, Dumper, Format, Loader};
use crate::cancel_token::{CancelTarget, CancelToken};
use crate::config::Config;
use crate::cursor::Cursor;
use crate::encodings::Encoding;
use crate::error::DbError;
use crate::generators::{Execute, PqGen, Step};
use crate::generic_client::GenericConnection;
use crate::oids::{Oid, INVALID_OID};
use crate::pq::connect::ConnectGen;
use crate::pq::{ConnStatus, ExecStatus, Notify, PgConn, TransactionStatus};
use crate::prepare::PrepareManager;
use crate::queries::{Params, QueryCache, QUERY_CACHE_SIZE};
use crate::socket::Socket;
use crate::waiting::{self, HasSocket, WAIT_INTERVAL};
use crate::Error;
use bytes::Bytes;
use log::{error, info, warn};
use std::any::Any;
use std::collections::VecDeque;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, PoisonError};
use std::time::Instant;

/// Identifies a registered notice or notify handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HandlerId(usize);

type NoticeHandler = Arc<dyn Fn(&DbError) + Send + Sync>;
type NotifyHandler = Arc<dyn Fn(&Notify) + Send + Sync>;

/// The notice and notify subscribers of a connection.
#[derive(Default)]
pub(crate) struct Handlers {
    next_id: AtomicUsize,
    notice: spin::Mutex<Vec<(HandlerId, NoticeHandler)>>,
    notify: spin::Mutex<Vec<(HandlerId, NotifyHandler)>>,
}

impl Handlers {
    fn next_id(&self) -> HandlerId {
        HandlerId(self.next_id.fetch_add(1, Ordering::Relaxed))
    }

    pub(crate) fn add_notice(&self, handler: NoticeHandler) -> HandlerId {
        let id = self.next_id();
        self.notice.lock().push((id, handler));
        id
    }

    pub(crate) fn add_notify(&self, handler: NotifyHandler) -> HandlerId {
        let id = self.next_id();
        self.notify.lock().push((id, handler));
        id
    }

    pub(crate) fn remove_notice(&self, id: HandlerId) -> Result<(), Error> {
        remove(&mut self.notice.lock(), id)
    }

    pub(crate) fn remove_notify(&self, id: HandlerId) -> Result<(), Error> {
        remove(&mut self.notify.lock(), id)
    }

    fn notice(&self, notice: &DbError) {
        let handlers = self.notice.lock().clone();
        deliver(&handlers, notice, "notice");
    }

    fn notify(&self, notify: &Notify) {
        let handlers = self.notify.lock().clone();
        deliver(&handlers, notify, "notify");
    }
}

fn remove<T>(handlers: &mut Vec<(HandlerId, T)>, id: HandlerId) -> Result<(), Error> {
    match handlers.iter().position(|(i, _)| *i == id) {
        Some(pos) => {
            handlers.remove(pos);
            Ok(())
        }
        None => Err(Error::programming(format!("handler {:?} not registered", id))),
    }
}

// a failing subscriber must neither reach the connection nor starve the others
fn deliver<T: ?Sized>(
    handlers: &[(HandlerId, Arc<dyn Fn(&T) + Send + Sync>)],
    value: &T,
    what: &str,
) {
    for (id, handler) in handlers {
        if panic::catch_unwind(AssertUnwindSafe(|| handler(value))).is_err() {
            error!("error processing {} callback {:?}", what, id);
        }
    }
}

/// The state of a connection shared by the blocking and the coroutine
/// flavours. Every operation runs holding the connection lock.
pub struct BaseConnection {
    pub(crate) pgconn: PgConn,
    pub(crate) autocommit: bool,
    // a first entry of "" marks an outer block managing only begin/commit
    pub(crate) savepoints: Vec<String>,
    pub(crate) prepared: PrepareManager,
    pub(crate) adapters: Arc<AdaptersMap>,
    pub(crate) queries: QueryCache,
}

impl fmt::Debug for BaseConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BaseConnection")
            .field("pgconn", &self.pgconn)
            .field("autocommit", &self.autocommit)
            .field("savepoints", &self.savepoints)
            .finish()
    }
}

impl HasSocket for BaseConnection {
    fn socket(&mut self) -> &mut Socket {
        self.pgconn.socket()
    }
}

impl BaseConnection {
    fn new(mut pgconn: PgConn, config: &Config, handlers: &Arc<Handlers>) -> BaseConnection {
        let weak = Arc::downgrade(handlers);
        pgconn.set_notice_handler(Box::new(move |notice| {
            if let Some(handlers) = weak.upgrade() {
                handlers.notice(notice);
            }
        }));
        let weak = Arc::downgrade(handlers);
        pgconn.set_notify_handler(Box::new(move |notify| {
            if let Some(handlers) = weak.upgrade() {
                handlers.notify(notify);
            }
        }));

        let adapters = config
            .get_adapters()
            .cloned()
            .unwrap_or_else(AdaptersMap::global);

        BaseConnection {
            pgconn,
            autocommit: config.get_autocommit(),
            savepoints: vec![],
            prepared: PrepareManager::new(
                config.get_prepare_threshold(),
                config.get_prepared_max(),
            ),
            adapters: Arc::new(AdaptersMap::extend(&adapters)),
            queries: QueryCache::new(QUERY_CACHE_SIZE),
        }
    }

    pub(crate) fn check_open(&self) -> Result<(), Error> {
        match self.pgconn.status() {
            ConnStatus::Ok => Ok(()),
            ConnStatus::Bad => Err(Error::closed()),
        }
    }

    pub(crate) fn client_encoding(&self) -> Encoding {
        self.pgconn
            .parameter_status("client_encoding")
            .and_then(|name| Encoding::from_name(name).ok())
            .unwrap_or_default()
    }

    fn set_autocommit(&mut self, value: bool) -> Result<(), Error> {
        if !self.savepoints.is_empty() {
            return Err(Error::programming(
                "couldn't change autocommit state: \
                 connection.transaction() context in progress",
            ));
        }
        let status = self.pgconn.transaction_status();
        if status != TransactionStatus::Idle {
            return Err(Error::programming(format!(
                "couldn't change autocommit state: connection in transaction status {}",
                status.name()
            )));
        }
        self.autocommit = value;
        Ok(())
    }

    fn close(&mut self) {
        if self.pgconn.status() == ConnStatus::Ok {
            info!("closing connection to backend {}", self.pgconn.backend_pid());
            self.pgconn.finish();
        }
    }
}

impl Drop for BaseConnection {
    fn drop(&mut self) {
        if self.pgconn.status() == ConnStatus::Bad {
            return;
        }
        warn!(
            "connection {:?} was deleted while still open. Please use close() to close the connection",
            self.pgconn
        );
        self.pgconn.finish();
    }
}

/// Sends a command returning no rows, e.g. `commit`.
pub(crate) struct ExecCommand {
    command: Bytes,
    exec: Option<Execute>,
}

impl ExecCommand {
    pub(crate) fn new(command: impl Into<Bytes>) -> ExecCommand {
        ExecCommand {
            command: command.into(),
            exec: None,
        }
    }
}

impl PqGen<BaseConnection> for ExecCommand {
    type Output = ();

    fn resume(&mut self, cx: &mut BaseConnection) -> Result<Step<()>, Error> {
        let exec = match &mut self.exec {
            Some(exec) => exec,
            None => {
                cx.check_open()?;
                cx.pgconn.send_query(&self.command)?;
                self.exec.insert(Execute::new())
            }
        };
        let results = ready!(exec.resume(&mut cx.pgconn)?);
        let result = results.last().ok_or_else(Error::unexpected_message)?;
        match result.status() {
            ExecStatus::CommandOk => Ok(Step::Ready(())),
            ExecStatus::FatalError => Err(result.to_error()),
            status => Err(Error::interface(format!(
                "unexpected result {} from command {:?}",
                status.name(),
                String::from_utf8_lossy(&self.command)
            ))),
        }
    }
}

/// Starts a transaction, unless in autocommit or in a transaction already.
pub(crate) struct StartQuery(Option<ExecCommand>);

impl StartQuery {
    pub(crate) fn new() -> StartQuery {
        StartQuery(None)
    }
}

impl PqGen<BaseConnection> for StartQuery {
    type Output = ();

    fn resume(&mut self, cx: &mut BaseConnection) -> Result<Step<()>, Error> {
        let begin = match &mut self.0 {
            Some(begin) => begin,
            None => {
                if cx.autocommit || cx.pgconn.transaction_status() != TransactionStatus::Idle {
                    return Ok(Step::Ready(()));
                }
                self.0.insert(ExecCommand::new(&b"begin"[..]))
            }
        };
        begin.resume(cx)
    }
}

/// Ends the transaction in progress: `commit()` and `rollback()`.
pub(crate) struct EndTransaction {
    commit: bool,
    exec: Option<ExecCommand>,
}

impl PqGen<BaseConnection> for EndTransaction {
    type Output = ();

    fn resume(&mut self, cx: &mut BaseConnection) -> Result<Step<()>, Error> {
        let exec = match &mut self.exec {
            Some(exec) => exec,
            None => {
                if !cx.savepoints.is_empty() {
                    return Err(Error::programming(if self.commit {
                        "Explicit commit() forbidden within a Transaction context. \
                         (Transaction will be automatically committed on successful exit from context.)"
                    } else {
                        "Explicit rollback() forbidden within a Transaction context. \
                         (Either return an error from the transaction body or use force_rollback.)"
                    }));
                }
                cx.check_open()?;
                if cx.pgconn.transaction_status() == TransactionStatus::Idle {
                    return Ok(Step::Ready(()));
                }
                let command: &'static [u8] = if self.commit { b"commit" } else { b"rollback" };
                self.exec.insert(ExecCommand::new(command))
            }
        };
        exec.resume(cx)
    }
}

/// Changes the client encoding of the session.
struct SetClientEncoding {
    encoding: Encoding,
    exec: Option<Execute>,
}

impl PqGen<BaseConnection> for SetClientEncoding {
    type Output = ();

    fn resume(&mut self, cx: &mut BaseConnection) -> Result<Step<()>, Error> {
        let exec = match &mut self.exec {
            Some(exec) => exec,
            None => {
                cx.check_open()?;
                cx.pgconn.send_query_params(
                    b"select set_config('client_encoding', $1, false)",
                    &[Some(Bytes::from_static(self.encoding.pg_name().as_bytes()))],
                    &[INVALID_OID],
                    &[Format::Text],
                    Format::Text,
                )?;
                self.exec.insert(Execute::new())
            }
        };
        let results = ready!(exec.resume(&mut cx.pgconn)?);
        let result = results.last().ok_or_else(Error::unexpected_message)?;
        match result.status() {
            ExecStatus::TuplesOk => Ok(Step::Ready(())),
            _ => Err(result.to_error()),
        }
    }
}

/// Runs an operation of the protocol layer under the connection lock.
pub(crate) struct OnPgConn<G>(pub(crate) G);

impl<G: PqGen<PgConn>> PqGen<BaseConnection> for OnPgConn<G> {
    type Output = G::Output;

    fn resume(&mut self, cx: &mut BaseConnection) -> Result<Step<G::Output>, Error> {
        self.0.resume(&mut cx.pgconn)
    }
}

/// An iterator over the notifications received by a connection.
///
/// Blocks until a notification arrives. Ends after the first error, e.g.
/// when the connection is closed.
pub struct Notifies<'a, C> {
    conn: &'a C,
    received: VecDeque<Notify>,
    done: bool,
}

impl<C: GenericConnection> Iterator for Notifies<'_, C> {
    type Item = Result<Notify, Error>;

    fn next(&mut self) -> Option<Result<Notify, Error>> {
        if self.done {
            return None;
        }
        if self.received.is_empty() {
            match self.conn.run(OnPgConn(crate::generators::Notifies)) {
                Ok(notifies) => self.received.extend(notifies),
                Err(e) => {
                    self.done = true;
                    return Some(Err(e));
                }
            }
        }
        self.received.pop_front().map(Ok)
    }
}

fn cancel_target(config: &Config) -> Option<CancelTarget> {
    config.get_host().map(|host| CancelTarget {
        host: host.to_string(),
        port: config.get_port(),
        connect_timeout: config.get_connect_timeout(),
    })
}

fn deadline(config: &Config) -> Option<Instant> {
    config.get_connect_timeout().map(|t| Instant::now() + t)
}

macro_rules! connection_methods {
    () => {
        /// Returns a cursor executing queries on the connection and
        /// returning results in text format.
        pub fn cursor(&self) -> Cursor<'_, Self> {
            Cursor::new(self, Format::Text)
        }

        /// Returns a cursor requesting results in `format`.
        pub fn cursor_with_format(&self, format: Format) -> Cursor<'_, Self> {
            Cursor::new(self, format)
        }

        /// Executes a query, returning a cursor to read its results.
        ///
        /// See [`Cursor::execute`].
        pub fn execute(&self, query: &str, params: Option<&Params<'_>>) -> Result<Cursor<'_, Self>, Error> {
            let mut cur = self.cursor();
            cur.execute(query, params)?;
            Ok(cur)
        }

        /// Closes the connection.
        ///
        /// Waits for the operation in progress, if any. Closing a closed
        /// connection does nothing.
        pub fn close(&self) {
            self.with_base(BaseConnection::close);
        }

        /// Returns `true` if the connection is closed, or broken.
        pub fn closed(&self) -> bool {
            self.with_base(|base| base.pgconn.status() == ConnStatus::Bad)
        }

        /// Commits the transaction in progress.
        ///
        /// Does nothing if no transaction is in progress. Fails inside a
        /// [`transaction`](Self::transaction) block, which commits on exit.
        pub fn commit(&self) -> Result<(), Error> {
            self.run(EndTransaction {
                commit: true,
                exec: None,
            })
        }

        /// Rolls back the transaction in progress.
        ///
        /// Does nothing if no transaction is in progress. Fails inside a
        /// [`transaction`](Self::transaction) block.
        pub fn rollback(&self) -> Result<(), Error> {
            self.run(EndTransaction {
                commit: false,
                exec: None,
            })
        }

        /// Requests the cancellation of the operation in progress.
        ///
        /// Doesn't wait for the connection lock.
        pub fn cancel(&self) -> Result<(), Error> {
            self.cancel_token.cancel_query()
        }

        /// Returns a token to cancel the operations of the connection from
        /// elsewhere.
        pub fn cancel_token(&self) -> CancelToken {
            self.cancel_token.clone()
        }

        /// Runs `body` in a transaction block.
        ///
        /// The outermost block starts a transaction if none is in progress;
        /// nested blocks, or blocks entered in a transaction, use a
        /// savepoint, named `savepoint_name` or chosen automatically. The
        /// block is committed if `body` returns `Ok`, and rolled back if it
        /// returns `Err`, panics, or `force_rollback` is set.
        pub fn transaction<T, F>(
            &self,
            savepoint_name: Option<&str>,
            force_rollback: bool,
            body: F,
        ) -> Result<T, Error>
        where
            F: FnOnce(&Self) -> Result<T, Error>,
        {
            crate::transaction::transaction(self, savepoint_name, force_rollback, body)
        }

        /// The autocommit state of the connection.
        pub fn autocommit(&self) -> bool {
            self.with_base(|base| base.autocommit)
        }

        /// Changes the autocommit state.
        ///
        /// Only allowed when no transaction is in progress.
        pub fn set_autocommit(&self, value: bool) -> Result<(), Error> {
            self.with_base(|base| base.set_autocommit(value))
        }

        /// The client encoding of the connection.
        pub fn client_encoding(&self) -> Encoding {
            self.with_base(|base| base.client_encoding())
        }

        /// Changes the client encoding of the session.
        pub fn set_client_encoding(&self, name: &str) -> Result<(), Error> {
            let encoding = Encoding::from_name(name)?;
            self.run(SetClientEncoding {
                encoding,
                exec: None,
            })
        }

        /// Registers a function called with every notice sent by the server.
        ///
        /// A panicking handler is logged and doesn't affect the connection
        /// or the other handlers.
        pub fn add_notice_handler<F>(&self, handler: F) -> HandlerId
        where
            F: Fn(&DbError) + Send + Sync + 'static,
        {
            self.handlers.add_notice(Arc::new(handler))
        }

        /// Unregisters a notice handler.
        pub fn remove_notice_handler(&self, id: HandlerId) -> Result<(), Error> {
            self.handlers.remove_notice(id)
        }

        /// Registers a function called with every notification received
        /// while executing commands.
        pub fn add_notify_handler<F>(&self, handler: F) -> HandlerId
        where
            F: Fn(&Notify) + Send + Sync + 'static,
        {
            self.handlers.add_notify(Arc::new(handler))
        }

        /// Unregisters a notify handler.
        pub fn remove_notify_handler(&self, id: HandlerId) -> Result<(), Error> {
            self.handlers.remove_notify(id)
        }

        /// Returns an iterator over the notifications received by the
        /// connection, blocking until they arrive.
        pub fn notifies(&self) -> Notifies<'_, Self> {
            Notifies {
                conn: self,
                received: VecDeque::new(),
                done: false,
            }
        }

        /// The number of executions after which a query is prepared.
        ///
        /// `None` disables preparation, `Some(0)` prepares every query at
        /// its first execution.
        pub fn prepare_threshold(&self) -> Option<usize> {
            self.with_base(|base| base.prepared.prepare_threshold())
        }

        /// Changes the number of executions after which a query is
        /// prepared.
        pub fn set_prepare_threshold(&self, threshold: Option<usize>) {
            self.with_base(|base| base.prepared.set_prepare_threshold(threshold))
        }

        /// The maximum number of statements prepared on the connection.
        pub fn prepared_max(&self) -> usize {
            self.with_base(|base| base.prepared.prepared_max())
        }

        /// Changes the maximum number of statements prepared on the
        /// connection.
        pub fn set_prepared_max(&self, max: usize) {
            self.with_base(|base| base.prepared.set_prepared_max(max))
        }

        /// Registers a dumper for values of type `T` on the connection.
        ///
        /// Cursors created afterwards use it.
        pub fn register_dumper<T, D>(&self, dumper: D)
        where
            T: Any,
            D: Dumper + 'static,
        {
            self.with_base(|base| Arc::make_mut(&mut base.adapters).register_dumper::<T, D>(dumper))
        }

        /// Registers a loader for values of type `oid` on the connection.
        ///
        /// Cursors created afterwards use it.
        pub fn register_loader<L>(&self, oid: Oid, loader: L)
        where
            L: Loader + 'static,
        {
            self.with_base(|base| Arc::make_mut(&mut base.adapters).register_loader(oid, loader))
        }

        /// The state of the transaction of the connection.
        pub fn transaction_status(&self) -> TransactionStatus {
            self.with_base(|base| base.pgconn.transaction_status())
        }

        /// A runtime parameter reported by the server, e.g.
        /// `server_version`.
        pub fn parameter_status(&self, name: &str) -> Option<String> {
            self.with_base(|base| base.pgconn.parameter_status(name).map(str::to_string))
        }

        /// The process id of the backend serving the connection.
        pub fn backend_pid(&self) -> i32 {
            self.with_base(|base| base.pgconn.backend_pid())
        }
    };
}

/// A connection to a PostgreSQL database, for use from threads.
///
/// Operations block the calling thread. The connection can be shared
/// between threads; operations are serialized by an internal lock.
pub struct Connection {
    inner: std::sync::Mutex<BaseConnection>,
    handlers: Arc<Handlers>,
    cancel_token: CancelToken,
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("inner", &self.inner)
            .finish()
    }
}

impl Connection {
    pub(crate) fn connect_socket(socket: Socket, config: &Config) -> Result<Connection, Error> {
        let mut pgconn = PgConn::new(socket);
        let gen = ConnectGen::new(config)?;
        waiting::wait(gen, &mut pgconn, WAIT_INTERVAL, deadline(config))?;
        info!("connected, backend pid {}", pgconn.backend_pid());

        let handlers = Arc::new(Handlers::default());
        let cancel_token = CancelToken {
            target: cancel_target(config),
            process_id: pgconn.backend_pid(),
            secret_key: pgconn.secret_key(),
        };
        Ok(Connection {
            inner: std::sync::Mutex::new(BaseConnection::new(pgconn, config, &handlers)),
            handlers,
            cancel_token,
        })
    }

    connection_methods!();
}

impl GenericConnection for Connection {
    fn run<G>(&self, gen: G) -> Result<G::Output, Error>
    where
        G: PqGen<BaseConnection>,
    {
        let mut base = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        waiting::wait(gen, &mut *base, WAIT_INTERVAL, None)
    }

    fn with_base<R>(&self, f: impl FnOnce(&mut BaseConnection) -> R) -> R {
        let mut base = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        f(&mut base)
    }
}

/// A connection to a PostgreSQL database, for use from may coroutines.
///
/// Operations park the calling coroutine instead of blocking its thread.
/// The connection can be shared between coroutines; operations are
/// serialized by an internal coroutine-aware lock.
pub struct CoConnection {
    inner: may::sync::Mutex<BaseConnection>,
    handlers: Arc<Handlers>,
    cancel_token: CancelToken,
}

impl fmt::Debug for CoConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CoConnection")
            .field("process_id", &self.cancel_token.process_id)
            .finish()
    }
}

impl CoConnection {
    pub(crate) fn connect_socket(socket: Socket, config: &Config) -> Result<CoConnection, Error> {
        let mut pgconn = PgConn::new(socket);
        let gen = ConnectGen::new(config)?;
        waiting::wait_co(gen, &mut pgconn, deadline(config))?;
        info!("connected, backend pid {}", pgconn.backend_pid());

        let handlers = Arc::new(Handlers::default());
        let cancel_token = CancelToken {
            target: cancel_target(config),
            process_id: pgconn.backend_pid(),
            secret_key: pgconn.secret_key(),
        };
        Ok(CoConnection {
            inner: may::sync::Mutex::new(BaseConnection::new(pgconn, config, &handlers)),
            handlers,
            cancel_token,
        })
    }

    connection_methods!();
}

impl GenericConnection for CoConnection {
    fn run<G>(&self, gen: G) -> Result<G::Output, Error>
    where
        G: PqGen<BaseConnection>,
    {
        let mut base = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        waiting::wait_co(gen, &mut *base, None)
    }

    fn with_base<R>(&self, f: impl FnOnce(&mut BaseConnection) -> R) -> R {
        let mut base = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        f(&mut base)
    }
}
