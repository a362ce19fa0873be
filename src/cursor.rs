//! Cursors: executing queries and fetching their results.

use crate::adapt::{AdaptersMap, Dumper, Format, Loader, Transformer};
use crate::connection::{BaseConnection, ExecCommand, StartQuery};
use crate::generators::{Execute, PqGen, Step};
use crate::generic_client::GenericConnection;
use crate::oids::Oid;
use crate::pq::{Column, ExecStatus, PgResult};
use crate::prepare::{Decision, Prepare};
use crate::queries::{Params, PostgresQuery};
use crate::row::Row;
use crate::Error;
use std::any::Any;
use std::fmt;
use std::mem;
use std::sync::Arc;

enum Stage {
    Start(StartQuery),
    Evict,
    Deallocate(ExecCommand),
    Prepare(Execute),
    Send,
    Fetch(Execute),
}

/// Executes one query on the connection, preparing it on the server when
/// the prepare manager decides so.
struct ExecuteGen {
    pgq: PostgresQuery,
    hint: Prepare,
    result_format: Format,
    decision: Decision,
    stage: Stage,
}

impl ExecuteGen {
    fn new(pgq: PostgresQuery, hint: Prepare, result_format: Format) -> ExecuteGen {
        ExecuteGen {
            pgq,
            hint,
            result_format,
            decision: Decision::No,
            stage: Stage::Start(StartQuery::new()),
        }
    }

    fn params(&self) -> &[Option<bytes::Bytes>] {
        self.pgq.params.as_deref().unwrap_or(&[])
    }

    fn send(&mut self, cx: &mut BaseConnection) -> Result<(), Error> {
        match &self.decision {
            Decision::Yes(name) | Decision::Should { name, .. } => cx.pgconn.send_query_prepared(
                name,
                self.params(),
                &self.pgq.formats,
                self.result_format,
            ),
            Decision::No if self.pgq.params.is_none() && self.result_format == Format::Text => {
                cx.pgconn.send_query(&self.pgq.query)
            }
            Decision::No => cx.pgconn.send_query_params(
                &self.pgq.query,
                self.params(),
                &self.pgq.types,
                &self.pgq.formats,
                self.result_format,
            ),
        }
    }
}

fn check_results(results: &[PgResult]) -> Result<(), Error> {
    for result in results {
        match result.status() {
            ExecStatus::FatalError => return Err(result.to_error()),
            ExecStatus::CopyIn | ExecStatus::CopyOut => {
                return Err(Error::not_supported("COPY is not supported"))
            }
            _ => {}
        }
    }
    Ok(())
}

impl PqGen<BaseConnection> for ExecuteGen {
    type Output = Vec<PgResult>;

    fn resume(&mut self, cx: &mut BaseConnection) -> Result<Step<Vec<PgResult>>, Error> {
        loop {
            match &mut self.stage {
                Stage::Start(start) => {
                    ready!(start.resume(cx)?);
                    self.decision = cx.prepared.get(
                        &self.pgq.query,
                        &self.pgq.types,
                        self.hint,
                        self.pgq.params.is_none(),
                    );
                    self.stage = Stage::Evict;
                }
                Stage::Evict => {
                    let evicted = match &mut self.decision {
                        Decision::Should { evict, .. } => evict.pop(),
                        _ => None,
                    };
                    self.stage = match evicted {
                        Some(name) => {
                            cx.prepared.forget(&name);
                            Stage::Deallocate(ExecCommand::new(format!("DEALLOCATE {}", name)))
                        }
                        None => match &self.decision {
                            Decision::Should { name, .. } => {
                                cx.pgconn
                                    .send_prepare(name, &self.pgq.query, &self.pgq.types)?;
                                Stage::Prepare(Execute::new())
                            }
                            _ => Stage::Send,
                        },
                    };
                }
                Stage::Deallocate(exec) => {
                    ready!(exec.resume(cx)?);
                    self.stage = Stage::Evict;
                }
                Stage::Prepare(exec) => {
                    let results = ready!(exec.resume(&mut cx.pgconn)?);
                    check_results(&results)?;
                    // the statement exists now, whatever the execution outcome
                    cx.prepared.maintain(
                        &self.pgq.query,
                        &self.pgq.types,
                        self.hint,
                        &self.decision,
                        1,
                    );
                    if let Decision::Should { name, .. } = &mut self.decision {
                        self.decision = Decision::Yes(mem::take(name));
                    }
                    self.stage = Stage::Send;
                }
                Stage::Send => {
                    self.send(cx)?;
                    self.stage = Stage::Fetch(Execute::new());
                }
                Stage::Fetch(exec) => {
                    let results = ready!(exec.resume(&mut cx.pgconn)?);
                    check_results(&results)?;
                    cx.prepared.maintain(
                        &self.pgq.query,
                        &self.pgq.types,
                        self.hint,
                        &self.decision,
                        results.len(),
                    );
                    return Ok(Step::Ready(results));
                }
            }
        }
    }
}

/// Executes queries on a connection and fetches their results.
///
/// A cursor keeps the results of the last query executed. Queries
/// returning several results, e.g. simple queries made of several
/// statements, are walked with [`nextset`](Cursor::nextset).
pub struct Cursor<'a, C> {
    conn: &'a C,
    adapters: Arc<AdaptersMap>,
    format: Format,
    results: Vec<PgResult>,
    index: usize,
    pos: usize,
    param_types: Vec<Oid>,
    param_formats: Vec<Format>,
}

impl<C> fmt::Debug for Cursor<'_, C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Cursor")
            .field("format", &self.format)
            .field("results", &self.results.len())
            .field("index", &self.index)
            .field("pos", &self.pos)
            .finish()
    }
}

impl<'a, C: GenericConnection> Cursor<'a, C> {
    pub(crate) fn new(conn: &'a C, format: Format) -> Cursor<'a, C> {
        Cursor {
            conn,
            adapters: Arc::new(AdaptersMap::extend(&conn.adapters())),
            format,
            results: vec![],
            index: 0,
            pos: 0,
            param_types: vec![],
            param_formats: vec![],
        }
    }

    /// The connection the cursor executes queries on.
    pub fn connection(&self) -> &'a C {
        self.conn
    }

    /// The format of the results requested by the cursor.
    pub fn format(&self) -> Format {
        self.format
    }

    /// The adapters of the cursor.
    pub fn adapters(&self) -> &AdaptersMap {
        &self.adapters
    }

    /// Registers a dumper for values of type `T` on this cursor only.
    pub fn register_dumper<T, D>(&mut self, dumper: D)
    where
        T: Any,
        D: Dumper + 'static,
    {
        Arc::make_mut(&mut self.adapters).register_dumper::<T, D>(dumper)
    }

    /// Registers a loader for values of type `oid` on this cursor only.
    pub fn register_loader<L>(&mut self, oid: Oid, loader: L)
    where
        L: Loader + 'static,
    {
        Arc::make_mut(&mut self.adapters).register_loader(oid, loader)
    }

    /// Executes a query.
    ///
    /// Placeholders in the query are `%s` and `%b` for positional
    /// parameters in text and binary format, `%(name)s` and `%(name)b` for
    /// named ones; a literal `%` is written `%%`. Without `params` the query
    /// is sent unchanged, and may contain several statements.
    ///
    /// The results of any query executed before are discarded.
    pub fn execute(&mut self, query: &str, params: Option<&Params<'_>>) -> Result<&mut Self, Error> {
        self.execute_with(query, params, Prepare::Auto)
    }

    /// Like [`execute`](Cursor::execute), choosing whether the query is
    /// prepared on the server.
    pub fn execute_with(
        &mut self,
        query: &str,
        params: Option<&Params<'_>>,
        prepare: Prepare,
    ) -> Result<&mut Self, Error> {
        self.reset();
        let adapters = &self.adapters;
        let pgq = self.conn.with_base(|base| {
            base.check_open()?;
            let encoding = base.client_encoding();
            PostgresQuery::convert(query.as_bytes(), params, encoding, &mut base.queries, adapters)
        })?;
        self.param_types = pgq.types.clone();
        self.param_formats = pgq.formats.clone();

        self.results = self.conn.run(ExecuteGen::new(pgq, prepare, self.format))?;
        Ok(self)
    }

    fn reset(&mut self) {
        self.results.clear();
        self.index = 0;
        self.pos = 0;
        self.param_types.clear();
        self.param_formats.clear();
    }

    fn current(&self) -> Option<&PgResult> {
        self.results.get(self.index)
    }

    fn tuples(&self) -> Result<&PgResult, Error> {
        let result = self
            .current()
            .ok_or_else(|| Error::programming("no result available"))?;
        match result.status() {
            ExecStatus::TuplesOk => Ok(result),
            status => Err(Error::programming(format!(
                "the last operation didn't produce a result (status {})",
                status.name()
            ))),
        }
    }

    fn load_rows(&mut self, n: usize) -> Result<Vec<Row>, Error> {
        let pos = self.pos;
        let result = self.tuples()?;
        let end = result.ntuples().min(pos.saturating_add(n));
        if pos >= end {
            return Ok(vec![]);
        }

        let loaders = Transformer::new(&self.adapters)
            .row_loaders(result.columns().iter().map(|c| (c.type_oid(), c.format())))?;
        let rows = result.rows()[pos..end]
            .iter()
            .map(|raw| Row::load(result.columns().clone(), raw, &loaders))
            .collect::<Result<Vec<_>, Error>>()?;
        self.pos = end;
        Ok(rows)
    }

    /// Returns the next row of the current result, or `None` once all the
    /// rows were fetched.
    pub fn fetch_one(&mut self) -> Result<Option<Row>, Error> {
        Ok(self.load_rows(1)?.pop())
    }

    /// Returns up to `size` rows of the current result.
    pub fn fetch_many(&mut self, size: usize) -> Result<Vec<Row>, Error> {
        self.load_rows(size)
    }

    /// Returns the remaining rows of the current result.
    pub fn fetch_all(&mut self) -> Result<Vec<Row>, Error> {
        self.load_rows(usize::MAX)
    }

    /// Moves to the next result of the query.
    ///
    /// Returns `false`, and stays on the last result, if there is none.
    pub fn nextset(&mut self) -> bool {
        if self.index + 1 < self.results.len() {
            self.index += 1;
            self.pos = 0;
            true
        } else {
            false
        }
    }

    /// The number of rows returned or affected by the current result, `-1`
    /// if unknown.
    pub fn rowcount(&self) -> i64 {
        match self.current() {
            Some(result) if result.status() == ExecStatus::TuplesOk => result.ntuples() as i64,
            Some(result) => result.command_tuples().map_or(-1, |n| n as i64),
            None => -1,
        }
    }

    /// The columns of the current result; `None` if it returned no rows.
    pub fn description(&self) -> Option<&[Column]> {
        self.current()
            .filter(|r| r.status() == ExecStatus::TuplesOk)
            .map(|r| &r.columns()[..])
    }

    /// The command tag of the current result, e.g. `INSERT 0 1`.
    pub fn status_message(&self) -> Option<&str> {
        self.current().and_then(PgResult::command_tag)
    }

    /// The position of the next row to fetch in the current result.
    pub fn rownumber(&self) -> Option<usize> {
        self.tuples().ok().map(|_| self.pos)
    }

    /// The oids of the parameters of the last query executed.
    pub fn param_types(&self) -> &[Oid] {
        &self.param_types
    }

    /// The formats of the parameters of the last query executed.
    pub fn param_formats(&self) -> &[Format] {
        &self.param_formats
    }

    /// Discards the results held by the cursor.
    pub fn close(&mut self) {
        self.reset();
    }
}
