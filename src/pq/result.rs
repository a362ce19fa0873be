use crate::adapt::Format;
use crate::error::DbError;
use crate::oids::Oid;
use bytes::Bytes;
use std::ops::Range;
use std::sync::Arc;

/// The status of a command result.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecStatus {
    /// The query string was empty.
    EmptyQuery,
    /// A command returning no rows completed.
    CommandOk,
    /// A query returning rows completed.
    TuplesOk,
    /// The server started a `COPY FROM STDIN`.
    CopyIn,
    /// The server started a `COPY TO STDOUT`.
    CopyOut,
    /// The command failed.
    FatalError,
}

impl ExecStatus {
    /// The upper case name of the status.
    pub fn name(self) -> &'static str {
        match self {
            ExecStatus::EmptyQuery => "EMPTY_QUERY",
            ExecStatus::CommandOk => "COMMAND_OK",
            ExecStatus::TuplesOk => "TUPLES_OK",
            ExecStatus::CopyIn => "COPY_IN",
            ExecStatus::CopyOut => "COPY_OUT",
            ExecStatus::FatalError => "FATAL_ERROR",
        }
    }
}

/// Information about a column of a query result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Column {
    name: String,
    type_oid: Oid,
    format: Format,
}

impl Column {
    pub(crate) fn new(name: String, type_oid: Oid, format: Format) -> Column {
        Column {
            name,
            type_oid,
            format,
        }
    }

    /// The name of the column.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The oid of the type of the column.
    pub fn type_oid(&self) -> Oid {
        self.type_oid
    }

    /// The format of the values of the column.
    pub fn format(&self) -> Format {
        self.format
    }
}

/// The raw values of a row.
#[derive(Debug, Clone)]
pub(crate) struct RawRow {
    buffer: Bytes,
    ranges: Vec<Option<Range<usize>>>,
}

impl RawRow {
    pub(crate) fn new(buffer: Bytes, ranges: Vec<Option<Range<usize>>>) -> RawRow {
        RawRow { buffer, ranges }
    }

    pub(crate) fn len(&self) -> usize {
        self.ranges.len()
    }

    /// The value of column `idx`; `None` for `NULL`.
    pub(crate) fn get(&self, idx: usize) -> Option<&[u8]> {
        self.ranges[idx].clone().map(|range| &self.buffer[range])
    }
}

/// The result of a command.
#[derive(Debug, Clone)]
pub struct PgResult {
    status: ExecStatus,
    columns: Arc<[Column]>,
    rows: Vec<RawRow>,
    command_tag: Option<String>,
    error: Option<DbError>,
}

impl PgResult {
    pub(crate) fn new(status: ExecStatus, columns: Arc<[Column]>) -> PgResult {
        PgResult {
            status,
            columns,
            rows: vec![],
            command_tag: None,
            error: None,
        }
    }

    pub(crate) fn error(error: DbError) -> PgResult {
        PgResult {
            status: ExecStatus::FatalError,
            columns: Arc::from(vec![]),
            rows: vec![],
            command_tag: None,
            error: Some(error),
        }
    }

    pub(crate) fn push_row(&mut self, row: RawRow) {
        self.rows.push(row);
    }

    pub(crate) fn set_command_tag(&mut self, tag: String) {
        self.command_tag = Some(tag);
    }

    /// The status of the result.
    pub fn status(&self) -> ExecStatus {
        self.status
    }

    /// The columns of the rows returned.
    pub fn columns(&self) -> &Arc<[Column]> {
        &self.columns
    }

    pub(crate) fn rows(&self) -> &[RawRow] {
        &self.rows
    }

    /// The number of rows returned.
    pub fn ntuples(&self) -> usize {
        self.rows.len()
    }

    /// The command tag, e.g. `INSERT 0 1`.
    pub fn command_tag(&self) -> Option<&str> {
        self.command_tag.as_deref()
    }

    /// The number of rows affected by the command, if the tag reports it.
    pub fn command_tuples(&self) -> Option<u64> {
        let tag = self.command_tag.as_deref()?;
        let mut words = tag.split_whitespace();
        match words.next()? {
            "INSERT" | "UPDATE" | "DELETE" | "SELECT" | "MOVE" | "FETCH" | "COPY" | "MERGE" => {
                words.last()?.parse().ok()
            }
            _ => None,
        }
    }

    /// The error reported by the server, for a failed command.
    pub fn db_error(&self) -> Option<&DbError> {
        self.error.as_ref()
    }

    /// The error to report for a failed command.
    pub(crate) fn to_error(&self) -> crate::Error {
        match &self.error {
            Some(e) => crate::Error::db(e.clone()),
            None => crate::Error::unexpected_message(),
        }
    }
}
