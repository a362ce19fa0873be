//! Errors.

use fallible_iterator::FallibleIterator;
use postgres_protocol::message::backend::{ErrorFields, ErrorResponseBody};
use std::error::{self, Error as _Error};
use std::fmt;
use std::io;

/// The field contents of an error or notice response from the server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DbError {
    severity: String,
    code: String,
    message: String,
    detail: Option<String>,
    hint: Option<String>,
    position: Option<u32>,
    where_: Option<String>,
    schema: Option<String>,
    table: Option<String>,
    column: Option<String>,
    datatype: Option<String>,
    constraint: Option<String>,
    file: Option<String>,
    line: Option<u32>,
    routine: Option<String>,
}

impl DbError {
    pub(crate) fn parse(fields: &mut ErrorFields<'_>) -> io::Result<DbError> {
        let mut severity = None;
        let mut code = None;
        let mut message = None;
        let mut detail = None;
        let mut hint = None;
        let mut position = None;
        let mut where_ = None;
        let mut schema = None;
        let mut table = None;
        let mut column = None;
        let mut datatype = None;
        let mut constraint = None;
        let mut file = None;
        let mut line = None;
        let mut routine = None;

        while let Some(field) = fields.next()? {
            let value = String::from_utf8_lossy(field.value_bytes()).into_owned();
            match field.type_() {
                // the non-localized severity wins if the server sends both
                b'S' => {
                    if severity.is_none() {
                        severity = Some(value)
                    }
                }
                b'V' => severity = Some(value),
                b'C' => code = Some(value),
                b'M' => message = Some(value),
                b'D' => detail = Some(value),
                b'H' => hint = Some(value),
                b'P' => position = value.parse::<u32>().ok(),
                b'W' => where_ = Some(value),
                b's' => schema = Some(value),
                b't' => table = Some(value),
                b'c' => column = Some(value),
                b'd' => datatype = Some(value),
                b'n' => constraint = Some(value),
                b'F' => file = Some(value),
                b'L' => line = value.parse::<u32>().ok(),
                b'R' => routine = Some(value),
                _ => {}
            }
        }

        Ok(DbError {
            severity: severity
                .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "`S` field missing"))?,
            code: code
                .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "`C` field missing"))?,
            message: message
                .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "`M` field missing"))?,
            detail,
            hint,
            position,
            where_,
            schema,
            table,
            column,
            datatype,
            constraint,
            file,
            line,
            routine,
        })
    }

    /// The field contents are ERROR, FATAL, or PANIC (in an error message),
    /// or WARNING, NOTICE, DEBUG, INFO, or LOG (in a notice message).
    pub fn severity(&self) -> &str {
        &self.severity
    }

    /// The SQLSTATE code for the error.
    pub fn code(&self) -> &str {
        &self.code
    }

    /// The primary human-readable error message.
    pub fn message(&self) -> &str {
        &self.message
    }

    /// An optional secondary error message carrying more detail about the
    /// problem.
    pub fn detail(&self) -> Option<&str> {
        self.detail.as_deref()
    }

    /// An optional suggestion what to do about the problem.
    pub fn hint(&self) -> Option<&str> {
        self.hint.as_deref()
    }

    /// The 1-based character position of the error in the original query
    /// string, if known.
    pub fn position(&self) -> Option<u32> {
        self.position
    }

    /// A call stack traceback of the active procedural language functions
    /// and internally-generated queries.
    pub fn where_(&self) -> Option<&str> {
        self.where_.as_deref()
    }

    /// The schema containing the object associated with the error.
    pub fn schema(&self) -> Option<&str> {
        self.schema.as_deref()
    }

    /// The table associated with the error.
    pub fn table(&self) -> Option<&str> {
        self.table.as_deref()
    }

    /// The column associated with the error.
    pub fn column(&self) -> Option<&str> {
        self.column.as_deref()
    }

    /// The data type associated with the error.
    pub fn datatype(&self) -> Option<&str> {
        self.datatype.as_deref()
    }

    /// The constraint associated with the error.
    pub fn constraint(&self) -> Option<&str> {
        self.constraint.as_deref()
    }

    /// The file name of the source-code location where the error was
    /// reported.
    pub fn file(&self) -> Option<&str> {
        self.file.as_deref()
    }

    /// The line number of the source-code location where the error was
    /// reported.
    pub fn line(&self) -> Option<u32> {
        self.line
    }

    /// The name of the source-code routine reporting the error.
    pub fn routine(&self) -> Option<&str> {
        self.routine.as_deref()
    }
}

impl fmt::Display for DbError {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(fmt, "{}: {}", self.severity, self.message)?;
        if let Some(detail) = &self.detail {
            write!(fmt, "\nDETAIL: {}", detail)?;
        }
        if let Some(hint) = &self.hint {
            write!(fmt, "\nHINT: {}", hint)?;
        }
        Ok(())
    }
}

impl error::Error for DbError {}

/// The family an [`Error`] belongs to.
///
/// The families follow the usual database driver taxonomy, so callers can
/// decide how to react without inspecting messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// The request was malformed, or not allowed in the current connection
    /// state. Detected before anything is sent to the server.
    Programming,
    /// The server reported an error executing the command.
    Database,
    /// The connection is closed, broken, or could not be established.
    Operational,
    /// The driver and the server disagree, or no adapter could be found.
    Interface,
    /// A value could not be represented on the wire.
    Data,
    /// The requested feature is not supported by this driver.
    NotSupported,
}

#[derive(Debug, PartialEq)]
enum Kind {
    Io,
    UnexpectedMessage,
    Closed,
    Db,
    Parse,
    Encode,
    Authentication,
    ConfigParse,
    Config,
    Connect,
    Timeout,
    Programming,
    Adapt,
    Interface,
    Conversion,
    Data,
    NotSupported,
    RowCount,
    Column(String),
}

struct ErrorInner {
    kind: Kind,
    cause: Option<Box<dyn error::Error + Sync + Send>>,
}

/// An error communicating with the Postgres server.
pub struct Error(Box<ErrorInner>);

impl fmt::Debug for Error {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt.debug_struct("Error")
            .field("kind", &self.0.kind)
            .field("cause", &self.0.cause)
            .finish()
    }
}

impl fmt::Display for Error {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.0.kind {
            Kind::Io => fmt.write_str("error communicating with the server")?,
            Kind::UnexpectedMessage => fmt.write_str("unexpected message from server")?,
            Kind::Closed => fmt.write_str("connection closed")?,
            Kind::Db => fmt.write_str("db error")?,
            Kind::Parse => fmt.write_str("error parsing response from server")?,
            Kind::Encode => fmt.write_str("error encoding message to server")?,
            Kind::Authentication => fmt.write_str("authentication error")?,
            Kind::ConfigParse => fmt.write_str("invalid connection string")?,
            Kind::Config => fmt.write_str("invalid configuration")?,
            Kind::Connect => fmt.write_str("error connecting to server")?,
            Kind::Timeout => fmt.write_str("timeout waiting for server")?,
            Kind::Programming => fmt.write_str("programming error")?,
            Kind::Adapt => fmt.write_str("adaptation error")?,
            Kind::Interface => fmt.write_str("interface error")?,
            Kind::Conversion => fmt.write_str("error converting value")?,
            Kind::Data => fmt.write_str("invalid data")?,
            Kind::NotSupported => fmt.write_str("not supported")?,
            Kind::RowCount => fmt.write_str("query returned an unexpected number of rows")?,
            Kind::Column(column) => write!(fmt, "invalid column `{}`", column)?,
        };
        if let Some(ref cause) = self.0.cause {
            write!(fmt, ": {}", cause)?;
        }
        Ok(())
    }
}

impl error::Error for Error {
    fn source(&self) -> Option<&(dyn error::Error + 'static)> {
        self.0.cause.as_ref().map(|e| &**e as _)
    }
}

impl Error {
    /// Consumes the error, returning its cause.
    pub fn into_source(self) -> Option<Box<dyn error::Error + Sync + Send>> {
        self.0.cause
    }

    /// Returns the source of this error if it was a `DbError`.
    ///
    /// This is a simple convenience method.
    pub fn as_db_error(&self) -> Option<&DbError> {
        self.source().and_then(|e| e.downcast_ref::<DbError>())
    }

    /// Determines if the error was associated with closed connection.
    pub fn is_closed(&self) -> bool {
        self.0.kind == Kind::Closed
    }

    /// Returns the SQLSTATE error code associated with the error.
    ///
    /// This is a convenience method that downcasts the cause to a `DbError` and returns its code.
    pub fn code(&self) -> Option<&str> {
        self.as_db_error().map(DbError::code)
    }

    /// The family of the error.
    pub fn class(&self) -> ErrorClass {
        match self.0.kind {
            Kind::Programming | Kind::ConfigParse | Kind::Config | Kind::Column(_) => {
                ErrorClass::Programming
            }
            Kind::Db => ErrorClass::Database,
            Kind::Io
            | Kind::Closed
            | Kind::Connect
            | Kind::Timeout
            | Kind::Authentication => ErrorClass::Operational,
            Kind::UnexpectedMessage
            | Kind::Parse
            | Kind::Encode
            | Kind::Adapt
            | Kind::Interface
            | Kind::Conversion
            | Kind::RowCount => ErrorClass::Interface,
            Kind::Data => ErrorClass::Data,
            Kind::NotSupported => ErrorClass::NotSupported,
        }
    }

    fn new(kind: Kind, cause: Option<Box<dyn error::Error + Sync + Send>>) -> Error {
        Error(Box::new(ErrorInner { kind, cause }))
    }

    pub(crate) fn closed() -> Error {
        Error::new(Kind::Closed, None)
    }

    pub(crate) fn unexpected_message() -> Error {
        Error::new(Kind::UnexpectedMessage, None)
    }

    pub(crate) fn db(error: DbError) -> Error {
        Error::new(Kind::Db, Some(Box::new(error)))
    }

    pub(crate) fn db_body(body: ErrorResponseBody) -> Error {
        match DbError::parse(&mut body.fields()) {
            Ok(e) => Error::db(e),
            Err(e) => Error::parse(e),
        }
    }

    pub(crate) fn parse(e: io::Error) -> Error {
        Error::new(Kind::Parse, Some(Box::new(e)))
    }

    pub(crate) fn encode(e: io::Error) -> Error {
        Error::new(Kind::Encode, Some(Box::new(e)))
    }

    pub(crate) fn authentication(e: Box<dyn error::Error + Sync + Send>) -> Error {
        Error::new(Kind::Authentication, Some(e))
    }

    pub(crate) fn config_parse(e: Box<dyn error::Error + Sync + Send>) -> Error {
        Error::new(Kind::ConfigParse, Some(e))
    }

    pub(crate) fn config(e: Box<dyn error::Error + Sync + Send>) -> Error {
        Error::new(Kind::Config, Some(e))
    }

    pub(crate) fn connect(e: io::Error) -> Error {
        Error::new(Kind::Connect, Some(Box::new(e)))
    }

    pub(crate) fn io(e: io::Error) -> Error {
        Error::new(Kind::Io, Some(Box::new(e)))
    }

    pub(crate) fn timeout() -> Error {
        Error::new(Kind::Timeout, None)
    }

    pub(crate) fn programming(msg: impl Into<String>) -> Error {
        Error::new(Kind::Programming, Some(msg.into().into()))
    }

    pub(crate) fn adapt(msg: impl Into<String>) -> Error {
        Error::new(Kind::Adapt, Some(msg.into().into()))
    }

    pub(crate) fn interface(msg: impl Into<String>) -> Error {
        Error::new(Kind::Interface, Some(msg.into().into()))
    }

    pub(crate) fn conversion(e: Box<dyn error::Error + Sync + Send>) -> Error {
        Error::new(Kind::Conversion, Some(e))
    }

    pub(crate) fn data(msg: impl Into<String>) -> Error {
        Error::new(Kind::Data, Some(msg.into().into()))
    }

    pub(crate) fn not_supported(msg: impl Into<String>) -> Error {
        Error::new(Kind::NotSupported, Some(msg.into().into()))
    }

    pub(crate) fn row_count() -> Error {
        Error::new(Kind::RowCount, None)
    }

    pub(crate) fn column(column: String) -> Error {
        Error::new(Kind::Column(column), None)
    }
}
