use crate::{cancel_query, cancel_query_raw, Error};
use std::io::{Read, Write};
use std::time::Duration;

#[derive(Debug, Clone)]
pub(crate) struct CancelTarget {
    pub(crate) host: String,
    pub(crate) port: u16,
    pub(crate) connect_timeout: Option<Duration>,
}

/// The capability to request cancellation of in-progress queries on a
/// connection.
#[derive(Debug, Clone)]
pub struct CancelToken {
    pub(crate) target: Option<CancelTarget>,
    pub(crate) process_id: i32,
    pub(crate) secret_key: i32,
}

impl CancelToken {
    /// Attempts to cancel the in-progress query on the connection associated
    /// with this `CancelToken`.
    ///
    /// The request is sent over a new short-lived connection, so it doesn't
    /// wait for the connection running the query. The server provides no
    /// information about whether a cancellation attempt was successful or
    /// not. An error will only be returned if the client was unable to
    /// connect to the database, e.g. because the connection was created
    /// over a custom socket whose address is unknown.
    ///
    /// Cancellation is inherently racy. There is no guarantee that the
    /// cancellation request will reach the server before the query terminates
    /// normally, or that the connection associated with this token is still
    /// active.
    pub fn cancel_query(&self) -> Result<(), Error> {
        cancel_query::cancel_query(self.target.as_ref(), self.process_id, self.secret_key)
    }

    /// Like `cancel_query`, but uses a stream which is already connected to the server rather than opening a new
    /// connection itself.
    pub fn cancel_query_raw<S>(&self, stream: S) -> Result<(), Error>
    where
        S: Read + Write,
    {
        cancel_query_raw::cancel_query_raw(stream, self.process_id, self.secret_key)
    }
}
