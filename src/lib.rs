//! A PostgreSQL driver for threads and may coroutines.
//!
//! # Example
//!
//! ```no_run
//! use may_pq::{params, Error};
//!
//! fn main() -> Result<(), Error> {
//!     // Connect to the database.
//!     let conn = may_pq::connect("host=localhost user=postgres")?;
//!
//!     // Execute a query with a parameter, then fetch its result.
//!     let mut cur = conn.cursor();
//!     cur.execute("SELECT %s::text", Some(&params!["hello world"]))?;
//!     let row = cur.fetch_one()?.expect("one row");
//!
//!     // Now we can check that we got back the same string we sent over.
//!     let value: String = row.get(0);
//!     assert_eq!(value, "hello world");
//!
//!     // Not in autocommit: the query started a transaction.
//!     conn.commit()?;
//!     conn.close();
//!     Ok(())
//! }
//! ```
//!
//! # Behavior
//!
//! Every operation on a connection is a resumable state machine which never
//! blocks on its own; it is driven either by a waiter blocking the calling
//! thread ([`Connection`]) or by one parking the calling may coroutine
//! ([`CoConnection`]). Both flavours expose the same methods and serialize
//! the operations on a connection with a lock.
//!
//! Queries use `%s` placeholders, rewritten to the server's `$n` syntax.
//! Values are converted by the dumpers and loaders of an [`AdaptersMap`],
//! which can be customized per connection or per cursor. Queries executed
//! often are prepared on the server automatically; see
//! [`Connection::set_prepare_threshold`].
//!
//! Unless autocommit is enabled, the first command executed starts a
//! transaction, which must be ended with `commit` or `rollback`.
//! [`Connection::transaction`] runs a closure in a transaction block,
//! nesting with savepoints.
#![warn(rust_2018_idioms, clippy::all, missing_docs)]

#[macro_use]
pub mod generators;

pub use crate::adapt::{downcast, AdaptersMap, Dumper, Format, Loader, Null, ToSql};
pub use crate::cancel_token::CancelToken;
pub use crate::config::Config;
pub use crate::connection::{BaseConnection, CoConnection, Connection, HandlerId, Notifies};
pub use crate::cursor::Cursor;
pub use crate::encodings::Encoding;
use crate::error::DbError;
pub use crate::error::{Error, ErrorClass};
pub use crate::generic_client::GenericConnection;
pub use crate::pq::{Column, ConnStatus, ExecStatus, Notify, TransactionStatus};
pub use crate::prepare::Prepare;
pub use crate::queries::Params;
pub use crate::row::Row;
pub use crate::socket::{Socket, Transport};
pub use crate::types::{Array, Dimension, Numeric};
#[cfg(feature = "with-serde_json-1")]
pub use crate::types::{Json, Jsonb};

pub mod adapt;
mod cancel_query;
mod cancel_query_raw;
mod cancel_token;
pub mod config;
mod connect_socket;
mod connection;
mod cursor;
pub mod encodings;
pub mod error;
mod generic_client;
pub mod oids;
pub mod pq;
mod prepare;
pub mod queries;
pub mod row;
pub mod socket;
mod transaction;
pub mod types;
pub mod waiting;

/// A convenience function which parses a connection string and connects to the database.
///
/// See the documentation for [`Config`] for details on the connection string format.
///
/// [`Config`]: config/struct.Config.html
pub fn connect(config: &str) -> Result<Connection, Error> {
    let config = config.parse::<Config>()?;
    config.connect()
}

/// Like [`connect`], for use from may coroutines.
pub fn connect_co(config: &str) -> Result<CoConnection, Error> {
    let config = config.parse::<Config>()?;
    config.connect_co()
}

/// A notice sent by the server, delivered to the notice handlers.
pub type Notice = DbError;
