//! Resumable protocol operations.
//!
//! Every operation on a connection is a [`PqGen`]: a state machine that does
//! as much work as it can without blocking, then returns [`Step::Wait`]
//! telling on what the socket must become ready before it is resumed. The
//! waiters in [`waiting`](crate::waiting) drive the machines, either
//! blocking the thread or parking a coroutine.

use crate::pq::{Notify, PgConn, PgResult};
use crate::Error;

/// The readiness a suspended operation waits for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Wait {
    /// The socket is readable.
    R,
    /// The socket is writable.
    W,
    /// The socket is readable or writable.
    RW,
}

/// The outcome of resuming an operation.
#[derive(Debug)]
pub enum Step<T> {
    /// The operation completed.
    Ready(T),
    /// The operation can't progress until the socket is ready.
    Wait(Wait),
}

/// A resumable operation over a context `C`.
///
/// `resume` must not block: it returns `Step::Wait` instead, and is called
/// again once the socket is ready. After `Step::Ready` or an error the
/// operation must not be resumed again.
pub trait PqGen<C: ?Sized> {
    /// The value produced by the operation.
    type Output;

    /// Makes as much progress as possible.
    fn resume(&mut self, cx: &mut C) -> Result<Step<Self::Output>, Error>;
}

/// Unwraps a `Step::Ready`, or returns the `Step::Wait` from the calling
/// `resume`.
macro_rules! ready {
    ($e:expr) => {
        match $e {
            $crate::generators::Step::Ready(v) => v,
            $crate::generators::Step::Wait(w) => return Ok($crate::generators::Step::Wait(w)),
        }
    };
}

/// Sends the buffered command and collects all its results.
#[derive(Debug, Default)]
pub(crate) struct Execute {
    results: Vec<PgResult>,
}

impl Execute {
    pub(crate) fn new() -> Execute {
        Execute::default()
    }
}

impl PqGen<PgConn> for Execute {
    type Output = Vec<PgResult>;

    fn resume(&mut self, conn: &mut PgConn) -> Result<Step<Vec<PgResult>>, Error> {
        loop {
            // processing the input may queue a reply, e.g. to COPY FROM STDIN
            if !conn.flush()? {
                // the server may be blocked sending to us: keep reading
                conn.consume_input()?;
                return Ok(Step::Wait(Wait::RW));
            }
            if conn.is_busy() {
                conn.consume_input()?;
                conn.dispatch_notifies();
                if conn.is_busy() {
                    return Ok(Step::Wait(Wait::R));
                }
            }
            match conn.get_result() {
                Some(result) => self.results.push(result),
                None => return Ok(Step::Ready(std::mem::take(&mut self.results))),
            }
        }
    }
}

/// Waits for asynchronous notifications.
#[derive(Debug, Default)]
pub(crate) struct Notifies;

impl PqGen<PgConn> for Notifies {
    type Output = Vec<Notify>;

    fn resume(&mut self, conn: &mut PgConn) -> Result<Step<Vec<Notify>>, Error> {
        let mut notifies = conn.take_notifies();
        if notifies.is_empty() {
            conn.consume_input()?;
            notifies = conn.take_notifies();
        }
        if notifies.is_empty() {
            Ok(Step::Wait(Wait::R))
        } else {
            Ok(Step::Ready(notifies))
        }
    }
}
