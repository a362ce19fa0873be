//! Drivers running [`PqGen`] operations to completion.
//!
//! [`wait`] blocks the calling thread, polling the socket at a bounded
//! interval; [`wait_co`] parks the calling coroutine on the socket until may
//! reports an io event.

use crate::generators::{PqGen, Step};
use crate::socket::Socket;
use crate::Error;
use std::time::{Duration, Instant};

/// The default interval at which the blocking waiter polls the socket.
pub const WAIT_INTERVAL: Duration = Duration::from_millis(100);

/// A context owning the socket an operation waits on.
pub trait HasSocket {
    /// The socket of the connection.
    fn socket(&mut self) -> &mut Socket;
}

impl HasSocket for crate::pq::PgConn {
    fn socket(&mut self) -> &mut Socket {
        crate::pq::PgConn::socket(self)
    }
}

fn check_deadline(deadline: Option<Instant>) -> Result<(), Error> {
    match deadline {
        Some(deadline) if Instant::now() >= deadline => Err(Error::timeout()),
        _ => Ok(()),
    }
}

/// Runs `gen` to completion, blocking the thread while the socket is not
/// ready.
///
/// The socket is polled at most `interval` at a time; past `deadline` the
/// operation fails with a timeout error.
pub fn wait<C, G>(
    mut gen: G,
    cx: &mut C,
    interval: Duration,
    deadline: Option<Instant>,
) -> Result<G::Output, Error>
where
    C: HasSocket + ?Sized,
    G: PqGen<C>,
{
    loop {
        let wait = match gen.resume(cx)? {
            Step::Ready(v) => return Ok(v),
            Step::Wait(wait) => wait,
        };
        loop {
            check_deadline(deadline)?;
            let timeout = match deadline {
                Some(deadline) => interval.min(deadline.saturating_duration_since(Instant::now())),
                None => interval,
            };
            if cx.socket().poll_ready(wait, timeout).map_err(Error::io)? {
                break;
            }
        }
    }
}

/// Runs `gen` to completion, parking the coroutine while the socket is not
/// ready.
///
/// Must be called from a may coroutine for sockets connected with
/// [`Config::connect_co`](crate::Config::connect_co). The deadline is
/// checked whenever the coroutine wakes up.
pub fn wait_co<C, G>(mut gen: G, cx: &mut C, deadline: Option<Instant>) -> Result<G::Output, Error>
where
    C: HasSocket + ?Sized,
    G: PqGen<C>,
{
    loop {
        cx.socket().reset_io();
        let wait = match gen.resume(cx)? {
            Step::Ready(v) => return Ok(v),
            Step::Wait(wait) => wait,
        };
        check_deadline(deadline)?;
        cx.socket()
            .wait_io(wait, WAIT_INTERVAL)
            .map_err(Error::io)?;
    }
}
