use crate::generators::Wait;
use may::io::WaitIo;
use std::fmt;
use std::io::{self, Read, Write};
use std::net::{Shutdown, TcpStream};
#[cfg(unix)]
use std::os::unix::io::{AsRawFd, RawFd};
use std::time::Duration;

/// A byte stream to the server provided by the application.
///
/// Reads and writes must not block: when no data is available they fail
/// with `WouldBlock`, and the driver calls `poll_ready` to wait.
pub trait Transport: Read + Write + Send + 'static {
    /// Waits up to `timeout` for the transport to become ready for `wait`,
    /// returning whether it is.
    fn poll_ready(&mut self, wait: Wait, timeout: Duration) -> io::Result<bool>;

    /// Closes the transport.
    fn shutdown(&mut self) -> io::Result<()> {
        Ok(())
    }
}

enum Inner {
    Tcp(TcpStream),
    CoTcp(may::net::TcpStream),
    Custom(Box<dyn Transport>),
}

/// The stream a connection talks to the server over.
pub struct Socket(Inner);

impl fmt::Debug for Socket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.0 {
            Inner::Tcp(s) => f.debug_tuple("Tcp").field(s).finish(),
            Inner::CoTcp(s) => f.debug_tuple("CoTcp").field(s).finish(),
            Inner::Custom(_) => f.write_str("Custom"),
        }
    }
}

impl Socket {
    /// A socket driven by the thread blocking waiter.
    pub(crate) fn new_tcp(stream: TcpStream) -> io::Result<Socket> {
        stream.set_nonblocking(true)?;
        Ok(Socket(Inner::Tcp(stream)))
    }

    /// A socket driven by the coroutine waiter.
    pub(crate) fn new_co_tcp(stream: may::net::TcpStream) -> io::Result<Socket> {
        stream.inner().set_nonblocking(true)?;
        Ok(Socket(Inner::CoTcp(stream)))
    }

    /// Wraps an application provided transport.
    pub fn custom<T: Transport>(transport: T) -> Socket {
        Socket(Inner::Custom(Box::new(transport)))
    }

    /// Waits up to `timeout` for the socket to become ready for `wait`.
    pub(crate) fn poll_ready(&mut self, wait: Wait, timeout: Duration) -> io::Result<bool> {
        match &mut self.0 {
            #[cfg(unix)]
            Inner::Tcp(s) => poll_fd(s.as_raw_fd(), wait, timeout),
            #[cfg(not(unix))]
            Inner::Tcp(s) => {
                if wait != Wait::R {
                    std::thread::sleep(Duration::from_millis(1));
                    return Ok(true);
                }
                poll_readable(s, timeout)
            }
            Inner::CoTcp(_) => Ok(true),
            Inner::Custom(t) => t.poll_ready(wait, timeout),
        }
    }

    /// Prepares a coroutine socket for `wait_io`; must be called before the
    /// attempt to read or write.
    pub(crate) fn reset_io(&self) {
        if let Inner::CoTcp(s) = &self.0 {
            s.reset_io();
        }
    }

    /// Parks the current coroutine until the socket has an io event.
    pub(crate) fn wait_io(&mut self, wait: Wait, timeout: Duration) -> io::Result<()> {
        match &mut self.0 {
            Inner::CoTcp(s) => {
                s.wait_io();
                Ok(())
            }
            _ => self.poll_ready(wait, timeout).map(|_| ()),
        }
    }

    pub(crate) fn shutdown(&mut self) -> io::Result<()> {
        match &mut self.0 {
            Inner::Tcp(s) => s.shutdown(Shutdown::Both),
            Inner::CoTcp(s) => s.shutdown(Shutdown::Both),
            Inner::Custom(t) => t.shutdown(),
        }
    }
}

#[cfg(unix)]
fn poll_fd(fd: RawFd, wait: Wait, timeout: Duration) -> io::Result<bool> {
    let events = match wait {
        Wait::R => libc::POLLIN,
        Wait::W => libc::POLLOUT,
        Wait::RW => libc::POLLIN | libc::POLLOUT,
    };
    let mut pfd = libc::pollfd {
        fd,
        events,
        revents: 0,
    };
    // round up: a zero timeout would turn the waiter into a busy loop
    let ms = timeout.as_micros().div_ceil(1000).clamp(1, i32::MAX as u128) as libc::c_int;
    let ret = unsafe { libc::poll(&mut pfd, 1, ms) };
    if ret < 0 {
        let e = io::Error::last_os_error();
        if e.kind() == io::ErrorKind::Interrupted {
            return Ok(false);
        }
        return Err(e);
    }
    // errors and hang ups count as ready: the next read or write reports them
    Ok(ret > 0)
}

#[cfg(not(unix))]
fn poll_readable(stream: &TcpStream, timeout: Duration) -> io::Result<bool> {
    // a zero timeout means "forever" to set_read_timeout
    let timeout = timeout.max(Duration::from_millis(1));
    stream.set_nonblocking(false)?;
    stream.set_read_timeout(Some(timeout))?;
    let ret = stream.peek(&mut [0u8; 1]);
    stream.set_nonblocking(true)?;
    match ret {
        // data, or end of file: either way a read won't block
        Ok(_) => Ok(true),
        Err(e) if matches!(e.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut) => {
            Ok(false)
        }
        Err(e) if e.kind() == io::ErrorKind::Interrupted => Ok(false),
        Err(e) => Err(e),
    }
}

impl Read for Socket {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match &mut self.0 {
            Inner::Tcp(s) => s.read(buf),
            Inner::CoTcp(s) => s.inner_mut().read(buf),
            Inner::Custom(t) => t.read(buf),
        }
    }
}

impl Write for Socket {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match &mut self.0 {
            Inner::Tcp(s) => s.write(buf),
            Inner::CoTcp(s) => s.inner_mut().write(buf),
            Inner::Custom(t) => t.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match &mut self.0 {
            Inner::Tcp(s) => s.flush(),
            Inner::CoTcp(s) => s.inner_mut().flush(),
            Inner::Custom(t) => t.flush(),
        }
    }
}
