use crate::Error;
use std::io;
use std::net::{SocketAddr, ToSocketAddrs};
use std::time::Duration;

fn connect_addrs<S>(
    host: &str,
    port: u16,
    connect: impl Fn(&SocketAddr) -> io::Result<S>,
) -> Result<S, Error> {
    let addrs = (host, port).to_socket_addrs().map_err(Error::connect)?;
    let mut last_err = None;

    for addr in addrs {
        match connect(&addr) {
            Ok(stream) => return Ok(stream),
            Err(e) => last_err = Some(Error::connect(e)),
        }
    }

    Err(last_err.unwrap_or_else(|| {
        Error::connect(io::Error::new(
            io::ErrorKind::InvalidInput,
            "could not resolve any addresses",
        ))
    }))
}

/// Connects a socket for the thread blocking waiter.
pub(crate) fn connect_tcp(
    host: &str,
    port: u16,
    connect_timeout: Option<Duration>,
) -> Result<std::net::TcpStream, Error> {
    let stream = connect_addrs(host, port, |addr| match connect_timeout {
        Some(timeout) => std::net::TcpStream::connect_timeout(addr, timeout),
        None => std::net::TcpStream::connect(addr),
    })?;
    stream.set_nodelay(true).map_err(Error::connect)?;
    Ok(stream)
}

/// Connects a may socket, usable from threads and coroutines alike.
pub(crate) fn connect_co_tcp(
    host: &str,
    port: u16,
    connect_timeout: Option<Duration>,
) -> Result<may::net::TcpStream, Error> {
    let stream = connect_addrs(host, port, |addr| match connect_timeout {
        Some(timeout) => may::net::TcpStream::connect_timeout(addr, timeout),
        None => may::net::TcpStream::connect(addr),
    })?;
    stream.set_nodelay(true).map_err(Error::connect)?;
    Ok(stream)
}
