use bytes::BytesMut;
use postgres_protocol::message::backend::{self, Message};
use std::io::{self, Read, Write};

const IO_BUF_SIZE: usize = 4096 * 16;

#[inline]
pub(crate) fn reserve_buf(buf: &mut BytesMut) {
    let rem = buf.capacity() - buf.len();
    if rem < 1024 {
        buf.reserve(IO_BUF_SIZE - rem);
    }
}

/// Writes as much of `write_buf` as the stream accepts without blocking.
#[inline]
pub(crate) fn nonblock_write(stream: &mut impl Write, write_buf: &[u8]) -> io::Result<usize> {
    let len = write_buf.len();
    let mut write_cnt = 0;
    while write_cnt < len {
        match stream.write(&write_buf[write_cnt..]) {
            Ok(0) => return Err(io::Error::new(io::ErrorKind::BrokenPipe, "closed")),
            Ok(n) => write_cnt += n,
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => return Err(e),
        }
    }
    Ok(write_cnt)
}

/// Reads everything available on the stream without blocking.
///
/// End of file is reported as `UnexpectedEof` once the data read before it
/// was returned.
#[inline]
pub(crate) fn nonblock_read(stream: &mut impl Read, read_buf: &mut BytesMut) -> io::Result<usize> {
    let mut read_cnt = 0;
    loop {
        reserve_buf(read_buf);
        let start = read_buf.len();
        read_buf.resize(read_buf.capacity(), 0);
        let ret = stream.read(&mut read_buf[start..]);
        match ret {
            Ok(0) => {
                read_buf.truncate(start);
                if read_cnt > 0 {
                    return Ok(read_cnt);
                }
                return Err(io::Error::new(io::ErrorKind::UnexpectedEof, "closed"));
            }
            Ok(n) => {
                read_buf.truncate(start + n);
                read_cnt += n;
            }
            Err(e) => {
                read_buf.truncate(start);
                match e.kind() {
                    io::ErrorKind::WouldBlock => return Ok(read_cnt),
                    io::ErrorKind::Interrupted => {}
                    _ => return Err(e),
                }
            }
        }
    }
}

/// Messages the server may send at any time.
#[inline]
pub(crate) fn is_async(tag: u8) -> bool {
    matches!(
        tag,
        backend::NOTICE_RESPONSE_TAG
            | backend::NOTIFICATION_RESPONSE_TAG
            | backend::PARAMETER_STATUS_TAG
    )
}

/// Decodes the next complete message of `src`.
///
/// Unless `busy`, only asynchronous messages and errors are decoded: the
/// responses to the next command stay buffered until it is sent. An error
/// while idle is the server giving up on the session, e.g. on shutdown.
pub(crate) fn decode(src: &mut BytesMut, busy: bool) -> io::Result<Option<Message>> {
    match src.first() {
        None => Ok(None),
        Some(tag) if !busy && !is_async(*tag) && *tag != backend::ERROR_RESPONSE_TAG => Ok(None),
        Some(_) => Message::parse(src),
    }
}
