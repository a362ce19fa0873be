use crate::Error;
use bytes::BytesMut;
use log::debug;
use postgres_protocol::message::frontend;
use std::io::{Read, Write};

pub(crate) fn cancel_query_raw<S>(mut stream: S, process_id: i32, secret_key: i32) -> Result<(), Error>
where
    S: Read + Write,
{
    let mut buf = BytesMut::new();
    frontend::cancel_request(process_id, secret_key, &mut buf);

    debug!("sending cancel request for backend {}", process_id);
    stream.write_all(&buf).map_err(Error::io)?;
    stream.flush().map_err(Error::io)?;

    // the server closes the connection once the request was processed
    let mut rest = [0u8; 1];
    let _ = stream.read(&mut rest);

    Ok(())
}
