use crate::cancel_token::CancelTarget;
use crate::{cancel_query_raw, connect_socket, Error};
use std::io;

pub(crate) fn cancel_query(
    target: Option<&CancelTarget>,
    process_id: i32,
    secret_key: i32,
) -> Result<(), Error> {
    let target = match target {
        Some(target) => target,
        None => {
            return Err(Error::connect(io::Error::new(
                io::ErrorKind::InvalidInput,
                "unknown host",
            )))
        }
    };

    let stream =
        connect_socket::connect_co_tcp(&target.host, target.port, target.connect_timeout)?;

    cancel_query_raw::cancel_query_raw(stream, process_id, secret_key)
}
