use crate::adapt::{downcast, AdaptersMap, Dumper, Format, Loader};
use crate::oids::{Oid, UUID_OID};
use crate::Error;
use bytes::{BufMut, BytesMut};
use std::any::Any;
use uuid_1::Uuid;

pub(super) fn register(map: &mut AdaptersMap) {
    for format in [Format::Text, Format::Binary] {
        map.register_dumper::<Uuid, _>(UuidDumper(format));
        map.register_loader(UUID_OID, UuidLoader(format));
    }
}

struct UuidDumper(Format);

impl Dumper for UuidDumper {
    fn format(&self) -> Format {
        self.0
    }

    fn oid(&self) -> Oid {
        UUID_OID
    }

    fn dump(&self, obj: &dyn Any, buf: &mut BytesMut) -> Result<(), Error> {
        let value = downcast::<Uuid>(obj)?;
        match self.0 {
            Format::Text => {
                let mut text = Uuid::encode_buffer();
                buf.put_slice(value.hyphenated().encode_lower(&mut text).as_bytes());
            }
            Format::Binary => buf.put_slice(value.as_bytes()),
        }
        Ok(())
    }
}

struct UuidLoader(Format);

impl Loader for UuidLoader {
    fn format(&self) -> Format {
        self.0
    }

    fn load(&self, data: &[u8]) -> Result<Box<dyn Any + Send>, Error> {
        let value = match self.0 {
            Format::Text => std::str::from_utf8(data)
                .ok()
                .and_then(|s| Uuid::parse_str(s).ok()),
            Format::Binary => Uuid::from_slice(data).ok(),
        };
        match value {
            Some(value) => Ok(Box::new(value)),
            None => Err(Error::data("invalid uuid representation")),
        }
    }
}
