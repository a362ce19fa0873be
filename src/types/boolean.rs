use crate::adapt::{downcast, AdaptersMap, Dumper, Format, Loader, Null};
use crate::oids::{Oid, BOOL_OID};
use crate::Error;
use bytes::{BufMut, BytesMut};
use std::any::Any;

pub(super) fn register(map: &mut AdaptersMap) {
    map.register_dumper::<bool, _>(BoolDumper(Format::Text));
    map.register_dumper::<bool, _>(BoolDumper(Format::Binary));
    map.register_dumper::<Null, _>(NullDumper(Format::Text));
    map.register_dumper::<Null, _>(NullDumper(Format::Binary));

    map.register_loader(BOOL_OID, BoolLoader(Format::Text));
    map.register_loader(BOOL_OID, BoolLoader(Format::Binary));
}

struct BoolDumper(Format);

impl Dumper for BoolDumper {
    fn format(&self) -> Format {
        self.0
    }

    fn oid(&self) -> Oid {
        BOOL_OID
    }

    fn dump(&self, obj: &dyn Any, buf: &mut BytesMut) -> Result<(), Error> {
        let value = *downcast::<bool>(obj)?;
        match self.0 {
            Format::Text => buf.put_u8(if value { b't' } else { b'f' }),
            Format::Binary => buf.put_u8(value as u8),
        }
        Ok(())
    }

    fn quote(&self, obj: &dyn Any, buf: &mut BytesMut) -> Result<(), Error> {
        let value = *downcast::<bool>(obj)?;
        buf.put_slice(if value { &b"true"[..] } else { &b"false"[..] });
        Ok(())
    }
}

/// `Null` parameters never reach `dump`: they are sent as a missing value.
struct NullDumper(Format);

impl Dumper for NullDumper {
    fn format(&self) -> Format {
        self.0
    }

    fn dump(&self, obj: &dyn Any, _: &mut BytesMut) -> Result<(), Error> {
        downcast::<Null>(obj).map(|_| ())
    }

    fn quote(&self, obj: &dyn Any, buf: &mut BytesMut) -> Result<(), Error> {
        downcast::<Null>(obj)?;
        buf.put_slice(b"NULL");
        Ok(())
    }
}

struct BoolLoader(Format);

impl Loader for BoolLoader {
    fn format(&self) -> Format {
        self.0
    }

    fn load(&self, data: &[u8]) -> Result<Box<dyn Any + Send>, Error> {
        let value = match (self.0, data) {
            (Format::Text, b"t") => true,
            (Format::Text, b"f") => false,
            (Format::Binary, [b]) => *b != 0,
            _ => {
                return Err(Error::data(format!(
                    "invalid bool value: {:?}",
                    String::from_utf8_lossy(data)
                )))
            }
        };
        Ok(Box::new(value))
    }
}
