use crate::adapt::{downcast, AdaptersMap, Dumper, Format, Loader, ToSql};
use crate::oids::{
    Oid, BPCHAR_OID, BYTEA_OID, INVALID_OID, NAME_OID, TEXT_OID, VARCHAR_OID,
};
use crate::Error;
use bytes::{BufMut, Bytes, BytesMut};
use std::any::Any;

pub(super) fn register(map: &mut AdaptersMap) {
    map.register_dumper::<String, _>(StrDumper::<String>::new(Format::Text));
    map.register_dumper::<String, _>(StrDumper::<String>::new(Format::Binary));
    map.register_dumper::<&'static str, _>(StrDumper::<&'static str>::new(Format::Text));
    map.register_dumper::<&'static str, _>(StrDumper::<&'static str>::new(Format::Binary));

    map.register_dumper::<Vec<u8>, _>(ByteaDumper::<Vec<u8>>::new(Format::Text));
    map.register_dumper::<Vec<u8>, _>(ByteaDumper::<Vec<u8>>::new(Format::Binary));
    map.register_dumper::<Bytes, _>(ByteaDumper::<Bytes>::new(Format::Text));
    map.register_dumper::<Bytes, _>(ByteaDumper::<Bytes>::new(Format::Binary));
    map.register_dumper::<&'static [u8], _>(ByteaDumper::<&'static [u8]>::new(Format::Text));
    map.register_dumper::<&'static [u8], _>(ByteaDumper::<&'static [u8]>::new(Format::Binary));

    for oid in [TEXT_OID, VARCHAR_OID, BPCHAR_OID, NAME_OID] {
        map.register_loader(oid, TextLoader(Format::Text));
        map.register_loader(oid, TextLoader(Format::Binary));
    }
    map.register_loader(BYTEA_OID, ByteaLoader(Format::Text));
    map.register_loader(BYTEA_OID, ByteaLoader(Format::Binary));

    // fallback for the types without a loader
    map.register_loader(INVALID_OID, TextLoader(Format::Text));
    map.register_loader(INVALID_OID, ByteaLoader(Format::Binary));
}

struct StrDumper<T> {
    format: Format,
    _p: std::marker::PhantomData<fn() -> T>,
}

impl<T> StrDumper<T> {
    fn new(format: Format) -> Self {
        StrDumper {
            format,
            _p: std::marker::PhantomData,
        }
    }
}

impl<T> Dumper for StrDumper<T>
where
    T: AsRef<str> + ToSql,
{
    fn format(&self) -> Format {
        self.format
    }

    // strings are sent as unknown in text: the server casts them to whatever
    // the context requires, as it does for literals
    fn oid(&self) -> Oid {
        match self.format {
            Format::Text => INVALID_OID,
            Format::Binary => TEXT_OID,
        }
    }

    fn dump(&self, obj: &dyn Any, buf: &mut BytesMut) -> Result<(), Error> {
        let value = downcast::<T>(obj)?.as_ref();
        if value.contains('\0') {
            return Err(Error::data(
                "PostgreSQL text fields cannot contain NUL (0x00) bytes",
            ));
        }
        buf.put_slice(value.as_bytes());
        Ok(())
    }
}

struct ByteaDumper<T> {
    format: Format,
    _p: std::marker::PhantomData<fn() -> T>,
}

impl<T> ByteaDumper<T> {
    fn new(format: Format) -> Self {
        ByteaDumper {
            format,
            _p: std::marker::PhantomData,
        }
    }
}

const HEX: &[u8; 16] = b"0123456789abcdef";

fn put_hex(value: &[u8], buf: &mut BytesMut) {
    buf.reserve(value.len() * 2 + 2);
    buf.put_slice(b"\\x");
    for b in value {
        buf.put_u8(HEX[(b >> 4) as usize]);
        buf.put_u8(HEX[(b & 0xf) as usize]);
    }
}

impl<T> Dumper for ByteaDumper<T>
where
    T: AsRef<[u8]> + ToSql,
{
    fn format(&self) -> Format {
        self.format
    }

    fn oid(&self) -> Oid {
        BYTEA_OID
    }

    fn dump(&self, obj: &dyn Any, buf: &mut BytesMut) -> Result<(), Error> {
        let value = downcast::<T>(obj)?.as_ref();
        match self.format {
            Format::Text => put_hex(value, buf),
            Format::Binary => buf.put_slice(value),
        }
        Ok(())
    }

    fn quote(&self, obj: &dyn Any, buf: &mut BytesMut) -> Result<(), Error> {
        let value = downcast::<T>(obj)?.as_ref();
        buf.put_u8(b'\'');
        put_hex(value, buf);
        buf.put_slice(b"'::bytea");
        Ok(())
    }
}

/// Loads text as `String`, or as `Vec<u8>` if it isn't valid UTF-8 (which
/// can happen on `SQL_ASCII` databases).
struct TextLoader(Format);

impl Loader for TextLoader {
    fn format(&self) -> Format {
        self.0
    }

    fn load(&self, data: &[u8]) -> Result<Box<dyn Any + Send>, Error> {
        match String::from_utf8(data.to_vec()) {
            Ok(s) => Ok(Box::new(s)),
            Err(e) => Ok(Box::new(e.into_bytes())),
        }
    }
}

struct ByteaLoader(Format);

fn unhex(c: u8) -> Option<u8> {
    match c {
        b'0'..=b'9' => Some(c - b'0'),
        b'a'..=b'f' => Some(c - b'a' + 10),
        b'A'..=b'F' => Some(c - b'A' + 10),
        _ => None,
    }
}

fn decode_hex(data: &[u8]) -> Option<Vec<u8>> {
    if data.len() % 2 != 0 {
        return None;
    }
    data.chunks(2)
        .map(|pair| Some(unhex(pair[0])? << 4 | unhex(pair[1])?))
        .collect()
}

// the pre 9.0 `escape` output: printable bytes as is, `\\` for backslash and
// `\nnn` octal for the rest
fn decode_escape(data: &[u8]) -> Option<Vec<u8>> {
    let mut out = Vec::with_capacity(data.len());
    let mut i = 0;
    while i < data.len() {
        if data[i] != b'\\' {
            out.push(data[i]);
            i += 1;
        } else if data.get(i + 1) == Some(&b'\\') {
            out.push(b'\\');
            i += 2;
        } else {
            let octal = data.get(i + 1..i + 4)?;
            let mut b = 0u32;
            for &c in octal {
                if !(b'0'..=b'7').contains(&c) {
                    return None;
                }
                b = b * 8 + u32::from(c - b'0');
            }
            out.push(u8::try_from(b).ok()?);
            i += 4;
        }
    }
    Some(out)
}

impl Loader for ByteaLoader {
    fn format(&self) -> Format {
        self.0
    }

    fn load(&self, data: &[u8]) -> Result<Box<dyn Any + Send>, Error> {
        let value = match self.0 {
            Format::Binary => Some(data.to_vec()),
            Format::Text => match data.strip_prefix(b"\\x") {
                Some(hex) => decode_hex(hex),
                None => decode_escape(data),
            },
        };
        match value {
            Some(value) => Ok(Box::new(value)),
            None => Err(Error::data("invalid bytea representation")),
        }
    }
}
