//! Conversion between Rust values and their PostgreSQL representation.
//!
//! A [`Dumper`] turns a Rust value of a given type into its wire
//! representation in a given [`Format`]; a [`Loader`] turns the wire bytes of
//! a given oid back into a Rust value. Both are registered in an
//! [`AdaptersMap`]. Maps are layered: a connection's map extends the global
//! one and a cursor's map extends its connection's, so an adapter can be
//! customised on a connection or a cursor without touching its parent.

use crate::oids::{Oid, INVALID_OID};
use crate::Error;
use bytes::{BufMut, Bytes, BytesMut};
use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, OnceLock};

/// The representation of a value on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Format {
    /// The textual representation, as used in SQL literals.
    Text = 0,
    /// The binary representation used by the extended query protocol.
    Binary = 1,
}

impl Format {
    pub(crate) fn from_code(code: i16) -> Format {
        if code == 1 {
            Format::Binary
        } else {
            Format::Text
        }
    }
}

impl fmt::Display for Format {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Format::Text => f.write_str("TEXT"),
            Format::Binary => f.write_str("BINARY"),
        }
    }
}

/// A value that can be passed as a query parameter.
///
/// Implemented for every `Debug + Sync + 'static` type: whether a value can
/// actually be sent is decided by the dumpers registered for its type.
pub trait ToSql: Any + fmt::Debug + Sync {
    /// Upcast to `Any`, to be downcast by a dumper.
    fn as_any(&self) -> &dyn Any;

    /// The name of the Rust type, for error messages.
    fn type_name(&self) -> &'static str;
}

impl<T> ToSql for T
where
    T: Any + fmt::Debug + Sync,
{
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn type_name(&self) -> &'static str {
        std::any::type_name::<T>()
    }
}

/// The SQL `NULL` value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Null;

/// Converts Rust values of one type into a PostgreSQL representation.
pub trait Dumper: Send + Sync {
    /// The format this dumper produces.
    fn format(&self) -> Format;

    /// The oid to pass to the server along with the value.
    ///
    /// [`INVALID_OID`] lets the server infer the type from the context.
    fn oid(&self) -> Oid {
        INVALID_OID
    }

    /// Writes the representation of `obj` into `buf`.
    fn dump(&self, obj: &dyn Any, buf: &mut BytesMut) -> Result<(), Error>;

    /// Writes `obj` as a literal that can be embedded in a query.
    fn quote(&self, obj: &dyn Any, buf: &mut BytesMut) -> Result<(), Error> {
        let mut value = BytesMut::new();
        self.dump(obj, &mut value)?;
        escape_literal(&value, buf);
        Ok(())
    }
}

/// Converts values of a PostgreSQL type into Rust values.
pub trait Loader: Send + Sync {
    /// The format this loader understands.
    fn format(&self) -> Format;

    /// Converts the wire representation `data`.
    fn load(&self, data: &[u8]) -> Result<Box<dyn Any + Send>, Error>;
}

/// Downcasts the object passed to a dumper to the type it was registered for.
pub fn downcast<T: Any>(obj: &dyn Any) -> Result<&T, Error> {
    obj.downcast_ref::<T>().ok_or_else(|| {
        Error::adapt(format!(
            "dumper expected a value of type {}",
            std::any::type_name::<T>()
        ))
    })
}

/// Writes `value` as a standard conforming string literal.
pub fn escape_literal(value: &[u8], buf: &mut BytesMut) {
    if value.contains(&b'\\') {
        buf.put_u8(b'E');
    }
    buf.put_u8(b'\'');
    for &b in value {
        match b {
            b'\'' => buf.put_slice(b"''"),
            b'\\' => buf.put_slice(b"\\\\"),
            _ => buf.put_u8(b),
        }
    }
    buf.put_u8(b'\'');
}

#[derive(Clone)]
struct DumperEntry {
    type_name: &'static str,
    dumper: Arc<dyn Dumper>,
}

/// The registry of dumpers and loaders of an adaptation context.
#[derive(Clone, Default)]
pub struct AdaptersMap {
    dumpers: HashMap<(TypeId, Format), DumperEntry>,
    loaders: HashMap<(Oid, Format), Arc<dyn Loader>>,
    parent: Option<Arc<AdaptersMap>>,
}

impl fmt::Debug for AdaptersMap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AdaptersMap")
            .field("dumpers", &self.dumpers.len())
            .field("loaders", &self.loaders.len())
            .field("parent", &self.parent)
            .finish()
    }
}

impl AdaptersMap {
    /// Creates an empty map, with no fallback.
    pub fn new() -> AdaptersMap {
        AdaptersMap::default()
    }

    /// Creates a map filled with the builtin adapters.
    pub fn with_builtins() -> AdaptersMap {
        let mut map = AdaptersMap::new();
        crate::types::register_default_adapters(&mut map);
        map
    }

    /// The process-wide default map, built on first use.
    pub fn global() -> Arc<AdaptersMap> {
        static GLOBAL: OnceLock<Arc<AdaptersMap>> = OnceLock::new();
        GLOBAL
            .get_or_init(|| Arc::new(AdaptersMap::with_builtins()))
            .clone()
    }

    /// Creates an empty map falling back to `parent` for what it doesn't
    /// define itself.
    pub fn extend(parent: &Arc<AdaptersMap>) -> AdaptersMap {
        AdaptersMap {
            dumpers: HashMap::new(),
            loaders: HashMap::new(),
            parent: Some(parent.clone()),
        }
    }

    /// Uses `dumper` to convert values of type `T` in the dumper's format.
    pub fn register_dumper<T, D>(&mut self, dumper: D)
    where
        T: Any,
        D: Dumper + 'static,
    {
        let key = (TypeId::of::<T>(), dumper.format());
        self.dumpers.insert(
            key,
            DumperEntry {
                type_name: std::any::type_name::<T>(),
                dumper: Arc::new(dumper),
            },
        );
    }

    /// Uses `loader` to convert values of type `oid` in the loader's format.
    pub fn register_loader<L>(&mut self, oid: Oid, loader: L)
    where
        L: Loader + 'static,
    {
        let key = (oid, loader.format());
        self.loaders.insert(key, Arc::new(loader));
    }

    fn lookup_dumper(&self, key: &(TypeId, Format)) -> Option<&DumperEntry> {
        match self.dumpers.get(key) {
            Some(entry) => Some(entry),
            None => self.parent.as_ref()?.lookup_dumper(key),
        }
    }

    fn lookup_loader(&self, key: &(Oid, Format)) -> Option<&Arc<dyn Loader>> {
        match self.loaders.get(key) {
            Some(loader) => Some(loader),
            None => self.parent.as_ref()?.lookup_loader(key),
        }
    }

    /// Returns the dumper for `value` in the requested format.
    pub fn get_dumper(&self, value: &dyn ToSql, format: Format) -> Result<Arc<dyn Dumper>, Error> {
        let key = (value.as_any().type_id(), format);
        match self.lookup_dumper(&key) {
            Some(entry) => Ok(entry.dumper.clone()),
            None => Err(Error::programming(format!(
                "cannot adapt type {} to format {}",
                value.type_name(),
                format
            ))),
        }
    }

    /// The dumper for values of type `T` in `format`, if there is one.
    pub fn dumper_for<T: Any>(&self, format: Format) -> Option<Arc<dyn Dumper>> {
        self.lookup_dumper(&(TypeId::of::<T>(), format))
            .map(|entry| entry.dumper.clone())
    }

    /// The loader registered for `oid` in `format`, without falling back on
    /// the passthrough loader.
    pub fn loader_for(&self, oid: Oid, format: Format) -> Option<Arc<dyn Loader>> {
        self.lookup_loader(&(oid, format)).cloned()
    }

    /// Returns the loader for `oid` in the requested format.
    ///
    /// Unknown oids fall back on the loader registered for [`INVALID_OID`],
    /// so their values are still returned as text or bytes.
    pub fn get_loader(&self, oid: Oid, format: Format) -> Result<Arc<dyn Loader>, Error> {
        if let Some(loader) = self.lookup_loader(&(oid, format)) {
            return Ok(loader.clone());
        }
        match self.lookup_loader(&(INVALID_OID, format)) {
            Some(loader) => Ok(loader.clone()),
            None => Err(Error::adapt(format!(
                "no loader found for oid {} in format {}",
                oid, format
            ))),
        }
    }

    /// Renders `value` as a literal that can be embedded in a query.
    pub fn quote(&self, value: &dyn ToSql) -> Result<Bytes, Error> {
        let dumper = self.get_dumper(value, Format::Text)?;
        let mut buf = BytesMut::new();
        dumper.quote(value.as_any(), &mut buf)?;
        Ok(buf.freeze())
    }

    /// The names of the Rust types with a dumper registered directly in this
    /// map.
    pub fn dumper_types(&self) -> impl Iterator<Item = (&'static str, Format)> + '_ {
        self.dumpers.iter().map(|((_, fmt), e)| (e.type_name, *fmt))
    }
}

/// Dumps and loads the values of one query.
pub(crate) struct Transformer<'a> {
    adapters: &'a AdaptersMap,
}

impl<'a> Transformer<'a> {
    pub(crate) fn new(adapters: &'a AdaptersMap) -> Transformer<'a> {
        Transformer { adapters }
    }

    /// Dumps `params`, each in the format at the same position.
    pub(crate) fn dump_sequence(
        &self,
        params: &[&dyn ToSql],
        formats: &[Format],
    ) -> Result<(Vec<Option<Bytes>>, Vec<Oid>), Error> {
        let mut values = Vec::with_capacity(params.len());
        let mut types = Vec::with_capacity(params.len());
        let mut buf = BytesMut::new();

        for (&param, format) in params.iter().zip(formats) {
            if param.as_any().is::<Null>() {
                values.push(None);
                types.push(INVALID_OID);
                continue;
            }
            let dumper = self.adapters.get_dumper(param, *format)?;
            dumper.dump(param.as_any(), &mut buf)?;
            values.push(Some(buf.split().freeze()));
            types.push(dumper.oid());
        }

        Ok((values, types))
    }

    /// Resolves the loader of each column of a result.
    pub(crate) fn row_loaders(
        &self,
        columns: impl Iterator<Item = (Oid, Format)>,
    ) -> Result<Vec<Arc<dyn Loader>>, Error> {
        columns
            .map(|(oid, format)| self.adapters.get_loader(oid, format))
            .collect()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::oids::{INT2_OID, INT4_OID, TEXT_OID};

    struct Suffix(&'static str, Format);

    impl Dumper for Suffix {
        fn format(&self) -> Format {
            self.1
        }

        fn dump(&self, obj: &dyn Any, buf: &mut BytesMut) -> Result<(), Error> {
            buf.put_slice(downcast::<String>(obj)?.as_bytes());
            buf.put_slice(self.0.as_bytes());
            Ok(())
        }
    }

    fn dump(map: &AdaptersMap, value: &dyn ToSql, format: Format) -> Bytes {
        let (values, _) = Transformer::new(map)
            .dump_sequence(&[value], &[format])
            .unwrap();
        values[0].clone().unwrap()
    }

    #[test]
    fn child_overrides_without_touching_parent() {
        let global = AdaptersMap::global();
        let mut conn = AdaptersMap::extend(&global);
        conn.register_dumper::<String, _>(Suffix("t", Format::Text));
        let conn = Arc::new(conn);

        let mut cur = AdaptersMap::extend(&conn);
        cur.register_dumper::<String, _>(Suffix("tc", Format::Text));

        let hello = "hello".to_string();
        assert_eq!(dump(&cur, &hello, Format::Text), "hellotc");
        assert_eq!(dump(&conn, &hello, Format::Text), "hellot");
        assert_eq!(dump(&global, &hello, Format::Text), "hello");
        // formats are looked up independently
        assert_eq!(dump(&cur, &hello, Format::Binary), "hello");
    }

    #[test]
    fn missing_dumper_is_an_error() {
        #[derive(Debug)]
        struct Unknown;

        let map = AdaptersMap::global();
        let err = match map.get_dumper(&Unknown, Format::Text) {
            Ok(_) => panic!("unexpected dumper"),
            Err(e) => e,
        };
        assert!(err.to_string().contains("cannot adapt type"));
        assert!(err.to_string().contains("Unknown"));
    }

    #[test]
    fn null_dumps_to_no_value() {
        let map = AdaptersMap::global();
        let (values, types) = Transformer::new(&map)
            .dump_sequence(&[&Null, &10i32], &[Format::Text, Format::Binary])
            .unwrap();
        assert_eq!(values[0], None);
        assert_eq!(values[1].as_deref(), Some(&[0u8, 0, 0, 10][..]));
        assert_eq!(types, vec![INVALID_OID, INT4_OID]);
    }

    #[test]
    fn dumpers_are_chosen_by_the_value_type() {
        let map = AdaptersMap::global();
        let s = "x".to_string();
        let params: Vec<&dyn ToSql> = vec![&s, &Null, &1i16];
        let (values, types) = Transformer::new(&map)
            .dump_sequence(&params, &[Format::Binary; 3])
            .unwrap();
        assert_eq!(types, vec![TEXT_OID, INVALID_OID, INT2_OID]);
        assert_eq!(values[0].as_deref(), Some(&b"x"[..]));
        assert_eq!(values[1], None);
        assert_eq!(values[2].as_deref(), Some(&[0u8, 1][..]));
    }

    #[test]
    fn unknown_oid_loads_as_passthrough() {
        let map = AdaptersMap::global();
        let loader = map.get_loader(999_999, Format::Text).unwrap();
        let value = loader.load(b"(1,2)").unwrap();
        assert_eq!(value.downcast_ref::<String>().unwrap(), "(1,2)");

        let loader = map.get_loader(999_999, Format::Binary).unwrap();
        let value = loader.load(b"\x00\x01").unwrap();
        assert_eq!(value.downcast_ref::<Vec<u8>>().unwrap(), &vec![0u8, 1]);

        assert!(map.get_loader(TEXT_OID, Format::Text).is_ok());
    }

    #[test]
    fn empty_map_has_no_fallback_loader() {
        let map = AdaptersMap::new();
        assert!(map.get_loader(TEXT_OID, Format::Text).is_err());
    }

    #[test]
    fn literal_escaping() {
        let mut buf = BytesMut::new();
        escape_literal(b"he'llo", &mut buf);
        assert_eq!(&buf[..], b"'he''llo'");

        let mut buf = BytesMut::new();
        escape_literal(b"a\\b", &mut buf);
        assert_eq!(&buf[..], b"E'a\\\\b'");
    }
}
