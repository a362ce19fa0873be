//! `json` and `jsonb` as `serde_json::Value`.
//!
//! Values are dumped wrapped in [`Json`] or [`Jsonb`], choosing the server
//! type; both types load as a bare `Value`.

use crate::adapt::{downcast, AdaptersMap, Dumper, Format, Loader};
use crate::oids::{Oid, JSONB_OID, JSON_OID};
use crate::Error;
use bytes::{BufMut, BytesMut};
use serde_json_1::Value;
use std::any::Any;

// the only version of the jsonb binary format
const JSONB_VERSION: u8 = 1;

/// A value to be sent as `json`.
#[derive(Debug, Clone, PartialEq)]
pub struct Json(pub Value);

/// A value to be sent as `jsonb`.
#[derive(Debug, Clone, PartialEq)]
pub struct Jsonb(pub Value);

pub(super) fn register(map: &mut AdaptersMap) {
    for format in [Format::Text, Format::Binary] {
        map.register_dumper::<Json, _>(JsonDumper { format, oid: JSON_OID });
        map.register_dumper::<Jsonb, _>(JsonDumper { format, oid: JSONB_OID });
        map.register_loader(JSON_OID, JsonLoader { format, oid: JSON_OID });
        map.register_loader(JSONB_OID, JsonLoader { format, oid: JSONB_OID });
    }
}

struct JsonDumper {
    format: Format,
    oid: Oid,
}

impl Dumper for JsonDumper {
    fn format(&self) -> Format {
        self.format
    }

    fn oid(&self) -> Oid {
        self.oid
    }

    fn dump(&self, obj: &dyn Any, buf: &mut BytesMut) -> Result<(), Error> {
        let value = if self.oid == JSONB_OID {
            &downcast::<Jsonb>(obj)?.0
        } else {
            &downcast::<Json>(obj)?.0
        };
        if self.oid == JSONB_OID && self.format == Format::Binary {
            buf.put_u8(JSONB_VERSION);
        }
        serde_json_1::to_writer(buf.writer(), value).map_err(|e| Error::conversion(Box::new(e)))
    }
}

struct JsonLoader {
    format: Format,
    oid: Oid,
}

impl Loader for JsonLoader {
    fn format(&self) -> Format {
        self.format
    }

    fn load(&self, data: &[u8]) -> Result<Box<dyn Any + Send>, Error> {
        let data = if self.oid == JSONB_OID && self.format == Format::Binary {
            match data.split_first() {
                Some((&JSONB_VERSION, rest)) => rest,
                _ => return Err(Error::data("unsupported jsonb binary version")),
            }
        } else {
            data
        };
        let value = serde_json_1::from_slice::<Value>(data)
            .map_err(|e| Error::data(format!("invalid json: {}", e)))?;
        Ok(Box::new(value))
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::adapt::ToSql;
    use crate::ErrorClass;
    use serde_json_1::json;

    const JSON_ARRAY_OID: Oid = 199;
    const JSONB_ARRAY_OID: Oid = 3807;

    fn dump(value: &dyn ToSql, format: Format) -> (Oid, Vec<u8>) {
        let map = AdaptersMap::global();
        let dumper = map.get_dumper(value, format).unwrap();
        let mut buf = BytesMut::new();
        dumper.dump(value.as_any(), &mut buf).unwrap();
        (dumper.oid(), buf.to_vec())
    }

    fn load(oid: Oid, format: Format, data: &[u8]) -> Result<Value, Error> {
        let loader = AdaptersMap::global().get_loader(oid, format).unwrap();
        Ok(loader.load(data)?.downcast_ref::<Value>().unwrap().clone())
    }

    #[test]
    fn wrappers_choose_the_type() {
        let value = json!({"a": [1, null]});
        assert_eq!(
            dump(&Json(value.clone()), Format::Text),
            (JSON_OID, br#"{"a":[1,null]}"#.to_vec())
        );
        assert_eq!(dump(&Jsonb(value.clone()), Format::Text).0, JSONB_OID);
        assert_eq!(dump(&Jsonb(value), Format::Binary).1, b"\x01{\"a\":[1,null]}");
        assert_eq!(dump(&Json(json!("x")), Format::Binary).1, b"\"x\"");
    }

    #[test]
    fn loads_values() {
        assert_eq!(load(JSON_OID, Format::Text, b"[1, \"a\"]").unwrap(), json!([1, "a"]));
        assert_eq!(load(JSONB_OID, Format::Binary, b"\x01{\"k\": true}").unwrap(), json!({"k": true}));
    }

    #[test]
    fn invalid_data_is_rejected() {
        let err = load(JSON_OID, Format::Text, b"{nope").unwrap_err();
        assert_eq!(err.class(), ErrorClass::Data);
        let err = load(JSONB_OID, Format::Binary, b"\x02{}").unwrap_err();
        assert_eq!(err.class(), ErrorClass::Data);
        assert!(load(JSONB_OID, Format::Binary, b"").is_err());
    }

    #[test]
    fn arrays_of_json() {
        let map = AdaptersMap::global();
        let loader = map.get_loader(JSON_ARRAY_OID, Format::Text).unwrap();
        let value = loader.load(br#"{"{\"a\": 1}",NULL}"#).unwrap();
        let array = value.downcast_ref::<crate::types::Array<Value>>().unwrap();
        assert_eq!(array.elements(), &[Some(json!({"a": 1})), None]);

        let (oid, data) = dump(&vec![Jsonb(json!([1]))], Format::Text);
        assert_eq!(oid, JSONB_ARRAY_OID);
        assert_eq!(data, b"{[1]}");
    }
}
