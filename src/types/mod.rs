//! Builtin adapters.
//!
//! | Rust type                          | Postgres type  | Formats      |
//! |------------------------------------|----------------|--------------|
//! | `bool`                             | `bool`         | text, binary |
//! | `i16`, `i32`, `i64`                | `int2/4/8`     | text, binary |
//! | `u32`                              | `oid`          | text, binary |
//! | `f32`, `f64`                       | `float4/8`     | text, binary |
//! | [`Numeric`]                        | `numeric`      | text         |
//! | `String`, `&'static str`           | server decided | text, binary |
//! | `Vec<u8>`, `Bytes`, `&'static [u8]`| `bytea`        | text, binary |
//! | [`Json`], [`Jsonb`], `Value`       | `json/jsonb`   | text, binary |
//! | `Uuid`                             | `uuid`         | text, binary |
//! | `Vec<T>`, [`Array<T>`]             | arrays of `T`  | as `T`       |
//! | [`Null`](crate::Null)              | `NULL`         | text, binary |
//!
//! `json`, `jsonb` and `uuid` need the `with-serde_json-1` and `with-uuid-1`
//! features. Arrays are loaded as `Array<T>`.
//!
//! Values of types without a loader come back as `String` (text format, or
//! `Vec<u8>` if they are not valid UTF-8) or as `Vec<u8>` (binary format).

use crate::adapt::{AdaptersMap, ToSql};
use crate::oids::{
    self, Oid, BOOL_OID, BPCHAR_OID, BYTEA_OID, FLOAT4_OID, FLOAT8_OID, INT2_OID, INT4_OID,
    INT8_OID, NAME_OID, NUMERIC_OID, OID_OID, TEXT_OID, VARCHAR_OID,
};

mod array;
mod boolean;
#[cfg(feature = "with-serde_json-1")]
mod json;
mod numeric;
mod text;
#[cfg(feature = "with-uuid-1")]
mod uuid;

pub use self::array::{
    register_array, register_array_dumpers, register_array_loaders, Array, Dimension,
};
#[cfg(feature = "with-serde_json-1")]
pub use self::json::{Json, Jsonb};
pub use self::numeric::Numeric;

/// Registers the builtin dumpers and loaders into `map`.
pub fn register_default_adapters(map: &mut AdaptersMap) {
    boolean::register(map);
    numeric::register(map);
    text::register(map);
    #[cfg(feature = "with-serde_json-1")]
    json::register(map);
    #[cfg(feature = "with-uuid-1")]
    uuid::register(map);
    // the array adapters wrap the element ones
    register_arrays(map);
}

fn array_oid(oid: Oid) -> Oid {
    oids::by_oid(oid).map_or(0, |info| info.array_oid())
}

fn arrays_of<T: ToSql + Send>(map: &mut AdaptersMap, oid: Oid) {
    register_array::<T>(map, oid, array_oid(oid));
}

fn register_arrays(map: &mut AdaptersMap) {
    arrays_of::<bool>(map, BOOL_OID);
    arrays_of::<i16>(map, INT2_OID);
    arrays_of::<i32>(map, INT4_OID);
    arrays_of::<i64>(map, INT8_OID);
    arrays_of::<u32>(map, OID_OID);
    arrays_of::<f32>(map, FLOAT4_OID);
    arrays_of::<f64>(map, FLOAT8_OID);
    arrays_of::<Numeric>(map, NUMERIC_OID);
    arrays_of::<Vec<u8>>(map, BYTEA_OID);
    arrays_of::<String>(map, TEXT_OID);
    register_array_dumpers::<&'static str>(map, TEXT_OID, array_oid(TEXT_OID));
    for oid in [VARCHAR_OID, BPCHAR_OID, NAME_OID] {
        register_array_loaders::<String>(map, oid, array_oid(oid));
    }

    #[cfg(feature = "with-serde_json-1")]
    {
        use crate::oids::{JSONB_OID, JSON_OID};
        register_array_dumpers::<Json>(map, JSON_OID, array_oid(JSON_OID));
        register_array_dumpers::<Jsonb>(map, JSONB_OID, array_oid(JSONB_OID));
        register_array_loaders::<serde_json_1::Value>(map, JSON_OID, array_oid(JSON_OID));
        register_array_loaders::<serde_json_1::Value>(map, JSONB_OID, array_oid(JSONB_OID));
    }
    #[cfg(feature = "with-uuid-1")]
    arrays_of::<uuid_1::Uuid>(map, crate::oids::UUID_OID);
}
