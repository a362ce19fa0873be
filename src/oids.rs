//! The catalog of builtin PostgreSQL types.
//!
//! Every builtin type is reachable by its name, by its SQL alias (e.g.
//! `integer` for `int4`), by its oid and by the oid of its array type.

use phf::phf_map;
use std::fmt;

/// A PostgreSQL object identifier.
pub type Oid = u32;

/// The oid used for parameters whose type is left to the server to infer.
pub const INVALID_OID: Oid = 0;
/// `bool`
pub const BOOL_OID: Oid = 16;
/// `bytea`
pub const BYTEA_OID: Oid = 17;
/// `name`
pub const NAME_OID: Oid = 19;
/// `json`
pub const JSON_OID: Oid = 114;
/// `int8`
pub const INT8_OID: Oid = 20;
/// `int2`
pub const INT2_OID: Oid = 21;
/// `int4`
pub const INT4_OID: Oid = 23;
/// `text`
pub const TEXT_OID: Oid = 25;
/// `oid`
pub const OID_OID: Oid = 26;
/// `float4`
pub const FLOAT4_OID: Oid = 700;
/// `float8`
pub const FLOAT8_OID: Oid = 701;
/// `bpchar`
pub const BPCHAR_OID: Oid = 1042;
/// `varchar`
pub const VARCHAR_OID: Oid = 1043;
/// `numeric`
pub const NUMERIC_OID: Oid = 1700;
/// `uuid`
pub const UUID_OID: Oid = 2950;
/// `jsonb`
pub const JSONB_OID: Oid = 3802;
/// `int4[]`
pub const INT4_ARRAY_OID: Oid = 1007;
/// `text[]`
pub const TEXT_ARRAY_OID: Oid = 1009;

/// Information about a builtin type.
#[derive(Clone, PartialEq, Eq)]
pub struct TypeInfo {
    name: &'static str,
    oid: Oid,
    array_oid: Oid,
    alt_name: &'static str,
    delimiter: char,
}

impl TypeInfo {
    const fn new(
        name: &'static str,
        oid: Oid,
        array_oid: Oid,
        alt_name: &'static str,
        delimiter: char,
    ) -> TypeInfo {
        TypeInfo {
            name,
            oid,
            array_oid,
            alt_name,
            delimiter,
        }
    }

    /// The name of the type in the `pg_type` catalog.
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// The oid of the type.
    pub fn oid(&self) -> Oid {
        self.oid
    }

    /// The oid of the array of this type, 0 if there is none.
    pub fn array_oid(&self) -> Oid {
        self.array_oid
    }

    /// The SQL spelling of the type, e.g. `double precision` for `float8`.
    pub fn alt_name(&self) -> &'static str {
        self.alt_name
    }

    /// The delimiter used between elements in the array text representation.
    pub fn delimiter(&self) -> char {
        self.delimiter
    }
}

impl fmt::Debug for TypeInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "<TypeInfo: {} (oid: {}, array oid: {})>",
            self.name, self.oid, self.array_oid
        )
    }
}

/// Looks a builtin type up by name or alias.
pub fn by_name(name: &str) -> Option<&'static TypeInfo> {
    BY_NAME.get(name).map(|&i| &BUILTINS[i])
}

/// Looks a builtin type up by its oid or by the oid of its array.
pub fn by_oid(oid: Oid) -> Option<&'static TypeInfo> {
    BY_OID.get(&oid).map(|&i| &BUILTINS[i])
}

/// Iterates every builtin type once.
pub fn builtins() -> impl Iterator<Item = &'static TypeInfo> {
    BUILTINS.iter()
}

// Generated from PostgreSQL 13.0
pub(crate) static BUILTINS: [TypeInfo; 85] = [
    TypeInfo::new("aclitem", 1033, 1034, "aclitem", ','),
    TypeInfo::new("any", 2276, 0, "\"any\"", ','),
    TypeInfo::new("anyarray", 2277, 0, "anyarray", ','),
    TypeInfo::new("anycompatible", 5077, 0, "anycompatible", ','),
    TypeInfo::new("anycompatiblearray", 5078, 0, "anycompatiblearray", ','),
    TypeInfo::new("anycompatiblenonarray", 5079, 0, "anycompatiblenonarray", ','),
    TypeInfo::new("anycompatiblerange", 5080, 0, "anycompatiblerange", ','),
    TypeInfo::new("anyelement", 2283, 0, "anyelement", ','),
    TypeInfo::new("anyenum", 3500, 0, "anyenum", ','),
    TypeInfo::new("anynonarray", 2776, 0, "anynonarray", ','),
    TypeInfo::new("anyrange", 3831, 0, "anyrange", ','),
    TypeInfo::new("bit", 1560, 1561, "bit", ','),
    TypeInfo::new("bool", 16, 1000, "boolean", ','),
    TypeInfo::new("box", 603, 1020, "box", ';'),
    TypeInfo::new("bpchar", 1042, 1014, "character", ','),
    TypeInfo::new("bytea", 17, 1001, "bytea", ','),
    TypeInfo::new("char", 18, 1002, "\"char\"", ','),
    TypeInfo::new("cid", 29, 1012, "cid", ','),
    TypeInfo::new("cidr", 650, 651, "cidr", ','),
    TypeInfo::new("circle", 718, 719, "circle", ','),
    TypeInfo::new("cstring", 2275, 1263, "cstring", ','),
    TypeInfo::new("date", 1082, 1182, "date", ','),
    TypeInfo::new("daterange", 3912, 3913, "daterange", ','),
    TypeInfo::new("event_trigger", 3838, 0, "event_trigger", ','),
    TypeInfo::new("float4", 700, 1021, "real", ','),
    TypeInfo::new("float8", 701, 1022, "double precision", ','),
    TypeInfo::new("gtsvector", 3642, 3644, "gtsvector", ','),
    TypeInfo::new("inet", 869, 1041, "inet", ','),
    TypeInfo::new("int2", 21, 1005, "smallint", ','),
    TypeInfo::new("int2vector", 22, 1006, "int2vector", ','),
    TypeInfo::new("int4", 23, 1007, "integer", ','),
    TypeInfo::new("int4range", 3904, 3905, "int4range", ','),
    TypeInfo::new("int8", 20, 1016, "bigint", ','),
    TypeInfo::new("int8range", 3926, 3927, "int8range", ','),
    TypeInfo::new("internal", 2281, 0, "internal", ','),
    TypeInfo::new("interval", 1186, 1187, "interval", ','),
    TypeInfo::new("json", 114, 199, "json", ','),
    TypeInfo::new("jsonb", 3802, 3807, "jsonb", ','),
    TypeInfo::new("jsonpath", 4072, 4073, "jsonpath", ','),
    TypeInfo::new("line", 628, 629, "line", ','),
    TypeInfo::new("lseg", 601, 1018, "lseg", ','),
    TypeInfo::new("macaddr", 829, 1040, "macaddr", ','),
    TypeInfo::new("macaddr8", 774, 775, "macaddr8", ','),
    TypeInfo::new("money", 790, 791, "money", ','),
    TypeInfo::new("name", 19, 1003, "name", ','),
    TypeInfo::new("numeric", 1700, 1231, "numeric", ','),
    TypeInfo::new("numrange", 3906, 3907, "numrange", ','),
    TypeInfo::new("oid", 26, 1028, "oid", ','),
    TypeInfo::new("oidvector", 30, 1013, "oidvector", ','),
    TypeInfo::new("path", 602, 1019, "path", ','),
    TypeInfo::new("point", 600, 1017, "point", ','),
    TypeInfo::new("polygon", 604, 1027, "polygon", ','),
    TypeInfo::new("record", 2249, 2287, "record", ','),
    TypeInfo::new("refcursor", 1790, 2201, "refcursor", ','),
    TypeInfo::new("regclass", 2205, 2210, "regclass", ','),
    TypeInfo::new("regcollation", 4191, 4192, "regcollation", ','),
    TypeInfo::new("regconfig", 3734, 3735, "regconfig", ','),
    TypeInfo::new("regdictionary", 3769, 3770, "regdictionary", ','),
    TypeInfo::new("regnamespace", 4089, 4090, "regnamespace", ','),
    TypeInfo::new("regoper", 2203, 2208, "regoper", ','),
    TypeInfo::new("regoperator", 2204, 2209, "regoperator", ','),
    TypeInfo::new("regproc", 24, 1008, "regproc", ','),
    TypeInfo::new("regprocedure", 2202, 2207, "regprocedure", ','),
    TypeInfo::new("regrole", 4096, 4097, "regrole", ','),
    TypeInfo::new("regtype", 2206, 2211, "regtype", ','),
    TypeInfo::new("text", 25, 1009, "text", ','),
    TypeInfo::new("tid", 27, 1010, "tid", ','),
    TypeInfo::new("time", 1083, 1183, "time without time zone", ','),
    TypeInfo::new("timestamp", 1114, 1115, "timestamp without time zone", ','),
    TypeInfo::new("timestamptz", 1184, 1185, "timestamp with time zone", ','),
    TypeInfo::new("timetz", 1266, 1270, "time with time zone", ','),
    TypeInfo::new("trigger", 2279, 0, "trigger", ','),
    TypeInfo::new("tsquery", 3615, 3645, "tsquery", ','),
    TypeInfo::new("tsrange", 3908, 3909, "tsrange", ','),
    TypeInfo::new("tstzrange", 3910, 3911, "tstzrange", ','),
    TypeInfo::new("tsvector", 3614, 3643, "tsvector", ','),
    TypeInfo::new("txid_snapshot", 2970, 2949, "txid_snapshot", ','),
    TypeInfo::new("unknown", 705, 0, "unknown", ','),
    TypeInfo::new("uuid", 2950, 2951, "uuid", ','),
    TypeInfo::new("varbit", 1562, 1563, "bit varying", ','),
    TypeInfo::new("varchar", 1043, 1015, "character varying", ','),
    TypeInfo::new("void", 2278, 0, "void", ','),
    TypeInfo::new("xid", 28, 1011, "xid", ','),
    TypeInfo::new("xid8", 5069, 271, "xid8", ','),
    TypeInfo::new("xml", 142, 143, "xml", ','),
];

static BY_NAME: phf::Map<&'static str, usize> = phf_map! {
    "aclitem" => 0,
    "any" => 1,
    "anyarray" => 2,
    "anycompatible" => 3,
    "anycompatiblearray" => 4,
    "anycompatiblenonarray" => 5,
    "anycompatiblerange" => 6,
    "anyelement" => 7,
    "anyenum" => 8,
    "anynonarray" => 9,
    "anyrange" => 10,
    "bit" => 11,
    "bool" => 12,
    "box" => 13,
    "bpchar" => 14,
    "bytea" => 15,
    "char" => 16,
    "cid" => 17,
    "cidr" => 18,
    "circle" => 19,
    "cstring" => 20,
    "date" => 21,
    "daterange" => 22,
    "event_trigger" => 23,
    "float4" => 24,
    "float8" => 25,
    "gtsvector" => 26,
    "inet" => 27,
    "int2" => 28,
    "int2vector" => 29,
    "int4" => 30,
    "int4range" => 31,
    "int8" => 32,
    "int8range" => 33,
    "internal" => 34,
    "interval" => 35,
    "json" => 36,
    "jsonb" => 37,
    "jsonpath" => 38,
    "line" => 39,
    "lseg" => 40,
    "macaddr" => 41,
    "macaddr8" => 42,
    "money" => 43,
    "name" => 44,
    "numeric" => 45,
    "numrange" => 46,
    "oid" => 47,
    "oidvector" => 48,
    "path" => 49,
    "point" => 50,
    "polygon" => 51,
    "record" => 52,
    "refcursor" => 53,
    "regclass" => 54,
    "regcollation" => 55,
    "regconfig" => 56,
    "regdictionary" => 57,
    "regnamespace" => 58,
    "regoper" => 59,
    "regoperator" => 60,
    "regproc" => 61,
    "regprocedure" => 62,
    "regrole" => 63,
    "regtype" => 64,
    "text" => 65,
    "tid" => 66,
    "time" => 67,
    "timestamp" => 68,
    "timestamptz" => 69,
    "timetz" => 70,
    "trigger" => 71,
    "tsquery" => 72,
    "tsrange" => 73,
    "tstzrange" => 74,
    "tsvector" => 75,
    "txid_snapshot" => 76,
    "unknown" => 77,
    "uuid" => 78,
    "varbit" => 79,
    "varchar" => 80,
    "void" => 81,
    "xid" => 82,
    "xid8" => 83,
    "xml" => 84,
    "\"any\"" => 1,
    "boolean" => 12,
    "character" => 14,
    "\"char\"" => 16,
    "real" => 24,
    "double precision" => 25,
    "smallint" => 28,
    "integer" => 30,
    "bigint" => 32,
    "time without time zone" => 67,
    "timestamp without time zone" => 68,
    "timestamp with time zone" => 69,
    "time with time zone" => 70,
    "bit varying" => 79,
    "character varying" => 80,
};

static BY_OID: phf::Map<u32, usize> = phf_map! {
    1033u32 => 0,
    1034u32 => 0,
    2276u32 => 1,
    2277u32 => 2,
    5077u32 => 3,
    5078u32 => 4,
    5079u32 => 5,
    5080u32 => 6,
    2283u32 => 7,
    3500u32 => 8,
    2776u32 => 9,
    3831u32 => 10,
    1560u32 => 11,
    1561u32 => 11,
    16u32 => 12,
    1000u32 => 12,
    603u32 => 13,
    1020u32 => 13,
    1042u32 => 14,
    1014u32 => 14,
    17u32 => 15,
    1001u32 => 15,
    18u32 => 16,
    1002u32 => 16,
    29u32 => 17,
    1012u32 => 17,
    650u32 => 18,
    651u32 => 18,
    718u32 => 19,
    719u32 => 19,
    2275u32 => 20,
    1263u32 => 20,
    1082u32 => 21,
    1182u32 => 21,
    3912u32 => 22,
    3913u32 => 22,
    3838u32 => 23,
    700u32 => 24,
    1021u32 => 24,
    701u32 => 25,
    1022u32 => 25,
    3642u32 => 26,
    3644u32 => 26,
    869u32 => 27,
    1041u32 => 27,
    21u32 => 28,
    1005u32 => 28,
    22u32 => 29,
    1006u32 => 29,
    23u32 => 30,
    1007u32 => 30,
    3904u32 => 31,
    3905u32 => 31,
    20u32 => 32,
    1016u32 => 32,
    3926u32 => 33,
    3927u32 => 33,
    2281u32 => 34,
    1186u32 => 35,
    1187u32 => 35,
    114u32 => 36,
    199u32 => 36,
    3802u32 => 37,
    3807u32 => 37,
    4072u32 => 38,
    4073u32 => 38,
    628u32 => 39,
    629u32 => 39,
    601u32 => 40,
    1018u32 => 40,
    829u32 => 41,
    1040u32 => 41,
    774u32 => 42,
    775u32 => 42,
    790u32 => 43,
    791u32 => 43,
    19u32 => 44,
    1003u32 => 44,
    1700u32 => 45,
    1231u32 => 45,
    3906u32 => 46,
    3907u32 => 46,
    26u32 => 47,
    1028u32 => 47,
    30u32 => 48,
    1013u32 => 48,
    602u32 => 49,
    1019u32 => 49,
    600u32 => 50,
    1017u32 => 50,
    604u32 => 51,
    1027u32 => 51,
    2249u32 => 52,
    2287u32 => 52,
    1790u32 => 53,
    2201u32 => 53,
    2205u32 => 54,
    2210u32 => 54,
    4191u32 => 55,
    4192u32 => 55,
    3734u32 => 56,
    3735u32 => 56,
    3769u32 => 57,
    3770u32 => 57,
    4089u32 => 58,
    4090u32 => 58,
    2203u32 => 59,
    2208u32 => 59,
    2204u32 => 60,
    2209u32 => 60,
    24u32 => 61,
    1008u32 => 61,
    2202u32 => 62,
    2207u32 => 62,
    4096u32 => 63,
    4097u32 => 63,
    2206u32 => 64,
    2211u32 => 64,
    25u32 => 65,
    1009u32 => 65,
    27u32 => 66,
    1010u32 => 66,
    1083u32 => 67,
    1183u32 => 67,
    1114u32 => 68,
    1115u32 => 68,
    1184u32 => 69,
    1185u32 => 69,
    1266u32 => 70,
    1270u32 => 70,
    2279u32 => 71,
    3615u32 => 72,
    3645u32 => 72,
    3908u32 => 73,
    3909u32 => 73,
    3910u32 => 74,
    3911u32 => 74,
    3614u32 => 75,
    3643u32 => 75,
    2970u32 => 76,
    2949u32 => 76,
    705u32 => 77,
    2950u32 => 78,
    2951u32 => 78,
    1562u32 => 79,
    1563u32 => 79,
    1043u32 => 80,
    1015u32 => 80,
    2278u32 => 81,
    28u32 => 82,
    1011u32 => 82,
    5069u32 => 83,
    271u32 => 83,
    142u32 => 84,
    143u32 => 84,
};
