use crate::adapt::{downcast, AdaptersMap, Dumper, Format, Loader};
use crate::oids::{Oid, FLOAT4_OID, FLOAT8_OID, INT2_OID, INT4_OID, INT8_OID, NUMERIC_OID, OID_OID};
use crate::Error;
use byteorder::{BigEndian, ByteOrder};
use bytes::{BufMut, BytesMut};
use std::any::Any;
use std::fmt::{self, Write};
use std::str::{self, FromStr};

pub(super) fn register(map: &mut AdaptersMap) {
    map.register_dumper::<i16, _>(IntDumper::<i16>::new(Format::Text, INT2_OID));
    map.register_dumper::<i16, _>(IntDumper::<i16>::new(Format::Binary, INT2_OID));
    map.register_dumper::<i32, _>(IntDumper::<i32>::new(Format::Text, INT4_OID));
    map.register_dumper::<i32, _>(IntDumper::<i32>::new(Format::Binary, INT4_OID));
    map.register_dumper::<i64, _>(IntDumper::<i64>::new(Format::Text, INT8_OID));
    map.register_dumper::<i64, _>(IntDumper::<i64>::new(Format::Binary, INT8_OID));
    map.register_dumper::<u32, _>(IntDumper::<u32>::new(Format::Text, OID_OID));
    map.register_dumper::<u32, _>(IntDumper::<u32>::new(Format::Binary, OID_OID));

    map.register_dumper::<f32, _>(FloatDumper::<f32>::new(Format::Text, FLOAT4_OID));
    map.register_dumper::<f32, _>(FloatDumper::<f32>::new(Format::Binary, FLOAT4_OID));
    map.register_dumper::<f64, _>(FloatDumper::<f64>::new(Format::Text, FLOAT8_OID));
    map.register_dumper::<f64, _>(FloatDumper::<f64>::new(Format::Binary, FLOAT8_OID));

    map.register_dumper::<Numeric, _>(NumericDumper);

    map.register_loader(INT2_OID, IntLoader::<i16>::new(Format::Text));
    map.register_loader(INT2_OID, IntLoader::<i16>::new(Format::Binary));
    map.register_loader(INT4_OID, IntLoader::<i32>::new(Format::Text));
    map.register_loader(INT4_OID, IntLoader::<i32>::new(Format::Binary));
    map.register_loader(INT8_OID, IntLoader::<i64>::new(Format::Text));
    map.register_loader(INT8_OID, IntLoader::<i64>::new(Format::Binary));
    map.register_loader(OID_OID, IntLoader::<u32>::new(Format::Text));
    map.register_loader(OID_OID, IntLoader::<u32>::new(Format::Binary));

    map.register_loader(FLOAT4_OID, FloatLoader::<f32>::new(Format::Text));
    map.register_loader(FLOAT4_OID, FloatLoader::<f32>::new(Format::Binary));
    map.register_loader(FLOAT8_OID, FloatLoader::<f64>::new(Format::Text));
    map.register_loader(FLOAT8_OID, FloatLoader::<f64>::new(Format::Binary));

    map.register_loader(NUMERIC_OID, NumericLoader);
}

/// The fixed width binary encoding of a number.
trait Wire: Sized + Copy + fmt::Display + FromStr + Send + Sync + 'static {
    const WIDTH: usize;
    /// The name of the server type, used as a cast in quoted specials.
    const PG_NAME: &'static str;

    fn write(self, buf: &mut BytesMut);
    fn read(data: &[u8]) -> Self;
}

macro_rules! wire {
    ($ty:ty, $width:expr, $name:expr, $put:ident, $read:ident) => {
        impl Wire for $ty {
            const WIDTH: usize = $width;
            const PG_NAME: &'static str = $name;

            fn write(self, buf: &mut BytesMut) {
                buf.$put(self);
            }

            fn read(data: &[u8]) -> Self {
                BigEndian::$read(data)
            }
        }
    };
}

wire!(i16, 2, "int2", put_i16, read_i16);
wire!(i32, 4, "int4", put_i32, read_i32);
wire!(i64, 8, "int8", put_i64, read_i64);
wire!(u32, 4, "oid", put_u32, read_u32);
wire!(f32, 4, "float4", put_f32, read_f32);
wire!(f64, 8, "float8", put_f64, read_f64);

fn read_exact<T: Wire>(data: &[u8]) -> Result<T, Error> {
    if data.len() != T::WIDTH {
        return Err(Error::data(format!(
            "expected {} bytes for a {} value, got {}",
            T::WIDTH,
            T::PG_NAME,
            data.len()
        )));
    }
    Ok(T::read(data))
}

fn parse_text<T: Wire>(data: &[u8]) -> Result<T, Error> {
    str::from_utf8(data)
        .ok()
        .and_then(|s| s.trim().parse::<T>().ok())
        .ok_or_else(|| {
            Error::data(format!(
                "invalid {} value: {:?}",
                T::PG_NAME,
                String::from_utf8_lossy(data)
            ))
        })
}

// negative numbers are quoted with a leading space so that `- %s` can't
// turn into a `--` comment
fn quote_number(text: &[u8], buf: &mut BytesMut) {
    if text.first() == Some(&b'-') {
        buf.put_u8(b' ');
    }
    buf.put_slice(text);
}

struct IntDumper<T> {
    format: Format,
    oid: Oid,
    _p: std::marker::PhantomData<fn() -> T>,
}

impl<T> IntDumper<T> {
    fn new(format: Format, oid: Oid) -> Self {
        IntDumper {
            format,
            oid,
            _p: std::marker::PhantomData,
        }
    }
}

impl<T: Wire> Dumper for IntDumper<T> {
    fn format(&self) -> Format {
        self.format
    }

    fn oid(&self) -> Oid {
        self.oid
    }

    fn dump(&self, obj: &dyn Any, buf: &mut BytesMut) -> Result<(), Error> {
        let value = *downcast::<T>(obj)?;
        match self.format {
            Format::Text => write!(buf, "{}", value).map_err(|e| Error::conversion(e.into())),
            Format::Binary => {
                value.write(buf);
                Ok(())
            }
        }
    }

    fn quote(&self, obj: &dyn Any, buf: &mut BytesMut) -> Result<(), Error> {
        let value = *downcast::<T>(obj)?;
        quote_number(value.to_string().as_bytes(), buf);
        Ok(())
    }
}

struct IntLoader<T> {
    format: Format,
    _p: std::marker::PhantomData<fn() -> T>,
}

impl<T> IntLoader<T> {
    fn new(format: Format) -> Self {
        IntLoader {
            format,
            _p: std::marker::PhantomData,
        }
    }
}

impl<T: Wire> Loader for IntLoader<T> {
    fn format(&self) -> Format {
        self.format
    }

    fn load(&self, data: &[u8]) -> Result<Box<dyn Any + Send>, Error> {
        let value = match self.format {
            Format::Text => parse_text::<T>(data)?,
            Format::Binary => read_exact::<T>(data)?,
        };
        Ok(Box::new(value))
    }
}

/// Floating point types with IEEE special values.
trait Float: Wire {
    fn is_nan(self) -> bool;
    fn is_infinite(self) -> bool;
    fn is_sign_negative(self) -> bool;
    fn debug(self) -> String;
}

macro_rules! float {
    ($ty:ty) => {
        impl Float for $ty {
            fn is_nan(self) -> bool {
                <$ty>::is_nan(self)
            }

            fn is_infinite(self) -> bool {
                <$ty>::is_infinite(self)
            }

            fn is_sign_negative(self) -> bool {
                <$ty>::is_sign_negative(self)
            }

            fn debug(self) -> String {
                format!("{:?}", self)
            }
        }
    };
}

float!(f32);
float!(f64);

fn special_float<T: Float>(value: T) -> Option<&'static str> {
    if value.is_nan() {
        Some("NaN")
    } else if value.is_infinite() && value.is_sign_negative() {
        Some("-Infinity")
    } else if value.is_infinite() {
        Some("Infinity")
    } else {
        None
    }
}

struct FloatDumper<T> {
    format: Format,
    oid: Oid,
    _p: std::marker::PhantomData<fn() -> T>,
}

impl<T> FloatDumper<T> {
    fn new(format: Format, oid: Oid) -> Self {
        FloatDumper {
            format,
            oid,
            _p: std::marker::PhantomData,
        }
    }
}

impl<T: Float> Dumper for FloatDumper<T> {
    fn format(&self) -> Format {
        self.format
    }

    fn oid(&self) -> Oid {
        self.oid
    }

    fn dump(&self, obj: &dyn Any, buf: &mut BytesMut) -> Result<(), Error> {
        let value = *downcast::<T>(obj)?;
        match self.format {
            Format::Text => match special_float(value) {
                Some(special) => buf.put_slice(special.as_bytes()),
                // shortest representation that reads back to the same value
                None => buf.put_slice(value.debug().as_bytes()),
            },
            Format::Binary => value.write(buf),
        }
        Ok(())
    }

    fn quote(&self, obj: &dyn Any, buf: &mut BytesMut) -> Result<(), Error> {
        let value = *downcast::<T>(obj)?;
        match special_float(value) {
            Some(special) => {
                write!(buf, "'{}'::{}", special, T::PG_NAME).map_err(|e| Error::conversion(e.into()))
            }
            None => {
                quote_number(value.debug().as_bytes(), buf);
                Ok(())
            }
        }
    }
}

struct FloatLoader<T> {
    format: Format,
    _p: std::marker::PhantomData<fn() -> T>,
}

impl<T> FloatLoader<T> {
    fn new(format: Format) -> Self {
        FloatLoader {
            format,
            _p: std::marker::PhantomData,
        }
    }
}

impl<T: Float> Loader for FloatLoader<T> {
    fn format(&self) -> Format {
        self.format
    }

    fn load(&self, data: &[u8]) -> Result<Box<dyn Any + Send>, Error> {
        let value = match self.format {
            // Rust spells the specials `inf` and `NaN`, the server `Infinity`
            Format::Text => match data {
                b"Infinity" => parse_text::<T>(b"inf")?,
                b"-Infinity" => parse_text::<T>(b"-inf")?,
                _ => parse_text::<T>(data)?,
            },
            Format::Binary => read_exact::<T>(data)?,
        };
        Ok(Box::new(value))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum NumericRepr {
    Value(String),
    NaN,
    Infinity,
    NegInfinity,
}

/// An arbitrary precision `numeric` value.
///
/// The value is kept in its decimal text form; it is validated on creation,
/// so it can always be sent to the server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Numeric(NumericRepr);

impl Numeric {
    /// The `NaN` numeric value.
    pub fn nan() -> Numeric {
        Numeric(NumericRepr::NaN)
    }

    /// The positive infinity numeric value.
    pub fn infinity() -> Numeric {
        Numeric(NumericRepr::Infinity)
    }

    /// The negative infinity numeric value.
    pub fn neg_infinity() -> Numeric {
        Numeric(NumericRepr::NegInfinity)
    }

    /// Returns `true` for `NaN`, `Infinity` and `-Infinity`.
    pub fn is_special(&self) -> bool {
        !matches!(self.0, NumericRepr::Value(_))
    }

    fn special(&self) -> Option<&'static str> {
        match self.0 {
            NumericRepr::Value(_) => None,
            NumericRepr::NaN => Some("NaN"),
            NumericRepr::Infinity => Some("Infinity"),
            NumericRepr::NegInfinity => Some("-Infinity"),
        }
    }
}

fn is_decimal(s: &str) -> bool {
    let s = s.strip_prefix(['+', '-']).unwrap_or(s);
    let (mantissa, exponent) = match s.find(['e', 'E']) {
        Some(idx) => (&s[..idx], Some(&s[idx + 1..])),
        None => (s, None),
    };
    let (int, frac) = match mantissa.find('.') {
        Some(idx) => (&mantissa[..idx], &mantissa[idx + 1..]),
        None => (mantissa, ""),
    };
    let digits = |p: &str| p.bytes().all(|b| b.is_ascii_digit());
    if int.is_empty() && frac.is_empty() || !digits(int) || !digits(frac) {
        return false;
    }
    match exponent {
        None => true,
        Some(exp) => {
            let exp = exp.strip_prefix(['+', '-']).unwrap_or(exp);
            !exp.is_empty() && digits(exp)
        }
    }
}

impl FromStr for Numeric {
    type Err = Error;

    fn from_str(s: &str) -> Result<Numeric, Error> {
        match s {
            "NaN" => Ok(Numeric::nan()),
            "Infinity" => Ok(Numeric::infinity()),
            "-Infinity" => Ok(Numeric::neg_infinity()),
            _ if is_decimal(s) => Ok(Numeric(NumericRepr::Value(s.to_string()))),
            _ => Err(Error::data(format!("invalid numeric value: {:?}", s))),
        }
    }
}

impl fmt::Display for Numeric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.0 {
            NumericRepr::Value(v) => f.write_str(v),
            NumericRepr::NaN => f.write_str("NaN"),
            NumericRepr::Infinity => f.write_str("Infinity"),
            NumericRepr::NegInfinity => f.write_str("-Infinity"),
        }
    }
}

struct NumericDumper;

impl Dumper for NumericDumper {
    fn format(&self) -> Format {
        Format::Text
    }

    fn oid(&self) -> Oid {
        NUMERIC_OID
    }

    fn dump(&self, obj: &dyn Any, buf: &mut BytesMut) -> Result<(), Error> {
        let value = downcast::<Numeric>(obj)?;
        write!(buf, "{}", value).map_err(|e| Error::conversion(e.into()))
    }

    fn quote(&self, obj: &dyn Any, buf: &mut BytesMut) -> Result<(), Error> {
        let value = downcast::<Numeric>(obj)?;
        match value.special() {
            Some(special) => {
                write!(buf, "'{}'::numeric", special).map_err(|e| Error::conversion(e.into()))
            }
            None => {
                quote_number(value.to_string().as_bytes(), buf);
                Ok(())
            }
        }
    }
}

struct NumericLoader;

impl Loader for NumericLoader {
    fn format(&self) -> Format {
        Format::Text
    }

    fn load(&self, data: &[u8]) -> Result<Box<dyn Any + Send>, Error> {
        let s = str::from_utf8(data).map_err(|e| Error::conversion(e.into()))?;
        Ok(Box::new(s.parse::<Numeric>()?))
    }
}
