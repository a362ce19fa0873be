//! Arrays of any type with a dumper or a loader.
//!
//! `Vec<T>`, `Vec<Option<T>>` and [`Array<T>`] are dumped as arrays of the
//! type `T` dumps to. Arrays are loaded as `Array<T>`, `T` being the type
//! the element loader returns.

use crate::adapt::{downcast, AdaptersMap, Dumper, Format, Loader, ToSql};
use crate::oids::{self, Oid, INVALID_OID};
use crate::Error;
use byteorder::{BigEndian, ByteOrder};
use bytes::{BufMut, BytesMut};
use std::any::Any;
use std::marker::PhantomData;
use std::sync::Arc;

// as MAXDIM in the server
const MAX_DIMENSIONS: usize = 6;

/// The size and the first index of one dimension of an array.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Dimension {
    /// The number of elements along the dimension.
    pub len: i32,
    /// The index of the first element, 1 unless stated otherwise.
    pub lower_bound: i32,
}

/// A possibly multidimensional array, with its elements in row-major order.
#[derive(Debug, Clone, PartialEq)]
pub struct Array<T> {
    dims: Vec<Dimension>,
    elements: Vec<Option<T>>,
}

impl<T> Array<T> {
    /// A one-dimensional array indexed from 1.
    pub fn from_vec(elements: Vec<Option<T>>) -> Array<T> {
        let dims = if elements.is_empty() {
            vec![]
        } else {
            vec![Dimension {
                len: elements.len() as i32,
                lower_bound: 1,
            }]
        };
        Array { dims, elements }
    }

    /// An array with the given shape.
    ///
    /// Fails if the dimensions don't account for exactly the elements given.
    pub fn from_parts(dims: Vec<Dimension>, elements: Vec<Option<T>>) -> Result<Array<T>, Error> {
        if dims.len() > MAX_DIMENSIONS {
            return Err(Error::data(format!(
                "arrays can have at most {} dimensions",
                MAX_DIMENSIONS
            )));
        }
        let mut count = if dims.is_empty() { 0usize } else { 1 };
        for dim in &dims {
            if dim.len <= 0 {
                return Err(Error::data("array dimensions must be positive"));
            }
            count = count.saturating_mul(dim.len as usize);
        }
        if count != elements.len() {
            return Err(Error::data(format!(
                "the array dimensions require {} elements, got {}",
                count,
                elements.len()
            )));
        }
        Ok(Array { dims, elements })
    }

    /// The dimensions, outermost first; empty for an empty array.
    pub fn dimensions(&self) -> &[Dimension] {
        &self.dims
    }

    /// The elements, `None` standing for `NULL`.
    pub fn elements(&self) -> &[Option<T>] {
        &self.elements
    }

    /// Consumes the array, returning its elements.
    pub fn into_elements(self) -> Vec<Option<T>> {
        self.elements
    }

    /// The total number of elements.
    pub fn len(&self) -> usize {
        self.elements.len()
    }

    /// Returns `true` if the array has no elements.
    pub fn is_empty(&self) -> bool {
        self.elements.is_empty()
    }
}

/// The collections that can be dumped as arrays of `T`.
trait ArrayView<T> {
    fn dims(&self) -> Vec<Dimension>;
    fn items(&self) -> Vec<Option<&T>>;
}

fn one_dimension(len: usize) -> Vec<Dimension> {
    if len == 0 {
        vec![]
    } else {
        vec![Dimension {
            len: len as i32,
            lower_bound: 1,
        }]
    }
}

impl<T> ArrayView<T> for Vec<T> {
    fn dims(&self) -> Vec<Dimension> {
        one_dimension(self.len())
    }

    fn items(&self) -> Vec<Option<&T>> {
        self.iter().map(Some).collect()
    }
}

impl<T> ArrayView<T> for Vec<Option<T>> {
    fn dims(&self) -> Vec<Dimension> {
        one_dimension(self.len())
    }

    fn items(&self) -> Vec<Option<&T>> {
        self.iter().map(Option::as_ref).collect()
    }
}

impl<T> ArrayView<T> for Array<T> {
    fn dims(&self) -> Vec<Dimension> {
        self.dims.clone()
    }

    fn items(&self) -> Vec<Option<&T>> {
        self.elements.iter().map(Option::as_ref).collect()
    }
}

fn delimiter_of(oid: Oid) -> u8 {
    oids::by_oid(oid)
        .filter(|info| info.oid() == oid)
        .and_then(|info| u8::try_from(info.delimiter()).ok())
        .unwrap_or(b',')
}

/// Registers dumpers for `Vec<T>`, `Vec<Option<T>>` and `Array<T>` in every
/// format `T` has a dumper for.
///
/// The element dumpers are resolved now: register the dumpers of `T` first.
pub fn register_array_dumpers<T>(map: &mut AdaptersMap, oid: Oid, array_oid: Oid)
where
    T: ToSql + Send,
{
    let delimiter = delimiter_of(oid);
    for format in [Format::Text, Format::Binary] {
        let element = match map.dumper_for::<T>(format) {
            Some(dumper) => dumper,
            None => continue,
        };
        // elements the server has to infer make an array it has to infer
        let oid_out = if element.oid() == INVALID_OID {
            INVALID_OID
        } else {
            array_oid
        };
        let shape = ArrayShape {
            format,
            element,
            oid: oid_out,
            element_oid: oid,
            delimiter,
        };
        map.register_dumper::<Vec<T>, _>(ArrayDumper::<Vec<T>, T>::new(shape.clone()));
        map.register_dumper::<Vec<Option<T>>, _>(ArrayDumper::<Vec<Option<T>>, T>::new(
            shape.clone(),
        ));
        map.register_dumper::<Array<T>, _>(ArrayDumper::<Array<T>, T>::new(shape));
    }
}

/// Registers loaders for `array_oid`, returning `Array<T>`, in every format
/// `oid` has a loader for.
pub fn register_array_loaders<T>(map: &mut AdaptersMap, oid: Oid, array_oid: Oid)
where
    T: Any + Send,
{
    let delimiter = delimiter_of(oid);
    for format in [Format::Text, Format::Binary] {
        if let Some(element) = map.loader_for(oid, format) {
            map.register_loader(
                array_oid,
                ArrayLoader::<T> {
                    format,
                    element,
                    delimiter,
                    _p: PhantomData,
                },
            );
        }
    }
}

/// Registers both the array dumpers and loaders of `T`.
pub fn register_array<T>(map: &mut AdaptersMap, oid: Oid, array_oid: Oid)
where
    T: ToSql + Send,
{
    register_array_dumpers::<T>(map, oid, array_oid);
    register_array_loaders::<T>(map, oid, array_oid);
}

#[derive(Clone)]
struct ArrayShape {
    format: Format,
    element: Arc<dyn Dumper>,
    oid: Oid,
    element_oid: Oid,
    delimiter: u8,
}

struct ArrayDumper<C, T> {
    shape: ArrayShape,
    _p: PhantomData<fn() -> (C, T)>,
}

impl<C, T> ArrayDumper<C, T> {
    fn new(shape: ArrayShape) -> Self {
        ArrayDumper {
            shape,
            _p: PhantomData,
        }
    }
}

impl<C, T> ArrayDumper<C, T>
where
    C: ArrayView<T> + Any,
    T: ToSql,
{
    fn dump_text(&self, dims: &[Dimension], items: &[Option<&T>], buf: &mut BytesMut) -> Result<(), Error> {
        if items.is_empty() {
            buf.put_slice(b"{}");
            return Ok(());
        }
        if dims.iter().any(|d| d.lower_bound != 1) {
            for d in dims {
                let upper = d.lower_bound as i64 + d.len as i64 - 1;
                buf.put_slice(format!("[{}:{}]", d.lower_bound, upper).as_bytes());
            }
            buf.put_u8(b'=');
        }
        let mut values = Vec::with_capacity(items.len());
        for item in items {
            values.push(match item {
                Some(item) => {
                    let mut value = BytesMut::new();
                    self.shape.element.dump(T::as_any(*item), &mut value)?;
                    Some(value)
                }
                None => None,
            });
        }
        put_level(dims, &values, self.shape.delimiter, buf);
        Ok(())
    }

    fn dump_binary(&self, dims: &[Dimension], items: &[Option<&T>], buf: &mut BytesMut) -> Result<(), Error> {
        buf.put_i32(dims.len() as i32);
        buf.put_i32(items.iter().any(Option::is_none) as i32);
        buf.put_u32(self.shape.element_oid);
        for d in dims {
            buf.put_i32(d.len);
            buf.put_i32(d.lower_bound);
        }
        for item in items {
            match item {
                Some(item) => {
                    let base = buf.len();
                    buf.put_i32(0);
                    self.shape.element.dump(T::as_any(*item), buf)?;
                    let len = i32::try_from(buf.len() - base - 4)
                        .map_err(|_| Error::data("array element too large"))?;
                    BigEndian::write_i32(&mut buf[base..base + 4], len);
                }
                None => buf.put_i32(-1),
            }
        }
        Ok(())
    }
}

fn put_level(dims: &[Dimension], values: &[Option<BytesMut>], delimiter: u8, buf: &mut BytesMut) {
    buf.put_u8(b'{');
    if dims.len() <= 1 {
        for (i, value) in values.iter().enumerate() {
            if i > 0 {
                buf.put_u8(delimiter);
            }
            match value {
                Some(value) => put_element(value, delimiter, buf),
                None => buf.put_slice(b"NULL"),
            }
        }
    } else {
        let stride = values.len() / dims[0].len.max(1) as usize;
        for (i, chunk) in values.chunks(stride.max(1)).enumerate() {
            if i > 0 {
                buf.put_u8(delimiter);
            }
            put_level(&dims[1..], chunk, delimiter, buf);
        }
    }
    buf.put_u8(b'}');
}

fn is_array_space(c: u8) -> bool {
    matches!(c, b' ' | b'\t' | b'\n' | b'\r' | 0x0b | 0x0c)
}

fn put_element(value: &[u8], delimiter: u8, buf: &mut BytesMut) {
    let needs_quotes = value.is_empty()
        || value.eq_ignore_ascii_case(b"NULL")
        || value
            .iter()
            .any(|&c| matches!(c, b'"' | b'{' | b'}' | b'\\') || c == delimiter || is_array_space(c));
    if !needs_quotes {
        buf.put_slice(value);
        return;
    }
    buf.put_u8(b'"');
    for &c in value {
        if c == b'"' || c == b'\\' {
            buf.put_u8(b'\\');
        }
        buf.put_u8(c);
    }
    buf.put_u8(b'"');
}

impl<C, T> Dumper for ArrayDumper<C, T>
where
    C: ArrayView<T> + Any,
    T: ToSql,
{
    fn format(&self) -> Format {
        self.shape.format
    }

    fn oid(&self) -> Oid {
        self.shape.oid
    }

    fn dump(&self, obj: &dyn Any, buf: &mut BytesMut) -> Result<(), Error> {
        let value = downcast::<C>(obj)?;
        let dims = value.dims();
        let items = value.items();
        match self.shape.format {
            Format::Text => self.dump_text(&dims, &items, buf),
            Format::Binary => self.dump_binary(&dims, &items, buf),
        }
    }

    fn quote(&self, obj: &dyn Any, buf: &mut BytesMut) -> Result<(), Error> {
        let mut value = BytesMut::new();
        self.dump(obj, &mut value)?;
        crate::adapt::escape_literal(&value, buf);
        if self.shape.oid != INVALID_OID {
            if let Some(info) = oids::by_oid(self.shape.element_oid) {
                buf.put_slice(format!("::{}[]", info.alt_name()).as_bytes());
            }
        }
        Ok(())
    }
}

struct ArrayLoader<T> {
    format: Format,
    element: Arc<dyn Loader>,
    delimiter: u8,
    _p: PhantomData<fn() -> T>,
}

impl<T> Loader for ArrayLoader<T>
where
    T: Any + Send,
{
    fn format(&self) -> Format {
        self.format
    }

    fn load(&self, data: &[u8]) -> Result<Box<dyn Any + Send>, Error> {
        let (dims, raw) = match self.format {
            Format::Text => parse_text(data, self.delimiter)?,
            Format::Binary => parse_binary(data)?,
        };
        let mut elements = Vec::with_capacity(raw.len());
        for item in raw {
            elements.push(match item {
                Some(item) => {
                    let value = self.element.load(&item)?;
                    match value.downcast::<T>() {
                        Ok(value) => Some(*value),
                        Err(_) => {
                            return Err(Error::conversion(
                                format!(
                                    "array element loaded as a type other than {}",
                                    std::any::type_name::<T>()
                                )
                                .into(),
                            ))
                        }
                    }
                }
                None => None,
            });
        }
        Ok(Box::new(Array { dims, elements }))
    }
}

type RawArray = (Vec<Dimension>, Vec<Option<Vec<u8>>>);

fn malformed(data: &[u8], why: &str) -> Error {
    Error::data(format!(
        "malformed array literal {:?}: {}",
        String::from_utf8_lossy(data),
        why
    ))
}

struct TextParser<'a> {
    data: &'a [u8],
    pos: usize,
    delimiter: u8,
    lens: Vec<Option<usize>>,
    leaf_depth: Option<usize>,
    items: Vec<Option<Vec<u8>>>,
}

impl<'a> TextParser<'a> {
    fn peek(&self) -> Option<u8> {
        self.data.get(self.pos).copied()
    }

    fn skip_space(&mut self) {
        while self.peek().map_or(false, is_array_space) {
            self.pos += 1;
        }
    }

    fn err(&self, why: &str) -> Error {
        malformed(self.data, why)
    }

    fn expect(&mut self, c: u8) -> Result<(), Error> {
        self.skip_space();
        if self.peek() == Some(c) {
            self.pos += 1;
            Ok(())
        } else {
            Err(self.err(&format!("expected {:?}", c as char)))
        }
    }

    fn int(&mut self) -> Result<i32, Error> {
        self.skip_space();
        let start = self.pos;
        if matches!(self.peek(), Some(b'-' | b'+')) {
            self.pos += 1;
        }
        while self.peek().map_or(false, |c| c.is_ascii_digit()) {
            self.pos += 1;
        }
        std::str::from_utf8(&self.data[start..self.pos])
            .ok()
            .and_then(|s| s.parse().ok())
            .ok_or_else(|| self.err("invalid array bound"))
    }

    // `[lb:ub]` or `[ub]` for each dimension, followed by `=`
    fn decoration(&mut self) -> Result<Vec<(i32, i32)>, Error> {
        let mut bounds = vec![];
        loop {
            self.skip_space();
            if self.peek() != Some(b'[') {
                break;
            }
            self.pos += 1;
            let first = self.int()?;
            self.skip_space();
            let (lower, upper) = if self.peek() == Some(b':') {
                self.pos += 1;
                (first, self.int()?)
            } else {
                (1, first)
            };
            self.expect(b']')?;
            if upper < lower {
                return Err(self.err("upper bound cannot be less than lower bound"));
            }
            bounds.push((lower, upper));
        }
        self.expect(b'=')?;
        Ok(bounds)
    }

    fn level(&mut self, depth: usize) -> Result<(), Error> {
        if depth >= MAX_DIMENSIONS {
            return Err(self.err("too many dimensions"));
        }
        self.expect(b'{')?;
        self.skip_space();
        if self.peek() == Some(b'}') {
            if depth > 0 {
                return Err(self.err("empty sub-array"));
            }
            self.pos += 1;
            self.leaf_depth = Some(0);
            return Ok(());
        }
        let mut count = 0;
        loop {
            self.skip_space();
            if self.peek() == Some(b'{') {
                self.level(depth + 1)?;
            } else {
                match self.leaf_depth {
                    Some(d) if d != depth + 1 => {
                        return Err(self.err("multidimensional arrays must have matching dimensions"))
                    }
                    _ => self.leaf_depth = Some(depth + 1),
                }
                let item = self.element()?;
                self.items.push(item);
            }
            count += 1;
            self.skip_space();
            match self.peek() {
                Some(c) if c == self.delimiter => self.pos += 1,
                Some(b'}') => {
                    self.pos += 1;
                    break;
                }
                _ => return Err(self.err("unexpected character")),
            }
        }
        if self.lens.len() <= depth {
            self.lens.resize(depth + 1, None);
        }
        match self.lens[depth] {
            Some(len) if len != count => {
                Err(self.err("multidimensional arrays must have matching dimensions"))
            }
            _ => {
                self.lens[depth] = Some(count);
                Ok(())
            }
        }
    }

    fn element(&mut self) -> Result<Option<Vec<u8>>, Error> {
        let mut out = vec![];
        if self.peek() == Some(b'"') {
            self.pos += 1;
            loop {
                match self.peek() {
                    None => return Err(self.err("unterminated quoted element")),
                    Some(b'"') => {
                        self.pos += 1;
                        return Ok(Some(out));
                    }
                    Some(b'\\') => {
                        let c = self
                            .data
                            .get(self.pos + 1)
                            .copied()
                            .ok_or_else(|| self.err("unexpected end of input"))?;
                        out.push(c);
                        self.pos += 2;
                    }
                    Some(c) => {
                        out.push(c);
                        self.pos += 1;
                    }
                }
            }
        }
        // unquoted: trailing spaces are dropped unless escaped
        let mut escaped = false;
        let mut kept = 0;
        loop {
            match self.peek() {
                None => return Err(self.err("unexpected end of input")),
                Some(c) if c == self.delimiter || c == b'}' => break,
                Some(b'{') | Some(b'"') => return Err(self.err("unexpected character")),
                Some(b'\\') => {
                    let c = self
                        .data
                        .get(self.pos + 1)
                        .copied()
                        .ok_or_else(|| self.err("unexpected end of input"))?;
                    out.push(c);
                    kept = out.len();
                    escaped = true;
                    self.pos += 2;
                }
                Some(c) => {
                    out.push(c);
                    if !is_array_space(c) {
                        kept = out.len();
                    }
                    self.pos += 1;
                }
            }
        }
        out.truncate(kept);
        if out.is_empty() {
            return Err(self.err("unexpected delimiter"));
        }
        if !escaped && out.eq_ignore_ascii_case(b"NULL") {
            return Ok(None);
        }
        Ok(Some(out))
    }
}

fn parse_text(data: &[u8], delimiter: u8) -> Result<RawArray, Error> {
    let mut parser = TextParser {
        data,
        pos: 0,
        delimiter,
        lens: vec![],
        leaf_depth: None,
        items: vec![],
    };
    parser.skip_space();
    let bounds = if parser.peek() == Some(b'[') {
        Some(parser.decoration()?)
    } else {
        None
    };
    parser.level(0)?;
    parser.skip_space();
    if parser.pos != data.len() {
        return Err(parser.err("junk after closing right brace"));
    }
    if parser.items.is_empty() {
        return Ok((vec![], vec![]));
    }
    let lens = parser
        .lens
        .iter()
        .map(|len| len.unwrap_or(0) as i32)
        .collect::<Vec<_>>();
    let dims = match bounds {
        None => lens
            .iter()
            .map(|&len| Dimension {
                len,
                lower_bound: 1,
            })
            .collect(),
        Some(bounds) => {
            if bounds.len() != lens.len() {
                return Err(malformed(data, "specified array dimensions do not match array contents"));
            }
            let mut dims = Vec::with_capacity(lens.len());
            for (&(lower, upper), &len) in bounds.iter().zip(&lens) {
                if upper as i64 - lower as i64 + 1 != len as i64 {
                    return Err(malformed(data, "specified array dimensions do not match array contents"));
                }
                dims.push(Dimension {
                    len,
                    lower_bound: lower,
                });
            }
            dims
        }
    };
    Ok((dims, parser.items))
}

fn read_i32(data: &[u8], pos: &mut usize) -> Result<i32, Error> {
    let bytes = data
        .get(*pos..*pos + 4)
        .ok_or_else(|| Error::data("truncated binary array"))?;
    *pos += 4;
    Ok(BigEndian::read_i32(bytes))
}

fn parse_binary(data: &[u8]) -> Result<RawArray, Error> {
    let mut pos = 0;
    let ndim = read_i32(data, &mut pos)?;
    if !(0..=MAX_DIMENSIONS as i32).contains(&ndim) {
        return Err(Error::data(format!("invalid number of array dimensions: {}", ndim)));
    }
    // has nulls flag and element oid
    read_i32(data, &mut pos)?;
    read_i32(data, &mut pos)?;
    let mut dims = Vec::with_capacity(ndim as usize);
    let mut count = if ndim == 0 { 0usize } else { 1 };
    for _ in 0..ndim {
        let len = read_i32(data, &mut pos)?;
        let lower_bound = read_i32(data, &mut pos)?;
        if len < 0 {
            return Err(Error::data("negative array dimension"));
        }
        count = count.saturating_mul(len as usize);
        dims.push(Dimension { len, lower_bound });
    }
    // each element takes at least its length word
    if count > (data.len() - pos) / 4 {
        return Err(Error::data("truncated binary array"));
    }
    let mut items = Vec::with_capacity(count);
    for _ in 0..count {
        let len = read_i32(data, &mut pos)?;
        if len == -1 {
            items.push(None);
            continue;
        }
        let len = usize::try_from(len).map_err(|_| Error::data("invalid array element length"))?;
        let item = data
            .get(pos..pos + len)
            .ok_or_else(|| Error::data("truncated binary array"))?;
        items.push(Some(item.to_vec()));
        pos += len;
    }
    if pos != data.len() {
        return Err(Error::data("trailing data after binary array"));
    }
    if count == 0 {
        dims.clear();
    }
    Ok((dims, items))
}
