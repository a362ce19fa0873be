//! Query rewriting.
//!
//! Queries use `%s` (or `%b` for a binary parameter) as positional
//! placeholders and `%(name)s` / `%(name)b` as named ones; a literal `%` is
//! written `%%`. They are rewritten into the `$1, $2, ...` syntax of the
//! extended query protocol before being sent.

use crate::adapt::{AdaptersMap, Format, ToSql, Transformer};
use crate::encodings::Encoding;
use crate::oids::Oid;
use crate::Error;
use bytes::{BufMut, Bytes, BytesMut};
use lru::LruCache;
use smallvec::SmallVec;
use std::collections::HashMap;
use std::fmt::Write;
use std::num::NonZeroUsize;
use std::sync::Arc;

/// The number of rewritten queries remembered by each connection.
pub(crate) const QUERY_CACHE_SIZE: usize = 128;

/// The parameters of a query.
#[derive(Debug, Clone)]
pub enum Params<'a> {
    /// Values for `%s` placeholders, in order.
    Positional(Vec<&'a dyn ToSql>),
    /// Values for `%(name)s` placeholders, by name.
    Named(HashMap<&'a str, &'a dyn ToSql>),
}

impl<'a> Params<'a> {
    /// The number of values.
    pub fn len(&self) -> usize {
        match self {
            Params::Positional(values) => values.len(),
            Params::Named(values) => values.len(),
        }
    }

    /// Returns `true` if there are no values.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<'a> From<Vec<&'a dyn ToSql>> for Params<'a> {
    fn from(values: Vec<&'a dyn ToSql>) -> Params<'a> {
        Params::Positional(values)
    }
}

impl<'a> From<&[&'a dyn ToSql]> for Params<'a> {
    fn from(values: &[&'a dyn ToSql]) -> Params<'a> {
        Params::Positional(values.to_vec())
    }
}

impl<'a> From<HashMap<&'a str, &'a dyn ToSql>> for Params<'a> {
    fn from(values: HashMap<&'a str, &'a dyn ToSql>) -> Params<'a> {
        Params::Named(values)
    }
}

/// Builds positional [`Params`].
///
/// ```
/// let params = may_pq::params![42, "hello"];
/// assert_eq!(params.len(), 2);
/// ```
#[macro_export]
macro_rules! params {
    () => {
        $crate::Params::Positional(::std::vec::Vec::new())
    };
    ($($value:expr),+ $(,)?) => {
        $crate::Params::Positional(::std::vec![$(&$value as &dyn $crate::ToSql),+])
    };
}

/// Builds named [`Params`].
///
/// ```
/// let params = may_pq::named_params! { "id" => 42, "name" => "hello" };
/// assert_eq!(params.len(), 2);
/// ```
#[macro_export]
macro_rules! named_params {
    ($($name:expr => $value:expr),* $(,)?) => {{
        #[allow(unused_mut)]
        let mut values = ::std::collections::HashMap::<&str, &dyn $crate::ToSql>::new();
        $(values.insert($name, &$value);)*
        $crate::Params::Named(values)
    }};
}

/// The key of a placeholder.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum PlaceholderKey {
    /// The 0-based position of a `%s` placeholder.
    Position(usize),
    /// The name of a `%(name)s` placeholder.
    Name(String),
}

/// A literal fragment of a query and the placeholder following it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryPart {
    pre: Bytes,
    key: Option<PlaceholderKey>,
    format: Format,
}

impl QueryPart {
    /// The literal text before the placeholder, with `%%` unescaped.
    pub fn pre(&self) -> &[u8] {
        &self.pre
    }

    /// The placeholder; `None` for the tail of the query.
    pub fn key(&self) -> Option<&PlaceholderKey> {
        self.key.as_ref()
    }

    /// The format requested by the placeholder.
    pub fn format(&self) -> Format {
        self.format
    }
}

/// A query rewritten with `$n` placeholders.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedQuery {
    query: Bytes,
    formats: SmallVec<[Format; 8]>,
    order: Option<Vec<String>>,
    parts: Vec<QueryPart>,
}

impl ParsedQuery {
    /// The rewritten query.
    pub fn query(&self) -> &[u8] {
        &self.query
    }

    /// The format of each `$n` parameter.
    pub fn formats(&self) -> &[Format] {
        &self.formats
    }

    /// The names of the parameters in `$n` order, for named queries.
    pub fn order(&self) -> Option<&[String]> {
        self.order.as_deref()
    }

    /// The fragments the query was split into.
    pub fn parts(&self) -> &[QueryPart] {
        &self.parts
    }

    fn placeholders(&self) -> usize {
        self.parts.len() - 1
    }

    fn is_named(&self) -> bool {
        matches!(self.parts[0].key, Some(PlaceholderKey::Name(_)))
    }
}

fn incomplete(query: &[u8]) -> Error {
    let fragment = String::from_utf8_lossy(query);
    let fragment = fragment.split_whitespace().next().unwrap_or("%");
    Error::programming(format!("incomplete placeholder: '{}'", fragment))
}

/// Splits `query` at its placeholders.
///
/// The last part holds the tail of the query and no placeholder.
pub fn split_query(query: &[u8], encoding: Encoding) -> Result<Vec<QueryPart>, Error> {
    let mut parts = Vec::new();
    let mut pre = BytesMut::new();
    let mut named = None;
    let mut cur = 0;

    while let Some(offset) = query[cur..].iter().position(|&b| b == b'%') {
        let start = cur + offset;
        pre.put_slice(&query[cur..start]);

        let (name, spec, end) = match query.get(start + 1) {
            None => return Err(incomplete(&query[start..])),
            Some(b'%') => {
                pre.put_u8(b'%');
                cur = start + 2;
                continue;
            }
            Some(b'(') => {
                let rest = &query[start + 2..];
                match rest.iter().position(|&b| b == b')') {
                    Some(close) if close > 0 && close + 1 < rest.len() => {
                        let name = encoding.decode(&rest[..close])?;
                        (Some(name), rest[close + 1], start + close + 4)
                    }
                    _ => return Err(incomplete(&query[start..])),
                }
            }
            Some(b' ') => {
                return Err(Error::programming(
                    "incomplete placeholder: '%'; if you want to use '%' as an \
                     operator you can double it up, i.e. use '%%'",
                ))
            }
            Some(&spec) => (None, spec, start + 2),
        };

        let format = match spec {
            b's' => Format::Text,
            b'b' => Format::Binary,
            _ => {
                let tail = String::from_utf8_lossy(&query[start..]);
                let len = match &name {
                    Some(_) => end - start,
                    None => 2,
                };
                let fragment = tail.chars().take(len).collect::<String>();
                return Err(Error::programming(format!(
                    "only '%s' and '%b' placeholders allowed, got {}",
                    fragment
                )));
            }
        };

        let key = match name {
            Some(name) => PlaceholderKey::Name(name),
            None => PlaceholderKey::Position(parts.len()),
        };
        let is_named = matches!(key, PlaceholderKey::Name(_));
        match named {
            None => named = Some(is_named),
            Some(n) if n != is_named => {
                return Err(Error::programming(
                    "positional and named placeholders cannot be mixed",
                ))
            }
            Some(_) => {}
        }

        parts.push(QueryPart {
            pre: pre.split().freeze(),
            key: Some(key),
            format,
        });
        cur = end;
    }

    pre.put_slice(&query[cur..]);
    parts.push(QueryPart {
        pre: pre.freeze(),
        key: None,
        format: Format::Text,
    });
    Ok(parts)
}

/// Rewrites `query` with `$n` placeholders.
///
/// Each `%s` gets its own `$n`; the occurrences of a `%(name)s` share one.
pub fn rewrite(query: &[u8], encoding: Encoding) -> Result<ParsedQuery, Error> {
    let parts = split_query(query, encoding)?;
    let mut out = BytesMut::with_capacity(query.len() + 8);
    let mut formats = SmallVec::new();
    let mut order = None;

    match parts[0].key {
        Some(PlaceholderKey::Name(_)) => {
            let mut seen = HashMap::<&str, (usize, Format)>::new();
            let mut names = vec![];
            for part in &parts[..parts.len() - 1] {
                let name = match &part.key {
                    Some(PlaceholderKey::Name(name)) => name.as_str(),
                    _ => unreachable!("placeholder kinds are checked by split_query"),
                };
                out.put_slice(&part.pre);
                let n = match seen.get(name) {
                    Some((n, format)) => {
                        if *format != part.format {
                            return Err(Error::programming(format!(
                                "placeholder '{}' cannot have different formats",
                                name
                            )));
                        }
                        *n
                    }
                    None => {
                        let n = seen.len() + 1;
                        seen.insert(name, (n, part.format));
                        names.push(name.to_string());
                        formats.push(part.format);
                        n
                    }
                };
                let _ = write!(out, "${}", n);
            }
            order = Some(names);
        }
        Some(PlaceholderKey::Position(_)) => {
            for (i, part) in parts[..parts.len() - 1].iter().enumerate() {
                out.put_slice(&part.pre);
                let _ = write!(out, "${}", i + 1);
                formats.push(part.format);
            }
        }
        None => {}
    }

    if let Some(tail) = parts.last() {
        out.put_slice(&tail.pre);
    }

    Ok(ParsedQuery {
        query: out.freeze(),
        formats,
        order,
        parts,
    })
}

/// Puts the values of `params` in the order of the `$n` placeholders of
/// `parsed`.
pub(crate) fn reorder_params<'p>(
    parsed: &ParsedQuery,
    params: &Params<'p>,
) -> Result<Vec<&'p dyn ToSql>, Error> {
    let placeholders = parsed.placeholders();
    match params {
        Params::Positional(values) => {
            if values.len() != placeholders {
                return Err(Error::programming(format!(
                    "the query has {} placeholders but {} parameters were passed",
                    placeholders,
                    values.len()
                )));
            }
            if !values.is_empty() && parsed.is_named() {
                return Err(Error::programming(
                    "named placeholders require a mapping of parameters",
                ));
            }
            Ok(values.clone())
        }
        Params::Named(values) => {
            if placeholders > 0 && !parsed.is_named() {
                return Err(Error::programming(
                    "positional placeholders (%s) require a sequence of parameters",
                ));
            }
            let order = parsed.order().unwrap_or(&[]);
            let mut missing = order
                .iter()
                .filter(|name| !values.contains_key(name.as_str()))
                .map(String::as_str)
                .collect::<Vec<_>>();
            if !missing.is_empty() {
                missing.sort_unstable();
                return Err(Error::programming(format!(
                    "query parameter missing: {}",
                    missing.join(", ")
                )));
            }
            Ok(order.iter().map(|name| values[name.as_str()]).collect())
        }
    }
}

/// Dumps `params` for `parsed`, returning the values and their oids.
pub fn bind(
    parsed: &ParsedQuery,
    params: &Params<'_>,
    adapters: &AdaptersMap,
) -> Result<(Vec<Option<Bytes>>, Vec<Oid>), Error> {
    let values = reorder_params(parsed, params)?;
    Transformer::new(adapters).dump_sequence(&values, parsed.formats())
}

/// A bounded cache of rewritten queries.
pub(crate) struct QueryCache {
    cache: LruCache<(Bytes, Encoding), Arc<ParsedQuery>>,
}

impl QueryCache {
    pub(crate) fn new(size: usize) -> QueryCache {
        let size = NonZeroUsize::new(size).unwrap_or(NonZeroUsize::MIN);
        QueryCache {
            cache: LruCache::new(size),
        }
    }

    pub(crate) fn rewrite(
        &mut self,
        query: &[u8],
        encoding: Encoding,
    ) -> Result<Arc<ParsedQuery>, Error> {
        let key = (Bytes::copy_from_slice(query), encoding);
        if let Some(parsed) = self.cache.get(&key) {
            return Ok(parsed.clone());
        }
        let parsed = Arc::new(rewrite(query, encoding)?);
        self.cache.put(key, parsed.clone());
        Ok(parsed)
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.cache.len()
    }
}

/// A query and its parameters, ready to be sent.
#[derive(Debug, Clone, Default)]
pub(crate) struct PostgresQuery {
    pub(crate) query: Bytes,
    /// `None` when the query was sent without parameters, and not rewritten.
    pub(crate) params: Option<Vec<Option<Bytes>>>,
    pub(crate) types: Vec<Oid>,
    pub(crate) formats: Vec<Format>,
}

impl PostgresQuery {
    pub(crate) fn convert(
        query: &[u8],
        params: Option<&Params<'_>>,
        encoding: Encoding,
        cache: &mut QueryCache,
        adapters: &AdaptersMap,
    ) -> Result<PostgresQuery, Error> {
        let params = match params {
            Some(params) => params,
            None => {
                return Ok(PostgresQuery {
                    query: Bytes::copy_from_slice(query),
                    ..PostgresQuery::default()
                })
            }
        };

        let parsed = cache.rewrite(query, encoding)?;
        let (values, types) = bind(&parsed, params, adapters)?;
        Ok(PostgresQuery {
            query: parsed.query.clone(),
            params: Some(values),
            types,
            formats: parsed.formats().to_vec(),
        })
    }
}
