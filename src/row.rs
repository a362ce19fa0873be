//! Rows.

use crate::adapt::Loader;
use crate::pq::{Column, RawRow};
use crate::Error;
use std::any::{type_name, Any};
use std::fmt;
use std::sync::Arc;

mod sealed {
    pub trait Sealed {}
}

/// A trait implemented by types that can index into columns of a row.
///
/// This cannot be implemented outside of this crate.
pub trait RowIndex: sealed::Sealed {
    #[doc(hidden)]
    fn __idx(&self, columns: &[Column]) -> Option<usize>;
}

impl sealed::Sealed for usize {}

impl RowIndex for usize {
    #[inline]
    fn __idx(&self, columns: &[Column]) -> Option<usize> {
        if *self >= columns.len() {
            None
        } else {
            Some(*self)
        }
    }
}

impl sealed::Sealed for str {}

impl RowIndex for str {
    #[inline]
    fn __idx(&self, columns: &[Column]) -> Option<usize> {
        if let Some(idx) = columns.iter().position(|d| d.name() == self) {
            return Some(idx);
        };

        // unquoted identifiers are folded to lower case by the server: only
        // ASCII letters are matched regardless of case
        columns
            .iter()
            .position(|d| d.name().eq_ignore_ascii_case(self))
    }
}

impl<T> sealed::Sealed for &T where T: ?Sized + sealed::Sealed {}

impl<T> RowIndex for &T
where
    T: ?Sized + RowIndex,
{
    #[inline]
    fn __idx(&self, columns: &[Column]) -> Option<usize> {
        T::__idx(*self, columns)
    }
}

/// A row of data returned from the database by a query.
///
/// Values are loaded when the row is fetched; `NULL` values are `None`.
pub struct Row {
    columns: Arc<[Column]>,
    values: Vec<Option<Box<dyn Any + Send>>>,
}

impl fmt::Debug for Row {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Row")
            .field("columns", &self.columns)
            .finish()
    }
}

impl Row {
    pub(crate) fn load(
        columns: Arc<[Column]>,
        raw: &RawRow,
        loaders: &[Arc<dyn Loader>],
    ) -> Result<Row, Error> {
        let values = loaders
            .iter()
            .enumerate()
            .map(|(i, loader)| raw.get(i).map(|data| loader.load(data)).transpose())
            .collect::<Result<Vec<_>, Error>>()?;
        Ok(Row { columns, values })
    }

    /// Returns information about the columns of data in the row.
    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    /// Determines if the row contains no values.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns the number of values in the row.
    pub fn len(&self) -> usize {
        self.columns().len()
    }

    /// Deserializes a value from the row.
    ///
    /// The value can be specified either by its numeric index in the row, or by its column name.
    ///
    /// # Panics
    ///
    /// Panics if the index is out of bounds, the value is `NULL`, or the
    /// value is not a `T`.
    #[track_caller]
    pub fn get<I, T>(&self, idx: I) -> T
    where
        I: RowIndex + fmt::Display,
        T: Any + Clone,
    {
        match self.get_inner(&idx) {
            Ok(ok) => ok,
            Err(err) => panic!("error retrieving column {}: {}", idx, err),
        }
    }

    /// Like `Row::get`, but returns a `Result` rather than panicking.
    pub fn try_get<I, T>(&self, idx: I) -> Result<T, Error>
    where
        I: RowIndex + fmt::Display,
        T: Any + Clone,
    {
        self.get_inner(&idx)
    }

    /// Like `Row::try_get`, but returns `None` for a `NULL` value.
    pub fn try_get_opt<I, T>(&self, idx: I) -> Result<Option<T>, Error>
    where
        I: RowIndex + fmt::Display,
        T: Any + Clone,
    {
        let idx = self.index(&idx)?;
        match &self.values[idx] {
            Some(value) => downcast(value, idx).map(Some),
            None => Ok(None),
        }
    }

    /// Returns `true` if the value of a column is `NULL`.
    pub fn is_null<I>(&self, idx: I) -> Result<bool, Error>
    where
        I: RowIndex + fmt::Display,
    {
        let idx = self.index(&idx)?;
        Ok(self.values[idx].is_none())
    }

    /// The loaded value of a column, without converting it.
    pub fn value<I>(&self, idx: I) -> Result<Option<&(dyn Any + Send)>, Error>
    where
        I: RowIndex + fmt::Display,
    {
        let idx = self.index(&idx)?;
        Ok(self.values[idx].as_deref())
    }

    fn index<I>(&self, idx: &I) -> Result<usize, Error>
    where
        I: RowIndex + fmt::Display,
    {
        idx.__idx(self.columns())
            .ok_or_else(|| Error::column(idx.to_string()))
    }

    fn get_inner<I, T>(&self, idx: &I) -> Result<T, Error>
    where
        I: RowIndex + fmt::Display,
        T: Any + Clone,
    {
        let idx = self.index(idx)?;
        match &self.values[idx] {
            Some(value) => downcast(value, idx),
            None => Err(Error::conversion(
                format!("unexpected NULL in column {}", idx).into(),
            )),
        }
    }
}

fn downcast<T: Any + Clone>(value: &Box<dyn Any + Send>, idx: usize) -> Result<T, Error> {
    value.downcast_ref::<T>().cloned().ok_or_else(|| {
        Error::conversion(
            format!(
                "cannot convert the value of column {} to {}",
                idx,
                type_name::<T>()
            )
            .into(),
        )
    })
}
