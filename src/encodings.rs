//! Client encodings.

use crate::Error;
use std::fmt;

/// A client encoding supported by the driver.
///
/// Queries and text values are exchanged as UTF-8; on `SQL_ASCII`
/// connections text that is not valid UTF-8 is returned as bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Encoding {
    /// `UTF8`.
    #[default]
    Utf8,
    /// `SQL_ASCII`: the server doesn't validate or convert text.
    SqlAscii,
}

impl Encoding {
    /// Looks up an encoding by its Postgres name or by a common alias.
    ///
    /// The lookup ignores case, `-` and `_`, so `utf-8`, `UTF8` and
    /// `unicode` are all the same encoding.
    pub fn from_name(name: &str) -> Result<Encoding, Error> {
        let normalized = name
            .chars()
            .filter(|c| *c != '-' && *c != '_')
            .collect::<String>()
            .to_ascii_lowercase();
        match &*normalized {
            "utf8" | "unicode" => Ok(Encoding::Utf8),
            "sqlascii" | "ascii" => Ok(Encoding::SqlAscii),
            _ => Err(Error::not_supported(format!(
                "client encoding not supported: {}",
                name
            ))),
        }
    }

    /// Decodes text written in this encoding.
    pub fn decode(self, data: &[u8]) -> Result<String, Error> {
        match self {
            Encoding::Utf8 => std::str::from_utf8(data)
                .map(str::to_string)
                .map_err(|e| Error::data(format!("invalid UTF8 text: {}", e))),
            Encoding::SqlAscii if data.is_ascii() => Ok(data.iter().map(|&b| b as char).collect()),
            Encoding::SqlAscii => Err(Error::data("non ASCII text on a SQL_ASCII connection")),
        }
    }

    /// The name of the encoding in Postgres.
    pub fn pg_name(self) -> &'static str {
        match self {
            Encoding::Utf8 => "UTF8",
            Encoding::SqlAscii => "SQL_ASCII",
        }
    }
}

impl fmt::Display for Encoding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.pg_name())
    }
}
