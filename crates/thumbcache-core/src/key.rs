//! Cache key format.
//!
//!   "{width}:{height}:{resource_id}"
//!
//! Exactly three colon-delimited fields. A resource id containing a colon
//! changes the arity and is rejected as malformed.

use std::fmt;
use std::str::FromStr;

/// Field delimiter inside a serialized key.
pub const KEY_DELIMITER: char = ':';

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum KeyError {
    #[error("wrong key format: {0:?}")]
    WrongKey(String),
    #[error("size parameter is wrong: {0:?}")]
    WrongSize(String),
}

/// Parsed `(width, height, resource_id)` triple.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub width: u32,
    pub height: u32,
    pub resource_id: String,
}

impl CacheKey {
    pub fn new(width: u32, height: u32, resource_id: impl Into<String>) -> Self {
        Self {
            width,
            height,
            resource_id: resource_id.into(),
        }
    }

    /// Parse a serialized key. Performs no I/O.
    pub fn parse(raw: &str) -> Result<Self, KeyError> {
        let fields: Vec<&str> = raw.split(KEY_DELIMITER).collect();
        let [width, height, resource_id] = fields.as_slice() else {
            return Err(KeyError::WrongKey(raw.to_string()));
        };

        if resource_id.is_empty() {
            return Err(KeyError::WrongKey(raw.to_string()));
        }

        Ok(Self {
            width: parse_dimension(width)?,
            height: parse_dimension(height)?,
            resource_id: (*resource_id).to_string(),
        })
    }
}

fn parse_dimension(field: &str) -> Result<u32, KeyError> {
    match field.parse::<u32>() {
        Ok(n) if n > 0 => Ok(n),
        _ => Err(KeyError::WrongSize(field.to_string())),
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}{d}{}{d}{}",
            self.width,
            self.height,
            self.resource_id,
            d = KEY_DELIMITER
        )
    }
}

impl FromStr for CacheKey {
    type Err = KeyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}
