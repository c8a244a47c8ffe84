//! One-or-many string values such as a token audience.
//!
//! Stored documents carry the value as `{"values": [...]}`. Older or
//! hand-written documents may instead hold a bare string or array, and some
//! carry extra derived keys next to `values`; all of these read back the
//! same way.

use std::fmt;

use serde::{Deserialize, Deserializer, Serialize, Serializer, ser::SerializeStruct};
use thiserror::Error;

/// A single string or an ordered set of strings.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StringOrArray {
    values: Vec<String>,
}

/// Returned by [`StringOrArray::value_or_error`] when more than one value is
/// present.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("expected a single value, found {count}")]
pub struct NoSingleValue {
    /// Number of values present.
    pub count: usize,
}

impl StringOrArray {
    /// Creates a value holding exactly `value`.
    pub fn single(value: impl Into<String>) -> Self {
        Self { values: vec![value.into()] }
    }

    /// Creates a value holding each of `values`, dropping repeats while
    /// preserving first-seen order.
    pub fn many<I, S>(values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut unique: Vec<String> = Vec::new();
        for value in values {
            let value = value.into();
            if !unique.contains(&value) {
                unique.push(value);
            }
        }
        Self { values: unique }
    }

    /// Returns every value.
    #[must_use]
    pub fn values(&self) -> &[String] {
        &self.values
    }

    /// Returns the sole value, `None` when empty.
    ///
    /// # Errors
    ///
    /// Returns [`NoSingleValue`] when more than one value is present.
    pub fn value_or_error(&self) -> Result<Option<&str>, NoSingleValue> {
        match self.values.as_slice() {
            [] => Ok(None),
            [only] => Ok(Some(only)),
            many => Err(NoSingleValue { count: many.len() }),
        }
    }

    /// Returns whether `value` is one of the values.
    #[must_use]
    pub fn contains(&self, value: &str) -> bool {
        self.values.iter().any(|v| v == value)
    }

    /// Returns `true` when there are no values.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

impl fmt::Display for StringOrArray {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.values.as_slice() {
            [only] => f.write_str(only),
            many => write!(f, "[{}]", many.join(", ")),
        }
    }
}

impl From<&str> for StringOrArray {
    fn from(value: &str) -> Self {
        Self::single(value)
    }
}

impl From<String> for StringOrArray {
    fn from(value: String) -> Self {
        Self::single(value)
    }
}

impl From<Vec<String>> for StringOrArray {
    fn from(values: Vec<String>) -> Self {
        Self::many(values)
    }
}

impl Serialize for StringOrArray {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut state = serializer.serialize_struct("StringOrArray", 1)?;
        state.serialize_field("values", &self.values)?;
        state.end()
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum Repr {
    Null(()),
    One(String),
    Many(Vec<String>),
    Wrapped { values: Option<Vec<String>> },
}

impl<'de> Deserialize<'de> for StringOrArray {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        Ok(match Repr::deserialize(deserializer)? {
            Repr::Null(()) => Self::default(),
            Repr::One(value) => Self::single(value),
            Repr::Many(values) | Repr::Wrapped { values: Some(values) } => Self::many(values),
            Repr::Wrapped { values: None } => Self::default(),
        })
    }
}
