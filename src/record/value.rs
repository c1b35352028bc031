//! Value kinds a record can hold.
//!
//! Exactly one representation is active at a time. The type of a value is
//! also exposed as a [`TypeMask`] bit so filter chains can be addressed by
//! kind (e.g. only integers, or only file-typed records).

use std::fmt;
use std::ops::{BitAnd, BitOr, BitOrAssign};

use serde::{Deserialize, Serialize};

use super::any::AnyValue;

/// Bitmask over value kinds.
///
/// # Examples
///
/// ```
/// use swarmkb::TypeMask;
///
/// let numeric = TypeMask::INTEGER | TypeMask::DOUBLE;
/// assert!(numeric.intersects(TypeMask::DOUBLE));
/// assert!(!numeric.intersects(TypeMask::FILE));
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TypeMask(u32);

impl TypeMask {
    /// Matches nothing (the uninitialized kind).
    pub const EMPTY: Self = Self(0);
    /// 64-bit integers.
    pub const INTEGER: Self = Self(1);
    /// UTF-8 strings.
    pub const STRING: Self = Self(1 << 1);
    /// Doubles.
    pub const DOUBLE: Self = Self(1 << 2);
    /// Integer arrays.
    pub const INTEGER_ARRAY: Self = Self(1 << 3);
    /// Double arrays.
    pub const DOUBLE_ARRAY: Self = Self(1 << 4);
    /// Opaque file blobs.
    pub const FILE: Self = Self(1 << 5);
    /// Image blobs.
    pub const IMAGE: Self = Self(1 << 6);
    /// Registered "Any" payloads.
    pub const ANY: Self = Self(1 << 7);

    /// File and image blobs.
    pub const ALL_FILE_TYPES: Self = Self(Self::FILE.0 | Self::IMAGE.0);
    /// Scalars and numeric arrays.
    pub const ALL_PRIMITIVE_TYPES: Self = Self(
        Self::INTEGER.0 | Self::STRING.0 | Self::DOUBLE.0 | Self::INTEGER_ARRAY.0 | Self::DOUBLE_ARRAY.0,
    );
    /// Every kind.
    pub const ALL_TYPES: Self = Self(Self::ALL_PRIMITIVE_TYPES.0 | Self::ALL_FILE_TYPES.0 | Self::ANY.0);

    /// Raw bits.
    #[must_use]
    pub const fn bits(self) -> u32 {
        self.0
    }

    /// Build a mask from raw bits, dropping unknown bits.
    #[must_use]
    pub const fn from_bits_truncate(bits: u32) -> Self {
        Self(bits & Self::ALL_TYPES.0)
    }

    /// True if the two masks share at least one kind.
    #[must_use]
    pub const fn intersects(self, other: Self) -> bool {
        self.0 & other.0 != 0
    }

    /// True if every kind in `other` is also in `self`.
    #[must_use]
    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    /// True if no kind is set.
    #[must_use]
    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// Iterate over the single-kind masks set in `self`.
    pub fn kinds(self) -> impl Iterator<Item = Self> {
        (0..8u32).map(|bit| Self(1 << bit)).filter(move |k| self.intersects(*k))
    }
}

impl BitOr for TypeMask {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl BitOrAssign for TypeMask {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

impl BitAnd for TypeMask {
    type Output = Self;

    fn bitand(self, rhs: Self) -> Self {
        Self(self.0 & rhs.0)
    }
}

/// Possible values a record can hold.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Value {
    /// No value has been written.
    #[default]
    Uninitialized,
    /// 64-bit signed integer.
    Integer(i64),
    /// UTF-8 string.
    String(String),
    /// Double-precision float.
    Double(f64),
    /// Integer array.
    IntegerArray(Vec<i64>),
    /// Double array.
    DoubleArray(Vec<f64>),
    /// Opaque file contents.
    File(Vec<u8>),
    /// Image bytes.
    Image(Vec<u8>),
    /// Registered user type.
    Any(AnyValue),
}

impl Value {
    /// Returns true if no value has been written.
    #[must_use]
    pub const fn is_uninitialized(&self) -> bool {
        matches!(self, Self::Uninitialized)
    }

    #[must_use]
    pub const fn is_integer(&self) -> bool {
        matches!(self, Self::Integer(_))
    }

    #[must_use]
    pub const fn is_double(&self) -> bool {
        matches!(self, Self::Double(_))
    }

    #[must_use]
    pub const fn is_string(&self) -> bool {
        matches!(self, Self::String(_))
    }

    #[must_use]
    pub const fn is_array(&self) -> bool {
        matches!(self, Self::IntegerArray(_) | Self::DoubleArray(_))
    }

    #[must_use]
    pub const fn is_file_type(&self) -> bool {
        matches!(self, Self::File(_) | Self::Image(_))
    }

    #[must_use]
    pub const fn is_any(&self) -> bool {
        matches!(self, Self::Any(_))
    }

    /// The single-kind mask for this value.
    #[must_use]
    pub const fn type_mask(&self) -> TypeMask {
        match self {
            Self::Uninitialized => TypeMask::EMPTY,
            Self::Integer(_) => TypeMask::INTEGER,
            Self::String(_) => TypeMask::STRING,
            Self::Double(_) => TypeMask::DOUBLE,
            Self::IntegerArray(_) => TypeMask::INTEGER_ARRAY,
            Self::DoubleArray(_) => TypeMask::DOUBLE_ARRAY,
            Self::File(_) => TypeMask::FILE,
            Self::Image(_) => TypeMask::IMAGE,
            Self::Any(_) => TypeMask::ANY,
        }
    }

    /// Returns a human-readable type name.
    #[must_use]
    pub const fn type_name(&self) -> &'static str {
        match self {
            Self::Uninitialized => "uninitialized",
            Self::Integer(_) => "integer",
            Self::String(_) => "string",
            Self::Double(_) => "double",
            Self::IntegerArray(_) => "integer_array",
            Self::DoubleArray(_) => "double_array",
            Self::File(_) => "file",
            Self::Image(_) => "image",
            Self::Any(_) => "any",
        }
    }

    /// Number of logical elements: characters of a string, array length,
    /// blob bytes, 1 for scalars and 0 when uninitialized.
    #[must_use]
    pub fn size(&self) -> usize {
        match self {
            Self::Uninitialized => 0,
            Self::Integer(_) | Self::Double(_) | Self::Any(_) => 1,
            Self::String(s) => s.len(),
            Self::IntegerArray(v) => v.len(),
            Self::DoubleArray(v) => v.len(),
            Self::File(b) | Self::Image(b) => b.len(),
        }
    }

    /// Integer view. Strings are parsed, doubles truncated, arrays yield
    /// their first element; anything else is 0.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub fn to_integer(&self) -> i64 {
        match self {
            Self::Integer(v) => *v,
            Self::Double(v) => *v as i64,
            Self::String(s) => {
                let s = s.trim();
                s.parse::<i64>()
                    .ok()
                    .or_else(|| s.parse::<f64>().ok().map(|d| d as i64))
                    .unwrap_or(0)
            }
            Self::IntegerArray(v) => v.first().copied().unwrap_or(0),
            Self::DoubleArray(v) => v.first().map_or(0, |d| *d as i64),
            _ => 0,
        }
    }

    /// Double view, following the same rules as [`Value::to_integer`].
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn to_double(&self) -> f64 {
        match self {
            Self::Integer(v) => *v as f64,
            Self::Double(v) => *v,
            Self::String(s) => s.trim().parse::<f64>().unwrap_or(0.0),
            Self::IntegerArray(v) => v.first().map_or(0.0, |i| *i as f64),
            Self::DoubleArray(v) => v.first().copied().unwrap_or(0.0),
            _ => 0.0,
        }
    }

    /// Integer array view; scalars become a one-element array.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub fn to_integer_array(&self) -> Vec<i64> {
        match self {
            Self::IntegerArray(v) => v.clone(),
            Self::DoubleArray(v) => v.iter().map(|d| *d as i64).collect(),
            Self::Uninitialized | Self::File(_) | Self::Image(_) | Self::Any(_) => Vec::new(),
            other => vec![other.to_integer()],
        }
    }

    /// Double array view; scalars become a one-element array.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn to_double_array(&self) -> Vec<f64> {
        match self {
            Self::DoubleArray(v) => v.clone(),
            Self::IntegerArray(v) => v.iter().map(|i| *i as f64).collect(),
            Self::Uninitialized | Self::File(_) | Self::Image(_) | Self::Any(_) => Vec::new(),
            other => vec![other.to_double()],
        }
    }

    /// Raw bytes of blobs and "Any" payloads, UTF-8 bytes of strings.
    #[must_use]
    pub fn to_bytes(&self) -> Vec<u8> {
        match self {
            Self::File(b) | Self::Image(b) => b.clone(),
            Self::String(s) => s.as_bytes().to_vec(),
            Self::Any(a) => a.bytes().to_vec(),
            _ => Vec::new(),
        }
    }

    /// Logical truth: non-zero numbers, non-empty strings and blobs, arrays
    /// with at least one non-zero element, any "Any" payload.
    #[must_use]
    pub fn is_true(&self) -> bool {
        match self {
            Self::Uninitialized => false,
            Self::Integer(v) => *v != 0,
            Self::Double(v) => *v != 0.0,
            Self::String(s) => !s.is_empty(),
            Self::IntegerArray(v) => v.iter().any(|i| *i != 0),
            Self::DoubleArray(v) => v.iter().any(|d| *d != 0.0),
            Self::File(b) | Self::Image(b) => !b.is_empty(),
            Self::Any(_) => true,
        }
    }
}

fn join<T: fmt::Display>(f: &mut fmt::Formatter<'_>, items: &[T]) -> fmt::Result {
    for (i, item) in items.iter().enumerate() {
        if i > 0 {
            write!(f, ", ")?;
        }
        write!(f, "{item}")?;
    }
    Ok(())
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Uninitialized => Ok(()),
            Self::Integer(v) => write!(f, "{v}"),
            Self::Double(v) => write!(f, "{v}"),
            Self::String(v) => write!(f, "{v}"),
            Self::IntegerArray(v) => join(f, v),
            Self::DoubleArray(v) => join(f, v),
            Self::File(b) => write!(f, "file[{}]", b.len()),
            Self::Image(b) => write!(f, "image[{}]", b.len()),
            Self::Any(a) => write!(f, "any<{}>[{}]", a.tag(), a.bytes().len()),
        }
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Self::Integer(i64::from(v))
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Self::Integer(v)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Self::Integer(i64::from(v))
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Self::Double(v)
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Self::String(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Self::String(v.to_string())
    }
}

impl From<Vec<i64>> for Value {
    fn from(v: Vec<i64>) -> Self {
        Self::IntegerArray(v)
    }
}

impl From<Vec<f64>> for Value {
    fn from(v: Vec<f64>) -> Self {
        Self::DoubleArray(v)
    }
}

impl From<AnyValue> for Value {
    fn from(v: AnyValue) -> Self {
        Self::Any(v)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_type_mask_ops() {
        let mask = TypeMask::INTEGER | TypeMask::STRING;
        assert!(mask.intersects(TypeMask::INTEGER));
        assert!(mask.contains(TypeMask::STRING));
        assert!(!mask.contains(TypeMask::ALL_PRIMITIVE_TYPES));
        assert!(TypeMask::ALL_TYPES.contains(TypeMask::ANY));
        assert!(TypeMask::ALL_FILE_TYPES.intersects(TypeMask::IMAGE));
        assert_eq!(mask.kinds().count(), 2);
        assert_eq!(TypeMask::from_bits_truncate(u32::MAX), TypeMask::ALL_TYPES);
    }

    #[test]
    fn test_value_integer_views() {
        let val = Value::Integer(42);
        assert!(val.is_integer());
        assert_eq!(val.to_integer(), 42);
        assert!((val.to_double() - 42.0).abs() < f64::EPSILON);
        assert_eq!(val.to_string(), "42");
        assert_eq!(val.type_mask(), TypeMask::INTEGER);
        assert_eq!(val.size(), 1);
    }

    #[test]
    fn test_value_string_parsing() {
        assert_eq!(Value::from("17").to_integer(), 17);
        assert_eq!(Value::from("2.9").to_integer(), 2);
        assert_eq!(Value::from("abc").to_integer(), 0);
        assert!((Value::from("2.5").to_double() - 2.5).abs() < f64::EPSILON);
    }

    #[test]
    fn test_value_arrays() {
        let val = Value::from(vec![1.5, 2.5, 3.5]);
        assert!(val.is_array());
        assert_eq!(val.size(), 3);
        assert_eq!(val.to_string(), "1.5, 2.5, 3.5");
        assert_eq!(val.to_integer_array(), vec![1, 2, 3]);
        assert_eq!(Value::Integer(4).to_double_array(), vec![4.0]);
        assert!(Value::Uninitialized.to_integer_array().is_empty());
    }

    #[test]
    fn test_value_truth() {
        assert!(!Value::Uninitialized.is_true());
        assert!(!Value::Integer(0).is_true());
        assert!(Value::Integer(-1).is_true());
        assert!(!Value::from("").is_true());
        assert!(Value::from(vec![0, 0, 1]).is_true());
        assert!(!Value::from(vec![0i64, 0]).is_true());
        assert!(Value::File(vec![1]).is_true());
    }

    #[test]
    fn test_value_file_type() {
        let file = Value::File(vec![0xde, 0xad]);
        assert!(file.is_file_type());
        assert!(TypeMask::ALL_FILE_TYPES.intersects(file.type_mask()));
        assert_eq!(file.to_bytes(), vec![0xde, 0xad]);
        assert_eq!(file.to_string(), "file[2]");
    }

    #[test]
    fn test_value_serialization() {
        let val = Value::from(vec![1i64, 2, 3]);
        let json = serde_json::to_string(&val).unwrap();
        let back: Value = serde_json::from_str(&json).unwrap();
        assert_eq!(val, back);
    }
}
