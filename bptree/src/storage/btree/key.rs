//! Key formats, comparison and in-block positioning.
//!
//! Every key in a tree has the same width. Integer keys are signed 32-bit
//! values stored little-endian and compared numerically; string keys are raw
//! byte strings of a configured width compared byte-wise.

use std::cmp::Ordering;

use crate::storage::block::WORD_SIZE;

/// Kind of key a tree is built over.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum KeyKind {
    Integer = 0,
    String = 1,
}

impl TryFrom<u32> for KeyKind {
    type Error = u32;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::Integer),
            1 => Ok(Self::String),
            _ => Err(value),
        }
    }
}

/// Key kind plus the fixed width every stored key occupies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeyFormat {
    kind: KeyKind,
    width: usize,
}

impl KeyFormat {
    /// Signed 32-bit integer keys.
    #[must_use]
    pub const fn integer() -> Self {
        Self {
            kind: KeyKind::Integer,
            width: WORD_SIZE,
        }
    }

    /// Byte-string keys of exactly `width` bytes.
    ///
    /// # Errors
    ///
    /// Returns [`KeyError::ZeroWidth`] if `width` is zero.
    pub const fn string(width: usize) -> Result<Self, KeyError> {
        if width == 0 {
            return Err(KeyError::ZeroWidth);
        }
        Ok(Self {
            kind: KeyKind::String,
            width,
        })
    }

    #[must_use]
    pub const fn kind(&self) -> KeyKind {
        self.kind
    }

    /// Width of one stored key in bytes.
    #[must_use]
    pub const fn width(&self) -> usize {
        self.width
    }

    /// Convert a caller key to its stored form.
    ///
    /// String keys longer than the width are truncated, so keys that differ
    /// only past the width are the same key. Shorter keys are rejected.
    pub fn encode(&self, key: IndexKey<'_>) -> Result<Vec<u8>, KeyError> {
        match (self.kind, key) {
            (KeyKind::Integer, IndexKey::Int(value)) => Ok(value.to_le_bytes().to_vec()),
            (KeyKind::String, IndexKey::Str(bytes)) => {
                if bytes.len() < self.width {
                    return Err(KeyError::TooShort {
                        expected: self.width,
                        actual: bytes.len(),
                    });
                }
                Ok(bytes[..self.width].to_vec())
            }
            (expected, key) => Err(KeyError::KindMismatch {
                expected,
                actual: key.kind(),
            }),
        }
    }

    /// Compare two stored keys.
    #[must_use]
    pub fn compare(&self, a: &[u8], b: &[u8]) -> Ordering {
        match self.kind {
            KeyKind::Integer => decode_int(a).cmp(&decode_int(b)),
            KeyKind::String => a[..self.width].cmp(&b[..self.width]),
        }
    }

    /// Render a stored key for logs and dumps.
    #[must_use]
    pub fn display(&self, key: &[u8]) -> String {
        match self.kind {
            KeyKind::Integer => decode_int(key).to_string(),
            KeyKind::String => String::from_utf8_lossy(key).into_owned(),
        }
    }
}

fn decode_int(bytes: &[u8]) -> i32 {
    i32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])
}

/// A key as supplied by callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexKey<'a> {
    Int(i32),
    Str(&'a [u8]),
}

impl IndexKey<'_> {
    #[must_use]
    pub const fn kind(&self) -> KeyKind {
        match self {
            Self::Int(_) => KeyKind::Integer,
            Self::Str(_) => KeyKind::String,
        }
    }
}

impl From<i32> for IndexKey<'_> {
    fn from(value: i32) -> Self {
        Self::Int(value)
    }
}

impl<'a> From<&'a [u8]> for IndexKey<'a> {
    fn from(bytes: &'a [u8]) -> Self {
        Self::Str(bytes)
    }
}

impl<'a> From<&'a str> for IndexKey<'a> {
    fn from(s: &'a str) -> Self {
        Self::Str(s.as_bytes())
    }
}

/// Result of positioning a key inside a sorted key array.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Position {
    /// Number of stored keys less than or equal to the target.
    pub index: usize,
    /// Whether the key at `index - 1` equals the target.
    pub exact: bool,
}

/// Sorted fixed-width keys stored back to back, as they sit in a block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyArray {
    width: usize,
    bytes: Vec<u8>,
}

impl KeyArray {
    /// Create an empty array with room for `capacity` keys.
    #[must_use]
    pub fn with_capacity(width: usize, capacity: usize) -> Self {
        Self {
            width,
            bytes: Vec::with_capacity(width * capacity),
        }
    }

    /// Build an array from `len` packed keys.
    #[must_use]
    pub fn from_packed(width: usize, packed: &[u8], capacity: usize) -> Self {
        let mut bytes = Vec::with_capacity(width * capacity);
        bytes.extend_from_slice(packed);
        Self { width, bytes }
    }

    #[must_use]
    pub const fn len(&self) -> usize {
        self.bytes.len() / self.width
    }

    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// The packed key bytes.
    #[must_use]
    pub fn as_packed(&self) -> &[u8] {
        &self.bytes
    }

    /// Key at `index`.
    #[must_use]
    pub fn get(&self, index: usize) -> &[u8] {
        &self.bytes[index * self.width..(index + 1) * self.width]
    }

    pub fn iter(&self) -> impl Iterator<Item = &[u8]> {
        self.bytes.chunks_exact(self.width)
    }

    /// Insert a key before position `index`.
    pub fn insert(&mut self, index: usize, key: &[u8]) {
        debug_assert_eq!(key.len(), self.width);
        let at = index * self.width;
        self.bytes.splice(at..at, key.iter().copied());
    }

    /// Remove the key at `index`.
    pub fn remove(&mut self, index: usize) {
        let at = index * self.width;
        self.bytes.drain(at..at + self.width);
    }

    /// Split off keys from `index` onwards.
    #[must_use]
    pub fn split_off(&mut self, index: usize, capacity: usize) -> Self {
        let tail = self.bytes.split_off(index * self.width);
        Self::from_packed(self.width, &tail, capacity)
    }

    /// Remove the last key and return it.
    pub fn pop(&mut self) -> Option<Vec<u8>> {
        if self.is_empty() {
            return None;
        }
        let at = self.bytes.len() - self.width;
        Some(self.bytes.split_off(at))
    }

    /// Append a single key at the end.
    pub fn push(&mut self, key: &[u8]) {
        debug_assert_eq!(key.len(), self.width);
        self.bytes.extend_from_slice(key);
    }

    /// Append every key of `other` at the end.
    pub fn append(&mut self, other: &Self) {
        self.bytes.extend_from_slice(&other.bytes);
    }

    /// Locate `target` among the stored keys.
    ///
    /// Binary search narrows to an equal key or the neighbourhood of the
    /// target, then a short linear walk settles on the upper bound: forward
    /// past every key `<=` the target, back past every key `>` it.
    #[must_use]
    pub fn locate(&self, format: &KeyFormat, target: &[u8]) -> Position {
        let len = self.len();
        let (mut lo, mut hi) = (0, len);
        while lo < hi {
            let mid = lo + (hi - lo) / 2;
            match format.compare(self.get(mid), target) {
                Ordering::Less => lo = mid + 1,
                Ordering::Greater => hi = mid,
                Ordering::Equal => {
                    lo = mid;
                    break;
                }
            }
        }

        let mut index = lo;
        while index < len && format.compare(self.get(index), target) != Ordering::Greater {
            index += 1;
        }
        while index > 0 && format.compare(self.get(index - 1), target) == Ordering::Greater {
            index -= 1;
        }

        let exact = index > 0 && format.compare(self.get(index - 1), target) == Ordering::Equal;
        Position { index, exact }
    }
}

/// Errors for keys that do not fit the tree's key format.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeyError {
    /// Integer key given to a string tree, or the other way round.
    KindMismatch { expected: KeyKind, actual: KeyKind },
    /// String key shorter than the key width.
    TooShort { expected: usize, actual: usize },
    /// String key format declared with a width of zero.
    ZeroWidth,
}

impl std::fmt::Display for KeyError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::KindMismatch { expected, actual } => {
                write!(f, "key kind mismatch: tree uses {expected:?}, got {actual:?}")
            }
            Self::TooShort { expected, actual } => {
                write!(f, "key too short: need {expected} bytes, got {actual}")
            }
            Self::ZeroWidth => write!(f, "string keys need a width of at least one byte"),
        }
    }
}

impl std::error::Error for KeyError {}

#[cfg(test)]
mod tests {
    use super::*;

    fn int_array(values: &[i32]) -> KeyArray {
        let format = KeyFormat::integer();
        let mut keys = KeyArray::with_capacity(4, values.len());
        for &v in values {
            keys.push(&format.encode(IndexKey::Int(v)).expect("encode"));
        }
        keys
    }

    fn int_key(v: i32) -> Vec<u8> {
        v.to_le_bytes().to_vec()
    }

    #[test]
    fn test_locate_integer_keys() {
        let format = KeyFormat::integer();
        let keys = int_array(&[10, 20, 30, 40]);

        // Below every key
        assert_eq!(
            keys.locate(&format, &int_key(5)),
            Position {
                index: 0,
                exact: false
            }
        );
        // Exact match returns the upper bound
        assert_eq!(
            keys.locate(&format, &int_key(10)),
            Position {
                index: 1,
                exact: true
            }
        );
        assert_eq!(
            keys.locate(&format, &int_key(25)),
            Position {
                index: 2,
                exact: false
            }
        );
        assert_eq!(
            keys.locate(&format, &int_key(40)),
            Position {
                index: 4,
                exact: true
            }
        );
        assert_eq!(
            keys.locate(&format, &int_key(99)),
            Position {
                index: 4,
                exact: false
            }
        );
    }

    #[test]
    fn test_locate_empty_array() {
        let format = KeyFormat::integer();
        let keys = KeyArray::with_capacity(4, 8);
        assert_eq!(
            keys.locate(&format, &int_key(1)),
            Position {
                index: 0,
                exact: false
            }
        );
    }

    #[test]
    fn test_locate_counts_keys_at_or_below_target() {
        let format = KeyFormat::integer();
        let values: Vec<i32> = (0..57).map(|i| i * 3 - 50).collect();
        let keys = int_array(&values);

        for target in -60..130 {
            let expected = values.iter().filter(|&&v| v <= target).count();
            let pos = keys.locate(&format, &int_key(target));
            assert_eq!(pos.index, expected, "target {target}");
            assert_eq!(pos.exact, values.contains(&target), "target {target}");
        }
    }

    #[test]
    fn test_integer_keys_compare_numerically() {
        let format = KeyFormat::integer();
        // Little-endian bytes of -1 sort above 1 byte-wise; numeric order must win
        assert_eq!(format.compare(&int_key(-1), &int_key(1)), Ordering::Less);
        assert_eq!(format.compare(&int_key(256), &int_key(255)), Ordering::Greater);
    }

    #[test]
    fn test_locate_string_keys() {
        let format = KeyFormat::string(3).expect("width");
        let mut keys = KeyArray::with_capacity(3, 4);
        for k in [b"abc", b"abd", b"xyz"] {
            keys.push(k);
        }

        assert_eq!(keys.locate(&format, b"abc").index, 1);
        assert!(keys.locate(&format, b"abc").exact);
        assert_eq!(keys.locate(&format, b"abb").index, 0);
        assert_eq!(keys.locate(&format, b"mmm").index, 2);
        assert!(!keys.locate(&format, b"mmm").exact);
        assert_eq!(keys.locate(&format, b"zzz").index, 3);
    }

    #[test]
    fn test_string_key_truncation_and_rejection() {
        let format = KeyFormat::string(4).expect("width");

        let a = format.encode(IndexKey::Str(b"keyA-first")).expect("long key");
        let b = format.encode(IndexKey::Str(b"keyA-second")).expect("long key");
        assert_eq!(a, b"keyA");
        assert_eq!(format.compare(&a, &b), Ordering::Equal);

        assert_eq!(
            format.encode(IndexKey::Str(b"abc")),
            Err(KeyError::TooShort {
                expected: 4,
                actual: 3
            })
        );
    }

    #[test]
    fn test_key_kind_mismatch() {
        assert_eq!(
            KeyFormat::integer().encode(IndexKey::from("abcd")),
            Err(KeyError::KindMismatch {
                expected: KeyKind::Integer,
                actual: KeyKind::String
            })
        );
        let format = KeyFormat::string(4).expect("width");
        assert!(format.encode(IndexKey::from(7)).is_err());
    }

    #[test]
    fn test_string_format_rejects_zero_width() {
        assert_eq!(KeyFormat::string(0), Err(KeyError::ZeroWidth));
        assert_eq!(KeyFormat::string(1).map(|f| f.width()), Ok(1));
    }

    #[test]
    fn test_key_array_edits() {
        let mut keys = int_array(&[1, 3, 5]);
        keys.insert(1, &int_key(2));
        keys.remove(3);
        assert_eq!(keys.len(), 3);
        assert_eq!(keys.get(1), int_key(2).as_slice());

        let tail = keys.split_off(1, 4);
        assert_eq!(keys.len(), 1);
        assert_eq!(tail.len(), 2);
        assert_eq!(tail.get(1), int_key(3).as_slice());

        keys.append(&tail);
        assert_eq!(keys.pop(), Some(int_key(3)));
        assert_eq!(keys.iter().count(), 2);
    }
}
