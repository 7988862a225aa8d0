use std::fmt;
use std::ops::Deref;

use serde::ser::{self, Impossible, Serialize, Serializer};
use sha2::{Digest, Sha256};

use crate::error::{ArgumentKind, MemoizeError};

/// A stable, content-derived key for a tuple of arguments.
///
/// The fingerprint is the SHA-256 digest of a canonical binary encoding of the arguments.
/// The encoding depends only on the argument values, never on their addresses, so two
/// value-equal argument tuples always have the same fingerprint. As lookups compare
/// fingerprints only, distinct tuples are kept apart solely by the collision resistance of
/// the digest.
///
/// Arguments are encoded as they are at call time. Interior mutable values, like a `Mutex`,
/// a `RefCell` or a `Cell`, are encoded by their current contents, exactly like the plain
/// value they hold. Changing them later does not touch results that are already stored.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Fingerprint([u8; 32]);

impl Fingerprint {
    /// Derives the fingerprint of `args`, which is usually a tuple of arguments.
    ///
    /// Values that are not comparable by value fail with
    /// [`MemoizeError::UnsupportedArgumentKind`]. These are dynamically sized sequences,
    /// maps and byte buffers. Trailing arguments of a variadic function should be passed as
    /// a [`Variadic`], which is encoded like a tuple of its current length.
    pub fn derive<T: Serialize + ?Sized>(args: &T) -> Result<Self, MemoizeError> {
        let mut encoder = Encoder::default();
        args.serialize(&mut encoder)?;
        Ok(encoder.finish())
    }

    /// Derives the fingerprint of `args` within the given `scope`.
    ///
    /// The same arguments in different scopes have different fingerprints.
    pub fn derive_scoped<T: Serialize + ?Sized>(scope: u64, args: &T) -> Result<Self, MemoizeError> {
        let mut encoder = Encoder::default();
        encoder.tag(tag::SCOPE);
        encoder.write(&scope.to_le_bytes());
        args.serialize(&mut encoder)?;
        Ok(encoder.finish())
    }

    /// Returns the raw digest bytes.
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

impl fmt::Debug for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Fingerprint({self})")
    }
}

/// The trailing arguments of a variadic function.
///
/// A plain `Vec` is rejected when deriving a [`Fingerprint`], since its length is not part
/// of the function signature. A `Variadic` is snapshotted at call time and encoded as a
/// tuple of its current length instead. This means calls with equal trailing arguments
/// share a cache entry, and calls with a different number of trailing arguments never do.
///
/// An empty `Variadic` stands for "no trailing arguments".
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Variadic<T>(Vec<T>);

impl<T> Variadic<T> {
    /// Creates an empty list of trailing arguments.
    pub fn new() -> Self {
        Self(Vec::new())
    }

    /// Returns the trailing arguments as a `Vec`.
    pub fn into_inner(self) -> Vec<T> {
        self.0
    }
}

impl<T> Default for Variadic<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Deref for Variadic<T> {
    type Target = [T];

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl<T> From<Vec<T>> for Variadic<T> {
    fn from(args: Vec<T>) -> Self {
        Self(args)
    }
}

impl<T, const N: usize> From<[T; N]> for Variadic<T> {
    fn from(args: [T; N]) -> Self {
        Self(args.into())
    }
}

impl<T> FromIterator<T> for Variadic<T> {
    fn from_iter<I: IntoIterator<Item = T>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl<T> IntoIterator for Variadic<T> {
    type Item = T;
    type IntoIter = std::vec::IntoIter<T>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

impl<'a, T> IntoIterator for &'a Variadic<T> {
    type Item = &'a T;
    type IntoIter = std::slice::Iter<'a, T>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

impl<T: Serialize> Serialize for Variadic<T> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        use serde::ser::SerializeTuple;

        let mut tuple = serializer.serialize_tuple(self.0.len())?;
        for arg in &self.0 {
            tuple.serialize_element(arg)?;
        }
        tuple.end()
    }
}

/// Creates a [`Variadic`] from a list of trailing arguments.
///
/// ```
/// use memoizer::{variadic, Variadic};
///
/// let rest: Variadic<&str> = variadic!["one", "two"];
/// assert_eq!(rest.len(), 2);
///
/// let none: Variadic<u8> = variadic![];
/// assert!(none.is_empty());
/// ```
#[macro_export]
macro_rules! variadic {
    () => {
        $crate::Variadic::new()
    };
    ($($arg:expr),+ $(,)?) => {
        $crate::Variadic::from(vec![$($arg),+])
    };
}

/// Type tags prefixed to every encoded value.
mod tag {
    pub const SCOPE: u8 = 0x01;
    pub const BOOL: u8 = 0x10;
    pub const INT: u8 = 0x11;
    pub const UINT: u8 = 0x12;
    pub const FLOAT: u8 = 0x13;
    pub const CHAR: u8 = 0x14;
    pub const STR: u8 = 0x15;
    pub const NONE: u8 = 0x20;
    pub const SOME: u8 = 0x21;
    pub const UNIT: u8 = 0x22;
    pub const VARIANT: u8 = 0x23;
    pub const TUPLE: u8 = 0x30;
    pub const STRUCT: u8 = 0x31;
    pub const FIELD: u8 = 0x32;
}

/// A [`Serializer`] streaming the canonical encoding of a value into a SHA-256 hasher.
#[derive(Default)]
struct Encoder {
    hasher: Sha256,
}

impl Encoder {
    fn tag(&mut self, tag: u8) {
        self.hasher.update([tag]);
    }

    fn write(&mut self, bytes: &[u8]) {
        self.hasher.update(bytes);
    }

    fn len(&mut self, len: usize) {
        self.write(&(len as u64).to_le_bytes());
    }

    fn str(&mut self, v: &str) {
        self.len(v.len());
        self.write(v.as_bytes());
    }

    fn variant(&mut self, index: u32) {
        self.tag(tag::VARIANT);
        self.write(&index.to_le_bytes());
    }

    fn finish(self) -> Fingerprint {
        let digest = self.hasher.finalize();
        let mut bytes = [0; 32];
        bytes.copy_from_slice(&digest);
        Fingerprint(bytes)
    }
}

fn unsupported(kind: ArgumentKind) -> MemoizeError {
    MemoizeError::UnsupportedArgumentKind(kind)
}

impl<'a> Serializer for &'a mut Encoder {
    type Ok = ();
    type Error = MemoizeError;

    type SerializeSeq = Impossible<(), MemoizeError>;
    type SerializeTuple = Self;
    type SerializeTupleStruct = Self;
    type SerializeTupleVariant = Self;
    type SerializeMap = Impossible<(), MemoizeError>;
    type SerializeStruct = Self;
    type SerializeStructVariant = Self;

    fn is_human_readable(&self) -> bool {
        false
    }

    fn serialize_bool(self, v: bool) -> Result<(), MemoizeError> {
        self.tag(tag::BOOL);
        self.write(&[u8::from(v)]);
        Ok(())
    }

    fn serialize_i8(self, v: i8) -> Result<(), MemoizeError> {
        self.serialize_i128(v.into())
    }

    fn serialize_i16(self, v: i16) -> Result<(), MemoizeError> {
        self.serialize_i128(v.into())
    }

    fn serialize_i32(self, v: i32) -> Result<(), MemoizeError> {
        self.serialize_i128(v.into())
    }

    fn serialize_i64(self, v: i64) -> Result<(), MemoizeError> {
        self.serialize_i128(v.into())
    }

    fn serialize_i128(self, v: i128) -> Result<(), MemoizeError> {
        self.tag(tag::INT);
        self.write(&v.to_le_bytes());
        Ok(())
    }

    fn serialize_u8(self, v: u8) -> Result<(), MemoizeError> {
        self.serialize_u128(v.into())
    }

    fn serialize_u16(self, v: u16) -> Result<(), MemoizeError> {
        self.serialize_u128(v.into())
    }

    fn serialize_u32(self, v: u32) -> Result<(), MemoizeError> {
        self.serialize_u128(v.into())
    }

    fn serialize_u64(self, v: u64) -> Result<(), MemoizeError> {
        self.serialize_u128(v.into())
    }

    fn serialize_u128(self, v: u128) -> Result<(), MemoizeError> {
        self.tag(tag::UINT);
        self.write(&v.to_le_bytes());
        Ok(())
    }

    fn serialize_f32(self, v: f32) -> Result<(), MemoizeError> {
        self.serialize_f64(v.into())
    }

    fn serialize_f64(self, v: f64) -> Result<(), MemoizeError> {
        // `-0.0 == 0.0`, so both have to produce the same key.
        let bits = if v.is_nan() {
            f64::NAN.to_bits()
        } else if v == 0.0 {
            0
        } else {
            v.to_bits()
        };
        self.tag(tag::FLOAT);
        self.write(&bits.to_le_bytes());
        Ok(())
    }

    fn serialize_char(self, v: char) -> Result<(), MemoizeError> {
        self.tag(tag::CHAR);
        self.write(&u32::from(v).to_le_bytes());
        Ok(())
    }

    fn serialize_str(self, v: &str) -> Result<(), MemoizeError> {
        self.tag(tag::STR);
        self.str(v);
        Ok(())
    }

    fn serialize_bytes(self, _v: &[u8]) -> Result<(), MemoizeError> {
        Err(unsupported(ArgumentKind::Bytes))
    }

    fn serialize_none(self) -> Result<(), MemoizeError> {
        self.tag(tag::NONE);
        Ok(())
    }

    fn serialize_some<T: ?Sized + Serialize>(self, value: &T) -> Result<(), MemoizeError> {
        self.tag(tag::SOME);
        value.serialize(self)
    }

    fn serialize_unit(self) -> Result<(), MemoizeError> {
        self.tag(tag::UNIT);
        Ok(())
    }

    fn serialize_unit_struct(self, _name: &'static str) -> Result<(), MemoizeError> {
        self.serialize_unit()
    }

    fn serialize_unit_variant(
        self,
        _name: &'static str,
        variant_index: u32,
        _variant: &'static str,
    ) -> Result<(), MemoizeError> {
        self.variant(variant_index);
        Ok(())
    }

    fn serialize_newtype_struct<T: ?Sized + Serialize>(
        self,
        _name: &'static str,
        value: &T,
    ) -> Result<(), MemoizeError> {
        value.serialize(self)
    }

    fn serialize_newtype_variant<T: ?Sized + Serialize>(
        self,
        _name: &'static str,
        variant_index: u32,
        _variant: &'static str,
        value: &T,
    ) -> Result<(), MemoizeError> {
        self.variant(variant_index);
        value.serialize(self)
    }

    fn serialize_seq(self, _len: Option<usize>) -> Result<Self::SerializeSeq, MemoizeError> {
        Err(unsupported(ArgumentKind::Sequence))
    }

    fn serialize_tuple(self, len: usize) -> Result<Self::SerializeTuple, MemoizeError> {
        self.tag(tag::TUPLE);
        self.len(len);
        Ok(self)
    }

    fn serialize_tuple_struct(
        self,
        _name: &'static str,
        len: usize,
    ) -> Result<Self::SerializeTupleStruct, MemoizeError> {
        self.serialize_tuple(len)
    }

    fn serialize_tuple_variant(
        self,
        _name: &'static str,
        variant_index: u32,
        _variant: &'static str,
        len: usize,
    ) -> Result<Self::SerializeTupleVariant, MemoizeError> {
        self.variant(variant_index);
        self.serialize_tuple(len)
    }

    fn serialize_map(self, _len: Option<usize>) -> Result<Self::SerializeMap, MemoizeError> {
        Err(unsupported(ArgumentKind::Map))
    }

    fn serialize_struct(
        self,
        _name: &'static str,
        len: usize,
    ) -> Result<Self::SerializeStruct, MemoizeError> {
        self.tag(tag::STRUCT);
        self.len(len);
        Ok(self)
    }

    fn serialize_struct_variant(
        self,
        _name: &'static str,
        variant_index: u32,
        _variant: &'static str,
        len: usize,
    ) -> Result<Self::SerializeStructVariant, MemoizeError> {
        self.variant(variant_index);
        self.serialize_struct("", len)
    }
}

impl ser::SerializeTuple for &mut Encoder {
    type Ok = ();
    type Error = MemoizeError;

    fn serialize_element<T: ?Sized + Serialize>(&mut self, value: &T) -> Result<(), MemoizeError> {
        value.serialize(&mut **self)
    }

    fn end(self) -> Result<(), MemoizeError> {
        Ok(())
    }
}

impl ser::SerializeTupleStruct for &mut Encoder {
    type Ok = ();
    type Error = MemoizeError;

    fn serialize_field<T: ?Sized + Serialize>(&mut self, value: &T) -> Result<(), MemoizeError> {
        value.serialize(&mut **self)
    }

    fn end(self) -> Result<(), MemoizeError> {
        Ok(())
    }
}

impl ser::SerializeTupleVariant for &mut Encoder {
    type Ok = ();
    type Error = MemoizeError;

    fn serialize_field<T: ?Sized + Serialize>(&mut self, value: &T) -> Result<(), MemoizeError> {
        value.serialize(&mut **self)
    }

    fn end(self) -> Result<(), MemoizeError> {
        Ok(())
    }
}

impl ser::SerializeStruct for &mut Encoder {
    type Ok = ();
    type Error = MemoizeError;

    fn serialize_field<T: ?Sized + Serialize>(
        &mut self,
        key: &'static str,
        value: &T,
    ) -> Result<(), MemoizeError> {
        self.tag(tag::FIELD);
        self.str(key);
        value.serialize(&mut **self)
    }

    fn end(self) -> Result<(), MemoizeError> {
        Ok(())
    }
}

impl ser::SerializeStructVariant for &mut Encoder {
    type Ok = ();
    type Error = MemoizeError;

    fn serialize_field<T: ?Sized + Serialize>(
        &mut self,
        key: &'static str,
        value: &T,
    ) -> Result<(), MemoizeError> {
        ser::SerializeStruct::serialize_field(self, key, value)
    }

    fn end(self) -> Result<(), MemoizeError> {
        Ok(())
    }
}
