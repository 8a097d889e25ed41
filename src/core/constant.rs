//! Compile-time constants.
//!
//! Array constants point into the compilation arena. Object identity of an
//! array constant is its `object_id`, handed out by the session, so two graph
//! nodes referring to the same heap array compare as the same object even when
//! they are distinct nodes.

use std::fmt;

use super::element::ElementKind;
use super::stamp::{FloatStamp, IntegerStamp, Stamp};

/// Identity of a heap array known to the compiler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectId(pub u32);

/// A constant array whose contents live in the compilation arena.
#[derive(Debug, Clone, Copy)]
pub struct ArrayConstant<'arena> {
    object_id: ObjectId,
    kind: ElementKind,
    data: &'arena [u8],
    stable: bool,
}

impl<'arena> ArrayConstant<'arena> {
    pub(crate) fn new(object_id: ObjectId, kind: ElementKind, data: &'arena [u8], stable: bool) -> Self {
        Self {
            object_id,
            kind,
            data,
            stable,
        }
    }

    pub fn object_id(&self) -> ObjectId {
        self.object_id
    }

    pub fn kind(&self) -> ElementKind {
        self.kind
    }

    /// Raw little-endian contents.
    pub fn bytes(&self) -> &'arena [u8] {
        self.data
    }

    pub fn length(&self) -> usize {
        self.data.len() / self.kind.bytes()
    }

    /// Whether the contents are known not to change (e.g. a final field with a
    /// stable annotation, or an immutable string backing array). Only stable
    /// arrays may be read at compile time.
    pub fn is_stable(&self) -> bool {
        self.stable
    }
}

impl PartialEq for ArrayConstant<'_> {
    fn eq(&self, other: &Self) -> bool {
        self.object_id == other.object_id
    }
}

/// A compile-time constant value.
#[derive(Debug, Clone, Copy)]
pub enum Constant<'arena> {
    Int(i32),
    Long(i64),
    Float(f32),
    Double(f64),
    Null,
    Array(ArrayConstant<'arena>),
}

/// Hashable key of scalar constants, used for de-duplication.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) enum ScalarKey {
    Int(i32),
    Long(i64),
    Float(u32),
    Double(u64),
    Null,
}

impl<'arena> Constant<'arena> {
    pub fn boolean(value: bool) -> Self {
        Constant::Int(value as i32)
    }

    /// Integer value of `Int`/`Long` constants, sign-extended.
    pub fn as_long(&self) -> Option<i64> {
        match *self {
            Constant::Int(v) => Some(v as i64),
            Constant::Long(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i32> {
        match *self {
            Constant::Int(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_float(&self) -> Option<f32> {
        match *self {
            Constant::Float(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_double(&self) -> Option<f64> {
        match *self {
            Constant::Double(v) => Some(v),
            _ => None,
        }
    }

    pub fn stamp(&self) -> Stamp {
        match *self {
            Constant::Int(v) => Stamp::Integer(IntegerStamp::constant(32, v as i64)),
            Constant::Long(v) => Stamp::Integer(IntegerStamp::constant(64, v)),
            Constant::Float(v) => Stamp::Float(FloatStamp::constant(32, v as f64)),
            Constant::Double(v) => Stamp::Float(FloatStamp::constant(64, v)),
            Constant::Null => Stamp::Object { non_null: false },
            Constant::Array(_) => Stamp::array(),
        }
    }

    pub(crate) fn scalar_key(&self) -> Option<ScalarKey> {
        match *self {
            Constant::Int(v) => Some(ScalarKey::Int(v)),
            Constant::Long(v) => Some(ScalarKey::Long(v)),
            Constant::Float(v) => Some(ScalarKey::Float(v.to_bits())),
            Constant::Double(v) => Some(ScalarKey::Double(v.to_bits())),
            Constant::Null => Some(ScalarKey::Null),
            Constant::Array(_) => None,
        }
    }
}

/// Constants are equal when they are bit-identical (or the same array object).
impl PartialEq for Constant<'_> {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Constant::Array(a), Constant::Array(b)) => a == b,
            _ => self.scalar_key().is_some() && self.scalar_key() == other.scalar_key(),
        }
    }
}

impl fmt::Display for Constant<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Constant::Int(v) => write!(f, "{v}i"),
            Constant::Long(v) => write!(f, "{v}L"),
            Constant::Float(v) => write!(f, "{v}f"),
            Constant::Double(v) => write!(f, "{v}d"),
            Constant::Null => f.write_str("null"),
            Constant::Array(a) => write!(f, "{}[{}]#{}", a.kind(), a.length(), a.object_id().0),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn float_constants_compare_by_bits() {
        assert_eq!(Constant::Float(f32::NAN), Constant::Float(f32::NAN));
        assert_ne!(Constant::Double(0.0), Constant::Double(-0.0));
        assert_ne!(Constant::Int(1), Constant::Long(1));
    }
}
