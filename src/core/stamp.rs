//! Conservative value-range information ("stamps").
//!
//! Stamps are supplied by the surrounding compiler's range analysis; the
//! intrinsic layer only consumes them to prove facts without evaluating a node.

use super::graph::NodeId;

/// Bit mask covering the low `bits` bits.
pub fn mask(bits: u32) -> u64 {
    if bits >= 64 {
        u64::MAX
    } else {
        (1u64 << bits) - 1
    }
}

/// Range and known-bits information for an integer value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IntegerStamp {
    bits: u32,
    lower: i64,
    upper: i64,
    must_be_set: u64,
    may_be_set: u64,
}

impl IntegerStamp {
    pub fn new(bits: u32, lower: i64, upper: i64, must_be_set: u64, may_be_set: u64) -> Self {
        let m = mask(bits);
        Self {
            bits,
            lower,
            upper,
            must_be_set: must_be_set & m,
            may_be_set: may_be_set & m,
        }
    }

    /// Unrestricted stamp for a `bits`-wide value.
    pub fn unrestricted(bits: u32) -> Self {
        let (lower, upper) = Self::signed_bounds(bits);
        Self::new(bits, lower, upper, 0, mask(bits))
    }

    /// Signed range only; known bits are derived where possible.
    pub fn range(bits: u32, lower: i64, upper: i64) -> Self {
        let m = mask(bits);
        let (must, may) = if lower >= 0 {
            // Every value in [lower, upper] fits under the highest bit of upper.
            let top = 64 - (upper as u64).leading_zeros();
            (0, mask(top))
        } else {
            (0, m)
        };
        Self::new(bits, lower, upper, must, may & m)
    }

    /// Only the given known bits; the range follows from them.
    pub fn known_bits(bits: u32, must_be_set: u64, may_be_set: u64) -> Self {
        let (lower, upper) = Self::signed_bounds(bits);
        Self::new(bits, lower, upper, must_be_set, may_be_set)
    }

    pub fn constant(bits: u32, value: i64) -> Self {
        let raw = value as u64 & mask(bits);
        Self::new(bits, value, value, raw, raw)
    }

    fn signed_bounds(bits: u32) -> (i64, i64) {
        if bits >= 64 {
            (i64::MIN, i64::MAX)
        } else {
            (-(1i64 << (bits - 1)), (1i64 << (bits - 1)) - 1)
        }
    }

    pub fn bits(&self) -> u32 {
        self.bits
    }

    pub fn lower(&self) -> i64 {
        self.lower
    }

    pub fn upper(&self) -> i64 {
        self.upper
    }

    pub fn must_be_set(&self) -> u64 {
        self.must_be_set
    }

    pub fn may_be_set(&self) -> u64 {
        self.may_be_set
    }

    pub fn as_constant(&self) -> Option<i64> {
        if self.lower == self.upper {
            Some(self.lower)
        } else if self.must_be_set == self.may_be_set {
            Some(sign_extend(self.must_be_set, self.bits))
        } else {
            None
        }
    }

    /// Whether every value of this stamp fits in `bits` signed bits.
    pub fn fits_signed(&self, bits: u32) -> bool {
        let (lower, upper) = Self::signed_bounds(bits);
        self.lower >= lower && self.upper <= upper
    }

    /// Smallest value under unsigned interpretation.
    pub fn unsigned_lower(&self) -> u64 {
        let m = mask(self.bits);
        let from_range = if self.lower >= 0 || self.upper < 0 {
            self.lower as u64 & m
        } else {
            0
        };
        from_range.max(self.must_be_set)
    }

    /// Largest value under unsigned interpretation.
    pub fn unsigned_upper(&self) -> u64 {
        let m = mask(self.bits);
        let from_range = if self.lower >= 0 || self.upper < 0 {
            self.upper as u64 & m
        } else {
            m
        };
        from_range.min(self.may_be_set)
    }
}

/// Sign-extend the low `bits` bits of `raw`.
pub fn sign_extend(raw: u64, bits: u32) -> i64 {
    if bits >= 64 {
        raw as i64
    } else {
        let shift = 64 - bits;
        ((raw << shift) as i64) >> shift
    }
}

/// Range information for a floating point value.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FloatStamp {
    pub bits: u32,
    pub lower: f64,
    pub upper: f64,
    pub non_nan: bool,
    pub may_be_negative_zero: bool,
}

impl FloatStamp {
    pub fn unrestricted(bits: u32) -> Self {
        Self {
            bits,
            lower: f64::NEG_INFINITY,
            upper: f64::INFINITY,
            non_nan: false,
            may_be_negative_zero: true,
        }
    }

    pub fn range(bits: u32, lower: f64, upper: f64) -> Self {
        Self {
            bits,
            lower,
            upper,
            non_nan: true,
            may_be_negative_zero: lower <= 0.0 && upper >= 0.0,
        }
    }

    pub fn constant(bits: u32, value: f64) -> Self {
        Self {
            bits,
            lower: value,
            upper: value,
            non_nan: !value.is_nan(),
            may_be_negative_zero: value == 0.0 && value.is_sign_negative(),
        }
    }

    /// Whether the stamp rules out both -0.0 and negative infinity.
    pub fn excludes_negative_zero_and_infinity(&self) -> bool {
        self.lower > f64::NEG_INFINITY && !self.may_be_negative_zero
    }
}

/// Value-range information of a node.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Stamp {
    Integer(IntegerStamp),
    Float(FloatStamp),
    Object { non_null: bool },
    Void,
}

impl Stamp {
    pub fn int() -> Self {
        Stamp::Integer(IntegerStamp::unrestricted(32))
    }

    pub fn long() -> Self {
        Stamp::Integer(IntegerStamp::unrestricted(64))
    }

    /// Java-style `short` held in a 32-bit value.
    pub fn short() -> Self {
        Stamp::Integer(IntegerStamp::range(32, i16::MIN as i64, i16::MAX as i64))
    }

    pub fn boolean() -> Self {
        Stamp::Integer(IntegerStamp::range(32, 0, 1))
    }

    pub fn float() -> Self {
        Stamp::Float(FloatStamp::unrestricted(32))
    }

    pub fn double() -> Self {
        Stamp::Float(FloatStamp::unrestricted(64))
    }

    pub fn array() -> Self {
        Stamp::Object { non_null: true }
    }

    pub fn as_integer(&self) -> Option<&IntegerStamp> {
        match self {
            Stamp::Integer(stamp) => Some(stamp),
            _ => None,
        }
    }

    pub fn as_float(&self) -> Option<&FloatStamp> {
        match self {
            Stamp::Float(stamp) => Some(stamp),
            _ => None,
        }
    }
}

/// Conservative range facility of the surrounding compiler.
pub trait RangeAnalysis {
    fn stamp(&self, node: NodeId) -> Stamp;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unsigned_bounds_of_mixed_sign_range() {
        let stamp = IntegerStamp::range(32, -1, 5);
        assert_eq!(stamp.unsigned_lower(), 0);
        assert_eq!(stamp.unsigned_upper(), 0xFFFF_FFFF);

        let positive = IntegerStamp::range(32, 3, 9);
        assert_eq!(positive.unsigned_lower(), 3);
        assert_eq!(positive.unsigned_upper(), 9);

        let negative = IntegerStamp::range(32, -4, -2);
        assert_eq!(negative.unsigned_lower(), 0xFFFF_FFFC);
        assert_eq!(negative.unsigned_upper(), 0xFFFF_FFFE);
    }

    #[test]
    fn known_bits_tighten_unsigned_bounds() {
        let stamp = IntegerStamp::known_bits(32, 0x100, 0x1FF);
        assert_eq!(stamp.unsigned_lower(), 0x100);
        assert_eq!(stamp.unsigned_upper(), 0x1FF);
    }

    #[test]
    fn constant_from_known_bits() {
        let stamp = IntegerStamp::known_bits(32, 0xFFFF_FFFF, 0xFFFF_FFFF);
        assert_eq!(stamp.as_constant(), Some(-1));
    }

    #[test]
    fn short_stamp_fits_sixteen_bits() {
        let stamp = *Stamp::short().as_integer().unwrap();
        assert!(stamp.fits_signed(16));
        assert!(!IntegerStamp::unrestricted(32).fits_signed(16));
    }
}
