//! Element descriptors: how array contents are interpreted by an intrinsic.
//!
//! Array intrinsics read their operands through a [`Stride`] (the element byte
//! width). Values read through a stride are always zero-extended; sign only
//! matters for the [`ElementKind`] of the backing array.

use std::fmt;

/// Kind of the elements stored in an array.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ElementKind {
    Boolean,
    Byte,
    Char,
    Short,
    Int,
    Long,
    Float,
    Double,
}

impl ElementKind {
    pub const ALL: &'static [ElementKind] = &[
        ElementKind::Boolean,
        ElementKind::Byte,
        ElementKind::Char,
        ElementKind::Short,
        ElementKind::Int,
        ElementKind::Long,
        ElementKind::Float,
        ElementKind::Double,
    ];

    pub fn bytes(self) -> usize {
        match self {
            ElementKind::Boolean | ElementKind::Byte => 1,
            ElementKind::Char | ElementKind::Short => 2,
            ElementKind::Int | ElementKind::Float => 4,
            ElementKind::Long | ElementKind::Double => 8,
        }
    }

    pub fn is_signed(self) -> bool {
        !matches!(self, ElementKind::Boolean | ElementKind::Char)
    }

    pub fn is_float(self) -> bool {
        matches!(self, ElementKind::Float | ElementKind::Double)
    }

    pub fn stride(self) -> Stride {
        match self.bytes() {
            1 => Stride::S1,
            2 => Stride::S2,
            4 => Stride::S4,
            _ => Stride::S8,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            ElementKind::Boolean => "Boolean",
            ElementKind::Byte => "Byte",
            ElementKind::Char => "Char",
            ElementKind::Short => "Short",
            ElementKind::Int => "Int",
            ElementKind::Long => "Long",
            ElementKind::Float => "Float",
            ElementKind::Double => "Double",
        }
    }
}

impl fmt::Display for ElementKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Byte width used to read array elements.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Stride {
    S1,
    S2,
    S4,
    S8,
}

impl Stride {
    /// Strides array search and comparison stubs are generated for.
    pub const ARRAY_STRIDES: &'static [Stride] = &[Stride::S1, Stride::S2, Stride::S4];

    pub fn bytes(self) -> usize {
        1 << self.log2()
    }

    pub fn log2(self) -> u32 {
        match self {
            Stride::S1 => 0,
            Stride::S2 => 1,
            Stride::S4 => 2,
            Stride::S8 => 3,
        }
    }

    /// Largest value readable through this stride.
    pub fn max_value(self) -> u64 {
        match self {
            Stride::S8 => u64::MAX,
            _ => (1u64 << (self.bytes() * 8)) - 1,
        }
    }

    /// Read the little-endian element at `byte_index`, zero-extended.
    pub fn read(self, data: &[u8], byte_index: usize) -> Option<u64> {
        let end = byte_index.checked_add(self.bytes())?;
        let raw = data.get(byte_index..end)?;
        let mut buf = [0u8; 8];
        buf[..raw.len()].copy_from_slice(raw);
        Some(u64::from_le_bytes(buf))
    }

    pub fn name(self) -> &'static str {
        match self {
            Stride::S1 => "S1",
            Stride::S2 => "S2",
            Stride::S4 => "S4",
            Stride::S8 => "S8",
        }
    }
}

impl fmt::Display for Stride {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
