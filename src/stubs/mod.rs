// This module describes the pre-generated stub routines intrinsic nodes may call. A stub key
// names one semantic operation together with its static parameterization (element widths,
// search variant and value count, encoding, cipher mode, math function). Each key maps to a
// small family of descriptors, one per feature tier the routine was compiled for. Keys are
// validated before lookup so that a malformed combination coming from a node constructor or a
// front-end is reported as the invariant it violates instead of as a missing stub.

//! Stub keys, descriptors and the process-wide registry.

pub mod descriptor;
pub mod registry;

pub use descriptor::{StubDescriptor, ValueKind};
pub use registry::StubRegistry;

use std::fmt;

use crate::core::element::{ElementKind, Stride};
use crate::core::error::{guarantee, IntrinsicResult};
use crate::nodes::cipher::CipherMode;
use crate::nodes::conversion::HalfFloatOp;
use crate::nodes::index_of::{check_search_shape, SearchVariant};
use crate::nodes::math::{BinaryMathOp, UnaryMathOp};
use crate::nodes::string_attributes::StringEncoding;

/// Static parameterization of a stub family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StubKey {
    IndexOf {
        stride: Stride,
        variant: SearchVariant,
        value_count: usize,
    },
    RegionCompareTo {
        stride_a: Stride,
        stride_b: Stride,
    },
    ArrayEquals {
        kind: ElementKind,
    },
    RegionEquals {
        stride_a: Stride,
        stride_b: Stride,
    },
    StringAttributes {
        encoding: StringEncoding,
        assume_valid: bool,
    },
    Aes {
        mode: CipherMode,
    },
    UnaryMath {
        op: UnaryMathOp,
    },
    BinaryMath {
        op: BinaryMathOp,
    },
    HalfFloat {
        op: HalfFloatOp,
    },
}

/// Strides of a two-array operation: both array strides, the first at least as wide.
pub(crate) fn check_dual_strides(stride_a: Stride, stride_b: Stride) -> IntrinsicResult<()> {
    guarantee(
        Stride::ARRAY_STRIDES.contains(&stride_a) && Stride::ARRAY_STRIDES.contains(&stride_b),
        "array-stride",
        || format!("strides {stride_a}/{stride_b} are not array strides"),
    )?;
    guarantee(stride_a >= stride_b, "dual-array-stride-order", || {
        format!("first stride {stride_a} is narrower than second stride {stride_b}")
    })
}

impl StubKey {
    /// Check the combination rules of the key.
    pub fn validate(&self) -> IntrinsicResult<()> {
        match *self {
            StubKey::IndexOf {
                stride,
                variant,
                value_count,
            } => check_search_shape(stride, variant, value_count),
            StubKey::RegionCompareTo { stride_a, stride_b }
            | StubKey::RegionEquals { stride_a, stride_b } => check_dual_strides(stride_a, stride_b),
            StubKey::StringAttributes {
                encoding,
                assume_valid,
            } => encoding.check_assume_valid(assume_valid),
            StubKey::ArrayEquals { .. }
            | StubKey::Aes { .. }
            | StubKey::UnaryMath { .. }
            | StubKey::BinaryMath { .. }
            | StubKey::HalfFloat { .. } => Ok(()),
        }
    }

    /// Family name, as accepted by the `stubtable --op` filter.
    pub fn family(&self) -> &'static str {
        match self {
            StubKey::IndexOf { .. } => "indexOf",
            StubKey::RegionCompareTo { .. } => "compareTo",
            StubKey::ArrayEquals { .. } => "equals",
            StubKey::RegionEquals { .. } => "regionEquals",
            StubKey::StringAttributes { .. } => "stringAttributes",
            StubKey::Aes { .. } => "aes",
            StubKey::UnaryMath { .. } | StubKey::BinaryMath { .. } => "math",
            StubKey::HalfFloat { .. } => "halfFloat",
        }
    }

    /// Link name of the default variant.
    pub fn base_name(&self) -> String {
        match self {
            StubKey::IndexOf {
                stride,
                variant,
                value_count,
            } => format!("arrayIndexOf{}{value_count}{stride}", variant.name()),
            StubKey::RegionCompareTo { stride_a, stride_b } => {
                format!("arrayRegionCompareTo{stride_a}{stride_b}")
            }
            StubKey::ArrayEquals { kind } => format!("arrayEquals{kind}"),
            StubKey::RegionEquals { stride_a, stride_b } => {
                format!("arrayRegionEquals{stride_a}{stride_b}")
            }
            StubKey::StringAttributes {
                encoding,
                assume_valid,
            } => {
                if *assume_valid {
                    format!("calcStringAttributes{}Valid", encoding.name())
                } else {
                    format!("calcStringAttributes{}", encoding.name())
                }
            }
            StubKey::Aes { mode } => format!("aes{}", mode.name()),
            StubKey::UnaryMath { op } => format!("arith{}", op.name()),
            StubKey::BinaryMath { op } => format!("arith{}", op.name()),
            StubKey::HalfFloat { op } => op.name().to_string(),
        }
    }
}

impl fmt::Display for StubKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.base_name())
    }
}
