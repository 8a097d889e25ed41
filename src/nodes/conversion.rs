//! Half-precision float conversions.
//!
//! A half is carried as a sign-extended 16-bit value in an int. Conversion
//! to half rounds to nearest-even and keeps the upper NaN payload bits; the
//! reverse conversion is exact. Targets with hardware conversion lower
//! inline, others call the conversion stub.

use std::fmt;

use crate::canonicalize::{Canonical, Canonicalizable, CanonicalizerTool};
use crate::core::constant::Constant;
use crate::core::error::IntrinsicResult;
use crate::core::graph::{Graph, NodeId};
use crate::core::stamp::{IntegerStamp, RangeAnalysis, Stamp};
use crate::lowering::{InlineOp, Lowerable, LoweringBackend, LoweringContext};
use crate::nodes::{replace, IntrinsicNode};
use crate::stubs::{StubKey, ValueKind};
use crate::target::{CpuFeature, CpuFeatureSet};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HalfFloatOp {
    FloatToHalf,
    HalfToFloat,
}

impl HalfFloatOp {
    pub const ALL: &'static [HalfFloatOp] = &[HalfFloatOp::FloatToHalf, HalfFloatOp::HalfToFloat];

    pub fn name(self) -> &'static str {
        match self {
            HalfFloatOp::FloatToHalf => "floatToFloat16",
            HalfFloatOp::HalfToFloat => "float16ToFloat",
        }
    }

    pub fn argument_kind(self) -> ValueKind {
        match self {
            HalfFloatOp::FloatToHalf => ValueKind::Float,
            HalfFloatOp::HalfToFloat => ValueKind::Int,
        }
    }

    pub fn result_kind(self) -> ValueKind {
        match self {
            HalfFloatOp::FloatToHalf => ValueKind::Int,
            HalfFloatOp::HalfToFloat => ValueKind::Float,
        }
    }

    fn inline_op(self) -> InlineOp {
        match self {
            HalfFloatOp::FloatToHalf => InlineOp::FloatToHalf,
            HalfFloatOp::HalfToFloat => InlineOp::HalfToFloat,
        }
    }
}

impl fmt::Display for HalfFloatOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Round `value` to the nearest half, ties to even.
pub fn float_to_half(value: f32) -> i16 {
    let bits = value.to_bits();
    let sign = (bits >> 16) & 0x8000;
    if value.is_nan() {
        let payload = ((bits & 0x007f_e000) >> 13) | ((bits & 0x0000_1ff0) >> 4) | (bits & 0x0000_000f);
        return (sign | 0x7c00 | payload) as u16 as i16;
    }

    let magnitude = bits & 0x7fff_ffff;
    // 65520.0 and above round to infinity.
    if magnitude >= 0x477f_f000 {
        return (sign | 0x7c00) as u16 as i16;
    }
    // 2^-25 and below round to zero.
    if magnitude <= 0x3300_0000 {
        return sign as u16 as i16;
    }

    let exponent = (magnitude >> 23) as i32 - 127;
    let significand = (magnitude & 0x007f_ffff) | 0x0080_0000;
    let (mut half, shift) = if exponent >= -14 {
        ((((exponent + 15) as u32) << 10) + ((significand & 0x007f_ffff) >> 13), 13)
    } else {
        let shift = (-exponent - 1) as u32;
        (significand >> shift, shift)
    };
    let remainder = significand & ((1 << shift) - 1);
    let halfway = 1 << (shift - 1);
    if remainder > halfway || (remainder == halfway && half & 1 == 1) {
        half += 1;
    }
    (sign | half) as u16 as i16
}

/// Widen a half to a float. Exact for every input.
pub fn half_to_float(half: i16) -> f32 {
    let half = half as u16 as u32;
    let sign = (half & 0x8000) << 16;
    let exponent = (half >> 10) & 0x1f;
    let significand = half & 0x3ff;
    match exponent {
        0 => {
            let magnitude = significand as f32 * (1.0 / 16_777_216.0);
            if sign == 0 {
                magnitude
            } else {
                -magnitude
            }
        }
        0x1f => f32::from_bits(sign | 0x7f80_0000 | (significand << 13)),
        _ => f32::from_bits(sign | ((exponent + 112) << 23) | (significand << 13)),
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct HalfFloatNode {
    op: HalfFloatOp,
    value: NodeId,
    runtime_checked: Option<CpuFeatureSet>,
}

impl HalfFloatNode {
    pub fn new(op: HalfFloatOp, value: NodeId) -> Self {
        Self {
            op,
            value,
            runtime_checked: None,
        }
    }

    pub fn with_runtime_checked(mut self, features: CpuFeatureSet) -> Self {
        self.runtime_checked = Some(features);
        self
    }

    pub fn op(&self) -> HalfFloatOp {
        self.op
    }

    pub fn runtime_checked(&self) -> Option<&CpuFeatureSet> {
        self.runtime_checked.as_ref()
    }

    pub fn inputs(&self) -> Vec<NodeId> {
        vec![self.value]
    }

    pub(crate) fn replace_input(&mut self, old: NodeId, new: NodeId) {
        replace(&mut self.value, old, new);
    }

    pub fn stamp(&self, _graph: &Graph<'_>) -> Stamp {
        match self.op {
            HalfFloatOp::FloatToHalf => Stamp::Integer(IntegerStamp::range(32, i16::MIN as i64, i16::MAX as i64)),
            HalfFloatOp::HalfToFloat => Stamp::float(),
        }
    }
}

impl Canonicalizable for HalfFloatNode {
    fn canonical(&self, _this: NodeId, tool: &mut CanonicalizerTool<'_, '_>) -> IntrinsicResult<Canonical> {
        let graph = tool.graph();
        if self.op == HalfFloatOp::FloatToHalf {
            if let Some(IntrinsicNode::HalfFloat(inner)) = graph.intrinsic(self.value) {
                let fits = graph
                    .stamp(inner.value)
                    .as_integer()
                    .is_some_and(|stamp| stamp.fits_signed(16));
                if inner.op == HalfFloatOp::HalfToFloat && fits {
                    return Ok(Canonical::Replace(inner.value));
                }
            }
        }
        if !tool.may_fold() {
            return Ok(Canonical::Unchanged);
        }
        let folded = match (self.op, graph.constant(self.value)) {
            (HalfFloatOp::FloatToHalf, Some(Constant::Float(value))) => Constant::Int(float_to_half(value) as i32),
            (HalfFloatOp::HalfToFloat, Some(Constant::Int(value))) => Constant::Float(half_to_float(value as i16)),
            _ => return Ok(Canonical::Unchanged),
        };
        Ok(tool.fold(folded))
    }
}

impl Lowerable for HalfFloatNode {
    fn generate<B: LoweringBackend>(
        &self,
        this: NodeId,
        ctx: &mut LoweringContext<'_, '_, B>,
    ) -> IntrinsicResult<B::Value> {
        let features = ctx.effective_features(self.runtime_checked.as_ref())?;
        let args = [ctx.operand(self.value)?];
        if features.contains(CpuFeature::F16c) || features.contains(CpuFeature::Fphp) {
            return ctx.inline(this, self.op.inline_op(), &args);
        }
        ctx.call_stub(this, StubKey::HalfFloat { op: self.op }, self.runtime_checked.as_ref(), &args)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rounds_to_nearest_even() {
        assert_eq!(float_to_half(1.0), 0x3c00);
        assert_eq!(float_to_half(-2.0), 0xc000u16 as i16);
        assert_eq!(float_to_half(65504.0), 0x7bff);
        assert_eq!(float_to_half(65520.0), 0x7c00);
        assert_eq!(float_to_half(-0.0), i16::MIN);
        // 1 + 2^-11 is halfway between 1.0 and the next half; ties go to the even 1.0.
        assert_eq!(float_to_half(1.0 + 1.0 / 2048.0), 0x3c00);
        assert_eq!(float_to_half(1.0 + 3.0 / 2048.0), 0x3c02);
    }

    #[test]
    fn subnormal_halves() {
        let smallest = 1.0 / 16_777_216.0;
        assert_eq!(float_to_half(smallest), 1);
        assert_eq!(float_to_half(smallest / 2.0), 0);
        assert_eq!(float_to_half(smallest * 1.5), 2);
        assert_eq!(half_to_float(1), smallest);
        assert_eq!(half_to_float(0x0400), 1.0 / 16384.0);
    }

    #[test]
    fn every_half_survives_widening() {
        for raw in i16::MIN..=i16::MAX {
            assert_eq!(float_to_half(half_to_float(raw)), raw, "half {raw:#06x}");
        }
    }

    #[test]
    fn infinities_and_nan() {
        assert_eq!(half_to_float(0x7c00), f32::INFINITY);
        assert_eq!(half_to_float(0xfc00u16 as i16), f32::NEG_INFINITY);
        assert!(half_to_float(0x7e00).is_nan());
        assert_eq!(float_to_half(f32::NAN), 0x7e00);
    }
}
