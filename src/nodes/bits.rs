// This module implements the bit-manipulation intrinsics on 32- and 64-bit integers: population
// count, leading and trailing zero count, and byte reversal. Counts produce an int regardless of
// the operand width; byte reversal keeps the operand width. Besides plain constant folding the
// counts fold from known bits alone: the integer stamp bounds each count between what the bits
// that must be set and the bits that may be set imply, and when those bounds meet the result is
// known. Byte reversal applied twice cancels. All of them lower inline; the backend picks the
// instruction form from the effective features.

//! Bit counting and byte reversal nodes.

use crate::canonicalize::{Canonical, Canonicalizable, CanonicalizerTool};
use crate::core::constant::Constant;
use crate::core::error::{guarantee, IntrinsicResult};
use crate::core::graph::{Graph, NodeId};
use crate::core::stamp::{mask, sign_extend, IntegerStamp, RangeAnalysis, Stamp};
use crate::lowering::{InlineOp, Lowerable, LoweringBackend, LoweringContext};
use crate::nodes::{replace, IntrinsicNode};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BitOp {
    BitCount,
    LeadingZeros,
    TrailingZeros,
    ReverseBytes,
}

impl BitOp {
    pub fn name(self) -> &'static str {
        match self {
            BitOp::BitCount => "BitCount",
            BitOp::LeadingZeros => "LeadingZeros",
            BitOp::TrailingZeros => "TrailingZeros",
            BitOp::ReverseBytes => "ReverseBytes",
        }
    }

    /// Evaluate on the low `bits` bits of `raw`.
    pub fn evaluate(self, bits: u32, raw: u64) -> i64 {
        let raw = raw & mask(bits);
        match self {
            BitOp::BitCount => raw.count_ones() as i64,
            BitOp::LeadingZeros => (raw.leading_zeros() - (64 - bits)) as i64,
            BitOp::TrailingZeros => raw.trailing_zeros().min(bits) as i64,
            BitOp::ReverseBytes => {
                let reversed = raw.swap_bytes() >> (64 - bits);
                sign_extend(reversed, bits)
            }
        }
    }

    /// Result bounds implied by known bits, for the counting operations.
    pub fn count_bounds(self, stamp: &IntegerStamp) -> Option<(i64, i64)> {
        let bits = stamp.bits();
        let must = stamp.must_be_set();
        let may = stamp.may_be_set();
        match self {
            BitOp::BitCount => Some((must.count_ones() as i64, may.count_ones() as i64)),
            BitOp::LeadingZeros => Some((self.evaluate(bits, may), self.evaluate(bits, must))),
            BitOp::TrailingZeros => Some((self.evaluate(bits, may), self.evaluate(bits, must))),
            BitOp::ReverseBytes => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct BitOpNode {
    op: BitOp,
    bits: u32,
    value: NodeId,
}

impl BitOpNode {
    pub fn new(op: BitOp, bits: u32, value: NodeId) -> IntrinsicResult<Self> {
        guarantee(bits == 32 || bits == 64, "bit-op-width", || {
            format!("{} operates on 32 or 64 bits, not {bits}", op.name())
        })?;
        Ok(Self { op, bits, value })
    }

    pub fn op(&self) -> BitOp {
        self.op
    }

    pub fn bits(&self) -> u32 {
        self.bits
    }

    pub fn inputs(&self) -> Vec<NodeId> {
        vec![self.value]
    }

    pub(crate) fn replace_input(&mut self, old: NodeId, new: NodeId) {
        replace(&mut self.value, old, new);
    }

    fn input_stamp(&self, graph: &Graph<'_>) -> IntegerStamp {
        match graph.stamp(self.value) {
            Stamp::Integer(stamp) if stamp.bits() == self.bits => stamp,
            _ => IntegerStamp::unrestricted(self.bits),
        }
    }

    pub fn stamp(&self, graph: &Graph<'_>) -> Stamp {
        match self.op.count_bounds(&self.input_stamp(graph)) {
            Some((lower, upper)) => Stamp::Integer(IntegerStamp::range(32, lower, upper)),
            None => Stamp::Integer(IntegerStamp::unrestricted(self.bits)),
        }
    }

    fn result(&self, value: i64) -> Constant<'static> {
        if self.op == BitOp::ReverseBytes && self.bits == 64 {
            Constant::Long(value)
        } else {
            Constant::Int(value as i32)
        }
    }
}

impl Canonicalizable for BitOpNode {
    fn canonical(&self, _this: NodeId, tool: &mut CanonicalizerTool<'_, '_>) -> IntrinsicResult<Canonical> {
        let graph = tool.graph();
        if self.op == BitOp::ReverseBytes {
            if let Some(IntrinsicNode::BitOp(inner)) = graph.intrinsic(self.value) {
                if inner.op == BitOp::ReverseBytes && inner.bits == self.bits {
                    return Ok(Canonical::Replace(inner.value));
                }
            }
        }
        if !tool.may_fold() {
            return Ok(Canonical::Unchanged);
        }
        if let Some(value) = graph.int_constant(self.value) {
            let result = self.result(self.op.evaluate(self.bits, value as u64));
            return Ok(tool.fold(result));
        }
        match self.op.count_bounds(&self.input_stamp(graph)) {
            Some((lower, upper)) if lower == upper => Ok(tool.fold(self.result(lower))),
            _ => Ok(Canonical::Unchanged),
        }
    }
}

impl Lowerable for BitOpNode {
    fn generate<B: LoweringBackend>(
        &self,
        this: NodeId,
        ctx: &mut LoweringContext<'_, '_, B>,
    ) -> IntrinsicResult<B::Value> {
        let features = ctx.effective_features(None)?;
        let bits = self.bits;
        let op = match self.op {
            BitOp::BitCount => InlineOp::BitCount { bits, features },
            BitOp::LeadingZeros => InlineOp::LeadingZeros { bits, features },
            BitOp::TrailingZeros => InlineOp::TrailingZeros { bits, features },
            BitOp::ReverseBytes => InlineOp::ReverseBytes { bits },
        };
        let args = [ctx.operand(self.value)?];
        ctx.inline(this, op, &args)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn evaluation_respects_width() {
        assert_eq!(BitOp::LeadingZeros.evaluate(32, 1), 31);
        assert_eq!(BitOp::LeadingZeros.evaluate(64, 1), 63);
        assert_eq!(BitOp::TrailingZeros.evaluate(32, 0), 32);
        assert_eq!(BitOp::BitCount.evaluate(32, u64::MAX), 32);
        assert_eq!(BitOp::ReverseBytes.evaluate(32, 0x1234_5678), 0x7856_3412);
        assert_eq!(BitOp::ReverseBytes.evaluate(32, 0x80), 0x8000_0000u32 as i32 as i64);
    }

    #[test]
    fn known_bits_bound_counts() {
        // Bit 4 is set, bits above 7 are clear.
        let stamp = IntegerStamp::known_bits(32, 0x10, 0xF0);
        assert_eq!(BitOp::BitCount.count_bounds(&stamp), Some((1, 4)));
        assert_eq!(BitOp::LeadingZeros.count_bounds(&stamp), Some((24, 27)));
        assert_eq!(BitOp::TrailingZeros.count_bounds(&stamp), Some((4, 4)));
    }

    #[test]
    fn width_is_validated() {
        assert!(BitOpNode::new(BitOp::BitCount, 16, NodeId::from_index(0)).is_err());
    }
}
