//! Unsigned less-than comparison.

use crate::canonicalize::{Canonical, Canonicalizable, CanonicalizerTool};
use crate::core::constant::Constant;
use crate::core::error::IntrinsicResult;
use crate::core::graph::{Graph, NodeId};
use crate::core::stamp::{mask, IntegerStamp, RangeAnalysis, Stamp};
use crate::lowering::{InlineOp, Lowerable, LoweringBackend, LoweringContext};
use crate::nodes::replace;

/// `x <u y` on ints or longs; the width comes from the operand stamps.
#[derive(Debug, Clone, PartialEq)]
pub struct UnsignedBelowNode {
    x: NodeId,
    y: NodeId,
}

impl UnsignedBelowNode {
    pub fn new(x: NodeId, y: NodeId) -> Self {
        Self { x, y }
    }

    pub fn inputs(&self) -> Vec<NodeId> {
        vec![self.x, self.y]
    }

    pub(crate) fn replace_input(&mut self, old: NodeId, new: NodeId) {
        replace(&mut self.x, old, new);
        replace(&mut self.y, old, new);
    }

    pub fn stamp(&self, _graph: &Graph<'_>) -> Stamp {
        Stamp::boolean()
    }

    fn operand_stamps(&self, graph: &Graph<'_>) -> (IntegerStamp, IntegerStamp) {
        let x = graph.stamp(self.x).as_integer().copied();
        let y = graph.stamp(self.y).as_integer().copied();
        let bits = x.or(y).map_or(32, |stamp| stamp.bits());
        (
            x.unwrap_or_else(|| IntegerStamp::unrestricted(bits)),
            y.unwrap_or_else(|| IntegerStamp::unrestricted(bits)),
        )
    }
}

impl Canonicalizable for UnsignedBelowNode {
    fn canonical(&self, _this: NodeId, tool: &mut CanonicalizerTool<'_, '_>) -> IntrinsicResult<Canonical> {
        if self.x == self.y {
            return Ok(tool.fold(Constant::boolean(false)));
        }
        let graph = tool.graph();
        let (x, y) = self.operand_stamps(graph);
        let decided = match (graph.int_constant(self.x), graph.int_constant(self.y)) {
            (Some(a), Some(b)) if tool.may_fold() => {
                let m = mask(x.bits());
                Some((a as u64 & m) < (b as u64 & m))
            }
            _ if x.unsigned_upper() < y.unsigned_lower() => Some(true),
            _ if x.unsigned_lower() >= y.unsigned_upper() => Some(false),
            _ => None,
        };
        Ok(match decided {
            Some(result) => tool.fold(Constant::boolean(result)),
            None => Canonical::Unchanged,
        })
    }
}

impl Lowerable for UnsignedBelowNode {
    fn generate<B: LoweringBackend>(
        &self,
        this: NodeId,
        ctx: &mut LoweringContext<'_, '_, B>,
    ) -> IntrinsicResult<B::Value> {
        let (x, _) = self.operand_stamps(ctx.graph());
        let args = ctx.operands(&[self.x, self.y])?;
        ctx.inline(this, InlineOp::UnsignedBelow { bits: x.bits() }, &args)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::canonicalize::Canonicalizer;
    use crate::core::test_utils::test::with_test_context;

    #[test]
    fn negative_int_is_large_unsigned() {
        with_test_context(|ctx| {
            let session = ctx.create_session();
            let mut graph = Graph::new(&session);
            let minus_one = graph.add_constant(Constant::Int(-1));
            let one = graph.add_constant(Constant::Int(1));
            let below = graph.add_intrinsic(UnsignedBelowNode::new(one, minus_one)).unwrap();
            let result = Canonicalizer::new(&mut graph).canonicalize(below).unwrap();
            let Canonical::Replace(folded) = result else {
                panic!("expected a fold");
            };
            assert_eq!(graph.constant(folded), Some(Constant::boolean(true)));
        });
    }

    #[test]
    fn disjoint_ranges_decide() {
        with_test_context(|ctx| {
            let session = ctx.create_session();
            let mut graph = Graph::new(&session);
            let small = graph.add_parameter(0, Stamp::Integer(IntegerStamp::range(32, 0, 10)));
            let large = graph.add_parameter(1, Stamp::Integer(IntegerStamp::range(32, 20, 30)));
            let below = graph.add_intrinsic(UnsignedBelowNode::new(small, large)).unwrap();
            let above = graph.add_intrinsic(UnsignedBelowNode::new(large, small)).unwrap();
            let mut canonicalizer = Canonicalizer::new(&mut graph);
            let Canonical::Replace(t) = canonicalizer.canonicalize(below).unwrap() else {
                panic!("expected a fold");
            };
            let Canonical::Replace(f) = canonicalizer.canonicalize(above).unwrap() else {
                panic!("expected a fold");
            };
            assert_eq!(graph.constant(t), Some(Constant::boolean(true)));
            assert_eq!(graph.constant(f), Some(Constant::boolean(false)));
        });
    }
}
