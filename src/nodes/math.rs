//! Transcendental math nodes.
//!
//! All operations are on doubles and lower to stub calls. Constant operands
//! fold through the host's libm; `pow` additionally simplifies for the
//! exponents 0, 1, 2, -1 and 0.5.

use std::fmt;

use crate::canonicalize::{Canonical, Canonicalizable, CanonicalizerTool};
use crate::core::constant::Constant;
use crate::core::error::IntrinsicResult;
use crate::core::graph::{ArithNode, Graph, NodeId};
use crate::core::stamp::Stamp;
use crate::lowering::{Lowerable, LoweringBackend, LoweringContext};
use crate::nodes::replace;
use crate::stubs::StubKey;
use crate::target::CpuFeatureSet;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UnaryMathOp {
    Sin,
    Cos,
    Tan,
    Log,
    Log10,
    Exp,
}

impl UnaryMathOp {
    pub const ALL: &'static [UnaryMathOp] = &[
        UnaryMathOp::Sin,
        UnaryMathOp::Cos,
        UnaryMathOp::Tan,
        UnaryMathOp::Log,
        UnaryMathOp::Log10,
        UnaryMathOp::Exp,
    ];

    pub fn name(self) -> &'static str {
        match self {
            UnaryMathOp::Sin => "Sin",
            UnaryMathOp::Cos => "Cos",
            UnaryMathOp::Tan => "Tan",
            UnaryMathOp::Log => "Log",
            UnaryMathOp::Log10 => "Log10",
            UnaryMathOp::Exp => "Exp",
        }
    }

    pub fn evaluate(self, x: f64) -> f64 {
        match self {
            UnaryMathOp::Sin => x.sin(),
            UnaryMathOp::Cos => x.cos(),
            UnaryMathOp::Tan => x.tan(),
            UnaryMathOp::Log => x.ln(),
            UnaryMathOp::Log10 => x.log10(),
            UnaryMathOp::Exp => x.exp(),
        }
    }
}

impl fmt::Display for UnaryMathOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BinaryMathOp {
    Pow,
}

impl BinaryMathOp {
    pub const ALL: &'static [BinaryMathOp] = &[BinaryMathOp::Pow];

    pub fn name(self) -> &'static str {
        match self {
            BinaryMathOp::Pow => "Pow",
        }
    }

    pub fn evaluate(self, x: f64, y: f64) -> f64 {
        match self {
            BinaryMathOp::Pow => x.powf(y),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct UnaryMathNode {
    op: UnaryMathOp,
    value: NodeId,
    runtime_checked: Option<CpuFeatureSet>,
}

impl UnaryMathNode {
    pub fn new(op: UnaryMathOp, value: NodeId) -> Self {
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

    pub fn op(&self) -> UnaryMathOp {
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
        Stamp::double()
    }
}

impl Canonicalizable for UnaryMathNode {
    fn canonical(&self, _this: NodeId, tool: &mut CanonicalizerTool<'_, '_>) -> IntrinsicResult<Canonical> {
        if !tool.may_fold() {
            return Ok(Canonical::Unchanged);
        }
        Ok(match tool.graph().constant(self.value).and_then(|c| c.as_double()) {
            Some(x) => tool.fold(Constant::Double(self.op.evaluate(x))),
            None => Canonical::Unchanged,
        })
    }
}

impl Lowerable for UnaryMathNode {
    fn generate<B: LoweringBackend>(
        &self,
        this: NodeId,
        ctx: &mut LoweringContext<'_, '_, B>,
    ) -> IntrinsicResult<B::Value> {
        let args = [ctx.operand(self.value)?];
        ctx.call_stub(this, StubKey::UnaryMath { op: self.op }, self.runtime_checked.as_ref(), &args)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct BinaryMathNode {
    op: BinaryMathOp,
    x: NodeId,
    y: NodeId,
    runtime_checked: Option<CpuFeatureSet>,
}

impl BinaryMathNode {
    pub fn new(op: BinaryMathOp, x: NodeId, y: NodeId) -> Self {
        Self {
            op,
            x,
            y,
            runtime_checked: None,
        }
    }

    pub fn pow(x: NodeId, y: NodeId) -> Self {
        Self::new(BinaryMathOp::Pow, x, y)
    }

    pub fn with_runtime_checked(mut self, features: CpuFeatureSet) -> Self {
        self.runtime_checked = Some(features);
        self
    }

    pub fn op(&self) -> BinaryMathOp {
        self.op
    }

    pub fn runtime_checked(&self) -> Option<&CpuFeatureSet> {
        self.runtime_checked.as_ref()
    }

    pub fn inputs(&self) -> Vec<NodeId> {
        vec![self.x, self.y]
    }

    pub(crate) fn replace_input(&mut self, old: NodeId, new: NodeId) {
        replace(&mut self.x, old, new);
        replace(&mut self.y, old, new);
    }

    pub fn stamp(&self, _graph: &Graph<'_>) -> Stamp {
        Stamp::double()
    }
}

impl Canonicalizable for BinaryMathNode {
    fn canonical(&self, _this: NodeId, tool: &mut CanonicalizerTool<'_, '_>) -> IntrinsicResult<Canonical> {
        let graph = tool.graph();
        let x = graph.constant(self.x).and_then(|c| c.as_double());
        let Some(y) = graph.constant(self.y).and_then(|c| c.as_double()) else {
            return Ok(Canonical::Unchanged);
        };
        if let Some(x) = x {
            if tool.may_fold() {
                return Ok(tool.fold(Constant::Double(self.op.evaluate(x, y))));
            }
        }

        let BinaryMathOp::Pow = self.op;
        if y == 0.0 {
            return Ok(tool.fold(Constant::Double(1.0)));
        }
        if y == 1.0 {
            return Ok(Canonical::Replace(self.x));
        }
        if y == 2.0 {
            return Ok(Canonical::Replace(tool.arith(ArithNode::mul(self.x, self.x))?));
        }
        if y == -1.0 {
            let one = tool.constant(Constant::Double(1.0));
            return Ok(Canonical::Replace(tool.arith(ArithNode::div(one, self.x))?));
        }
        // pow(-0.0, 0.5) is +0.0 and pow(-inf, 0.5) is +inf; sqrt disagrees on both.
        if y == 0.5 {
            let excluded = tool
                .stamp(self.x)
                .as_float()
                .is_some_and(|stamp| stamp.excludes_negative_zero_and_infinity());
            if excluded {
                return Ok(Canonical::Replace(tool.arith(ArithNode::sqrt(self.x))?));
            }
        }
        Ok(Canonical::Unchanged)
    }
}

impl Lowerable for BinaryMathNode {
    fn generate<B: LoweringBackend>(
        &self,
        this: NodeId,
        ctx: &mut LoweringContext<'_, '_, B>,
    ) -> IntrinsicResult<B::Value> {
        let args = [ctx.operand(self.x)?, ctx.operand(self.y)?];
        ctx.call_stub(this, StubKey::BinaryMath { op: self.op }, self.runtime_checked.as_ref(), &args)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn host_evaluation() {
        assert_eq!(UnaryMathOp::Exp.evaluate(0.0), 1.0);
        assert_eq!(UnaryMathOp::Log.evaluate(1.0), 0.0);
        assert!(UnaryMathOp::Log.evaluate(-1.0).is_nan());
        assert_eq!(BinaryMathOp::Pow.evaluate(2.0, 10.0), 1024.0);
    }
}
