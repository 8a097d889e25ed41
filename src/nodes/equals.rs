// This module implements the two equality families. Array equality compares two regions of the
// same element kind. Float and double elements follow the platform's array equality: two NaNs
// at the same position are equal whatever their bit patterns, while every other value
// (including +0.0 and -0.0) compares by raw bits. Region equality compares regions read through
// two strides with the narrower side zero-extended. Both fold to true without reading contents
// when the two regions provably start at the same address, and to a constant when all contents
// are known within the fold budget. Small fixed-length array equality lowers inline.

//! Array and array-region equality nodes.

use crate::canonicalize::{Canonical, Canonicalizable, CanonicalizerTool};
use crate::core::constant::Constant;
use crate::core::element::{ElementKind, Stride};
use crate::core::error::IntrinsicResult;
use crate::core::graph::{Graph, NodeId};
use crate::core::location::{LocationIdentity, MemoryAccess};
use crate::core::stamp::Stamp;
use crate::lowering::{InlineOp, Lowerable, LoweringBackend, LoweringContext};
use crate::nodes::{constant_length, region_bytes, replace, ArrayRegion};
use crate::stubs::{check_dual_strides, StubKey};
use crate::target::CpuFeatureSet;

/// Element equality under the array-equality rules of `kind`.
pub fn elements_equal(kind: ElementKind, x: u64, y: u64) -> bool {
    match kind {
        ElementKind::Float => x == y || (f32::from_bits(x as u32).is_nan() && f32::from_bits(y as u32).is_nan()),
        ElementKind::Double => x == y || (f64::from_bits(x).is_nan() && f64::from_bits(y).is_nan()),
        _ => x == y,
    }
}

/// Reference evaluation of array equality over the bytes of both regions.
pub fn arrays_equal(kind: ElementKind, a: &[u8], b: &[u8], length: usize) -> Option<bool> {
    let stride = kind.stride();
    for i in 0..length {
        let x = stride.read(a, i * stride.bytes())?;
        let y = stride.read(b, i * stride.bytes())?;
        if !elements_equal(kind, x, y) {
            return Some(false);
        }
    }
    Some(true)
}

/// Reference evaluation of region equality with zero extension.
pub fn regions_equal(a: &[u8], stride_a: Stride, b: &[u8], stride_b: Stride, length: usize) -> Option<bool> {
    for i in 0..length {
        if stride_a.read(a, i * stride_a.bytes())? != stride_b.read(b, i * stride_b.bytes())? {
            return Some(false);
        }
    }
    Some(true)
}

#[derive(Debug, Clone, PartialEq)]
pub struct ArrayEqualsNode {
    kind: ElementKind,
    location: LocationIdentity,
    runtime_checked: Option<CpuFeatureSet>,
    a: ArrayRegion,
    b: ArrayRegion,
    length: NodeId,
}

impl ArrayEqualsNode {
    /// Equality of two arrays of `kind`; reads the contents of `kind` arrays.
    pub fn new(kind: ElementKind, a: ArrayRegion, b: ArrayRegion, length: NodeId) -> Self {
        Self {
            kind,
            location: LocationIdentity::Array(kind),
            runtime_checked: None,
            a,
            b,
            length,
        }
    }

    /// Use a broader location, e.g. for a stub shared with off-heap callers.
    pub fn with_location(mut self, location: LocationIdentity) -> Self {
        self.location = location;
        self
    }

    pub fn with_runtime_checked(mut self, features: CpuFeatureSet) -> Self {
        self.runtime_checked = Some(features);
        self
    }

    pub fn kind(&self) -> ElementKind {
        self.kind
    }

    pub fn runtime_checked(&self) -> Option<&CpuFeatureSet> {
        self.runtime_checked.as_ref()
    }

    pub fn inputs(&self) -> Vec<NodeId> {
        vec![self.a.array, self.a.offset, self.b.array, self.b.offset, self.length]
    }

    pub(crate) fn replace_input(&mut self, old: NodeId, new: NodeId) {
        self.a.replace_input(old, new);
        self.b.replace_input(old, new);
        replace(&mut self.length, old, new);
    }

    pub fn stamp(&self, _graph: &Graph<'_>) -> Stamp {
        Stamp::boolean()
    }
}

impl MemoryAccess for ArrayEqualsNode {
    fn location_identity(&self) -> LocationIdentity {
        self.location
    }
}

impl Canonicalizable for ArrayEqualsNode {
    fn canonical(&self, _this: NodeId, tool: &mut CanonicalizerTool<'_, '_>) -> IntrinsicResult<Canonical> {
        let graph = tool.graph();
        if self.a.same_start(&self.b, graph) {
            return Ok(tool.fold(Constant::boolean(true)));
        }
        let Some(length) = constant_length(graph, self.length) else {
            return Ok(Canonical::Unchanged);
        };
        if length == 0 {
            return Ok(tool.fold(Constant::boolean(true)));
        }

        let Some(bytes) = region_bytes(length, self.kind.bytes()) else {
            return Ok(Canonical::Unchanged);
        };
        if !bytes.checked_mul(2).is_some_and(|total| tool.may_fold_bytes(total)) {
            return Ok(Canonical::Unchanged);
        }
        let (Some(contents_a), Some(contents_b), Some(offset_a), Some(offset_b)) = (
            graph.array_contents(self.a.array),
            graph.array_contents(self.b.array),
            graph.int_constant(self.a.offset),
            graph.int_constant(self.b.offset),
        ) else {
            return Ok(Canonical::Unchanged);
        };
        let (Some(a), Some(b)) = (contents_a.region(offset_a, bytes), contents_b.region(offset_b, bytes)) else {
            return Ok(Canonical::Unchanged);
        };
        Ok(match arrays_equal(self.kind, a, b, length) {
            Some(equal) => tool.fold(Constant::boolean(equal)),
            None => Canonical::Unchanged,
        })
    }
}

impl Lowerable for ArrayEqualsNode {
    fn generate<B: LoweringBackend>(
        &self,
        this: NodeId,
        ctx: &mut LoweringContext<'_, '_, B>,
    ) -> IntrinsicResult<B::Value> {
        // Raw-bit comparison is only exact for non-float kinds.
        let inline_length = constant_length(ctx.graph(), self.length)
            .filter(|&len| {
                !self.kind.is_float()
                    && region_bytes(len, self.kind.bytes()).is_some_and(|bytes| bytes <= ctx.config().max_inline_bytes)
            });
        if let Some(length) = inline_length {
            let args = ctx.operands(&[self.a.array, self.a.offset, self.b.array, self.b.offset])?;
            return ctx.inline(this, InlineOp::ArrayEquals { kind: self.kind, length }, &args);
        }
        let args = ctx.operands(&self.inputs())?;
        ctx.call_stub(this, StubKey::ArrayEquals { kind: self.kind }, self.runtime_checked.as_ref(), &args)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ArrayRegionEqualsNode {
    stride_a: Stride,
    stride_b: Stride,
    location: LocationIdentity,
    runtime_checked: Option<CpuFeatureSet>,
    a: ArrayRegion,
    b: ArrayRegion,
    length: NodeId,
}

impl ArrayRegionEqualsNode {
    pub fn new(
        stride_a: Stride,
        stride_b: Stride,
        location: LocationIdentity,
        a: ArrayRegion,
        b: ArrayRegion,
        length: NodeId,
    ) -> IntrinsicResult<Self> {
        check_dual_strides(stride_a, stride_b)?;
        Ok(Self {
            stride_a,
            stride_b,
            location,
            runtime_checked: None,
            a,
            b,
            length,
        })
    }

    pub fn with_runtime_checked(mut self, features: CpuFeatureSet) -> Self {
        self.runtime_checked = Some(features);
        self
    }

    pub fn runtime_checked(&self) -> Option<&CpuFeatureSet> {
        self.runtime_checked.as_ref()
    }

    pub fn inputs(&self) -> Vec<NodeId> {
        vec![self.a.array, self.a.offset, self.b.array, self.b.offset, self.length]
    }

    pub(crate) fn replace_input(&mut self, old: NodeId, new: NodeId) {
        self.a.replace_input(old, new);
        self.b.replace_input(old, new);
        replace(&mut self.length, old, new);
    }

    pub fn stamp(&self, _graph: &Graph<'_>) -> Stamp {
        Stamp::boolean()
    }
}

impl MemoryAccess for ArrayRegionEqualsNode {
    fn location_identity(&self) -> LocationIdentity {
        self.location
    }
}

impl Canonicalizable for ArrayRegionEqualsNode {
    fn canonical(&self, _this: NodeId, tool: &mut CanonicalizerTool<'_, '_>) -> IntrinsicResult<Canonical> {
        let graph = tool.graph();
        if self.stride_a == self.stride_b && self.a.same_start(&self.b, graph) {
            return Ok(tool.fold(Constant::boolean(true)));
        }
        let Some(length) = constant_length(graph, self.length) else {
            return Ok(Canonical::Unchanged);
        };
        if length == 0 {
            return Ok(tool.fold(Constant::boolean(true)));
        }

        let (Some(bytes_a), Some(bytes_b)) = (
            region_bytes(length, self.stride_a.bytes()),
            region_bytes(length, self.stride_b.bytes()),
        ) else {
            return Ok(Canonical::Unchanged);
        };
        if !bytes_a.checked_add(bytes_b).is_some_and(|total| tool.may_fold_bytes(total)) {
            return Ok(Canonical::Unchanged);
        }
        let (Some(contents_a), Some(contents_b), Some(offset_a), Some(offset_b)) = (
            graph.array_contents(self.a.array),
            graph.array_contents(self.b.array),
            graph.int_constant(self.a.offset),
            graph.int_constant(self.b.offset),
        ) else {
            return Ok(Canonical::Unchanged);
        };
        let (Some(a), Some(b)) = (contents_a.region(offset_a, bytes_a), contents_b.region(offset_b, bytes_b)) else {
            return Ok(Canonical::Unchanged);
        };
        Ok(match regions_equal(a, self.stride_a, b, self.stride_b, length) {
            Some(equal) => tool.fold(Constant::boolean(equal)),
            None => Canonical::Unchanged,
        })
    }
}

impl Lowerable for ArrayRegionEqualsNode {
    fn generate<B: LoweringBackend>(
        &self,
        this: NodeId,
        ctx: &mut LoweringContext<'_, '_, B>,
    ) -> IntrinsicResult<B::Value> {
        let args = ctx.operands(&self.inputs())?;
        let key = StubKey::RegionEquals {
            stride_a: self.stride_a,
            stride_b: self.stride_b,
        };
        ctx.call_stub(this, key, self.runtime_checked.as_ref(), &args)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nan_is_nan_for_floats_only() {
        let quiet = f32::NAN.to_bits() as u64;
        let payload = 0x7FC0_0001u64;
        assert!(elements_equal(ElementKind::Float, quiet, payload));
        assert!(!elements_equal(ElementKind::Int, quiet, payload));
        assert!(!elements_equal(
            ElementKind::Double,
            0.0f64.to_bits(),
            (-0.0f64).to_bits()
        ));
    }

    #[test]
    fn region_equality_zero_extends() {
        let wide: Vec<u8> = [0x68u16, 0xE9].iter().flat_map(|c| c.to_le_bytes()).collect();
        assert_eq!(regions_equal(&wide, Stride::S2, &[0x68, 0xE9], Stride::S1, 2), Some(true));
        assert_eq!(regions_equal(&wide, Stride::S2, &[0x68, 0xEA], Stride::S1, 2), Some(false));
    }
}
