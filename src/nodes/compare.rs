//! Lexicographic comparison of two array regions.
//!
//! The first region may be read through a wider stride than the second, never
//! a narrower one. Elements are zero-extended before they are subtracted, so
//! the result is the difference of the unsigned element values at the first
//! mismatch, or zero.

use crate::canonicalize::{Canonical, Canonicalizable, CanonicalizerTool};
use crate::core::constant::Constant;
use crate::core::element::Stride;
use crate::core::error::IntrinsicResult;
use crate::core::graph::{Graph, NodeId};
use crate::core::location::{LocationIdentity, MemoryAccess};
use crate::core::stamp::Stamp;
use crate::lowering::{Lowerable, LoweringBackend, LoweringContext};
use crate::nodes::{constant_length, region_bytes, replace, ArrayRegion};
use crate::stubs::{check_dual_strides, StubKey};
use crate::target::CpuFeatureSet;

/// Reference evaluation over the bytes of both regions.
pub fn compare_regions(a: &[u8], stride_a: Stride, b: &[u8], stride_b: Stride, length: usize) -> Option<i32> {
    for i in 0..length {
        let x = stride_a.read(a, i * stride_a.bytes())?;
        let y = stride_b.read(b, i * stride_b.bytes())?;
        if x != y {
            return Some((x as i64 - y as i64) as i32);
        }
    }
    Some(0)
}

#[derive(Debug, Clone, PartialEq)]
pub struct ArrayRegionCompareToNode {
    stride_a: Stride,
    stride_b: Stride,
    location: LocationIdentity,
    runtime_checked: Option<CpuFeatureSet>,
    a: ArrayRegion,
    b: ArrayRegion,
    length: NodeId,
}

impl ArrayRegionCompareToNode {
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
        Stamp::int()
    }
}

impl MemoryAccess for ArrayRegionCompareToNode {
    fn location_identity(&self) -> LocationIdentity {
        self.location
    }
}

impl Canonicalizable for ArrayRegionCompareToNode {
    fn canonical(&self, _this: NodeId, tool: &mut CanonicalizerTool<'_, '_>) -> IntrinsicResult<Canonical> {
        let graph = tool.graph();
        if self.stride_a == self.stride_b && self.a.same_start(&self.b, graph) {
            return Ok(tool.fold(Constant::Int(0)));
        }
        let Some(length) = constant_length(graph, self.length) else {
            return Ok(Canonical::Unchanged);
        };
        if length == 0 {
            return Ok(tool.fold(Constant::Int(0)));
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
        Ok(match compare_regions(a, self.stride_a, b, self.stride_b, length) {
            Some(result) => tool.fold(Constant::Int(result)),
            None => Canonical::Unchanged,
        })
    }
}

impl Lowerable for ArrayRegionCompareToNode {
    fn generate<B: LoweringBackend>(
        &self,
        this: NodeId,
        ctx: &mut LoweringContext<'_, '_, B>,
    ) -> IntrinsicResult<B::Value> {
        let args = ctx.operands(&self.inputs())?;
        let key = StubKey::RegionCompareTo {
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
    fn difference_at_first_mismatch() {
        assert_eq!(compare_regions(b"abc", Stride::S1, b"abd", Stride::S1, 3), Some(-1));
        assert_eq!(compare_regions(b"abc", Stride::S1, b"abc", Stride::S1, 3), Some(0));
        assert_eq!(compare_regions(b"b", Stride::S1, b"a", Stride::S1, 1), Some(1));
    }

    #[test]
    fn narrow_side_is_zero_extended() {
        let wide = 0x00E9u16.to_le_bytes();
        assert_eq!(compare_regions(&wide, Stride::S2, &[0xE9], Stride::S1, 1), Some(0));
        let wide = 0x0100u16.to_le_bytes();
        assert_eq!(compare_regions(&wide, Stride::S2, &[0xFF], Stride::S1, 1), Some(1));
    }

    #[test]
    fn narrower_first_stride_is_rejected() {
        let n = NodeId::from_index(0);
        let region = ArrayRegion::new(n, n);
        assert!(ArrayRegionCompareToNode::new(Stride::S1, Stride::S2, LocationIdentity::Any, region, region, n).is_err());
    }
}
