// This module implements the array-search family. A search scans `length` elements of one
// array region, read through a stride, starting at a from-index, and yields the index of the
// first match or -1. The variant decides what a match is: any of one to four values, one of
// one or two inclusive ranges, a value under an OR-mask, two consecutive values, or two
// consecutive values each under its own mask. The variant fixes how many search values the
// node carries, and that rule is checked both at construction and again at stub selection.
// Search values are Java ints; elements are zero-extended and compared in 32-bit arithmetic,
// so a negative search value only matches a four-byte element with the same bit pattern.

//! Array search (`indexOf`) nodes.

use crate::canonicalize::{Canonical, Canonicalizable, CanonicalizerTool};
use crate::core::constant::Constant;
use crate::core::element::Stride;
use crate::core::error::{guarantee, IntrinsicResult};
use crate::core::graph::{Graph, NodeId};
use crate::core::location::{LocationIdentity, MemoryAccess};
use crate::core::stamp::{IntegerStamp, Stamp};
use crate::lowering::{Lowerable, LoweringBackend, LoweringContext};
use crate::nodes::{constant_length, region_bytes, replace, ArrayRegion};
use crate::stubs::StubKey;
use crate::target::CpuFeatureSet;

/// What counts as a match.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SearchVariant {
    /// Element equals any of the values.
    MatchAny,
    /// Element lies in one of the inclusive ranges `[v0, v1]`, `[v2, v3]`.
    MatchRange,
    /// `element | mask == value`; values are `(value, mask)`.
    WithMask,
    /// Element `i` equals `v0` and element `i + 1` equals `v1`.
    FindTwoConsecutive,
    /// `e[i] | m0 == v0` and `e[i + 1] | m1 == v1`; values are `(v0, v1, m0, m1)`.
    FindTwoConsecutiveWithMask,
}

impl SearchVariant {
    pub const ALL: &'static [SearchVariant] = &[
        SearchVariant::MatchAny,
        SearchVariant::MatchRange,
        SearchVariant::WithMask,
        SearchVariant::FindTwoConsecutive,
        SearchVariant::FindTwoConsecutiveWithMask,
    ];

    /// Variant for the `(consecutive, masked)` flag pair of a front-end
    /// request; plain searches are `MatchAny`.
    pub fn from_flags(find_two_consecutive: bool, with_mask: bool) -> Self {
        match (find_two_consecutive, with_mask) {
            (false, false) => SearchVariant::MatchAny,
            (false, true) => SearchVariant::WithMask,
            (true, false) => SearchVariant::FindTwoConsecutive,
            (true, true) => SearchVariant::FindTwoConsecutiveWithMask,
        }
    }

    pub fn is_consecutive(self) -> bool {
        matches!(
            self,
            SearchVariant::FindTwoConsecutive | SearchVariant::FindTwoConsecutiveWithMask
        )
    }

    pub fn is_masked(self) -> bool {
        matches!(self, SearchVariant::WithMask | SearchVariant::FindTwoConsecutiveWithMask)
    }

    /// Allowed numbers of search values.
    pub fn value_counts(self) -> &'static [usize] {
        match self {
            SearchVariant::MatchAny => &[1, 2, 3, 4],
            SearchVariant::MatchRange => &[2, 4],
            SearchVariant::WithMask | SearchVariant::FindTwoConsecutive => &[2],
            SearchVariant::FindTwoConsecutiveWithMask => &[4],
        }
    }

    pub fn accepts_value_count(self, count: usize) -> bool {
        self.value_counts().contains(&count)
    }

    pub fn name(self) -> &'static str {
        match self {
            SearchVariant::MatchAny => "MatchAny",
            SearchVariant::MatchRange => "MatchRange",
            SearchVariant::WithMask => "WithMask",
            SearchVariant::FindTwoConsecutive => "FindTwoConsecutive",
            SearchVariant::FindTwoConsecutiveWithMask => "FindTwoConsecutiveWithMask",
        }
    }

    fn describe_counts(self) -> &'static str {
        match self {
            SearchVariant::MatchAny => "1 to 4",
            SearchVariant::MatchRange => "2 or 4",
            SearchVariant::WithMask | SearchVariant::FindTwoConsecutive => "exactly 2",
            SearchVariant::FindTwoConsecutiveWithMask => "exactly 4",
        }
    }

    /// Whether `elements` (current element first) match `values`.
    fn matches(self, elements: &[u32], values: &[u32]) -> bool {
        match self {
            SearchVariant::MatchAny => values.contains(&elements[0]),
            SearchVariant::MatchRange => values
                .chunks_exact(2)
                .any(|range| range[0] <= elements[0] && elements[0] <= range[1]),
            SearchVariant::WithMask => elements[0] | values[1] == values[0],
            SearchVariant::FindTwoConsecutive => elements[0] == values[0] && elements[1] == values[1],
            SearchVariant::FindTwoConsecutiveWithMask => {
                elements[0] | values[2] == values[0] && elements[1] | values[3] == values[1]
            }
        }
    }
}

/// Check the stride and value-count rules of a search.
pub(crate) fn check_search_shape(stride: Stride, variant: SearchVariant, value_count: usize) -> IntrinsicResult<()> {
    guarantee(Stride::ARRAY_STRIDES.contains(&stride), "index-of-stride", || {
        format!("array search does not support stride {stride}")
    })?;
    guarantee(variant.accepts_value_count(value_count), "index-of-value-count", || {
        format!(
            "{} requires {} search values, got {value_count}",
            variant.name(),
            variant.describe_counts()
        )
    })
}

/// Reference evaluation of a search over `data` (the bytes of the region).
/// Returns the matching index relative to the region start, or -1.
pub fn search(
    data: &[u8],
    stride: Stride,
    variant: SearchVariant,
    from_index: usize,
    length: usize,
    values: &[u32],
) -> i32 {
    let window = if variant.is_consecutive() { 2 } else { 1 };
    let element = |index: usize| stride.read(data, index * stride.bytes()).map(|e| e as u32);
    let mut index = from_index;
    while index + window <= length {
        let elements: Option<Vec<u32>> = (index..index + window).map(element).collect();
        match elements {
            Some(elements) if variant.matches(&elements, values) => return index as i32,
            Some(_) => index += 1,
            None => return -1,
        }
    }
    -1
}

/// Search over one array region.
#[derive(Debug, Clone, PartialEq)]
pub struct ArrayIndexOfNode {
    stride: Stride,
    variant: SearchVariant,
    location: LocationIdentity,
    runtime_checked: Option<CpuFeatureSet>,
    region: ArrayRegion,
    length: NodeId,
    from_index: NodeId,
    values: Vec<NodeId>,
}

impl ArrayIndexOfNode {
    pub fn new(
        stride: Stride,
        variant: SearchVariant,
        location: LocationIdentity,
        region: ArrayRegion,
        length: NodeId,
        from_index: NodeId,
        values: Vec<NodeId>,
    ) -> IntrinsicResult<Self> {
        check_search_shape(stride, variant, values.len())?;
        Ok(Self {
            stride,
            variant,
            location,
            runtime_checked: None,
            region,
            length,
            from_index,
            values,
        })
    }

    /// Mark the node as guarded by a runtime check for `features`.
    pub fn with_runtime_checked(mut self, features: CpuFeatureSet) -> Self {
        self.runtime_checked = Some(features);
        self
    }

    pub fn stride(&self) -> Stride {
        self.stride
    }

    pub fn variant(&self) -> SearchVariant {
        self.variant
    }

    pub fn values(&self) -> &[NodeId] {
        &self.values
    }

    pub fn runtime_checked(&self) -> Option<&CpuFeatureSet> {
        self.runtime_checked.as_ref()
    }

    pub fn stub_key(&self) -> StubKey {
        StubKey::IndexOf {
            stride: self.stride,
            variant: self.variant,
            value_count: self.values.len(),
        }
    }

    pub fn inputs(&self) -> Vec<NodeId> {
        let mut inputs = vec![self.region.array, self.region.offset, self.length, self.from_index];
        inputs.extend_from_slice(&self.values);
        inputs
    }

    pub(crate) fn replace_input(&mut self, old: NodeId, new: NodeId) {
        self.region.replace_input(old, new);
        replace(&mut self.length, old, new);
        replace(&mut self.from_index, old, new);
        for value in &mut self.values {
            replace(value, old, new);
        }
    }

    pub fn stamp(&self, _graph: &Graph<'_>) -> Stamp {
        Stamp::Integer(IntegerStamp::range(32, -1, i32::MAX as i64))
    }
}

impl MemoryAccess for ArrayIndexOfNode {
    fn location_identity(&self) -> LocationIdentity {
        self.location
    }
}

impl Canonicalizable for ArrayIndexOfNode {
    fn canonical(&self, _this: NodeId, tool: &mut CanonicalizerTool<'_, '_>) -> IntrinsicResult<Canonical> {
        let graph = tool.graph();
        let (Some(length), Some(from_index)) = (
            constant_length(graph, self.length),
            graph.int_constant(self.from_index).and_then(|i| usize::try_from(i).ok()),
        ) else {
            return Ok(Canonical::Unchanged);
        };

        let window = if self.variant.is_consecutive() { 2 } else { 1 };
        if from_index.checked_add(window).map_or(true, |end| end > length) {
            return Ok(tool.fold(Constant::Int(-1)));
        }

        let Some(values) = self
            .values
            .iter()
            .map(|&v| graph.int_constant(v).map(|v| v as u32))
            .collect::<Option<Vec<u32>>>()
        else {
            return Ok(Canonical::Unchanged);
        };
        let (Some(contents), Some(offset)) = (
            graph.array_contents(self.region.array),
            graph.int_constant(self.region.offset),
        ) else {
            return Ok(Canonical::Unchanged);
        };
        let Some(bytes) = region_bytes(length, self.stride.bytes()).filter(|&bytes| tool.may_fold_bytes(bytes)) else {
            return Ok(Canonical::Unchanged);
        };
        let Some(data) = contents.region(offset, bytes) else {
            return Ok(Canonical::Unchanged);
        };

        let result = search(data, self.stride, self.variant, from_index, length, &values);
        Ok(tool.fold(Constant::Int(result)))
    }
}

impl Lowerable for ArrayIndexOfNode {
    fn generate<B: LoweringBackend>(
        &self,
        this: NodeId,
        ctx: &mut LoweringContext<'_, '_, B>,
    ) -> IntrinsicResult<B::Value> {
        let args = ctx.operands(&self.inputs())?;
        ctx.call_stub(this, self.stub_key(), self.runtime_checked.as_ref(), &args)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flags_map_to_variants() {
        assert_eq!(SearchVariant::from_flags(false, false), SearchVariant::MatchAny);
        assert_eq!(SearchVariant::from_flags(true, true), SearchVariant::FindTwoConsecutiveWithMask);
        assert!(SearchVariant::from_flags(false, true).is_masked());
    }

    #[test]
    fn value_count_rules() {
        assert!(check_search_shape(Stride::S1, SearchVariant::MatchAny, 4).is_ok());
        assert!(check_search_shape(Stride::S1, SearchVariant::MatchAny, 5).is_err());
        assert!(check_search_shape(Stride::S2, SearchVariant::MatchRange, 3).is_err());
        assert!(check_search_shape(Stride::S2, SearchVariant::WithMask, 2).is_ok());
        assert!(check_search_shape(Stride::S4, SearchVariant::FindTwoConsecutiveWithMask, 2).is_err());
        assert!(check_search_shape(Stride::S8, SearchVariant::MatchAny, 1).is_err());
    }

    #[test]
    fn search_variants() {
        let data = b"hello, world";
        assert_eq!(search(data, Stride::S1, SearchVariant::MatchAny, 0, 12, &[b'o' as u32]), 4);
        assert_eq!(search(data, Stride::S1, SearchVariant::MatchAny, 5, 12, &[b'o' as u32]), 8);
        assert_eq!(
            search(data, Stride::S1, SearchVariant::MatchRange, 0, 12, &[b'a' as u32, b'f' as u32]),
            1
        );
        // ASCII case-insensitive 'W'.
        assert_eq!(
            search(data, Stride::S1, SearchVariant::WithMask, 0, 12, &[b'w' as u32, 0x20]),
            7
        );
        assert_eq!(
            search(data, Stride::S1, SearchVariant::FindTwoConsecutive, 0, 12, &[b'l' as u32, b'd' as u32]),
            10
        );
        assert_eq!(
            search(
                data,
                Stride::S1,
                SearchVariant::FindTwoConsecutiveWithMask,
                0,
                12,
                &[b'l' as u32, b'o' as u32, 0x20, 0x20]
            ),
            3
        );
        assert_eq!(search(data, Stride::S1, SearchVariant::MatchAny, 0, 12, &[b'z' as u32]), -1);
    }

    #[test]
    fn negative_values_only_match_full_width() {
        let bytes = [0xFFu8; 4];
        assert_eq!(search(&bytes, Stride::S1, SearchVariant::MatchAny, 0, 4, &[u32::MAX]), -1);
        assert_eq!(search(&bytes, Stride::S4, SearchVariant::MatchAny, 0, 1, &[u32::MAX]), 0);
    }
}
