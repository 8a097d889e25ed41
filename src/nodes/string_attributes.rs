// This module implements the string-attribute scan. One pass over an encoded string region
// computes its code range, the narrowest category every code point belongs to: 7-bit, 8-bit,
// 16-bit, valid (any well-formed string outside those) or broken (ill-formed). The multi-unit
// encodings also count code points and return both in a long: code points in the upper half,
// code range in the lower half. With `assume_valid` the caller guarantees well-formed input,
// which lets the scan skip validation; it is only meaningful for UTF-8, UTF-16 and UTF-32.
// Ill-formed input counts one code point per byte that is not a UTF-8 continuation byte and
// one per UTF-16 unit that is not part of a valid surrogate pair.

//! String code-range and code-point-count scanning.

use std::fmt;

use crate::canonicalize::{Canonical, Canonicalizable, CanonicalizerTool};
use crate::core::constant::Constant;
use crate::core::element::Stride;
use crate::core::error::{guarantee, IntrinsicResult};
use crate::core::graph::{Graph, NodeId};
use crate::core::location::{LocationIdentity, MemoryAccess};
use crate::core::stamp::{IntegerStamp, Stamp};
use crate::lowering::{Lowerable, LoweringBackend, LoweringContext};
use crate::nodes::{constant_length, region_bytes, replace, ArrayRegion};
use crate::stubs::{StubKey, ValueKind};
use crate::target::CpuFeatureSet;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StringEncoding {
    Latin1,
    /// UTF-16 restricted to the basic multilingual plane (no surrogates).
    Bmp,
    Utf8,
    Utf16,
    Utf32,
}

impl StringEncoding {
    pub const ALL: &'static [StringEncoding] = &[
        StringEncoding::Latin1,
        StringEncoding::Bmp,
        StringEncoding::Utf8,
        StringEncoding::Utf16,
        StringEncoding::Utf32,
    ];

    pub fn stride(self) -> Stride {
        match self {
            StringEncoding::Latin1 | StringEncoding::Utf8 => Stride::S1,
            StringEncoding::Bmp | StringEncoding::Utf16 => Stride::S2,
            StringEncoding::Utf32 => Stride::S4,
        }
    }

    /// Whether the scan also counts code points (long result).
    pub fn counts_code_points(self) -> bool {
        matches!(self, StringEncoding::Utf8 | StringEncoding::Utf16)
    }

    pub fn result_kind(self) -> ValueKind {
        if self.counts_code_points() {
            ValueKind::Long
        } else {
            ValueKind::Int
        }
    }

    pub(crate) fn check_assume_valid(self, assume_valid: bool) -> IntrinsicResult<()> {
        guarantee(
            !assume_valid || matches!(self, StringEncoding::Utf8 | StringEncoding::Utf16 | StringEncoding::Utf32),
            "string-attributes-assume-valid",
            || format!("{} strings cannot be ill-formed", self.name()),
        )
    }

    pub fn name(self) -> &'static str {
        match self {
            StringEncoding::Latin1 => "Latin1",
            StringEncoding::Bmp => "BMP",
            StringEncoding::Utf8 => "UTF8",
            StringEncoding::Utf16 => "UTF16",
            StringEncoding::Utf32 => "UTF32",
        }
    }
}

impl fmt::Display for StringEncoding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum CodeRange {
    SevenBit = 0,
    EightBit = 1,
    SixteenBit = 2,
    Valid = 3,
    Broken = 4,
}

impl CodeRange {
    /// Narrowest fixed-width range holding `max` (7-bit, 8-bit, 16-bit, else valid).
    pub fn for_max(max: u32) -> Self {
        if max < 0x80 {
            CodeRange::SevenBit
        } else if max < 0x100 {
            CodeRange::EightBit
        } else if max < 0x10000 {
            CodeRange::SixteenBit
        } else {
            CodeRange::Valid
        }
    }
}

fn is_surrogate(c: u32) -> bool {
    (0xD800..=0xDFFF).contains(&c)
}

fn is_high_surrogate(c: u32) -> bool {
    (0xD800..=0xDBFF).contains(&c)
}

fn is_low_surrogate(c: u32) -> bool {
    (0xDC00..=0xDFFF).contains(&c)
}

/// Code range and code point count of `data`, the raw bytes of the string.
pub fn scan(encoding: StringEncoding, assume_valid: bool, data: &[u8]) -> (CodeRange, u64) {
    let stride = encoding.stride();
    let units: Vec<u32> = data
        .chunks_exact(stride.bytes())
        .filter_map(|chunk| stride.read(chunk, 0).map(|unit| unit as u32))
        .collect();
    let max = units.iter().copied().max().unwrap_or(0);

    match encoding {
        StringEncoding::Latin1 | StringEncoding::Bmp => (CodeRange::for_max(max), units.len() as u64),
        StringEncoding::Utf32 => {
            let broken = !assume_valid && units.iter().any(|&c| c > 0x10FFFF || is_surrogate(c));
            let range = if broken { CodeRange::Broken } else { CodeRange::for_max(max) };
            (range, units.len() as u64)
        }
        StringEncoding::Utf8 => {
            let ascii = data.iter().all(|&b| b < 0x80);
            let lead_bytes = data.iter().filter(|&&b| b & 0xC0 != 0x80).count() as u64;
            if ascii {
                (CodeRange::SevenBit, data.len() as u64)
            } else if assume_valid {
                (CodeRange::Valid, lead_bytes)
            } else {
                match std::str::from_utf8(data) {
                    Ok(text) => (CodeRange::Valid, text.chars().count() as u64),
                    Err(_) => (CodeRange::Broken, lead_bytes),
                }
            }
        }
        StringEncoding::Utf16 => {
            if assume_valid {
                let has_surrogates = units.iter().any(|&c| is_surrogate(c));
                let lows = units.iter().filter(|&&c| is_low_surrogate(c)).count() as u64;
                let range = if has_surrogates { CodeRange::Valid } else { CodeRange::for_max(max) };
                return (range, units.len() as u64 - lows);
            }
            let mut code_points = 0u64;
            let mut paired = false;
            let mut broken = false;
            let mut i = 0;
            while i < units.len() {
                let c = units[i];
                if is_high_surrogate(c) && units.get(i + 1).is_some_and(|&n| is_low_surrogate(n)) {
                    paired = true;
                    i += 2;
                } else {
                    broken |= is_surrogate(c);
                    i += 1;
                }
                code_points += 1;
            }
            let range = if broken {
                CodeRange::Broken
            } else if paired {
                CodeRange::Valid
            } else {
                CodeRange::for_max(max)
            };
            (range, code_points)
        }
    }
}

/// Result value of the node for `data`, as the stub would return it.
pub fn evaluate(encoding: StringEncoding, assume_valid: bool, data: &[u8]) -> Constant<'static> {
    let (range, code_points) = scan(encoding, assume_valid, data);
    if encoding.counts_code_points() {
        Constant::Long(((code_points << 32) | range as u64) as i64)
    } else {
        Constant::Int(range as i32)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CalcStringAttributesNode {
    encoding: StringEncoding,
    assume_valid: bool,
    location: LocationIdentity,
    runtime_checked: Option<CpuFeatureSet>,
    region: ArrayRegion,
    length: NodeId,
}

impl CalcStringAttributesNode {
    pub fn new(
        encoding: StringEncoding,
        assume_valid: bool,
        location: LocationIdentity,
        region: ArrayRegion,
        length: NodeId,
    ) -> IntrinsicResult<Self> {
        encoding.check_assume_valid(assume_valid)?;
        Ok(Self {
            encoding,
            assume_valid,
            location,
            runtime_checked: None,
            region,
            length,
        })
    }

    pub fn with_runtime_checked(mut self, features: CpuFeatureSet) -> Self {
        self.runtime_checked = Some(features);
        self
    }

    pub fn encoding(&self) -> StringEncoding {
        self.encoding
    }

    pub fn runtime_checked(&self) -> Option<&CpuFeatureSet> {
        self.runtime_checked.as_ref()
    }

    pub fn inputs(&self) -> Vec<NodeId> {
        vec![self.region.array, self.region.offset, self.length]
    }

    pub(crate) fn replace_input(&mut self, old: NodeId, new: NodeId) {
        self.region.replace_input(old, new);
        replace(&mut self.length, old, new);
    }

    pub fn stamp(&self, _graph: &Graph<'_>) -> Stamp {
        if self.encoding.counts_code_points() {
            Stamp::long()
        } else {
            Stamp::Integer(IntegerStamp::range(32, 0, CodeRange::Broken as i64))
        }
    }
}

impl MemoryAccess for CalcStringAttributesNode {
    fn location_identity(&self) -> LocationIdentity {
        self.location
    }
}

impl Canonicalizable for CalcStringAttributesNode {
    fn canonical(&self, _this: NodeId, tool: &mut CanonicalizerTool<'_, '_>) -> IntrinsicResult<Canonical> {
        let graph = tool.graph();
        let (Some(length), Some(offset)) = (
            constant_length(graph, self.length),
            graph.int_constant(self.region.offset),
        ) else {
            return Ok(Canonical::Unchanged);
        };
        let Some(bytes) = region_bytes(length, self.encoding.stride().bytes()).filter(|&bytes| tool.may_fold_bytes(bytes))
        else {
            return Ok(Canonical::Unchanged);
        };
        let Some(contents) = graph.array_contents(self.region.array) else {
            return Ok(Canonical::Unchanged);
        };
        let Some(data) = contents.region(offset, bytes) else {
            return Ok(Canonical::Unchanged);
        };
        let result = evaluate(self.encoding, self.assume_valid, data);
        Ok(tool.fold(result))
    }
}

impl Lowerable for CalcStringAttributesNode {
    fn generate<B: LoweringBackend>(
        &self,
        this: NodeId,
        ctx: &mut LoweringContext<'_, '_, B>,
    ) -> IntrinsicResult<B::Value> {
        let args = ctx.operands(&self.inputs())?;
        let key = StubKey::StringAttributes {
            encoding: self.encoding,
            assume_valid: self.assume_valid,
        };
        ctx.call_stub(this, key, self.runtime_checked.as_ref(), &args)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn utf16(units: &[u16]) -> Vec<u8> {
        units.iter().flat_map(|u| u.to_le_bytes()).collect()
    }

    #[test]
    fn latin1_ranges() {
        assert_eq!(scan(StringEncoding::Latin1, false, b"abc").0, CodeRange::SevenBit);
        assert_eq!(scan(StringEncoding::Latin1, false, &[0x61, 0xE9]).0, CodeRange::EightBit);
    }

    #[test]
    fn utf8_counts_and_validates() {
        let text = "h\u{e9}llo \u{1F600}";
        assert_eq!(
            scan(StringEncoding::Utf8, false, text.as_bytes()),
            (CodeRange::Valid, 7)
        );
        assert_eq!(scan(StringEncoding::Utf8, false, b"plain"), (CodeRange::SevenBit, 5));
        assert_eq!(scan(StringEncoding::Utf8, false, &[0x61, 0xC3]).0, CodeRange::Broken);
        assert_eq!(
            evaluate(StringEncoding::Utf8, true, text.as_bytes()),
            Constant::Long((7 << 32) | 3)
        );
    }

    #[test]
    fn utf16_surrogates() {
        let pair = utf16(&[0x61, 0xD83D, 0xDE00]);
        assert_eq!(scan(StringEncoding::Utf16, false, &pair), (CodeRange::Valid, 2));
        assert_eq!(scan(StringEncoding::Utf16, true, &pair), (CodeRange::Valid, 2));
        let lone = utf16(&[0x61, 0xDE00]);
        assert_eq!(scan(StringEncoding::Utf16, false, &lone), (CodeRange::Broken, 2));
        let bmp = utf16(&[0x61, 0x3042]);
        assert_eq!(scan(StringEncoding::Utf16, false, &bmp), (CodeRange::SixteenBit, 2));
    }

    #[test]
    fn utf32_rejects_surrogates_unless_assumed_valid() {
        let data: Vec<u8> = [0x61u32, 0xD800].iter().flat_map(|c| c.to_le_bytes()).collect();
        assert_eq!(scan(StringEncoding::Utf32, false, &data).0, CodeRange::Broken);
        assert_eq!(evaluate(StringEncoding::Utf32, false, &0x1F600u32.to_le_bytes()), Constant::Int(3));
    }

    #[test]
    fn assume_valid_is_rejected_for_latin1() {
        assert!(StringEncoding::Latin1.check_assume_valid(true).is_err());
        assert!(StringEncoding::Utf32.check_assume_valid(true).is_ok());
    }
}
