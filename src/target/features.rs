//! CPU feature flags and feature sets.
//!
//! Feature sets are plain bitsets tagged with the architecture they belong to,
//! in the same style as the register bitsets of the backend.

use std::fmt;

use crate::core::error::{IntrinsicError, IntrinsicResult};

/// Architecture family a target (and every feature flag) belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Architecture {
    Amd64,
    AArch64,
}

impl Architecture {
    pub fn name(self) -> &'static str {
        match self {
            Architecture::Amd64 => "amd64",
            Architecture::AArch64 => "aarch64",
        }
    }

    /// Parse an architecture name, accepting the usual aliases.
    pub fn parse(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "amd64" | "x86_64" | "x86-64" | "x64" => Some(Architecture::Amd64),
            "aarch64" | "arm64" => Some(Architecture::AArch64),
            _ => None,
        }
    }
}

impl fmt::Display for Architecture {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A named CPU feature flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum CpuFeature {
    // AMD64
    Sse2,
    Sse3,
    Ssse3,
    Sse41,
    Sse42,
    Popcnt,
    Lzcnt,
    Bmi1,
    Bmi2,
    Avx,
    Avx2,
    Fma,
    F16c,
    Avx512f,
    Avx512bw,
    Avx512vl,
    Aes,
    Clmul,
    // AArch64
    Fp,
    Asimd,
    ArmAes,
    Pmull,
    Sha2,
    Crc32,
    Lse,
    Fphp,
}

impl CpuFeature {
    pub const ALL: &'static [CpuFeature] = &[
        CpuFeature::Sse2,
        CpuFeature::Sse3,
        CpuFeature::Ssse3,
        CpuFeature::Sse41,
        CpuFeature::Sse42,
        CpuFeature::Popcnt,
        CpuFeature::Lzcnt,
        CpuFeature::Bmi1,
        CpuFeature::Bmi2,
        CpuFeature::Avx,
        CpuFeature::Avx2,
        CpuFeature::Fma,
        CpuFeature::F16c,
        CpuFeature::Avx512f,
        CpuFeature::Avx512bw,
        CpuFeature::Avx512vl,
        CpuFeature::Aes,
        CpuFeature::Clmul,
        CpuFeature::Fp,
        CpuFeature::Asimd,
        CpuFeature::ArmAes,
        CpuFeature::Pmull,
        CpuFeature::Sha2,
        CpuFeature::Crc32,
        CpuFeature::Lse,
        CpuFeature::Fphp,
    ];

    pub fn arch(self) -> Architecture {
        match self {
            CpuFeature::Fp
            | CpuFeature::Asimd
            | CpuFeature::ArmAes
            | CpuFeature::Pmull
            | CpuFeature::Sha2
            | CpuFeature::Crc32
            | CpuFeature::Lse
            | CpuFeature::Fphp => Architecture::AArch64,
            _ => Architecture::Amd64,
        }
    }

    /// Lower-case name as used by `/proc/cpuinfo` style listings.
    pub fn name(self) -> &'static str {
        match self {
            CpuFeature::Sse2 => "sse2",
            CpuFeature::Sse3 => "sse3",
            CpuFeature::Ssse3 => "ssse3",
            CpuFeature::Sse41 => "sse4.1",
            CpuFeature::Sse42 => "sse4.2",
            CpuFeature::Popcnt => "popcnt",
            CpuFeature::Lzcnt => "lzcnt",
            CpuFeature::Bmi1 => "bmi1",
            CpuFeature::Bmi2 => "bmi2",
            CpuFeature::Avx => "avx",
            CpuFeature::Avx2 => "avx2",
            CpuFeature::Fma => "fma",
            CpuFeature::F16c => "f16c",
            CpuFeature::Avx512f => "avx512f",
            CpuFeature::Avx512bw => "avx512bw",
            CpuFeature::Avx512vl => "avx512vl",
            CpuFeature::Aes => "aes",
            CpuFeature::Clmul => "clmul",
            CpuFeature::Fp => "fp",
            CpuFeature::Asimd => "asimd",
            CpuFeature::ArmAes => "aes",
            CpuFeature::Pmull => "pmull",
            CpuFeature::Sha2 => "sha2",
            CpuFeature::Crc32 => "crc32",
            CpuFeature::Lse => "lse",
            CpuFeature::Fphp => "fphp",
        }
    }

    /// Look up a feature by name within one architecture.
    pub fn from_name(arch: Architecture, name: &str) -> Option<Self> {
        let name = name.trim().to_ascii_lowercase();
        Self::ALL
            .iter()
            .copied()
            .find(|f| f.arch() == arch && f.name() == name)
    }

    fn bit(self) -> u64 {
        1u64 << (self as u32)
    }
}

impl fmt::Display for CpuFeature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Immutable set of CPU features of a single architecture.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CpuFeatureSet {
    arch: Architecture,
    bits: u64,
}

impl CpuFeatureSet {
    /// Empty set for `arch`.
    pub fn empty(arch: Architecture) -> Self {
        Self { arch, bits: 0 }
    }

    /// Build a set, rejecting features of another architecture.
    pub fn from_features(arch: Architecture, features: &[CpuFeature]) -> IntrinsicResult<Self> {
        let mut set = Self::empty(arch);
        for &feature in features {
            set = set.with(feature)?;
        }
        Ok(set)
    }

    /// Build a set from one of the static tables of this crate.
    pub(crate) fn from_static(arch: Architecture, features: &[CpuFeature]) -> Self {
        Self::empty(arch).with_all(features)
    }

    pub(crate) fn with_all(mut self, features: &[CpuFeature]) -> Self {
        for &feature in features {
            debug_assert_eq!(feature.arch(), self.arch);
            self.bits |= feature.bit();
        }
        self
    }

    /// Parse a comma separated list of feature names, e.g. `"avx2,bmi2"`.
    pub fn parse(arch: Architecture, list: &str) -> IntrinsicResult<Self> {
        let mut set = Self::empty(arch);
        for name in list.split(',').map(str::trim).filter(|n| !n.is_empty()) {
            let feature = CpuFeature::from_name(arch, name).ok_or_else(|| {
                IntrinsicError::invariant("known-feature", format!("{name} is not a {arch} feature"))
            })?;
            set = set.with(feature)?;
        }
        Ok(set)
    }

    pub fn arch(&self) -> Architecture {
        self.arch
    }

    /// Copy of this set with `feature` added.
    pub fn with(mut self, feature: CpuFeature) -> IntrinsicResult<Self> {
        if feature.arch() != self.arch {
            return Err(IntrinsicError::ArchitectureMismatch {
                expected: self.arch,
                found: feature.arch(),
            });
        }
        self.bits |= feature.bit();
        Ok(self)
    }

    pub fn contains(&self, feature: CpuFeature) -> bool {
        feature.arch() == self.arch && self.bits & feature.bit() != 0
    }

    /// Whether every feature of `other` is also in `self`.
    pub fn is_superset_of(&self, other: &CpuFeatureSet) -> bool {
        self.arch == other.arch && other.bits & !self.bits == 0
    }

    pub fn union(&self, other: &CpuFeatureSet) -> IntrinsicResult<CpuFeatureSet> {
        self.check_arch(other)?;
        Ok(Self {
            arch: self.arch,
            bits: self.bits | other.bits,
        })
    }

    /// Features of `self` that are not in `other`.
    pub fn difference(&self, other: &CpuFeatureSet) -> IntrinsicResult<CpuFeatureSet> {
        self.check_arch(other)?;
        Ok(Self {
            arch: self.arch,
            bits: self.bits & !other.bits,
        })
    }

    pub fn is_empty(&self) -> bool {
        self.bits == 0
    }

    pub fn len(&self) -> usize {
        self.bits.count_ones() as usize
    }

    pub fn iter(&self) -> impl Iterator<Item = CpuFeature> + '_ {
        CpuFeature::ALL.iter().copied().filter(move |f| self.contains(*f))
    }

    fn check_arch(&self, other: &CpuFeatureSet) -> IntrinsicResult<()> {
        if self.arch == other.arch {
            Ok(())
        } else {
            Err(IntrinsicError::ArchitectureMismatch {
                expected: self.arch,
                found: other.arch,
            })
        }
    }
}

impl fmt::Display for CpuFeatureSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            return f.write_str("none");
        }
        for (i, feature) in self.iter().enumerate() {
            if i > 0 {
                f.write_str(",")?;
            }
            f.write_str(feature.name())?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_is_scoped_to_architecture() {
        let amd = CpuFeatureSet::parse(Architecture::Amd64, "aes, avx2").unwrap();
        assert!(amd.contains(CpuFeature::Aes));
        assert!(!amd.contains(CpuFeature::ArmAes));

        let arm = CpuFeatureSet::parse(Architecture::AArch64, "aes").unwrap();
        assert!(arm.contains(CpuFeature::ArmAes));

        assert!(CpuFeatureSet::parse(Architecture::AArch64, "avx2").is_err());
    }

    #[test]
    fn superset_and_difference() {
        let small = CpuFeatureSet::from_features(Architecture::Amd64, &[CpuFeature::Avx]).unwrap();
        let big = small.with(CpuFeature::Avx2).unwrap();
        assert!(big.is_superset_of(&small));
        assert!(!small.is_superset_of(&big));
        let diff = big.difference(&small).unwrap();
        assert_eq!(diff.iter().collect::<Vec<_>>(), vec![CpuFeature::Avx2]);
    }

    #[test]
    fn mixing_architectures_fails() {
        let amd = CpuFeatureSet::empty(Architecture::Amd64);
        let arm = CpuFeatureSet::empty(Architecture::AArch64);
        assert!(matches!(
            amd.union(&arm),
            Err(IntrinsicError::ArchitectureMismatch { .. })
        ));
        assert!(amd.with(CpuFeature::Lse).is_err());
    }

    #[test]
    fn display_lists_names() {
        let set = CpuFeatureSet::parse(Architecture::Amd64, "bmi2,avx2").unwrap();
        assert_eq!(set.to_string(), "bmi2,avx2");
        assert_eq!(CpuFeatureSet::empty(Architecture::Amd64).to_string(), "none");
    }
}
