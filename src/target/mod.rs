// This module describes what the compiler may assume about the executing CPU. A target is
// an architecture family plus the set of feature flags every program compiled for it already
// requires (the static minimum). Richer code paths are gated on runtime-checked feature sets:
// the embedding runtime probes the hardware before it builds a node that carries such a set,
// and this layer only records the claim and dispatches on it. Feature sets are small bitsets
// scoped to one architecture; mixing architectures is reported as an error rather than being
// silently accepted. The tier table at the bottom lists the feature sets stubs are compiled for.

//! Architecture families and CPU capability sets.

pub mod features;

pub use features::{Architecture, CpuFeature, CpuFeatureSet};

use crate::core::error::IntrinsicResult;

/// Feature tier a family of stub variants is compiled for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FeatureTier {
    /// Suffix appended to stub names of this tier (empty for the baseline tier).
    pub suffix: &'static str,
    /// Complete set of features stubs of this tier may use.
    pub features: CpuFeatureSet,
}

/// What the compiler may statically assume about the target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TargetDescription {
    pub arch: Architecture,
    /// Features every compiled program already requires.
    pub minimum: CpuFeatureSet,
}

const AMD64_MINIMUM: &[CpuFeature] = &[
    CpuFeature::Sse2,
    CpuFeature::Sse3,
    CpuFeature::Ssse3,
    CpuFeature::Sse41,
    CpuFeature::Sse42,
    CpuFeature::Popcnt,
];

const AMD64_AVX2: &[CpuFeature] = &[
    CpuFeature::Avx,
    CpuFeature::Avx2,
    CpuFeature::Bmi1,
    CpuFeature::Bmi2,
    CpuFeature::Lzcnt,
    CpuFeature::Fma,
    CpuFeature::F16c,
];

const AMD64_AVX512: &[CpuFeature] = &[
    CpuFeature::Avx512f,
    CpuFeature::Avx512bw,
    CpuFeature::Avx512vl,
];

const AARCH64_MINIMUM: &[CpuFeature] = &[CpuFeature::Fp, CpuFeature::Asimd];

impl TargetDescription {
    /// x86-64 with SSE4.2 and POPCNT as the baseline.
    pub fn amd64() -> Self {
        Self {
            arch: Architecture::Amd64,
            minimum: CpuFeatureSet::from_static(Architecture::Amd64, AMD64_MINIMUM),
        }
    }

    /// AArch64 with FP and Advanced SIMD as the baseline.
    pub fn aarch64() -> Self {
        Self {
            arch: Architecture::AArch64,
            minimum: CpuFeatureSet::from_static(Architecture::AArch64, AARCH64_MINIMUM),
        }
    }

    pub fn for_arch(arch: Architecture) -> Self {
        match arch {
            Architecture::Amd64 => Self::amd64(),
            Architecture::AArch64 => Self::aarch64(),
        }
    }

    /// Raise the baseline, e.g. for an image built for newer hardware.
    pub fn with_minimum(mut self, extra: CpuFeatureSet) -> IntrinsicResult<Self> {
        self.minimum = self.minimum.union(&extra)?;
        Ok(self)
    }

    /// Features usable by code guarded by `runtime_checked` (or by nothing).
    pub fn effective(&self, runtime_checked: Option<&CpuFeatureSet>) -> IntrinsicResult<CpuFeatureSet> {
        match runtime_checked {
            Some(set) => self.minimum.union(set),
            None => Ok(self.minimum),
        }
    }

    /// Feature tiers stubs are compiled for, from the baseline upwards.
    pub fn tiers(&self) -> Vec<FeatureTier> {
        let baseline = FeatureTier {
            suffix: "",
            features: self.minimum,
        };
        match self.arch {
            Architecture::Amd64 => {
                let avx2 = self.minimum.with_all(AMD64_AVX2);
                let avx512 = avx2.with_all(AMD64_AVX512);
                vec![
                    baseline,
                    FeatureTier { suffix: "avx2", features: avx2 },
                    FeatureTier { suffix: "avx512", features: avx512 },
                ]
            }
            Architecture::AArch64 => vec![baseline],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn amd64_tiers_are_nested() {
        let target = TargetDescription::amd64();
        let tiers = target.tiers();
        assert_eq!(tiers.len(), 3);
        assert!(tiers[1].features.is_superset_of(&tiers[0].features));
        assert!(tiers[2].features.is_superset_of(&tiers[1].features));
        assert!(tiers[2].features.contains(CpuFeature::Avx512bw));
    }

    #[test]
    fn effective_adds_runtime_checked_features() {
        let target = TargetDescription::amd64();
        let checked = CpuFeatureSet::parse(Architecture::Amd64, "avx2").unwrap();
        let effective = target.effective(Some(&checked)).unwrap();
        assert!(effective.contains(CpuFeature::Avx2));
        assert!(effective.contains(CpuFeature::Sse42));
    }

    #[test]
    fn effective_rejects_foreign_architecture() {
        let target = TargetDescription::amd64();
        let checked = CpuFeatureSet::parse(Architecture::AArch64, "aes").unwrap();
        assert!(target.effective(Some(&checked)).is_err());
    }
}
