// This module builds and serves the stub descriptor registry. One registry exists per
// architecture; it is constructed on first use through a OnceLock and is never mutated again,
// so compilation threads read it without synchronization. Construction enumerates every valid
// key of every family and registers one descriptor per feature tier the family is compiled for.
// Selection is an exact-match/superset lookup: without a runtime-checked set only variants
// within the static minimum qualify; with one, a variant compiled for exactly that set wins,
// otherwise the richest variant whose requirements the effective features cover.

//! Process-wide stub registry and capability dispatch.

use hashbrown::HashMap;
use std::sync::OnceLock;

use super::descriptor::{StubDescriptor, ValueKind};
use super::StubKey;
use crate::core::element::{ElementKind, Stride};
use crate::core::error::{IntrinsicError, IntrinsicResult};
use crate::core::location::KillSet;
use crate::nodes::cipher::CipherMode;
use crate::nodes::conversion::HalfFloatOp;
use crate::nodes::index_of::SearchVariant;
use crate::nodes::math::{BinaryMathOp, UnaryMathOp};
use crate::nodes::string_attributes::StringEncoding;
use crate::target::{Architecture, CpuFeature, CpuFeatureSet, FeatureTier, TargetDescription};

static AMD64_REGISTRY: OnceLock<IntrinsicResult<StubRegistry>> = OnceLock::new();
static AARCH64_REGISTRY: OnceLock<IntrinsicResult<StubRegistry>> = OnceLock::new();

/// Immutable table of every stub of one architecture.
#[derive(Debug)]
pub struct StubRegistry {
    target: TargetDescription,
    stubs: Vec<StubDescriptor>,
    keys: Vec<StubKey>,
    variants: HashMap<StubKey, Vec<usize>>,
}

const ARRAY_REGION_ARGS: &[ValueKind] = &[
    ValueKind::Pointer,
    ValueKind::Long,
    ValueKind::Pointer,
    ValueKind::Long,
    ValueKind::Int,
];

impl StubRegistry {
    /// Registry of `arch`, built on first use.
    pub fn global(arch: Architecture) -> IntrinsicResult<&'static StubRegistry> {
        let cell = match arch {
            Architecture::Amd64 => &AMD64_REGISTRY,
            Architecture::AArch64 => &AARCH64_REGISTRY,
        };
        cell.get_or_init(|| Self::build(TargetDescription::for_arch(arch)))
            .as_ref()
            .map_err(Clone::clone)
    }

    /// Build the registries of all architectures. Idempotent.
    pub fn initialize_all() -> IntrinsicResult<()> {
        for arch in [Architecture::Amd64, Architecture::AArch64] {
            Self::global(arch)?;
        }
        Ok(())
    }

    /// Build a registry for `target`.
    pub fn build(target: TargetDescription) -> IntrinsicResult<Self> {
        let mut registry = Self {
            target,
            stubs: Vec::new(),
            keys: Vec::new(),
            variants: HashMap::new(),
        };
        let tiers = target.tiers();

        for &stride in Stride::ARRAY_STRIDES {
            for &variant in SearchVariant::ALL {
                for &value_count in variant.value_counts() {
                    let mut args = vec![ValueKind::Pointer, ValueKind::Long, ValueKind::Int, ValueKind::Int];
                    args.extend(std::iter::repeat(ValueKind::Int).take(value_count));
                    let key = StubKey::IndexOf {
                        stride,
                        variant,
                        value_count,
                    };
                    registry.register(key, ValueKind::Int, args, KillSet::None, &tiers, &[])?;
                }
            }
        }

        for &stride_a in Stride::ARRAY_STRIDES {
            for &stride_b in Stride::ARRAY_STRIDES.iter().filter(|&&b| b <= stride_a) {
                let compare = StubKey::RegionCompareTo { stride_a, stride_b };
                registry.register(compare, ValueKind::Int, ARRAY_REGION_ARGS.to_vec(), KillSet::None, &tiers, &[])?;
                let equals = StubKey::RegionEquals { stride_a, stride_b };
                registry.register(equals, ValueKind::Int, ARRAY_REGION_ARGS.to_vec(), KillSet::None, &tiers, &[])?;
            }
        }

        for &kind in ElementKind::ALL {
            let key = StubKey::ArrayEquals { kind };
            registry.register(key, ValueKind::Int, ARRAY_REGION_ARGS.to_vec(), KillSet::None, &tiers, &[])?;
        }

        for &encoding in StringEncoding::ALL {
            for assume_valid in [false, true] {
                if encoding.check_assume_valid(assume_valid).is_err() {
                    continue;
                }
                let key = StubKey::StringAttributes {
                    encoding,
                    assume_valid,
                };
                let args = vec![ValueKind::Pointer, ValueKind::Long, ValueKind::Int];
                registry.register(key, encoding.result_kind(), args, KillSet::None, &tiers, &[])?;
            }
        }

        let aes_feature = match target.arch {
            Architecture::Amd64 => CpuFeature::Aes,
            Architecture::AArch64 => CpuFeature::ArmAes,
        };
        for &mode in CipherMode::ALL {
            let key = StubKey::Aes { mode };
            registry.register(
                key,
                mode.result_kind(),
                mode.arg_kinds().to_vec(),
                mode.kill_set(),
                &tiers,
                &[aes_feature],
            )?;
        }

        // Math stubs only benefit from FMA, which the AVX2 tier already carries.
        let math_tiers = &tiers[..tiers.len().min(2)];
        for &op in UnaryMathOp::ALL {
            let key = StubKey::UnaryMath { op };
            registry.register(key, ValueKind::Double, vec![ValueKind::Double], KillSet::None, math_tiers, &[])?;
        }
        for &op in BinaryMathOp::ALL {
            let key = StubKey::BinaryMath { op };
            let args = vec![ValueKind::Double, ValueKind::Double];
            registry.register(key, ValueKind::Double, args, KillSet::None, math_tiers, &[])?;
        }

        for &op in HalfFloatOp::ALL {
            let key = StubKey::HalfFloat { op };
            registry.register(key, op.result_kind(), vec![op.argument_kind()], KillSet::None, &tiers[..1], &[])?;
        }

        log::debug!(
            "initialized {} stub registry: {} keys, {} stubs",
            target.arch,
            registry.keys.len(),
            registry.stubs.len()
        );
        Ok(registry)
    }

    fn register(
        &mut self,
        key: StubKey,
        result: ValueKind,
        args: Vec<ValueKind>,
        kill_set: KillSet,
        tiers: &[FeatureTier],
        extra: &[CpuFeature],
    ) -> IntrinsicResult<()> {
        key.validate()?;
        let extra = CpuFeatureSet::from_features(self.target.arch, extra)?;
        let base = key.base_name();
        let mut indices = Vec::with_capacity(tiers.len());
        for tier in tiers {
            let required = tier.features.union(&extra)?;
            let additional = required.difference(&self.target.minimum)?;
            let name = if tier.suffix.is_empty() {
                base.clone()
            } else {
                format!("{base}_{}", tier.suffix)
            };
            indices.push(self.stubs.len());
            self.stubs.push(StubDescriptor {
                name,
                key,
                result,
                args: args.clone(),
                kill_set: kill_set.clone(),
                required,
                additional,
            });
        }
        self.keys.push(key);
        self.variants.insert(key, indices);
        Ok(())
    }

    pub fn target(&self) -> &TargetDescription {
        &self.target
    }

    /// Select the stub for `key` on the registry's own target.
    pub fn select(
        &self,
        key: &StubKey,
        runtime_checked: Option<&CpuFeatureSet>,
    ) -> IntrinsicResult<&StubDescriptor> {
        self.select_for(&self.target, key, runtime_checked)
    }

    /// Select the stub for `key` on `target`, whose minimum may exceed the
    /// registry's (e.g. an image built for newer hardware).
    pub fn select_for(
        &self,
        target: &TargetDescription,
        key: &StubKey,
        runtime_checked: Option<&CpuFeatureSet>,
    ) -> IntrinsicResult<&StubDescriptor> {
        key.validate()?;
        if target.arch != self.target.arch {
            return Err(IntrinsicError::ArchitectureMismatch {
                expected: self.target.arch,
                found: target.arch,
            });
        }
        let available = target.effective(runtime_checked)?;
        let no_match = || IntrinsicError::NoMatchingStub {
            operation: key.to_string(),
            features: available.to_string(),
        };

        let candidates: Vec<&StubDescriptor> = self
            .variants
            .get(key)
            .ok_or_else(no_match)?
            .iter()
            .filter_map(|&index| self.stubs.get(index))
            .filter(|stub| available.is_superset_of(&stub.required))
            .collect();

        let exact = runtime_checked.and_then(|checked| {
            candidates
                .iter()
                .copied()
                .find(|stub| stub.required == *checked || stub.additional == *checked)
        });
        let selected = match exact {
            Some(stub) => stub,
            None => candidates
                .iter()
                .copied()
                .max_by_key(|stub| stub.required.len())
                .ok_or_else(no_match)?,
        };
        log::debug!("selected stub {} for {key} with [{available}]", selected.name);
        Ok(selected)
    }

    /// All variants registered for `key`, baseline first.
    pub fn variants(&self, key: &StubKey) -> Vec<&StubDescriptor> {
        self.variants
            .get(key)
            .map(|indices| indices.iter().filter_map(|&i| self.stubs.get(i)).collect())
            .unwrap_or_default()
    }

    /// Registered keys in registration order.
    pub fn keys(&self) -> &[StubKey] {
        &self.keys
    }

    pub fn iter(&self) -> impl Iterator<Item = &StubDescriptor> {
        self.stubs.iter()
    }

    pub fn len(&self) -> usize {
        self.stubs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stubs.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn amd64() -> &'static StubRegistry {
        StubRegistry::global(Architecture::Amd64).unwrap()
    }

    #[test]
    fn initialization_is_idempotent() {
        StubRegistry::initialize_all().unwrap();
        let first = amd64() as *const StubRegistry;
        let count = amd64().len();
        StubRegistry::initialize_all().unwrap();
        assert_eq!(amd64() as *const StubRegistry, first);
        assert_eq!(amd64().len(), count);
        assert!(!StubRegistry::global(Architecture::AArch64).unwrap().is_empty());
    }

    #[test]
    fn default_stub_needs_no_additional_features() {
        let key = StubKey::IndexOf {
            stride: Stride::S1,
            variant: SearchVariant::MatchAny,
            value_count: 1,
        };
        let stub = amd64().select(&key, None).unwrap();
        assert!(stub.is_default());
        assert_eq!(stub.name(), "arrayIndexOfMatchAny1S1");
    }

    #[test]
    fn exact_runtime_checked_match_wins() {
        let key = StubKey::ArrayEquals {
            kind: ElementKind::Char,
        };
        let tiers = TargetDescription::amd64().tiers();
        let avx2 = amd64().select(&key, Some(&tiers[1].features)).unwrap();
        assert_eq!(avx2.name(), "arrayEqualsChar_avx2");
        let avx512 = amd64().select(&key, Some(&tiers[2].features)).unwrap();
        assert_eq!(avx512.name(), "arrayEqualsChar_avx512");
    }

    #[test]
    fn partial_runtime_set_falls_back_to_covered_variant() {
        let key = StubKey::ArrayEquals {
            kind: ElementKind::Int,
        };
        let checked = CpuFeatureSet::parse(Architecture::Amd64, "avx,avx2").unwrap();
        let stub = amd64().select(&key, Some(&checked)).unwrap();
        assert!(stub.is_default());
    }

    #[test]
    fn aes_requires_the_aes_feature() {
        let key = StubKey::Aes {
            mode: CipherMode::EncryptBlock,
        };
        assert!(matches!(
            amd64().select(&key, None),
            Err(IntrinsicError::NoMatchingStub { .. })
        ));
        let checked = CpuFeatureSet::parse(Architecture::Amd64, "aes").unwrap();
        let stub = amd64().select(&key, Some(&checked)).unwrap();
        assert!(stub.additional().contains(CpuFeature::Aes));
    }

    #[test]
    fn aarch64_has_only_baseline_variants() {
        let registry = StubRegistry::global(Architecture::AArch64).unwrap();
        let key = StubKey::RegionCompareTo {
            stride_a: Stride::S2,
            stride_b: Stride::S1,
        };
        assert_eq!(registry.variants(&key).len(), 1);
    }

    #[test]
    fn foreign_runtime_set_is_rejected() {
        let key = StubKey::ArrayEquals {
            kind: ElementKind::Byte,
        };
        let checked = CpuFeatureSet::parse(Architecture::AArch64, "asimd").unwrap();
        assert!(matches!(
            amd64().select(&key, Some(&checked)),
            Err(IntrinsicError::ArchitectureMismatch { .. })
        ));
    }

    #[test]
    fn invalid_key_reports_invariant() {
        let key = StubKey::RegionCompareTo {
            stride_a: Stride::S1,
            stride_b: Stride::S2,
        };
        assert!(matches!(
            amd64().select(&key, None),
            Err(IntrinsicError::InvariantViolation {
                invariant: "dual-array-stride-order",
                ..
            })
        ));
    }
}
