use std::thread;

use bumpalo::Bump;

use tpde_intrinsics::core::element::{ElementKind, Stride};
use tpde_intrinsics::core::{CompilationSession, Graph, IntrinsicError, LocationIdentity, Stamp};
use tpde_intrinsics::nodes::{ArrayIndexOfNode, ArrayRegion, CipherMode, SearchVariant};
use tpde_intrinsics::stubs::{StubKey, StubRegistry};
use tpde_intrinsics::target::{Architecture, CpuFeature, CpuFeatureSet, TargetDescription};

fn index_of_key() -> StubKey {
    StubKey::IndexOf {
        stride: Stride::S2,
        variant: SearchVariant::MatchAny,
        value_count: 2,
    }
}

#[test]
fn registry_is_shared_across_threads() {
    let _ = env_logger::builder().is_test(true).try_init();

    let handles: Vec<_> = (0..4)
        .map(|_| {
            thread::spawn(|| {
                let registry = StubRegistry::global(Architecture::Amd64).unwrap();
                let checked = CpuFeatureSet::parse(Architecture::Amd64, "avx2").unwrap();
                let stub = registry.select(&index_of_key(), Some(&checked)).unwrap();
                (registry as *const StubRegistry as usize, stub.name().to_string())
            })
        })
        .collect();
    let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
    assert!(results.windows(2).all(|pair| pair[0] == pair[1]));
}

#[test]
fn selection_follows_runtime_checked_features() {
    let registry = StubRegistry::global(Architecture::Amd64).unwrap();
    let key = index_of_key();

    let baseline = registry.select(&key, None).unwrap();
    assert!(baseline.is_default());
    assert!(baseline.additional().is_empty());

    let avx2 = CpuFeatureSet::parse(Architecture::Amd64, "avx2,bmi1,bmi2,lzcnt,fma,f16c,avx").unwrap();
    let selected = registry.select(&key, Some(&avx2)).unwrap();
    assert!(selected.name().ends_with("_avx2"));
    assert!(avx2.is_superset_of(selected.additional()));

    // Repeated lookups pick the same descriptor.
    let again = registry.select(&key, Some(&avx2)).unwrap();
    assert_eq!(selected.name(), again.name());
}

#[test]
fn raised_minimum_selects_richer_default() {
    let registry = StubRegistry::global(Architecture::Amd64).unwrap();
    let extra = CpuFeatureSet::from_features(
        Architecture::Amd64,
        &[
            CpuFeature::Avx,
            CpuFeature::Avx2,
            CpuFeature::Bmi1,
            CpuFeature::Bmi2,
            CpuFeature::Lzcnt,
            CpuFeature::Fma,
            CpuFeature::F16c,
        ],
    )
    .unwrap();
    let target = TargetDescription::amd64().with_minimum(extra).unwrap();
    let stub = registry.select_for(&target, &index_of_key(), None).unwrap();
    assert!(stub.name().ends_with("_avx2"));
}

#[test]
fn aes_requires_a_checked_feature() {
    let registry = StubRegistry::global(Architecture::Amd64).unwrap();
    let key = StubKey::Aes {
        mode: CipherMode::EncryptBlock,
    };
    assert!(matches!(
        registry.select(&key, None),
        Err(IntrinsicError::NoMatchingStub { .. })
    ));

    let aes = CpuFeatureSet::parse(Architecture::Amd64, "aes").unwrap();
    let stub = registry.select(&key, Some(&aes)).unwrap();
    assert!(stub.required().contains(CpuFeature::Aes));
}

#[test]
fn foreign_feature_sets_are_rejected() {
    let registry = StubRegistry::global(Architecture::Amd64).unwrap();
    let arm = CpuFeatureSet::parse(Architecture::AArch64, "aes").unwrap();
    assert!(matches!(
        registry.select(&index_of_key(), Some(&arm)),
        Err(IntrinsicError::ArchitectureMismatch { .. })
    ));
    assert!(CpuFeatureSet::parse(Architecture::Amd64, "sve2").is_err());
}

#[test]
fn aarch64_registers_baseline_stubs_only() {
    let registry = StubRegistry::global(Architecture::AArch64).unwrap();
    assert!(!registry.is_empty());
    assert!(registry.iter().all(|stub| !stub.name().contains("_avx")));
    for key in registry.keys() {
        let defaults = registry.variants(key).into_iter().filter(|stub| stub.is_default()).count();
        assert!(defaults <= 1, "{key} has {defaults} default variants");
    }
}

#[test]
fn malformed_keys_report_the_violated_invariant() {
    let registry = StubRegistry::global(Architecture::Amd64).unwrap();
    let too_many = StubKey::IndexOf {
        stride: Stride::S1,
        variant: SearchVariant::MatchAny,
        value_count: 5,
    };
    assert!(matches!(
        registry.select(&too_many, None),
        Err(IntrinsicError::InvariantViolation { .. })
    ));

    let reversed = StubKey::RegionEquals {
        stride_a: Stride::S1,
        stride_b: Stride::S2,
    };
    assert!(matches!(
        registry.select(&reversed, None),
        Err(IntrinsicError::InvariantViolation { .. })
    ));
}

#[test]
fn node_construction_checks_value_count() {
    let arena = Bump::new();
    let session = CompilationSession::new(&arena);
    let mut graph = Graph::new(&session);
    let placeholder = graph.add_parameter(0, Stamp::int());
    let values = vec![placeholder; 3];
    let result = ArrayIndexOfNode::new(
        Stride::S2,
        SearchVariant::MatchRange,
        LocationIdentity::Array(ElementKind::Char),
        ArrayRegion::new(placeholder, placeholder),
        placeholder,
        placeholder,
        values,
    );
    match result {
        Err(IntrinsicError::InvariantViolation { invariant, .. }) => assert!(!invariant.is_empty()),
        other => panic!("expected an invariant violation, got {other:?}"),
    }
}

#[test]
fn every_search_shape_selects_its_own_stub_or_is_rejected() {
    let registry = StubRegistry::global(Architecture::Amd64).unwrap();
    for &stride in Stride::ARRAY_STRIDES {
        for value_count in 1..=4 {
            for (consecutive, masked) in [(false, false), (true, false), (false, true), (true, true)] {
                let key = StubKey::IndexOf {
                    stride,
                    variant: SearchVariant::from_flags(consecutive, masked),
                    value_count,
                };
                match registry.select(&key, None) {
                    Ok(stub) => assert_eq!(stub.key(), &key),
                    Err(IntrinsicError::InvariantViolation { .. }) => assert!(key.validate().is_err()),
                    Err(other) => panic!("{key} failed with {other}"),
                }
            }
        }
    }
}
