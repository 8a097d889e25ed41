use bumpalo::Bump;
use object::{File, Object, ObjectSection, ObjectSymbol};

use tpde_intrinsics::core::element::{ElementKind, Stride};
use tpde_intrinsics::core::{CompilationSession, Constant, Graph, IntrinsicError, LocationIdentity, NodeId, Stamp};
use tpde_intrinsics::lowering::{lower_graph, InlineOp, LoweringBackend, StubCall};
use tpde_intrinsics::nodes::{
    ArrayEqualsNode, ArrayIndexOfNode, ArrayRegion, BitOp, BitOpNode, HalfFloatNode, HalfFloatOp, SearchVariant,
};
use tpde_intrinsics::stubs::ValueKind;
use tpde_intrinsics::target::{Architecture, CpuFeatureSet, TargetDescription};
use tpde_intrinsics::x64::{write_object, X64Backend};
use tpde_intrinsics::IntrinsicResult;

#[derive(Debug, Clone, PartialEq)]
enum Event {
    Parameter(u32),
    Constant,
    Inline(&'static str),
    Call(String),
}

/// Backend that records what it was asked to emit.
struct RecordingBackend {
    target: TargetDescription,
    events: Vec<Event>,
}

impl RecordingBackend {
    fn new() -> Self {
        Self {
            target: TargetDescription::amd64(),
            events: Vec::new(),
        }
    }

    fn record(&mut self, event: Event) -> usize {
        self.events.push(event);
        self.events.len() - 1
    }

    fn calls(&self) -> Vec<&str> {
        self.events
            .iter()
            .filter_map(|event| match event {
                Event::Call(name) => Some(name.as_str()),
                _ => None,
            })
            .collect()
    }

    fn inlined(&self) -> Vec<&'static str> {
        self.events
            .iter()
            .filter_map(|event| match event {
                Event::Inline(name) => Some(*name),
                _ => None,
            })
            .collect()
    }
}

impl LoweringBackend for RecordingBackend {
    type Value = usize;

    fn target(&self) -> &TargetDescription {
        &self.target
    }

    fn parameter(&mut self, index: u32, _stamp: &Stamp) -> IntrinsicResult<usize> {
        Ok(self.record(Event::Parameter(index)))
    }

    fn constant(&mut self, _constant: &Constant<'_>) -> IntrinsicResult<usize> {
        Ok(self.record(Event::Constant))
    }

    fn emit_inline(&mut self, op: &InlineOp, _args: &[usize]) -> IntrinsicResult<usize> {
        Ok(self.record(Event::Inline(op.name())))
    }

    fn emit_stub_call(&mut self, call: &StubCall, args: &[usize]) -> IntrinsicResult<usize> {
        assert_eq!(args.len(), call.descriptor.args().len());
        Ok(self.record(Event::Call(call.descriptor.name().to_string())))
    }
}

fn char_index_of(graph: &mut Graph<'_>, runtime_checked: Option<CpuFeatureSet>) -> NodeId {
    let array = graph.add_parameter(0, Stamp::array());
    let length = graph.add_parameter(1, Stamp::int());
    let offset = graph.add_constant(Constant::Long(16));
    let from = graph.add_constant(Constant::Int(0));
    let value = graph.add_constant(Constant::Int(0x20));
    let mut node = ArrayIndexOfNode::new(
        Stride::S2,
        SearchVariant::MatchAny,
        LocationIdentity::Array(ElementKind::Char),
        ArrayRegion::new(array, offset),
        length,
        from,
        vec![value],
    )
    .unwrap();
    if let Some(features) = runtime_checked {
        node = node.with_runtime_checked(features);
    }
    graph.add_intrinsic(node).unwrap()
}

#[test]
fn unknown_search_calls_the_selected_stub() {
    let _ = env_logger::builder().is_test(true).try_init();

    let arena = Bump::new();
    let session = CompilationSession::new(&arena);
    let mut graph = Graph::new(&session);
    let avx2 = CpuFeatureSet::parse(Architecture::Amd64, "avx,avx2,bmi1,bmi2,lzcnt,fma,f16c").unwrap();
    char_index_of(&mut graph, None);
    char_index_of(&mut graph, Some(avx2));

    let mut backend = RecordingBackend::new();
    lower_graph(&graph, &mut backend).unwrap();
    let calls = backend.calls();
    assert_eq!(calls.len(), 2);
    assert!(!calls[0].contains('_'));
    assert!(calls[1].ends_with("_avx2"));

    let stats = session.stats();
    assert_eq!(stats.stub_calls, 2);
    assert!(stats.linked_stubs.iter().any(|name| name.ends_with("_avx2")));
}

#[test]
fn bit_operations_lower_inline() {
    let arena = Bump::new();
    let session = CompilationSession::new(&arena);
    let mut graph = Graph::new(&session);
    let x = graph.add_parameter(0, Stamp::long());
    graph.add_intrinsic(BitOpNode::new(BitOp::BitCount, 64, x).unwrap()).unwrap();
    graph.add_intrinsic(BitOpNode::new(BitOp::TrailingZeros, 64, x).unwrap()).unwrap();

    let mut backend = RecordingBackend::new();
    lower_graph(&graph, &mut backend).unwrap();
    assert_eq!(backend.inlined(), vec!["BitCount", "TrailingZeros"]);
    assert!(backend.calls().is_empty());
}

#[test]
fn half_float_needs_f16c_to_inline() {
    let arena = Bump::new();
    let session = CompilationSession::new(&arena);
    let mut graph = Graph::new(&session);
    let x = graph.add_parameter(0, Stamp::float());
    let f16c = CpuFeatureSet::parse(Architecture::Amd64, "f16c").unwrap();
    graph.add_intrinsic(HalfFloatNode::new(HalfFloatOp::FloatToHalf, x)).unwrap();
    graph
        .add_intrinsic(HalfFloatNode::new(HalfFloatOp::FloatToHalf, x).with_runtime_checked(f16c))
        .unwrap();

    let mut backend = RecordingBackend::new();
    lower_graph(&graph, &mut backend).unwrap();
    assert_eq!(backend.calls(), vec!["floatToFloat16"]);
    assert_eq!(backend.inlined(), vec!["FloatToHalf"]);
}

#[test]
fn short_equality_is_inlined_float_equality_is_not() {
    let arena = Bump::new();
    let session = CompilationSession::new(&arena);
    let mut graph = Graph::new(&session);
    let a = graph.add_parameter(0, Stamp::array());
    let b = graph.add_parameter(1, Stamp::array());
    let zero = graph.add_constant(Constant::Long(0));
    let four = graph.add_constant(Constant::Int(4));
    for kind in [ElementKind::Int, ElementKind::Double] {
        let node = ArrayEqualsNode::new(kind, ArrayRegion::new(a, zero), ArrayRegion::new(b, zero), four);
        graph.add_intrinsic(node).unwrap();
    }

    let mut backend = RecordingBackend::new();
    lower_graph(&graph, &mut backend).unwrap();
    assert_eq!(backend.inlined(), vec!["ArrayEquals"]);
    assert_eq!(backend.calls().len(), 1);
}

#[test]
fn virtual_arrays_cannot_be_lowered() {
    let arena = Bump::new();
    let session = CompilationSession::new(&arena);
    let mut graph = Graph::new(&session);
    let x = graph.add_parameter(0, Stamp::int());
    let virtual_array = graph.add_virtual_array(ElementKind::Int, vec![x, x]).unwrap();
    let b = graph.add_parameter(1, Stamp::array());
    let zero = graph.add_constant(Constant::Long(0));
    let length = graph.add_parameter(2, Stamp::int());
    let node = ArrayEqualsNode::new(
        ElementKind::Int,
        ArrayRegion::new(virtual_array, zero),
        ArrayRegion::new(b, zero),
        length,
    );
    graph.add_intrinsic(node).unwrap();

    let mut backend = RecordingBackend::new();
    assert!(matches!(
        lower_graph(&graph, &mut backend),
        Err(IntrinsicError::NotLowerable { .. })
    ));
}

#[test]
fn x64_object_links_against_stub_symbols() {
    let arena = Bump::new();
    let session = CompilationSession::new(&arena);
    let mut graph = Graph::new(&session);
    let found = char_index_of(&mut graph, None);

    let mut backend = X64Backend::new(TargetDescription::amd64(), &[ValueKind::Pointer, ValueKind::Int]).unwrap();
    let values = lower_graph(&graph, &mut backend).unwrap();
    let function = backend.emit(values.get(&found).copied()).unwrap();
    assert_eq!(function.relocations.len(), 1);
    let stub = function.relocations[0].stub.clone();
    assert_eq!(session.stats().linked_stubs, vec![stub.clone()]);

    let obj = write_object("find_space", &function).unwrap();
    let file = File::parse(&*obj).unwrap();
    let text = file.section_by_name(".text").unwrap();
    assert_eq!(text.relocations().count(), 1);
    assert!(file.symbol_by_name("find_space").is_some_and(|sym| sym.is_definition()));
    assert!(file.symbol_by_name(&stub).is_some_and(|sym| sym.is_undefined()));
}

#[test]
fn x64_bit_count_needs_no_stubs() {
    let arena = Bump::new();
    let session = CompilationSession::new(&arena);
    let mut graph = Graph::new(&session);
    let x = graph.add_parameter(0, Stamp::long());
    let count = graph.add_intrinsic(BitOpNode::new(BitOp::BitCount, 64, x).unwrap()).unwrap();
    let leading = graph.add_intrinsic(BitOpNode::new(BitOp::LeadingZeros, 32, count).unwrap()).unwrap();

    let mut backend = X64Backend::new(TargetDescription::amd64(), &[ValueKind::Long]).unwrap();
    let values = lower_graph(&graph, &mut backend).unwrap();
    let function = backend.emit(values.get(&leading).copied()).unwrap();
    assert!(function.relocations.is_empty());
    assert_eq!(function.code.first(), Some(&0x55)); // push rbp

    let obj = write_object("count_bits", &function).unwrap();
    let file = File::parse(&*obj).unwrap();
    assert!(file.symbol_by_name("count_bits").is_some());
}

#[test]
fn oversized_constant_equality_calls_the_stub() {
    let arena = Bump::new();
    let session = CompilationSession::new(&arena);
    let mut graph = Graph::new(&session);
    let a = graph.add_parameter(0, Stamp::array());
    let b = graph.add_parameter(1, Stamp::array());
    let zero = graph.add_constant(Constant::Long(0));
    let huge = graph.add_constant(Constant::Long(i64::MAX));
    let node = ArrayEqualsNode::new(ElementKind::Long, ArrayRegion::new(a, zero), ArrayRegion::new(b, zero), huge);
    graph.add_intrinsic(node).unwrap();

    let mut backend = RecordingBackend::new();
    lower_graph(&graph, &mut backend).unwrap();
    assert!(backend.inlined().is_empty());
    assert_eq!(backend.calls().len(), 1);
}
