use bumpalo::Bump;

use tpde_intrinsics::canonicalize::{Canonical, Canonicalizer};
use tpde_intrinsics::core::element::{ElementKind, Stride};
use tpde_intrinsics::core::{CompilationSession, Constant, Graph, LocationIdentity, NodeId, Stamp};
use tpde_intrinsics::lowering::schedule;
use tpde_intrinsics::nodes::{AesNode, ArrayEqualsNode, ArrayIndexOfNode, ArrayRegion, CipherMode, SearchVariant};

fn encrypt(graph: &mut Graph<'_>, mode: CipherMode) -> NodeId {
    let inputs: Vec<NodeId> = mode
        .arg_kinds()
        .iter()
        .enumerate()
        .map(|(i, kind)| {
            let stamp = if kind.is_float() { Stamp::double() } else { Stamp::array() };
            graph.add_parameter(i as u32, stamp)
        })
        .collect();
    graph.add_intrinsic(AesNode::new(mode, inputs).unwrap()).unwrap()
}

fn find_byte(graph: &mut Graph<'_>, array: NodeId, length: i32) -> NodeId {
    let zero = graph.add_constant(Constant::Long(0));
    let length = graph.add_constant(Constant::Int(length));
    let from = graph.add_constant(Constant::Int(0));
    let value = graph.add_constant(Constant::Int(0x2c));
    let node = ArrayIndexOfNode::new(
        Stride::S1,
        SearchVariant::MatchAny,
        LocationIdentity::Array(ElementKind::Byte),
        ArrayRegion::new(array, zero),
        length,
        from,
        vec![value],
    )
    .unwrap();
    graph.add_intrinsic(node).unwrap()
}

fn int_equals(graph: &mut Graph<'_>) -> NodeId {
    let a = graph.add_parameter(10, Stamp::array());
    let b = graph.add_parameter(11, Stamp::array());
    let zero = graph.add_constant(Constant::Long(0));
    let length = graph.add_constant(Constant::Int(8));
    let node = ArrayEqualsNode::new(ElementKind::Int, ArrayRegion::new(a, zero), ArrayRegion::new(b, zero), length);
    graph.add_intrinsic(node).unwrap()
}

#[test]
fn readers_order_after_overlapping_writers() {
    let _ = env_logger::builder().is_test(true).try_init();

    let arena = Bump::new();
    let session = CompilationSession::new(&arena);
    let mut graph = Graph::new(&session);
    let buffer = graph.add_parameter(20, Stamp::array());

    let first_read = find_byte(&mut graph, buffer, 16);
    assert_eq!(graph.last_location_access(first_read), None);

    let write = encrypt(&mut graph, CipherMode::EncryptBlock);
    assert_eq!(graph.last_location_access(write), Some(first_read));

    let second_read = find_byte(&mut graph, buffer, 16);
    assert_eq!(graph.last_location_access(second_read), Some(write));

    // Byte writes leave int arrays alone, and readers never order after readers.
    let unrelated = int_equals(&mut graph);
    assert_eq!(graph.last_location_access(unrelated), None);

    let order = schedule(&graph);
    let position = |id: NodeId| order.iter().position(|&n| n == id).unwrap();
    assert!(position(first_read) < position(write));
    assert!(position(write) < position(second_read));
}

#[test]
fn any_location_kill_orders_every_reader() {
    let arena = Bump::new();
    let session = CompilationSession::new(&arena);
    let mut graph = Graph::new(&session);

    let int_read = int_equals(&mut graph);
    let stream = encrypt(&mut graph, CipherMode::Ctr);
    assert_eq!(graph.last_location_access(stream), Some(int_read));

    let after = int_equals(&mut graph);
    assert_eq!(graph.last_location_access(after), Some(stream));
}

#[test]
fn folding_a_reader_forwards_its_predecessor() {
    let arena = Bump::new();
    let session = CompilationSession::new(&arena);
    let mut graph = Graph::new(&session);

    let first_write = encrypt(&mut graph, CipherMode::EncryptBlock);
    let table = graph.add_array(ElementKind::Byte, b"a,b", true).unwrap();
    let read = find_byte(&mut graph, table, 3);
    assert_eq!(graph.last_location_access(read), Some(first_write));
    let second_write = encrypt(&mut graph, CipherMode::DecryptBlock);
    assert_eq!(graph.last_location_access(second_write), Some(read));

    let replaced = Canonicalizer::new(&mut graph).canonicalize(read).unwrap();
    let Canonical::Replace(constant) = replaced else {
        panic!("search over a stable table did not fold");
    };
    assert_eq!(graph.constant(constant), Some(Constant::Int(1)));
    assert!(!graph.is_live(read));
    assert_eq!(graph.last_location_access(second_write), Some(first_write));
}

#[test]
fn broadened_location_orders_after_any_writer() {
    let arena = Bump::new();
    let session = CompilationSession::new(&arena);
    let mut graph = Graph::new(&session);

    let write = encrypt(&mut graph, CipherMode::EncryptBlock);
    let a = graph.add_parameter(10, Stamp::array());
    let b = graph.add_parameter(11, Stamp::array());
    let zero = graph.add_constant(Constant::Long(0));
    let length = graph.add_constant(Constant::Int(8));
    let regions = (ArrayRegion::new(a, zero), ArrayRegion::new(b, zero));

    let narrow = ArrayEqualsNode::new(ElementKind::Int, regions.0, regions.1, length);
    let narrow = graph.add_intrinsic(narrow).unwrap();
    assert_eq!(graph.last_location_access(narrow), None);

    let broad = ArrayEqualsNode::new(ElementKind::Int, regions.0, regions.1, length).with_location(LocationIdentity::Any);
    let broad = graph.add_intrinsic(broad).unwrap();
    assert_eq!(graph.last_location_access(broad), Some(write));
}
