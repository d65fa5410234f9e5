//! spec.md §8's round-trip / format-equivalence invariants, restricted to
//! what the external interface actually exposes: there is no param writer
//! (§6 lists no `save_param`), so "round trip" here means the parser is
//! deterministic — loading the same text twice produces isomorphic graphs —
//! and that loading drives identical execution results.

use inferlite::{Net, Tensor};

const PARAM: &str = "7767517\n3 3\nInput input 0 1 blob0\nScale scale 1 1 blob0 blob1 0=2.0\nReLU relu 1 1 blob1 blob2\n";

fn blob_names(net: &Net) -> Vec<Option<usize>> {
    ["blob0", "blob1", "blob2"].iter().map(|n| net.find_blob_index_by_name(n)).collect()
}

#[test]
fn reparsing_the_same_text_yields_an_isomorphic_graph() {
    let mut first = Net::new();
    first.load_param(&mut PARAM.as_bytes()).unwrap();

    let mut second = Net::new();
    second.load_param(&mut PARAM.as_bytes()).unwrap();

    assert_eq!(first.layer_count(), second.layer_count());
    assert_eq!(first.blob_count(), second.blob_count());
    assert_eq!(blob_names(&first), blob_names(&second));
    assert_eq!(first.find_layer_index_by_name("scale"), second.find_layer_index_by_name("scale"));
}

#[test]
fn reparsed_graphs_execute_to_the_same_result() {
    let mut first = Net::new();
    first.load_param(&mut PARAM.as_bytes()).unwrap();
    let mut second = Net::new();
    second.load_param(&mut PARAM.as_bytes()).unwrap();

    let input = Tensor::from_data(&[3], &[-1.0, 2.0, -3.0]).unwrap();

    let mut ex1 = first.create_extractor();
    ex1.input(0, &input).unwrap();
    let out1 = ex1.extract(2).unwrap();

    let mut ex2 = second.create_extractor();
    ex2.input(0, &input).unwrap();
    let out2 = ex2.extract(2).unwrap();

    assert_eq!(out1.to_vec(), out2.to_vec());
    // Scale(2.0) then ReLU: negatives go to zero, positives double.
    assert_eq!(out1.to_vec(), vec![0.0, 4.0, 0.0]);
}

#[test]
fn extract_is_idempotent_under_lightmode_off() {
    let mut net = Net::new();
    net.load_param(&mut PARAM.as_bytes()).unwrap();
    let mut ex = net.create_extractor();
    ex.set_light_mode(false);
    ex.input(0, &Tensor::from_data(&[3], &[-1.0, 2.0, -3.0]).unwrap()).unwrap();

    let first = ex.extract(2).unwrap();
    let second = ex.extract(2).unwrap();
    assert_eq!(first.to_vec(), second.to_vec());
}
