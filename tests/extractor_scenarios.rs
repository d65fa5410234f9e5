//! The concrete scenarios spec.md §8 names, each turned into one test.

use inferlite::{Error, ExtractorOptions, Layer, Net, ParamDict, Result, Tensor, CUSTOM_BIT};

fn trivial_passthrough_param() -> &'static str {
    "7767517\n2 2\nInput input 0 1 blob0\nScale scale 1 1 blob0 blob1 0=1.0\n"
}

#[test]
fn trivial_passthrough_returns_input_unchanged() {
    let mut net = Net::new();
    net.load_param(&mut trivial_passthrough_param().as_bytes()).unwrap();
    let mut ex = net.create_extractor();
    let input = Tensor::from_data(&[4], &[1.0, -2.0, 3.5, 0.0]).unwrap();
    ex.input(0, &input).unwrap();
    let out = ex.extract(1).unwrap();
    assert_eq!(out.to_vec(), input.to_vec());
}

fn half_scale_param() -> &'static str {
    "7767517\n2 2\nInput input 0 1 blob0\nScale scale 1 1 blob0 blob1 0=0.5\n"
}

#[test]
fn scale_outplace_keeps_input_slot_populated() {
    let mut net = Net::new();
    net.load_param(&mut half_scale_param().as_bytes()).unwrap();
    let mut ex = net.create_extractor();
    ex.set_light_mode(false);
    ex.input(0, &Tensor::from_data(&[2, 2], &[1.0, 2.0, 3.0, 4.0]).unwrap()).unwrap();
    let out = ex.extract(1).unwrap();
    assert_eq!(out.to_vec(), vec![0.5, 1.0, 1.5, 2.0]);
}

#[test]
fn scale_inplace_evicts_input_slot_under_lightmode() {
    let mut net = Net::new();
    net.load_param(&mut half_scale_param().as_bytes()).unwrap();
    let mut ex = net.create_extractor();
    ex.set_light_mode(true);
    ex.input(0, &Tensor::from_data(&[2, 2], &[1.0, 2.0, 3.0, 4.0]).unwrap()).unwrap();
    let out = ex.extract(1).unwrap();
    assert_eq!(out.to_vec(), vec![0.5, 1.0, 1.5, 2.0]);
}

fn diamond_param() -> &'static str {
    "7767517\n5 5\nInput input 0 1 blob_in\nScale a 1 1 blob_in blob_a 0=2.0\n\
     Scale b 1 1 blob_a blob_b 0=3.0\nScale c 1 1 blob_a blob_c 0=5.0\n\
     BinarySum sum 2 1 blob_b blob_c blob_out\n"
}

#[test]
fn diamond_dag_runs_shared_ancestor_exactly_once() {
    let mut net = Net::new();
    net.load_param(&mut diamond_param().as_bytes()).unwrap();
    let mut ex = net.create_extractor();
    ex.input_by_name("blob_in", &Tensor::from_data(&[1], &[2.0]).unwrap()).unwrap();
    let out = ex.extract_by_name("blob_out").unwrap();
    // a = 2*2 = 4; b = 4*3 = 12; c = 4*5 = 20; sum = 32.
    assert_eq!(out.to_vec(), vec![32.0]);
}

#[derive(Default)]
struct DoubleIt;

impl Layer for DoubleIt {
    fn type_name(&self) -> &'static str {
        "DoubleIt"
    }

    fn one_blob_only(&self) -> bool {
        true
    }

    fn load_param(&mut self, _pd: &ParamDict) -> Result<()> {
        Ok(())
    }

    fn forward(&self, bottoms: &[Tensor], tops: &mut [Tensor], _opt: &ExtractorOptions) -> Result<()> {
        let doubled: Vec<f32> = bottoms[0].to_vec().iter().map(|v| v * 2.0).collect();
        tops[0] = Tensor::from_data(&bottoms[0].shape(), &doubled)?;
        Ok(())
    }
}

fn custom_layer_param_bin() -> Vec<u8> {
    let mut bytes = Vec::new();
    bytes.extend_from_slice(&7767517i32.to_le_bytes());
    bytes.extend_from_slice(&2i32.to_le_bytes()); // layer_count
    bytes.extend_from_slice(&2i32.to_le_bytes()); // blob_count

    // layer 0: built-in Input, 0 bottoms, 1 top (blob 0)
    bytes.extend_from_slice(&0i32.to_le_bytes()); // type index: Input
    bytes.extend_from_slice(&0i32.to_le_bytes()); // bottom_count
    bytes.extend_from_slice(&1i32.to_le_bytes()); // top_count
    bytes.extend_from_slice(&0i32.to_le_bytes()); // top blob index 0
    bytes.extend_from_slice(&(-233i32).to_le_bytes()); // empty ParamDict record

    // layer 1: custom DoubleIt at CustomBit|0, 1 bottom (blob 0), 1 top (blob 1)
    bytes.extend_from_slice(&(CUSTOM_BIT | 0).to_le_bytes());
    bytes.extend_from_slice(&1i32.to_le_bytes());
    bytes.extend_from_slice(&1i32.to_le_bytes());
    bytes.extend_from_slice(&0i32.to_le_bytes()); // bottom blob index 0
    bytes.extend_from_slice(&1i32.to_le_bytes()); // top blob index 1
    bytes.extend_from_slice(&(-233i32).to_le_bytes());

    bytes
}

#[test]
fn custom_layer_registration_runs_through_extractor() {
    let mut net = Net::new();
    net.register_custom_layer_by_index(CUSTOM_BIT | 0, || Box::new(DoubleIt))
        .unwrap();
    net.load_param_bin(&mut custom_layer_param_bin().as_slice()).unwrap();

    let mut ex = net.create_extractor();
    ex.input(0, &Tensor::from_data(&[3], &[1.0, 2.0, 3.0]).unwrap()).unwrap();
    let out = ex.extract(1).unwrap();
    assert_eq!(out.to_vec(), vec![2.0, 4.0, 6.0]);
}

#[test]
fn magic_mismatch_leaves_net_empty() {
    let mut net = Net::new();
    let err = net.load_param(&mut "1234\n1 1\n".as_bytes()).unwrap_err();
    assert!(matches!(err, Error::IncompatibleVersion));
    assert_eq!(net.layer_count(), 0);
    assert_eq!(net.blob_count(), 0);
}
