use inferlite::{Net, Tensor};

/// Builds a tiny three-layer graph by hand (no `.param`/`.bin` files on
/// disk to point at yet) and runs one extraction, the way `xor.rs` built a
/// graph in code instead of loading one — same shape of demo, new engine.
fn trivial_param() -> &'static str {
    "7767517\n4 4\n\
     Input data 0 1 data\n\
     Scale scale1 1 1 data hidden 0=2.0\n\
     ReLU relu1 1 1 hidden activated\n\
     Scale scale2 1 1 activated out 0=0.5\n"
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    println!("inferlite demo: Input -> Scale(2.0) -> ReLU -> Scale(0.5)");

    let mut net = Net::new();
    net.load_param(&mut trivial_param().as_bytes())?;
    println!("loaded graph: {} layers, {} blobs", net.layer_count(), net.blob_count());

    let mut ex = net.create_extractor();
    ex.set_light_mode(true);

    let input = Tensor::from_data(&[4], &[-1.0, 0.5, -2.0, 3.0])?;
    ex.input_by_name("data", &input)?;

    let output = ex.extract_by_name("out")?;
    println!("input:  {:?}", input.to_vec());
    println!("output: {:?}", output.to_vec());

    Ok(())
}
