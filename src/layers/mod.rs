//! The built-in layer set: enough breadth to exercise the weight loader and
//! the scenarios in spec.md §8 without pulling in a full operator zoo.

pub mod binary_sum;
pub mod input;
pub mod inner_product;
pub mod relu;
pub mod scale;
pub mod sigmoid;

use crate::layer::LayerRegistry;

/// Built-in type indices, matching `original_source/src/net.cpp`'s stable
/// integer table (the real ncnn table has dozens of entries; this engine's
/// closed built-in set reuses the low end of the same numbering style).
pub mod type_index {
    pub const INPUT: u32 = 0;
    pub const SCALE: u32 = 1;
    pub const BINARY_SUM: u32 = 2;
    pub const RELU: u32 = 3;
    pub const SIGMOID: u32 = 4;
    pub const INNER_PRODUCT: u32 = 5;
}

/// Builds a registry with every built-in layer type registered under both
/// its name and its stable index, for the textual and binary loaders respectively.
pub fn registry_with_builtins() -> LayerRegistry {
    let mut reg = LayerRegistry::new();
    reg.register_builtin("Input", type_index::INPUT, || Box::new(input::Input::default()));
    reg.register_builtin("Scale", type_index::SCALE, || Box::new(scale::Scale::default()));
    reg.register_builtin("BinarySum", type_index::BINARY_SUM, || {
        Box::new(binary_sum::BinarySum::default())
    });
    reg.register_builtin("ReLU", type_index::RELU, || Box::new(relu::ReLU::default()));
    reg.register_builtin("Sigmoid", type_index::SIGMOID, || {
        Box::new(sigmoid::Sigmoid::default())
    });
    reg.register_builtin("InnerProduct", type_index::INNER_PRODUCT, || {
        Box::new(inner_product::InnerProduct::default())
    });
    reg
}
