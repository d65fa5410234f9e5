//! The per-layer contract and the registry that constructs layers by type.
//!
//! Generalizes the teacher's `#[typetag::serde]`-registered `Layer` trait
//! (`src/lib.rs`) from a serialization registry into a construction registry:
//! this engine never serializes a `dyn Layer`, it builds one from a parsed
//! [`crate::paramdict::ParamDict`] while streaming a `.param` file, so the
//! registry key is the wire format's type name/index rather than a serde tag.

use std::collections::HashMap;

#[cfg(feature = "cuda")]
use crate::backend::DeviceTensor;
use crate::error::{Error, LayerTypeId, Result};
use crate::option::ExtractorOptions;
use crate::paramdict::ParamDict;
use crate::tensor::Tensor;

/// High bit set on a binary-format type index to mark it as custom, so
/// custom indices can never collide with built-in ones (spec.md §4.3).
pub const CUSTOM_BIT: u32 = 1 << 31;

/// Weight tensors pulled from the `.bin` model file in the layer's own
/// declared order. One `Layer::load_model` call drains as many tensors as
/// that layer type needs; order and count are a contract between the layer
/// and its own `load_model` implementation, not enforced generically here.
pub trait ModelBin {
    /// Reads the next weight tensor of the given logical `shape`.
    fn read(&mut self, shape: &[usize]) -> Result<Tensor>;
}

/// Every layer type — built-in or custom — implements this.
///
/// `forward`/`forward_inplace` are the CPU contract; the `*_gpu` variants
/// exist only when the `cuda` feature is enabled and carry the same
/// semantics over [`DeviceTensor`]s and a backend-provided command recorder.
pub trait Layer: Send + Sync {
    fn type_name(&self) -> &'static str;

    /// Whether this layer takes exactly one input and produces exactly one output.
    fn one_blob_only(&self) -> bool {
        false
    }

    /// Whether the executor may run this layer's output directly over its
    /// input's storage instead of allocating a fresh tensor.
    fn support_inplace(&self) -> bool {
        false
    }

    /// Whether this layer has a GPU implementation at all.
    fn support_gpu(&self) -> bool {
        false
    }

    /// Extracts configuration from `pd` and computes any derived constants.
    /// Called once, before `load_model`.
    fn load_param(&mut self, pd: &ParamDict) -> Result<()>;

    /// Pulls this layer's weight tensors from `mb` in a fixed, layer-specific
    /// order. Called once, after `load_param`. Layers with no weights (e.g.
    /// `Input`, `ReLU`) accept the default no-op.
    fn load_model(&mut self, _mb: &mut dyn ModelBin) -> Result<()> {
        Ok(())
    }

    /// Out-of-place forward: allocates and populates `tops` from `bottoms`.
    fn forward(&self, bottoms: &[Tensor], tops: &mut [Tensor], opt: &ExtractorOptions) -> Result<()>;

    /// In-place forward: mutates `bottom_tops` directly. Only called when
    /// `support_inplace()` is true and the executor has verified (spec.md
    /// §4.5) that none of `bottom_tops` is shared (`refcount() == 1`).
    fn forward_inplace(&self, _bottom_tops: &mut [Tensor], _opt: &ExtractorOptions) -> Result<()> {
        Err(Error::BackendError(format!(
            "{} does not support in-place execution",
            self.type_name()
        )))
    }

    #[cfg(feature = "cuda")]
    fn forward_gpu(
        &self,
        _bottoms: &[DeviceTensor],
        _tops: &mut [DeviceTensor],
        _opt: &ExtractorOptions,
        _backend: &crate::backend::gpu::GpuBackend,
    ) -> Result<()> {
        Err(Error::BackendError(format!(
            "{} has no GPU implementation",
            self.type_name()
        )))
    }

    #[cfg(feature = "cuda")]
    fn forward_inplace_gpu(
        &self,
        _bottom_tops: &mut [DeviceTensor],
        _opt: &ExtractorOptions,
        _backend: &crate::backend::gpu::GpuBackend,
    ) -> Result<()> {
        Err(Error::BackendError(format!(
            "{} does not support in-place GPU execution",
            self.type_name()
        )))
    }
}

type Constructor = fn() -> Box<dyn Layer>;

/// Maps a stable built-in type index or a custom type name/index to a
/// constructor, matching `original_source/src/net.cpp`'s built-in
/// `layer_to_index` table plus its `custom_layer_registry` vector.
pub struct LayerRegistry {
    builtin_by_name: HashMap<&'static str, (u32, Constructor)>,
    builtin_by_index: HashMap<u32, Constructor>,
    custom_by_name: HashMap<String, Constructor>,
    custom_by_index: HashMap<u32, Constructor>,
}

impl LayerRegistry {
    pub fn new() -> Self {
        Self {
            builtin_by_name: HashMap::new(),
            builtin_by_index: HashMap::new(),
            custom_by_name: HashMap::new(),
            custom_by_index: HashMap::new(),
        }
    }

    /// Registers a built-in type. Not for external callers; the crate's
    /// `with_builtins()` constructor calls this once per shipped layer.
    pub(crate) fn register_builtin(&mut self, name: &'static str, index: u32, ctor: Constructor) {
        self.builtin_by_name.insert(name, (index, ctor));
        self.builtin_by_index.insert(index, ctor);
    }

    /// Registers a custom layer by name (`NCNN_STRING`-equivalent path in
    /// `original_source`). Rejects collisions with a built-in name;
    /// overwrites an existing custom registration with the same name.
    pub fn register_custom_layer_by_name(&mut self, name: &str, ctor: Constructor) -> Result<()> {
        if self.builtin_by_name.contains_key(name) {
            return Err(Error::BadParam(format!(
                "cannot register built-in layer type {name:?} as custom"
            )));
        }
        if self.custom_by_name.contains_key(name) {
            tracing::warn!(name, "overwriting existing custom layer registration");
        }
        self.custom_by_name.insert(name.to_string(), ctor);
        Ok(())
    }

    /// Registers a custom layer by index. `index` must have [`CUSTOM_BIT`]
    /// set; the stored key is the bit-masked value.
    pub fn register_custom_layer_by_index(&mut self, index: u32, ctor: Constructor) -> Result<()> {
        let custom_index = index & !CUSTOM_BIT;
        if index == custom_index {
            return Err(Error::BadParam(format!(
                "cannot register built-in layer index {custom_index} as custom"
            )));
        }
        if self.custom_by_index.contains_key(&custom_index) {
            tracing::warn!(custom_index, "overwriting existing custom layer registration");
        }
        self.custom_by_index.insert(custom_index, ctor);
        Ok(())
    }

    pub fn create_by_name(&self, name: &str) -> Result<Box<dyn Layer>> {
        if let Some((_, ctor)) = self.builtin_by_name.get(name) {
            return Ok(ctor());
        }
        if let Some(ctor) = self.custom_by_name.get(name) {
            return Ok(ctor());
        }
        Err(Error::UnknownLayerType(LayerTypeId::Name(name.to_string())))
    }

    pub fn create_by_index(&self, index: u32) -> Result<Box<dyn Layer>> {
        if index & CUSTOM_BIT != 0 {
            let custom_index = index & !CUSTOM_BIT;
            return self
                .custom_by_index
                .get(&custom_index)
                .map(|ctor| ctor())
                .ok_or(Error::UnknownLayerType(LayerTypeId::Index(index)));
        }
        self.builtin_by_index
            .get(&index)
            .map(|ctor| ctor())
            .ok_or(Error::UnknownLayerType(LayerTypeId::Index(index)))
    }
}

impl Default for LayerRegistry {
    fn default() -> Self {
        Self::new()
    }
}
