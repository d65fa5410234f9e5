//! Execution backend glue: the seam between a [`crate::layer::Layer`] and
//! the device it actually runs on.
//!
//! Generalizes the teacher's `Backend` trait (one method per kernel, CPU vs
//! CUDA impl) into a backend that also exposes the command-recording
//! primitives the executor's GPU path needs: allocation, host<->device
//! staging, dispatch, and a barrier between a producer and its consumers.

use crate::error::Result;
use crate::layer::Layer;
use crate::option::ExtractorOptions;
use crate::tensor::Tensor;

pub mod cpu;
#[cfg(feature = "cuda")]
pub mod gpu;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendKind {
    Cpu,
    Gpu,
}

/// A tensor living on whatever device a [`Backend`] manages. The CPU backend
/// only ever produces `Host`; the GPU backend produces `Cuda` and uses
/// `upload`/`download` to cross the host/device boundary, matching the
/// staging-buffer flow spec.md §4.5 describes.
#[derive(Clone)]
pub enum DeviceTensor {
    Host(Tensor),
    #[cfg(feature = "cuda")]
    Cuda {
        slice: std::sync::Arc<cudarc::driver::CudaSlice<f32>>,
        shape: Vec<usize>,
    },
}

impl DeviceTensor {
    pub fn shape(&self) -> Vec<usize> {
        match self {
            DeviceTensor::Host(t) => t.shape(),
            #[cfg(feature = "cuda")]
            DeviceTensor::Cuda { shape, .. } => shape.clone(),
        }
    }

    /// Whether this handle's storage is aliased by another live `DeviceTensor`
    /// (another pending consumer's copy, or a still-resident blob slot).
    /// The executor's in-place safety check (spec.md §4.5) clones storage
    /// before mutating in place exactly when this is `true`.
    pub fn is_shared(&self) -> bool {
        match self {
            DeviceTensor::Host(t) => t.refcount() > 1,
            #[cfg(feature = "cuda")]
            DeviceTensor::Cuda { slice, .. } => std::sync::Arc::strong_count(slice) > 1,
        }
    }
}

pub trait Backend: Send + Sync {
    fn kind(&self) -> BackendKind;

    /// Allocates zeroed device storage of `shape`.
    fn alloc(&self, shape: &[usize]) -> Result<DeviceTensor>;

    /// Stages and copies `host` onto this backend's device.
    fn upload(&self, host: &Tensor) -> Result<DeviceTensor>;

    /// Copies device storage back to a host-resident [`Tensor`].
    fn download(&self, dev: &DeviceTensor) -> Result<Tensor>;

    /// Runs `layer`'s out-of-place forward over device tensors.
    fn dispatch(
        &self,
        layer: &dyn Layer,
        bottoms: &[DeviceTensor],
        tops: &mut [DeviceTensor],
        opt: &ExtractorOptions,
    ) -> Result<()>;

    /// Runs `layer`'s in-place forward, mutating `bottom_tops` directly.
    /// Only called by the Extractor when `layer.support_inplace()` is true
    /// and the in-place safety check (spec.md §4.5) has already cloned any
    /// shared bottom.
    fn dispatch_inplace(&self, layer: &dyn Layer, bottom_tops: &mut [DeviceTensor], opt: &ExtractorOptions) -> Result<()>;

    /// Deep-copies `dev` into freshly owned storage. Called by the Extractor
    /// immediately before an in-place dispatch when [`DeviceTensor::is_shared`]
    /// says the bottom's storage is aliased (spec.md §4.5's clone-before-mutate rule).
    fn deep_clone(&self, dev: &DeviceTensor) -> Result<DeviceTensor>;

    /// Inserts a synchronization point between a producer that wrote `after`
    /// and the consumers that read it next. No-op on CPU; a stream
    /// event/wait pair on GPU (spec.md §5: "On CPU, none").
    fn barrier(&self, after: &DeviceTensor);
}
