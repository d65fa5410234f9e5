//! CUDA-backed `Backend`, grounded in the teacher's `CUDABackend`
//! (`src/backend/cuda/mod.rs`): same `cudarc::driver::CudaDevice` +
//! NVRTC-compiled PTX kernel setup, generalized from a training backend
//! (forward *and* backward kernels) down to the forward-only kernel set
//! this engine's built-in layers need, and extended with the
//! command-recording primitives (`alloc`/`upload`/`download`/`barrier`)
//! spec.md §4.5/§4.6 require that the teacher's trait never needed.

mod kernels;

use std::sync::Arc;

use cudarc::driver::{CudaDevice, LaunchAsync, LaunchConfig};

use crate::backend::{Backend, BackendKind, DeviceTensor};
use crate::error::{Error, Result};
use crate::layer::Layer;
use crate::option::ExtractorOptions;
use crate::tensor::Tensor;

pub struct GpuBackend {
    device: Arc<CudaDevice>,
}

impl GpuBackend {
    pub fn new(device_index: usize) -> Result<Self> {
        let device = CudaDevice::new(device_index)
            .map_err(|e| Error::BackendError(format!("failed to initialize CUDA device {device_index}: {e:?}")))?;
        let ptx = cudarc::nvrtc::compile_ptx(kernels::ELEMENTWISE_KERNELS)
            .map_err(|e| Error::BackendError(format!("NVRTC compilation failed: {e:?}")))?;
        device
            .load_ptx(ptx, "elementwise", kernels::FUNCTION_NAMES)
            .map_err(|e| Error::BackendError(format!("failed to load PTX: {e:?}")))?;
        Ok(Self { device })
    }

    fn as_cuda<'a>(&self, dev: &'a DeviceTensor) -> Result<(&'a Arc<cudarc::driver::CudaSlice<f32>>, &'a [usize])> {
        match dev {
            DeviceTensor::Cuda { slice, shape } => Ok((slice, shape)),
            DeviceTensor::Host(_) => Err(Error::BackendError(
                "GpuBackend cannot operate on a host-resident tensor; upload it first".into(),
            )),
        }
    }

    /// Launches a unary elementwise kernel (`relu_kernel`/`sigmoid_kernel`) over `n` elements.
    fn launch_unary(&self, func_name: &str, input: &Arc<cudarc::driver::CudaSlice<f32>>, n: usize) -> Result<cudarc::driver::CudaSlice<f32>> {
        let mut out = self
            .device
            .alloc_zeros::<f32>(n)
            .map_err(|e| Error::BackendError(format!("CUDA alloc failed: {e:?}")))?;
        let func = self
            .device
            .get_func("elementwise", func_name)
            .ok_or_else(|| Error::BackendError(format!("kernel {func_name:?} not found")))?;
        let cfg = LaunchConfig::for_num_elems(n as u32);
        unsafe { func.launch(cfg, (&mut out, input.as_ref(), n as i32)) }
            .map_err(|e| Error::BackendError(format!("kernel launch failed: {e:?}")))?;
        Ok(out)
    }
}

impl Backend for GpuBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Gpu
    }

    fn alloc(&self, shape: &[usize]) -> Result<DeviceTensor> {
        let n: usize = shape.iter().product::<usize>().max(1);
        let slice = self
            .device
            .alloc_zeros::<f32>(n)
            .map_err(|e| Error::BackendError(format!("CUDA alloc failed: {e:?}")))?;
        Ok(DeviceTensor::Cuda {
            slice: Arc::new(slice),
            shape: shape.to_vec(),
        })
    }

    /// Stages `host` into pinned-equivalent CPU memory and copies it to the
    /// device (`htod_copy`) — this crate's staging-buffer upload.
    fn upload(&self, host: &Tensor) -> Result<DeviceTensor> {
        let data = host.to_vec();
        let slice = self
            .device
            .htod_copy(data)
            .map_err(|e| Error::BackendError(format!("CUDA host-to-device copy failed: {e:?}")))?;
        Ok(DeviceTensor::Cuda {
            slice: Arc::new(slice),
            shape: host.shape(),
        })
    }

    /// Copies device storage back into a staging buffer and wraps it as a
    /// host [`Tensor`] — this crate's staging-buffer download.
    fn download(&self, dev: &DeviceTensor) -> Result<Tensor> {
        let (slice, shape) = self.as_cuda(dev)?;
        let data = self
            .device
            .dtoh_sync_copy(slice.as_ref())
            .map_err(|e| Error::BackendError(format!("CUDA device-to-host copy failed: {e:?}")))?;
        Tensor::from_data(shape, &data)
    }

    fn dispatch(
        &self,
        layer: &dyn Layer,
        bottoms: &[DeviceTensor],
        tops: &mut [DeviceTensor],
        opt: &ExtractorOptions,
    ) -> Result<()> {
        if !layer.support_gpu() {
            return Err(Error::BackendError(format!(
                "{} has no GPU implementation",
                layer.type_name()
            )));
        }
        layer.forward_gpu(bottoms, tops, opt, self)
    }

    fn dispatch_inplace(&self, layer: &dyn Layer, bottom_tops: &mut [DeviceTensor], opt: &ExtractorOptions) -> Result<()> {
        if !layer.support_gpu() {
            return Err(Error::BackendError(format!(
                "{} has no GPU implementation",
                layer.type_name()
            )));
        }
        layer.forward_inplace_gpu(bottom_tops, opt, self)
    }

    /// No device-to-device copy primitive is wired up; round-trips through
    /// a host staging buffer instead, reusing the same `upload`/`download`
    /// path a fresh extraction's inputs/outputs already take. Rare in
    /// practice — it only fires when an in-place GPU layer's bottom is
    /// still aliased by another pending consumer.
    fn deep_clone(&self, dev: &DeviceTensor) -> Result<DeviceTensor> {
        let host = self.download(dev)?;
        self.upload(&host)
    }

    /// CUDA streams already serialize same-stream launches, so the
    /// "barrier" is just a synchronize point giving later work on other
    /// streams somewhere to wait on; this single-stream backend folds it
    /// into an explicit device sync.
    fn barrier(&self, _after: &DeviceTensor) {
        let _ = self.device.synchronize();
    }
}

/// Shared built-in-kernel launchers, used by the individual layers'
/// `forward_gpu` implementations (`#[cfg(feature = "cuda")]`).
impl GpuBackend {
    pub fn relu(&self, input: &DeviceTensor) -> Result<DeviceTensor> {
        let (slice, shape) = self.as_cuda(input)?;
        let n: usize = shape.iter().product::<usize>().max(1);
        let out = self.launch_unary("relu_kernel", slice, n)?;
        Ok(DeviceTensor::Cuda { slice: Arc::new(out), shape: shape.to_vec() })
    }

    pub fn sigmoid(&self, input: &DeviceTensor) -> Result<DeviceTensor> {
        let (slice, shape) = self.as_cuda(input)?;
        let n: usize = shape.iter().product::<usize>().max(1);
        let out = self.launch_unary("sigmoid_kernel", slice, n)?;
        Ok(DeviceTensor::Cuda { slice: Arc::new(out), shape: shape.to_vec() })
    }

    pub fn scale(&self, input: &DeviceTensor, scale: f32) -> Result<DeviceTensor> {
        let (slice, shape) = self.as_cuda(input)?;
        let n: usize = shape.iter().product::<usize>().max(1);
        let mut out = self
            .device
            .alloc_zeros::<f32>(n)
            .map_err(|e| Error::BackendError(format!("CUDA alloc failed: {e:?}")))?;
        let func = self
            .device
            .get_func("elementwise", "scale_kernel")
            .ok_or_else(|| Error::BackendError("kernel scale_kernel not found".into()))?;
        let cfg = LaunchConfig::for_num_elems(n as u32);
        unsafe { func.launch(cfg, (&mut out, slice.as_ref(), scale, n as i32)) }
            .map_err(|e| Error::BackendError(format!("kernel launch failed: {e:?}")))?;
        Ok(DeviceTensor::Cuda { slice: Arc::new(out), shape: shape.to_vec() })
    }

    pub fn add(&self, a: &DeviceTensor, b: &DeviceTensor) -> Result<DeviceTensor> {
        let (a_slice, shape) = self.as_cuda(a)?;
        let (b_slice, _) = self.as_cuda(b)?;
        let n: usize = shape.iter().product::<usize>().max(1);
        let mut out = self
            .device
            .alloc_zeros::<f32>(n)
            .map_err(|e| Error::BackendError(format!("CUDA alloc failed: {e:?}")))?;
        let func = self
            .device
            .get_func("elementwise", "add_kernel")
            .ok_or_else(|| Error::BackendError("kernel add_kernel not found".into()))?;
        let cfg = LaunchConfig::for_num_elems(n as u32);
        unsafe { func.launch(cfg, (&mut out, a_slice.as_ref(), b_slice.as_ref(), n as i32)) }
            .map_err(|e| Error::BackendError(format!("kernel launch failed: {e:?}")))?;
        Ok(DeviceTensor::Cuda { slice: Arc::new(out), shape: shape.to_vec() })
    }
}
