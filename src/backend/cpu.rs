//! The default backend: dispatches straight to `Layer::forward` on host
//! tensors. `barrier()` is a no-op — spec.md §5: "On CPU, none" — since
//! there is no device queue to order against.

use crate::backend::{Backend, BackendKind, DeviceTensor};
use crate::error::{Error, Result};
use crate::layer::Layer;
use crate::option::ExtractorOptions;
use crate::tensor::Tensor;

#[derive(Debug, Default)]
pub struct CpuBackend;

impl CpuBackend {
    pub fn new() -> Self {
        Self
    }

    fn as_host(dev: &DeviceTensor) -> Result<&Tensor> {
        match dev {
            DeviceTensor::Host(t) => Ok(t),
            #[cfg(feature = "cuda")]
            DeviceTensor::Cuda { .. } => Err(Error::BackendError(
                "CpuBackend cannot operate on a CUDA-resident tensor".into(),
            )),
        }
    }
}

impl Backend for CpuBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Cpu
    }

    fn alloc(&self, shape: &[usize]) -> Result<DeviceTensor> {
        Ok(DeviceTensor::Host(Tensor::create(shape)))
    }

    fn upload(&self, host: &Tensor) -> Result<DeviceTensor> {
        Ok(DeviceTensor::Host(host.clone()))
    }

    fn download(&self, dev: &DeviceTensor) -> Result<Tensor> {
        Ok(Self::as_host(dev)?.clone())
    }

    #[tracing::instrument(skip(self, layer, bottoms, tops, opt), fields(layer = layer.type_name()))]
    fn dispatch(
        &self,
        layer: &dyn Layer,
        bottoms: &[DeviceTensor],
        tops: &mut [DeviceTensor],
        opt: &ExtractorOptions,
    ) -> Result<()> {
        let host_bottoms: Vec<Tensor> = bottoms
            .iter()
            .map(Self::as_host)
            .collect::<Result<Vec<&Tensor>>>()?
            .into_iter()
            .cloned()
            .collect();
        let mut host_tops: Vec<Tensor> = vec![Tensor::empty(); tops.len()];
        layer.forward(&host_bottoms, &mut host_tops, opt)?;
        for (slot, t) in tops.iter_mut().zip(host_tops.into_iter()) {
            *slot = DeviceTensor::Host(t);
        }
        Ok(())
    }

    #[tracing::instrument(skip(self, layer, bottom_tops, opt), fields(layer = layer.type_name()))]
    fn dispatch_inplace(&self, layer: &dyn Layer, bottom_tops: &mut [DeviceTensor], opt: &ExtractorOptions) -> Result<()> {
        // Move each tensor out of its slot rather than cloning: `forward_inplace`
        // mutates through `Arc::get_mut`, which needs a refcount of exactly 1.
        // Leaving the old `DeviceTensor` behind in `bottom_tops` (or cloning out
        // of it) keeps a second handle alive and `get_mut` panics.
        let mut host = Vec::with_capacity(bottom_tops.len());
        for slot in bottom_tops.iter_mut() {
            let taken = std::mem::replace(slot, DeviceTensor::Host(Tensor::empty()));
            host.push(match taken {
                DeviceTensor::Host(t) => t,
                #[cfg(feature = "cuda")]
                DeviceTensor::Cuda { .. } => {
                    return Err(Error::BackendError(
                        "CpuBackend cannot operate on a CUDA-resident tensor".into(),
                    ))
                }
            });
        }
        layer.forward_inplace(&mut host, opt)?;
        for (slot, t) in bottom_tops.iter_mut().zip(host.into_iter()) {
            *slot = DeviceTensor::Host(t);
        }
        Ok(())
    }

    fn deep_clone(&self, dev: &DeviceTensor) -> Result<DeviceTensor> {
        Ok(DeviceTensor::Host(Self::as_host(dev)?.deep_clone()))
    }

    fn barrier(&self, _after: &DeviceTensor) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layers::relu::ReLU;

    #[test]
    fn dispatch_runs_layer_forward() {
        let backend = CpuBackend::new();
        let bottoms = vec![backend.upload(&Tensor::from_data(&[2], &[-1.0, 2.0]).unwrap()).unwrap()];
        let mut tops = vec![backend.alloc(&[2]).unwrap()];
        backend
            .dispatch(&ReLU::default(), &bottoms, &mut tops, &ExtractorOptions::default())
            .unwrap();
        let out = backend.download(&tops[0]).unwrap();
        assert_eq!(out.to_vec(), vec![0.0, 2.0]);
    }
}
