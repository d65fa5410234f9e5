//! Grounded in the teacher's `activations::ReLU` (`src/activations/mod.rs`)
//! and `Backend::relu` CPU kernel, generalized from the teacher's in-memory
//! `mapv`/`Zip::par_for_each` pattern onto this engine's channel-packed storage.

use ndarray::Zip;

use crate::error::Result;
use crate::layer::Layer;
use crate::option::ExtractorOptions;
use crate::paramdict::ParamDict;
use crate::tensor::Tensor;

#[derive(Default)]
pub struct ReLU;

impl Layer for ReLU {
    fn type_name(&self) -> &'static str {
        "ReLU"
    }

    fn one_blob_only(&self) -> bool {
        true
    }

    fn support_inplace(&self) -> bool {
        true
    }

    fn support_gpu(&self) -> bool {
        true
    }

    fn load_param(&mut self, _pd: &ParamDict) -> Result<()> {
        Ok(())
    }

    fn forward(&self, bottoms: &[Tensor], tops: &mut [Tensor], opt: &ExtractorOptions) -> Result<()> {
        tops[0] = bottoms[0].deep_clone();
        self.forward_inplace(std::slice::from_mut(&mut tops[0]), opt)
    }

    fn forward_inplace(&self, bottom_tops: &mut [Tensor], _opt: &ExtractorOptions) -> Result<()> {
        let t = &mut bottom_tops[0];
        for q in 0..t.c().max(1) {
            let mut view = t.channel_view_mut(q);
            Zip::from(&mut view).par_for_each(|v| {
                if *v < 0.0 {
                    *v = 0.0;
                }
            });
        }
        Ok(())
    }

    #[cfg(feature = "cuda")]
    fn forward_gpu(
        &self,
        bottoms: &[crate::backend::DeviceTensor],
        tops: &mut [crate::backend::DeviceTensor],
        _opt: &ExtractorOptions,
        backend: &crate::backend::gpu::GpuBackend,
    ) -> Result<()> {
        tops[0] = backend.relu(&bottoms[0])?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clamps_negatives() {
        let mut t = Tensor::from_data(&[3], &[-1.0, 0.0, 2.0]).unwrap();
        ReLU
            .forward_inplace(std::slice::from_mut(&mut t), &ExtractorOptions::default())
            .unwrap();
        assert_eq!(t.to_vec(), vec![0.0, 0.0, 2.0]);
    }
}
