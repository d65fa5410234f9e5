//! Scalar multiply. Grounded in `original_source/src/layer/dropout.cpp`:
//! a single scalar parameter pulled from the param record, applied to every
//! element, with an in-place CPU kernel and a Vulkan (here: CUDA-mapped)
//! push-constant-driven variant.

use ndarray::Zip;

use crate::error::Result;
use crate::layer::Layer;
use crate::option::ExtractorOptions;
use crate::paramdict::ParamDict;
use crate::tensor::Tensor;

pub struct Scale {
    scale: f32,
}

impl Default for Scale {
    fn default() -> Self {
        Self { scale: 1.0 }
    }
}

impl Layer for Scale {
    fn type_name(&self) -> &'static str {
        "Scale"
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

    fn load_param(&mut self, pd: &ParamDict) -> Result<()> {
        self.scale = pd.get_float(0, 1.0);
        Ok(())
    }

    fn forward(&self, bottoms: &[Tensor], tops: &mut [Tensor], opt: &ExtractorOptions) -> Result<()> {
        tops[0] = bottoms[0].deep_clone();
        self.forward_inplace(std::slice::from_mut(&mut tops[0]), opt)
    }

    fn forward_inplace(&self, bottom_tops: &mut [Tensor], _opt: &ExtractorOptions) -> Result<()> {
        let t = &mut bottom_tops[0];
        let scale = self.scale;
        for q in 0..t.c().max(1) {
            let mut view = t.channel_view_mut(q);
            Zip::from(&mut view).par_for_each(|v| *v *= scale);
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
        tops[0] = backend.scale(&bottoms[0], self.scale)?;
        Ok(())
    }

    #[cfg(feature = "cuda")]
    fn forward_inplace_gpu(
        &self,
        bottom_tops: &mut [crate::backend::DeviceTensor],
        _opt: &ExtractorOptions,
        backend: &crate::backend::gpu::GpuBackend,
    ) -> Result<()> {
        bottom_tops[0] = backend.scale(&bottom_tops[0], self.scale)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scales_every_element() {
        let mut layer = Scale::default();
        layer.scale = 2.0;
        let mut t = Tensor::from_data(&[2, 2], &[1.0, 2.0, 3.0, 4.0]).unwrap();
        layer
            .forward_inplace(std::slice::from_mut(&mut t), &ExtractorOptions::default())
            .unwrap();
        assert_eq!(t.to_vec(), vec![2.0, 4.0, 6.0, 8.0]);
    }
}
