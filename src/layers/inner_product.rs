//! Dense/affine layer. Grounded in the teacher's `Linear` layer
//! (`src/layers/linear.rs`, `weights`/`biases` fields, `input.dot(&weights) + biases`)
//! generalized from an autograd-tracked `ndarray` layer into a weights-from-`ModelBin`,
//! inference-only layer whose forward pass parallelizes over output channels the way
//! the teacher's CPU backend parallelizes over elements (`Zip::par_for_each`).

use rayon::prelude::*;

use crate::error::{Error, Result};
use crate::layer::{Layer, ModelBin};
use crate::option::ExtractorOptions;
use crate::paramdict::ParamDict;
use crate::tensor::Tensor;

pub struct InnerProduct {
    num_output: usize,
    bias_term: bool,
    /// Total element count of the weight tensor (`num_output * input_dim`),
    /// read from the param record directly (key 2) the way ncnn's real
    /// InnerProduct carries `weight_data_size` rather than inferring it from
    /// the first bottom blob's shape at load time.
    weight_data_size: usize,
    weight: Tensor,
    bias: Tensor,
}

impl Default for InnerProduct {
    fn default() -> Self {
        Self {
            num_output: 0,
            bias_term: false,
            weight_data_size: 0,
            weight: Tensor::empty(),
            bias: Tensor::empty(),
        }
    }
}

impl Layer for InnerProduct {
    fn type_name(&self) -> &'static str {
        "InnerProduct"
    }

    fn one_blob_only(&self) -> bool {
        true
    }

    fn load_param(&mut self, pd: &ParamDict) -> Result<()> {
        self.num_output = pd.get_int(0, 0) as usize;
        self.bias_term = pd.get_int(1, 0) != 0;
        self.weight_data_size = pd.get_int(2, 0) as usize;
        if self.num_output == 0 {
            return Err(Error::BadParam("InnerProduct: num_output must be > 0".into()));
        }
        if self.weight_data_size == 0 || self.weight_data_size % self.num_output != 0 {
            return Err(Error::BadParam(format!(
                "InnerProduct: weight_data_size {} does not divide evenly across {} outputs",
                self.weight_data_size, self.num_output
            )));
        }
        Ok(())
    }

    fn load_model(&mut self, mb: &mut dyn ModelBin) -> Result<()> {
        self.weight = mb.read(&[self.weight_data_size])?;
        if self.bias_term {
            self.bias = mb.read(&[self.num_output])?;
        }
        Ok(())
    }

    fn forward(&self, bottoms: &[Tensor], tops: &mut [Tensor], _opt: &ExtractorOptions) -> Result<()> {
        let input = bottoms[0].to_vec();
        let input_dim = input.len();
        let flat_weight = self.weight.to_vec();
        if flat_weight.len() % self.num_output != 0 {
            return Err(Error::BadModel(format!(
                "InnerProduct: weight tensor of {} elements does not divide evenly across {} outputs",
                flat_weight.len(),
                self.num_output
            )));
        }
        let per_output = flat_weight.len() / self.num_output;
        if per_output != input_dim {
            return Err(Error::ShapeError(format!(
                "InnerProduct: input has {input_dim} elements, weight rows expect {per_output}"
            )));
        }
        let bias = if self.bias_term { self.bias.to_vec() } else { vec![0.0; self.num_output] };

        let out: Vec<f32> = (0..self.num_output)
            .into_par_iter()
            .map(|o| {
                let row = &flat_weight[o * input_dim..(o + 1) * input_dim];
                let dot: f32 = row.iter().zip(input.iter()).map(|(w, x)| w * x).sum();
                dot + bias[o]
            })
            .collect();
        tops[0] = Tensor::from_data(&[self.num_output], &out)?;
        Ok(())
    }
}
