//! Graph-input marker layer. Carries no weights and performs no computation;
//! its blob slot is populated directly by `Extractor::input`/`input_by_name`
//! before extraction begins (spec.md §4.5).

use crate::error::{Error, Result};
use crate::layer::Layer;
use crate::option::ExtractorOptions;
use crate::paramdict::ParamDict;
use crate::tensor::Tensor;

#[derive(Default)]
pub struct Input;

impl Layer for Input {
    fn type_name(&self) -> &'static str {
        "Input"
    }

    fn one_blob_only(&self) -> bool {
        true
    }

    fn load_param(&mut self, _pd: &ParamDict) -> Result<()> {
        Ok(())
    }

    fn forward(&self, _bottoms: &[Tensor], _tops: &mut [Tensor], _opt: &ExtractorOptions) -> Result<()> {
        Err(Error::BackendError(
            "Input layer has no producer; its blob must be supplied via Extractor::input".into(),
        ))
    }
}
