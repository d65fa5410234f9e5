//! `inferlite`: a lazy, on-demand graph executor for pre-trained neural
//! network inference. Load a `.param`/`.bin` pair (or their in-memory
//! variants) into a [`Net`], then run one or more [`Extractor`]s over it —
//! each requested output is resolved by running only the layers it actually
//! depends on, with an optional lightmode that bounds peak memory by
//! releasing intermediate blobs as soon as nothing else needs them.
//!
//! ```text
//! let mut net = Net::new();
//! net.load_param(&mut reader)?;
//! net.load_model(&mut model_bin)?;
//! let mut ex = net.create_extractor();
//! ex.input_by_name("data", &input)?;
//! let output = ex.extract_by_name("prob")?;
//! ```

pub mod backend;
pub mod error;
pub mod extractor;
pub mod layer;
pub mod layers;
pub mod modelbin;
pub mod net;
pub mod option;
pub mod paramdict;
pub mod tensor;

pub use backend::{Backend, BackendKind, DeviceTensor};
pub use error::{Error, LayerTypeId, Result};
pub use extractor::Extractor;
pub use layer::{Layer, LayerRegistry, ModelBin, CUSTOM_BIT};
pub use modelbin::{ModelBinFromMemory, ModelBinFromRead};
pub use net::{Blob, Net};
pub use option::{AllocatorKind, ExtractorOptions, NetOptions};
pub use paramdict::ParamDict;
pub use tensor::Tensor;
