//! Elementwise add over exactly two inputs. Grounded in the teacher's
//! `Backend::add` kernel (`src/backend/cpu.rs`), generalized from an
//! `ndarray` add into this engine's flat cstep-padded tensor layout.

use crate::error::{Error, Result};
use crate::layer::Layer;
use crate::option::ExtractorOptions;
use crate::paramdict::ParamDict;
use crate::tensor::Tensor;

#[derive(Default)]
pub struct BinarySum;

impl Layer for BinarySum {
    fn type_name(&self) -> &'static str {
        "BinarySum"
    }

    fn load_param(&mut self, _pd: &ParamDict) -> Result<()> {
        Ok(())
    }

    fn forward(&self, bottoms: &[Tensor], tops: &mut [Tensor], _opt: &ExtractorOptions) -> Result<()> {
        let (a, b) = match bottoms {
            [a, b] => (a, b),
            _ => {
                return Err(Error::ShapeError(format!(
                    "BinarySum expects exactly 2 inputs, got {}",
                    bottoms.len()
                )))
            }
        };
        if a.shape() != b.shape() {
            return Err(Error::ShapeError(format!(
                "BinarySum shape mismatch: {:?} vs {:?}",
                a.shape(),
                b.shape()
            )));
        }
        let sum: Vec<f32> = a.to_vec().iter().zip(b.to_vec().iter()).map(|(x, y)| x + y).collect();
        tops[0] = Tensor::from_data(&a.shape(), &sum)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn adds_elementwise() {
        let a = Tensor::from_data(&[2], &[1.0, 2.0]).unwrap();
        let b = Tensor::from_data(&[2], &[10.0, 20.0]).unwrap();
        let mut tops = [Tensor::empty()];
        BinarySum
            .forward(&[a, b], &mut tops, &ExtractorOptions::default())
            .unwrap();
        assert_eq!(tops[0].to_vec(), vec![11.0, 22.0]);
    }

    #[test]
    fn rejects_shape_mismatch() {
        let a = Tensor::from_data(&[2], &[1.0, 2.0]).unwrap();
        let b = Tensor::from_data(&[3], &[1.0, 2.0, 3.0]).unwrap();
        let mut tops = [Tensor::empty()];
        assert!(BinarySum
            .forward(&[a, b], &mut tops, &ExtractorOptions::default())
            .is_err());
    }
}
