//! dVAE network components.
//!
//! ## Components
//!
//! - [`conv`] — weight-owning 2D convolution with F16 dispatch
//! - [`block`] — residual block shared by both networks
//! - [`layer`] — sequential layer list and group builder
//! - [`encoder`] — image → codebook logits
//! - [`decoder`] — latent grid → logistic pixel parameters

pub mod block;
pub mod conv;
pub mod decoder;
pub mod encoder;
pub mod layer;

use candle_core::{DType, Tensor};

use crate::Result;

pub use decoder::Decoder;
pub use encoder::Encoder;

/// `true` when no element is NaN or ±Inf.
pub fn all_finite(t: &Tensor) -> Result<bool> {
    let values: Vec<f32> = t.to_dtype(DType::F32)?.flatten_all()?.to_vec1()?;
    Ok(values.iter().all(|v| v.is_finite()))
}

/// Expand `[B, H, W]` symbol ids into a `[B, vocab_size, H, W]` F32 one-hot grid.
///
/// Builds decoder inputs from known symbols; it does not discretize encoder logits.
pub fn one_hot(ids: &Tensor, vocab_size: usize) -> Result<Tensor> {
    let hot = candle_nn::encoding::one_hot(ids.clone(), vocab_size, 1f32, 0f32)?;
    Ok(hot.permute((0, 3, 1, 2))?.contiguous()?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::Device;

    #[test]
    fn one_hot_layout() {
        let ids = Tensor::new(&[[[2u32, 0]]], &Device::Cpu).unwrap();
        let z = one_hot(&ids, 3).unwrap();
        assert_eq!(z.dims(), &[1, 3, 1, 2]);
        let z: Vec<f32> = z.flatten_all().unwrap().to_vec1().unwrap();
        // Channel-major: c0 = [0, 1], c1 = [0, 0], c2 = [1, 0].
        assert_eq!(z, vec![0.0, 1.0, 0.0, 0.0, 1.0, 0.0]);
    }

    #[test]
    fn all_finite_detects_nan() {
        let t = Tensor::new(&[1.0_f32, f32::NAN], &Device::Cpu).unwrap();
        assert!(!all_finite(&t).unwrap());
        let t = Tensor::new(&[1.0_f32, 2.0], &Device::Cpu).unwrap();
        assert!(all_finite(&t).unwrap());
    }
}
