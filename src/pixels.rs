//! Pixel-domain transforms for the logit-Laplace likelihood.
//!
//! ```text
//! map:   x ∈ [0, 1] → (1 - 2ε)·x + ε ∈ [ε, 1 - ε]
//! unmap: y → clamp((y - ε) / (1 - 2ε), 0, 1)
//! ```

use candle_core::{DType, Tensor};

use crate::{Error, Result};

/// Margin keeping pixels off the likelihood's support boundary.
pub const LOGIT_LAPLACE_EPS: f64 = 0.1;

fn check_image(x: &Tensor) -> Result<()> {
    if x.rank() != 4 {
        return Err(Error::shape(
            "rank-4 [B, C, H, W]",
            format!("{:?}", x.dims()),
        ));
    }
    if x.dtype() != DType::F32 {
        return Err(Error::Dtype {
            expected: DType::F32,
            actual: x.dtype(),
        });
    }
    Ok(())
}

/// Squeeze `[0, 1]` pixels into `[ε, 1 - ε]` before encoding.
pub fn map_pixels(x: &Tensor) -> Result<Tensor> {
    check_image(x)?;
    let eps = LOGIT_LAPLACE_EPS;
    Ok(x.affine(1.0 - 2.0 * eps, eps)?)
}

/// Invert [`map_pixels`] and clamp to the displayable `[0, 1]` range.
pub fn unmap_pixels(x: &Tensor) -> Result<Tensor> {
    check_image(x)?;
    let eps = LOGIT_LAPLACE_EPS;
    let scale = 1.0 - 2.0 * eps;
    Ok(x.affine(1.0 / scale, -eps / scale)?.clamp(0f32, 1f32)?)
}

/// Split decoder output `[B, 2C, H, W]` into `(location, log_scale)`, each `[B, C, H, W]`.
pub fn split_decoder_output(out: &Tensor) -> Result<(Tensor, Tensor)> {
    check_image(out)?;
    let channels = out.dim(1)?;
    if channels % 2 != 0 {
        return Err(Error::shape(
            "an even channel count (location, scale pairs)",
            format!("{channels} channels"),
        ));
    }
    let c = channels / 2;
    Ok((out.narrow(1, 0, c)?, out.narrow(1, c, c)?))
}

/// Decoder output → displayable `[B, C, H, W]` image: `unmap(sigmoid(location))`.
pub fn reconstruct(out: &Tensor) -> Result<Tensor> {
    let (location, _log_scale) = split_decoder_output(out)?;
    let mean = candle_nn::ops::sigmoid(&location.contiguous()?)?;
    unmap_pixels(&mean)
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::Device;

    fn values(t: &Tensor) -> Vec<f32> {
        t.flatten_all().unwrap().to_vec1().unwrap()
    }

    #[test]
    fn map_pixels_range() {
        let device = Device::Cpu;
        let x = Tensor::rand(0.0_f32, 1.0, (2, 3, 8, 8), &device).unwrap();
        let edges = Tensor::new(&[0.0_f32, 1.0], &device)
            .unwrap()
            .reshape((1, 1, 1, 2))
            .unwrap();
        for t in [x, edges] {
            let y = values(&map_pixels(&t).unwrap());
            assert!(y.iter().all(|&v| (0.1 - 1e-6..=0.9 + 1e-6).contains(&v)));
        }
    }

    #[test]
    fn map_unmap_roundtrip() {
        let device = Device::Cpu;
        let x = Tensor::rand(0.0_f32, 1.0, (1, 3, 16, 16), &device).unwrap();
        let y = unmap_pixels(&map_pixels(&x).unwrap()).unwrap();
        let diff: f32 = (&y - &x)
            .unwrap()
            .abs()
            .unwrap()
            .max_all()
            .unwrap()
            .to_scalar()
            .unwrap();
        assert!(diff < 1e-6, "roundtrip error = {diff}");
    }

    #[test]
    fn unmap_clamps_out_of_range() {
        let device = Device::Cpu;
        let x = Tensor::new(&[-1.0_f32, 0.0, 0.5, 2.0], &device)
            .unwrap()
            .reshape((1, 1, 2, 2))
            .unwrap();
        let y = values(&unmap_pixels(&x).unwrap());
        assert_eq!(y[0], 0.0);
        assert_eq!(y[1], 0.0);
        assert!((y[2] - 0.5).abs() < 1e-6);
        assert_eq!(y[3], 1.0);
    }

    #[test]
    fn transforms_validate_input() {
        let device = Device::Cpu;
        let rank3 = Tensor::zeros((3, 4, 4), DType::F32, &device).unwrap();
        assert!(matches!(map_pixels(&rank3), Err(Error::Shape { .. })));
        assert!(matches!(unmap_pixels(&rank3), Err(Error::Shape { .. })));

        let f64_img = Tensor::zeros((1, 3, 4, 4), DType::F64, &device).unwrap();
        assert!(matches!(map_pixels(&f64_img), Err(Error::Dtype { .. })));
        assert!(matches!(unmap_pixels(&f64_img), Err(Error::Dtype { .. })));
    }

    #[test]
    fn split_and_reconstruct() {
        let device = Device::Cpu;
        let out = Tensor::zeros((1, 6, 4, 4), DType::F32, &device).unwrap();
        let (loc, scale) = split_decoder_output(&out).unwrap();
        assert_eq!(loc.dims(), &[1, 3, 4, 4]);
        assert_eq!(scale.dims(), &[1, 3, 4, 4]);

        // sigmoid(0) = 0.5 lies inside [ε, 1 - ε] and unmaps to 0.5.
        let img = values(&reconstruct(&out).unwrap());
        assert!(img.iter().all(|&v| (v - 0.5).abs() < 1e-6));

        let odd = Tensor::zeros((1, 5, 4, 4), DType::F32, &device).unwrap();
        assert!(matches!(split_decoder_output(&odd), Err(Error::Shape { .. })));
    }
}
