//! Weight-owning 2D convolution with fan-in init and F16 dispatch.
//!
//! ```text
//! [B, n_in, H, W] ─→ conv2d(w, pad=(kw-1)/2) + b ─→ [B, n_out, H, W]
//! ```

use candle_core::{DType, Device, Module, Tensor, Var};
use candle_nn::{Init, VarBuilder};

use crate::{Error, Result};

/// Construction parameters for [`Conv2d`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Conv2dConfig {
    pub n_in: usize,
    pub n_out: usize,
    /// Kernel width; odd and >= 1.
    pub kw: usize,
    /// Allow the F16 path when the weights live on an accelerator.
    pub use_float16: bool,
    pub requires_grad: bool,
}

impl Conv2dConfig {
    pub fn new(n_in: usize, n_out: usize, kw: usize) -> Self {
        Self {
            n_in,
            n_out,
            kw,
            use_float16: true,
            requires_grad: false,
        }
    }

    pub fn with_float16(mut self, use_float16: bool) -> Self {
        self.use_float16 = use_float16;
        self
    }

    pub fn with_requires_grad(mut self, requires_grad: bool) -> Self {
        self.requires_grad = requires_grad;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.n_in < 1 || self.n_out < 1 {
            return Err(Error::invalid(format!(
                "conv channels must be >= 1, got n_in={} n_out={}",
                self.n_in, self.n_out
            )));
        }
        if self.kw < 1 || self.kw % 2 == 0 {
            return Err(Error::invalid(format!(
                "conv kernel width must be odd and >= 1, got {}",
                self.kw
            )));
        }
        Ok(())
    }

    pub fn padding(&self) -> usize {
        (self.kw - 1) / 2
    }
}

/// Arithmetic precision a [`Conv2d`] runs at for one call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Precision {
    Half,
    Full,
}

impl Precision {
    /// Half only when the layer allows it and its weights sit on CUDA or Metal.
    pub fn resolve(use_float16: bool, device: &Device) -> Self {
        if use_float16 && (device.is_cuda() || device.is_metal()) {
            Precision::Half
        } else {
            Precision::Full
        }
    }

    pub fn dtype(self) -> DType {
        match self {
            Precision::Half => DType::F16,
            Precision::Full => DType::F32,
        }
    }
}

/// 2D convolution with weight `[n_out, n_in, kw, kw]` and bias `[n_out]`.
///
/// Weights are drawn from `N(0, 1 / (n_in * kw²))`, bias starts at zero. When `vb`
/// is backed by a checkpoint the stored values are used instead.
#[derive(Debug, Clone)]
pub struct Conv2d {
    w: Tensor,
    b: Tensor,
    config: Conv2dConfig,
}

impl Conv2d {
    pub fn new(config: Conv2dConfig, vb: VarBuilder) -> Result<Self> {
        config.validate()?;
        let Conv2dConfig { n_in, n_out, kw, .. } = config;

        let stdev = 1.0 / ((n_in * kw * kw) as f64).sqrt();
        let w = vb.get_with_hints((n_out, n_in, kw, kw), "w", Init::Randn { mean: 0.0, stdev })?;
        let b = vb.get_with_hints(n_out, "b", Init::Const(0.0))?;

        // Values are filled above; gradient tracking is decided only now.
        let (w, b) = if config.requires_grad {
            (
                Var::from_tensor(&w)?.into_inner(),
                Var::from_tensor(&b)?.into_inner(),
            )
        } else {
            (w.detach(), b.detach())
        };

        Ok(Self { w, b, config })
    }

    pub fn config(&self) -> &Conv2dConfig {
        &self.config
    }

    pub fn weight(&self) -> &Tensor {
        &self.w
    }

    pub fn bias(&self) -> &Tensor {
        &self.b
    }

    /// Precision the next forward call will use.
    pub fn precision(&self) -> Precision {
        Precision::resolve(self.config.use_float16, self.w.device())
    }

    pub(crate) fn push_tensors(&self, prefix: &str, out: &mut Vec<(String, Tensor)>) {
        out.push((format!("{prefix}.w"), self.w.clone()));
        out.push((format!("{prefix}.b"), self.b.clone()));
    }
}

impl Module for Conv2d {
    fn forward(&self, xs: &Tensor) -> candle_core::Result<Tensor> {
        let dtype = self.precision().dtype();
        let xs = xs.to_dtype(dtype)?;
        let w = self.w.to_dtype(dtype)?;
        let b = self.b.to_dtype(dtype)?.reshape((1, self.config.n_out, 1, 1))?;
        xs.conv2d(&w, self.config.padding(), 1, 1, 1)?
            .broadcast_add(&b)
    }
}
