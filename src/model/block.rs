//! Pre-activation residual block shared by the encoder and decoder.
//!
//! ```text
//! x ─┬─ id_path (identity | 1×1 conv) ───────────────────────────────┐
//!    └─ ReLU → conv_1 → ReLU → conv_2 → ReLU → conv_3 → ReLU → conv_4 ┴→ id + post_gain · res
//! ```
//!
//! Channels along the residual path are `n_in → n_out/4 → n_out/4 → n_out/4 → n_out`.

use candle_core::{Module, Tensor};
use candle_nn::VarBuilder;

use super::conv::{Conv2d, Conv2dConfig};
use crate::{Error, Result};

/// Which network a block belongs to; selects the residual kernel widths.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockKind {
    /// 3×3 convs narrow, a trailing 1×1 restores width.
    Encoder,
    /// A leading 1×1 narrows, 3×3 convs follow.
    Decoder,
}

impl BlockKind {
    pub fn kernel_widths(self) -> [usize; 4] {
        match self {
            BlockKind::Encoder => [3, 3, 3, 1],
            BlockKind::Decoder => [1, 3, 3, 3],
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockConfig {
    pub n_in: usize,
    /// Must be divisible by 4.
    pub n_out: usize,
    /// Total residual blocks in the network the block lives in.
    pub n_layers: usize,
    pub use_float16: bool,
    pub requires_grad: bool,
}

impl BlockConfig {
    pub fn validate(&self) -> Result<()> {
        if self.n_in < 1 {
            return Err(Error::invalid("block n_in must be >= 1"));
        }
        if self.n_out < 1 || self.n_out % 4 != 0 {
            return Err(Error::invalid(format!(
                "block n_out must be a positive multiple of 4, got {}",
                self.n_out
            )));
        }
        if self.n_layers < 1 {
            return Err(Error::invalid("block n_layers must be >= 1"));
        }
        Ok(())
    }

    pub fn n_hid(&self) -> usize {
        self.n_out / 4
    }

    /// Residual branch damping, `1 / n_layers²`.
    pub fn post_gain(&self) -> f64 {
        1.0 / (self.n_layers * self.n_layers) as f64
    }
}

#[derive(Debug, Clone)]
enum IdPath {
    Identity,
    Projection(Conv2d),
}

#[derive(Debug, Clone)]
pub struct ResBlock {
    kind: BlockKind,
    id_path: IdPath,
    res_path: Vec<Conv2d>,
    post_gain: f64,
}

impl ResBlock {
    pub fn new(kind: BlockKind, config: BlockConfig, vb: VarBuilder) -> Result<Self> {
        config.validate()?;
        let make_conv = |n_in, n_out, kw| {
            Conv2dConfig::new(n_in, n_out, kw)
                .with_float16(config.use_float16)
                .with_requires_grad(config.requires_grad)
        };

        let id_path = if config.n_in != config.n_out {
            IdPath::Projection(Conv2d::new(
                make_conv(config.n_in, config.n_out, 1),
                vb.pp("id_path"),
            )?)
        } else {
            IdPath::Identity
        };

        let n_hid = config.n_hid();
        let channels = [config.n_in, n_hid, n_hid, n_hid, config.n_out];
        let res_vb = vb.pp("res_path");
        let mut res_path = Vec::with_capacity(4);
        for (i, kw) in kind.kernel_widths().into_iter().enumerate() {
            res_path.push(Conv2d::new(
                make_conv(channels[i], channels[i + 1], kw),
                res_vb.pp(format!("conv_{}", i + 1)),
            )?);
        }

        Ok(Self {
            kind,
            id_path,
            res_path,
            post_gain: config.post_gain(),
        })
    }

    pub fn kind(&self) -> BlockKind {
        self.kind
    }

    pub fn post_gain(&self) -> f64 {
        self.post_gain
    }

    fn id_forward(&self, xs: &Tensor) -> candle_core::Result<Tensor> {
        match &self.id_path {
            IdPath::Identity => Ok(xs.clone()),
            IdPath::Projection(conv) => conv.forward(xs),
        }
    }

    fn res_forward(&self, xs: &Tensor) -> candle_core::Result<Tensor> {
        let mut h = xs.clone();
        for conv in &self.res_path {
            h = conv.forward(&h.relu()?)?;
        }
        Ok(h)
    }

    pub(crate) fn push_tensors(&self, prefix: &str, out: &mut Vec<(String, Tensor)>) {
        if let IdPath::Projection(conv) = &self.id_path {
            conv.push_tensors(&format!("{prefix}.id_path"), out);
        }
        for (i, conv) in self.res_path.iter().enumerate() {
            conv.push_tensors(&format!("{prefix}.res_path.conv_{}", i + 1), out);
        }
    }
}

impl Module for ResBlock {
    fn forward(&self, xs: &Tensor) -> candle_core::Result<Tensor> {
        let id = self.id_forward(xs)?;
        let res = self.res_forward(xs)?.affine(self.post_gain, 0.0)?;
        // F32 pass-through + F16 residual promotes to the identity dtype.
        let res = res.to_dtype(id.dtype())?;
        id + res
    }
}
