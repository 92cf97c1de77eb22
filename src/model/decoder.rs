//! dVAE decoder: latent grid → per-pixel logistic parameters.
//!
//! ## Architecture
//!
//! ```text
//! [B, vocab, h, w] ─→ Conv2d(vocab, n_init, 1)                 blocks.input
//!   ─→ n_blk × DecoderBlock(8·n_hid) + Upsample(2)             [B, 8·n_hid, 2h, 2w]
//!   ─→ n_blk × DecoderBlock(4·n_hid) + Upsample(2)             [B, 4·n_hid, 4h, 4w]
//!   ─→ n_blk × DecoderBlock(2·n_hid) + Upsample(2)             [B, 2·n_hid, 8h, 8w]
//!   ─→ n_blk × DecoderBlock(1·n_hid)                           [B, 1·n_hid, 8h, 8w]
//!   ─→ ReLU + Conv2d(n_hid, 2·out_ch, 1)                       [B, 2·out_ch, 8h, 8w]
//! ```
//!
//! Output channels `[0, out_ch)` are locations, `[out_ch, 2·out_ch)` log-scales; see
//! [`split_decoder_output`](crate::pixels::split_decoder_output).

use candle_core::{DType, Device, Module, Tensor};
use candle_nn::{VarBuilder, VarMap};

use super::block::{BlockConfig, BlockKind};
use super::conv::{Conv2d, Conv2dConfig};
use super::layer::{Layer, Layers};
use crate::config::DecoderConfig;
use crate::{Error, Result};

/// Spatial upscaling factor per dimension.
pub const UPSAMPLE_FACTOR: usize = 8;

#[derive(Debug, Clone)]
pub struct Decoder {
    blocks: Layers,
    config: DecoderConfig,
    device: Device,
}

impl Decoder {
    pub fn new(config: &DecoderConfig, vb: VarBuilder) -> Result<Self> {
        config.validate()?;
        let n_hid = config.n_hid;
        let rg = config.requires_grad;
        let vb = vb.pp("blocks");
        let mut blocks = Layers::default();

        let stem = Conv2dConfig::new(config.vocab_size, config.stem_width(), 1)
            .with_float16(false)
            .with_requires_grad(rg);
        blocks.push("blocks.input", Layer::Conv(Conv2d::new(stem, vb.pp("input"))?));

        let block = BlockConfig {
            n_in: n_hid,
            n_out: n_hid,
            n_layers: config.n_layers(),
            use_float16: config.use_mixed_precision,
            requires_grad: rg,
        };
        blocks.push_groups(
            BlockKind::Decoder,
            config.stem_width(),
            [8 * n_hid, 4 * n_hid, 2 * n_hid, n_hid],
            block,
            config.n_blk_per_group,
            Layer::Upsample,
            &vb,
        )?;

        let out = Conv2dConfig::new(n_hid, 2 * config.output_channels, 1)
            .with_float16(false)
            .with_requires_grad(rg);
        blocks.push("blocks.output.relu", Layer::Relu);
        blocks.push(
            "blocks.output.conv",
            Layer::Conv(Conv2d::new(out, vb.pp("output").pp("conv"))?),
        );

        tracing::debug!(
            n_init = config.stem_width(),
            n_hid,
            n_blk_per_group = config.n_blk_per_group,
            vocab_size = config.vocab_size,
            layers = blocks.len(),
            device = ?vb.device(),
            "built dVAE decoder"
        );

        Ok(Self {
            blocks,
            config: config.clone(),
            device: vb.device().clone(),
        })
    }

    /// Freshly initialized decoder; the returned map owns the variables.
    pub fn init(config: &DecoderConfig, device: &Device) -> Result<(Self, VarMap)> {
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, device);
        let decoder = Self::new(config, vb)?;
        Ok((decoder, varmap))
    }

    pub fn config(&self) -> &DecoderConfig {
        &self.config
    }

    pub fn device(&self) -> &Device {
        &self.device
    }

    pub fn named_tensors(&self) -> Vec<(String, Tensor)> {
        self.blocks.named_tensors()
    }

    pub fn parameter_count(&self) -> usize {
        self.named_tensors().iter().map(|(_, t)| t.elem_count()).sum()
    }

    /// Decode a `[B, vocab_size, h, w]` F32 latent grid (one-hot or soft) into
    /// `[B, 2 * output_channels, 8h, 8w]` distribution parameters.
    ///
    /// This channel check is the only place an encoder/decoder vocabulary mismatch
    /// is caught.
    pub fn forward(&self, z: &Tensor) -> Result<Tensor> {
        let dims = z.dims();
        if dims.len() != 4 {
            return Err(Error::shape("rank-4 [B, C, H, W]", format!("{dims:?}")));
        }
        if dims[1] != self.config.vocab_size {
            return Err(Error::shape(
                format!("{} latent channels (vocab_size)", self.config.vocab_size),
                format!("{} channels", dims[1]),
            ));
        }
        if z.dtype() != DType::F32 {
            return Err(Error::Dtype {
                expected: DType::F32,
                actual: z.dtype(),
            });
        }
        if dims[2] == 0 || dims[3] == 0 {
            return Err(Error::shape(
                "non-empty spatial dims",
                format!("{}x{}", dims[2], dims[3]),
            ));
        }

        Ok(self.blocks.forward(z)?)
    }
}
