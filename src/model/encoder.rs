//! dVAE encoder: image → per-cell codebook logits.
//!
//! ## Architecture
//!
//! ```text
//! [B, 3, H, W] ─→ Conv2d(3, n_hid, 7)                          blocks.input
//!   ─→ n_blk × EncoderBlock(1·n_hid) + MaxPool(2)              [B, 1·n_hid, H/2, W/2]
//!   ─→ n_blk × EncoderBlock(2·n_hid) + MaxPool(2)              [B, 2·n_hid, H/4, W/4]
//!   ─→ n_blk × EncoderBlock(4·n_hid) + MaxPool(2)              [B, 4·n_hid, H/8, W/8]
//!   ─→ n_blk × EncoderBlock(8·n_hid)                           [B, 8·n_hid, H/8, W/8]
//!   ─→ ReLU + Conv2d(8·n_hid, vocab_size, 1)                   [B, vocab_size, H/8, W/8]
//! ```
//!
//! The stem and output convolutions always run in F32.

use candle_core::{DType, Device, Module, Tensor};
use candle_nn::{VarBuilder, VarMap};

use super::block::{BlockConfig, BlockKind};
use super::conv::{Conv2d, Conv2dConfig};
use super::layer::{Layer, Layers};
use crate::config::EncoderConfig;
use crate::{Error, Result};

/// Spatial reduction factor per dimension.
pub const DOWNSAMPLE_FACTOR: usize = 8;

#[derive(Debug, Clone)]
pub struct Encoder {
    blocks: Layers,
    config: EncoderConfig,
    device: Device,
}

impl Encoder {
    /// Build the encoder; weights come from `vb` (checkpoint) or its init hints.
    pub fn new(config: &EncoderConfig, vb: VarBuilder) -> Result<Self> {
        config.validate()?;
        let n_hid = config.n_hid;
        let rg = config.requires_grad;
        let vb = vb.pp("blocks");
        let mut blocks = Layers::default();

        let stem = Conv2dConfig::new(config.input_channels, n_hid, 7)
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
            BlockKind::Encoder,
            n_hid,
            [n_hid, 2 * n_hid, 4 * n_hid, 8 * n_hid],
            block,
            config.n_blk_per_group,
            Layer::MaxPool,
            &vb,
        )?;

        let out = Conv2dConfig::new(8 * n_hid, config.vocab_size, 1)
            .with_float16(false)
            .with_requires_grad(rg);
        blocks.push("blocks.output.relu", Layer::Relu);
        blocks.push(
            "blocks.output.conv",
            Layer::Conv(Conv2d::new(out, vb.pp("output").pp("conv"))?),
        );

        tracing::debug!(
            n_hid,
            n_blk_per_group = config.n_blk_per_group,
            vocab_size = config.vocab_size,
            layers = blocks.len(),
            device = ?vb.device(),
            "built dVAE encoder"
        );

        Ok(Self {
            blocks,
            config: config.clone(),
            device: vb.device().clone(),
        })
    }

    /// Freshly initialized encoder; the returned map owns the variables.
    pub fn init(config: &EncoderConfig, device: &Device) -> Result<(Self, VarMap)> {
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, device);
        let encoder = Self::new(config, vb)?;
        Ok((encoder, varmap))
    }

    pub fn config(&self) -> &EncoderConfig {
        &self.config
    }

    pub fn device(&self) -> &Device {
        &self.device
    }

    /// Weights keyed by state-dict name (`blocks.group_1.block_1.res_path.conv_1.w`, …).
    pub fn named_tensors(&self) -> Vec<(String, Tensor)> {
        self.blocks.named_tensors()
    }

    pub fn parameter_count(&self) -> usize {
        self.named_tensors().iter().map(|(_, t)| t.elem_count()).sum()
    }

    /// Encode `[B, input_channels, H, W]` F32 pixels (already [`map_pixels`]-ed)
    /// into `[B, vocab_size, H/8, W/8]` logits.
    ///
    /// `H` and `W` must be multiples of 8.
    ///
    /// [`map_pixels`]: crate::pixels::map_pixels
    pub fn forward(&self, x: &Tensor) -> Result<Tensor> {
        let dims = x.dims();
        if dims.len() != 4 {
            return Err(Error::shape("rank-4 [B, C, H, W]", format!("{dims:?}")));
        }
        if dims[1] != self.config.input_channels {
            return Err(Error::shape(
                format!("{} input channels", self.config.input_channels),
                format!("{} channels", dims[1]),
            ));
        }
        if x.dtype() != DType::F32 {
            return Err(Error::Dtype {
                expected: DType::F32,
                actual: x.dtype(),
            });
        }
        let (h, w) = (dims[2], dims[3]);
        if h == 0 || w == 0 || h % DOWNSAMPLE_FACTOR != 0 || w % DOWNSAMPLE_FACTOR != 0 {
            return Err(Error::shape(
                format!("non-empty spatial dims divisible by {DOWNSAMPLE_FACTOR}"),
                format!("{h}x{w}"),
            ));
        }

        Ok(self.blocks.forward(x)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::all_finite;
    use crate::pixels::map_pixels;

    fn small_config() -> EncoderConfig {
        EncoderConfig {
            n_hid: 64,
            n_blk_per_group: 1,
            vocab_size: 512,
            ..Default::default()
        }
    }

    #[test]
    fn encoder_downsamples_by_eight() {
        let device = Device::Cpu;
        let (encoder, _vm) = Encoder::init(&small_config(), &device).unwrap();
        let x = Tensor::rand(0.0_f32, 1.0, (2, 3, 16, 24), &device).unwrap();
        let x = map_pixels(&x).unwrap();
        let logits = encoder.forward(&x).unwrap();
        assert_eq!(logits.dims(), &[2, 512, 2, 3]);
        assert_eq!(logits.dtype(), DType::F32);
        assert!(all_finite(&logits).unwrap());
    }

    #[test]
    fn encoder_rejects_rank_three() {
        let device = Device::Cpu;
        let (encoder, _vm) = Encoder::init(&small_config(), &device).unwrap();
        let x = Tensor::zeros((3, 16, 16), DType::F32, &device).unwrap();
        assert!(matches!(encoder.forward(&x), Err(Error::Shape { .. })));
    }

    #[test]
    fn encoder_rejects_f64() {
        let device = Device::Cpu;
        let (encoder, _vm) = Encoder::init(&small_config(), &device).unwrap();
        let x = Tensor::zeros((1, 3, 16, 16), DType::F64, &device).unwrap();
        match encoder.forward(&x) {
            Err(Error::Dtype { expected, actual }) => {
                assert_eq!(expected, DType::F32);
                assert_eq!(actual, DType::F64);
            }
            other => panic!("expected dtype error, got {other:?}"),
        }
    }

    #[test]
    fn encoder_rejects_wrong_channels() {
        let device = Device::Cpu;
        let (encoder, _vm) = Encoder::init(&small_config(), &device).unwrap();
        let x = Tensor::zeros((1, 4, 16, 16), DType::F32, &device).unwrap();
        assert!(matches!(encoder.forward(&x), Err(Error::Shape { .. })));
    }

    #[test]
    fn encoder_rejects_non_multiple_of_eight() {
        let device = Device::Cpu;
        let (encoder, _vm) = Encoder::init(&small_config(), &device).unwrap();
        let x = Tensor::zeros((1, 3, 12, 16), DType::F32, &device).unwrap();
        assert!(matches!(encoder.forward(&x), Err(Error::Shape { .. })));
    }

    #[test]
    fn encoder_rejects_empty_spatial() {
        let device = Device::Cpu;
        let (encoder, _vm) = Encoder::init(&small_config(), &device).unwrap();
        for shape in [(1, 3, 0, 8), (1, 3, 8, 0)] {
            let x = Tensor::zeros(shape, DType::F32, &device).unwrap();
            assert!(matches!(encoder.forward(&x), Err(Error::Shape { .. })));
        }
    }

    #[test]
    fn encoder_rejects_invalid_config() {
        let cfg = EncoderConfig {
            n_hid: 16,
            ..small_config()
        };
        let Err(err) = Encoder::init(&cfg, &Device::Cpu) else {
            panic!("expected InvalidConfiguration");
        };
        assert!(matches!(err, Error::InvalidConfiguration(_)));
    }

    #[test]
    fn encoder_tensor_layout() {
        let (encoder, _vm) = Encoder::init(&small_config(), &Device::Cpu).unwrap();
        let tensors = encoder.named_tensors();
        let find = |name: &str| {
            tensors
                .iter()
                .find(|(n, _)| n == name)
                .map(|(_, t)| t.dims().to_vec())
        };
        assert_eq!(find("blocks.input.w"), Some(vec![64, 3, 7, 7]));
        assert_eq!(
            find("blocks.group_1.block_1.res_path.conv_1.w"),
            Some(vec![16, 64, 3, 3])
        );
        assert_eq!(
            find("blocks.group_2.block_1.id_path.w"),
            Some(vec![128, 64, 1, 1])
        );
        assert_eq!(find("blocks.output.conv.w"), Some(vec![512, 512, 1, 1]));
        assert_eq!(find("blocks.group_1.block_1.id_path.w"), None);
        assert_eq!(
            encoder.parameter_count(),
            tensors.iter().map(|(_, t)| t.elem_count()).sum::<usize>()
        );
    }

    #[test]
    #[ignore = "full-size model; slow on CPU"]
    fn encoder_full_size_zero_image() {
        let device = Device::Cpu;
        let (encoder, _vm) = Encoder::init(&EncoderConfig::default(), &device).unwrap();
        let x = Tensor::zeros((1, 3, 256, 256), DType::F32, &device).unwrap();
        let logits = encoder.forward(&map_pixels(&x).unwrap()).unwrap();
        assert_eq!(logits.dims(), &[1, 8192, 32, 32]);
        assert!(all_finite(&logits).unwrap());
    }
}
