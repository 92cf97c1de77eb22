//! Sequential layer list used by both networks.
//!
//! Each entry carries the state-dict prefix it was loaded from
//! (e.g. `blocks.group_2.block_1`), which doubles as its debug label.

use candle_core::{Module, Tensor};
use candle_nn::VarBuilder;

use super::block::{BlockConfig, BlockKind, ResBlock};
use super::conv::Conv2d;
use crate::Result;
use crate::config::GROUP_COUNT;

#[derive(Debug, Clone)]
pub enum Layer {
    Conv(Conv2d),
    Block(ResBlock),
    Relu,
    /// 2×2 max pool, stride 2.
    MaxPool,
    /// Nearest-neighbour 2× upsample.
    Upsample,
}

impl Module for Layer {
    fn forward(&self, xs: &Tensor) -> candle_core::Result<Tensor> {
        match self {
            Layer::Conv(conv) => conv.forward(xs),
            Layer::Block(block) => block.forward(xs),
            Layer::Relu => xs.relu(),
            Layer::MaxPool => xs.max_pool2d(2),
            Layer::Upsample => {
                let (_b, _c, h, w) = xs.dims4()?;
                xs.upsample_nearest2d(h * 2, w * 2)
            }
        }
    }
}

/// Ordered `(label, layer)` list applied front to back.
#[derive(Debug, Clone, Default)]
pub struct Layers {
    layers: Vec<(String, Layer)>,
}

impl Layers {
    pub fn push(&mut self, label: impl Into<String>, layer: Layer) {
        self.layers.push((label.into(), layer));
    }

    pub fn len(&self) -> usize {
        self.layers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.layers.is_empty()
    }

    pub fn labels(&self) -> impl Iterator<Item = &str> {
        self.layers.iter().map(|(label, _)| label.as_str())
    }

    /// Every weight and bias keyed by its state-dict name.
    pub fn named_tensors(&self) -> Vec<(String, Tensor)> {
        let mut out = Vec::new();
        for (label, layer) in &self.layers {
            match layer {
                Layer::Conv(conv) => conv.push_tensors(label, &mut out),
                Layer::Block(block) => block.push_tensors(label, &mut out),
                Layer::Relu | Layer::MaxPool | Layer::Upsample => {}
            }
        }
        out
    }

    /// Build four resolution groups of residual blocks.
    ///
    /// `widths[g]` is the output width of group `g`; the first block of each group
    /// maps from the previous width. `resample` follows every group but the last.
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn push_groups(
        &mut self,
        kind: BlockKind,
        n_in: usize,
        widths: [usize; GROUP_COUNT],
        block: BlockConfig,
        n_blk_per_group: usize,
        resample: Layer,
        vb: &VarBuilder,
    ) -> Result<()> {
        let resample_name = match resample {
            Layer::MaxPool => "pool",
            _ => "upsample",
        };
        let mut prev = n_in;
        for (g, &width) in widths.iter().enumerate() {
            let group = format!("group_{}", g + 1);
            let group_vb = vb.pp(&group);
            for i in 0..n_blk_per_group {
                let name = format!("block_{}", i + 1);
                let cfg = BlockConfig {
                    n_in: if i == 0 { prev } else { width },
                    n_out: width,
                    ..block
                };
                let blk = ResBlock::new(kind, cfg, group_vb.pp(&name))?;
                self.push(format!("blocks.{group}.{name}"), Layer::Block(blk));
            }
            if g + 1 < GROUP_COUNT {
                self.push(format!("blocks.{group}.{resample_name}"), resample.clone());
            }
            prev = width;
        }
        Ok(())
    }
}

impl Module for Layers {
    fn forward(&self, xs: &Tensor) -> candle_core::Result<Tensor> {
        let mut h = xs.clone();
        for (_, layer) in &self.layers {
            h = layer.forward(&h)?;
        }
        Ok(h)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::{DType, Device};

    #[test]
    fn max_pool_halves() {
        let x = Tensor::arange(0.0_f32, 16.0, &Device::Cpu)
            .unwrap()
            .reshape((1, 1, 4, 4))
            .unwrap();
        let y = Layer::MaxPool.forward(&x).unwrap();
        let y: Vec<f32> = y.flatten_all().unwrap().to_vec1().unwrap();
        assert_eq!(y, vec![5.0, 7.0, 13.0, 15.0]);
    }

    #[test]
    fn upsample_repeats_nearest() {
        let x = Tensor::new(&[1.0_f32, 2.0], &Device::Cpu)
            .unwrap()
            .reshape((1, 1, 1, 2))
            .unwrap();
        let y = Layer::Upsample.forward(&x).unwrap();
        assert_eq!(y.dims(), &[1, 1, 2, 4]);
        let y: Vec<f32> = y.flatten_all().unwrap().to_vec1().unwrap();
        assert_eq!(y, vec![1.0, 1.0, 2.0, 2.0, 1.0, 1.0, 2.0, 2.0]);
    }

    #[test]
    fn group_labels_follow_state_dict() {
        let device = Device::Cpu;
        let vb = VarBuilder::zeros(DType::F32, &device);
        let mut layers = Layers::default();
        assert!(layers.is_empty());
        let block = BlockConfig {
            n_in: 8,
            n_out: 8,
            n_layers: 4,
            use_float16: false,
            requires_grad: false,
        };
        layers
            .push_groups(BlockKind::Encoder, 8, [8, 16, 32, 64], block, 1, Layer::MaxPool, &vb)
            .unwrap();
        assert_eq!(layers.len(), 7);
        assert!(!layers.is_empty());
        let labels: Vec<_> = layers.labels().collect();
        assert_eq!(
            labels,
            vec![
                "blocks.group_1.block_1",
                "blocks.group_1.pool",
                "blocks.group_2.block_1",
                "blocks.group_2.pool",
                "blocks.group_3.block_1",
                "blocks.group_3.pool",
                "blocks.group_4.block_1",
            ]
        );
        let names: Vec<_> = layers.named_tensors().into_iter().map(|(n, _)| n).collect();
        assert!(names.contains(&"blocks.group_2.block_1.id_path.w".to_string()));
        assert!(!names.contains(&"blocks.group_1.block_1.id_path.w".to_string()));
        assert!(names.contains(&"blocks.group_4.block_1.res_path.conv_4.b".to_string()));
    }
}
