//! Network configuration for the dVAE encoder and decoder.
//!
//! Defaults match the published DALL-E dVAE checkpoints except for the decoder
//! stem width, see [`DecoderConfig::n_init`].

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Number of resolution groups in both networks.
pub const GROUP_COUNT: usize = 4;

/// Smallest codebook either network accepts.
pub const MIN_VOCAB_SIZE: usize = 512;

/// Smallest base hidden width either network accepts.
pub const MIN_N_HID: usize = 64;

/// Smallest decoder stem width.
pub const MIN_N_INIT: usize = 8;

/// Encoder configuration: image `[B, input_channels, H, W]` → logits `[B, vocab_size, H/8, W/8]`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EncoderConfig {
    /// Base hidden width; groups run at 1×, 2×, 4× and 8× of it.
    pub n_hid: usize,
    pub n_blk_per_group: usize,
    pub input_channels: usize,
    pub vocab_size: usize,
    /// Keep weights as tracked variables instead of detaching them.
    pub requires_grad: bool,
    /// Run residual-block convolutions in F16 when the weights live on an accelerator.
    pub use_mixed_precision: bool,
}

impl Default for EncoderConfig {
    fn default() -> Self {
        Self {
            n_hid: 256,
            n_blk_per_group: 2,
            input_channels: 3,
            vocab_size: 8192,
            requires_grad: false,
            use_mixed_precision: true,
        }
    }
}

impl EncoderConfig {
    pub fn validate(&self) -> Result<()> {
        check_common(self.n_hid, self.n_blk_per_group, self.vocab_size)?;
        if self.input_channels < 1 {
            return Err(Error::invalid("input_channels must be >= 1"));
        }
        Ok(())
    }

    /// Total residual blocks across all groups.
    pub fn n_layers(&self) -> usize {
        GROUP_COUNT * self.n_blk_per_group
    }
}

/// Decoder configuration: latent `[B, vocab_size, H, W]` → params `[B, 2 * output_channels, 8H, 8W]`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DecoderConfig {
    /// Stem output width. `None` means `8 * n_hid`; the published decoder uses 128.
    pub n_init: Option<usize>,
    pub n_hid: usize,
    pub n_blk_per_group: usize,
    pub output_channels: usize,
    pub vocab_size: usize,
    pub requires_grad: bool,
    pub use_mixed_precision: bool,
}

impl Default for DecoderConfig {
    fn default() -> Self {
        Self {
            n_init: None,
            n_hid: 256,
            n_blk_per_group: 2,
            output_channels: 3,
            vocab_size: 8192,
            requires_grad: false,
            use_mixed_precision: true,
        }
    }
}

impl DecoderConfig {
    pub fn validate(&self) -> Result<()> {
        check_common(self.n_hid, self.n_blk_per_group, self.vocab_size)?;
        if self.output_channels < 1 {
            return Err(Error::invalid("output_channels must be >= 1"));
        }
        if let Some(n_init) = self.n_init
            && n_init < MIN_N_INIT
        {
            return Err(Error::invalid(format!(
                "n_init must be >= {MIN_N_INIT}, got {n_init}"
            )));
        }
        Ok(())
    }

    pub fn n_layers(&self) -> usize {
        GROUP_COUNT * self.n_blk_per_group
    }

    /// Resolved stem output width.
    pub fn stem_width(&self) -> usize {
        self.n_init.unwrap_or(8 * self.n_hid)
    }
}

fn check_common(n_hid: usize, n_blk_per_group: usize, vocab_size: usize) -> Result<()> {
    if n_hid < MIN_N_HID {
        return Err(Error::invalid(format!(
            "n_hid must be >= {MIN_N_HID}, got {n_hid}"
        )));
    }
    if n_blk_per_group < 1 {
        return Err(Error::invalid("n_blk_per_group must be >= 1"));
    }
    if vocab_size < MIN_VOCAB_SIZE {
        return Err(Error::invalid(format!(
            "vocab_size must be >= {MIN_VOCAB_SIZE}, got {vocab_size}"
        )));
    }
    Ok(())
}
