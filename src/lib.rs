//! DALL-E discrete VAE in pure Rust.
//!
//! A candle-based implementation of the dVAE encoder and decoder. The encoder
//! turns an RGB image into per-cell logits over a codebook of `vocab_size`
//! symbols; the decoder turns a one-hot (or soft) latent grid back into
//! logit-Laplace pixel parameters.
//!
//! ## Architecture
//!
//! ```text
//! image [B, 3, H, W] in [0, 1]
//!        ↓ map_pixels
//!   Encoder (stem 7×7, 4 groups, 3× max-pool)
//!        ↓
//! logits [B, vocab, H/8, W/8] ─→ (external) argmax / gumbel ─→ one-hot
//!                                                                ↓
//!                               Decoder (stem 1×1, 4 groups, 3× upsample)
//!                                                                ↓
//!                                          params [B, 6, H, W] ─→ reconstruct
//! ```
//!
//! ## Modules
//!
//! - [`model`] — convolution, residual block, encoder, decoder
//! - [`pixels`] — `map_pixels` / `unmap_pixels` and decoder output helpers
//! - [`checkpoint`] — load from a path or URL, save to safetensors
//! - [`config`] — serde-backed network configuration

pub mod checkpoint;
pub mod config;
pub mod model;
pub mod pixels;

mod error;

pub use checkpoint::{Model, ModelKind, load_model};
pub use config::{DecoderConfig, EncoderConfig};
pub use error::{Error, Result};
pub use model::{Decoder, Encoder};
pub use pixels::{map_pixels, unmap_pixels};
