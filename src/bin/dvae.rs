//! dVAE CLI — create, inspect and smoke-test checkpoints.
//!
//! ```text
//! dvae init --kind encoder --output encoder.safetensors
//! dvae inspect https://example.com/decoder.safetensors
//! dvae check encoder.safetensors --size 256
//! ```
//!
//! `check` runs one forward pass on a zero image (or an all-symbol-0 latent) and
//! prints a one-line JSON summary to stdout.

use std::path::PathBuf;

use candle_core::{DType, Device, Tensor};
use clap::{Parser, Subcommand, ValueEnum};
use dvae::{
    Decoder, DecoderConfig, Encoder, EncoderConfig, Model, checkpoint,
    model::{all_finite, one_hot},
    pixels::map_pixels,
};

#[derive(Parser, Debug)]
#[command(name = "dvae", about = "DALL-E discrete VAE checkpoints")]
struct Args {
    /// Run on the CPU even when a GPU is available.
    #[arg(long, global = true, default_value_t = false)]
    cpu: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Write a freshly initialized network to a checkpoint.
    Init {
        #[arg(long, value_enum)]
        kind: Kind,

        /// JSON config file; omitted fields take their defaults.
        #[arg(long)]
        config: Option<PathBuf>,

        #[arg(long, short = 'o')]
        output: PathBuf,
    },

    /// Print the kind, config and parameter count of a checkpoint.
    Inspect {
        /// Local path or http(s) URL.
        model: String,
    },

    /// Run a forward pass on a synthetic input and report the output.
    Check {
        /// Local path or http(s) URL.
        model: String,

        /// Image side length in pixels (multiple of 8).
        #[arg(long, default_value_t = 256)]
        size: usize,

        #[arg(long, default_value_t = 1)]
        batch: usize,
    },
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum Kind {
    Encoder,
    Decoder,
}

fn select_device(cpu: bool) -> candle_core::Result<Device> {
    if cpu {
        return Ok(Device::Cpu);
    }
    #[cfg(feature = "metal")]
    if candle_core::utils::metal_is_available() {
        return Device::new_metal(0);
    }
    Device::cuda_if_available(0)
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_target(false)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    let device = select_device(args.cpu)?;
    tracing::info!("Using device: {:?}", device);

    match args.command {
        Command::Init {
            kind,
            config,
            output,
        } => {
            let json = match &config {
                Some(path) => std::fs::read_to_string(path)?,
                None => "{}".to_string(),
            };
            match kind {
                Kind::Encoder => {
                    let cfg: EncoderConfig = serde_json::from_str(&json)?;
                    let (encoder, _varmap) = Encoder::init(&cfg, &device)?;
                    checkpoint::save_encoder(&encoder, &output)?;
                }
                Kind::Decoder => {
                    let cfg: DecoderConfig = serde_json::from_str(&json)?;
                    let (decoder, _varmap) = Decoder::init(&cfg, &device)?;
                    checkpoint::save_decoder(&decoder, &output)?;
                }
            }
            let kind = format!("{kind:?}").to_lowercase();
            println!("{}", serde_json::json!({ "path": output, "kind": kind }));
        }
        Command::Inspect { model } => {
            let loaded = checkpoint::load_model(&model, Some(&device))
                .map_err(|e| anyhow::anyhow!("failed to load {model}: {e}"))?;
            println!("kind: {}", loaded.kind().as_str());
            println!("parameters: {}", loaded.parameter_count());
            println!("config: {}", loaded.config_json()?);
        }
        Command::Check { model, size, batch } => {
            if size == 0 || size % 8 != 0 {
                anyhow::bail!("size must be a positive multiple of 8, got {size}");
            }
            let loaded = checkpoint::load_model(&model, Some(&device))
                .map_err(|e| anyhow::anyhow!("failed to load {model}: {e}"))?;
            let kind = loaded.kind();
            let start = std::time::Instant::now();
            let out = match loaded {
                Model::Encoder(encoder) => {
                    let channels = encoder.config().input_channels;
                    let x = Tensor::zeros((batch, channels, size, size), DType::F32, &device)?;
                    encoder.forward(&map_pixels(&x)?)?
                }
                Model::Decoder(decoder) => {
                    let side = size / 8;
                    let ids = Tensor::zeros((batch, side, side), DType::U32, &Device::Cpu)?;
                    let z = one_hot(&ids, decoder.config().vocab_size)?.to_device(&device)?;
                    decoder.forward(&z)?
                }
            };
            let finite = all_finite(&out)?;
            tracing::info!("Forward pass: {:.2}s", start.elapsed().as_secs_f64());
            println!(
                "{}",
                serde_json::json!({
                    "kind": kind.as_str(),
                    "shape": out.dims(),
                    "finite": finite,
                })
            );
            if !finite {
                anyhow::bail!("output contains NaN or Inf");
            }
        }
    }

    Ok(())
}
