//! Checkpoint loading and saving.
//!
//! A checkpoint is a safetensors file holding every weight as F32 under its
//! state-dict name, with header metadata describing the network:
//!
//! ```text
//! __metadata__: { "format": "dvae", "kind": "encoder" | "decoder", "config": "<json>" }
//! ```
//!
//! [`load_model`] accepts a local path or an `http(s)://` URL. Bare state dicts
//! without metadata (e.g. converted PyTorch weights) load through
//! [`load_encoder_weights`] / [`load_decoder_weights`] with an explicit config.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use candle_core::{DType, Device, Tensor};
use candle_nn::VarBuilder;
use safetensors::SafeTensors;
use safetensors::tensor::TensorView;

use crate::config::{DecoderConfig, EncoderConfig};
use crate::model::{Decoder, Encoder};
use crate::{Error, Result};

/// Value of the `format` metadata key.
pub const FORMAT: &str = "dvae";

const KEY_FORMAT: &str = "format";
const KEY_KIND: &str = "kind";
const KEY_CONFIG: &str = "config";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelKind {
    Encoder,
    Decoder,
}

impl ModelKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ModelKind::Encoder => "encoder",
            ModelKind::Decoder => "decoder",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "encoder" => Some(ModelKind::Encoder),
            "decoder" => Some(ModelKind::Decoder),
            _ => None,
        }
    }
}

/// A restored network of either kind.
#[derive(Debug, Clone)]
pub enum Model {
    Encoder(Encoder),
    Decoder(Decoder),
}

impl Model {
    pub fn kind(&self) -> ModelKind {
        match self {
            Model::Encoder(_) => ModelKind::Encoder,
            Model::Decoder(_) => ModelKind::Decoder,
        }
    }

    pub fn into_encoder(self) -> Result<Encoder> {
        match self {
            Model::Encoder(encoder) => Ok(encoder),
            Model::Decoder(_) => Err(Error::invalid("checkpoint holds a decoder, not an encoder")),
        }
    }

    pub fn into_decoder(self) -> Result<Decoder> {
        match self {
            Model::Decoder(decoder) => Ok(decoder),
            Model::Encoder(_) => Err(Error::invalid("checkpoint holds an encoder, not a decoder")),
        }
    }

    pub fn config_json(&self) -> Result<String> {
        Ok(match self {
            Model::Encoder(encoder) => serde_json::to_string_pretty(encoder.config())?,
            Model::Decoder(decoder) => serde_json::to_string_pretty(decoder.config())?,
        })
    }

    pub fn parameter_count(&self) -> usize {
        match self {
            Model::Encoder(encoder) => encoder.parameter_count(),
            Model::Decoder(decoder) => decoder.parameter_count(),
        }
    }

    /// Deserialize a checkpoint held in memory, placing weights on `device`.
    pub fn from_bytes(bytes: Vec<u8>, device: &Device) -> Result<Self> {
        let (_, header) = SafeTensors::read_metadata(&bytes)?;
        let info = header.metadata().as_ref().ok_or_else(|| {
            Error::WeightLoad(
                "checkpoint has no metadata; load it with an explicit config instead".into(),
            )
        })?;
        let field = |key: &str| {
            info.get(key)
                .ok_or_else(|| Error::WeightLoad(format!("checkpoint metadata lacks `{key}`")))
        };

        let format = field(KEY_FORMAT)?;
        if format != FORMAT {
            return Err(Error::WeightLoad(format!(
                "unsupported checkpoint format `{format}`"
            )));
        }
        let kind_str = field(KEY_KIND)?;
        let kind = ModelKind::parse(kind_str)
            .ok_or_else(|| Error::WeightLoad(format!("unknown model kind `{kind_str}`")))?;
        let config = field(KEY_CONFIG)?.clone();

        let vb = VarBuilder::from_buffered_safetensors(bytes, DType::F32, device)?;
        let model = match kind {
            ModelKind::Encoder => {
                let config: EncoderConfig = serde_json::from_str(&config)?;
                Model::Encoder(Encoder::new(&config, vb).map_err(weight_error)?)
            }
            ModelKind::Decoder => {
                let config: DecoderConfig = serde_json::from_str(&config)?;
                Model::Decoder(Decoder::new(&config, vb).map_err(weight_error)?)
            }
        };
        tracing::info!(kind = kind.as_str(), device = ?device, "restored dVAE checkpoint");
        Ok(model)
    }
}

/// Missing or misshapen tensors surface from candle; report them as load failures.
fn weight_error(error: Error) -> Error {
    match error {
        Error::Candle(e) => Error::WeightLoad(e.to_string()),
        other => other,
    }
}

fn is_remote(identifier: &str) -> bool {
    identifier.starts_with("http://") || identifier.starts_with("https://")
}

fn check_status(url: &str, status: reqwest::StatusCode) -> Result<()> {
    if status.is_success() {
        Ok(())
    } else {
        Err(Error::Fetch {
            url: url.to_string(),
            status: status.as_u16(),
        })
    }
}

fn fetch(url: &str) -> Result<Vec<u8>> {
    tracing::info!(url, "fetching checkpoint");
    let response = reqwest::blocking::get(url)?;
    check_status(url, response.status())?;
    let bytes = response.bytes()?;
    tracing::debug!(url, bytes = bytes.len(), "checkpoint fetched");
    Ok(bytes.to_vec())
}

fn read_local(path: &Path) -> Result<Vec<u8>> {
    tracing::info!(path = %path.display(), "reading checkpoint");
    std::fs::read(path).map_err(|e| match e.kind() {
        std::io::ErrorKind::NotFound => Error::NotFound(path.to_path_buf()),
        _ => Error::Io(e),
    })
}

/// Load an encoder or decoder from a local path or `http(s)://` URL.
///
/// Weights go to `device`, or the CPU when `None`. Failures are not retried.
pub fn load_model(identifier: &str, device: Option<&Device>) -> Result<Model> {
    let device = device.cloned().unwrap_or(Device::Cpu);
    let bytes = if is_remote(identifier) {
        fetch(identifier)?
    } else {
        read_local(Path::new(identifier))?
    };
    Model::from_bytes(bytes, &device)
}

fn mmap_state_dict(path: &Path, device: &Device) -> Result<VarBuilder<'static>> {
    if !path.exists() {
        return Err(Error::NotFound(PathBuf::from(path)));
    }
    let vb = unsafe {
        VarBuilder::from_mmaped_safetensors(&[path], DType::F32, device)
            .map_err(|e| Error::WeightLoad(format!("{}: {e}", path.display())))?
    };
    Ok(vb)
}

/// Build an encoder from a bare safetensors state dict and an explicit config.
pub fn load_encoder_weights(
    path: &Path,
    config: &EncoderConfig,
    device: &Device,
) -> Result<Encoder> {
    let vb = mmap_state_dict(path, device)?;
    Encoder::new(config, vb).map_err(weight_error)
}

/// Build a decoder from a bare safetensors state dict and an explicit config.
pub fn load_decoder_weights(
    path: &Path,
    config: &DecoderConfig,
    device: &Device,
) -> Result<Decoder> {
    let vb = mmap_state_dict(path, device)?;
    Decoder::new(config, vb).map_err(weight_error)
}

fn serialize(kind: ModelKind, config: String, tensors: Vec<(String, Tensor)>) -> Result<Vec<u8>> {
    let mut buffers = Vec::with_capacity(tensors.len());
    for (name, tensor) in tensors {
        let shape = tensor.dims().to_vec();
        let values: Vec<f32> = tensor
            .to_device(&Device::Cpu)?
            .to_dtype(DType::F32)?
            .flatten_all()?
            .to_vec1()?;
        let data: Vec<u8> = values.iter().flat_map(|v| v.to_le_bytes()).collect();
        buffers.push((name, shape, data));
    }

    let views = buffers
        .iter()
        .map(|(name, shape, data)| {
            let view = TensorView::new(safetensors::Dtype::F32, shape.clone(), data)?;
            Ok((name.as_str(), view))
        })
        .collect::<Result<Vec<_>>>()?;

    let metadata = HashMap::from([
        (KEY_FORMAT.to_string(), FORMAT.to_string()),
        (KEY_KIND.to_string(), kind.as_str().to_string()),
        (KEY_CONFIG.to_string(), config),
    ]);
    Ok(safetensors::serialize(views, &Some(metadata))?)
}

pub fn encoder_to_bytes(encoder: &Encoder) -> Result<Vec<u8>> {
    let config = serde_json::to_string(encoder.config())?;
    serialize(ModelKind::Encoder, config, encoder.named_tensors())
}

pub fn decoder_to_bytes(decoder: &Decoder) -> Result<Vec<u8>> {
    let config = serde_json::to_string(decoder.config())?;
    serialize(ModelKind::Decoder, config, decoder.named_tensors())
}

pub fn save_encoder(encoder: &Encoder, path: &Path) -> Result<()> {
    std::fs::write(path, encoder_to_bytes(encoder)?)?;
    tracing::info!(path = %path.display(), "saved dVAE encoder");
    Ok(())
}

pub fn save_decoder(decoder: &Decoder, path: &Path) -> Result<()> {
    std::fs::write(path, decoder_to_bytes(decoder)?)?;
    tracing::info!(path = %path.display(), "saved dVAE decoder");
    Ok(())
}
