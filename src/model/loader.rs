use std::{fs, path::Path, sync::Arc};

use parking_lot::Mutex;
use tch::{Device, IValue, Kind, Tensor, no_grad};
use tokenizers::Tokenizer;
use tracing::{info, warn};

use crate::{
    config::{DeviceSpec, LocalModelConfig},
    error::ServiceError,
    model::{CausalLm, InferenceContext},
};

/// Builds the inference context described by `config`: tokenizer from disk or
/// the hub, TorchScript weights placed on the configured device.
pub fn load_context(config: &LocalModelConfig) -> Result<InferenceContext, ServiceError> {
    let tokenizer = load_tokenizer(config)?;
    let device = resolve_device(config.device);
    info!(
        model = %config.model_id,
        module = %config.module_path.display(),
        ?device,
        "loading TorchScript module"
    );
    let model = TorchScriptLm::load(&config.module_path, device)?;

    Ok(InferenceContext::new(
        config.model_id.clone(),
        format!("{device:?}").to_lowercase(),
        tokenizer,
        Arc::new(model),
        config.template,
        &config.eos_tokens,
    ))
}

fn load_tokenizer(config: &LocalModelConfig) -> Result<Tokenizer, ServiceError> {
    match config.tokenizer_path.as_deref() {
        Some(path) => Tokenizer::from_file(path).map_err(|e| {
            ServiceError::ModelUnavailable(format!(
                "tokenizer {} could not be loaded: {e}",
                path.display()
            ))
        }),
        None => {
            info!(model = %config.model_id, "fetching tokenizer from the hub");
            Tokenizer::from_pretrained(&config.model_id, None).map_err(|e| {
                ServiceError::ModelUnavailable(format!(
                    "tokenizer for {} could not be fetched: {e}",
                    config.model_id
                ))
            })
        }
    }
}

fn resolve_device(spec: DeviceSpec) -> Device {
    match spec {
        DeviceSpec::Cpu => Device::Cpu,
        DeviceSpec::Auto => Device::cuda_if_available(),
        DeviceSpec::Cuda(idx) => {
            if tch::Cuda::is_available() {
                Device::Cuda(idx)
            } else {
                warn!(ordinal = idx, "CUDA requested but not available, using CPU");
                Device::Cpu
            }
        }
    }
}

/// A traced causal LM whose forward pass maps `[1, seq]` token ids to
/// `[1, seq, vocab]` logits, optionally wrapped in a tuple with cache tensors.
pub struct TorchScriptLm {
    device: Device,
    module: Mutex<tch::CModule>,
}

impl TorchScriptLm {
    pub fn load(module_path: &Path, device: Device) -> Result<Self, ServiceError> {
        if !module_path.exists() {
            return Err(ServiceError::ModelUnavailable(format!(
                "model artifact missing: {}",
                module_path.display()
            )));
        }
        let size_bytes = fs::metadata(module_path)?.len();
        let mut module = tch::CModule::load_on_device(module_path, device)
            .map_err(|e| ServiceError::ModelUnavailable(e.to_string()))?;
        module.set_eval();
        info!(size_bytes, "TorchScript module ready");

        Ok(Self {
            device,
            module: Mutex::new(module),
        })
    }
}

impl CausalLm for TorchScriptLm {
    fn next_token_logits(&self, input_ids: &[u32]) -> Result<Vec<f32>, ServiceError> {
        let ids: Vec<i64> = input_ids.iter().map(|&id| i64::from(id)).collect();

        no_grad(|| {
            let input = Tensor::from_slice(&ids)
                .reshape([1, ids.len() as i64])
                .to(self.device);

            let output = self
                .module
                .lock()
                .forward_is(&[IValue::Tensor(input)])
                .map_err(|e| ServiceError::Inference(e.to_string()))?;

            let logits = match output {
                IValue::Tensor(t) => t,
                IValue::Tuple(ref items) => match items.first() {
                    Some(IValue::Tensor(t)) => t.shallow_clone(),
                    _ => {
                        return Err(ServiceError::Inference(
                            "expected logits tensor as first tuple element".into(),
                        ));
                    }
                },
                _ => {
                    return Err(ServiceError::Inference(
                        "unexpected model output format".into(),
                    ));
                }
            };

            // [1, seq, vocab] -> [vocab] at the last position
            let last = logits
                .select(1, -1)
                .squeeze()
                .to_kind(Kind::Float)
                .to_device(Device::Cpu);

            Vec::<f32>::try_from(&last).map_err(|e| ServiceError::Inference(e.to_string()))
        })
    }
}
