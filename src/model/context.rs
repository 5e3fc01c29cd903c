use std::{sync::Arc, time::Instant};

use tokenizers::Tokenizer;
use tracing::{debug, warn};

use crate::{
    error::ServiceError,
    model::{
        CausalLm, ChatMessage, ChatTemplate, Completion, FinishReason, SamplingParams,
        sampler::Sampler,
    },
};

/// Tokenizer, weights and chat framing for one model. Immutable once built.
pub struct InferenceContext {
    model_id: String,
    device: String,
    tokenizer: Tokenizer,
    model: Arc<dyn CausalLm>,
    template: ChatTemplate,
    eos_token_ids: Vec<u32>,
}

impl InferenceContext {
    pub fn new(
        model_id: impl Into<String>,
        device: impl Into<String>,
        tokenizer: Tokenizer,
        model: Arc<dyn CausalLm>,
        template: ChatTemplate,
        eos_tokens: &[String],
    ) -> Self {
        let model_id = model_id.into();
        let mut eos_token_ids = Vec::with_capacity(eos_tokens.len());
        for token in eos_tokens {
            match tokenizer.token_to_id(token) {
                Some(id) => eos_token_ids.push(id),
                None => warn!(%model_id, token = %token, "end-of-sequence token not in vocabulary"),
            }
        }
        if eos_token_ids.is_empty() {
            warn!(%model_id, "no end-of-sequence token resolved, generation always runs to the token budget");
        }

        Self {
            model_id,
            device: device.into(),
            tokenizer,
            model,
            template,
            eos_token_ids,
        }
    }

    pub fn model_id(&self) -> &str {
        &self.model_id
    }

    pub fn device(&self) -> &str {
        &self.device
    }

    pub fn eos_token_ids(&self) -> &[u32] {
        &self.eos_token_ids
    }

    pub fn generate(
        &self,
        prompt: &str,
        params: &SamplingParams,
    ) -> Result<Completion, ServiceError> {
        self.run(prompt, true, params)
    }

    /// Renders `messages` with the chat template and continues from the open
    /// model turn.
    pub fn chat(
        &self,
        messages: &[ChatMessage],
        params: &SamplingParams,
    ) -> Result<Completion, ServiceError> {
        let prompt = self.template.render(messages)?;
        self.run(&prompt, !self.template.includes_bos(), params)
    }

    fn run(
        &self,
        prompt: &str,
        add_special_tokens: bool,
        params: &SamplingParams,
    ) -> Result<Completion, ServiceError> {
        let encoding = self
            .tokenizer
            .encode(prompt, add_special_tokens)
            .map_err(|e| ServiceError::Tokenizer(e.to_string()))?;
        let mut ids: Vec<u32> = encoding.get_ids().to_vec();
        if ids.is_empty() {
            return Err(ServiceError::BadRequest("prompt produced no tokens".into()));
        }
        let prompt_tokens = ids.len();

        let mut sampler = Sampler::new(params);
        let mut finish_reason = FinishReason::Length;
        let start = Instant::now();

        for _ in 0..params.max_new_tokens {
            let logits = self.model.next_token_logits(&ids)?;
            let next = sampler.sample(&logits)?;
            ids.push(next);
            if self.eos_token_ids.contains(&next) {
                finish_reason = FinishReason::Stop;
                break;
            }
        }

        let elapsed = start.elapsed();

        let text = self
            .tokenizer
            .decode(&ids, true)
            .map_err(|e| ServiceError::Tokenizer(e.to_string()))?;
        let reply = self
            .tokenizer
            .decode(&ids[prompt_tokens..], true)
            .map_err(|e| ServiceError::Tokenizer(e.to_string()))?;
        let generated_ids = ids.split_off(prompt_tokens);

        debug!(
            model = %self.model_id,
            prompt_tokens,
            generated = generated_ids.len(),
            ?finish_reason,
            elapsed_ms = elapsed.as_millis() as u64,
            "generation finished"
        );

        Ok(Completion {
            prompt_tokens,
            generated_ids,
            text: text.trim().to_string(),
            reply: reply.trim().to_string(),
            finish_reason,
            elapsed,
        })
    }
}
