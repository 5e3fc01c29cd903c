use crate::error::ServiceError;

/// A causal language model that scores the next position of a token sequence.
///
/// Implementations are shared across requests behind an `Arc`, so every call
/// must leave the model unchanged.
pub trait CausalLm: Send + Sync {
    /// Logits over the vocabulary for the token following `input_ids`.
    fn next_token_logits(&self, input_ids: &[u32]) -> Result<Vec<f32>, ServiceError>;
}
