mod backend;
mod cache;
mod context;
#[cfg(feature = "tch-backend")]
mod loader;
mod sampler;
mod template;
mod types;

pub use backend::CausalLm;
pub use cache::ModelCache;
pub use context::InferenceContext;
#[cfg(feature = "tch-backend")]
pub use loader::{TorchScriptLm, load_context};
pub use sampler::Sampler;
pub use template::ChatTemplate;
pub use types::{
    ChatMessage, Completion, FinishReason, Role, SamplingOverrides, SamplingParams,
    validate_messages, validate_prompt,
};
