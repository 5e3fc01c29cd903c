pub mod config;
pub mod error;
pub mod hosted;
pub mod model;
pub mod server;
pub mod telemetry;

pub use config::{HostedConfig, LocalModelConfig};
pub use error::ServiceError;
pub use model::{InferenceContext, ModelCache};
pub use server::{LocalState, biogpt_router, gemini_router, tx_gemma_router};
