use std::{
    env, fmt,
    net::{IpAddr, Ipv4Addr, SocketAddr},
    path::PathBuf,
    str::FromStr,
    time::Duration,
};

use anyhow::{Context, anyhow, bail};

use crate::{hosted::HostedModel, model::ChatTemplate};

const DEFAULT_LISTEN_ADDR: SocketAddr = SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 8080);
const DEFAULT_GEMINI_API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta";

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SamplingDefaults {
    pub max_new_tokens: usize,
    pub temperature: f64,
    pub top_p: f64,
    pub top_k: usize,
}

/// Compile-time defaults for one locally served model.
#[derive(Debug, Clone, Copy)]
pub struct ModelProfile {
    pub service: &'static str,
    /// Environment variables consulted for the model id, first hit wins.
    pub model_env: &'static [&'static str],
    pub model_id: &'static str,
    pub module_path: &'static str,
    pub eos_tokens: &'static [&'static str],
    pub template: ChatTemplate,
    pub sampling: SamplingDefaults,
    /// Whether the hub copy of the model carries a `tokenizer.json`. Without
    /// one, `TOKENIZER_PATH` is required.
    pub hub_tokenizer: bool,
}

pub const BIOGPT: ModelProfile = ModelProfile {
    service: "biogpt-api",
    model_env: &["MODEL_ID"],
    model_id: "microsoft/BioGPT-Large",
    module_path: "models/biogpt_large.ts",
    eos_tokens: &["</s>"],
    template: ChatTemplate::Transcript,
    sampling: SamplingDefaults {
        max_new_tokens: 128,
        temperature: 0.8,
        top_p: 0.9,
        top_k: 50,
    },
    hub_tokenizer: false,
};

pub const TX_GEMMA: ModelProfile = ModelProfile {
    service: "tx-gemma-api",
    model_env: &["TX_GEMMA_MODEL", "MODEL_ID"],
    model_id: "google/gemma-2-2b-it",
    module_path: "models/gemma_2_2b_it.ts",
    eos_tokens: &["<eos>", "<end_of_turn>"],
    template: ChatTemplate::Gemma,
    sampling: SamplingDefaults {
        max_new_tokens: 256,
        temperature: 0.7,
        top_p: 0.95,
        top_k: 40,
    },
    hub_tokenizer: true,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceSpec {
    Cpu,
    Cuda(usize),
    Auto,
}

impl FromStr for DeviceSpec {
    type Err = anyhow::Error;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let lower = raw.trim().to_lowercase();
        match lower.as_str() {
            "cpu" => Ok(DeviceSpec::Cpu),
            "auto" => Ok(DeviceSpec::Auto),
            "cuda" | "gpu" => Ok(DeviceSpec::Cuda(0)),
            other => {
                let idx = other
                    .strip_prefix("cuda:")
                    .ok_or_else(|| anyhow!("unknown device '{raw}'"))?;
                let idx = idx
                    .parse::<usize>()
                    .with_context(|| format!("invalid cuda ordinal in '{raw}'"))?;
                Ok(DeviceSpec::Cuda(idx))
            }
        }
    }
}

impl fmt::Display for DeviceSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeviceSpec::Cpu => f.write_str("cpu"),
            DeviceSpec::Cuda(idx) => write!(f, "cuda:{idx}"),
            DeviceSpec::Auto => f.write_str("auto"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadPolicy {
    Eager,
    Lazy,
}

impl FromStr for LoadPolicy {
    type Err = anyhow::Error;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim().to_lowercase().as_str() {
            "eager" => Ok(LoadPolicy::Eager),
            "lazy" => Ok(LoadPolicy::Lazy),
            _ => bail!("MODEL_LOAD must be 'eager' or 'lazy', got '{raw}'"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct LocalModelConfig {
    pub listen_addr: SocketAddr,
    pub service_name: String,
    pub model_id: String,
    pub module_path: PathBuf,
    pub tokenizer_path: Option<PathBuf>,
    pub device: DeviceSpec,
    pub load_policy: LoadPolicy,
    pub eos_tokens: Vec<String>,
    pub template: ChatTemplate,
    pub sampling: SamplingDefaults,
    pub max_new_tokens_limit: usize,
}

impl LocalModelConfig {
    pub fn from_env(profile: &ModelProfile) -> anyhow::Result<Self> {
        Self::from_lookup(profile, |key| env::var(key).ok())
    }

    pub fn from_lookup<F>(profile: &ModelProfile, lookup: F) -> anyhow::Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let vars = Vars(&lookup);

        let model_id = profile
            .model_env
            .iter()
            .find_map(|key| vars.non_empty(key))
            .unwrap_or_else(|| profile.model_id.to_string());

        let eos_tokens = match vars.non_empty("EOS_TOKENS") {
            Some(raw) => raw
                .split(',')
                .map(str::trim)
                .filter(|token| !token.is_empty())
                .map(str::to_string)
                .collect(),
            None => profile.eos_tokens.iter().map(|t| t.to_string()).collect(),
        };

        let sampling = SamplingDefaults {
            max_new_tokens: vars.parse_or("MAX_NEW_TOKENS", profile.sampling.max_new_tokens)?,
            temperature: vars.parse_or("TEMPERATURE", profile.sampling.temperature)?,
            top_p: vars.parse_or("TOP_P", profile.sampling.top_p)?,
            top_k: vars.parse_or("TOP_K", profile.sampling.top_k)?,
        };
        let max_new_tokens_limit = vars.parse_or("MAX_NEW_TOKENS_LIMIT", 1024usize)?;

        let config = Self {
            listen_addr: vars.parse_or("SERVER_ADDR", DEFAULT_LISTEN_ADDR)?,
            service_name: profile.service.to_string(),
            model_id,
            module_path: vars
                .non_empty("MODULE_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(profile.module_path)),
            tokenizer_path: vars.non_empty("TOKENIZER_PATH").map(PathBuf::from),
            device: vars.parse_or("DEVICE", DeviceSpec::Auto)?,
            load_policy: vars.parse_or("MODEL_LOAD", LoadPolicy::Eager)?,
            eos_tokens,
            template: vars.parse_or("CHAT_TEMPLATE", profile.template)?,
            sampling,
            max_new_tokens_limit,
        };
        config.validate()?;
        if config.tokenizer_path.is_none() && !profile.hub_tokenizer {
            bail!(
                "TOKENIZER_PATH must be set for {}: {} publishes no tokenizer.json",
                profile.service,
                config.model_id
            );
        }
        Ok(config)
    }

    fn validate(&self) -> anyhow::Result<()> {
        let s = &self.sampling;
        if s.max_new_tokens == 0 || s.max_new_tokens > self.max_new_tokens_limit {
            bail!(
                "MAX_NEW_TOKENS must be between 1 and {}, got {}",
                self.max_new_tokens_limit,
                s.max_new_tokens
            );
        }
        if !s.temperature.is_finite() || s.temperature < 0.0 {
            bail!("TEMPERATURE must be a non-negative number, got {}", s.temperature);
        }
        if !(s.top_p > 0.0 && s.top_p <= 1.0) {
            bail!("TOP_P must be in (0, 1], got {}", s.top_p);
        }
        Ok(())
    }
}

#[derive(Clone)]
pub struct HostedConfig {
    pub listen_addr: SocketAddr,
    pub service_name: String,
    pub api_key: String,
    pub api_base: String,
    pub default_model: HostedModel,
    pub request_timeout: Duration,
}

impl fmt::Debug for HostedConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HostedConfig")
            .field("listen_addr", &self.listen_addr)
            .field("service_name", &self.service_name)
            .field("api_key", &"<redacted>")
            .field("api_base", &self.api_base)
            .field("default_model", &self.default_model)
            .field("request_timeout", &self.request_timeout)
            .finish()
    }
}

impl HostedConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> anyhow::Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let vars = Vars(&lookup);

        let api_key = vars
            .non_empty("GEMINI_API_KEY")
            .or_else(|| vars.non_empty("GOOGLE_API_KEY"))
            .ok_or_else(|| anyhow!("GEMINI_API_KEY (or GOOGLE_API_KEY) must be set"))?;

        let default_model = match vars.non_empty("GEMINI_DEFAULT_MODEL") {
            Some(raw) => raw.parse::<HostedModel>().map_err(|e| anyhow!("{e}"))?,
            None => HostedModel::default(),
        };

        let timeout_secs: u64 = vars.parse_or("GEMINI_TIMEOUT_SECS", 120)?;

        Ok(Self {
            listen_addr: vars.parse_or("SERVER_ADDR", DEFAULT_LISTEN_ADDR)?,
            service_name: "gemini-api".to_string(),
            api_key,
            api_base: vars
                .non_empty("GEMINI_API_BASE")
                .unwrap_or_else(|| DEFAULT_GEMINI_API_BASE.to_string())
                .trim_end_matches('/')
                .to_string(),
            default_model,
            request_timeout: Duration::from_secs(timeout_secs),
        })
    }
}

struct Vars<'a, F>(&'a F);

impl<F> Vars<'_, F>
where
    F: Fn(&str) -> Option<String>,
{
    fn non_empty(&self, key: &str) -> Option<String> {
        (self.0)(key)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    }

    fn parse_or<T>(&self, key: &str, default: T) -> anyhow::Result<T>
    where
        T: FromStr,
        T::Err: fmt::Display,
    {
        match self.non_empty(key) {
            Some(raw) => raw
                .parse()
                .map_err(|e| anyhow!("invalid value for {key} ('{raw}'): {e}")),
            None => Ok(default),
        }
    }
}
