//! Next-token selection from raw logits.
//!
//! Filters run in the usual order: temperature scaling, top-k truncation,
//! softmax, then the nucleus (top-p) cut. The most likely token always
//! survives every filter.

use std::cmp::Ordering;

use rand::{
    SeedableRng,
    distributions::{Distribution, WeightedIndex},
    rngs::StdRng,
};

use crate::{error::ServiceError, model::SamplingParams};

pub struct Sampler {
    rng: StdRng,
    temperature: f64,
    top_p: f64,
    top_k: usize,
}

impl Sampler {
    pub fn new(params: &SamplingParams) -> Self {
        let rng = match params.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Self {
            rng,
            temperature: params.temperature,
            top_p: params.top_p,
            top_k: params.top_k,
        }
    }

    pub fn sample(&mut self, logits: &[f32]) -> Result<u32, ServiceError> {
        if self.temperature <= 0.0 {
            return argmax(logits);
        }

        let mut candidates: Vec<(u32, f64)> = logits
            .iter()
            .enumerate()
            .filter(|(_, logit)| !logit.is_nan())
            .map(|(idx, &logit)| (idx as u32, f64::from(logit) / self.temperature))
            .collect();
        if candidates.is_empty() {
            return Err(ServiceError::Inference("model produced no usable logits".into()));
        }
        candidates.sort_by(|a, b| b.1.total_cmp(&a.1));

        if self.top_k > 0 && self.top_k < candidates.len() {
            candidates.truncate(self.top_k);
        }

        let max = candidates[0].1;
        if !max.is_finite() {
            return Ok(candidates[0].0);
        }
        let mut probs: Vec<f64> = candidates.iter().map(|(_, l)| (l - max).exp()).collect();
        let total: f64 = probs.iter().sum();
        probs.iter_mut().for_each(|p| *p /= total);

        if self.top_p < 1.0 {
            let mut cumulative = 0.0;
            let mut keep = probs.len();
            for (idx, p) in probs.iter().enumerate() {
                cumulative += p;
                if cumulative >= self.top_p {
                    keep = idx + 1;
                    break;
                }
            }
            probs.truncate(keep);
            candidates.truncate(keep);
        }

        let dist = WeightedIndex::new(&probs)
            .map_err(|e| ServiceError::Inference(format!("invalid sampling distribution: {e}")))?;
        Ok(candidates[dist.sample(&mut self.rng)].0)
    }
}

fn argmax(logits: &[f32]) -> Result<u32, ServiceError> {
    logits
        .iter()
        .enumerate()
        .filter(|(_, logit)| !logit.is_nan())
        .max_by(|a, b| a.1.partial_cmp(b.1).unwrap_or(Ordering::Equal))
        .map(|(idx, _)| idx as u32)
        .ok_or_else(|| ServiceError::Inference("model produced no usable logits".into()))
}
