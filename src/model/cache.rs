use std::sync::{
    Arc,
    atomic::{AtomicUsize, Ordering},
};

use once_cell::sync::OnceCell;
use tokio::task;
use tracing::info;

use crate::{error::ServiceError, model::InferenceContext};

type Loader = dyn Fn() -> Result<InferenceContext, ServiceError> + Send + Sync;

/// Owns the one `InferenceContext` of a process.
///
/// The loader runs on the first successful `get`; concurrent callers wait for
/// that load instead of starting their own. A failed load leaves the cache
/// empty so a later call can try again.
pub struct ModelCache {
    loader: Box<Loader>,
    context: OnceCell<Arc<InferenceContext>>,
    loads: AtomicUsize,
}

impl std::fmt::Debug for ModelCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModelCache")
            .field("loaded", &self.is_loaded())
            .field("loads", &self.load_count())
            .finish_non_exhaustive()
    }
}

impl ModelCache {
    pub fn new<F>(loader: F) -> Self
    where
        F: Fn() -> Result<InferenceContext, ServiceError> + Send + Sync + 'static,
    {
        Self {
            loader: Box::new(loader),
            context: OnceCell::new(),
            loads: AtomicUsize::new(0),
        }
    }

    /// Returns the cached context, loading it first if needed. Blocks while a
    /// load is in progress.
    pub fn get(&self) -> Result<Arc<InferenceContext>, ServiceError> {
        self.context
            .get_or_try_init(|| {
                let context = (self.loader)()?;
                self.loads.fetch_add(1, Ordering::SeqCst);
                info!(
                    model = %context.model_id(),
                    device = %context.device(),
                    "model and tokenizer loaded"
                );
                Ok::<_, ServiceError>(Arc::new(context))
            })
            .cloned()
    }

    pub fn is_loaded(&self) -> bool {
        self.context.get().is_some()
    }

    pub fn load_count(&self) -> usize {
        self.loads.load(Ordering::SeqCst)
    }

    /// Runs `job` against the context on the blocking pool, loading the
    /// context first when the cache is still empty.
    pub async fn run<T, F>(self: &Arc<Self>, job: F) -> Result<T, ServiceError>
    where
        F: FnOnce(&InferenceContext) -> Result<T, ServiceError> + Send + 'static,
        T: Send + 'static,
    {
        let cache = Arc::clone(self);
        task::spawn_blocking(move || {
            let context = cache.get().map_err(|err| match err {
                ServiceError::ModelUnavailable(_) => err,
                other => ServiceError::ModelUnavailable(other.to_string()),
            })?;
            job(&context)
        })
        .await
        .map_err(|err| ServiceError::Inference(format!("inference task failed: {err}")))?
    }
}
