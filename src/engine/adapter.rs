use std::sync::{Arc, Mutex};

use futures_util::StreamExt;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::config::EngineConfig;
use crate::error::EngineError;
use crate::models::ModelDescriptor;

use super::runner::{EngineHandle, GenerationRequest, LoadProgress, ModelRunner, TokenStream};

/// Lifecycle of the single model slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    Unloaded,
    Loading,
    Ready,
    Generating,
}

struct Inner {
    state: EngineState,
    handle: Option<EngineHandle>,
    cancel: Option<CancellationToken>,
}

/// Owns at most one loaded model and serializes access to it.
///
/// Loading a different model invalidates the current handle before the new
/// load starts, so a failed switch leaves the adapter unloaded rather than
/// silently falling back to the old model. Interrupting is a no-op unless a
/// generation is in flight.
#[derive(Clone)]
pub struct EngineAdapter {
    runner: Arc<dyn ModelRunner>,
    inner: Arc<Mutex<Inner>>,
}

/// Restores the slot to `Ready` when a generation stream is dropped,
/// whether it finished, errored or was interrupted.
struct GenerationGuard {
    inner: Arc<Mutex<Inner>>,
}

impl Drop for GenerationGuard {
    fn drop(&mut self) {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        if inner.state == EngineState::Generating {
            inner.state = EngineState::Ready;
        }
        inner.cancel = None;
    }
}

impl EngineAdapter {
    pub fn new(runner: Arc<dyn ModelRunner>) -> Self {
        Self {
            runner,
            inner: Arc::new(Mutex::new(Inner {
                state: EngineState::Unloaded,
                handle: None,
                cancel: None,
            })),
        }
    }

    pub fn state(&self) -> EngineState {
        self.inner.lock().unwrap_or_else(|e| e.into_inner()).state
    }

    pub fn loaded_model(&self) -> Option<ModelDescriptor> {
        self.inner
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .handle
            .as_ref()
            .map(|h| h.model.clone())
    }

    /// Make `model` the loaded model, reusing the current handle when it
    /// already matches. Progress reports go to `progress`.
    pub async fn ensure_loaded(
        &self,
        model: &ModelDescriptor,
        config: &EngineConfig,
        progress: mpsc::Sender<LoadProgress>,
    ) -> Result<(), EngineError> {
        {
            let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
            match inner.state {
                EngineState::Generating => {
                    return Err(EngineError::Generation(
                        "cannot load while generating".into(),
                    ));
                }
                EngineState::Loading => {
                    return Err(EngineError::Load("a load is already in progress".into()));
                }
                EngineState::Ready => {
                    if inner
                        .handle
                        .as_ref()
                        .is_some_and(|h| h.model.name == model.name)
                    {
                        debug!(model = %model.name, "reusing loaded model");
                        return Ok(());
                    }
                    info!(model = %model.name, "switching models, dropping current handle");
                    inner.handle = None;
                    inner.state = EngineState::Loading;
                }
                EngineState::Unloaded => {
                    inner.state = EngineState::Loading;
                }
            }
        }

        match self.runner.load(model, config, progress).await {
            Ok(handle) => {
                let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
                inner.handle = Some(handle);
                inner.state = EngineState::Ready;
                info!(model = %model.name, "model ready");
                Ok(())
            }
            Err(e) => {
                let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
                inner.handle = None;
                inner.state = EngineState::Unloaded;
                Err(e)
            }
        }
    }

    /// Start a generation against the loaded model.
    ///
    /// The returned stream ends with [`EngineError::Interrupted`] if
    /// [`interrupt`](Self::interrupt) fires while it is live; any other
    /// outcome leaves the model loaded and ready for the next turn.
    pub async fn generate(&self, request: GenerationRequest) -> Result<TokenStream, EngineError> {
        let (handle, token) = {
            let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
            match inner.state {
                EngineState::Ready => {}
                EngineState::Generating => {
                    return Err(EngineError::Generation(
                        "a generation is already in flight".into(),
                    ));
                }
                _ => {
                    return Err(EngineError::Generation("no model loaded".into()));
                }
            }
            let handle = inner
                .handle
                .clone()
                .ok_or_else(|| EngineError::Generation("no model loaded".into()))?;
            let token = CancellationToken::new();
            inner.cancel = Some(token.clone());
            inner.state = EngineState::Generating;
            (handle, token)
        };

        let mut source = match self.runner.stream_chat(&handle, request).await {
            Ok(stream) => stream,
            Err(e) => {
                let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
                inner.state = EngineState::Ready;
                inner.cancel = None;
                return Err(e);
            }
        };

        // The guard is armed before the stream is handed out, so dropping it
        // unpolled still releases the slot.
        let guard = GenerationGuard {
            inner: Arc::clone(&self.inner),
        };
        let stream = async_stream::stream! {
            let _guard = guard;
            loop {
                // Cancellation wins over a ready delta, so nothing leaks
                // through after an interrupt.
                tokio::select! {
                    biased;
                    () = token.cancelled() => {
                        yield Err(EngineError::Interrupted);
                        break;
                    }
                    next = source.next() => {
                        match next {
                            Some(item) => yield item,
                            None => break,
                        }
                    }
                }
            }
        };

        Ok(Box::pin(stream))
    }

    /// Cancel the in-flight generation, if any.
    pub fn interrupt(&self) {
        let inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        if inner.state == EngineState::Generating
            && let Some(token) = &inner.cancel
        {
            info!("interrupting generation");
            token.cancel();
        }
    }
}
