//! Inference backend abstraction and the process-wide shared handle

use crate::{
    config::ExecutionProvider,
    error::{BgRemovalError, Result},
    types::{NormalizedTensor, SaliencyMap},
};
use ndarray::Array4;
use std::path::PathBuf;
use std::sync::{mpsc, Arc, Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::{Duration, Instant};

/// Settings a backend needs to load its model
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackendConfig {
    /// Resolved model artifact on disk
    pub model_path: PathBuf,
    /// Execution provider (ignored by CPU-only backends)
    pub execution_provider: ExecutionProvider,
    /// Intra-op thread count (0 = auto)
    pub intra_threads: usize,
}

impl BackendConfig {
    #[must_use]
    pub fn new<P: Into<PathBuf>>(model_path: P) -> Self {
        Self {
            model_path: model_path.into(),
            execution_provider: ExecutionProvider::Auto,
            intra_threads: 0,
        }
    }

    /// Intra-op threads, resolving 0 to the available parallelism
    #[must_use]
    pub fn resolved_intra_threads(&self) -> usize {
        if self.intra_threads > 0 {
            self.intra_threads
        } else {
            thread::available_parallelism()
                .map(std::num::NonZeroUsize::get)
                .unwrap_or(4)
        }
    }
}

/// Trait for inference backends
pub trait InferenceBackend {
    /// Load the model; a second call on an initialized backend is a no-op
    ///
    /// # Errors
    /// - Model file missing or corrupt
    /// - Execution provider initialization failures
    fn initialize(&mut self, config: &BackendConfig) -> Result<Option<Duration>>;

    /// Run inference on a `[1, 3, H, W]` tensor, returning `[1, 1, H, W]`
    ///
    /// # Errors
    /// - Backend not initialized
    /// - Model inference failures
    /// - Unexpected output tensor rank
    fn infer(&mut self, input: &Array4<f32>) -> Result<Array4<f32>>;

    /// Expected input shape (N, C, H, W)
    fn input_shape(&self) -> (usize, usize, usize, usize);

    /// Expected output shape (N, C, H, W)
    fn output_shape(&self) -> (usize, usize, usize, usize);

    /// Short backend name for logs
    fn name(&self) -> &'static str;

    /// Check if backend is initialized
    fn is_initialized(&self) -> bool;
}

type BoxedBackend = Box<dyn InferenceBackend + Send>;

/// Cloneable handle to the single loaded model
///
/// Every call takes an exclusive lock, so inference runs one request at a time
/// regardless of how many request threads are active.
#[derive(Clone)]
pub struct SharedBackend {
    inner: Arc<Mutex<BoxedBackend>>,
    name: &'static str,
    input_shape: (usize, usize, usize, usize),
    timeout: Option<Duration>,
}

impl std::fmt::Debug for SharedBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SharedBackend")
            .field("name", &self.name)
            .field("input_shape", &self.input_shape)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

impl SharedBackend {
    /// Wrap an initialized backend
    ///
    /// # Errors
    /// Returns `BgRemovalError::BackendUnavailable` if the backend was not initialized
    pub fn new(backend: BoxedBackend) -> Result<Self> {
        if !backend.is_initialized() {
            return Err(BgRemovalError::backend_unavailable(format!(
                "{} backend must be initialized before sharing",
                backend.name()
            )));
        }
        Ok(Self {
            name: backend.name(),
            input_shape: backend.input_shape(),
            inner: Arc::new(Mutex::new(backend)),
            timeout: None,
        })
    }

    /// Bound each inference, measured from when the call acquires the model
    ///
    /// A timed-out inference keeps running and holds the lock until it finishes.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    #[must_use]
    pub fn name(&self) -> &'static str {
        self.name
    }

    #[must_use]
    pub fn input_shape(&self) -> (usize, usize, usize, usize) {
        self.input_shape
    }

    /// Spatial input size as (width, height)
    #[must_use]
    pub fn input_size(&self) -> (u32, u32) {
        let (_, _, height, width) = self.input_shape;
        (width as u32, height as u32)
    }

    /// Run inference and extract the saliency map
    ///
    /// # Errors
    /// - `BgRemovalError::InferenceTimeout` when the deadline passes
    /// - Any error raised by the backend
    pub fn run(&self, input: NormalizedTensor) -> Result<SaliencyMap> {
        let output = match self.timeout {
            None => lock_backend(&self.inner).infer(&input)?,
            Some(timeout) => self.run_with_deadline(input, timeout)?,
        };
        SaliencyMap::from_tensor(&output)
    }

    /// Queue for the model without a deadline, then bound the inference itself
    ///
    /// The deadline starts once the helper thread holds the lock, so waiting
    /// behind other requests never counts against it.
    fn run_with_deadline(&self, input: NormalizedTensor, timeout: Duration) -> Result<Array4<f32>> {
        let (sender, receiver) = mpsc::channel();
        let inner = Arc::clone(&self.inner);
        let name = self.name;

        thread::Builder::new()
            .name(format!("{}-inference", name))
            .spawn(move || {
                let mut backend = lock_backend(&inner);
                // A closed channel means the caller is gone; skip the work
                if sender.send(DeadlineEvent::Started).is_err() {
                    log::debug!("{} inference skipped, caller no longer waiting", name);
                    return;
                }
                let result = backend.infer(&input);
                let _ = sender.send(DeadlineEvent::Finished(result));
            })?;

        match receiver.recv() {
            Ok(DeadlineEvent::Started) => {},
            Ok(DeadlineEvent::Finished(result)) => return result,
            Err(mpsc::RecvError) => {
                return Err(BgRemovalError::internal(
                    "Inference worker exited before starting",
                ))
            },
        }

        let started = Instant::now();
        match receiver.recv_timeout(timeout) {
            Ok(DeadlineEvent::Finished(result)) => result,
            Ok(DeadlineEvent::Started) => Err(BgRemovalError::internal(
                "Inference worker reported a second start",
            )),
            Err(mpsc::RecvTimeoutError::Timeout) => {
                log::warn!(
                    "{} inference exceeded {}ms, abandoning request",
                    name,
                    started.elapsed().as_millis()
                );
                Err(BgRemovalError::InferenceTimeout(timeout.as_millis() as u64))
            },
            Err(mpsc::RecvTimeoutError::Disconnected) => Err(BgRemovalError::internal(
                "Inference worker exited without a result",
            )),
        }
    }
}

/// Messages from a deadline-bound inference worker
enum DeadlineEvent {
    /// The worker holds the model lock and is about to infer
    Started,
    Finished(Result<Array4<f32>>),
}

fn lock_backend(inner: &Mutex<BoxedBackend>) -> MutexGuard<'_, BoxedBackend> {
    inner.lock().unwrap_or_else(|poisoned: PoisonError<_>| {
        log::warn!("Inference lock poisoned by a panicked request, recovering");
        poisoned.into_inner()
    })
}
