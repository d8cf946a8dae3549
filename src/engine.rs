// Segmentation engine for the server.
// Owns the model-handle lifecycle: model download/cache at startup, the
// warm/cold session policy, and a dedicated worker thread that holds the
// model session and serializes inference requests.

use std::sync::{
    Arc,
    atomic::{AtomicUsize, Ordering},
};
use std::time::Instant;

use async_trait::async_trait;
use clap::ValueEnum;
use image::DynamicImage;
use imgly_bgremove::{
    BackendType, BackgroundRemovalProcessor, ExecutionProvider, ModelCache, ModelDownloader,
    ModelSource, ModelSpec, OutputFormat, ProcessorConfig, ProcessorConfigBuilder,
};
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tracing::{error, info};

// Upper bound on queued inference jobs before upload handlers start waiting
// on the channel send.
const JOB_QUEUE_DEPTH: usize = 32;

/// Errors produced by the segmentation engine
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("model is not available: {0}")]
    ModelUnavailable(String),
    #[error("failed to initialize segmentation session: {0}")]
    SessionInit(String),
    #[error("background removal failed: {0}")]
    Inference(String),
    #[error("segmentation worker is not running")]
    WorkerUnavailable,
}

/// Named model configuration, trading download size and inference cost
/// against segmentation quality.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ModelVariant {
    /// Full-precision ISNet general-purpose model.
    Standard,
    /// Half-precision ISNet weights: smaller download, faster inference.
    Lightweight,
}

impl ModelVariant {
    fn model_url(self) -> &'static str {
        "https://huggingface.co/imgly/isnet-general-onnx"
    }

    fn weight_variant(self) -> &'static str {
        match self {
            Self::Standard => "fp32",
            Self::Lightweight => "fp16",
        }
    }
}

/// When the model session is created.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum SessionPolicy {
    /// One session is initialized at startup and reused by every request.
    Warm,
    /// A session is created for each request and dropped afterwards.
    Cold,
}

/// Execution provider passed through to the model runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ExecutionProviderChoice {
    Auto,
    Cpu,
    Cuda,
    Coreml,
}

impl From<ExecutionProviderChoice> for ExecutionProvider {
    fn from(choice: ExecutionProviderChoice) -> Self {
        match choice {
            ExecutionProviderChoice::Auto => Self::Auto,
            ExecutionProviderChoice::Cpu => Self::Cpu,
            ExecutionProviderChoice::Cuda => Self::Cuda,
            ExecutionProviderChoice::Coreml => Self::CoreMl,
        }
    }
}

/// Engine configuration assembled from the command line.
#[derive(Debug, Clone, Copy)]
pub struct EngineConfig {
    pub variant: ModelVariant,
    pub policy: SessionPolicy,
    pub execution_provider: ExecutionProviderChoice,
}

/// The seam between the HTTP layer and the segmentation model. Handlers see
/// only this trait; the engine behind it is injected as router state.
#[async_trait]
pub trait BackgroundRemover: Send + Sync {
    /// Returns the input image with background pixels made transparent.
    async fn remove_background(&self, image: DynamicImage) -> Result<DynamicImage, EngineError>;
}

struct Job {
    image: DynamicImage,
    reply: oneshot::Sender<Result<DynamicImage, EngineError>>,
}

// A single initialized model session. The worker loop is generic over this
// so the policy bookkeeping can be tested without model weights on disk.
trait Session {
    fn remove_background(&mut self, image: &DynamicImage) -> Result<DynamicImage, EngineError>;
}

struct ModelSession {
    processor: BackgroundRemovalProcessor,
}

impl ModelSession {
    fn create(
        config: &ProcessorConfig,
        initializations: &AtomicUsize,
    ) -> Result<Self, EngineError> {
        let started = Instant::now();
        let mut processor = BackgroundRemovalProcessor::new(config.clone())
            .map_err(|e| EngineError::SessionInit(e.to_string()))?;
        processor
            .initialize()
            .map_err(|e| EngineError::SessionInit(e.to_string()))?;
        initializations.fetch_add(1, Ordering::Relaxed);
        info!(
            "Segmentation session initialized in {:.2}s",
            started.elapsed().as_secs_f64()
        );
        Ok(Self { processor })
    }
}

impl Session for ModelSession {
    fn remove_background(&mut self, image: &DynamicImage) -> Result<DynamicImage, EngineError> {
        let result = self
            .processor
            .process_image(image)
            .map_err(|e| EngineError::Inference(e.to_string()))?;
        Ok(result.image)
    }
}

/// Background removal engine backed by the bundled segmentation model.
///
/// The model session is not `Send`, so it lives on one dedicated worker
/// thread; requests reach it through a bounded job channel and receive their
/// result on a per-request oneshot. This also serializes inference, which
/// the model library does not document as safe to run concurrently against
/// a single session.
pub struct RemovalEngine {
    jobs: mpsc::Sender<Job>,
    initializations: Arc<AtomicUsize>,
}

impl RemovalEngine {
    /// Ensures the configured model is cached locally (downloading it once
    /// if absent), spawns the inference worker and, under the warm policy,
    /// waits for the session to initialize. Any failure here is a startup
    /// failure: the caller must not begin serving requests.
    pub async fn new(config: EngineConfig) -> Result<Self, EngineError> {
        let model_id = ensure_model_cached(config.variant).await?;

        let model_spec = ModelSpec {
            source: ModelSource::Downloaded(model_id),
            variant: Some(config.variant.weight_variant().to_string()),
        };
        let processor_config = ProcessorConfigBuilder::new()
            .model_spec(model_spec)
            .backend_type(BackendType::Onnx)
            .execution_provider(config.execution_provider.into())
            .output_format(OutputFormat::Png)
            .preserve_color_profiles(false)
            .build()
            .map_err(|e| EngineError::SessionInit(e.to_string()))?;

        let initializations = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&initializations);

        let (jobs_tx, jobs_rx) = mpsc::channel(JOB_QUEUE_DEPTH);
        let (ready_tx, ready_rx) = oneshot::channel();

        std::thread::Builder::new()
            .name("segmentation".to_string())
            .spawn(move || {
                run_worker(
                    config.policy,
                    move || ModelSession::create(&processor_config, &counter),
                    jobs_rx,
                    ready_tx,
                );
            })
            .map_err(|e| EngineError::SessionInit(format!("failed to spawn worker thread: {e}")))?;

        ready_rx.await.map_err(|_| EngineError::WorkerUnavailable)??;

        Ok(Self {
            jobs: jobs_tx,
            initializations,
        })
    }

    /// Number of model sessions created since startup. The warm policy keeps
    /// this at one for the life of the process.
    pub fn initializations(&self) -> usize {
        self.initializations.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl BackgroundRemover for RemovalEngine {
    async fn remove_background(&self, image: DynamicImage) -> Result<DynamicImage, EngineError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.jobs
            .send(Job {
                image,
                reply: reply_tx,
            })
            .await
            .map_err(|_| EngineError::WorkerUnavailable)?;
        reply_rx.await.map_err(|_| EngineError::WorkerUnavailable)?
    }
}

// Check the local model cache and download the model on first run. Runs
// before the worker spawns so a missing or failed download aborts startup.
async fn ensure_model_cached(variant: ModelVariant) -> Result<String, EngineError> {
    let cache = ModelCache::new().map_err(|e| EngineError::ModelUnavailable(e.to_string()))?;
    let model_id = ModelCache::url_to_model_id(variant.model_url());

    if !cache.is_model_cached(&model_id) {
        info!(
            "Model {} not cached, downloading from {}",
            model_id,
            variant.model_url()
        );
        let downloader =
            ModelDownloader::new().map_err(|e| EngineError::ModelUnavailable(e.to_string()))?;
        let downloaded_id = downloader
            .download_model(variant.model_url(), false)
            .await
            .map_err(|e| EngineError::ModelUnavailable(e.to_string()))?;

        if downloaded_id != model_id {
            return Err(EngineError::ModelUnavailable(format!(
                "downloaded model id '{downloaded_id}' does not match expected '{model_id}'"
            )));
        }
    }

    Ok(model_id)
}

// The worker loop. Warm policy creates the session before signalling ready,
// so startup fails fast on a broken model; cold policy creates and drops a
// session per job. Exits when every sender is gone.
fn run_worker<S, F>(
    policy: SessionPolicy,
    mut create_session: F,
    mut jobs: mpsc::Receiver<Job>,
    ready: oneshot::Sender<Result<(), EngineError>>,
) where
    S: Session,
    F: FnMut() -> Result<S, EngineError>,
{
    let mut resident = None;
    if policy == SessionPolicy::Warm {
        match create_session() {
            Ok(session) => resident = Some(session),
            Err(err) => {
                let _ = ready.send(Err(err));
                return;
            }
        }
    }
    if ready.send(Ok(())).is_err() {
        return;
    }

    while let Some(Job { image, reply }) = jobs.blocking_recv() {
        let outcome = match resident.as_mut() {
            Some(session) => session.remove_background(&image),
            None => create_session().and_then(|mut session| session.remove_background(&image)),
        };
        if let Err(err) = &outcome {
            error!("Background removal failed: {err}");
        }
        let _ = reply.send(outcome);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct StubSession {
        fail: bool,
    }

    impl Session for StubSession {
        fn remove_background(
            &mut self,
            image: &DynamicImage,
        ) -> Result<DynamicImage, EngineError> {
            if self.fail {
                return Err(EngineError::Inference("stub model fault".to_string()));
            }
            Ok(image.clone())
        }
    }

    struct WorkerHarness {
        jobs: mpsc::Sender<Job>,
        ready: oneshot::Receiver<Result<(), EngineError>>,
        created: Arc<AtomicUsize>,
    }

    fn spawn_worker(policy: SessionPolicy, create_fails: bool, session_fails: bool) -> WorkerHarness {
        let created = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&created);
        let (jobs_tx, jobs_rx) = mpsc::channel(4);
        let (ready_tx, ready_rx) = oneshot::channel();

        std::thread::spawn(move || {
            run_worker(
                policy,
                move || {
                    if create_fails {
                        return Err(EngineError::SessionInit("stub refused".to_string()));
                    }
                    counter.fetch_add(1, Ordering::Relaxed);
                    Ok(StubSession {
                        fail: session_fails,
                    })
                },
                jobs_rx,
                ready_tx,
            );
        });

        WorkerHarness {
            jobs: jobs_tx,
            ready: ready_rx,
            created,
        }
    }

    async fn submit(jobs: &mpsc::Sender<Job>) -> Result<DynamicImage, EngineError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        jobs.send(Job {
            image: DynamicImage::new_rgba8(2, 2),
            reply: reply_tx,
        })
        .await
        .expect("worker accepts jobs");
        reply_rx.await.expect("worker replies")
    }

    #[tokio::test]
    async fn warm_policy_creates_one_session_for_many_jobs() {
        let harness = spawn_worker(SessionPolicy::Warm, false, false);
        harness.ready.await.expect("ready signal").expect("warm init");

        for _ in 0..3 {
            submit(&harness.jobs).await.expect("job succeeds");
        }

        assert_eq!(harness.created.load(Ordering::Relaxed), 1);
    }

    #[tokio::test]
    async fn cold_policy_creates_a_session_per_job() {
        let harness = spawn_worker(SessionPolicy::Cold, false, false);
        harness.ready.await.expect("ready signal").expect("cold start");

        for _ in 0..3 {
            submit(&harness.jobs).await.expect("job succeeds");
        }

        assert_eq!(harness.created.load(Ordering::Relaxed), 3);
    }

    #[tokio::test]
    async fn warm_init_failure_is_reported_before_any_job() {
        let harness = spawn_worker(SessionPolicy::Warm, true, false);

        let startup = harness.ready.await.expect("ready signal");
        assert!(matches!(startup, Err(EngineError::SessionInit(_))));
        assert_eq!(harness.created.load(Ordering::Relaxed), 0);
    }

    #[tokio::test]
    async fn session_failure_is_returned_to_the_caller() {
        let harness = spawn_worker(SessionPolicy::Warm, false, true);
        harness.ready.await.expect("ready signal").expect("warm init");

        let outcome = submit(&harness.jobs).await;
        assert!(matches!(outcome, Err(EngineError::Inference(_))));

        // The worker survives a failed job.
        assert!(submit(&harness.jobs).await.is_err());
        assert_eq!(harness.created.load(Ordering::Relaxed), 1);
    }
}
