//! Batch processing
//!
//! Drives a list of items through resolve -> validate -> generate -> save,
//! either one at a time or with up to `parallel` items in flight. Results come
//! back in input order no matter which item finishes first. A failing item
//! only fails itself unless `stop_on_error` is set, in which case no further
//! items are dispatched. Cancelling the token stops dispatching and is
//! reported as the run's error.

use crate::filename::{generate_filename, truncate};
use crate::models::ModelRegistry;
use crate::provider::{ImageProvider, ImageRequest};
use crate::saver::ImageSaver;
use pixforge_core::{ContentHash, ImageFormat, PixforgeError, Result};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Width of prompts echoed in summaries and progress lines
const PROMPT_PREVIEW_LEN: usize = 40;

/// One unit of requested work: a prompt plus optional per-item overrides
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Item {
    /// 1-based position in the manifest, unique within a run
    pub index: u32,
    pub prompt: String,
    pub model: Option<String>,
    pub size: Option<String>,
    pub quality: Option<String>,
    pub style: Option<String>,
}

impl Item {
    /// Item with no overrides
    pub fn new(index: u32, prompt: impl Into<String>) -> Self {
        Self {
            index,
            prompt: prompt.into(),
            model: None,
            size: None,
            quality: None,
            style: None,
        }
    }
}

/// Run-wide settings, fixed for the duration of a run
#[derive(Debug, Clone)]
pub struct BatchOptions {
    pub output_dir: PathBuf,
    /// Model used by items that do not name one
    pub default_model: String,
    pub format: ImageFormat,
    /// Maximum items in flight; 0 and 1 both mean sequential
    pub parallel: usize,
    pub stop_on_error: bool,
    /// Pause between successive dispatches
    pub delay_ms: u64,
    pub transparent: bool,
    /// Images requested per item; only the first one is saved
    pub count: u32,
}

impl Default for BatchOptions {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from("images"),
            default_model: "gpt-image-1".to_string(),
            format: ImageFormat::Png,
            parallel: 1,
            stop_on_error: false,
            delay_ms: 0,
            transparent: false,
            count: 1,
        }
    }
}

/// A successfully generated and saved image
#[derive(Debug, Clone)]
pub struct SavedImage {
    pub path: PathBuf,
    /// USD, 0.0 when the provider reported no cost
    pub cost: f64,
    pub content_hash: ContentHash,
    /// Model that produced the image, after defaults were applied
    pub model: String,
    pub revised_prompt: Option<String>,
}

/// Outcome of one item
#[derive(Debug)]
pub struct ItemResult {
    pub index: u32,
    pub prompt: String,
    pub outcome: Result<SavedImage>,
}

impl ItemResult {
    /// True when the image was generated and saved
    pub fn is_success(&self) -> bool {
        self.outcome.is_ok()
    }

    /// Where the image was written, if it was
    pub fn path(&self) -> Option<&Path> {
        self.outcome.as_ref().ok().map(|saved| saved.path.as_path())
    }

    /// Cost of this item in USD; failures cost nothing
    pub fn cost(&self) -> f64 {
        self.outcome.as_ref().map(|saved| saved.cost).unwrap_or(0.0)
    }

    /// The item's error, if it failed
    pub fn error(&self) -> Option<&PixforgeError> {
        self.outcome.as_ref().err()
    }
}

/// Everything a run produced
#[derive(Debug)]
pub struct BatchOutcome {
    /// One entry per dispatched item, in input order
    pub results: Vec<ItemResult>,
    /// `RunAborted` or `RunCancelled`; `None` when the run went to completion
    pub error: Option<PixforgeError>,
}

impl BatchOutcome {
    /// Number of items that saved an image
    pub fn successful(&self) -> usize {
        self.results.iter().filter(|r| r.is_success()).count()
    }

    /// Number of dispatched items that failed
    pub fn failed(&self) -> usize {
        self.results.len() - self.successful()
    }

    /// Sum of item costs in USD
    pub fn total_cost(&self) -> f64 {
        self.results.iter().map(ItemResult::cost).sum()
    }

    /// Same as [`summarize`] over this run's results
    pub fn summary(&self) -> String {
        summarize(&self.results)
    }
}

/// Human-readable summary of a run's results
pub fn summarize(results: &[ItemResult]) -> String {
    let total = results.len();
    let failures: Vec<&ItemResult> = results.iter().filter(|r| !r.is_success()).collect();
    let cost: f64 = results.iter().map(ItemResult::cost).sum();

    let mut lines = vec![format!("Successful: {}/{}", total - failures.len(), total)];
    if !failures.is_empty() {
        lines.push(format!("Failed: {}", failures.len()));
        for result in failures {
            if let Some(err) = result.error() {
                lines.push(format!(
                    "  #{:03} \"{}\": {}",
                    result.index,
                    truncate(&result.prompt, PROMPT_PREVIEW_LEN),
                    err
                ));
            }
        }
    }
    if cost > 0.0 {
        lines.push(format!("Total cost: ${:.3}", cost));
    }
    lines.join("\n")
}

type ProgressWriter = Arc<Mutex<Box<dyn Write + Send>>>;

/// State shared by the dispatch loop and every item task
struct Shared {
    provider: Arc<dyn ImageProvider>,
    registry: Arc<ModelRegistry>,
    saver: Arc<dyn ImageSaver>,
    options: BatchOptions,
    progress: Option<ProgressWriter>,
    /// Index of the item that triggered stop-on-error, 0 while not aborted
    aborted_by: AtomicU32,
    completed: AtomicUsize,
    total: usize,
}

impl Shared {
    fn is_aborted(&self) -> bool {
        self.aborted_by.load(Ordering::SeqCst) != 0
    }

    /// Only the first failing item is recorded
    fn abort(&self, index: u32) {
        let _ = self
            .aborted_by
            .compare_exchange(0, index.max(1), Ordering::SeqCst, Ordering::SeqCst);
    }

    fn finish(&self, result: &ItemResult) {
        let done = self.completed.fetch_add(1, Ordering::SeqCst) + 1;

        match &result.outcome {
            Ok(saved) => tracing::info!(
                index = result.index,
                path = %saved.path.display(),
                cost = saved.cost,
                "item saved"
            ),
            Err(err) => tracing::warn!(index = result.index, error = %err, "item failed"),
        }

        if let Err(err) = &result.outcome {
            if self.options.stop_on_error && !matches!(err, PixforgeError::RunCancelled) {
                self.abort(result.index);
            }
        }

        let Some(progress) = &self.progress else {
            return;
        };
        let line = match &result.outcome {
            Ok(saved) => format!(
                "[{}/{}] #{:03} saved {} (${:.3})",
                done,
                self.total,
                result.index,
                saved.path.display(),
                saved.cost
            ),
            Err(err) => format!(
                "[{}/{}] #{:03} failed \"{}\": {}",
                done,
                self.total,
                result.index,
                truncate(&result.prompt, PROMPT_PREVIEW_LEN),
                err
            ),
        };
        if let Ok(mut out) = progress.lock() {
            writeln!(out, "{}", line).ok();
            out.flush().ok();
        }
    }
}

/// Runs batches of items against a provider
pub struct Processor {
    provider: Arc<dyn ImageProvider>,
    registry: Arc<ModelRegistry>,
    saver: Arc<dyn ImageSaver>,
    options: BatchOptions,
    progress: Option<ProgressWriter>,
}

impl Processor {
    /// Processor using the built-in model registry and no progress output
    pub fn new(
        provider: Arc<dyn ImageProvider>,
        saver: Arc<dyn ImageSaver>,
        options: BatchOptions,
    ) -> Self {
        Self {
            provider,
            registry: Arc::new(ModelRegistry::builtin()),
            saver,
            options,
            progress: None,
        }
    }

    /// Replace the model registry
    pub fn with_registry(mut self, registry: ModelRegistry) -> Self {
        self.registry = Arc::new(registry);
        self
    }

    /// Write one line per finished item to `writer`
    pub fn with_progress<W: Write + Send + 'static>(mut self, writer: W) -> Self {
        self.progress = Some(Arc::new(Mutex::new(Box::new(writer))));
        self
    }

    /// Options every run of this processor uses
    pub fn options(&self) -> &BatchOptions {
        &self.options
    }

    /// Process `items` in order, returning one result per dispatched item.
    ///
    /// Dispatch stops early when `cancel` fires or, with `stop_on_error`,
    /// after the first failure; items already running are allowed to finish.
    pub async fn process(&self, items: &[Item], cancel: &CancellationToken) -> BatchOutcome {
        let parallel = self.options.parallel.max(1);
        let delay = Duration::from_millis(self.options.delay_ms);
        let shared = Arc::new(Shared {
            provider: Arc::clone(&self.provider),
            registry: Arc::clone(&self.registry),
            saver: Arc::clone(&self.saver),
            options: self.options.clone(),
            progress: self.progress.clone(),
            aborted_by: AtomicU32::new(0),
            completed: AtomicUsize::new(0),
            total: items.len(),
        });
        // One permit per in-flight item; with a single permit each dispatch
        // waits for the previous item to finish.
        let semaphore = Arc::new(Semaphore::new(parallel));

        tracing::info!(
            items = items.len(),
            parallel,
            stop_on_error = self.options.stop_on_error,
            delay_ms = self.options.delay_ms,
            "starting batch"
        );

        let mut handles: Vec<(&Item, JoinHandle<ItemResult>)> = Vec::with_capacity(items.len());
        for (position, item) in items.iter().enumerate() {
            if cancel.is_cancelled() || shared.is_aborted() {
                break;
            }

            let permit = tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                permit = Arc::clone(&semaphore).acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break,
                },
            };

            if position > 0 && !delay.is_zero() {
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep(delay) => {}
                }
            }

            // An in-flight item may have failed while we waited
            if cancel.is_cancelled() || shared.is_aborted() {
                break;
            }

            tracing::debug!(index = item.index, "dispatching item");
            let task_shared = Arc::clone(&shared);
            let task_item = item.clone();
            let task_cancel = cancel.clone();
            let handle = tokio::spawn(async move {
                let _permit = permit;
                let pipeline = {
                    let shared = Arc::clone(&task_shared);
                    let item = task_item.clone();
                    tokio::spawn(async move { run_item(&shared, &item, &task_cancel).await })
                };
                // A panic is recorded before the permit is released so that
                // stop-on-error sees it ahead of the next dispatch.
                let outcome = pipeline.await.unwrap_or_else(|join_err| {
                    Err(PixforgeError::GenerationFailed(format!(
                        "item task failed: {}",
                        join_err
                    )))
                });
                let result = ItemResult {
                    index: task_item.index,
                    prompt: task_item.prompt,
                    outcome,
                };
                task_shared.finish(&result);
                result
            });
            handles.push((item, handle));
        }

        let dispatched = handles.len();
        let mut results = Vec::with_capacity(dispatched);
        for (item, handle) in handles {
            let result = match handle.await {
                Ok(result) => result,
                Err(join_err) => {
                    let result = ItemResult {
                        index: item.index,
                        prompt: item.prompt.clone(),
                        outcome: Err(PixforgeError::GenerationFailed(format!(
                            "item task failed: {}",
                            join_err
                        ))),
                    };
                    shared.finish(&result);
                    result
                }
            };
            results.push(result);
        }

        let error = if cancel.is_cancelled() {
            Some(PixforgeError::RunCancelled)
        } else {
            match shared.aborted_by.load(Ordering::SeqCst) {
                0 => None,
                index => Some(PixforgeError::RunAborted { index }),
            }
        };

        tracing::info!(
            dispatched,
            skipped = items.len() - dispatched,
            error = ?error,
            "batch finished"
        );

        BatchOutcome { results, error }
    }
}

/// The per-item pipeline: resolve the model, validate, generate, save
async fn run_item(shared: &Shared, item: &Item, cancel: &CancellationToken) -> Result<SavedImage> {
    let options = &shared.options;
    let mut request = ImageRequest {
        model: item
            .model
            .clone()
            .unwrap_or_else(|| options.default_model.clone()),
        prompt: item.prompt.clone(),
        size: item.size.clone(),
        quality: item.quality.clone(),
        style: item.style.clone(),
        format: options.format,
        transparent: options.transparent,
        count: options.count,
    };
    shared.registry.prepare(&mut request)?;

    let response = shared
        .provider
        .generate(&request, cancel)
        .await
        .map_err(|err| match err {
            PixforgeError::RunCancelled | PixforgeError::GenerationFailed(_) => err,
            other => PixforgeError::GenerationFailed(other.to_string()),
        })?;

    let returned = response.images.len();
    let image = response.images.into_iter().next().ok_or_else(|| {
        PixforgeError::GenerationFailed(format!(
            "{} returned no images",
            shared.provider.name()
        ))
    })?;
    if returned > 1 {
        tracing::debug!(index = item.index, returned, "keeping only the first image");
    }

    let path = options
        .output_dir
        .join(generate_filename(item.index, &item.prompt, options.format));
    shared
        .saver
        .save(&image.bytes, &path)
        .await
        .map_err(|err| match err {
            PixforgeError::PersistFailed(_) => err,
            other => PixforgeError::PersistFailed(other.to_string()),
        })?;

    Ok(SavedImage {
        path,
        cost: response.cost.unwrap_or(0.0),
        content_hash: ContentHash::of(&image.bytes),
        model: request.model,
        revised_prompt: image.revised_prompt,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::{GeneratedImage, ImageResponse, ProviderStatus};
    use async_trait::async_trait;
    use std::time::Instant;

    /// Provider whose behaviour is driven by the prompt text:
    /// "fail" -> error, "panic" -> panic, "slow" -> extra latency
    #[derive(Default)]
    struct ScriptedProvider {
        latency: Duration,
        cost: Option<f64>,
        fail_all: bool,
        in_flight: AtomicUsize,
        peak: AtomicUsize,
        calls: AtomicUsize,
        completion_order: Mutex<Vec<String>>,
    }

    impl ScriptedProvider {
        fn with_latency(latency_ms: u64) -> Self {
            Self {
                latency: Duration::from_millis(latency_ms),
                ..Default::default()
            }
        }
    }

    #[async_trait]
    impl ImageProvider for ScriptedProvider {
        fn name(&self) -> &str {
            "scripted"
        }

        fn health_check(&self) -> Result<ProviderStatus> {
            Ok(ProviderStatus::Available)
        }

        async fn generate(
            &self,
            request: &ImageRequest,
            cancel: &CancellationToken,
        ) -> Result<ImageResponse> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);

            let mut latency = self.latency;
            if request.prompt.contains("slow") {
                latency += Duration::from_millis(60);
            }
            let cancelled = tokio::select! {
                _ = cancel.cancelled() => true,
                _ = tokio::time::sleep(latency) => false,
            };
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            self.completion_order
                .lock()
                .unwrap()
                .push(request.prompt.clone());

            if cancelled {
                return Err(PixforgeError::RunCancelled);
            }
            if request.prompt.contains("panic") {
                panic!("scripted provider panic");
            }
            if self.fail_all || request.prompt.contains("fail") {
                return Err(PixforgeError::GenerationFailed("HTTP 500".to_string()));
            }

            let images = (0..request.count)
                .map(|n| GeneratedImage {
                    bytes: format!("{}#{}", request.prompt, n).into_bytes(),
                    revised_prompt: None,
                })
                .collect();
            Ok(ImageResponse {
                images,
                cost: self.cost,
            })
        }
    }

    /// In-memory saver that can be told to fail
    #[derive(Default)]
    struct MemorySaver {
        fail: bool,
        saved: Mutex<Vec<(PathBuf, Vec<u8>)>>,
    }

    #[async_trait]
    impl ImageSaver for MemorySaver {
        async fn save(&self, bytes: &[u8], path: &Path) -> Result<()> {
            if self.fail {
                return Err(PixforgeError::Io(std::io::Error::new(
                    std::io::ErrorKind::PermissionDenied,
                    "read-only filesystem",
                )));
            }
            self.saved
                .lock()
                .unwrap()
                .push((path.to_path_buf(), bytes.to_vec()));
            Ok(())
        }
    }

    /// Cloneable progress sink
    #[derive(Clone, Default)]
    struct SharedBuf(Arc<Mutex<Vec<u8>>>);

    impl Write for SharedBuf {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    fn items(prompts: &[&str]) -> Vec<Item> {
        prompts
            .iter()
            .zip(1u32..)
            .map(|(prompt, index)| Item::new(index, *prompt))
            .collect()
    }

    fn options(parallel: usize) -> BatchOptions {
        BatchOptions {
            output_dir: PathBuf::from("out"),
            default_model: "dall-e-2".to_string(),
            parallel,
            ..Default::default()
        }
    }

    fn processor(
        provider: Arc<ScriptedProvider>,
        saver: Arc<MemorySaver>,
        options: BatchOptions,
    ) -> Processor {
        Processor::new(provider, saver, options)
    }

    #[tokio::test]
    async fn test_sequential_success() {
        let provider = Arc::new(ScriptedProvider::default());
        let saver = Arc::new(MemorySaver::default());
        let proc = processor(provider, Arc::clone(&saver), options(1));

        let outcome = proc
            .process(&items(&["sunset mountains", "cat playing"]), &CancellationToken::new())
            .await;

        assert!(outcome.error.is_none());
        assert_eq!(outcome.results.len(), 2);
        for result in &outcome.results {
            assert!(result.error().is_none());
            assert!(result.path().is_some());
        }
        assert_eq!(
            outcome.results[0].path(),
            Some(Path::new("out/001-sunset-mountains.png"))
        );
        assert_eq!(saver.saved.lock().unwrap().len(), 2);
        assert!(outcome.summary().contains("Successful: 2/2"));
        assert!(!outcome.summary().contains("Failed"));
    }

    #[tokio::test]
    async fn test_item_failure_does_not_fail_run() {
        let provider = Arc::new(ScriptedProvider::default());
        let proc = processor(provider, Arc::new(MemorySaver::default()), options(1));

        let outcome = proc
            .process(&items(&["fail this one", "fine"]), &CancellationToken::new())
            .await;

        assert!(outcome.error.is_none());
        assert_eq!(outcome.results.len(), 2);
        assert_eq!(outcome.failed(), 1);
        assert!(matches!(
            outcome.results[0].error(),
            Some(PixforgeError::GenerationFailed(_))
        ));
        assert_eq!(outcome.results[0].path(), None);
        assert!(outcome.results[1].is_success());

        let summary = outcome.summary();
        assert!(summary.contains("Successful: 1/2"));
        assert!(summary.contains("Failed: 1"));
        assert!(summary.contains("#001 \"fail this one\""));
    }

    #[tokio::test]
    async fn test_stop_on_error_sequential() {
        let provider = Arc::new(ScriptedProvider {
            fail_all: true,
            ..Default::default()
        });
        let mut opts = options(1);
        opts.stop_on_error = true;
        let proc = processor(Arc::clone(&provider), Arc::new(MemorySaver::default()), opts);

        let outcome = proc
            .process(&items(&["first", "second"]), &CancellationToken::new())
            .await;

        assert!(matches!(
            outcome.error,
            Some(PixforgeError::RunAborted { index: 1 })
        ));
        assert_eq!(outcome.results.len(), 1);
        assert_eq!(provider.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_stop_on_error_lets_in_flight_items_finish() {
        let provider = Arc::new(ScriptedProvider {
            latency: Duration::from_millis(20),
            fail_all: true,
            ..Default::default()
        });
        let mut opts = options(2);
        opts.stop_on_error = true;
        let proc = processor(Arc::clone(&provider), Arc::new(MemorySaver::default()), opts);

        let outcome = proc
            .process(&items(&["a", "b", "c", "d", "e", "f"]), &CancellationToken::new())
            .await;

        assert!(matches!(outcome.error, Some(PixforgeError::RunAborted { .. })));
        // The first two were already running when the first failure landed
        assert_eq!(outcome.results.len(), 2);
        assert_eq!(outcome.results[0].index, 1);
        assert_eq!(outcome.results[1].index, 2);
        assert!(outcome.results.iter().all(|r| r.error().is_some()));
    }

    #[tokio::test]
    async fn test_cancelled_before_start() {
        let provider = Arc::new(ScriptedProvider::default());
        let proc = processor(Arc::clone(&provider), Arc::new(MemorySaver::default()), options(4));
        let cancel = CancellationToken::new();
        cancel.cancel();

        let outcome = proc.process(&items(&["a", "b", "c"]), &cancel).await;

        assert!(matches!(outcome.error, Some(PixforgeError::RunCancelled)));
        assert!(outcome.results.is_empty());
        assert_eq!(provider.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_cancelled_mid_run() {
        let provider = Arc::new(ScriptedProvider::with_latency(40));
        let proc = processor(Arc::clone(&provider), Arc::new(MemorySaver::default()), options(1));
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(60)).await;
            trigger.cancel();
        });

        let outcome = proc
            .process(&items(&["a", "b", "c", "d", "e"]), &cancel)
            .await;

        assert!(matches!(outcome.error, Some(PixforgeError::RunCancelled)));
        assert!(outcome.results.len() < 5);
        assert!(!outcome.results.is_empty());
        // The item running at cancellation time observed the token
        let last = outcome.results.last().unwrap();
        assert!(matches!(last.error(), Some(PixforgeError::RunCancelled)));
    }

    #[tokio::test]
    async fn test_more_workers_than_items() {
        let provider = Arc::new(ScriptedProvider::default());
        let proc = processor(provider, Arc::new(MemorySaver::default()), options(10));

        let outcome = proc
            .process(&items(&["only one"]), &CancellationToken::new())
            .await;

        assert!(outcome.error.is_none());
        assert_eq!(outcome.results.len(), 1);
        assert!(outcome.results[0].is_success());
    }

    #[tokio::test]
    async fn test_empty_batch() {
        let provider = Arc::new(ScriptedProvider::default());
        let proc = processor(provider, Arc::new(MemorySaver::default()), options(3));

        let outcome = proc.process(&[], &CancellationToken::new()).await;
        assert!(outcome.error.is_none());
        assert!(outcome.results.is_empty());
        assert_eq!(outcome.summary(), "Successful: 0/0");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_parallel_results_keep_input_order() {
        let provider = Arc::new(ScriptedProvider::with_latency(10));
        let proc = processor(Arc::clone(&provider), Arc::new(MemorySaver::default()), options(4));
        let batch = items(&["slow first", "second", "third", "fourth"]);

        let outcome = proc.process(&batch, &CancellationToken::new()).await;

        assert!(outcome.error.is_none());
        let indices: Vec<u32> = outcome.results.iter().map(|r| r.index).collect();
        assert_eq!(indices, vec![1, 2, 3, 4]);
        for (result, item) in outcome.results.iter().zip(&batch) {
            assert_eq!(result.index, item.index);
            assert_eq!(result.prompt, item.prompt);
        }
        // The slow item finished last even though it was dispatched first
        let order = provider.completion_order.lock().unwrap();
        assert_eq!(order.last().map(String::as_str), Some("slow first"));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_parallel_limit_is_respected() {
        let provider = Arc::new(ScriptedProvider::with_latency(15));
        let proc = processor(Arc::clone(&provider), Arc::new(MemorySaver::default()), options(3));
        let prompts: Vec<String> = (0..10).map(|i| format!("prompt {}", i)).collect();
        let prompt_refs: Vec<&str> = prompts.iter().map(String::as_str).collect();

        let outcome = proc
            .process(&items(&prompt_refs), &CancellationToken::new())
            .await;

        assert_eq!(outcome.results.len(), 10);
        assert_eq!(outcome.successful(), 10);
        let peak = provider.peak.load(Ordering::SeqCst);
        assert!(peak <= 3, "peak concurrency was {}", peak);
        assert!(peak > 1, "items never overlapped");
    }

    #[tokio::test]
    async fn test_sequential_never_overlaps() {
        let provider = Arc::new(ScriptedProvider::with_latency(5));
        let proc = processor(Arc::clone(&provider), Arc::new(MemorySaver::default()), options(0));

        let outcome = proc
            .process(&items(&["a", "b", "c"]), &CancellationToken::new())
            .await;

        assert_eq!(outcome.successful(), 3);
        assert_eq!(provider.peak.load(Ordering::SeqCst), 1);
        let order = provider.completion_order.lock().unwrap();
        assert_eq!(*order, vec!["a", "b", "c"]);
    }

    #[tokio::test]
    async fn test_delay_between_dispatches() {
        let provider = Arc::new(ScriptedProvider::default());
        let mut opts = options(1);
        opts.delay_ms = 30;
        let proc = processor(provider, Arc::new(MemorySaver::default()), opts);

        let start = Instant::now();
        let outcome = proc
            .process(&items(&["a", "b", "c"]), &CancellationToken::new())
            .await;

        assert_eq!(outcome.successful(), 3);
        assert!(start.elapsed() >= Duration::from_millis(60));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_delay_applies_in_parallel_mode() {
        let provider = Arc::new(ScriptedProvider::default());
        let mut opts = options(4);
        opts.delay_ms = 30;
        let proc = processor(provider, Arc::new(MemorySaver::default()), opts);

        let start = Instant::now();
        let outcome = proc
            .process(&items(&["a", "b", "c"]), &CancellationToken::new())
            .await;

        assert_eq!(outcome.successful(), 3);
        assert!(start.elapsed() >= Duration::from_millis(60));
    }

    #[tokio::test]
    async fn test_cancel_cuts_delay_short() {
        let provider = Arc::new(ScriptedProvider::default());
        let mut opts = options(2);
        opts.delay_ms = 10_000;
        let proc = processor(Arc::clone(&provider), Arc::new(MemorySaver::default()), opts);
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            trigger.cancel();
        });

        let start = Instant::now();
        let outcome = tokio::time::timeout(
            Duration::from_secs(2),
            proc.process(&items(&["a", "b", "c"]), &cancel),
        )
        .await
        .expect("process should return soon after cancellation");

        assert!(start.elapsed() < Duration::from_secs(2));
        assert!(matches!(outcome.error, Some(PixforgeError::RunCancelled)));
        assert_eq!(outcome.results.len(), 1);
        assert!(outcome.results[0].is_success());
        assert_eq!(provider.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_unknown_model_is_item_local() {
        let provider = Arc::new(ScriptedProvider::default());
        let proc = processor(Arc::clone(&provider), Arc::new(MemorySaver::default()), options(1));
        let mut batch = items(&["fox", "owl"]);
        batch[0].model = Some("imagen-9".to_string());

        let outcome = proc.process(&batch, &CancellationToken::new()).await;

        assert!(outcome.error.is_none());
        assert!(matches!(
            outcome.results[0].error(),
            Some(PixforgeError::ModelUnknown(m)) if m == "imagen-9"
        ));
        assert!(outcome.results[1].is_success());
        assert_eq!(provider.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_validation_failure_is_item_local() {
        let provider = Arc::new(ScriptedProvider::default());
        let proc = processor(Arc::clone(&provider), Arc::new(MemorySaver::default()), options(2));
        let mut batch = items(&["fox", "owl"]);
        batch[1].size = Some("4096x4096".to_string());

        let outcome = proc.process(&batch, &CancellationToken::new()).await;

        assert!(outcome.error.is_none());
        assert!(outcome.results[0].is_success());
        assert!(matches!(
            outcome.results[1].error(),
            Some(PixforgeError::ValidationFailed(_))
        ));
        assert_eq!(provider.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_item_overrides_reach_request() {
        let provider = Arc::new(ScriptedProvider::default());
        let proc = processor(provider, Arc::new(MemorySaver::default()), options(1));
        let mut batch = items(&["harbour"]);
        batch[0].model = Some("dall-e-3".to_string());
        batch[0].style = Some("natural".to_string());

        let outcome = proc.process(&batch, &CancellationToken::new()).await;
        let saved = outcome.results[0].outcome.as_ref().unwrap();
        assert_eq!(saved.model, "dall-e-3");
    }

    #[tokio::test]
    async fn test_persist_failure() {
        let provider = Arc::new(ScriptedProvider::default());
        let saver = Arc::new(MemorySaver {
            fail: true,
            ..Default::default()
        });
        let proc = processor(provider, saver, options(1));

        let outcome = proc.process(&items(&["fox"]), &CancellationToken::new()).await;

        assert!(outcome.error.is_none());
        let err = outcome.results[0].error().unwrap();
        assert!(matches!(err, PixforgeError::PersistFailed(_)));
        assert!(err.to_string().contains("read-only filesystem"));
    }

    #[tokio::test]
    async fn test_panicking_item_becomes_failure() {
        let provider = Arc::new(ScriptedProvider::default());
        let proc = processor(provider, Arc::new(MemorySaver::default()), options(2));

        let outcome = proc
            .process(&items(&["panic now", "calm"]), &CancellationToken::new())
            .await;

        assert!(outcome.error.is_none());
        assert_eq!(outcome.results.len(), 2);
        assert!(matches!(
            outcome.results[0].error(),
            Some(PixforgeError::GenerationFailed(_))
        ));
        assert!(outcome.results[1].is_success());
    }

    #[tokio::test]
    async fn test_panic_with_stop_on_error_stops_dispatch() {
        let provider = Arc::new(ScriptedProvider::default());
        let mut opts = options(1);
        opts.stop_on_error = true;
        let proc = processor(Arc::clone(&provider), Arc::new(MemorySaver::default()), opts);

        let outcome = proc
            .process(&items(&["panic now", "second", "third"]), &CancellationToken::new())
            .await;

        assert!(matches!(
            outcome.error,
            Some(PixforgeError::RunAborted { index: 1 })
        ));
        assert_eq!(outcome.results.len(), 1);
        assert!(matches!(
            outcome.results[0].error(),
            Some(PixforgeError::GenerationFailed(_))
        ));
        assert_eq!(provider.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_only_first_image_is_saved() {
        let provider = Arc::new(ScriptedProvider::default());
        let saver = Arc::new(MemorySaver::default());
        let mut opts = options(1);
        opts.count = 3;
        let proc = processor(provider, Arc::clone(&saver), opts);

        let outcome = proc.process(&items(&["owl"]), &CancellationToken::new()).await;

        assert!(outcome.results[0].is_success());
        let saved = saver.saved.lock().unwrap();
        assert_eq!(saved.len(), 1);
        assert_eq!(saved[0].1, b"owl#0".to_vec());
        assert_eq!(
            outcome.results[0].outcome.as_ref().unwrap().content_hash,
            ContentHash::of(b"owl#0")
        );
    }

    #[tokio::test]
    async fn test_cost_accounting() {
        let provider = Arc::new(ScriptedProvider {
            cost: Some(0.04),
            ..Default::default()
        });
        let proc = processor(provider, Arc::new(MemorySaver::default()), options(1));

        let outcome = proc
            .process(&items(&["a", "fail", "b"]), &CancellationToken::new())
            .await;

        assert_eq!(outcome.results[0].cost(), 0.04);
        assert_eq!(outcome.results[1].cost(), 0.0);
        assert!((outcome.total_cost() - 0.08).abs() < 1e-9);
        assert!(outcome.summary().contains("Total cost: $0.080"));
    }

    #[tokio::test]
    async fn test_missing_cost_is_zero() {
        let provider = Arc::new(ScriptedProvider::default());
        let proc = processor(provider, Arc::new(MemorySaver::default()), options(1));

        let outcome = proc.process(&items(&["a"]), &CancellationToken::new()).await;
        assert_eq!(outcome.results[0].cost(), 0.0);
        assert!(!outcome.summary().contains("Total cost"));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_progress_lines() {
        let provider = Arc::new(ScriptedProvider::with_latency(5));
        let sink = SharedBuf::default();
        let proc = processor(provider, Arc::new(MemorySaver::default()), options(3))
            .with_progress(sink.clone());

        proc.process(&items(&["a", "fail b", "c", "d"]), &CancellationToken::new())
            .await;

        let text = String::from_utf8(sink.0.lock().unwrap().clone()).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 4);
        assert!(lines.iter().all(|l| l.starts_with('[') && l.contains("/4] #")));
        assert_eq!(lines.iter().filter(|l| l.contains("failed")).count(), 1);
    }

    #[test]
    fn test_summary_truncates_prompts() {
        let long_prompt = "an extremely detailed oil painting of a lighthouse in a storm at night";
        let results = vec![ItemResult {
            index: 12,
            prompt: long_prompt.to_string(),
            outcome: Err(PixforgeError::GenerationFailed("HTTP 429".to_string())),
        }];

        let summary = summarize(&results);
        assert!(summary.contains("Successful: 0/1"));
        assert!(summary.contains("Failed: 1"));
        assert!(summary.contains(&format!("\"{}\"", truncate(long_prompt, 40))));
        assert!(!summary.contains(long_prompt));
    }
}
