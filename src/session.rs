//! Long-lived download session
//!
//! A [`MediaDownloader`] owns everything that outlives a single download:
//! configuration, the backend registry and its cached instances, the
//! pluggable collaborators, extensions and the event bus. Every call to
//! [`MediaDownloader::download`] builds a fresh [`Downloader`] with its own
//! queue, so concurrent downloads never share job state.

use serde_json::{Map, Value};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::broadcast;
use tokio_stream::{Stream, StreamExt, wrappers::BroadcastStream};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use crate::backend::{BackendFactory, BackendRegistry};
use crate::config::Config;
use crate::downloader::{Collaborators, Downloader};
use crate::error::{Error, Result};
use crate::extensions::{Extension, ExtensionSet};
use crate::layout::{Layout, PathBuilder, TemplatePathBuilder};
use crate::progress::EventBus;
use crate::tagging::{NoOpTagger, Tagger};
use crate::transcode::{FfmpegTranscoder, Transcoder};
use crate::transfer::Transfer;
use crate::types::{DownloadOutcome, DownloadRequest, Event};

/// How long [`MediaDownloader::shutdown`] waits for running downloads
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);

/// Default number of events buffered per slow subscriber
const DEFAULT_EVENT_CAPACITY: usize = 1000;

enum TranscoderChoice {
    /// Look for `ffmpeg` in `PATH` when the session is built
    Discover,
    Fixed(Arc<dyn Transcoder>),
    Disabled,
}

/// Builder for a [`MediaDownloader`]
pub struct MediaDownloaderBuilder {
    config: Config,
    backends: Vec<(String, Arc<dyn BackendFactory>, Vec<Map<String, Value>>)>,
    path_builder: Option<Arc<dyn PathBuilder>>,
    tagger: Option<Arc<dyn Tagger>>,
    transcoder: TranscoderChoice,
    extensions: Vec<Arc<dyn Extension>>,
    event_capacity: usize,
}

impl MediaDownloaderBuilder {
    fn new(config: Config) -> Self {
        Self {
            config,
            backends: Vec::new(),
            path_builder: None,
            tagger: None,
            transcoder: TranscoderChoice::Discover,
            extensions: Vec::new(),
            event_capacity: DEFAULT_EVENT_CAPACITY,
        }
    }

    /// Register a backend with one settings map per account
    pub fn backend(
        mut self,
        name: impl Into<String>,
        factory: Arc<dyn BackendFactory>,
        accounts: Vec<Map<String, Value>>,
    ) -> Self {
        self.backends.push((name.into(), factory, accounts));
        self
    }

    /// Replace the template layout
    pub fn path_builder(mut self, builder: Arc<dyn PathBuilder>) -> Self {
        self.path_builder = Some(builder);
        self
    }

    /// Tag writer; files stay untagged without one
    pub fn tagger(mut self, tagger: Arc<dyn Tagger>) -> Self {
        self.tagger = Some(tagger);
        self
    }

    /// Codec converter; defaults to `ffmpeg` from `PATH` when present
    pub fn transcoder(mut self, transcoder: Arc<dyn Transcoder>) -> Self {
        self.transcoder = TranscoderChoice::Fixed(transcoder);
        self
    }

    /// Never convert, even when `ffmpeg` is installed
    pub fn no_transcoder(mut self) -> Self {
        self.transcoder = TranscoderChoice::Disabled;
        self
    }

    /// Add an extension; order among equal priorities is registration order
    pub fn extension(mut self, extension: Arc<dyn Extension>) -> Self {
        self.extensions.push(extension);
        self
    }

    /// Events buffered per subscriber before it starts lagging
    pub fn event_capacity(mut self, capacity: usize) -> Self {
        self.event_capacity = capacity;
        self
    }

    /// Validate the configuration and the registry, then build the session
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] for an invalid setting or two public
    /// backends claiming the same service host, and [`Error::Network`] when
    /// the HTTP client cannot be created.
    pub fn build(self) -> Result<MediaDownloader> {
        self.config.validate()?;
        let config = Arc::new(self.config);

        let mut registry = BackendRegistry::new(config.clone());
        for (name, factory, accounts) in self.backends {
            registry.register(name, factory, accounts);
        }
        registry.validate()?;

        let path_builder = self
            .path_builder
            .unwrap_or_else(|| Arc::new(TemplatePathBuilder::new(config.formatting.clone())));
        let transcoder: Option<Arc<dyn Transcoder>> = match self.transcoder {
            TranscoderChoice::Discover => match FfmpegTranscoder::from_path() {
                Some(ffmpeg) => Some(Arc::new(ffmpeg)),
                None => {
                    tracing::info!("ffmpeg not found in PATH, codec conversion disabled");
                    None
                }
            },
            TranscoderChoice::Fixed(transcoder) => Some(transcoder),
            TranscoderChoice::Disabled => None,
        };
        let collaborators = Collaborators {
            layout: Layout::new(path_builder, config.formatting.clone()),
            transfer: Transfer::new(config.stream_retry.clone())?,
            tagger: self.tagger.unwrap_or_else(|| Arc::new(NoOpTagger)),
            transcoder,
        };

        tracing::info!(
            backends = ?registry.names(),
            concurrency = config.download.concurrent_downloads,
            "Download session ready"
        );

        Ok(MediaDownloader {
            config,
            registry: Arc::new(registry),
            collaborators,
            extensions: ExtensionSet::new(self.extensions),
            events: EventBus::new(self.event_capacity),
            stop: Arc::new(std::sync::Mutex::new(CancellationToken::new())),
            accepting_new: Arc::new(AtomicBool::new(true)),
            active: TaskTracker::new(),
        })
    }
}

/// Download session (cloneable, all fields are Arc-backed)
///
/// # Examples
///
/// ```no_run
/// use melodl::{Config, DownloadRequest, MediaDownloader, MediaIdentification, MediaKind};
/// # use std::sync::Arc;
/// # fn factory() -> Arc<dyn melodl::backend::BackendFactory> { unimplemented!() }
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let session = MediaDownloader::builder(Config::default())
///         .backend("tidal", factory(), vec![Default::default()])
///         .build()?;
///
///     let mut events = session.subscribe();
///     tokio::spawn(async move {
///         while let Ok(event) = events.recv().await {
///             println!("{event:?}");
///         }
///     });
///
///     let request = DownloadRequest::new(
///         "tidal",
///         vec![MediaIdentification::new(MediaKind::Album, "12345")],
///     );
///     let outcome = session.download(&request).await?;
///     println!("{} tracks downloaded", outcome.completed.len());
///
///     session.shutdown().await;
///     Ok(())
/// }
/// ```
#[derive(Clone)]
pub struct MediaDownloader {
    config: Arc<Config>,
    registry: Arc<BackendRegistry>,
    collaborators: Collaborators,
    extensions: ExtensionSet,
    events: EventBus,
    /// Parent of every run token; replaced after `cancel`
    stop: Arc<std::sync::Mutex<CancellationToken>>,
    accepting_new: Arc<AtomicBool>,
    active: TaskTracker,
}

impl MediaDownloader {
    /// Start configuring a session
    pub fn builder(config: Config) -> MediaDownloaderBuilder {
        MediaDownloaderBuilder::new(config)
    }

    /// Session configuration
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Backend registry of the session
    pub fn registry(&self) -> &BackendRegistry {
        &self.registry
    }

    /// Receive every event sent from now on
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.events.subscribe()
    }

    /// Events as a stream; events missed by a lagging consumer are skipped
    pub fn events(&self) -> impl Stream<Item = Event> + Send + 'static {
        BroadcastStream::new(self.events.subscribe()).filter_map(|event| match event {
            Ok(event) => Some(event),
            Err(e) => {
                tracing::warn!(error = %e, "Event subscriber lagged");
                None
            }
        })
    }

    /// Backend whose service host matches `url`
    pub fn backend_for_url(&self, url: &str) -> Option<String> {
        self.registry.backend_for_url(url)
    }

    /// Validate, populate and process one request
    ///
    /// Third-party backends named in `request.auxiliary` are asked for
    /// covers, lyrics and credits. Extension hooks triggered by the run have
    /// finished when this returns.
    ///
    /// # Errors
    ///
    /// - [`Error::ShuttingDown`] once [`shutdown`](Self::shutdown) started
    /// - [`Error::Config`] when the request names an unknown backend or a
    ///   capability a backend lacks
    /// - [`DownloadError::Aborted`](crate::DownloadError::Aborted) after the
    ///   first track failure with `abort_on_single_failure`
    /// - [`DownloadError::Cancelled`](crate::DownloadError::Cancelled) after
    ///   [`cancel`](Self::cancel)
    pub async fn download(&self, request: &DownloadRequest) -> Result<DownloadOutcome> {
        if !self.accepting_new.load(Ordering::SeqCst) {
            return Err(Error::ShuttingDown);
        }

        let downloader = Downloader::new(
            self.config.clone(),
            self.registry.clone(),
            self.collaborators.clone(),
            self.extensions.clone(),
            self.events.clone(),
            request.auxiliary.clone(),
            self.run_token(),
        );
        self.active.track_future(downloader.run(request)).await
    }

    /// Stop every running download; later downloads are unaffected
    pub fn cancel(&self) {
        match self.stop.lock() {
            Ok(mut stop) => {
                stop.cancel();
                *stop = CancellationToken::new();
                tracing::info!("Cancelled running downloads");
            }
            Err(e) => tracing::error!(error = %e, "Cancellation token lock poisoned"),
        }
    }

    /// Stop accepting downloads, cancel running ones and close backends
    ///
    /// Running downloads get 30 seconds to wind down before backends are
    /// closed regardless.
    pub async fn shutdown(&self) {
        tracing::info!("Initiating graceful shutdown");
        self.accepting_new.store(false, Ordering::SeqCst);
        self.cancel();

        self.active.close();
        match tokio::time::timeout(SHUTDOWN_TIMEOUT, self.active.wait()).await {
            Ok(()) => tracing::info!("All running downloads stopped"),
            Err(_) => tracing::warn!("Timeout waiting for downloads to stop, closing backends anyway"),
        }

        self.registry.close_all().await;
        tracing::info!("Shutdown complete");
    }

    fn run_token(&self) -> CancellationToken {
        match self.stop.lock() {
            Ok(stop) => stop.child_token(),
            Err(e) => {
                tracing::error!(error = %e, "Cancellation token lock poisoned");
                CancellationToken::new()
            }
        }
    }
}

/// Run until a termination signal arrives, then shut the session down
///
/// - **Unix:** SIGTERM and SIGINT, falling back to whichever handler could
///   be registered.
/// - **Other platforms:** Ctrl+C.
///
/// # Examples
///
/// ```no_run
/// use melodl::{Config, MediaDownloader, run_with_shutdown};
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let session = MediaDownloader::builder(Config::default()).build()?;
///     run_with_shutdown(session).await;
///     Ok(())
/// }
/// ```
pub async fn run_with_shutdown(session: MediaDownloader) {
    wait_for_signal().await;
    session.shutdown().await;
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{SignalKind, signal};

    match (signal(SignalKind::terminate()), signal(SignalKind::interrupt())) {
        (Ok(mut sigterm), Ok(mut sigint)) => {
            tokio::select! {
                _ = sigterm.recv() => tracing::info!("Received SIGTERM signal"),
                _ = sigint.recv() => tracing::info!("Received SIGINT signal (Ctrl+C)"),
            }
        }
        (Err(e), Ok(mut sigint)) => {
            tracing::warn!(error = %e, "Could not register SIGTERM handler, waiting for SIGINT only");
            sigint.recv().await;
            tracing::info!("Received SIGINT signal (Ctrl+C)");
        }
        (Ok(mut sigterm), Err(e)) => {
            tracing::warn!(error = %e, "Could not register SIGINT handler, waiting for SIGTERM only");
            sigterm.recv().await;
            tracing::info!("Received SIGTERM signal");
        }
        (Err(e), Err(_)) => {
            tracing::error!(error = %e, "Could not register any signal handlers, using ctrl_c fallback");
            tokio::signal::ctrl_c().await.ok();
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => tracing::info!("Received Ctrl+C signal"),
        Err(e) => tracing::error!(error = %e, "Failed to listen for Ctrl+C signal"),
    }
}
