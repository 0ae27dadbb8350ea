//! Shared test helpers: a scriptable backend and downloader construction.

use async_trait::async_trait;
use serde_json::{Map, Value};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::{TempDir, tempdir};
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;

use crate::backend::{Backend, BackendContext, BackendDescriptor, BackendFactory, BackendRegistry, TrackQuery};
use crate::config::{Config, RetryConfig};
use crate::downloader::{Collaborators, Downloader};
use crate::error::{Error, Result};
use crate::extensions::{Extension, ExtensionSet};
use crate::layout::{Layout, TemplatePathBuilder};
use crate::models::{
    AlbumInfo, ArtistInfo, Codec, CoverInfo, CoverOptions, CreditsInfo, LyricsInfo, PlaylistInfo,
    SearchResult, TrackDownload, TrackInfo,
};
use crate::progress::EventBus;
use crate::tagging::{TagRequest, Tagger};
use crate::transcode::Transcoder;
use crate::transfer::Transfer;
use crate::types::{Capability, MediaKind};

/// Every capability a backend can declare
pub(crate) fn all_capabilities() -> Capability {
    Capability::DOWNLOAD
        | Capability::PLAYLIST
        | Capability::LYRICS
        | Capability::CREDITS
        | Capability::COVERS
}

#[derive(Default)]
struct StubState {
    tracks: Mutex<HashMap<String, TrackInfo>>,
    albums: Mutex<HashMap<String, AlbumInfo>>,
    playlists: Mutex<HashMap<String, PlaylistInfo>>,
    artists: Mutex<HashMap<String, ArtistInfo>>,
    downloads: Mutex<HashMap<String, TrackDownload>>,
    lyrics: Mutex<HashMap<String, LyricsInfo>>,
    credits: Mutex<HashMap<String, Vec<CreditsInfo>>>,
    covers: Mutex<HashMap<String, CoverInfo>>,
    search_results: Mutex<Vec<SearchResult>>,
    restricted: Mutex<HashSet<(usize, Option<String>)>>,
    transient_failures: Mutex<HashMap<String, u32>>,
    panics: Mutex<HashSet<String>>,
    gate: Mutex<Option<Arc<Semaphore>>>,
    calls: Mutex<Vec<String>>,
    close_calls: AtomicUsize,
    active: AtomicUsize,
    max_active: AtomicUsize,
}

/// Backend answering from scripted data
///
/// Clones and every instance built by a [`StubFactory`] share the script and
/// the call log; each instance remembers its account.
#[derive(Clone, Default)]
pub(crate) struct StubBackend {
    state: Arc<StubState>,
    account_index: usize,
}

impl StubBackend {
    pub(crate) fn add_track(&self, id: &str, info: TrackInfo) {
        self.state.tracks.lock().unwrap().insert(id.into(), info);
    }

    pub(crate) fn add_album(&self, id: &str, info: AlbumInfo) {
        self.state.albums.lock().unwrap().insert(id.into(), info);
    }

    pub(crate) fn add_playlist(&self, id: &str, info: PlaylistInfo) {
        self.state.playlists.lock().unwrap().insert(id.into(), info);
    }

    pub(crate) fn add_artist(&self, id: &str, info: ArtistInfo) {
        self.state.artists.lock().unwrap().insert(id.into(), info);
    }

    /// Answer `track_download` with `download` instead of writing the file directly
    pub(crate) fn set_download(&self, id: &str, download: TrackDownload) {
        self.state.downloads.lock().unwrap().insert(id.into(), download);
    }

    pub(crate) fn set_lyrics(&self, id: &str, lyrics: LyricsInfo) {
        self.state.lyrics.lock().unwrap().insert(id.into(), lyrics);
    }

    pub(crate) fn set_credits(&self, id: &str, credits: Vec<CreditsInfo>) {
        self.state.credits.lock().unwrap().insert(id.into(), credits);
    }

    pub(crate) fn set_cover(&self, id: &str, url: &str) {
        let cover = CoverInfo {
            url: url.into(),
            file_type: Default::default(),
        };
        self.state.covers.lock().unwrap().insert(id.into(), cover);
    }

    pub(crate) fn set_search_results(&self, results: Vec<SearchResult>) {
        *self.state.search_results.lock().unwrap() = results;
    }

    /// Metadata lookups on this account fail with a region restriction
    pub(crate) fn restrict_account(&self, account_index: usize) {
        self.state.restricted.lock().unwrap().insert((account_index, None));
    }

    /// Lookups of one item on this account fail with a region restriction
    pub(crate) fn restrict_item(&self, account_index: usize, id: &str) {
        self.state
            .restricted
            .lock()
            .unwrap()
            .insert((account_index, Some(id.to_string())));
    }

    /// The next `times` metadata lookups of `id` fail with a connection reset
    pub(crate) fn fail_transiently(&self, id: &str, times: u32) {
        self.state.transient_failures.lock().unwrap().insert(id.into(), times);
    }

    pub(crate) fn panic_on(&self, id: &str) {
        self.state.panics.lock().unwrap().insert(id.into());
    }

    /// Downloads wait for a permit of `gate` (each download consumes one)
    pub(crate) fn gate_downloads(&self, gate: Arc<Semaphore>) {
        *self.state.gate.lock().unwrap() = Some(gate);
    }

    pub(crate) fn calls(&self) -> Vec<String> {
        self.state.calls.lock().unwrap().clone()
    }

    /// Number of logged calls starting with `prefix`
    pub(crate) fn count_calls(&self, prefix: &str) -> usize {
        self.calls().iter().filter(|c| c.starts_with(prefix)).count()
    }

    pub(crate) fn close_calls(&self) -> usize {
        self.state.close_calls.load(Ordering::SeqCst)
    }

    /// Downloads currently waiting or writing
    pub(crate) fn active_downloads(&self) -> usize {
        self.state.active.load(Ordering::SeqCst)
    }

    pub(crate) fn max_active_downloads(&self) -> usize {
        self.state.max_active.load(Ordering::SeqCst)
    }

    fn log(&self, call: String) {
        self.state.calls.lock().unwrap().push(call);
    }

    fn check_region(&self, id: &str) -> Result<()> {
        let restricted = {
            let restricted = self.state.restricted.lock().unwrap();
            restricted.contains(&(self.account_index, None))
                || restricted.contains(&(self.account_index, Some(id.to_string())))
        };
        if restricted {
            return Err(Error::RegionRestricted {
                backend: "stub".into(),
                account_index: self.account_index,
                message: "not available in this region".into(),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl Backend for StubBackend {
    async fn track_info(
        &self,
        track_id: &str,
        _query: &TrackQuery,
        _data: Option<&Value>,
    ) -> Result<Option<TrackInfo>> {
        self.log(format!("track_info:{}:{}", self.account_index, track_id));
        self.check_region(track_id)?;
        if self.state.panics.lock().unwrap().contains(track_id) {
            panic!("scripted panic for track {track_id}");
        }
        {
            let mut failures = self.state.transient_failures.lock().unwrap();
            if let Some(left) = failures.get_mut(track_id)
                && *left > 0
            {
                *left -= 1;
                return Err(Error::Io(std::io::Error::new(
                    std::io::ErrorKind::ConnectionReset,
                    "connection reset by peer",
                )));
            }
        }
        Ok(self.state.tracks.lock().unwrap().get(track_id).cloned())
    }

    async fn track_download(
        &self,
        track_id: &str,
        _info: &TrackInfo,
        target: &Path,
    ) -> Result<TrackDownload> {
        self.log(format!("track_download:{}", track_id));
        let now = self.state.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.state.max_active.fetch_max(now, Ordering::SeqCst);

        let gate = self.state.gate.lock().unwrap().clone();
        if let Some(gate) = gate {
            gate.acquire().await.unwrap().forget();
        }

        let scripted = self.state.downloads.lock().unwrap().get(track_id).cloned();
        let result = match scripted {
            Some(download) => Ok(download),
            None => {
                if let Some(parent) = target.parent() {
                    tokio::fs::create_dir_all(parent).await?;
                }
                tokio::fs::write(target, b"audio").await?;
                Ok(TrackDownload::direct())
            }
        };
        self.state.active.fetch_sub(1, Ordering::SeqCst);
        result
    }

    async fn album_info(&self, album_id: &str, _data: Option<&Value>) -> Result<Option<AlbumInfo>> {
        self.log(format!("album_info:{}:{}", self.account_index, album_id));
        self.check_region(album_id)?;
        Ok(self.state.albums.lock().unwrap().get(album_id).cloned())
    }

    async fn playlist_info(
        &self,
        playlist_id: &str,
        _data: Option<&Value>,
    ) -> Result<Option<PlaylistInfo>> {
        self.log(format!("playlist_info:{}:{}", self.account_index, playlist_id));
        self.check_region(playlist_id)?;
        Ok(self.state.playlists.lock().unwrap().get(playlist_id).cloned())
    }

    async fn artist_info(
        &self,
        artist_id: &str,
        credited_albums: bool,
        _data: Option<&Value>,
    ) -> Result<Option<ArtistInfo>> {
        self.log(format!("artist_info:{}:{}:{}", self.account_index, artist_id, credited_albums));
        self.check_region(artist_id)?;
        Ok(self.state.artists.lock().unwrap().get(artist_id).cloned())
    }

    async fn search(
        &self,
        _kind: MediaKind,
        query: &str,
        _hint: Option<&TrackInfo>,
    ) -> Result<Vec<SearchResult>> {
        self.log(format!("search:{}", query));
        Ok(self.state.search_results.lock().unwrap().clone())
    }

    async fn track_cover(
        &self,
        track_id: &str,
        _options: &CoverOptions,
        _data: Option<&Value>,
    ) -> Result<Option<CoverInfo>> {
        self.log(format!("track_cover:{}", track_id));
        Ok(self.state.covers.lock().unwrap().get(track_id).cloned())
    }

    async fn track_lyrics(&self, track_id: &str, _data: Option<&Value>) -> Result<LyricsInfo> {
        self.log(format!("track_lyrics:{}", track_id));
        Ok(self.state.lyrics.lock().unwrap().get(track_id).cloned().unwrap_or_default())
    }

    async fn track_credits(&self, track_id: &str, _data: Option<&Value>) -> Result<Vec<CreditsInfo>> {
        self.log(format!("track_credits:{}", track_id));
        Ok(self.state.credits.lock().unwrap().get(track_id).cloned().unwrap_or_default())
    }

    async fn close(&self) -> Result<()> {
        self.state.close_calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Factory handing out [`StubBackend`] instances sharing one script
pub(crate) struct StubFactory {
    backend: StubBackend,
    descriptor: BackendDescriptor,
    created: Mutex<Vec<usize>>,
    settings: Mutex<HashMap<usize, Map<String, Value>>>,
}

impl StubFactory {
    /// Factory declaring every capability
    pub(crate) fn new(backend: StubBackend) -> Arc<Self> {
        Self::with_descriptor(backend, BackendDescriptor::new("Stub", all_capabilities()))
    }

    pub(crate) fn with_descriptor(backend: StubBackend, descriptor: BackendDescriptor) -> Arc<Self> {
        Arc::new(Self {
            backend,
            descriptor,
            created: Mutex::new(Vec::new()),
            settings: Mutex::new(HashMap::new()),
        })
    }

    /// Accounts instances were built for, in build order
    pub(crate) fn created_accounts(&self) -> Vec<usize> {
        self.created.lock().unwrap().clone()
    }

    pub(crate) fn settings_for(&self, account_index: usize) -> Option<Map<String, Value>> {
        self.settings.lock().unwrap().get(&account_index).cloned()
    }
}

#[async_trait]
impl BackendFactory for StubFactory {
    fn descriptor(&self) -> BackendDescriptor {
        self.descriptor.clone()
    }

    async fn create(&self, context: BackendContext) -> Result<Arc<dyn Backend>> {
        self.created.lock().unwrap().push(context.account_index);
        self.settings
            .lock()
            .unwrap()
            .insert(context.account_index, context.settings);
        Ok(Arc::new(StubBackend {
            state: self.backend.state.clone(),
            account_index: context.account_index,
        }))
    }
}

/// What a [`RecordingTagger`] was asked to write
#[derive(Clone, Debug)]
pub(crate) struct TagCall {
    pub(crate) file: PathBuf,
    pub(crate) track: TrackInfo,
    pub(crate) cover: Option<PathBuf>,
    pub(crate) lyrics: Option<String>,
    pub(crate) credits: usize,
}

/// Tagger that records its calls and optionally fails them
#[derive(Default)]
pub(crate) struct RecordingTagger {
    calls: Mutex<Vec<TagCall>>,
    fail: bool,
}

impl RecordingTagger {
    pub(crate) fn failing() -> Self {
        Self {
            fail: true,
            ..Default::default()
        }
    }

    pub(crate) fn calls(&self) -> Vec<TagCall> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl Tagger for RecordingTagger {
    async fn tag(&self, request: TagRequest<'_>) -> Result<()> {
        self.calls.lock().unwrap().push(TagCall {
            file: request.file.to_path_buf(),
            track: request.track.clone(),
            cover: request.cover.map(Path::to_path_buf),
            lyrics: request.lyrics.map(str::to_string),
            credits: request.credits.len(),
        });
        if self.fail {
            return Err(Error::Tagging("scripted tagging failure".into()));
        }
        Ok(())
    }

    fn name(&self) -> &'static str {
        "recording"
    }
}

/// Track metadata with one artist and FLAC audio
pub(crate) fn track(name: &str, album_id: &str) -> TrackInfo {
    TrackInfo {
        name: name.into(),
        album: format!("Album {}", album_id),
        album_id: album_id.into(),
        artists: vec!["Artist".into()],
        codec: Codec::Flac,
        ..Default::default()
    }
}

pub(crate) fn album(name: &str, tracks: &[&str]) -> AlbumInfo {
    AlbumInfo {
        name: name.into(),
        artist: "Artist".into(),
        tracks: tracks.iter().map(|t| t.to_string()).collect(),
        ..Default::default()
    }
}

fn fast_retry(max_attempts: u32) -> RetryConfig {
    RetryConfig {
        max_attempts,
        initial_delay: Duration::from_millis(1),
        max_delay: Duration::from_millis(5),
        backoff_multiplier: 2.0,
        jitter: false,
    }
}

/// Everything needed to build downloaders writing into a scratch directory
pub(crate) struct TestSetup {
    pub(crate) config: Config,
    pub(crate) events: EventBus,
    pub(crate) tagger: Arc<RecordingTagger>,
    pub(crate) transcoder: Option<Arc<dyn Transcoder>>,
    pub(crate) extensions: Vec<Arc<dyn Extension>>,
    pub(crate) auxiliary: HashMap<Capability, String>,
    backends: Vec<(String, Arc<StubFactory>, usize)>,
    dir: TempDir,
}

impl TestSetup {
    /// Output and temp directories inside a fresh tempdir, fast retries
    pub(crate) fn new() -> Self {
        let dir = tempdir().unwrap();
        let mut config = Config::default();
        config.download.output_path = dir.path().join("out");
        config.download.temp_dir = Some(dir.path().join("tmp"));
        config.download.concurrent_downloads = 3;
        config.track_retry = fast_retry(3);
        config.stream_retry = fast_retry(2);

        Self {
            config,
            events: EventBus::default(),
            tagger: Arc::new(RecordingTagger::default()),
            transcoder: None,
            extensions: Vec::new(),
            auxiliary: HashMap::new(),
            backends: Vec::new(),
            dir,
        }
    }

    /// Register `backend` under `name` with `accounts` empty account settings
    pub(crate) fn with_backend(mut self, name: &str, backend: &StubBackend, accounts: usize) -> Self {
        self.backends
            .push((name.into(), StubFactory::new(backend.clone()), accounts));
        self
    }

    pub(crate) fn with_factory(mut self, name: &str, factory: Arc<StubFactory>, accounts: usize) -> Self {
        self.backends.push((name.into(), factory, accounts));
        self
    }

    pub(crate) fn out(&self) -> PathBuf {
        self.config.download.output_path.clone()
    }

    pub(crate) fn temp(&self) -> PathBuf {
        self.dir.path().join("tmp")
    }

    /// A fresh run over the registered backends
    pub(crate) fn build(&self) -> Downloader {
        let config = Arc::new(self.config.clone());
        let mut registry = BackendRegistry::new(config.clone());
        for (name, factory, accounts) in &self.backends {
            registry.register(name.as_str(), factory.clone(), vec![Map::new(); *accounts]);
        }

        let collaborators = Collaborators {
            layout: Layout::new(
                Arc::new(TemplatePathBuilder::new(config.formatting.clone())),
                config.formatting.clone(),
            ),
            transfer: Transfer::new(config.stream_retry.clone()).unwrap(),
            tagger: self.tagger.clone(),
            transcoder: self.transcoder.clone(),
        };

        Downloader::new(
            config,
            Arc::new(registry),
            collaborators,
            ExtensionSet::new(self.extensions.clone()),
            self.events.clone(),
            self.auxiliary.clone(),
            CancellationToken::new(),
        )
    }
}
