//! Scripted catalog service and recording extension

use async_trait::async_trait;
use melodl::backend::{Backend, BackendContext, BackendDescriptor, BackendFactory, TrackQuery};
use melodl::models::{AlbumInfo, Codec, TrackDownload, TrackInfo};
use melodl::queue::Job;
use melodl::{Capability, Error, Extension, Result, TaskId};
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::Semaphore;

#[derive(Default)]
struct CatalogState {
    tracks: Mutex<HashMap<String, TrackInfo>>,
    albums: Mutex<HashMap<String, AlbumInfo>>,
    streams: Mutex<HashMap<String, String>>,
    rejected_accounts: Mutex<HashSet<usize>>,
    gate: Mutex<Option<Arc<Semaphore>>>,
    log: Mutex<Vec<String>>,
    active: AtomicUsize,
    max_active: AtomicUsize,
}

/// In-memory streaming service shared by every account instance
#[derive(Clone, Default)]
pub struct Catalog {
    state: Arc<CatalogState>,
}

impl Catalog {
    /// Track with one artist, FLAC audio, no stream URL (written directly)
    pub fn track(&self, id: &str, name: &str, album_id: &str) -> &Self {
        let info = TrackInfo {
            name: name.into(),
            album: format!("Album {album_id}"),
            album_id: album_id.into(),
            artists: vec!["Artist".into()],
            codec: Codec::Flac,
            ..Default::default()
        };
        self.state.tracks.lock().unwrap().insert(id.into(), info);
        self
    }

    /// Album listing `tracks`; ids without a [`track`](Self::track) entry resolve to nothing
    pub fn album(&self, id: &str, name: &str, tracks: &[&str]) -> &Self {
        let info = AlbumInfo {
            name: name.into(),
            artist: "Artist".into(),
            tracks: tracks.iter().map(|t| t.to_string()).collect(),
            ..Default::default()
        };
        self.state.albums.lock().unwrap().insert(id.into(), info);
        self
    }

    /// Serve a track through a URL descriptor
    pub fn stream_from(&self, track_id: &str, url: impl Into<String>) -> &Self {
        self.state
            .streams
            .lock()
            .unwrap()
            .insert(track_id.into(), url.into());
        self
    }

    /// Every lookup on this account is region restricted
    pub fn reject_account(&self, account_index: usize) -> &Self {
        self.state
            .rejected_accounts
            .lock()
            .unwrap()
            .insert(account_index);
        self
    }

    /// Downloads block until a permit of `gate` is available
    pub fn gate(&self, gate: Arc<Semaphore>) -> &Self {
        *self.state.gate.lock().unwrap() = Some(gate);
        self
    }

    /// Calls in arrival order, as `method:account:id`
    pub fn log(&self) -> Vec<String> {
        self.state.log.lock().unwrap().clone()
    }

    pub fn active_downloads(&self) -> usize {
        self.state.active.load(Ordering::SeqCst)
    }

    pub fn max_active_downloads(&self) -> usize {
        self.state.max_active.load(Ordering::SeqCst)
    }

    /// Factory registering this catalog with every capability but playlists
    pub fn factory(&self) -> Arc<dyn BackendFactory> {
        Arc::new(CatalogFactory {
            catalog: self.clone(),
        })
    }
}

struct CatalogFactory {
    catalog: Catalog,
}

#[async_trait]
impl BackendFactory for CatalogFactory {
    fn descriptor(&self) -> BackendDescriptor {
        BackendDescriptor::new(
            "Catalog",
            Capability::DOWNLOAD | Capability::LYRICS | Capability::CREDITS | Capability::COVERS,
        )
        .with_host("catalog.example.com")
    }

    async fn create(&self, context: BackendContext) -> Result<Arc<dyn Backend>> {
        Ok(Arc::new(CatalogAccount {
            state: self.catalog.state.clone(),
            account_index: context.account_index,
        }))
    }
}

struct CatalogAccount {
    state: Arc<CatalogState>,
    account_index: usize,
}

impl CatalogAccount {
    fn record(&self, method: &str, id: &str) -> Result<()> {
        self.state
            .log
            .lock()
            .unwrap()
            .push(format!("{method}:{}:{id}", self.account_index));
        if self
            .state
            .rejected_accounts
            .lock()
            .unwrap()
            .contains(&self.account_index)
        {
            return Err(Error::RegionRestricted {
                backend: "catalog".into(),
                account_index: self.account_index,
                message: "content unavailable in this country".into(),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl Backend for CatalogAccount {
    async fn track_info(
        &self,
        track_id: &str,
        _query: &TrackQuery,
        _data: Option<&Value>,
    ) -> Result<Option<TrackInfo>> {
        self.record("track_info", track_id)?;
        Ok(self.state.tracks.lock().unwrap().get(track_id).cloned())
    }

    async fn track_download(
        &self,
        track_id: &str,
        _info: &TrackInfo,
        target: &Path,
    ) -> Result<TrackDownload> {
        self.record("track_download", track_id)?;
        let now = self.state.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.state.max_active.fetch_max(now, Ordering::SeqCst);

        let gate = self.state.gate.lock().unwrap().clone();
        if let Some(gate) = gate {
            gate.acquire().await.unwrap().forget();
        }

        let stream = self.state.streams.lock().unwrap().get(track_id).cloned();
        let download = match stream {
            Some(url) => TrackDownload::url(url),
            None => {
                if let Some(parent) = target.parent() {
                    tokio::fs::create_dir_all(parent).await?;
                }
                tokio::fs::write(target, format!("audio of {track_id}")).await?;
                TrackDownload::direct()
            }
        };
        self.state.active.fetch_sub(1, Ordering::SeqCst);
        Ok(download)
    }

    async fn album_info(&self, album_id: &str, _data: Option<&Value>) -> Result<Option<AlbumInfo>> {
        self.record("album_info", album_id)?;
        Ok(self.state.albums.lock().unwrap().get(album_id).cloned())
    }
}

/// Extension recording hook calls in order
#[derive(Default)]
pub struct RecordingExtension {
    calls: Mutex<Vec<String>>,
}

impl RecordingExtension {
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl Extension for RecordingExtension {
    fn name(&self) -> &str {
        "recording"
    }

    async fn on_track_complete(&self, _task_id: TaskId, _job: &Job, track: &TrackInfo) -> Result<()> {
        self.calls.lock().unwrap().push(format!("track:{}", track.name));
        Ok(())
    }

    async fn on_job_complete(&self, job: &Job) -> Result<()> {
        self.calls.lock().unwrap().push(format!("job:{}", job.name));
        Ok(())
    }

    async fn on_all_complete(&self, jobs: &[Job]) -> Result<()> {
        self.calls.lock().unwrap().push(format!("all:{}", jobs.len()));
        Ok(())
    }
}
