//! Request validation and queue population
//!
//! Population resolves every requested item into a job and its track tasks.
//! A region restriction reported by a backend moves population of that item
//! to the backend's next account; the job keeps its id and is refilled.

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;

use super::Downloader;
use crate::backend::{Backend, BackendRegistry};
use crate::error::{DownloadError, Result};
use crate::models::{AlbumInfo, ArtistInfo, PlaylistInfo};
use crate::queue::{NewJob, TrackTask};
use crate::types::{Capability, DownloadRequest, JobId, MediaIdentification, MediaKind};
use crate::utils::sanitise_name;

/// A backend instance bound to one account
#[derive(Clone)]
pub struct Source {
    /// Registered backend name
    pub name: String,
    /// Instance for `account_index`
    pub backend: Arc<dyn Backend>,
    /// Account the instance is bound to
    pub account_index: usize,
}

impl Source {
    /// Load (or reuse) the instance of `name` for an account
    pub async fn load(registry: &BackendRegistry, name: &str, account_index: usize) -> Result<Self> {
        Ok(Self {
            name: name.to_string(),
            backend: registry.load(name, account_index).await?,
            account_index,
        })
    }
}

/// Where population of one requested item puts its tracks
pub struct Target {
    /// Backend the item is resolved with
    pub source: Source,
    /// Job receiving the tracks; filled in by the first population step that creates one
    pub job: Option<JobId>,
}

impl Target {
    /// Target without a job yet
    pub fn new(source: Source) -> Self {
        Self { source, job: None }
    }
}

/// Artist an album is populated under
#[derive(Clone, Debug)]
pub struct ArtistScope {
    /// Requested artist name
    pub name: String,
    /// Artist directory
    pub dir: PathBuf,
}

impl Downloader {
    /// Reject requests naming unknown backends or unsupported capabilities
    ///
    /// Third-party backends are loaded here so that login failures surface
    /// before anything is queued.
    pub(crate) async fn validate(&self, request: &DownloadRequest) -> Result<()> {
        self.registry.validate()?;

        for (capability, name) in &request.auxiliary {
            self.registry.require(name, *capability)?;
            self.registry.load_any(name).await?;
        }

        for (name, items) in &request.media {
            self.registry.require(name, Capability::DOWNLOAD)?;
            if items.iter().any(|m| m.kind == MediaKind::Playlist) {
                self.registry.require(name, Capability::PLAYLIST)?;
            }
        }

        if let Some(name) = &request.playlist_download_backend {
            self.registry.require(name, Capability::DOWNLOAD)?;
        }
        Ok(())
    }

    /// Populate the queue with every item of `request`
    ///
    /// Backends are visited in name order, items in request order.
    pub(crate) async fn populate(&self, request: &DownloadRequest) -> Result<()> {
        let mut entries: Vec<_> = request.media.iter().collect();
        entries.sort_by(|a, b| a.0.cmp(b.0));

        for (name, items) in entries {
            let playlist_source = match &request.playlist_download_backend {
                Some(other)
                    if other != name && items.iter().any(|m| m.kind == MediaKind::Playlist) =>
                {
                    Some(Source::load(&self.registry, other, 0).await?)
                }
                _ => None,
            };

            for media in items {
                if self.run.cancel.is_cancelled() {
                    return Err(DownloadError::Cancelled.into());
                }
                let job = self.queue_media(name, media, playlist_source.as_ref()).await?;
                if job.is_none() {
                    let missing = DownloadError::MediaNotFound {
                        kind: media.kind,
                        media_id: media.media_id.clone(),
                        backend: name.clone(),
                    };
                    tracing::warn!(error = %missing, "Requested media skipped");
                }
            }
        }
        Ok(())
    }

    /// Populate one requested item, moving to the next account on region restriction
    ///
    /// Returns the job holding the item's tracks, or `None` when the backend
    /// reports the item as missing.
    pub async fn queue_media(
        &self,
        backend_name: &str,
        media: &MediaIdentification,
        playlist_source: Option<&Source>,
    ) -> Result<Option<JobId>> {
        let accounts = self.registry.account_count(backend_name).max(1);
        let mut target = Target::new(Source::load(&self.registry, backend_name, 0).await?);

        loop {
            match self.queue_once(&mut target, media, playlist_source).await {
                Ok(true) => return Ok(target.job),
                Ok(false) => {
                    if let Some(job) = target.job {
                        self.queue.remove_job(job).await;
                    }
                    return Ok(None);
                }
                Err(e) if e.is_region_restricted() && target.source.account_index + 1 < accounts => {
                    let next = target.source.account_index + 1;
                    tracing::warn!(
                        backend = backend_name,
                        media_id = %media.media_id,
                        account = next,
                        error = %e,
                        "Region restricted, retrying with next account"
                    );
                    if let Some(job) = target.job {
                        self.queue.reset_job(job).await;
                    }
                    target.source = Source::load(&self.registry, backend_name, next).await?;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn queue_once(
        &self,
        target: &mut Target,
        media: &MediaIdentification,
        playlist_source: Option<&Source>,
    ) -> Result<bool> {
        let id = media.media_id.as_str();
        let request = media.original_request.as_str();
        let found = match media.kind {
            MediaKind::Track => {
                self.queue_track(target, id, request).await?;
                true
            }
            MediaKind::Album => self
                .queue_album(target, id, request, None, None)
                .await?
                .is_some(),
            MediaKind::Playlist => self
                .queue_playlist(target, id, request, playlist_source)
                .await?
                .is_some(),
            MediaKind::Artist => self.queue_artist(target, id, request).await?.is_some(),
        };
        Ok(found)
    }

    /// Queue a single track laid out directly under the output path
    pub async fn queue_track(&self, target: &mut Target, track_id: &str, request: &str) -> Result<JobId> {
        let base = self.config.download.output_path.clone();
        let job = match target.job {
            Some(job) => job,
            None => {
                let job = self
                    .queue
                    .create_job(NewJob {
                        original_request: request.to_string(),
                        kind: MediaKind::Track,
                        media_id: track_id.to_string(),
                        backend_name: target.source.name.clone(),
                        name: track_id.to_string(),
                        path: Some(base.clone()),
                        ..Default::default()
                    })
                    .await;
                target.job = Some(job);
                job
            }
        };

        let source = &target.source;
        let task = TrackTask::new(track_id, &source.name, source.backend.clone(), base)
            .on_account(source.account_index);
        self.queue.add_track(job, task).await?;
        tracing::info!(job_id = %job, track_id, "Queued track");
        Ok(job)
    }

    /// Queue every track of an album
    ///
    /// Under an artist the album joins the artist's job and directory and no
    /// side assets are fetched. Returns `None` when the album is missing.
    pub async fn queue_album(
        &self,
        target: &mut Target,
        album_id: &str,
        request: &str,
        data: Option<&serde_json::Value>,
        artist: Option<&ArtistScope>,
    ) -> Result<Option<AlbumInfo>> {
        let Some(album) = target.source.backend.album_info(album_id, data).await? else {
            tracing::warn!(backend = %target.source.name, album_id, "Album not found");
            return Ok(None);
        };

        let base = self.config.download.output_path.clone();
        let mut dir = self.collaborators.layout.album_dir(&base, album_id, &album);
        if let Some(scope) = artist
            && let Some(name) = dir.file_name()
        {
            dir = scope.dir.join(name);
        }
        let main_artist = artist.map_or_else(|| album.artist.clone(), |a| a.name.clone());

        let job = match target.job {
            Some(job) => job,
            None => {
                let job = self
                    .queue
                    .create_job(NewJob {
                        original_request: request.to_string(),
                        kind: MediaKind::Album,
                        media_id: album_id.to_string(),
                        backend_name: target.source.name.clone(),
                        name: album.name.clone(),
                        artist: main_artist.clone(),
                        path: Some(dir.clone()),
                        cover_url: album.cover_url.clone(),
                    })
                    .await;
                target.job = Some(job);
                job
            }
        };

        if artist.is_none() && !self.config.download.dry_run {
            self.album_assets(&dir, &album).await;
        }

        let source = &target.source;
        let total = album.tracks.len() as u32;
        for (index, track_id) in album.tracks.iter().enumerate() {
            let task = TrackTask::new(track_id, &source.name, source.backend.clone(), &dir)
                .numbered(index as u32 + 1, total)
                .with_data(album.track_data.get(track_id).cloned())
                .with_main_artist(&main_artist)
                .on_account(source.account_index);
            self.queue.add_track(job, task).await?;
        }

        tracing::info!(
            job_id = %job,
            album = %album.name,
            artist = %album.artist,
            tracks = total,
            "Queued album"
        );
        Ok(Some(album))
    }

    /// Queue every track of a playlist
    ///
    /// The playlist is resolved through `target`; its tracks are downloaded
    /// through `download_source` when given.
    pub async fn queue_playlist(
        &self,
        target: &mut Target,
        playlist_id: &str,
        request: &str,
        download_source: Option<&Source>,
    ) -> Result<Option<PlaylistInfo>> {
        let Some(playlist) = target.source.backend.playlist_info(playlist_id, None).await? else {
            tracing::warn!(backend = %target.source.name, playlist_id, "Playlist not found");
            return Ok(None);
        };

        let base = self.config.download.output_path.clone();
        let dir = self.collaborators.layout.playlist_dir(&base, &playlist);
        let source = download_source.unwrap_or(&target.source).clone();

        let job = match target.job {
            Some(job) => job,
            None => {
                let job = self
                    .queue
                    .create_job(NewJob {
                        original_request: request.to_string(),
                        kind: MediaKind::Playlist,
                        media_id: playlist_id.to_string(),
                        backend_name: source.name.clone(),
                        name: playlist.name.clone(),
                        artist: playlist.creator.clone(),
                        path: Some(dir.clone()),
                        cover_url: playlist.cover_url.clone(),
                    })
                    .await;
                target.job = Some(job);
                job
            }
        };

        if !self.config.download.dry_run {
            self.playlist_assets(&dir, &playlist).await;
        }

        let total = playlist.tracks.len() as u32;
        for (index, track_id) in playlist.tracks.iter().enumerate() {
            let task = TrackTask::new(track_id, &source.name, source.backend.clone(), &dir)
                .numbered(index as u32 + 1, total)
                .with_data(playlist.track_data.get(track_id).cloned())
                .on_account(source.account_index);
            self.queue.add_track(job, task).await?;
        }

        tracing::info!(
            job_id = %job,
            playlist = %playlist.name,
            creator = %playlist.creator,
            via = %source.name,
            tracks = total,
            "Queued playlist"
        );
        Ok(Some(playlist))
    }

    /// Queue an artist's albums and standalone tracks into one job
    pub async fn queue_artist(
        &self,
        target: &mut Target,
        artist_id: &str,
        request: &str,
    ) -> Result<Option<ArtistInfo>> {
        let credited = self.config.artist.return_credited_albums;
        let Some(artist) = target.source.backend.artist_info(artist_id, credited, None).await? else {
            tracing::warn!(backend = %target.source.name, artist_id, "Artist not found");
            return Ok(None);
        };

        let dir = self
            .config
            .download
            .output_path
            .join(sanitise_name(&artist.name));
        let job = match target.job {
            Some(job) => job,
            None => {
                let job = self
                    .queue
                    .create_job(NewJob {
                        original_request: request.to_string(),
                        kind: MediaKind::Artist,
                        media_id: artist_id.to_string(),
                        backend_name: target.source.name.clone(),
                        name: artist.name.clone(),
                        artist: artist.name.clone(),
                        path: Some(dir.clone()),
                        ..Default::default()
                    })
                    .await;
                target.job = Some(job);
                job
            }
        };
        let scope = ArtistScope {
            name: artist.name.clone(),
            dir: dir.clone(),
        };

        let mut album_tracks = HashSet::new();
        for album_id in &artist.albums {
            let data = artist.album_data.get(album_id);
            if let Some(album) = self.queue_album(target, album_id, "", data, Some(&scope)).await? {
                album_tracks.extend(album.tracks);
            }
        }

        let skip_known = self.config.artist.skip_standalone_tracks_in_albums;
        let source = &target.source;
        for track_id in &artist.tracks {
            if skip_known && album_tracks.contains(track_id) {
                tracing::debug!(track_id = %track_id, "Standalone track already queued with an album");
                continue;
            }
            let task = TrackTask::new(track_id, &source.name, source.backend.clone(), &dir)
                .with_data(artist.track_data.get(track_id).cloned())
                .with_main_artist(&artist.name)
                .on_account(source.account_index);
            self.queue.add_track(job, task).await?;
        }

        let queued = self.queue.job_progress(job).await.total;
        tracing::info!(
            job_id = %job,
            artist = %artist.name,
            albums = artist.albums.len(),
            tracks = queued,
            "Queued artist"
        );
        Ok(Some(artist))
    }
}
