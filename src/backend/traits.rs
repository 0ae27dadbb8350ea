//! Traits and types for service backends

use async_trait::async_trait;
use serde_json::{Map, Value};
use std::path::Path;
use std::sync::Arc;

use crate::config::{CodecPreferences, Config};
use crate::error::{Error, Result};
use crate::models::{
    AlbumInfo, ArtistInfo, CoverInfo, CoverOptions, CreditsInfo, LyricsInfo, PlaylistInfo,
    Quality, SearchResult, TrackDownload, TrackInfo,
};
use crate::types::{Capability, MediaKind};

/// Static description of a backend
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackendDescriptor {
    /// Display name of the service
    pub service_name: String,
    /// Declared capabilities, checked before any call
    pub capabilities: Capability,
    /// Hosts whose URLs this backend resolves (e.g. "open.example.com")
    pub service_hosts: Vec<String>,
    /// Private backends win host conflicts against public ones
    pub private: bool,
}

impl BackendDescriptor {
    /// Public backend without service hosts
    pub fn new(service_name: impl Into<String>, capabilities: Capability) -> Self {
        Self {
            service_name: service_name.into(),
            capabilities,
            service_hosts: Vec::new(),
            private: false,
        }
    }

    /// Add a service host
    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.service_hosts.push(host.into());
        self
    }

    /// Mark the backend as private
    pub fn private(mut self) -> Self {
        self.private = true;
        self
    }
}

/// Everything a backend instance is built from
#[derive(Debug, Clone)]
pub struct BackendContext {
    /// Name the backend is registered under
    pub backend_name: String,
    /// Account the instance is bound to
    pub account_index: usize,
    /// Account settings (credentials, regions, ...)
    pub settings: Map<String, Value>,
    /// Shared library configuration
    pub config: Arc<Config>,
}

/// Quality and codec preferences for a track metadata lookup
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TrackQuery {
    /// Requested quality tier
    pub quality: Quality,
    /// Codec preferences
    pub codecs: CodecPreferences,
}

/// A streaming service plugin
///
/// The orchestrator only calls methods whose capability the backend declares
/// in its [`BackendDescriptor`]. Metadata lookups return `Ok(None)` when the
/// service reports the item as missing; [`Error::RegionRestricted`] triggers
/// failover to the next configured account.
#[async_trait]
pub trait Backend: Send + Sync {
    /// Resolve track metadata, reusing `data` pre-fetched by a parent lookup when present
    async fn track_info(
        &self,
        track_id: &str,
        query: &TrackQuery,
        data: Option<&Value>,
    ) -> Result<Option<TrackInfo>>;

    /// Produce a download descriptor for a track that will be stored at `target`
    async fn track_download(
        &self,
        track_id: &str,
        info: &TrackInfo,
        target: &Path,
    ) -> Result<TrackDownload>;

    /// Resolve album metadata
    async fn album_info(&self, album_id: &str, data: Option<&Value>) -> Result<Option<AlbumInfo>> {
        let _ = (album_id, data);
        Err(Error::NotSupported("album lookup".into()))
    }

    /// Resolve playlist metadata
    async fn playlist_info(
        &self,
        playlist_id: &str,
        data: Option<&Value>,
    ) -> Result<Option<PlaylistInfo>> {
        let _ = (playlist_id, data);
        Err(Error::NotSupported("playlist lookup".into()))
    }

    /// Resolve an artist discography
    async fn artist_info(
        &self,
        artist_id: &str,
        credited_albums: bool,
        data: Option<&Value>,
    ) -> Result<Option<ArtistInfo>> {
        let _ = (artist_id, credited_albums, data);
        Err(Error::NotSupported("artist lookup".into()))
    }

    /// Free-text search; `hint` carries the track being matched, if any
    async fn search(
        &self,
        kind: MediaKind,
        query: &str,
        hint: Option<&TrackInfo>,
    ) -> Result<Vec<SearchResult>> {
        let _ = (kind, query, hint);
        Ok(Vec::new())
    }

    /// Cover rendition for a track
    async fn track_cover(
        &self,
        track_id: &str,
        options: &CoverOptions,
        data: Option<&Value>,
    ) -> Result<Option<CoverInfo>> {
        let _ = (track_id, options, data);
        Ok(None)
    }

    /// Lyrics for a track
    async fn track_lyrics(&self, track_id: &str, data: Option<&Value>) -> Result<LyricsInfo> {
        let _ = (track_id, data);
        Ok(LyricsInfo::default())
    }

    /// Credits for a track
    async fn track_credits(
        &self,
        track_id: &str,
        data: Option<&Value>,
    ) -> Result<Vec<CreditsInfo>> {
        let _ = (track_id, data);
        Ok(Vec::new())
    }

    /// Release sessions and connections
    async fn close(&self) -> Result<()> {
        Ok(())
    }
}

/// Builds backend instances, one per configured account
#[async_trait]
pub trait BackendFactory: Send + Sync {
    /// Static description of the backends this factory builds
    fn descriptor(&self) -> BackendDescriptor;

    /// Build and authenticate an instance for one account
    async fn create(&self, context: BackendContext) -> Result<Arc<dyn Backend>>;
}
