//! Side assets stored next to album and playlist tracks
//!
//! Covers, animated covers, booklets and descriptions are best-effort: a
//! failed asset is logged and never fails population. Existing files are
//! left untouched.

use std::collections::HashMap;
use std::path::Path;

use super::Downloader;
use crate::models::{AlbumInfo, PlaylistInfo};

/// Asset locations shared by albums and playlists
struct SideAssets<'a> {
    cover_url: Option<&'a str>,
    animated_cover_url: Option<&'a str>,
    booklet_url: Option<&'a str>,
    description: Option<&'a str>,
}

impl Downloader {
    /// Store album cover, animated cover, booklet and description in `dir`
    pub(crate) async fn album_assets(&self, dir: &Path, album: &AlbumInfo) {
        self.save_assets(
            dir,
            SideAssets {
                cover_url: album.cover_url.as_deref(),
                animated_cover_url: album.animated_cover_url.as_deref(),
                booklet_url: album.booklet_url.as_deref(),
                description: album.description.as_deref(),
            },
        )
        .await;
    }

    /// Store playlist cover, animated cover and description in `dir`
    pub(crate) async fn playlist_assets(&self, dir: &Path, playlist: &PlaylistInfo) {
        self.save_assets(
            dir,
            SideAssets {
                cover_url: playlist.cover_url.as_deref(),
                animated_cover_url: playlist.animated_cover_url.as_deref(),
                booklet_url: None,
                description: playlist.description.as_deref(),
            },
        )
        .await;
    }

    async fn save_assets(&self, dir: &Path, assets: SideAssets<'_>) {
        let covers = &self.config.covers;

        if covers.save_external
            && let Some(url) = assets.cover_url
        {
            let name = format!("cover.{}", covers.external_format.extension());
            self.fetch_asset(url, &dir.join(name)).await;
        }

        if covers.save_animated_cover
            && let Some(url) = assets.animated_cover_url
        {
            self.fetch_asset(url, &dir.join("cover_animated.mp4")).await;
        }

        if let Some(url) = assets.booklet_url {
            self.fetch_asset(url, &dir.join("Booklet.pdf")).await;
        }

        if let Some(text) = assets.description {
            let path = dir.join("description.txt");
            if let Err(e) = write_new(&path, text).await {
                tracing::warn!(path = %path.display(), error = %e, "Failed to write description");
            }
        }
    }

    async fn fetch_asset(&self, url: &str, dest: &Path) {
        let transfer = &self.collaborators.transfer;
        match transfer.download_missing(url, &HashMap::new(), dest).await {
            Ok(()) => tracing::debug!(path = %dest.display(), "Saved asset"),
            Err(e) => tracing::warn!(path = %dest.display(), url, error = %e, "Failed to save asset"),
        }
    }
}

async fn write_new(path: &Path, text: &str) -> std::io::Result<()> {
    if tokio::fs::try_exists(path).await? {
        return Ok(());
    }
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    tokio::fs::write(path, text).await
}
