//! Output layout: where albums, playlists and tracks land on disk
//!
//! A [`PathBuilder`] turns metadata into directories and file stems (paths
//! without extension). [`TemplatePathBuilder`] renders the `{placeholder}`
//! templates from [`FormattingConfig`]. Whatever builder is plugged in, the
//! downloader goes through [`Layout`], which replaces a failing template with
//! a fixed safe layout and caps every final component at
//! [`NAME_BYTE_LIMIT`] bytes.

use regex::Regex;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, LazyLock};

use crate::config::FormattingConfig;
use crate::error::{ConfigError, Result};
use crate::models::{AlbumInfo, PlaylistInfo, TrackInfo};
use crate::utils::{NAME_BYTE_LIMIT, fix_byte_limit, sanitise_name};

#[allow(clippy::expect_used)]
static PLACEHOLDER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\{(\w+)\}").expect("placeholder pattern is valid"));

/// How a track is laid out relative to its directory
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TrackLayout {
    /// A track requested on its own, placed directly under the base path
    Single,
    /// A track inside an album, playlist or artist directory
    Album,
}

/// Computes output locations from metadata
pub trait PathBuilder: Send + Sync {
    /// Directory for an album
    fn album_dir(&self, base: &Path, album_id: &str, album: &AlbumInfo) -> Result<PathBuf>;

    /// Directory for a playlist
    fn playlist_dir(&self, base: &Path, playlist: &PlaylistInfo) -> Result<PathBuf>;

    /// Track file path without extension
    fn track_stem(&self, dir: &Path, track: &TrackInfo, layout: TrackLayout) -> Result<PathBuf>;
}

/// Renders the layout templates of a [`FormattingConfig`]
///
/// Placeholders are `{key}`; values are sanitised before substitution and
/// an unknown key is an error.
///
/// # Examples
///
/// ```
/// use melodl::config::FormattingConfig;
/// use melodl::layout::{PathBuilder, TemplatePathBuilder, TrackLayout};
/// use melodl::models::TrackInfo;
/// use std::path::Path;
///
/// let builder = TemplatePathBuilder::new(FormattingConfig::default());
/// let mut track = TrackInfo {
///     name: "Intro".into(),
///     artists: vec!["Band".into()],
///     ..Default::default()
/// };
/// track.tags.track_number = Some(3);
/// track.tags.total_tracks = Some(12);
///
/// let stem = builder
///     .track_stem(Path::new("/music/Band/Album"), &track, TrackLayout::Album)
///     .unwrap();
/// assert_eq!(stem, Path::new("/music/Band/Album/03. Intro"));
/// ```
#[derive(Debug, Clone, Default)]
pub struct TemplatePathBuilder {
    formatting: FormattingConfig,
}

impl TemplatePathBuilder {
    /// Builder for the given templates
    pub fn new(formatting: FormattingConfig) -> Self {
        Self { formatting }
    }
}

impl PathBuilder for TemplatePathBuilder {
    fn album_dir(&self, base: &Path, album_id: &str, album: &AlbumInfo) -> Result<PathBuf> {
        let values = album_values(album_id, album);
        let rendered = render("album_format", &self.formatting.album_format, &values)?;
        Ok(base.join(rendered))
    }

    fn playlist_dir(&self, base: &Path, playlist: &PlaylistInfo) -> Result<PathBuf> {
        let values = playlist_values(playlist);
        let rendered = render("playlist_format", &self.formatting.playlist_format, &values)?;
        Ok(base.join(rendered))
    }

    fn track_stem(&self, dir: &Path, track: &TrackInfo, layout: TrackLayout) -> Result<PathBuf> {
        let values = track_values(track, self.formatting.enable_zfill, zfill_width(track, layout));
        let force = self.formatting.force_album_format;

        if layout == TrackLayout::Single && !force {
            let name = render(
                "single_full_path_format",
                &self.formatting.single_full_path_format,
                &values,
            )?;
            return Ok(dir.join(name));
        }
        if track.tags.total_tracks == Some(1) && !force {
            let name = render(
                "single_full_path_format",
                &self.formatting.single_full_path_format,
                &values,
            )?;
            return Ok(dir.join(name));
        }

        let name = render(
            "track_filename_format",
            &self.formatting.track_filename_format,
            &values,
        )?;
        Ok(disc_dir(dir, track).join(name))
    }
}

/// Path builder with safe fallbacks, used by the downloader
#[derive(Clone)]
pub struct Layout {
    builder: Arc<dyn PathBuilder>,
    formatting: FormattingConfig,
}

impl Layout {
    /// Wrap `builder`; `formatting` supplies zero fill and forced album layout for fallbacks
    pub fn new(builder: Arc<dyn PathBuilder>, formatting: FormattingConfig) -> Self {
        Self {
            builder,
            formatting,
        }
    }

    /// Album directory, falling back to `<base>/<artist>/<name>[ [E]]`
    pub fn album_dir(&self, base: &Path, album_id: &str, album: &AlbumInfo) -> PathBuf {
        let path = self
            .builder
            .album_dir(base, album_id, album)
            .unwrap_or_else(|e| {
                tracing::warn!(album_id, error = %e, "Album layout failed, using safe layout");
                base.join(sanitise_name(&album.artist))
                    .join(format!("{}{}", sanitise_name(&album.name), explicit(album.explicit)))
            });
        fix_byte_limit(&path, NAME_BYTE_LIMIT)
    }

    /// Playlist directory, falling back to `<base>/<name>[ [E]]`
    pub fn playlist_dir(&self, base: &Path, playlist: &PlaylistInfo) -> PathBuf {
        let path = self.builder.playlist_dir(base, playlist).unwrap_or_else(|e| {
            tracing::warn!(playlist = %playlist.name, error = %e, "Playlist layout failed, using safe layout");
            base.join(format!(
                "{}{}",
                sanitise_name(&playlist.name),
                explicit(playlist.explicit)
            ))
        });
        fix_byte_limit(&path, NAME_BYTE_LIMIT)
    }

    /// Track stem (path without extension)
    pub fn track_stem(&self, dir: &Path, track: &TrackInfo, layout: TrackLayout) -> PathBuf {
        let path = self
            .builder
            .track_stem(dir, track, layout)
            .unwrap_or_else(|e| {
                tracing::warn!(track = %track.name, error = %e, "Track layout failed, using safe layout");
                self.safe_track_stem(dir, track, layout)
            });
        fix_byte_limit(&path, NAME_BYTE_LIMIT)
    }

    fn safe_track_stem(&self, dir: &Path, track: &TrackInfo, layout: TrackLayout) -> PathBuf {
        let values = track_values(track, self.formatting.enable_zfill, zfill_width(track, layout));
        let name = values.get("name").cloned().unwrap_or_default();
        let marker = explicit(track.explicit);
        let force = self.formatting.force_album_format;

        if layout == TrackLayout::Single && !force {
            let artist = values.get("artist").cloned().unwrap_or_default();
            return dir.join(artist).join(format!("{}{}", name, marker));
        }
        if track.tags.total_tracks == Some(1) && !force {
            return dir.join(format!("{}{}", name, marker));
        }
        let number = values.get("track_number").cloned().unwrap_or_default();
        disc_dir(dir, track).join(format!("{} - {}{}", number, name, marker))
    }
}

/// Substitute `{key}` placeholders; unknown keys are an error
fn render(setting: &str, template: &str, values: &HashMap<&'static str, String>) -> Result<String> {
    if let Some(missing) = PLACEHOLDER
        .captures_iter(template)
        .filter_map(|c| c.get(1))
        .find(|key| !values.contains_key(key.as_str()))
    {
        return Err(ConfigError::InvalidSetting {
            key: setting.to_string(),
            message: format!("unknown placeholder {{{}}}", missing.as_str()),
        }
        .into());
    }

    Ok(PLACEHOLDER
        .replace_all(template, |caps: &regex::Captures<'_>| {
            values.get(&caps[1]).cloned().unwrap_or_default()
        })
        .into_owned())
}

fn explicit(flag: bool) -> &'static str {
    if flag { " [E]" } else { "" }
}

fn disc_dir(dir: &Path, track: &TrackInfo) -> PathBuf {
    match (track.tags.total_discs, track.tags.disc_number) {
        (Some(total), Some(disc)) if total > 1 => dir.join(format!("CD {}", disc)),
        _ => dir.to_path_buf(),
    }
}

fn zfill_width(track: &TrackInfo, layout: TrackLayout) -> usize {
    match layout {
        TrackLayout::Single => 1,
        TrackLayout::Album => track
            .tags
            .total_tracks
            .map_or(1, |total| total.to_string().len()),
    }
}

/// First letter of an artist for `{artist_initials}`, ignoring a leading "The "
fn artist_initials(artist: &str) -> String {
    let lower = artist.to_lowercase();
    let trimmed = lower.strip_prefix("the ").unwrap_or(&lower);
    match trimmed.chars().next() {
        Some(c) if c.is_alphabetic() => c.to_uppercase().collect(),
        _ => "#".to_string(),
    }
}

fn opt<T: ToString>(value: &Option<T>) -> String {
    value
        .as_ref()
        .map(|v| sanitise_name(&v.to_string()))
        .unwrap_or_default()
}

fn album_values(album_id: &str, album: &AlbumInfo) -> HashMap<&'static str, String> {
    HashMap::from([
        ("id", album_id.to_string()),
        ("name", sanitise_name(&album.name)),
        ("artist", sanitise_name(&album.artist)),
        ("artist_initials", artist_initials(&album.artist)),
        ("release_year", opt(&album.release_year)),
        ("upc", opt(&album.upc)),
        (
            "quality",
            album
                .quality
                .as_ref()
                .map(|q| format!(" [{}]", sanitise_name(q)))
                .unwrap_or_default(),
        ),
        ("explicit", explicit(album.explicit).to_string()),
    ])
}

fn playlist_values(playlist: &PlaylistInfo) -> HashMap<&'static str, String> {
    HashMap::from([
        ("name", sanitise_name(&playlist.name)),
        ("creator", sanitise_name(&playlist.creator)),
        ("release_year", opt(&playlist.release_year)),
        ("explicit", explicit(playlist.explicit).to_string()),
    ])
}

fn track_values(track: &TrackInfo, zfill: bool, width: usize) -> HashMap<&'static str, String> {
    let number = |value: Option<u32>| -> String {
        match value {
            Some(n) if zfill => format!("{:0width$}", n, width = width),
            Some(n) => n.to_string(),
            None => String::new(),
        }
    };
    let tags = &track.tags;

    HashMap::from([
        ("name", sanitise_name(&track.name)),
        ("album", sanitise_name(&track.album)),
        ("album_id", sanitise_name(&track.album_id)),
        (
            "artist",
            track
                .artists
                .first()
                .map_or_else(|| "Unknown Artist".to_string(), |a| sanitise_name(a)),
        ),
        ("artists", sanitise_name(&track.artist_line())),
        ("album_artist", opt(&tags.album_artist)),
        ("composer", opt(&tags.composer)),
        ("track_number", number(tags.track_number)),
        ("total_tracks", number(tags.total_tracks)),
        ("disc_number", number(tags.disc_number)),
        ("total_discs", number(tags.total_discs)),
        ("release_year", opt(&track.release_year)),
        ("release_date", opt(&tags.release_date)),
        ("isrc", opt(&tags.isrc)),
        ("upc", opt(&tags.upc)),
        ("label", opt(&tags.label)),
        ("codec", track.codec.pretty_name().to_string()),
        ("explicit", explicit(track.explicit).to_string()),
    ])
}
