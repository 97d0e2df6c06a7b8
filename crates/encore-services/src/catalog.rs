//! Publisher media catalog.
//!
//! Walks the media directory, asks a [`TagReader`] for each audio file's
//! tags and groups the resulting songs by artist. Files without an artist
//! tag are skipped; they could never be looked up.
//!
//! Publishers read the tags embedded in the audio file ([`EmbeddedTags`])
//! and consult a JSON sidecar ([`SidecarTags`]) only for files that carry
//! no usable tags of their own.

use std::borrow::Cow;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use lofty::prelude::{Accessor, TaggedFileExt};
use serde::Deserialize;

use encore_core::{ArtistName, SongInfo};

/// Extensions treated as audio. Matched case-insensitively.
pub const AUDIO_EXTENSIONS: &[&str] = &["mp3", "flac", "wav", "ogg", "m4a", "opus"];

#[derive(Debug, thiserror::Error)]
pub enum CatalogError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("bad tags for {path}: {reason}")]
    Tags { path: PathBuf, reason: String },
}

/// Tag fields the catalog cares about. Any of them may be missing.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct TrackTags {
    pub title: Option<String>,
    pub artist: Option<String>,
    pub album: Option<String>,
    pub genre: Option<String>,
}

/// Source of tag data for one media file.
pub trait TagReader: Send + Sync {
    fn read_tags(&self, path: &Path) -> Result<TrackTags, CatalogError>;
}

/// Reads ID3v2, Vorbis comments, MP4 atoms, RIFF INFO and the other
/// formats lofty understands, straight from the audio file.
#[derive(Debug, Clone, Copy, Default)]
pub struct EmbeddedTags;

impl TagReader for EmbeddedTags {
    fn read_tags(&self, path: &Path) -> Result<TrackTags, CatalogError> {
        let file = lofty::read_from_path(path).map_err(|e| CatalogError::Tags {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
        let Some(tag) = file.primary_tag().or_else(|| file.first_tag()) else {
            return Ok(TrackTags::default());
        };

        Ok(TrackTags {
            title: tag_text(tag.title()),
            artist: tag_text(tag.artist()),
            album: tag_text(tag.album()),
            genre: tag_text(tag.genre()),
        })
    }
}

fn tag_text(value: Option<Cow<'_, str>>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Asks `primary` first and `fallback` only when `primary` fails or finds
/// no artist.
#[derive(Debug, Clone, Copy, Default)]
pub struct FallbackTags<P, F> {
    primary: P,
    fallback: F,
}

impl<P: TagReader, F: TagReader> FallbackTags<P, F> {
    pub fn new(primary: P, fallback: F) -> Self {
        Self { primary, fallback }
    }
}

impl<P: TagReader, F: TagReader> TagReader for FallbackTags<P, F> {
    fn read_tags(&self, path: &Path) -> Result<TrackTags, CatalogError> {
        match self.primary.read_tags(path) {
            Ok(tags) if tags.artist.as_deref().is_some_and(|a| !a.is_empty()) => Ok(tags),
            Ok(_) => self.fallback.read_tags(path),
            Err(e) => {
                tracing::debug!(error = %e, "falling back to secondary tag source");
                self.fallback.read_tags(path)
            }
        }
    }
}

/// Reads tags from a JSON file next to the media file: `song.mp3` is
/// described by `song.json`. A missing sidecar means no tags.
#[derive(Debug, Clone, Copy, Default)]
pub struct SidecarTags;

impl TagReader for SidecarTags {
    fn read_tags(&self, path: &Path) -> Result<TrackTags, CatalogError> {
        let sidecar = path.with_extension("json");
        let text = match fs::read_to_string(&sidecar) {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(TrackTags::default()),
            Err(source) => {
                return Err(CatalogError::Io {
                    path: sidecar,
                    source,
                })
            }
        };
        serde_json::from_str(&text).map_err(|e| CatalogError::Tags {
            path: sidecar,
            reason: e.to_string(),
        })
    }
}

/// Every song a publisher can serve, by artist.
#[derive(Debug, Clone, Default)]
pub struct Catalog {
    by_artist: BTreeMap<ArtistName, Vec<SongInfo>>,
}

impl Catalog {
    /// Scan `media_dir` recursively.
    ///
    /// Only an unreadable `media_dir` itself is an error. Unreadable
    /// subdirectories and files with broken tags are logged and skipped.
    pub fn load(
        media_dir: &Path,
        chunk_size: usize,
        tags: &dyn TagReader,
    ) -> Result<Self, CatalogError> {
        let mut files = Vec::new();
        collect_audio_files(media_dir, &mut files).map_err(|source| CatalogError::Io {
            path: media_dir.to_path_buf(),
            source,
        })?;
        files.sort();

        let mut songs = Vec::with_capacity(files.len());
        for path in files {
            match song_from_file(&path, chunk_size, tags) {
                Ok(Some(song)) => songs.push(song),
                Ok(None) => tracing::debug!(path = %path.display(), "no artist tag, skipping"),
                Err(e) => tracing::warn!(error = %e, "skipping file"),
            }
        }

        let catalog = Self::from_songs(songs);
        tracing::info!(
            dir = %media_dir.display(),
            artists = catalog.by_artist.len(),
            songs = catalog.song_count(),
            "catalog loaded"
        );
        Ok(catalog)
    }

    pub fn from_songs(songs: impl IntoIterator<Item = SongInfo>) -> Self {
        let mut by_artist: BTreeMap<ArtistName, Vec<SongInfo>> = BTreeMap::new();
        for song in songs {
            by_artist.entry(song.artist.clone()).or_default().push(song);
        }
        Self { by_artist }
    }

    /// Artists in name order.
    pub fn artists(&self) -> Vec<ArtistName> {
        self.by_artist.keys().cloned().collect()
    }

    /// Songs of one artist. Exact, case-sensitive match.
    pub fn songs_of(&self, artist: &ArtistName) -> Option<&[SongInfo]> {
        self.by_artist.get(artist).map(Vec::as_slice)
    }

    pub fn song_count(&self) -> usize {
        self.by_artist.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.by_artist.is_empty()
    }
}

fn is_hidden(path: &Path) -> bool {
    path.file_name()
        .map_or(false, |n| n.to_string_lossy().starts_with('.'))
}

fn is_audio(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map_or(false, |ext| {
            AUDIO_EXTENSIONS.iter().any(|a| a.eq_ignore_ascii_case(ext))
        })
}

fn collect_audio_files(dir: &Path, out: &mut Vec<PathBuf>) -> std::io::Result<()> {
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        if is_hidden(&path) {
            continue;
        }
        if path.is_dir() {
            if let Err(e) = collect_audio_files(&path, out) {
                tracing::warn!(dir = %path.display(), error = %e, "cannot read directory");
            }
        } else if is_audio(&path) {
            out.push(path);
        }
    }
    Ok(())
}

fn song_from_file(
    path: &Path,
    chunk_size: usize,
    tags: &dyn TagReader,
) -> Result<Option<SongInfo>, CatalogError> {
    let tags = tags.read_tags(path)?;
    let Some(artist) = tags.artist.filter(|a| !a.is_empty()) else {
        return Ok(None);
    };

    let size = fs::metadata(path)
        .map_err(|source| CatalogError::Io {
            path: path.to_path_buf(),
            source,
        })?
        .len();
    let chunk_size = chunk_size.max(1) as u64;

    let title = tags.title.unwrap_or_else(|| {
        path.file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default()
    });

    Ok(Some(SongInfo {
        title,
        artist: ArtistName::new(artist),
        album: tags.album.unwrap_or_default(),
        genre: tags.genre.unwrap_or_default(),
        path: path.to_string_lossy().into_owned(),
        total_chunks: size.div_ceil(chunk_size) as u32,
    }))
}
