//! Splitting media files into fixed-size chunks.
//!
//! Part `i` of a song is bytes `[i * chunk_size, min((i + 1) * chunk_size, len))`
//! of its file. [`ChunkStore`] serves parts either by mapping the file and
//! copying out one range, or from a per-song list split once and kept in
//! memory.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use dashmap::DashMap;
use memmap2::Mmap;

use encore_core::{Mp3Chunk, SongInfo};

#[derive(Debug, thiserror::Error)]
pub enum ChunkError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("part {part} out of range, song has {total} parts")]
    OutOfRange { part: u32, total: u32 },
}

fn io_error(path: &Path) -> impl FnOnce(std::io::Error) -> ChunkError + '_ {
    move |source| ChunkError::Io {
        path: path.to_path_buf(),
        source,
    }
}

fn part_count(len: usize, chunk_size: usize) -> u32 {
    len.div_ceil(chunk_size) as u32
}

/// Read the whole file and cut it into parts, in order.
pub fn split_into_chunks(song: &SongInfo, chunk_size: usize) -> Result<Vec<Mp3Chunk>, ChunkError> {
    let chunk_size = chunk_size.max(1);
    let path = Path::new(&song.path);
    let bytes = fs::read(path).map_err(io_error(path))?;

    Ok(bytes
        .chunks(chunk_size)
        .enumerate()
        .map(|(part, data)| Mp3Chunk {
            song: song.clone(),
            part: part as u32,
            data: data.to_vec(),
        })
        .collect())
}

/// Read one part by mapping the file and copying out its byte range.
pub fn read_chunk(song: &SongInfo, part: u32, chunk_size: usize) -> Result<Mp3Chunk, ChunkError> {
    let chunk_size = chunk_size.max(1);
    let path = Path::new(&song.path);
    let file = fs::File::open(path).map_err(io_error(path))?;
    let len = file.metadata().map_err(io_error(path))?.len() as usize;

    let total = part_count(len, chunk_size);
    if part >= total {
        return Err(ChunkError::OutOfRange { part, total });
    }

    // Safety: read-only mapping, never mutated. A concurrent truncation of
    // the media file is outside what a publisher supports.
    let mmap = unsafe { Mmap::map(&file).map_err(io_error(path))? };

    let start = part as usize * chunk_size;
    let end = (start + chunk_size).min(mmap.len());
    Ok(Mp3Chunk {
        song: song.clone(),
        part,
        data: mmap[start..end].to_vec(),
    })
}

/// Where a publisher's chunks come from.
pub struct ChunkStore {
    chunk_size: usize,
    precompute: bool,
    /// Songs already split, keyed by file path.
    split: DashMap<String, Arc<Vec<Mp3Chunk>>>,
}

impl ChunkStore {
    /// `precompute = true` splits a song on its first request and answers
    /// every later part from memory.
    pub fn new(chunk_size: usize, precompute: bool) -> Self {
        Self {
            chunk_size: chunk_size.max(1),
            precompute,
            split: DashMap::new(),
        }
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    /// Fetch one part of `song`. Blocking file I/O.
    pub fn get(&self, song: &SongInfo, part: u32) -> Result<Mp3Chunk, ChunkError> {
        if !self.precompute {
            return read_chunk(song, part, self.chunk_size);
        }

        let chunks = match self.split.get(&song.path) {
            Some(hit) => hit.clone(),
            None => {
                let chunks = Arc::new(split_into_chunks(song, self.chunk_size)?);
                tracing::debug!(path = %song.path, parts = chunks.len(), "song split and cached");
                self.split.insert(song.path.clone(), chunks.clone());
                chunks
            }
        };

        chunks
            .get(part as usize)
            .map(|chunk| Mp3Chunk {
                song: song.clone(),
                ..chunk.clone()
            })
            .ok_or(ChunkError::OutOfRange {
                part,
                total: chunks.len() as u32,
            })
    }

    /// Number of songs held in memory.
    pub fn cached_songs(&self) -> usize {
        self.split.len()
    }
}
