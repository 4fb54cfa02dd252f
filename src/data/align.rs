//! Joining keypoint recordings with translation rows.
//!
//! Both sides are keyed by [`canonicalize_with`]. The translation table is
//! folded into a map where a later row overwrites an earlier row with the same
//! canonical id; keypoint files without a translation are dropped. The result
//! keeps keypoint-file order.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use super::canonical::{DEFAULT_SUFFIXES, canonicalize_with};
use super::keypoints::{KeypointRecord, load_keypoint_record};
use crate::{Error, Result};

/// Where a sample's keypoints come from.
#[derive(Debug, Clone, PartialEq)]
pub enum KeypointSource {
    /// JSON file on disk, read on demand.
    File(PathBuf),
    /// Record already in memory.
    Inline(Arc<KeypointRecord>),
}

impl KeypointSource {
    pub fn load(&self) -> Result<KeypointRecord> {
        match self {
            Self::File(path) => load_keypoint_record(path),
            Self::Inline(record) => Ok(record.as_ref().clone()),
        }
    }
}

/// A keypoint recording as listed by the caller: its file name plus a handle.
#[derive(Debug, Clone, PartialEq)]
pub struct KeypointEntry {
    pub name: String,
    pub source: KeypointSource,
}

impl KeypointEntry {
    pub fn from_path(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        Self {
            name,
            source: KeypointSource::File(path),
        }
    }

    pub fn inline(name: impl Into<String>, record: KeypointRecord) -> Self {
        Self {
            name: name.into(),
            source: KeypointSource::Inline(Arc::new(record)),
        }
    }
}

/// One aligned training example.
#[derive(Debug, Clone, PartialEq)]
pub struct Sample {
    pub video_id: String,
    pub keypoint_source: KeypointSource,
    pub translation: String,
}

/// Counts reported after alignment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AlignmentReport {
    pub keypoint_files: usize,
    /// Distinct canonical ids in the translation map.
    pub translations: usize,
    pub matched: usize,
}

/// Joins keypoint entries against translation rows by canonical id.
#[derive(Debug, Clone)]
pub struct Aligner {
    suffixes: Vec<String>,
}

impl Default for Aligner {
    fn default() -> Self {
        Self::new(DEFAULT_SUFFIXES.iter().map(|s| s.to_string()).collect())
    }
}

impl Aligner {
    pub fn new(suffixes: Vec<String>) -> Self {
        Self { suffixes }
    }

    pub fn canonicalize(&self, name: &str) -> String {
        canonicalize_with(name, &self.suffixes)
    }

    /// Canonical id → translation (last column). Rows with fewer than two
    /// columns are skipped; duplicates keep the last row.
    pub fn translation_map<R: AsRef<[String]>>(&self, rows: &[R]) -> HashMap<String, String> {
        let mut map = HashMap::with_capacity(rows.len());
        let mut skipped = 0usize;
        for row in rows {
            let row = row.as_ref();
            match (row.first(), row.last()) {
                (Some(raw_id), Some(translation)) if row.len() >= 2 => {
                    map.insert(self.canonicalize(raw_id), translation.clone());
                }
                _ => skipped += 1,
            }
        }
        if skipped > 0 {
            tracing::warn!("skipped {skipped} translation rows with fewer than 2 columns");
        }
        map
    }

    /// Align keypoint entries with translation rows.
    ///
    /// Returns [`Error::NoSamples`] when nothing matches.
    pub fn align<R: AsRef<[String]>>(
        &self,
        keypoints: &[KeypointEntry],
        rows: &[R],
    ) -> Result<(Vec<Sample>, AlignmentReport)> {
        let translations = self.translation_map(rows);

        let samples: Vec<Sample> = keypoints
            .iter()
            .filter_map(|entry| {
                let video_id = self.canonicalize(&entry.name);
                translations.get(&video_id).map(|translation| Sample {
                    video_id,
                    keypoint_source: entry.source.clone(),
                    translation: translation.clone(),
                })
            })
            .collect();

        let report = AlignmentReport {
            keypoint_files: keypoints.len(),
            translations: translations.len(),
            matched: samples.len(),
        };
        tracing::info!(
            keypoint_files = report.keypoint_files,
            translations = report.translations,
            matched = report.matched,
            "data alignment: matched {} files out of {}",
            report.matched,
            report.keypoint_files
        );

        if samples.is_empty() {
            return Err(Error::NoSamples {
                keypoint_files: report.keypoint_files,
                translations: report.translations,
            });
        }
        Ok((samples, report))
    }

    /// Align every `*.json` keypoint file under `dir` against every `*.csv`
    /// table under `dir` (tables read in sorted path order).
    pub fn align_directory(&self, dir: impl AsRef<Path>) -> Result<(Vec<Sample>, AlignmentReport)> {
        let dir = dir.as_ref();
        let keypoints: Vec<KeypointEntry> = scan_files(dir, "json")?
            .into_iter()
            .map(KeypointEntry::from_path)
            .collect();
        let rows = read_translation_tables(dir)?;
        self.align(&keypoints, &rows)
    }
}

// ---------------------------------------------------------------------------
// Filesystem helpers
// ---------------------------------------------------------------------------

/// Recursively list files with extension `ext` (case-insensitive), sorted.
pub fn scan_files(dir: impl AsRef<Path>, ext: &str) -> Result<Vec<PathBuf>> {
    let mut found = Vec::new();
    let mut pending = vec![dir.as_ref().to_path_buf()];
    while let Some(current) = pending.pop() {
        for entry in std::fs::read_dir(&current)? {
            let path = entry?.path();
            if path.is_dir() {
                pending.push(path);
            } else if path
                .extension()
                .and_then(|e| e.to_str())
                .is_some_and(|e| e.eq_ignore_ascii_case(ext))
            {
                found.push(path);
            }
        }
    }
    found.sort();
    Ok(found)
}

/// Read a translation CSV (header row skipped); rows may have any width.
pub fn read_translation_table(path: impl AsRef<Path>) -> Result<Vec<Vec<String>>> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .from_path(path)?;
    let mut rows = Vec::new();
    for record in reader.records() {
        let record = record?;
        rows.push(record.iter().map(str::to_string).collect());
    }
    Ok(rows)
}

/// All rows of every `*.csv` under `dir`, in sorted file order.
pub fn read_translation_tables(dir: impl AsRef<Path>) -> Result<Vec<Vec<String>>> {
    let mut rows = Vec::new();
    for path in scan_files(dir, "csv")? {
        rows.extend(read_translation_table(&path)?);
    }
    Ok(rows)
}
