use crate::error::ForensicError;
use crate::forensic::paths::CaseLayout;
use crate::forensic::segment::Segment;
use crate::forensic::util::now_rfc3339;
use anyhow::{Context, Result, anyhow};
use fs2::FileExt;
use serde::{Deserialize, Serialize};
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::Path;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SegmentAnalysis {
    pub segment_id: u32,
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnalysisMeta {
    pub segment_id: u32,
    pub fingerprint: String,
    pub provider: String,
    pub model: String,
    #[serde(default)]
    pub failed: bool,
    #[serde(default)]
    pub written_at: String,
}

/// Held for the lifetime of a writing run; released on drop.
pub struct StoreLock {
    file: File,
}

impl Drop for StoreLock {
    fn drop(&mut self) {
        let _ = self.file.unlock();
    }
}

/// Analysis records keyed by segment id. Only the analyzer writes here.
#[derive(Debug, Clone)]
pub struct AnalysisStore {
    layout: CaseLayout,
}

fn write_atomic(dir: &Path, target: &Path, contents: &str) -> Result<()> {
    let mut tmp = tempfile::NamedTempFile::new_in(dir)
        .with_context(|| format!("failed to create temp file in {}", dir.display()))?;
    tmp.write_all(contents.as_bytes())?;
    tmp.flush()?;
    tmp.persist(target)
        .map_err(|err| anyhow!("failed to persist {}: {}", target.display(), err.error))?;
    Ok(())
}

impl AnalysisStore {
    pub fn new(layout: &CaseLayout) -> Self {
        Self {
            layout: layout.clone(),
        }
    }

    pub fn lock(&self) -> Result<StoreLock> {
        fs::create_dir_all(&self.layout.analyses_dir).with_context(|| {
            format!("failed to create {}", self.layout.analyses_dir.display())
        })?;
        let path = self.layout.analysis_lock_file();
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(false)
            .open(&path)
            .with_context(|| format!("failed to open lock {}", path.display()))?;
        file.try_lock_exclusive()
            .map_err(|_| anyhow!(ForensicError::StoreLocked(path.display().to_string())))?;
        Ok(StoreLock { file })
    }

    /// Text first, then metadata; each file is replaced atomically.
    pub fn write(&self, segment_id: u32, text: &str, meta: &AnalysisMeta) -> Result<()> {
        let dir = &self.layout.analyses_dir;
        fs::create_dir_all(dir).with_context(|| format!("failed to create {}", dir.display()))?;
        write_atomic(dir, &self.layout.analysis_file(segment_id), text)?;

        let mut meta = meta.clone();
        meta.segment_id = segment_id;
        if meta.written_at.is_empty() {
            meta.written_at = now_rfc3339();
        }
        let data = serde_json::to_string_pretty(&meta)?;
        write_atomic(
            dir,
            &self.layout.analysis_meta_file(segment_id),
            &format!("{data}\n"),
        )
    }

    pub fn read(&self, segment_id: u32) -> Result<Option<String>> {
        let path = self.layout.analysis_file(segment_id);
        if !path.is_file() {
            return Ok(None);
        }
        let text =
            fs::read_to_string(&path).with_context(|| format!("failed to read {}", path.display()))?;
        Ok(Some(text))
    }

    /// Missing or unreadable metadata reads as `None`.
    pub fn read_meta(&self, segment_id: u32) -> Option<AnalysisMeta> {
        let raw = fs::read_to_string(self.layout.analysis_meta_file(segment_id)).ok()?;
        serde_json::from_str(&raw).ok()
    }

    pub fn ids(&self) -> Result<Vec<u32>> {
        let mut ids = Vec::new();
        if !self.layout.analyses_dir.exists() {
            return Ok(ids);
        }
        for entry in fs::read_dir(&self.layout.analyses_dir)? {
            let path = entry?.path();
            let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            if let Some(id) = name
                .strip_prefix("analysis_")
                .and_then(|rest| rest.strip_suffix(".txt"))
                .and_then(|digits| digits.parse::<u32>().ok())
            {
                ids.push(id);
            }
        }
        ids.sort_unstable();
        Ok(ids)
    }

    /// Analyses of `segments`, in their order, plus the ids with no usable record.
    /// A record written for different segment text counts as missing.
    pub fn load_current(&self, segments: &[Segment]) -> Result<(Vec<SegmentAnalysis>, Vec<u32>)> {
        let mut found = Vec::new();
        let mut missing = Vec::new();
        for segment in segments {
            let stale = self
                .read_meta(segment.id)
                .is_some_and(|meta| meta.fingerprint != segment.fingerprint);
            match self.read(segment.id)? {
                Some(text) if !stale => found.push(SegmentAnalysis {
                    segment_id: segment.id,
                    text,
                }),
                _ => missing.push(segment.id),
            }
        }
        Ok((found, missing))
    }
}
