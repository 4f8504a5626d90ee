use crate::error::ForensicError;
use crate::forensic::media::{self, MediaRef};
use crate::forensic::pages::Page;
use crate::forensic::paths::CaseLayout;
use crate::forensic::util::{now_rfc3339, sha256_hex};
use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Segment {
    #[serde(rename = "segment_id")]
    pub id: u32,
    pub page_range: (u32, u32),
    pub pages: Vec<u32>,
    pub text: String,
    /// Characters of page content, excluding page headers.
    pub char_count: usize,
    #[serde(default)]
    pub media_refs: Vec<MediaRef>,
    pub fingerprint: String,
}

impl Segment {
    pub fn token_estimate(&self) -> usize {
        self.char_count / 4
    }
}

#[derive(Debug, Clone, Default)]
pub struct SegmentOptions<'a> {
    pub max_chars: usize,
    pub media: bool,
    pub media_root: Option<&'a Path>,
}

#[derive(Default)]
struct Buffer {
    text: String,
    pages: Vec<u32>,
    char_count: usize,
    media_refs: Vec<MediaRef>,
}

impl Buffer {
    fn is_empty(&self) -> bool {
        self.pages.is_empty()
    }

    fn push(&mut self, page: &Page, char_count: usize, refs: Vec<MediaRef>) {
        self.text
            .push_str(&format!("\n\n--- PAGE {} ---\n\n{}", page.page_number, page.text));
        self.pages.push(page.page_number);
        self.char_count += char_count;
        media::merge_unique(&mut self.media_refs, refs);
    }

    fn freeze(self, id: u32) -> Segment {
        let first = self.pages.first().copied().unwrap_or_default();
        let last = self.pages.last().copied().unwrap_or_default();
        Segment {
            id,
            page_range: (first, last),
            fingerprint: sha256_hex(&self.text),
            pages: self.pages,
            text: self.text,
            char_count: self.char_count,
            media_refs: self.media_refs,
        }
    }
}

/// Greedy page packing: a page is never split, so a single oversized page becomes its own segment.
pub fn segment_pages(pages: &[Page], opts: &SegmentOptions<'_>) -> Vec<Segment> {
    let mut segments = Vec::new();
    let mut buffer = Buffer::default();

    for page in pages {
        let page_chars = page.text.chars().count();
        let refs = if opts.media {
            media::find_media_refs(&page.text, opts.media_root)
        } else {
            Vec::new()
        };

        if !buffer.is_empty() && buffer.char_count + page_chars > opts.max_chars {
            let done = std::mem::take(&mut buffer);
            segments.push(done.freeze(segments.len() as u32 + 1));
        }
        buffer.push(page, page_chars, refs);
    }

    if !buffer.is_empty() {
        segments.push(buffer.freeze(segments.len() as u32 + 1));
    }
    segments
}

#[derive(Debug, Serialize, Deserialize)]
struct SegmentFile {
    #[serde(flatten)]
    segment: Segment,
    total_segments: u32,
    token_estimate: usize,
    #[serde(default)]
    source: String,
    #[serde(default)]
    created_at: String,
}

fn clear_segment_files(layout: &CaseLayout) -> Result<()> {
    if !layout.segments_dir.exists() {
        return Ok(());
    }
    for entry in fs::read_dir(&layout.segments_dir)? {
        let path = entry?.path();
        let is_segment = path
            .file_name()
            .and_then(|n| n.to_str())
            .is_some_and(|n| n.starts_with("segment_") && n.ends_with(".json"));
        if is_segment {
            fs::remove_file(&path)
                .with_context(|| format!("failed to remove {}", path.display()))?;
        }
    }
    Ok(())
}

/// Replaces any previous segmentation of the case with `segments`.
pub fn save_segments(layout: &CaseLayout, segments: &[Segment], source: &str) -> Result<()> {
    fs::create_dir_all(&layout.segments_dir)
        .with_context(|| format!("failed to create {}", layout.segments_dir.display()))?;
    clear_segment_files(layout)?;

    let created_at = now_rfc3339();
    let total = segments.len() as u32;
    for segment in segments {
        let file = SegmentFile {
            segment: segment.clone(),
            total_segments: total,
            token_estimate: segment.token_estimate(),
            source: source.to_string(),
            created_at: created_at.clone(),
        };
        let path = layout.segment_file(segment.id);
        let data = serde_json::to_string_pretty(&file)?;
        fs::write(&path, format!("{data}\n"))
            .with_context(|| format!("failed to write {}", path.display()))?;
    }
    Ok(())
}

pub fn load_segments(layout: &CaseLayout) -> Result<Vec<Segment>> {
    let mut segments = Vec::new();
    if layout.segments_dir.exists() {
        for entry in fs::read_dir(&layout.segments_dir)? {
            let path = entry?.path();
            let is_segment = path
                .file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| n.starts_with("segment_") && n.ends_with(".json"));
            if !is_segment {
                continue;
            }
            let raw = fs::read_to_string(&path)
                .with_context(|| format!("failed to read {}", path.display()))?;
            let file: SegmentFile = serde_json::from_str(&raw)
                .with_context(|| format!("failed to parse {}", path.display()))?;
            segments.push(file.segment);
        }
    }
    if segments.is_empty() {
        return Err(anyhow!(ForensicError::NoSegments(
            layout.segments_dir.display().to_string()
        )));
    }
    segments.sort_by_key(|s| s.id);
    Ok(segments)
}
