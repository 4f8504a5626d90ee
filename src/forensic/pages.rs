use crate::error::ForensicError;
use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Page {
    pub page_number: u32,
    pub text: String,
}

fn pages_from_texts<I>(texts: I) -> Vec<Page>
where
    I: IntoIterator<Item = String>,
{
    texts
        .into_iter()
        .enumerate()
        .map(|(idx, text)| Page {
            page_number: idx as u32 + 1,
            text,
        })
        .collect()
}

/// Plain text exports separate pages with form feeds.
pub fn pages_from_plain_text(raw: &str) -> Vec<Page> {
    let mut parts: Vec<String> = raw.split('\x0c').map(str::to_string).collect();
    if parts.len() > 1 && parts.last().is_some_and(|p| p.trim().is_empty()) {
        parts.pop();
    }
    pages_from_texts(parts)
}

fn load_pdf(path: &Path) -> Result<Vec<Page>> {
    let bytes = fs::read(path).with_context(|| format!("failed to read {}", path.display()))?;
    let texts = pdf_extract::extract_text_from_mem_by_pages(&bytes)
        .map_err(|err| anyhow!("pdf extraction failed for {}: {err}", path.display()))?;
    Ok(pages_from_texts(texts))
}

fn load_json(path: &Path) -> Result<Vec<Page>> {
    let raw =
        fs::read_to_string(path).with_context(|| format!("failed to read {}", path.display()))?;
    let mut pages: Vec<Page> = serde_json::from_str(&raw)
        .with_context(|| format!("failed to parse page list {}", path.display()))?;
    pages.sort_by_key(|p| p.page_number);
    Ok(pages)
}

/// Ordered pages from a PDF, a JSON page list, or form-feed separated text.
pub fn load_pages(path: &Path) -> Result<Vec<Page>> {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase)
        .unwrap_or_default();
    let pages = match ext.as_str() {
        "pdf" => load_pdf(path)?,
        "json" => load_json(path)?,
        _ => {
            let raw = fs::read_to_string(path)
                .with_context(|| format!("failed to read {}", path.display()))?;
            pages_from_plain_text(&raw)
        }
    };
    if pages.is_empty() {
        return Err(anyhow!(ForensicError::NoPages(path.display().to_string())));
    }
    log::info!("loaded {} pages from {}", pages.len(), path.display());
    Ok(pages)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn form_feeds_split_pages_and_trailing_feed_is_ignored() {
        let pages = pages_from_plain_text("first\x0csecond\x0c");
        assert_eq!(pages.len(), 2);
        assert_eq!(pages[0].page_number, 1);
        assert_eq!(pages[1].text, "second");
    }

    #[test]
    fn empty_pages_in_the_middle_are_kept() {
        let pages = pages_from_plain_text("a\x0c\x0cc");
        assert_eq!(pages.len(), 3);
        assert_eq!(pages[1].text, "");
    }

    #[test]
    fn json_page_lists_are_sorted_by_number() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("pages.json");
        fs::write(
            &path,
            r#"[{"page_number": 2, "text": "b"}, {"page_number": 1, "text": "a"}]"#,
        )
        .expect("write");
        let pages = load_pages(&path).expect("load");
        assert_eq!(pages[0].text, "a");
        assert_eq!(pages[1].page_number, 2);
    }

    #[test]
    fn empty_json_list_is_a_no_pages_error() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("pages.json");
        fs::write(&path, "[]").expect("write");
        let err = load_pages(&path).expect_err("no pages");
        assert!(err.to_string().contains("no pages"));
    }
}
