use crate::provider::ImageAttachment;
use anyhow::{Context, Result};
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaRef {
    pub source_path: String,
    pub filename: String,
    pub resolved_path: Option<PathBuf>,
    pub exists: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size_bytes: Option<u64>,
}

impl MediaRef {
    pub fn mime_type(&self) -> Option<&'static str> {
        let ext = Path::new(&self.filename)
            .extension()
            .and_then(|e| e.to_str())?
            .to_ascii_lowercase();
        match ext.as_str() {
            "jpg" | "jpeg" => Some("image/jpeg"),
            "png" => Some("image/png"),
            "gif" => Some("image/gif"),
            "webp" => Some("image/webp"),
            "mp4" => Some("video/mp4"),
            _ => None,
        }
    }

    pub fn is_image(&self) -> bool {
        self.mime_type().is_some_and(|m| m.starts_with("image/"))
    }
}

static MEDIA_PATH: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)EXTRACTION_[A-Z0-9]+\.zip/(.*?\.(?:jpe?g|png|gif|mp4|webp))")
        .expect("hardcoded regex pattern is valid")
});

/// Media paths embedded in `text`, in order of first appearance, unique by filename.
pub fn find_media_refs(text: &str, media_root: Option<&Path>) -> Vec<MediaRef> {
    let mut seen = HashSet::new();
    let mut refs = Vec::new();
    for caps in MEDIA_PATH.captures_iter(text) {
        let Some(source) = caps.get(1).map(|m| m.as_str().trim().to_string()) else {
            continue;
        };
        let filename = source
            .rsplit('/')
            .next()
            .unwrap_or(source.as_str())
            .to_string();
        if !seen.insert(filename.clone()) {
            continue;
        }
        refs.push(resolve(source, filename, media_root));
    }
    refs
}

fn resolve(source_path: String, filename: String, media_root: Option<&Path>) -> MediaRef {
    let mut media = MediaRef {
        source_path,
        filename,
        resolved_path: None,
        exists: false,
        size_bytes: None,
    };
    if let Some(root) = media_root {
        let candidate = root.join(&media.source_path);
        if candidate.is_file() {
            media.size_bytes = fs::metadata(&candidate).ok().map(|m| m.len());
            media.resolved_path = Some(candidate);
            media.exists = true;
        }
    }
    media
}

/// Merge `incoming` into `existing`, keeping the first reference per filename.
pub fn merge_unique(existing: &mut Vec<MediaRef>, incoming: Vec<MediaRef>) {
    for media in incoming {
        if existing.iter().all(|m| m.filename != media.filename) {
            existing.push(media);
        }
    }
}

/// Base64 attachments for every resolved image; videos are recorded but never sent.
pub fn load_image_attachments(refs: &[MediaRef]) -> Result<Vec<ImageAttachment>> {
    let mut attachments = Vec::new();
    for media in refs {
        let (Some(path), Some(mime)) = (media.resolved_path.as_ref(), media.mime_type()) else {
            continue;
        };
        if !media.exists || !media.is_image() {
            continue;
        }
        let bytes = fs::read(path).with_context(|| format!("failed to read {}", path.display()))?;
        attachments.push(ImageAttachment {
            filename: media.filename.clone(),
            mime_type: mime.to_string(),
            base64_data: STANDARD.encode(bytes),
        });
    }
    Ok(attachments)
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = "Attachment: EXTRACTION_FFS.zip/data/media/WhatsApp Images/Sent/IMG-20250505-WA0001.jpg\n\
        again EXTRACTION_FFS.zip/other/IMG-20250505-WA0001.jpg\n\
        video extraction_ffs.zip/data/media/VID-1.MP4 done";

    #[test]
    fn media_refs_are_unique_by_filename() {
        let refs = find_media_refs(SAMPLE, None);
        assert_eq!(refs.len(), 2);
        assert_eq!(refs[0].filename, "IMG-20250505-WA0001.jpg");
        assert_eq!(
            refs[0].source_path,
            "data/media/WhatsApp Images/Sent/IMG-20250505-WA0001.jpg"
        );
        assert_eq!(refs[1].filename, "VID-1.MP4");
        assert!(!refs[0].exists);
    }

    #[test]
    fn resolved_images_become_attachments_and_videos_do_not() {
        let dir = tempfile::tempdir().expect("tempdir");
        let image_dir = dir.path().join("data/media/WhatsApp Images/Sent");
        fs::create_dir_all(&image_dir).expect("mkdir");
        fs::write(image_dir.join("IMG-20250505-WA0001.jpg"), b"ABC").expect("image");
        fs::write(dir.path().join("data/media/VID-1.MP4"), b"video").expect("video");

        let refs = find_media_refs(SAMPLE, Some(dir.path()));
        assert!(refs.iter().all(|m| m.exists));
        assert_eq!(refs[0].size_bytes, Some(3));

        let attachments = load_image_attachments(&refs).expect("load");
        assert_eq!(attachments.len(), 1);
        assert_eq!(attachments[0].mime_type, "image/jpeg");
        assert_eq!(attachments[0].base64_data, "QUJD");
    }
}
