use anyhow::{Context, Result};
use std::fs;
use std::path::{Path, PathBuf};

/// On-disk layout of one case output directory.
#[derive(Debug, Clone)]
pub struct CaseLayout {
    pub root: PathBuf,
    pub segments_dir: PathBuf,
    pub analyses_dir: PathBuf,
    pub reports_dir: PathBuf,
    pub chat_reports_dir: PathBuf,
    pub logs_dir: PathBuf,
    pub stop_file: PathBuf,
}

impl CaseLayout {
    pub fn new(root: impl AsRef<Path>) -> Self {
        let root = root.as_ref().to_path_buf();
        let reports_dir = root.join("reports");
        Self {
            segments_dir: root.join("segments"),
            analyses_dir: root.join("analyses"),
            chat_reports_dir: reports_dir.join("chats"),
            reports_dir,
            logs_dir: root.join("logs"),
            stop_file: root.join("STOP"),
            root,
        }
    }

    pub fn ensure_dirs(&self) -> Result<()> {
        for dir in [
            &self.segments_dir,
            &self.analyses_dir,
            &self.reports_dir,
            &self.logs_dir,
        ] {
            fs::create_dir_all(dir)
                .with_context(|| format!("failed to create {}", dir.display()))?;
        }
        Ok(())
    }

    pub fn segment_file(&self, segment_id: u32) -> PathBuf {
        self.segments_dir
            .join(format!("segment_{segment_id:03}.json"))
    }

    pub fn analysis_file(&self, segment_id: u32) -> PathBuf {
        self.analyses_dir
            .join(format!("analysis_{segment_id:03}.txt"))
    }

    pub fn analysis_meta_file(&self, segment_id: u32) -> PathBuf {
        self.analyses_dir
            .join(format!("analysis_{segment_id:03}.meta.json"))
    }

    pub fn analysis_lock_file(&self) -> PathBuf {
        self.analyses_dir.join(".lock")
    }

    pub fn final_summary_file(&self) -> PathBuf {
        self.reports_dir.join("final_summary.md")
    }

    pub fn group_summaries_file(&self) -> PathBuf {
        self.reports_dir.join("group_summaries.md")
    }

    pub fn chats_file(&self) -> PathBuf {
        self.reports_dir.join("chats.json")
    }

    pub fn chat_report_file(&self, chat_id: &str) -> PathBuf {
        self.chat_reports_dir.join(format!("{chat_id}.md"))
    }

    pub fn search_file(&self, slug: &str) -> PathBuf {
        self.reports_dir.join(format!("search_{slug}.md"))
    }

    pub fn locations_file(&self) -> PathBuf {
        self.reports_dir.join("locations.json")
    }

    pub fn stop_requested(&self) -> bool {
        self.stop_file.exists()
    }

    pub fn clear_stop_request(&self) -> Result<()> {
        match fs::remove_file(&self.stop_file) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err)
                .with_context(|| format!("failed to remove {}", self.stop_file.display())),
        }
    }
}
