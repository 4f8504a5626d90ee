//! Progress reporting and cooperative cancellation for long-running pipelines.
//!
//! Pipelines run on a worker thread and report through a [`ProgressSink`]; the
//! caller decides how to render it (stderr human lines, JSON lines, or nothing).

use serde::Serialize;
use std::io::Write;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};

const SLEEP_SLICE: Duration = Duration::from_millis(50);

/// Shared stop flag, checked at the top of every segment or group iteration.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    /// Sleeps up to `duration`, waking early on cancellation. Returns `false` if cancelled.
    pub fn sleep(&self, duration: Duration) -> bool {
        let deadline = Instant::now() + duration;
        loop {
            if self.is_cancelled() {
                return false;
            }
            let now = Instant::now();
            if now >= deadline {
                return true;
            }
            thread::sleep(SLEEP_SLICE.min(deadline - now));
        }
    }
}

/// Receives percentages (0..=100) and free-text log lines from the worker side.
pub trait ProgressSink: Send + Sync {
    fn progress(&self, pct: f64);

    fn log(&self, line: &str);
}

impl<T: ProgressSink + ?Sized> ProgressSink for &T {
    fn progress(&self, pct: f64) {
        (**self).progress(pct);
    }

    fn log(&self, line: &str) {
        (**self).log(line);
    }
}

pub struct NoProgress;

impl ProgressSink for NoProgress {
    fn progress(&self, _pct: f64) {}

    fn log(&self, _line: &str) {}
}

/// Maps item `i` of `n` into the caller's `[start, end]` slice of overall progress.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProgressWindow {
    pub start: f64,
    pub end: f64,
}

impl Default for ProgressWindow {
    fn default() -> Self {
        Self {
            start: 0.0,
            end: 100.0,
        }
    }
}

impl ProgressWindow {
    pub fn new(start: f64, end: f64) -> Self {
        let start = start.clamp(0.0, 100.0);
        Self {
            start,
            end: end.clamp(start, 100.0),
        }
    }

    pub fn at(&self, done: usize, total: usize) -> f64 {
        if total == 0 {
            return self.end;
        }
        let frac = (done as f64 / total as f64).clamp(0.0, 1.0);
        self.start + (self.end - self.start) * frac
    }

    /// Sub-window covering `[from, to]` fractions of this one.
    pub fn slice(&self, from: f64, to: f64) -> Self {
        let span = self.end - self.start;
        Self::new(self.start + span * from, self.start + span * to)
    }
}

/// Wraps a sink so reported percentages never decrease within one run.
pub struct Monotonic<S> {
    inner: S,
    last: Mutex<f64>,
}

impl<S: ProgressSink> Monotonic<S> {
    pub fn new(inner: S) -> Self {
        Self {
            inner,
            last: Mutex::new(0.0),
        }
    }
}

impl<S: ProgressSink> ProgressSink for Monotonic<S> {
    fn progress(&self, pct: f64) {
        let pct = pct.clamp(0.0, 100.0);
        let Ok(mut last) = self.last.lock() else {
            return;
        };
        if pct < *last {
            return;
        }
        *last = pct;
        self.inner.progress(pct);
    }

    fn log(&self, line: &str) {
        self.inner.log(line);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProgressMode {
    Off,
    Human,
    Json,
}

impl ProgressMode {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "off" | "none" => Some(Self::Off),
            "human" => Some(Self::Human),
            "json" => Some(Self::Json),
            _ => None,
        }
    }
}

#[derive(Debug, Serialize)]
struct JsonProgressLine<'a> {
    event: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pct: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    message: Option<&'a str>,
}

/// Renders worker events on stderr so stdout stays parseable.
pub struct StderrRenderer {
    mode: ProgressMode,
}

impl StderrRenderer {
    pub fn new(mode: ProgressMode) -> Self {
        Self { mode }
    }

    fn emit(&self, line: &JsonProgressLine<'_>) {
        if let Ok(raw) = serde_json::to_string(line) {
            let _ = writeln!(std::io::stderr().lock(), "{raw}");
        }
    }
}

impl ProgressSink for StderrRenderer {
    fn progress(&self, pct: f64) {
        match self.mode {
            ProgressMode::Off => {}
            ProgressMode::Human => {
                let _ = writeln!(std::io::stderr().lock(), "progress {pct:>5.1}%");
            }
            ProgressMode::Json => self.emit(&JsonProgressLine {
                event: "progress",
                pct: Some((pct * 10.0).round() / 10.0),
                message: None,
            }),
        }
    }

    fn log(&self, line: &str) {
        match self.mode {
            ProgressMode::Json => self.emit(&JsonProgressLine {
                event: "log",
                pct: None,
                message: Some(line),
            }),
            _ => log::info!("{line}"),
        }
    }
}
