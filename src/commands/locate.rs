use anyhow::Result;
use std::env;
use std::path::PathBuf;

use crate::commands::{CommandReport, connect, open_case, run_job};
use crate::forensic::audit;
use crate::forensic::config::{GeocoderKind, load_config};
use crate::forensic::locations::{LocationAnalyzer, build_geocoder, write_location_report};
use crate::forensic::progress::{ProgressMode, ProgressWindow};
use crate::forensic::segment::load_segments;

#[derive(Debug, Clone)]
pub struct LocateCommandOptions {
    pub out: PathBuf,
    pub geocoder: Option<GeocoderKind>,
    pub context_deduction: bool,
    pub min_confidence: Option<u8>,
    /// Scan only the first K segments.
    pub test_segments: Option<usize>,
    pub progress: ProgressMode,
}

pub fn run(opts: &LocateCommandOptions) -> Result<CommandReport> {
    let loaded = load_config()?;
    let layout = open_case(&opts.out)?;
    let mut report = CommandReport::new("locate");

    let mut settings = loaded.config.locations.clone();
    if let Some(kind) = opts.geocoder {
        settings.geocoder = kind;
    }
    if opts.context_deduction {
        settings.context_deduction = true;
    }
    if let Some(min) = opts.min_confidence {
        settings.confidence_threshold = min.min(100);
    }

    let segments = load_segments(&layout)?;
    let geocoder = build_geocoder(&settings, &|var| env::var(var).ok())?;
    let (gateway, delay) = connect(&loaded.config)?;
    let limit = opts.test_segments.filter(|k| *k > 0);

    let job_settings = settings.clone();
    let location_report = run_job(&layout, opts.progress, move |sink, cancel| {
        let analyzer =
            LocationAnalyzer::new(gateway.as_ref(), geocoder.as_ref(), &job_settings, delay);
        Ok(analyzer.run(&segments, limit, cancel, sink, ProgressWindow::default()))
    })?;
    let path = write_location_report(&layout, &location_report)?;

    let stats = &location_report.stats;
    report.detail(format!("geocoder={}", location_report.geocoder));
    report.detail(format!("confidence_threshold={}", settings.confidence_threshold));
    if let Some(k) = location_report.test_segments {
        report.detail(format!("test_mode=first {k} segment(s)"));
    }
    report.detail(format!("segments_analyzed={}", stats.segments_analyzed));
    report.detail(format!("locations_found={}", stats.locations_found));
    report.detail(format!("locations_geocoded={}", stats.locations_geocoded));
    report.detail(format!("unique_locations={}", stats.unique_locations));
    report.detail(format!("total_events={}", stats.total_events));
    report.detail(format!("locations_file={}", path.display()));
    if !location_report.geocoding_errors.is_empty() {
        report.detail(format!(
            "geocoding_errors={}",
            location_report.geocoding_errors.len()
        ));
    }
    if location_report.cancelled {
        report.detail("cancelled=true".to_string());
    }
    audit::record(
        &layout,
        "locate",
        if location_report.cancelled { "cancelled" } else { "ok" },
        &format!(
            "{} unique locations from {} mentions",
            stats.unique_locations, stats.locations_found
        ),
    );
    Ok(report)
}
