//! Memory governor: observation, row estimation and reclamation policy

use crate::probe::FileFormat;
use crate::settings::Settings;
use std::collections::VecDeque;
use std::path::Path;

const HISTORY_LEN: usize = 100;
const WARN_THRESHOLD: f64 = 0.8;
const CLEANUP_THRESHOLD: f64 = 0.9;
const MIN_AUTO_LIMIT: u64 = 256 * 1024 * 1024;

/// Outcome of a governor check
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemoryCheck {
    Ok,
    NeedsCleanup,
}

/// Memory trend classification from the sample history
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LeakReport {
    /// Fewer than 10 samples so far
    Inconclusive,
    Stable,
    SlowlyIncreasing,
    PotentialLeak,
}

/// Observes process memory and decides when the engine should shed weight.
///
/// The governor never touches other components; sources, sinks and the
/// pipeline hold a handle and poll [`check`](MemoryGovernor::check) at the
/// interval [`check_interval`](MemoryGovernor::check_interval) suggests.
#[derive(Debug)]
pub struct MemoryGovernor {
    limit: u64,
    history: VecDeque<u64>,
    warned: bool,
    reclaims: u64,
}

impl MemoryGovernor {
    /// Build a governor from settings, deriving the limit from the current
    /// resident set when none is configured
    pub fn new(settings: &Settings) -> Self {
        let limit = settings.memory_limit.unwrap_or_else(|| {
            let rss = current_memory_usage();
            (rss * 2).max(MIN_AUTO_LIMIT)
        });
        MemoryGovernor {
            limit,
            history: VecDeque::with_capacity(HISTORY_LEN),
            warned: false,
            reclaims: 0,
        }
    }

    /// The effective memory ceiling in bytes
    pub fn limit(&self) -> u64 {
        self.limit
    }

    /// Number of reclamation passes so far
    pub fn reclaims(&self) -> u64 {
        self.reclaims
    }

    /// Sample current usage and compare against the cleanup threshold.
    ///
    /// Crossing the warning threshold logs once per governor lifetime;
    /// crossing the cleanup threshold asks the caller to reclaim.
    pub fn check(&mut self) -> MemoryCheck {
        let usage = self.sample();
        if usage == 0 {
            // No usable sampler on this platform; stay passive
            return MemoryCheck::Ok;
        }

        let ratio = usage as f64 / self.limit as f64;
        if ratio >= WARN_THRESHOLD && !self.warned {
            self.warned = true;
            log::warn!(
                "memory usage {:.1} MiB is above {:.0}% of the {:.1} MiB limit",
                usage as f64 / (1024.0 * 1024.0),
                WARN_THRESHOLD * 100.0,
                self.limit as f64 / (1024.0 * 1024.0)
            );
        }

        if ratio >= CLEANUP_THRESHOLD {
            MemoryCheck::NeedsCleanup
        } else {
            MemoryCheck::Ok
        }
    }

    /// Record that the caller completed a reclamation pass
    pub fn note_reclaim(&mut self) {
        self.reclaims += 1;
        log::info!("memory reclamation pass #{} completed", self.reclaims);
    }

    /// After a reclamation pass, is usage still above the cleanup threshold?
    pub fn still_over_limit(&mut self) -> bool {
        let usage = self.sample();
        usage != 0 && (usage as f64 / self.limit as f64) >= CLEANUP_THRESHOLD
    }

    /// Take one memory sample into the sliding history
    pub fn sample(&mut self) -> u64 {
        let usage = current_memory_usage();
        if self.history.len() == HISTORY_LEN {
            self.history.pop_front();
        }
        self.history.push_back(usage);
        usage
    }

    /// Classify the memory trend over the retained history.
    ///
    /// Average inter-sample growth above 1 MiB with total span above 10% of
    /// the baseline reads as a potential leak.
    pub fn detect_leak(&self) -> LeakReport {
        if self.history.len() < 10 {
            return LeakReport::Inconclusive;
        }

        let first = *self.history.front().unwrap() as f64;
        let last = *self.history.back().unwrap() as f64;
        let avg_delta = (last - first) / (self.history.len() - 1) as f64;
        let span_ratio = if first > 0.0 {
            (last - first) / first
        } else {
            0.0
        };

        if avg_delta > 1024.0 * 1024.0 && span_ratio > 0.10 {
            LeakReport::PotentialLeak
        } else if avg_delta > 0.0 {
            LeakReport::SlowlyIncreasing
        } else {
            LeakReport::Stable
        }
    }

    /// Heuristic total-row estimate from file size
    pub fn estimate_rows<P: AsRef<Path>>(path: P, format: FileFormat) -> u64 {
        let bytes = std::fs::metadata(path).map(|m| m.len()).unwrap_or(0);
        match format {
            FileFormat::Xlsx => bytes / 50,
            _ => bytes / 100,
        }
    }

    /// How often (in rows) the pipeline should poll `check`
    pub fn check_interval(estimated_rows: u64) -> u64 {
        match estimated_rows {
            0..=999 => 50,
            1_000..=9_999 => 100,
            10_000..=99_999 => 500,
            100_000..=999_999 => 2_000,
            _ => 5_000,
        }
    }
}

/// Current resident set size in bytes, or 0 when unavailable
pub fn current_memory_usage() -> u64 {
    #[cfg(target_os = "linux")]
    {
        if let Ok(status) = std::fs::read_to_string("/proc/self/status") {
            for line in status.lines() {
                if let Some(rest) = line.strip_prefix("VmRSS:") {
                    let kb: u64 = rest
                        .trim()
                        .trim_end_matches("kB")
                        .trim()
                        .parse()
                        .unwrap_or(0);
                    return kb * 1024;
                }
            }
        }
        0
    }
    #[cfg(not(target_os = "linux"))]
    {
        0
    }
}

/// A recoverable cell-level problem recorded during a run
#[derive(Debug, Clone, serde::Serialize)]
pub struct Warning {
    /// 1-based logical row number
    pub row: u32,
    /// 1-based column number, when known
    pub column: Option<u32>,
    pub message: String,
}

const MAX_RETAINED_WARNINGS: usize = 100;

/// Per-run statistics and recoverable-warning records
#[derive(Debug, Default)]
pub struct RunStats {
    /// Physical rows pulled from the source
    pub rows_read: u64,
    /// Rows that survived the window, filters and transforms
    pub rows_yielded: u64,
    /// Rows handed to a sink
    pub rows_written: u64,
    /// Total recoverable warnings (retained records cap at 100)
    pub warnings: u32,
    warning_records: Vec<Warning>,
    /// Reclamation passes triggered during this run
    pub reclaims: u64,
}

impl RunStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// Count a warning, retaining at most the first 100 records
    pub fn push_warning(&mut self, warning: Warning) {
        self.warnings += 1;
        if self.warning_records.len() < MAX_RETAINED_WARNINGS {
            self.warning_records.push(warning);
        }
    }

    /// The retained warning records
    pub fn warning_records(&self) -> &[Warning] {
        &self.warning_records
    }
}
