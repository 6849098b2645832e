//! Engine settings, fixed at construction time

/// Immutable engine configuration.
///
/// Constructed by the caller (builder style) or left at defaults and derived
/// by the [`MemoryGovernor`](crate::memory::MemoryGovernor) at startup. There
/// is deliberately no open-ended option bag; the recognized knobs are all
/// here.
#[derive(Debug, Clone)]
pub struct Settings {
    /// Memory ceiling in bytes; `None` means auto-derive from the resident
    /// set at governor construction
    pub memory_limit: Option<u64>,
    /// Row sink write-buffer capacity in bytes
    pub write_buffer_bytes: usize,
    /// Maximum retained shared-string entries
    pub sst_capacity: usize,
    /// Row-count estimate above which type inference is disabled
    pub no_infer_threshold: u64,
    /// Depth of the bounded channel between the XML decoder thread and the
    /// pipeline
    pub channel_depth: usize,
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            memory_limit: None,
            write_buffer_bytes: 8 * 1024,
            sst_capacity: 10_000,
            no_infer_threshold: 100_000,
            channel_depth: 64,
        }
    }
}

impl Settings {
    /// Settings with every knob at its default
    pub fn new() -> Self {
        Self::default()
    }

    /// Set an explicit memory ceiling in bytes
    pub fn with_memory_limit(mut self, bytes: u64) -> Self {
        self.memory_limit = Some(bytes);
        self
    }

    /// Set the sink write-buffer capacity
    pub fn with_write_buffer_bytes(mut self, bytes: usize) -> Self {
        self.write_buffer_bytes = bytes.max(512);
        self
    }

    /// Set the shared-string cache capacity
    pub fn with_sst_capacity(mut self, entries: usize) -> Self {
        self.sst_capacity = entries.max(1);
        self
    }

    /// Set the type-inference cutoff
    pub fn with_no_infer_threshold(mut self, rows: u64) -> Self {
        self.no_infer_threshold = rows;
        self
    }
}
