use crate::errors::{DolomiteError, DolomiteResult, ErrorKind};

/// Durability expectations attached to writes by default.
///
/// The engine is single-node, so `w` beyond 1 has no effect; the values are
/// carried so callers can surface them in command responses.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct WriteConcern {
    w: i32,
    j: bool,
}

impl WriteConcern {
    pub fn new(w: i32, j: bool) -> WriteConcern {
        WriteConcern { w, j }
    }

    pub fn w(&self) -> i32 {
        self.w
    }

    pub fn journaled(&self) -> bool {
        self.j
    }
}

impl Default for WriteConcern {
    fn default() -> Self {
        WriteConcern { w: 1, j: false }
    }
}

/// Engine configuration.
///
/// # Examples
///
/// ```rust,ignore
/// use dolomite::config::EngineConfig;
///
/// let config = EngineConfig::new()
///     .with_cursor_ttl_ms(120_000)
///     .with_oplog_enabled(true);
/// ```
#[derive(Clone, Debug)]
pub struct EngineConfig {
    cursor_ttl_ms: u64,
    max_batch_size: usize,
    oplog_enabled: bool,
    default_write_concern: WriteConcern,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            cursor_ttl_ms: 600_000,
            max_batch_size: 101,
            oplog_enabled: false,
            default_write_concern: WriteConcern::default(),
        }
    }
}

impl EngineConfig {
    pub fn new() -> EngineConfig {
        EngineConfig::default()
    }

    /// Sets how long an idle cursor survives before the reaper closes it.
    pub fn with_cursor_ttl_ms(mut self, cursor_ttl_ms: u64) -> EngineConfig {
        self.cursor_ttl_ms = cursor_ttl_ms;
        self
    }

    /// Sets the default number of documents returned per cursor batch.
    pub fn with_max_batch_size(mut self, max_batch_size: usize) -> EngineConfig {
        self.max_batch_size = max_batch_size;
        self
    }

    pub fn with_oplog_enabled(mut self, oplog_enabled: bool) -> EngineConfig {
        self.oplog_enabled = oplog_enabled;
        self
    }

    pub fn with_default_write_concern(mut self, write_concern: WriteConcern) -> EngineConfig {
        self.default_write_concern = write_concern;
        self
    }

    /// Validates the configuration before the engine starts.
    pub fn validate(&self) -> DolomiteResult<()> {
        if self.max_batch_size == 0 {
            log::error!("max_batch_size must be positive");
            return Err(DolomiteError::new(
                "max_batch_size must be a positive number",
                ErrorKind::InvalidOptions,
            ));
        }
        Ok(())
    }

    pub fn cursor_ttl_ms(&self) -> u64 {
        self.cursor_ttl_ms
    }

    pub fn max_batch_size(&self) -> usize {
        self.max_batch_size
    }

    pub fn oplog_enabled(&self) -> bool {
        self.oplog_enabled
    }

    pub fn default_write_concern(&self) -> WriteConcern {
        self.default_write_concern
    }
}
