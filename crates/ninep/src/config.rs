//! Server-wide configuration surface. A plain value struct constructed once
//! and handed to the session pool — mirrors `ninep_session_pool_config` from
//! the embedded original: no global state, every limit is explicit.

use crate::fcall::{MSIZE_MIN, P92000};

/// Configuration for one server instance.
#[derive(Debug, Clone)]
pub struct Config {
    /// Upper bound offered during `Tversion` negotiation. Must be ≥ 128.
    pub max_message_size: u32,
    /// Per-session fid table capacity.
    pub max_fids: usize,
    /// Per-session tag table capacity.
    pub max_tags: usize,
    /// Session pool slot count.
    pub max_sessions: usize,
    /// Advertised protocol version string.
    pub version_string: String,
    /// Whether `Tauth` is honored (`true`) or always refused (`false`).
    pub auth_required: bool,
}

impl Config {
    pub fn new() -> Self {
        Config::default()
    }
}

impl Default for Config {
    fn default() -> Self {
        Config {
            max_message_size: 8192,
            max_fids: 128,
            max_tags: 64,
            max_sessions: 16,
            version_string: P92000.to_owned(),
            auth_required: false,
        }
    }
}

impl Config {
    pub fn validate(&self) -> Result<(), &'static str> {
        if self.max_message_size < MSIZE_MIN {
            return Err("max_message_size below protocol minimum of 128");
        }
        if self.max_fids == 0 {
            return Err("max_fids must be nonzero");
        }
        if self.max_tags == 0 {
            return Err("max_tags must be nonzero");
        }
        if self.max_sessions == 0 {
            return Err("max_sessions must be nonzero");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        Config::default().validate().unwrap();
    }

    #[test]
    fn msize_below_minimum_is_rejected() {
        let cfg = Config { max_message_size: 64, ..Config::default() };
        assert!(cfg.validate().is_err());
    }
}
