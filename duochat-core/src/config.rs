//! Session configuration shared by the controller and transports.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Read buffer used by the pump unless configured otherwise.
pub const DEFAULT_READ_BUFFER_SIZE: usize = 1024;

/// Upper bound for the pump read buffer.
pub const MAX_READ_BUFFER_SIZE: usize = 64 * 1024;

pub const DEFAULT_SERVICE_NAME: &str = "DuochatApp";

/// Service record both ends must advertise to be attached.
pub const DEFAULT_SERVICE_ID: Uuid = Uuid::from_u128(0x8ce255c0_200a_11e0_ac64_0800200c9a66);

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// Name the local endpoint is advertised under.
    pub service_name: String,
    pub service_id: Uuid,
    /// Pump read buffer in bytes.
    pub read_buffer_size: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            service_name: DEFAULT_SERVICE_NAME.to_string(),
            service_id: DEFAULT_SERVICE_ID,
            read_buffer_size: DEFAULT_READ_BUFFER_SIZE,
        }
    }
}

impl Config {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.service_name.trim().is_empty() {
            return Err(ConfigError::EmptyServiceName);
        }
        if self.read_buffer_size == 0 || self.read_buffer_size > MAX_READ_BUFFER_SIZE {
            return Err(ConfigError::ReadBufferSize(self.read_buffer_size));
        }
        Ok(())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("service name must not be empty")]
    EmptyServiceName,
    #[error("read buffer size {0} outside 1..=65536")]
    ReadBufferSize(usize),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_is_valid() {
        let c = Config::default();
        assert!(c.validate().is_ok());
        assert_eq!(c.read_buffer_size, 1024);
        assert_eq!(
            c.service_id.to_string(),
            "8ce255c0-200a-11e0-ac64-0800200c9a66"
        );
    }

    #[test]
    fn rejects_zero_and_oversized_buffers() {
        let mut c = Config::default();
        c.read_buffer_size = 0;
        assert!(matches!(c.validate(), Err(ConfigError::ReadBufferSize(0))));
        c.read_buffer_size = MAX_READ_BUFFER_SIZE + 1;
        assert!(c.validate().is_err());
        c.read_buffer_size = MAX_READ_BUFFER_SIZE;
        assert!(c.validate().is_ok());
    }

    #[test]
    fn rejects_blank_service_name() {
        let c = Config {
            service_name: "  ".into(),
            ..Config::default()
        };
        assert!(matches!(c.validate(), Err(ConfigError::EmptyServiceName)));
    }
}
