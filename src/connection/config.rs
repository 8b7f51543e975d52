use std::time::Duration;

#[cfg(feature = "debug-tools")]
use std::path::PathBuf;

use crate::protocol::{Endianness, MAX_ARRAY_LENGTH, MAX_MESSAGE_SIZE};
use crate::transport::{AuthConfig, TransportConfig};

/// Worker thread counts for the four dispatch pools.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReceivingConfig {
    /// Threads running signal handlers. One keeps handlers in arrival order.
    pub signal_threads: usize,
    /// Threads running error callbacks of async calls.
    pub error_threads: usize,
    /// Threads running exported methods.
    pub method_call_threads: usize,
    /// Threads running return callbacks of async calls.
    pub method_return_threads: usize,
}

impl Default for ReceivingConfig {
    fn default() -> Self {
        Self {
            signal_threads: 1,
            error_threads: 1,
            method_call_threads: 4,
            method_return_threads: 1,
        }
    }
}

/// Connection configuration options.
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// Dispatch pool sizes.
    pub receiving: ReceivingConfig,
    /// Upper bound for draining pools and flushing on disconnect.
    pub shutdown_grace: Duration,
    /// Largest array accepted in an inbound body.
    pub max_array_length: usize,
    /// Largest frame accepted from the peer.
    pub max_message_size: usize,
    /// Byte order of outbound messages.
    pub endianness: Endianness,
    /// Hold exported objects weakly; dropped objects are evicted on next lookup.
    pub weak_exports: bool,
    /// Authentication settings.
    pub auth: AuthConfig,
    /// Capture every outbound frame to this PCAP file.
    #[cfg(feature = "debug-tools")]
    pub capture_send_path: Option<PathBuf>,
    /// Capture every inbound frame to this PCAP file.
    #[cfg(feature = "debug-tools")]
    pub capture_recv_path: Option<PathBuf>,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            receiving: ReceivingConfig::default(),
            shutdown_grace: Duration::from_secs(10),
            max_array_length: MAX_ARRAY_LENGTH,
            max_message_size: MAX_MESSAGE_SIZE,
            endianness: Endianness::native(),
            weak_exports: false,
            auth: AuthConfig::default(),
            #[cfg(feature = "debug-tools")]
            capture_send_path: None,
            #[cfg(feature = "debug-tools")]
            capture_recv_path: None,
        }
    }
}

impl ConnectionConfig {
    /// Transport settings derived from this configuration.
    #[must_use]
    pub fn transport_config(&self) -> TransportConfig {
        TransportConfig {
            auth: self.auth.clone(),
            max_message_size: self.max_message_size,
            max_array_length: self.max_array_length,
            #[cfg(feature = "debug-tools")]
            capture_send_path: self.capture_send_path.clone(),
            #[cfg(feature = "debug-tools")]
            capture_recv_path: self.capture_recv_path.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = ConnectionConfig::default();
        assert_eq!(config.receiving.method_call_threads, 4);
        assert_eq!(config.receiving.signal_threads, 1);
        assert_eq!(config.shutdown_grace, Duration::from_secs(10));
        assert!(!config.weak_exports);
        let transport = config.transport_config();
        assert_eq!(transport.max_array_length, MAX_ARRAY_LENGTH);
        assert_eq!(transport.max_message_size, MAX_MESSAGE_SIZE);
    }
}
