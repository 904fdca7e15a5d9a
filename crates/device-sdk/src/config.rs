//! Serialized client settings, loaded by embedding applications from TOML or
//! JSON.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::access::AccessOptions;
use crate::reconnect::ReconnectPolicy;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Gateway client configuration
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Everything needed to attach to an edge gateway.  Every field has a
/// default, so an empty document is a valid config for a local gateway.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    /// `ws://` for a plain link, `wss://` for TLS.
    #[serde(default = "d_url")]
    pub url: String,

    #[serde(default)]
    pub tls: TlsConfig,

    #[serde(default = "d_connect_timeout_secs")]
    pub connect_timeout_secs: u64,

    /// Reply budget for synchronous property/event reports.
    #[serde(default = "d_request_timeout_secs")]
    pub request_timeout_secs: u64,

    /// Reply budget for `onlineDevice` / `offlineDevice`.
    #[serde(default = "d_handshake_timeout_secs")]
    pub handshake_timeout_secs: u64,

    /// WebSocket ping interval.  The link is considered dead after three
    /// silent intervals.
    #[serde(default = "d_heartbeat_interval_secs")]
    pub heartbeat_interval_secs: u64,

    #[serde(default = "d_workers")]
    pub workers: usize,

    #[serde(default = "d_queue_depth")]
    pub queue_depth: usize,

    #[serde(default = "d_service_output_max_count")]
    pub service_output_max_count: usize,

    /// Frames buffered for the socket writer before sends fail.
    #[serde(default = "d_outbound_capacity")]
    pub outbound_capacity: usize,

    /// Inbound text frames larger than this are dropped unread.
    #[serde(default = "d_max_inbound_bytes")]
    pub max_inbound_bytes: usize,

    #[serde(default = "d_max_in_flight")]
    pub max_in_flight: usize,

    #[serde(default)]
    pub reconnect: ReconnectPolicy,
}

/// Certificate material, passed through to the TLS layer as opaque paths.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TlsConfig {
    /// PEM bundle of trusted roots.  Falls back to the built-in web roots.
    #[serde(default)]
    pub ca_path: Option<PathBuf>,
    /// PEM client certificate chain, for mutual TLS.
    #[serde(default)]
    pub cert_path: Option<PathBuf>,
    /// PEM private key matching `cert_path`.
    #[serde(default)]
    pub key_path: Option<PathBuf>,
}

impl TlsConfig {
    pub fn has_client_auth(&self) -> bool {
        self.cert_path.is_some() && self.key_path.is_some()
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            url: d_url(),
            tls: TlsConfig::default(),
            connect_timeout_secs: d_connect_timeout_secs(),
            request_timeout_secs: d_request_timeout_secs(),
            handshake_timeout_secs: d_handshake_timeout_secs(),
            heartbeat_interval_secs: d_heartbeat_interval_secs(),
            workers: d_workers(),
            queue_depth: d_queue_depth(),
            service_output_max_count: d_service_output_max_count(),
            outbound_capacity: d_outbound_capacity(),
            max_inbound_bytes: d_max_inbound_bytes(),
            max_in_flight: d_max_in_flight(),
            reconnect: ReconnectPolicy::default(),
        }
    }
}

impl ClientConfig {
    pub fn is_tls(&self) -> bool {
        self.url.starts_with("wss://")
    }

    /// The core's share of the settings.
    pub fn access_options(&self) -> AccessOptions {
        AccessOptions {
            request_timeout: Duration::from_secs(self.request_timeout_secs),
            handshake_timeout: Duration::from_secs(self.handshake_timeout_secs),
            workers: self.workers,
            queue_depth: self.queue_depth,
            service_output_max_count: self.service_output_max_count,
            max_in_flight: self.max_in_flight,
            ..AccessOptions::default()
        }
    }
}

fn d_url() -> String {
    "ws://127.0.0.1:17682".into()
}

fn d_connect_timeout_secs() -> u64 {
    10
}

fn d_request_timeout_secs() -> u64 {
    10
}

fn d_handshake_timeout_secs() -> u64 {
    20 * 60
}

fn d_heartbeat_interval_secs() -> u64 {
    30
}

fn d_workers() -> usize {
    5
}

fn d_queue_depth() -> usize {
    5 * 1024
}

fn d_service_output_max_count() -> usize {
    16
}

fn d_outbound_capacity() -> usize {
    256
}

fn d_max_inbound_bytes() -> usize {
    256 * 1024
}

fn d_max_in_flight() -> usize {
    1024
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_document_uses_defaults() {
        let cfg: ClientConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(cfg.url, "ws://127.0.0.1:17682");
        assert_eq!(cfg.request_timeout_secs, 10);
        assert_eq!(cfg.handshake_timeout_secs, 1200);
        assert_eq!(cfg.workers, 5);
        assert_eq!(cfg.queue_depth, 5120);
        assert!(cfg.tls.ca_path.is_none());
        assert!(!cfg.is_tls());
    }

    #[test]
    fn partial_document_keeps_other_defaults() {
        let cfg: ClientConfig = serde_json::from_str(
            r#"{ "url": "wss://gw:17682", "workers": 8, "tls": { "ca_path": "/etc/ca.pem" } }"#,
        )
        .unwrap();
        assert!(cfg.is_tls());
        assert_eq!(cfg.workers, 8);
        assert_eq!(cfg.heartbeat_interval_secs, 30);
        assert_eq!(cfg.tls.ca_path, Some(PathBuf::from("/etc/ca.pem")));
        assert!(!cfg.tls.has_client_auth());
    }

    #[test]
    fn access_options_follow_config() {
        let cfg = ClientConfig {
            request_timeout_secs: 3,
            max_in_flight: 7,
            ..ClientConfig::default()
        };
        let opts = cfg.access_options();
        assert_eq!(opts.request_timeout, Duration::from_secs(3));
        assert_eq!(opts.max_in_flight, 7);
        assert_eq!(opts.workers, 5);
    }
}
