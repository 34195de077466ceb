// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>

//! Tunnel configuration.
//!
//! Consumed by [`crate::Tunnel::spawn`] and [`crate::Responder::new`]; the
//! server binary fills it from command-line arguments.

use std::time::Duration;

use hickory_proto::rr::Name;

use crate::error::ConfigError;

/// Alias target for every answer. IANA's blackhole servers never hold data
/// a resolver could usefully cache or retry against.
pub const DEFAULT_SINK_DOMAIN: &str = "blackhole-1.iana.org.";

/// Configuration for a reassembly tunnel.
#[derive(Debug, Clone)]
pub struct TunnelConfig {
    /// Domain under which fragments arrive (e.g. `tunnel.example.com`).
    pub top_domain: String,

    /// How long a transfer survives without receiving a fragment (default: 30s)
    pub expiration: Duration,

    /// Cadence of the expiration sweep (default: 5s)
    pub sweep_interval: Duration,

    /// Domain every answer aliases to
    pub sink_domain: String,

    /// Maximum number of in-flight transfers (default: 10000)
    pub max_transfers: usize,

    /// Maximum declared encoded size of one transfer, in bytes (default: 1 MiB)
    pub max_transfer_size: usize,
}

impl Default for TunnelConfig {
    fn default() -> Self {
        Self {
            top_domain: String::new(),
            expiration: Duration::from_secs(30),
            sweep_interval: Duration::from_secs(5),
            sink_domain: DEFAULT_SINK_DOMAIN.to_string(),
            max_transfers: 10_000,
            max_transfer_size: 1 << 20,
        }
    }
}

impl TunnelConfig {
    /// Configuration with defaults for everything but the top domain.
    pub fn new(top_domain: impl Into<String>) -> Self {
        Self {
            top_domain: top_domain.into(),
            ..Default::default()
        }
    }

    /// Check that the configuration can drive a tunnel.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if normalize_domain(&self.top_domain).is_empty() {
            return Err(ConfigError::EmptyTopDomain);
        }
        if self.expiration.is_zero() {
            return Err(ConfigError::ZeroDuration("expiration"));
        }
        if self.sweep_interval.is_zero() {
            return Err(ConfigError::ZeroDuration("sweep interval"));
        }
        if self.max_transfers == 0 {
            return Err(ConfigError::ZeroLimit("max transfers"));
        }
        if self.max_transfer_size == 0 {
            return Err(ConfigError::ZeroLimit("max transfer size"));
        }
        self.sink_name()?;
        Ok(())
    }

    /// The sink domain as a fully-qualified DNS name.
    pub fn sink_name(&self) -> Result<Name, ConfigError> {
        let mut name =
            Name::from_ascii(&self.sink_domain).map_err(|source| ConfigError::InvalidSink {
                domain: self.sink_domain.clone(),
                source,
            })?;
        name.set_fqdn(true);
        Ok(name)
    }

    /// Top domain in the form fragments are matched against.
    pub fn normalized_top_domain(&self) -> String {
        normalize_domain(&self.top_domain)
    }
}

/// Lowercase a domain and strip one trailing root dot.
pub(crate) fn normalize_domain(domain: &str) -> String {
    let domain = domain.trim();
    domain
        .strip_suffix('.')
        .unwrap_or(domain)
        .to_ascii_lowercase()
}
