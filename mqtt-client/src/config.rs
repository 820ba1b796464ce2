// Copyright (c) 2022 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Apache-2.0 License that can be found
// in the LICENSE file.

use std::fs;
use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use mqtt_codec::utils::random_string;

use crate::error::{Error, ErrorKind};

/// Last-will publication the broker sends on this client's behalf if it
/// disappears without a DISCONNECT.
#[derive(Clone, Debug, Deserialize)]
pub struct WillConfig {
    pub topic: String,
    pub message: String,
    #[serde(default)]
    pub retain: bool,
    /// 0 or 1. QoS 2 is rejected at config-build time.
    #[serde(default)]
    pub qos: u8,
}

/// Assembled client configuration. Build with [`ClientConfigBuilder`] or
/// load from TOML with [`ClientConfig::from_toml_str`].
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    pub server: String,
    pub port: u16,
    pub client_id: String,
    pub user: Option<String>,
    pub password: Option<String>,
    pub keepalive_secs: u16,
    pub ping_interval_secs: u16,
    pub response_time_secs: u64,
    pub clean_init: bool,
    pub clean: bool,
    pub max_repubs: u32,
    pub will: Option<WillConfig>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            server: "127.0.0.1".to_string(),
            port: 0,
            client_id: random_string(8),
            user: None,
            password: None,
            keepalive_secs: 60,
            ping_interval_secs: 0,
            response_time_secs: 10,
            clean_init: true,
            clean: true,
            max_repubs: 4,
            will: None,
        }
    }
}

impl ClientConfig {
    /// Resolve `port` (0 means the MQTT default) and `ping_interval`
    /// against `keepalive` per the design note: `keepalive == 0` disables
    /// pinging outright, overriding any explicit `ping_interval`.
    #[must_use]
    pub fn effective_port(&self) -> u16 {
        if self.port == 0 {
            1883
        } else {
            self.port
        }
    }

    #[must_use]
    pub fn keepalive(&self) -> Duration {
        Duration::from_secs(u64::from(self.keepalive_secs))
    }

    #[must_use]
    pub fn ping_interval(&self) -> Duration {
        if self.keepalive_secs == 0 {
            return Duration::ZERO;
        }
        if self.ping_interval_secs == 0 {
            Duration::from_secs(u64::from(self.keepalive_secs) / 4)
        } else {
            Duration::from_secs(u64::from(self.ping_interval_secs))
        }
    }

    #[must_use]
    pub fn response_time(&self) -> Duration {
        Duration::from_secs(self.response_time_secs)
    }

    /// # Errors
    /// Returns [`ErrorKind::InvalidArgument`] if the document is malformed.
    pub fn from_toml_str(doc: &str) -> Result<Self, Error> {
        toml::from_str(doc).map_err(|err| Error::new(ErrorKind::InvalidArgument, err.to_string()))
    }

    /// # Errors
    /// Returns [`ErrorKind::IoError`] if the file cannot be read, or
    /// [`ErrorKind::InvalidArgument`] if it is not well-formed TOML.
    pub fn from_toml_file(path: impl AsRef<Path>) -> Result<Self, Error> {
        let doc = fs::read_to_string(path)?;
        Self::from_toml_str(&doc)
    }
}

/// Builder mirroring the teacher's `ConnectOptions` fluent setters.
#[derive(Clone, Debug, Default)]
pub struct ClientConfigBuilder {
    config: ClientConfig,
}

impl ClientConfigBuilder {
    #[must_use]
    pub fn new(server: impl Into<String>) -> Self {
        Self {
            config: ClientConfig {
                server: server.into(),
                ..ClientConfig::default()
            },
        }
    }

    #[must_use]
    pub fn port(mut self, port: u16) -> Self {
        self.config.port = port;
        self
    }

    #[must_use]
    pub fn client_id(mut self, client_id: impl Into<String>) -> Self {
        self.config.client_id = client_id.into();
        self
    }

    #[must_use]
    pub fn credentials(mut self, user: impl Into<String>, password: Option<String>) -> Self {
        self.config.user = Some(user.into());
        self.config.password = password;
        self
    }

    #[must_use]
    pub fn keepalive_secs(mut self, secs: u16) -> Self {
        self.config.keepalive_secs = secs;
        self
    }

    #[must_use]
    pub fn ping_interval_secs(mut self, secs: u16) -> Self {
        self.config.ping_interval_secs = secs;
        self
    }

    #[must_use]
    pub fn response_time_secs(mut self, secs: u64) -> Self {
        self.config.response_time_secs = secs;
        self
    }

    #[must_use]
    pub fn clean_init(mut self, clean: bool) -> Self {
        self.config.clean_init = clean;
        self
    }

    #[must_use]
    pub fn clean(mut self, clean: bool) -> Self {
        self.config.clean = clean;
        self
    }

    #[must_use]
    pub fn max_repubs(mut self, max_repubs: u32) -> Self {
        self.config.max_repubs = max_repubs;
        self
    }

    #[must_use]
    pub fn will(mut self, will: WillConfig) -> Self {
        self.config.will = Some(will);
        self
    }

    #[must_use]
    pub fn build(self) -> ClientConfig {
        self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_keepalive_disables_ping_interval() {
        let config = ClientConfigBuilder::new("broker.local")
            .keepalive_secs(0)
            .ping_interval_secs(5)
            .build();
        assert_eq!(config.ping_interval(), Duration::ZERO);
    }

    #[test]
    fn ping_interval_defaults_to_quarter_keepalive() {
        let config = ClientConfigBuilder::new("broker.local")
            .keepalive_secs(60)
            .build();
        assert_eq!(config.ping_interval(), Duration::from_secs(15));
    }

    #[test]
    fn loads_from_toml() {
        let doc = r#"
            server = "10.0.0.5"
            port = 1883
            client_id = "dev-1"
            keepalive_secs = 30
        "#;
        let config = ClientConfig::from_toml_str(doc).unwrap();
        assert_eq!(config.server, "10.0.0.5");
        assert_eq!(config.client_id, "dev-1");
    }
}
