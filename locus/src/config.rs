// Copyright 2026 locus Project Authors
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use std::time::Duration;

use locus_common::error::{Error, ErrorKind, Result};
use serde::{Deserialize, Serialize};

/// Registry configuration.
///
/// Every field has a default, so a partial document deserializes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistryConfig {
    /// Refuse to publish a reload while too many nodes are inactive.
    pub recover_protect: bool,
    /// Inactive node percentage, `0..=100`, at which recover protection trips.
    pub recover_protect_rate: u32,
    /// Interval between incremental reloads.
    pub refresh_interval_secs: u64,
    /// How far back an incremental reload looks for changed rows. Must cover the refresh interval.
    pub incremental_window_secs: u64,
    /// Interval between full reloads.
    pub full_reload_interval_secs: u64,
    /// Max state updates persisted per store write.
    pub sync_chunk_size: usize,
    /// Skip the registry heartbeat write.
    pub heartbeat_off: bool,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            recover_protect: true,
            recover_protect_rate: 30,
            refresh_interval_secs: 10,
            incremental_window_secs: 60,
            full_reload_interval_secs: 3600,
            sync_chunk_size: 1000,
            heartbeat_off: false,
        }
    }
}

impl RegistryConfig {
    /// Parse a JSON document and validate it.
    pub fn from_json(text: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(text)
            .map_err(|e| Error::new(ErrorKind::Config, "invalid registry config").with_source(e))?;
        config.validate()?;
        Ok(config)
    }

    /// Check the field constraints.
    pub fn validate(&self) -> Result<()> {
        if self.recover_protect_rate > 100 {
            return Err(Error::new(ErrorKind::Config, "recover protect rate must be within 0..=100")
                .with_context("recover_protect_rate", self.recover_protect_rate));
        }
        if self.refresh_interval_secs == 0 {
            return Err(Error::new(ErrorKind::Config, "refresh interval must be positive"));
        }
        if self.incremental_window_secs < self.refresh_interval_secs {
            return Err(
                Error::new(ErrorKind::Config, "incremental window must cover the refresh interval")
                    .with_context("incremental_window_secs", self.incremental_window_secs)
                    .with_context("refresh_interval_secs", self.refresh_interval_secs),
            );
        }
        if self.full_reload_interval_secs < self.refresh_interval_secs {
            return Err(
                Error::new(ErrorKind::Config, "full reload interval must not be shorter than the refresh interval")
                    .with_context("full_reload_interval_secs", self.full_reload_interval_secs),
            );
        }
        if self.sync_chunk_size == 0 {
            return Err(Error::new(ErrorKind::Config, "sync chunk size must be positive"));
        }
        Ok(())
    }

    /// Interval between incremental reloads.
    pub fn refresh_interval(&self) -> Duration {
        Duration::from_secs(self.refresh_interval_secs)
    }

    /// Look-back window of incremental reloads.
    pub fn incremental_window(&self) -> Duration {
        Duration::from_secs(self.incremental_window_secs)
    }

    /// Interval between full reloads.
    pub fn full_reload_interval(&self) -> Duration {
        Duration::from_secs(self.full_reload_interval_secs)
    }
}
