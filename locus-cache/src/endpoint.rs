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

use std::{fmt::Display, str::FromStr};

use locus_common::error::{Error, Result};
use serde::{Deserialize, Serialize};

/// Group identifier derived from group rules. Dense small integers.
pub type GroupId = i32;

const DEFAULT_TIMEOUT_MS: u32 = 3000;
const DEFAULT_WEIGHT: i32 = -1;

/// Transport kind of an endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Transport {
    /// UDP.
    Udp,
    /// Plain TCP.
    Tcp,
    /// TCP with TLS.
    Tls,
}

impl Transport {
    fn as_str(&self) -> &'static str {
        match self {
            Transport::Udp => "udp",
            Transport::Tcp => "tcp",
            Transport::Tls => "ssl",
        }
    }
}

/// How callers are expected to weigh an endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WeightPolicy {
    /// No weight, plain rotation.
    #[default]
    RoundRobin,
    /// Fixed configured weight.
    Static,
    /// Weight adjusted at lookup time by the dynamic weight collaborator.
    Dynamic,
}

impl WeightPolicy {
    /// Decode the persisted `-v` code. Unknown codes fall back to round robin.
    pub fn from_code(code: i32) -> Self {
        match code {
            1 => Self::Static,
            2 => Self::Dynamic,
            _ => Self::RoundRobin,
        }
    }

    /// Persisted `-v` code.
    pub fn code(&self) -> i32 {
        match self {
            Self::RoundRobin => 0,
            Self::Static => 1,
            Self::Dynamic => 2,
        }
    }
}

/// Address part of an endpoint, parsed from its persisted text form.
///
/// ```text
/// tcp -h 10.0.0.1 -p 10000 -t 60000 -w 100 -v 1 -e 0
/// ```
///
/// The first token is the protocol (`tcp`, `udp`, `ssl` or `tls`). `-h` and `-p` are required, unknown options are
/// skipped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EndpointAddress {
    /// Host, usually a dotted IPv4 address.
    pub host: String,
    /// Port.
    pub port: u16,
    /// Transport kind.
    pub transport: Transport,
    /// Call timeout in milliseconds.
    pub timeout: u32,
    /// Configured weight. `-1` when unset.
    pub weight: i32,
    /// Weight policy.
    pub weight_policy: WeightPolicy,
    /// Auth requirement code. `0` means none.
    pub auth_type: i32,
}

fn option_value<'a>(text: &str, flag: &'static str, value: Option<&'a str>) -> Result<&'a str> {
    value.ok_or_else(|| Error::parse("endpoint", text, format!("option {flag} requires a value")))
}

fn parse_number<T: FromStr>(text: &str, flag: &'static str, value: &str) -> Result<T> {
    value
        .parse()
        .map_err(|_| Error::parse("endpoint", text, format!("option {flag} has invalid value {value:?}")))
}

impl FromStr for EndpointAddress {
    type Err = Error;

    fn from_str(text: &str) -> Result<Self> {
        let mut tokens = text.split_whitespace().peekable();

        let transport = match tokens.next().map(|t| t.to_ascii_lowercase()).as_deref() {
            Some("tcp") => Transport::Tcp,
            Some("udp") => Transport::Udp,
            Some("ssl") | Some("tls") => Transport::Tls,
            Some(other) => return Err(Error::parse("endpoint", text, format!("unknown protocol {other:?}"))),
            None => return Err(Error::parse("endpoint", text, "empty endpoint")),
        };

        let mut host = None;
        let mut port = None;
        let mut timeout = DEFAULT_TIMEOUT_MS;
        let mut weight = DEFAULT_WEIGHT;
        let mut weight_policy = WeightPolicy::default();
        let mut auth_type = 0;

        while let Some(token) = tokens.next() {
            match token {
                "-h" => host = Some(option_value(text, "-h", tokens.next())?.to_string()),
                "-p" => port = Some(parse_number::<u16>(text, "-p", option_value(text, "-p", tokens.next())?)?),
                "-t" => timeout = parse_number(text, "-t", option_value(text, "-t", tokens.next())?)?,
                "-w" => weight = parse_number(text, "-w", option_value(text, "-w", tokens.next())?)?,
                "-v" => {
                    weight_policy =
                        WeightPolicy::from_code(parse_number(text, "-v", option_value(text, "-v", tokens.next())?)?)
                }
                "-e" => auth_type = parse_number(text, "-e", option_value(text, "-e", tokens.next())?)?,
                flag if flag.starts_with('-') => {
                    // Unknown option, drop its value if it has one.
                    if tokens.peek().is_some_and(|next| !next.starts_with('-')) {
                        tokens.next();
                    }
                }
                other => return Err(Error::parse("endpoint", text, format!("unexpected token {other:?}"))),
            }
        }

        let host = host
            .filter(|h| !h.is_empty())
            .ok_or_else(|| Error::parse("endpoint", text, "missing host"))?;
        let port = port.ok_or_else(|| Error::parse("endpoint", text, "missing port"))?;

        Ok(Self {
            host,
            port,
            transport,
            timeout,
            weight,
            weight_policy,
            auth_type,
        })
    }
}

impl Display for EndpointAddress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} -h {} -p {} -t {}",
            self.transport.as_str(),
            self.host,
            self.port,
            self.timeout
        )?;
        if self.weight != DEFAULT_WEIGHT {
            write!(f, " -w {} -v {}", self.weight, self.weight_policy.code())?;
        }
        if self.auth_type != 0 {
            write!(f, " -e {}", self.auth_type)?;
        }
        Ok(())
    }
}

/// One network-reachable instance of a servant, as handed out to clients.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EndpointRecord {
    /// Host.
    pub host: String,
    /// Port.
    pub port: u16,
    /// Transport kind.
    pub transport: Transport,
    /// Call timeout in milliseconds.
    pub timeout: u32,
    /// Configured weight.
    pub weight: i32,
    /// Weight policy.
    pub weight_policy: WeightPolicy,
    /// Auth requirement code.
    pub auth_type: i32,
    /// Group derived from the host or the configured group name.
    pub real_group: Option<GroupId>,
    /// `real_group` when grouping is enabled for the endpoint, otherwise `None`.
    pub work_group: Option<GroupId>,
    /// `name.area.group` when the server enables sets.
    pub set_id: Option<String>,
    /// Backup endpoints are never handed out.
    pub backup: bool,
}

impl EndpointRecord {
    /// Create an ungrouped, non-set, non-backup record from a parsed address.
    pub fn new(address: EndpointAddress) -> Self {
        Self {
            host: address.host,
            port: address.port,
            transport: address.transport,
            timeout: address.timeout,
            weight: address.weight,
            weight_policy: address.weight_policy,
            auth_type: address.auth_type,
            real_group: None,
            work_group: None,
            set_id: None,
            backup: false,
        }
    }

    /// Set the real group, and the work group too if `enable_group` holds.
    pub fn with_group(mut self, real_group: Option<GroupId>, enable_group: bool) -> Self {
        self.real_group = real_group;
        self.work_group = if enable_group { real_group } else { None };
        self
    }

    /// Set the set id.
    pub fn with_set_id(mut self, set_id: Option<String>) -> Self {
        self.set_id = set_id;
        self
    }

    /// Set the backup flag.
    pub fn with_backup(mut self, backup: bool) -> Self {
        self.backup = backup;
        self
    }
}

impl Display for EndpointRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}({})", self.host, self.port, self.transport.as_str())
    }
}
