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

use anyhow::Context;
use clap::{Args, ValueEnum};
use locus::{EndpointRecord, Registry, Resolution, SetDivision};
use prometheus::{Encoder, TextEncoder};
use serde_json::{json, Value};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Strategy {
    /// Every endpoint.
    Plain,
    /// Active endpoints only.
    Active,
    /// Group-aware, needs `--ip`.
    Group,
    /// Priority-aware, needs `--ip`.
    Priority,
    /// Station-aware, needs `--station`.
    Station,
    /// Set-aware, needs `--set`.
    Set,
}

#[derive(Debug, Args)]
pub struct ResolveArgs {
    /// Servant id, e.g. `App.Server.Obj`.
    servant: String,

    #[arg(long, value_enum, default_value_t = Strategy::Plain)]
    strategy: Strategy,

    /// Client IP for the group and priority strategies.
    #[arg(long)]
    ip: Option<String>,

    /// Station label for the station strategy.
    #[arg(long)]
    station: Option<String>,

    /// `name.area.group` for the set strategy.
    #[arg(long)]
    set: Option<String>,
}

#[derive(Debug, Args)]
pub struct DumpArgs {
    /// Only dump this servant.
    #[arg(long)]
    servant: Option<String>,
}

#[derive(Debug, Args)]
pub struct WatchArgs {
    /// How long to run the refresher, in seconds.
    #[arg(long, default_value_t = 30)]
    secs: u64,
}

fn endpoints(endpoints: &[EndpointRecord]) -> Value {
    json!(endpoints)
}

fn print(value: &Value) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

pub fn resolve(registry: &Registry, args: ResolveArgs) -> anyhow::Result<()> {
    let resolver = registry.resolver();
    let servant = args.servant.as_str();
    let ip = || args.ip.as_deref().context("--ip is required by this strategy");

    let resolution = match args.strategy {
        Strategy::Plain => resolver.resolve_plain(servant)?,
        Strategy::Active => Resolution {
            active: resolver.resolve_active(servant)?,
            inactive: vec![],
        },
        Strategy::Group => resolver.resolve_by_group(servant, ip()?)?,
        Strategy::Priority => resolver.resolve_by_priority(servant, ip()?)?,
        Strategy::Station => {
            let station = args
                .station
                .as_deref()
                .context("--station is required by this strategy")?;
            resolver.resolve_by_station(servant, station)?
        }
        Strategy::Set => {
            let set = args
                .set
                .as_deref()
                .context("--set is required by this strategy")?;
            let division: SetDivision = set.parse()?;
            resolver.resolve_by_set(servant, &division)?
        }
    };

    print(&json!({
        "servant": servant,
        "strategy": format!("{:?}", args.strategy).to_lowercase(),
        "active": endpoints(&resolution.active),
        "inactive": endpoints(&resolution.inactive),
    }))
}

pub fn dump(registry: &Registry, args: DumpArgs) -> anyhow::Result<()> {
    let snapshot = registry.snapshot();

    let display = |endpoints: &[EndpointRecord]| endpoints.iter().map(ToString::to_string).collect::<Vec<_>>();
    let servants = snapshot
        .objects
        .iter()
        .filter(|(servant, _)| args.servant.as_deref().is_none_or(|wanted| wanted == *servant))
        .map(|(servant, entry)| {
            (
                servant.to_string(),
                json!({
                    "active": display(entry.active()),
                    "inactive": display(entry.inactive()),
                }),
            )
        })
        .collect::<serde_json::Map<_, _>>();

    let priorities = snapshot
        .priorities
        .iter()
        .map(|entry| {
            json!({
                "id": entry.id,
                "rank": entry.rank,
                "station": entry.station,
                "groups": entry.groups,
            })
        })
        .collect::<Vec<_>>();

    let (active, inactive) = registry.tracker().state_counts();
    print(&json!({
        "generation": registry.generation(),
        "group_patterns": snapshot.groups.pattern_count(),
        "group_names": snapshot.groups.name_count(),
        "priorities": priorities,
        "set_servants": snapshot.sets.len(),
        "states": { "active": active, "inactive": inactive },
        "dynamic_weight_servants": registry.resolver().dynamic_weight_servants(),
        "servants": servants,
    }))
}

pub async fn watch(registry: &Registry, exported: &prometheus::Registry, args: WatchArgs) -> anyhow::Result<()> {
    let handle = registry.spawn_refresher();
    tracing::info!("[cli] refresher running for {}s", args.secs);
    tokio::time::sleep(Duration::from_secs(args.secs)).await;
    handle.stop().await?;

    let mut buf = vec![];
    TextEncoder::new()
        .encode(&exported.gather(), &mut buf)
        .context("encode metrics")?;
    print!("{}", String::from_utf8(buf).context("metrics are not utf-8")?);
    Ok(())
}
