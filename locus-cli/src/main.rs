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

//! `locus-cli` runs the registry lookup core over a JSON fixture of the persistent store.

mod command;

use std::{path::PathBuf, sync::Arc};

use clap::{Parser, Subcommand};
use command::{DumpArgs, ResolveArgs, WatchArgs};
use locus::{MemoryStore, RegistryBuilder, RegistryConfig};
use mixtrics::registry::prometheus::PrometheusMetricsRegistry;

#[derive(Debug, Parser)]
#[command(author, version, about)]
struct Cli {
    /// JSON file holding the store tables.
    #[arg(short, long)]
    store: PathBuf,

    /// JSON file holding the registry config.
    #[arg(short, long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Resolve a servant with one of the lookup strategies.
    Resolve(ResolveArgs),
    /// Print the loaded caches.
    Dump(DumpArgs),
    /// Run the background refresher for a while, then print the counters in prometheus text format.
    Watch(WatchArgs),
}

fn init_logger() {
    use tracing_subscriber::{prelude::*, EnvFilter};

    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(EnvFilter::from_default_env())
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_logger();

    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => RegistryConfig::from_json(&std::fs::read_to_string(path)?)?,
        None => RegistryConfig::default(),
    };
    let store = Arc::new(MemoryStore::open(&cli.store)?);
    let exported = prometheus::Registry::new();
    let registry = RegistryBuilder::new(store)
        .with_config(config)
        .with_metrics_registry(Box::new(PrometheusMetricsRegistry::new(exported.clone())))
        .build()?;

    match cli.command {
        Command::Resolve(args) => command::resolve(&registry, args),
        Command::Dump(args) => command::dump(&registry, args),
        Command::Watch(args) => command::watch(&registry, &exported, args).await,
    }
}
