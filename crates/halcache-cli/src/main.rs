//! `halcache`: read HAL resources through the remote-data cache.
//!
//! # Usage
//!
//! ```text
//! halcache --root https://demo.example.org/server/api get <HREF> --follow bundles/bitstreams
//! halcache --config halcache.toml list <HREF> --page 1 --size 20
//! ```
//!
//! Prints the first completed `RemoteData` as JSON. Followed links are
//! resolved too and printed under `_resolved`.

mod output;

use std::{path::PathBuf, sync::Arc, time::Duration};

use anyhow::Context as _;
use clap::{Parser, Subcommand};
use futures::future::join_all;
use halcache_core::{
  follow::FollowLinkConfig,
  list::FindListOptions,
  resource::{Linkable, LinkedResources},
};
use halcache_data::{CacheConfig, DataContext, first_completed};
use halcache_http::HttpTransport;
use serde_json::{Map, Value};
use tracing::{level_filters::LevelFilter, warn};
use tracing_subscriber::EnvFilter;

// ─── CLI args ────────────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(name = "halcache", version, about = "Read HAL resources through the remote-data cache")]
struct Args {
  /// Config file with `rest_root`, `response_ms_to_live` and
  /// `request_timeout_secs`.
  #[arg(short, long, value_name = "FILE")]
  config: Option<PathBuf>,

  /// REST root of the API. Overrides the config file.
  #[arg(long, env = "HALCACHE_REST_ROOT")]
  root: Option<String>,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
  /// Read a single resource.
  Get {
    href:     String,
    /// Link to follow, `/` separated for nested links. Repeatable.
    #[arg(long = "follow", value_name = "LINK")]
    follow:   Vec<String>,
    /// Always send a new request.
    #[arg(long)]
    no_cache: bool,
  },
  /// Read a page of a list.
  List {
    href:     String,
    #[arg(long = "follow", value_name = "LINK")]
    follow:   Vec<String>,
    #[arg(long)]
    no_cache: bool,
    /// 1-based page number.
    #[arg(long)]
    page:     Option<usize>,
    #[arg(long)]
    size:     Option<usize>,
  },
}

// ─── Entry point ─────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> anyhow::Result<()> {
  // Logs go to stderr so stdout stays valid JSON.
  tracing_subscriber::fmt()
    .with_writer(std::io::stderr)
    .with_env_filter(
      EnvFilter::builder()
        .with_default_directive(LevelFilter::INFO.into())
        .from_env_lossy(),
    )
    .init();

  let args = Args::parse();
  let config = load_config(&args)?;
  let transport = HttpTransport::new(Duration::from_secs(config.request_timeout_secs))?;
  let context = DataContext::new(config, Arc::new(transport))?;
  let core = context.core();

  let rendered = match args.command {
    Command::Get { href, follow, no_cache } => {
      let links = follow_links(&follow);
      let rd = first_completed(core.find_by_href(&href, !no_cache, true, &links))
        .await
        .with_context(|| format!("reading {href}"))?;
      let resolved = match rd.payload.value() {
        Some(instance) => resolve_links(instance.linked(), &links).await,
        None => Map::new(),
      };
      output::with_resolved(output::render(&rd, output::instance_value), resolved)
    }
    Command::List { href, follow, no_cache, page, size } => {
      let links = follow_links(&follow);
      let options = FindListOptions {
        current_page: page,
        elements_per_page: size,
        ..Default::default()
      };
      let rd = first_completed(core.find_list_by_href(&href, &options, !no_cache, true, &links))
        .await
        .with_context(|| format!("reading {href}"))?;
      output::render(&rd, output::list_value)
    }
  };

  println!("{}", serde_json::to_string_pretty(&rendered)?);
  Ok(())
}

fn load_config(args: &Args) -> anyhow::Result<CacheConfig> {
  let file = match &args.config {
    Some(path) => config::File::from(path.clone()).required(true),
    None => config::File::with_name("halcache").required(false),
  };
  let settings = config::Config::builder()
    .add_source(file)
    .add_source(config::Environment::with_prefix("HALCACHE"))
    .set_override_option("rest_root", args.root.clone())?
    .build()
    .context("failed to read config")?;

  settings
    .try_deserialize()
    .context("failed to deserialise CacheConfig (is rest_root set?)")
}

fn follow_links(paths: &[String]) -> Vec<FollowLinkConfig> {
  paths.iter().filter_map(|path| output::parse_follow(path)).collect()
}

/// First completed value of every followed link, rendered.
async fn resolve_links(
  linked: &LinkedResources,
  links: &[FollowLinkConfig],
) -> Map<String, Value> {
  let reads = links.iter().map(|link| async move {
    let rendered = if let Some(stream) = linked.single(&link.name) {
      first_completed(stream).await.map(|rd| output::render(&rd, output::instance_value))
    } else if let Some(stream) = linked.list(&link.name) {
      first_completed(stream).await.map(|rd| output::render(&rd, output::list_value))
    } else {
      return None;
    };
    match rendered {
      Ok(value) => Some((link.name.clone(), value)),
      Err(e) => {
        warn!(link = %link.name, "could not resolve link: {e}");
        None
      }
    }
  });
  join_all(reads).await.into_iter().flatten().collect()
}
