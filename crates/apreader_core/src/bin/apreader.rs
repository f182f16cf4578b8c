/*
 * SPDX-FileCopyrightText: 2026 RedHunt07 - FEDI3 Project
 * SPDX-License-Identifier: AGPL-3.0-only
 */

use anyhow::{Context, Result};
use apreader_core::config::default_config_path;
use apreader_core::query::{NoteFilter, SearchOptions};
use apreader_core::social_db::TIMELINE_ALL;
use apreader_core::{IngestMode, Reader, ReaderConfig};
use serde::Serialize;
use std::future::Future;
use std::path::PathBuf;
use tracing::{info, warn};

const USAGE: &str = "usage: apreader [--config <path>] <command>

commands:
  follow <actor-url>
  unfollow <actor-url>
  refresh
  ingest <actor-url>
  timeline [all|following] [limit]
  notes <actor-id> [limit]
  replies <note-id>
  actors
  followed
  resolve <url>
  theme [name]";

struct Cli {
    config: Option<PathBuf>,
    command: Vec<String>,
}

fn parse_args() -> Result<Cli> {
    let mut config = None;
    let mut command = Vec::new();
    let mut args = std::env::args().skip(1);
    while let Some(arg) = args.next() {
        if arg == "--config" {
            let path = args.next().ok_or_else(|| anyhow::anyhow!("--config requires a path"))?;
            config = Some(PathBuf::from(path));
        } else {
            command.push(arg);
        }
    }
    Ok(Cli { config, command })
}

fn config_path(cli: &Cli) -> PathBuf {
    if let Some(p) = &cli.config {
        return p.clone();
    }
    if let Ok(path) = std::env::var("APREADER_CONFIG") {
        if !path.trim().is_empty() {
            return PathBuf::from(path);
        }
    }
    default_config_path()
}

fn print_line<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string(value).context("encode output")?);
    Ok(())
}

fn parse_limit(arg: Option<&String>, default: usize) -> Result<usize> {
    match arg {
        Some(s) => s.parse().with_context(|| format!("invalid limit: {s}")),
        None => Ok(default),
    }
}

/// Runs `fut` unless Ctrl-C arrives first.
async fn interruptible<T>(fut: impl Future<Output = Result<T>>) -> Result<T> {
    tokio::select! {
        res = fut => res,
        _ = tokio::signal::ctrl_c() => {
            warn!("interrupted");
            Err(anyhow::anyhow!("interrupted"))
        }
    }
}

async fn run(reader: &Reader, cfg: &ReaderConfig, command: &[String]) -> Result<()> {
    let arg = |i: usize| {
        command
            .get(i)
            .ok_or_else(|| anyhow::anyhow!("missing argument\n\n{USAGE}"))
    };
    let Some(name) = command.first() else {
        anyhow::bail!("{USAGE}");
    };
    match name.as_str() {
        "follow" => {
            let url = arg(1)?;
            let summary = interruptible(async { Ok(reader.follow_actor(url).await?) }).await?;
            info!("ingested {} activities from {url}", summary.new_activities);
        }
        "unfollow" => {
            reader.unfollow_actor(arg(1)?).await?;
        }
        "refresh" => {
            // First run in a fresh store also follows the configured default actors.
            let report = match interruptible(async { Ok(reader.start().await?) }).await? {
                Some(report) => report,
                None => reader.ingest_all_followed_actors().await?,
            };
            print_line(&report)?;
        }
        "ingest" => {
            let url = arg(1)?;
            let summary = interruptible(async { Ok(reader.ingest_actor(url, IngestMode::CatchUp).await?) })
                .await?;
            info!("ingested {} activities from {url}", summary.new_activities);
        }
        "timeline" => {
            let label = command.get(1).map(String::as_str).unwrap_or(TIMELINE_ALL);
            let opts = SearchOptions {
                limit: Some(parse_limit(command.get(2), cfg.default_limit())?),
                ..SearchOptions::default()
            };
            let filter = NoteFilter::timeline(label);
            let total = reader.db().count_notes_matching(&filter)?;
            info!("{total} notes in the {label} timeline");
            for note in reader.search_notes(&filter, opts)? {
                print_line(&note)?;
            }
        }
        "notes" => {
            let opts = SearchOptions {
                limit: Some(parse_limit(command.get(2), cfg.default_limit())?),
                ..SearchOptions::default()
            };
            for note in reader.search_notes(&NoteFilter::by_author(arg(1)?.as_str()), opts)? {
                print_line(&note)?;
            }
        }
        "replies" => {
            let note_id = arg(1)?;
            let count = reader.reply_count(note_id).await?;
            let opts = SearchOptions {
                limit: None,
                sort: apreader_core::SortOrder::Ascending,
                ..SearchOptions::default()
            };
            info!("{count} replies to {note_id}");
            for note in reader.search_notes(&NoteFilter::replies_to(note_id.as_str()), opts)? {
                print_line(&note)?;
            }
        }
        "actors" => {
            for actor in reader.get_all_actors()? {
                print_line(&actor)?;
            }
        }
        "followed" => {
            for f in reader.get_followed_actors()? {
                print_line(&f)?;
            }
        }
        "resolve" => {
            print_line(&reader.resolve_url(arg(1)?).await?)?;
        }
        "theme" => match command.get(1) {
            Some(theme) => reader.set_theme(theme)?,
            None => print_line(&reader.get_theme()?)?,
        },
        other => anyhow::bail!("unknown command: {other}\n\n{USAGE}"),
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let _ = tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("info".parse().context("log directive")?),
        )
        .try_init();

    let cli = parse_args()?;
    let cfg_path = config_path(&cli);
    let cfg = ReaderConfig::load(&cfg_path)
        .with_context(|| format!("load config {}", cfg_path.display()))?;
    let reader = Reader::open(cfg.clone()).context("open reader store")?;
    info!("apreader {} (store: {})", apreader_core::version(), reader.db().path().display());
    run(&reader, &cfg, &cli.command).await
}
