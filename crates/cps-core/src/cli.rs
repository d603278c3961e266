//! The `cps` operator CLI: argument types and command dispatch.
//!
//! Commands return a JSON document and an [`ExitCode`]; printing is left
//! to the binary.

use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use clap::{ArgAction, Parser, Subcommand};
use cps_common::{max_time, min_time, DatasetId, Error, Result};
use cps_config::{resolve_config, StoreConfig};
use serde_json::{json, Value};
use tracing::info;

use crate::clock::Clock;
use crate::exit_codes::ExitCode;
use crate::logging::LogFormat;
use crate::range::TimeRange;
use crate::site_model::SiteModel;
use crate::storage::{build_proxy, file_caches, StorageProxy};
use crate::telemetry::{group_by_cell, read_records};

/// Directory name used under the platform data dir when `--store` is not
/// given.
pub const STORE_DIR_NAME: &str = "compaction_pass_store";

/// Compaction pass store operator tool
#[derive(Parser, Debug)]
#[command(name = "cps", version, about)]
pub struct Cli {
    /// Configuration file (otherwise CPS_CONFIG, then the user config dir)
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Store root directory
    #[arg(long, global = true, value_name = "DIR")]
    pub store: Option<PathBuf>,

    /// Dataset to operate on (ingest creates one when omitted)
    #[arg(long, global = true, value_name = "UUID")]
    pub dataset: Option<DatasetId>,

    /// Log output format
    #[arg(long, global = true, value_enum, default_value_t = LogFormat::Text)]
    pub log_format: LogFormat,

    /// Increase log verbosity (-v info, -vv debug, -vvv trace)
    #[arg(short, long, global = true, action = ArgAction::Count)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Ingest line-delimited JSON telemetry, then flush and commit
    Ingest {
        /// Telemetry file, one record per line
        path: PathBuf,
    },
    /// Pass history of one cell
    History {
        #[arg(long)]
        x: u32,
        #[arg(long)]
        y: u32,
        /// Earliest pass time (inclusive)
        #[arg(long)]
        from: Option<DateTime<Utc>>,
        /// Latest pass time (exclusive)
        #[arg(long)]
        to: Option<DateTime<Utc>>,
    },
    /// The pass describing one cell as of a time
    Locate {
        #[arg(long)]
        x: u32,
        #[arg(long)]
        y: u32,
        /// Defaults to now
        #[arg(long)]
        at: Option<DateTime<Utc>>,
    },
    /// Latest known heights of the subgrid containing a cell
    Heights {
        #[arg(long)]
        x: u32,
        #[arg(long)]
        y: u32,
        /// Defaults to now
        #[arg(long)]
        at: Option<DateTime<Utc>>,
    },
    /// Leaf, segment, pass and machine counts
    Stats,
}

/// Run the parsed command.
pub fn execute(cli: &Cli, clock: &dyn Clock) -> Result<(ExitCode, Value)> {
    let config = resolve_config(cli.config.as_deref())?.config;
    let store = match &cli.store {
        Some(path) => path.clone(),
        None => default_store_dir()?,
    };

    match &cli.command {
        Command::Ingest { path } => run_ingest(&config, &store, cli.dataset, path),
        Command::History { x, y, from, to } => {
            let range = TimeRange::new(from.unwrap_or_else(min_time), to.unwrap_or_else(max_time));
            run_history(&config, &store, require_dataset(cli)?, *x, *y, range)
        }
        Command::Locate { x, y, at } => {
            let at = at.unwrap_or_else(|| clock.now());
            run_locate(&config, &store, require_dataset(cli)?, *x, *y, at)
        }
        Command::Heights { x, y, at } => {
            let at = at.unwrap_or_else(|| clock.now());
            run_heights(&config, &store, require_dataset(cli)?, *x, *y, at)
        }
        Command::Stats => run_stats(&config, &store, require_dataset(cli)?),
    }
}

/// The JSON document reported for a failed command.
pub fn error_document(error: &Error) -> Value {
    json!({
        "error": {
            "code": error.code(),
            "message": error.to_string(),
            "retryable": error.is_retryable(),
        }
    })
}

fn default_store_dir() -> Result<PathBuf> {
    dirs::data_dir()
        .map(|d| d.join(STORE_DIR_NAME))
        .ok_or_else(|| Error::Config("no data directory; pass --store".to_string()))
}

fn require_dataset(cli: &Cli) -> Result<DatasetId> {
    cli.dataset
        .ok_or_else(|| Error::Config("--dataset is required for this command".to_string()))
}

fn open_proxy(config: &StoreConfig, store: &Path, with_immutable: bool) -> Result<StorageProxy> {
    let (mutable, immutable) = file_caches(store)?;
    Ok(build_proxy(
        &config.storage,
        mutable,
        with_immutable.then_some(immutable),
    ))
}

fn open_model(config: &StoreConfig, store: &Path, dataset: DatasetId) -> Result<(StorageProxy, SiteModel)> {
    let proxy = open_proxy(config, store, false)?;
    let model = SiteModel::load(dataset, &proxy, config.clone())?;
    Ok((proxy, model))
}

fn run_ingest(
    config: &StoreConfig,
    store: &Path,
    dataset: Option<DatasetId>,
    path: &Path,
) -> Result<(ExitCode, Value)> {
    let dataset = dataset.unwrap_or_default();
    let records = read_records(BufReader::new(File::open(path)?))?;

    let mut proxy = open_proxy(config, store, true)?;
    let model = SiteModel::load(dataset, &proxy, config.clone())?;

    let mut added = 0;
    let mut modified = 0;
    let cells = group_by_cell(&records);
    for (&(x, y), cell_records) in &cells {
        let mut passes = Vec::with_capacity(cell_records.len());
        for record in cell_records {
            let machine_id = model.register_machine(&record.machine, record.john_doe)?;
            passes.push(record.to_pass(machine_id)?);
        }
        let counts = model.integrate_cell_passes(&proxy, x, y, &passes)?;
        added += counts.added;
        modified += counts.modified;
    }
    let flush = model.flush(&mut proxy)?;
    info!(
        dataset = %dataset,
        records = records.len(),
        cells = cells.len(),
        added,
        modified,
        "ingest complete"
    );

    Ok((
        ExitCode::Clean,
        json!({
            "dataset": dataset,
            "records": records.len(),
            "cells": cells.len(),
            "added": added,
            "modified": modified,
            "machines": model.machine_count(),
            "flush": flush,
        }),
    ))
}

fn run_history(
    config: &StoreConfig,
    store: &Path,
    dataset: DatasetId,
    x: u32,
    y: u32,
    range: TimeRange,
) -> Result<(ExitCode, Value)> {
    let (proxy, model) = open_model(config, store, dataset)?;
    let passes = model.cell_passes(&proxy, x, y, range)?;
    let code = if passes.is_empty() {
        ExitCode::NoData
    } else {
        ExitCode::Clean
    };
    Ok((
        code,
        json!({
            "dataset": dataset,
            "x": x,
            "y": y,
            "from": range.start,
            "to": range.end,
            "count": passes.len(),
            "passes": passes,
        }),
    ))
}

fn run_locate(
    config: &StoreConfig,
    store: &Path,
    dataset: DatasetId,
    x: u32,
    y: u32,
    at: DateTime<Utc>,
) -> Result<(ExitCode, Value)> {
    let (proxy, model) = open_model(config, store, dataset)?;
    let pass = model.latest_pass_at(&proxy, x, y, at)?;
    let machine = pass
        .as_ref()
        .and_then(|p| model.machines().get(p.machine_id).map(|m| m.name.clone()));
    let code = if pass.is_some() {
        ExitCode::Clean
    } else {
        ExitCode::NoData
    };
    Ok((
        code,
        json!({
            "dataset": dataset,
            "x": x,
            "y": y,
            "at": at,
            "exact": pass.as_ref().is_some_and(|p| p.time == at),
            "machine": machine,
            "pass": pass,
        }),
    ))
}

fn run_heights(
    config: &StoreConfig,
    store: &Path,
    dataset: DatasetId,
    x: u32,
    y: u32,
    at: DateTime<Utc>,
) -> Result<(ExitCode, Value)> {
    let (proxy, model) = open_model(config, store, dataset)?;
    let Some((origin, grid)) = model.heights_at(&proxy, x, y, at)? else {
        return Ok((
            ExitCode::NoData,
            json!({ "dataset": dataset, "x": x, "y": y, "at": at, "subgrid": null }),
        ));
    };
    let rows: Vec<Vec<Option<f32>>> = (0..crate::pass_store::DIM)
        .map(|cy| {
            (0..crate::pass_store::DIM)
                .map(|cx| (!grid.is_null(cx, cy)).then(|| grid.get(cx, cy)))
                .collect()
        })
        .collect();
    Ok((
        ExitCode::Clean,
        json!({
            "dataset": dataset,
            "at": at,
            "subgrid": origin,
            "populated": grid.populated(),
            "rows": rows,
        }),
    ))
}

fn run_stats(config: &StoreConfig, store: &Path, dataset: DatasetId) -> Result<(ExitCode, Value)> {
    let (_proxy, model) = open_model(config, store, dataset)?;
    let machines = model.machines();
    Ok((
        ExitCode::Clean,
        json!({
            "dataset": dataset,
            "stats": model.stats(),
            "machines": machines.iter().collect::<Vec<_>>(),
        }),
    ))
}
