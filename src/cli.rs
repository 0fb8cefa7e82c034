use std::{env, path::PathBuf};

use anyhow::{Result, anyhow};

use crate::types::IsolationLevel;

const USAGE: &str =
    "usage: claimbench [<config-path>] [--isolation <weak|repeatable|strict>] [--actors <n>[,<n>...]]";

const DEFAULT_CONFIG_FILE: &str = "claimbench.jsonc";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CliOptions {
    pub config_path: PathBuf,
    /// Restricts the sweep to one isolation level.
    pub isolation: Option<IsolationLevel>,
    /// Replaces the configured actor counts.
    pub actor_counts: Option<Vec<usize>>,
}

pub fn cli_options_from_args() -> Result<CliOptions> {
    parse_cli_options(env::args().skip(1))
}

pub fn parse_cli_options<I>(mut args: I) -> Result<CliOptions>
where
    I: Iterator<Item = String>,
{
    let mut config_path = None;
    let mut isolation = None;
    let mut actor_counts = None;

    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--isolation" => {
                let value = args
                    .next()
                    .ok_or_else(|| anyhow!("missing value for --isolation. {USAGE}"))?;
                isolation = Some(value.parse::<IsolationLevel>().map_err(|err| anyhow!(err))?);
            }
            "--actors" => {
                let value = args
                    .next()
                    .ok_or_else(|| anyhow!("missing value for --actors. {USAGE}"))?;
                actor_counts = Some(parse_actor_counts(&value)?);
            }
            other if other.starts_with("--") => {
                return Err(anyhow!("unknown argument: {other}. {USAGE}"));
            }
            path => {
                if config_path.is_some() {
                    return Err(anyhow!("expected at most one config path. {USAGE}"));
                }
                config_path = Some(PathBuf::from(path));
            }
        }
    }

    let config_path = match config_path {
        Some(path) => path,
        None => env::current_dir()?.join(DEFAULT_CONFIG_FILE),
    };

    Ok(CliOptions {
        config_path,
        isolation,
        actor_counts,
    })
}

fn parse_actor_counts(raw: &str) -> Result<Vec<usize>> {
    let counts = raw
        .split(',')
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .map(|part| match part.parse::<usize>() {
            Ok(0) => Err(anyhow!("actor count must be positive, got 0")),
            Ok(count) => Ok(count),
            Err(_) => Err(anyhow!("invalid actor count '{part}'")),
        })
        .collect::<Result<Vec<_>>>()?;

    if counts.is_empty() {
        return Err(anyhow!("--actors needs at least one count. {USAGE}"));
    }
    Ok(counts)
}
