//! Configuration loading.
//!
//! Each subcommand's flags double as an optional TOML config file: the
//! file supplies defaults, CLI flags override them field by field.

use std::path::Path;
use std::time::Duration;

use anyhow::{bail, Context, Error};
use serde::Deserialize;

/// On-disk configuration for the `scheduler` subcommand.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct SchedulerFileConfig {
    pub address: Option<String>,
    pub storage_type: Option<String>,
    pub algo: Option<String>,
}

/// On-disk configuration for the `node` subcommand.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct NodeFileConfig {
    pub name: Option<String>,
    pub ipv4: Option<String>,
    pub port: Option<u16>,
    pub max_conns: Option<u32>,
    pub data_dir: Option<String>,
    pub upstream: Option<String>,
    pub insecure: Option<bool>,
    pub proxy_regex: Option<String>,
    pub scheduler_address: Option<String>,
    pub gc_max_atime_age: Option<String>,
    pub gc_interval: Option<String>,
    pub gc_max_disk_usage: Option<String>,
}

/// Reads and parses a TOML config file, if `path` is given.
pub fn load<T>(path: Option<&Path>) -> Result<T, Error>
where
    T: Default + for<'de> Deserialize<'de>,
{
    let path = match path {
        Some(p) => p,
        None => return Ok(T::default()),
    };

    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("unable to read config file '{}'", path.display()))?;

    toml::from_str(&contents)
        .with_context(|| format!("unable to parse config file '{}'", path.display()))
}

/// Parses a human size like `10M`, `4G`, `512` (bytes, no suffix) into a byte count.
///
/// Recognized suffixes: `K`, `M`, `G`, `T`, `P`, `E` (binary, i.e. powers of 1024),
/// matching the `--gc-max-disk-usage` flag.
pub fn parse_size(input: &str) -> Result<u64, Error> {
    let input = input.trim();
    if input.is_empty() {
        bail!("empty size value");
    }

    let (digits, suffix) = match input.find(|c: char| !c.is_ascii_digit() && c != '.') {
        Some(idx) => input.split_at(idx),
        None => (input, ""),
    };

    let value: f64 = digits
        .parse()
        .with_context(|| format!("invalid numeric size '{}'", digits))?;

    let multiplier: u64 = match suffix.trim().to_uppercase().as_str() {
        "" | "B" => 1,
        "K" => 1024,
        "M" => 1024u64.pow(2),
        "G" => 1024u64.pow(3),
        "T" => 1024u64.pow(4),
        "P" => 1024u64.pow(5),
        "E" => 1024u64.pow(6),
        other => bail!("unknown size suffix '{}'", other),
    };

    Ok((value * multiplier as f64) as u64)
}

/// Parses a duration like `10s`, `5m`, `2h`, `1d`.
pub fn parse_duration(input: &str) -> Result<Duration, Error> {
    let input = input.trim();
    if input.is_empty() {
        bail!("empty duration value");
    }

    let (digits, suffix) = match input.find(|c: char| !c.is_ascii_digit()) {
        Some(idx) => input.split_at(idx),
        None => (input, "s"),
    };

    let value: u64 = digits
        .parse()
        .with_context(|| format!("invalid numeric duration '{}'", digits))?;

    let seconds = match suffix {
        "s" => value,
        "m" => value * 60,
        "h" => value * 3600,
        "d" => value * 86400,
        other => bail!("unknown duration suffix '{}'", other),
    };

    Ok(Duration::from_secs(seconds))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_plain_bytes() {
        assert_eq!(parse_size("512").unwrap(), 512);
    }

    #[test]
    fn parses_binary_suffixes() {
        assert_eq!(parse_size("10M").unwrap(), 10 * 1024 * 1024);
        assert_eq!(parse_size("1G").unwrap(), 1024 * 1024 * 1024);
    }

    #[test]
    fn rejects_unknown_suffix() {
        assert!(parse_size("10X").is_err());
    }

    #[test]
    fn parses_durations() {
        assert_eq!(parse_duration("30s").unwrap(), Duration::from_secs(30));
        assert_eq!(parse_duration("5m").unwrap(), Duration::from_secs(300));
        assert_eq!(parse_duration("2h").unwrap(), Duration::from_secs(7200));
    }

    #[test]
    fn default_config_when_no_path() {
        let cfg: NodeFileConfig = load(None).unwrap();
        assert!(cfg.name.is_none());
    }
}
