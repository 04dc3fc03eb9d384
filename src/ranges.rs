use anyhow::{Context, Result};
use ipnet::Ipv4Net;
use std::fs;
use std::net::Ipv4Addr;
use std::path::Path;
use thiserror::Error;

use crate::types::WorkItem;

/// Largest host count a single IPv4 range descriptor can carry.
const MAX_HOST_COUNT: u64 = 1 << 32;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RangeParseError {
    #[error("missing '/' in range descriptor: {0}")]
    MissingSeparator(String),
    #[error("invalid start address in {descriptor}: {reason}")]
    BadAddress { descriptor: String, reason: String },
    #[error("invalid host count in {descriptor}: {reason}")]
    BadCount { descriptor: String, reason: String },
    #[error("host count must be non-zero: {0}")]
    ZeroCount(String),
    #[error("host count exceeds the IPv4 space: {0}")]
    CountTooLarge(String),
}

/// Parse a registry range descriptor `start/count` into a network.
///
/// `count` is a number of addresses, not a prefix length. The prefix is
/// `32 - floor(log2(count))`, so counts that are not powers of two round down
/// to the largest enclosing power of two. Host bits of `start` are dropped.
pub fn parse_range(descriptor: &str) -> Result<Ipv4Net, RangeParseError> {
    let descriptor = descriptor.trim();
    let (addr, count) = descriptor
        .split_once('/')
        .ok_or_else(|| RangeParseError::MissingSeparator(descriptor.to_string()))?;

    let start: Ipv4Addr = addr.trim().parse().map_err(|e: std::net::AddrParseError| {
        RangeParseError::BadAddress {
            descriptor: descriptor.to_string(),
            reason: e.to_string(),
        }
    })?;
    let count: u64 = count.trim().parse().map_err(|e: std::num::ParseIntError| {
        RangeParseError::BadCount {
            descriptor: descriptor.to_string(),
            reason: e.to_string(),
        }
    })?;
    if count == 0 {
        return Err(RangeParseError::ZeroCount(descriptor.to_string()));
    }
    if count > MAX_HOST_COUNT {
        return Err(RangeParseError::CountTooLarge(descriptor.to_string()));
    }

    let prefix = 32 - floor_log2(count);
    let net = Ipv4Net::new(start, prefix).map_err(|e| RangeParseError::BadCount {
        descriptor: descriptor.to_string(),
        reason: e.to_string(),
    })?;
    Ok(net.trunc())
}

/// Expand a range descriptor into its usable host addresses.
///
/// Network and broadcast addresses are excluded for prefixes shorter than /31;
/// a /31 or /32 yields every address it contains.
pub fn expand_range(descriptor: &str) -> Result<impl Iterator<Item = Ipv4Addr>, RangeParseError> {
    parse_range(descriptor).map(|net| net.hosts())
}

/// Lazily expand many descriptors, logging and skipping the malformed ones.
pub fn expand_all<I>(descriptors: I) -> impl Iterator<Item = Ipv4Addr>
where
    I: IntoIterator,
    I::Item: AsRef<str>,
{
    descriptors
        .into_iter()
        .filter_map(|d| match expand_range(d.as_ref()) {
            Ok(hosts) => Some(hosts),
            Err(e) => {
                log::error!("skipping range: {e}");
                None
            }
        })
        .flatten()
}

/// Pair every host with every port, host-major.
pub fn work_items<H>(hosts: H, ports: Vec<u16>) -> impl Iterator<Item = WorkItem>
where
    H: IntoIterator<Item = Ipv4Addr>,
{
    hosts
        .into_iter()
        .flat_map(move |ip| ports.clone().into_iter().map(move |port| WorkItem::new(ip, port)))
}

/// Parse range file content: one descriptor per line, blank lines ignored.
pub fn parse_ranges_str(s: &str) -> Vec<String> {
    s.lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .map(str::to_string)
        .collect()
}

/// Load the range list from a file.
pub fn load_ranges(path: impl AsRef<Path>) -> Result<Vec<String>> {
    let content = fs::read_to_string(path.as_ref())
        .with_context(|| format!("failed to read range file: {}", path.as_ref().display()))?;
    Ok(parse_ranges_str(&content))
}

/// Replace the range file with the given descriptors.
pub fn save_ranges(path: impl AsRef<Path>, ranges: &[String]) -> Result<()> {
    fs::write(path.as_ref(), ranges.join("\n"))
        .with_context(|| format!("failed to write range file: {}", path.as_ref().display()))
}

fn floor_log2(n: u64) -> u8 {
    (63 - n.leading_zeros()) as u8
}
