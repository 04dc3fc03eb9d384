use anyhow::{bail, Context, Result};
use std::time::Duration;

/// APNIC's daily delegation report.
pub const APNIC_DELEGATED_URL: &str = "https://ftp.apnic.net/stats/apnic/delegated-apnic-latest";

const FETCH_TIMEOUT: Duration = Duration::from_secs(60);

/// Extract `start/count` range descriptors for one country from a
/// delegation report (`registry|cc|type|start|value|date|status[|...]`).
///
/// Comment, header and summary rows, other countries, non-IPv4 records and
/// rows with a non-numeric count are skipped.
pub fn parse_delegations(report: &str, country: &str) -> Vec<String> {
    report
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty() && !l.starts_with('#'))
        .filter_map(|line| {
            let fields: Vec<&str> = line.split('|').collect();
            if fields.len() < 7
                || !fields[1].eq_ignore_ascii_case(country)
                || !fields[2].eq_ignore_ascii_case("ipv4")
            {
                return None;
            }
            let count: u64 = fields[4].parse().ok()?;
            Some(format!("{}/{}", fields[3], count))
        })
        .collect()
}

/// Download the delegation report and keep the country's IPv4 ranges.
pub async fn fetch_ranges(url: &str, country: &str) -> Result<Vec<String>> {
    let client = reqwest::Client::builder()
        .timeout(FETCH_TIMEOUT)
        .build()
        .context("failed to build HTTP client")?;

    log::info!("fetching delegation report from {url}");
    let resp = client
        .get(url)
        .send()
        .await
        .with_context(|| format!("request to {url} failed"))?;
    let status = resp.status();
    if !status.is_success() {
        bail!("{url} returned status {status}");
    }
    let body = resp
        .text()
        .await
        .with_context(|| format!("failed to read body from {url}"))?;

    let ranges = parse_delegations(&body, country);
    log::info!(
        "{} {} IPv4 ranges in {} report lines",
        ranges.len(),
        country.to_uppercase(),
        body.lines().count()
    );
    Ok(ranges)
}
