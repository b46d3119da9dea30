use crate::config::{RegionTable, Settings};
use crate::traits::CommandExecutor;
use crate::types::{CandidateServer, Region};
use crate::utils::shell_quote;
use reqwest::Url;
use serde_json::Value;
use std::collections::HashSet;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Build the directory query URL for one region.
pub fn directory_query_url(settings: &Settings, region: &Region) -> Option<String> {
    let limit = settings.directory_limit.to_string();
    let params = [
        ("engine", "js"),
        ("https_functional", "true"),
        ("limit", limit.as_str()),
        ("search", region.search.as_str()),
    ];
    match Url::parse_with_params(&settings.directory_url, &params) {
        Ok(url) => Some(url.to_string()),
        Err(e) => {
            warn!(url = %settings.directory_url, error = %e, "invalid directory url");
            None
        }
    }
}

/// Directory ids show up both as strings and as numbers
fn field(entry: &Value, key: &str) -> Option<String> {
    match entry.get(key)? {
        Value::String(s) => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Parse a directory response body. Anything other than a JSON array yields
/// nothing; entries without an id or url are skipped.
pub fn parse_directory_response(body: &str, region: &Region, table: &RegionTable) -> Vec<CandidateServer> {
    let entries = match serde_json::from_str::<Value>(body) {
        Ok(Value::Array(entries)) => entries,
        Ok(_) => {
            debug!(region = %region.search, "directory response is not a list");
            return Vec::new();
        }
        Err(e) => {
            debug!(region = %region.search, error = %e, "malformed directory response");
            return Vec::new();
        }
    };

    entries
        .iter()
        .filter_map(|entry| {
            let id = field(entry, "id").filter(|s| !s.is_empty())?;
            let url = field(entry, "url").filter(|s| s.starts_with("http"))?;
            let country = field(entry, "country").unwrap_or_default();
            let group = table.group_for_country(&country).to_string();
            Some(CandidateServer {
                id,
                host: field(entry, "host").unwrap_or_default(),
                name: field(entry, "name").unwrap_or_default(),
                sponsor: field(entry, "sponsor").unwrap_or_default(),
                country,
                url,
                region: region.search.clone(),
                group,
            })
        })
        .collect()
}

async fn query_region(
    executor: &dyn CommandExecutor,
    region: &Region,
    table: &RegionTable,
    settings: &Settings,
) -> Vec<CandidateServer> {
    let Some(url) = directory_query_url(settings, region) else {
        return Vec::new();
    };

    let command = format!(
        "curl -s --connect-timeout {} --max-time {} {}",
        settings.discovery_connect_timeout_secs,
        settings.discovery_timeout_secs,
        shell_quote(&url)
    );
    // A little slack over curl's own limit so curl reports first
    let timeout = Duration::from_secs(settings.discovery_timeout_secs + 1);

    let body = executor.execute(&command, timeout).await;
    if body.is_empty() {
        debug!(region = %region.search, "no directory response");
        return Vec::new();
    }

    let servers = parse_directory_response(&body, region, table);
    debug!(region = %region.search, count = servers.len(), "region queried");
    servers
}

/// Keep the first occurrence of every server id.
pub fn dedupe_into(seen: &mut HashSet<String>, out: &mut Vec<CandidateServer>, batch: Vec<CandidateServer>) {
    for server in batch {
        if seen.insert(server.id.clone()) {
            out.push(server);
        }
    }
}

/// Query every region and return the deduplicated candidate list in
/// discovery order.
///
/// Regions go out in batches of `batch_size`: the queries of one batch run
/// concurrently, batches run one after another. A region whose query fails in
/// any way contributes zero servers.
pub async fn discover_servers(
    executor: &dyn CommandExecutor,
    regions: &[Region],
    table: &RegionTable,
    settings: &Settings,
) -> Vec<CandidateServer> {
    let mut seen = HashSet::new();
    let mut servers = Vec::new();

    for (index, batch) in regions.chunks(settings.batch_size.max(1)).enumerate() {
        let tasks = batch
            .iter()
            .map(|region| query_region(executor, region, table, settings));

        // Each query fills its own buffer; merge once the whole batch is in
        let results = futures::future::join_all(tasks).await;

        let before = servers.len();
        for found in results {
            dedupe_into(&mut seen, &mut servers, found);
        }
        debug!(batch = index, new = servers.len() - before, "discovery batch finished");
    }

    info!(regions = regions.len(), servers = servers.len(), "discovery finished");
    servers
}
