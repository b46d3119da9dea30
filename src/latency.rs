use crate::config::Settings;
use crate::traits::CommandExecutor;
use crate::types::{CandidateServer, LatencyMeasurement};
use crate::utils::{parse_number, shell_quote};
use regex::Regex;
use std::collections::HashMap;
use std::sync::OnceLock;
use std::time::Duration;
use tracing::debug;

static PING_TIME: OnceLock<Option<Regex>> = OnceLock::new();

/// Extract the RTT from `ping` output (`time=12.3 ms`, or `time<1 ms`).
pub fn parse_ping_time(output: &str) -> Option<f64> {
    let re = PING_TIME
        .get_or_init(|| Regex::new(r"time[=<]\s*([0-9]+(?:\.[0-9]+)?)\s*ms").ok())
        .as_ref()?;
    re.captures(output)
        .and_then(|caps| caps[1].parse::<f64>().ok())
}

/// Up to `per_group` candidates per group, in discovery order.
pub fn probe_subset(servers: &[CandidateServer], per_group: usize) -> Vec<CandidateServer> {
    let mut counts: HashMap<&str, usize> = HashMap::new();
    servers
        .iter()
        .filter(|s| {
            let count = counts.entry(s.group.as_str()).or_insert(0);
            if *count < per_group {
                *count += 1;
                true
            } else {
                false
            }
        })
        .cloned()
        .collect()
}

async fn icmp_latency(executor: &dyn CommandExecutor, server: &CandidateServer, settings: &Settings) -> Option<f64> {
    let host = server.ping_host();
    if host.is_empty() {
        return None;
    }
    let command = format!(
        "ping -c 1 -W {} {}",
        settings.ping_timeout_secs,
        shell_quote(host)
    );
    let output = executor
        .execute(&command, Duration::from_secs(settings.ping_timeout_secs + 1))
        .await;
    parse_ping_time(&output)
}

/// TCP connect time reported by curl, in milliseconds
async fn http_latency(executor: &dyn CommandExecutor, server: &CandidateServer, settings: &Settings) -> Option<f64> {
    let command = format!(
        "curl -o /dev/null -s -w '%{{time_connect}}' --connect-timeout {} --max-time {} {}",
        settings.discovery_connect_timeout_secs,
        settings.discovery_timeout_secs,
        shell_quote(&server.base_url())
    );
    let output = executor
        .execute(&command, Duration::from_secs(settings.discovery_timeout_secs + 1))
        .await;
    parse_number(&output)
        .filter(|secs| *secs > 0.0)
        .map(|secs| secs * 1000.0)
}

/// ICMP first, HTTP connect time as fallback; `None` when both fail.
pub async fn measure_latency(
    executor: &dyn CommandExecutor,
    server: &CandidateServer,
    settings: &Settings,
) -> Option<f64> {
    if let Some(ms) = icmp_latency(executor, server, settings).await {
        return Some(ms);
    }
    debug!(id = %server.id, host = %server.host, "icmp probe failed, trying http");
    http_latency(executor, server, settings).await
}

/// Probe the bounded subset one server at a time. `on_probe` sees every
/// measurement as soon as it is taken.
pub async fn probe_servers<F>(
    executor: &dyn CommandExecutor,
    servers: &[CandidateServer],
    settings: &Settings,
    mut on_probe: F,
) -> Vec<LatencyMeasurement>
where
    F: FnMut(&LatencyMeasurement),
{
    let subset = probe_subset(servers, settings.probes_per_group);
    let mut measurements = Vec::with_capacity(subset.len());

    for server in subset {
        let latency_ms = measure_latency(executor, &server, settings).await;
        match latency_ms {
            Some(ms) => debug!(id = %server.id, group = %server.group, latency_ms = ms, "probed"),
            None => debug!(id = %server.id, group = %server.group, "unreachable"),
        }
        let m = LatencyMeasurement { server, latency_ms };
        on_probe(&m);
        measurements.push(m);
    }

    measurements
}
