use crate::bandwidth;
use crate::config::{RegionTable, Settings};
use crate::discovery;
use crate::latency;
use crate::lookup;
use crate::selection;
use crate::traits::CommandExecutor;
use crate::types::{NetworkResult, ProbeEvent, SelectedServer};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{info, warn};

/// discovery -> latency probing -> selection -> sequential bandwidth tests.
/// Never fails: the worst case is a `NetworkResult` with an empty test list.
pub struct NetworkBenchmark<'a> {
    executor: &'a dyn CommandExecutor,
    table: &'a RegionTable,
    settings: &'a Settings,
}

impl<'a> NetworkBenchmark<'a> {
    pub fn new(executor: &'a dyn CommandExecutor, table: &'a RegionTable, settings: &'a Settings) -> Self {
        Self {
            executor,
            table,
            settings,
        }
    }

    fn priority(&self) -> Vec<String> {
        self.table.priority(self.settings.home_group.as_deref())
    }

    /// Discover, probe and select. The returned list is in test order.
    pub async fn plan<F>(&self, max_servers: usize, on_event: &mut F) -> Vec<SelectedServer>
    where
        F: FnMut(ProbeEvent),
    {
        let candidates =
            discovery::discover_servers(self.executor, &self.table.regions, self.table, self.settings).await;
        on_event(ProbeEvent::DiscoveryFinished {
            servers: candidates.len(),
        });

        if candidates.is_empty() {
            warn!("no speed-test servers discovered in any region");
            on_event(ProbeEvent::NoServersFound);
            return Vec::new();
        }

        let subset_len = latency::probe_subset(&candidates, self.settings.probes_per_group).len();
        on_event(ProbeEvent::ProbingStarted { total: subset_len });

        let measurements = latency::probe_servers(self.executor, &candidates, self.settings, |m| {
            on_event(ProbeEvent::LatencyProbed {
                server: m.server.clone(),
                latency_ms: m.latency_ms,
            })
        })
        .await;

        let priority = self.priority();
        let selected = selection::select_servers(
            &measurements,
            max_servers,
            &priority,
            self.settings.failed_latency_ms,
        );
        let ordered = selection::presentation_order(selected, &priority);
        info!(candidates = candidates.len(), probed = measurements.len(), selected = ordered.len(), "servers selected");

        on_event(ProbeEvent::SelectionFinished {
            selected: ordered.clone(),
        });
        ordered
    }

    /// Full run. Results are reported through `on_event` as each server
    /// finishes, and collected in the returned `NetworkResult`.
    pub async fn run<F>(&self, max_servers: usize, mut on_event: F) -> NetworkResult
    where
        F: FnMut(ProbeEvent),
    {
        let started = Instant::now();
        let deadline = self.settings.run_deadline_secs.map(Duration::from_secs);

        let host = lookup::lookup_host(self.executor, self.settings).await;
        info!(ip = %host.public_ip, provider = %host.provider, "host identified");

        let servers = self.plan(max_servers, &mut on_event).await;

        let mut tests = Vec::with_capacity(servers.len());
        for (index, server) in servers.iter().enumerate() {
            if let Some(limit) = deadline {
                if started.elapsed() >= limit {
                    let remaining = servers.len() - index;
                    warn!(remaining, ?limit, "run deadline reached, skipping remaining servers");
                    on_event(ProbeEvent::DeadlineReached { remaining });
                    break;
                }
            }

            on_event(ProbeEvent::TestStarted {
                server: server.clone(),
            });
            match bandwidth::test_server(self.executor, server, self.settings).await {
                Some(result) => {
                    on_event(ProbeEvent::TestFinished {
                        result: result.clone(),
                    });
                    tests.push(result);
                }
                None => on_event(ProbeEvent::TestSkipped {
                    server: server.clone(),
                }),
            }
        }

        NetworkResult {
            public_ip: host.public_ip,
            provider: host.provider,
            location: host.location,
            tests,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::region_table;
    use crate::executor::scripted::ScriptedExecutor;
    use crate::types::Region;
    use std::collections::HashMap;

    fn table(regions: &[(&str, &str)], countries: &[(&str, &str)], order: &[&str]) -> RegionTable {
        RegionTable {
            group_order: order.iter().map(|s| s.to_string()).collect(),
            regions: regions.iter().map(|(s, g)| Region::new(s, g)).collect(),
            countries: countries
                .iter()
                .map(|(c, g)| (c.to_string(), g.to_string()))
                .collect::<HashMap<_, _>>(),
        }
    }

    fn entry(id: &str, host: &str, name: &str, country: &str) -> String {
        format!(
            r#"{{"id":"{id}","host":"{host}:8080","name":"{name}","country":"{country}","sponsor":"{id}-isp","url":"http://{host}:8080/speedtest/upload.php"}}"#
        )
    }

    #[tokio::test]
    async fn test_total_outage_returns_empty_tests() {
        let executor = ScriptedExecutor::new().on("api.ipify.org", "203.0.113.9");
        let settings = Settings::default();

        let mut events = Vec::new();
        let result = NetworkBenchmark::new(&executor, region_table(), &settings)
            .run(20, |e| events.push(e))
            .await;

        assert!(result.tests.is_empty());
        assert_eq!(result.public_ip, "203.0.113.9");
        assert!(events.iter().any(|e| matches!(e, ProbeEvent::NoServersFound)));
        // No probes or transfers after an empty discovery
        assert_eq!(executor.count_matching("ping -c"), 0);
        assert_eq!(executor.count_matching("speed_download"), 0);
    }

    #[tokio::test]
    async fn test_pipeline_streams_results_in_presentation_order() {
        let t = table(
            &[("Tokyo", "Asia"), ("Berlin", "Europe")],
            &[("Japan", "Asia"), ("Germany", "Europe")],
            &["Asia", "Europe"],
        );
        let tokyo = format!(
            "[{},{}]",
            entry("jp1", "jp1.test", "Tokyo", "Japan"),
            entry("jp2", "jp2.test", "Osaka", "Japan")
        );
        let berlin = format!(
            "[{},{}]",
            entry("de1", "de1.test", "Berlin", "Germany"),
            entry("de2", "de2.test", "Munich", "Germany")
        );
        let executor = ScriptedExecutor::new()
            .on("search=Tokyo", &tokyo)
            .on("search=Berlin", &berlin)
            .on("ping -c 1 -W 5 'jp1.test'", "time=30.0 ms")
            .on("ping -c 1 -W 5 'jp2.test'", "time=10.0 ms")
            .on("ping -c 1 -W 5 'de1.test'", "time=80.0 ms")
            // de2 blocks ICMP but answers HTTP
            .on("'http://de2.test:8080/speedtest/'", "0.060")
            // de1 download fails outright
            .on("de1.test:8080/speedtest/random4000x4000.jpg", "0.000")
            .on("speed_download", "12500000")
            .on("speed_upload", "1250000");
        let settings = Settings::default();

        let mut finished = Vec::new();
        let mut skipped = Vec::new();
        let result = NetworkBenchmark::new(&executor, &t, &settings)
            .run(10, |e| match e {
                ProbeEvent::TestFinished { result } => finished.push(result.server),
                ProbeEvent::TestSkipped { server } => skipped.push(server.server.id),
                _ => {}
            })
            .await;

        let servers: Vec<&str> = result.tests.iter().map(|r| r.server.as_str()).collect();
        // Asia first (Japan, by latency), then Europe (Germany, by latency)
        assert_eq!(servers, vec!["jp2-isp", "jp1-isp", "de2-isp"]);
        assert_eq!(finished, vec!["jp2-isp", "jp1-isp", "de2-isp"]);
        assert_eq!(skipped, vec!["de1"]);
        assert!((result.tests[2].latency_ms - 60.0).abs() < 1e-9);
        assert_eq!(result.tests[0].upload_display(), "10.00 Mbps");
        assert_eq!(result.public_ip, "Unknown");
    }

    #[tokio::test]
    async fn test_failed_group_keeps_coverage() {
        let t = table(
            &[("Tokyo", "Asia"), ("Lagos", "Africa")],
            &[("Japan", "Asia"), ("Nigeria", "Africa")],
            &["Asia", "Africa"],
        );
        let executor = ScriptedExecutor::new()
            .on("search=Tokyo", &format!("[{}]", entry("jp1", "jp1.test", "Tokyo", "Japan")))
            .on("search=Lagos", &format!("[{}]", entry("ng1", "ng1.test", "Lagos", "Nigeria")))
            .on("ping -c 1 -W 5 'jp1.test'", "time=30.0 ms");
        let settings = Settings::default();

        let mut noop = |_e: ProbeEvent| {};
        let planned = NetworkBenchmark::new(&executor, &t, &settings).plan(5, &mut noop).await;

        assert_eq!(planned.len(), 2);
        assert_eq!(planned[1].server.id, "ng1");
        assert_eq!(planned[1].latency_ms, 999.0);
        assert!(!planned[1].measured);
    }

    #[tokio::test]
    async fn test_deadline_stops_new_tests() {
        let t = table(&[("Tokyo", "Asia")], &[("Japan", "Asia")], &["Asia"]);
        let executor = ScriptedExecutor::new()
            .on("search=Tokyo", &format!("[{}]", entry("jp1", "jp1.test", "Tokyo", "Japan")))
            .on("ping", "time=5 ms")
            .on("speed_download", "1000000");
        let settings = Settings {
            run_deadline_secs: Some(0),
            ..Settings::default()
        };

        let mut remaining = None;
        let result = NetworkBenchmark::new(&executor, &t, &settings)
            .run(5, |e| {
                if let ProbeEvent::DeadlineReached { remaining: r } = e {
                    remaining = Some(r);
                }
            })
            .await;

        assert!(result.tests.is_empty());
        assert_eq!(remaining, Some(1));
        assert_eq!(executor.count_matching("speed_download"), 0);
    }
}
