use serde::{Deserialize, Serialize};

/// Group assigned to countries missing from the lookup table
pub const OTHER_GROUP: &str = "Other";

/// A directory search term and the geographic group it belongs to
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct Region {
    pub search: String, // e.g. "Tokyo"
    pub group: String,  // e.g. "East Asia"
}

impl Region {
    pub fn new(search: &str, group: &str) -> Self {
        Self {
            search: search.to_string(),
            group: group.to_string(),
        }
    }
}

/// A speed-test server returned by the directory, not yet probed
#[derive(Debug, Clone, PartialEq)]
pub struct CandidateServer {
    pub id: String,
    pub host: String,
    pub name: String,
    pub sponsor: String,
    pub country: String,
    /// Upload endpoint as published by the directory (".../upload.php")
    pub url: String,
    /// Region search term that surfaced this server first
    pub region: String,
    /// Geographic group derived from `country`
    pub group: String,
}

impl CandidateServer {
    /// Directory part of `url`, with a trailing slash.
    pub fn base_url(&self) -> String {
        match self.url.rsplit_once('/') {
            Some((dir, _)) if dir.contains("://") => format!("{}/", dir),
            _ => format!("{}/", self.url.trim_end_matches('/')),
        }
    }

    pub fn download_url(&self, resource: &str) -> String {
        format!("{}{}", self.base_url(), resource)
    }

    /// Host without the ":port" suffix, used for ICMP probes.
    pub fn ping_host(&self) -> &str {
        match self.host.rsplit_once(':') {
            Some((h, port)) if !h.is_empty() && port.chars().all(|c| c.is_ascii_digit()) => h,
            _ => &self.host,
        }
    }

    pub fn location_label(&self) -> String {
        if self.name.is_empty() {
            self.country.clone()
        } else {
            format!("{}, {}", self.name, self.country)
        }
    }
}

/// Outcome of a latency probe; `latency_ms == None` means both probes failed
#[derive(Debug, Clone, PartialEq)]
pub struct LatencyMeasurement {
    pub server: CandidateServer,
    pub latency_ms: Option<f64>,
}

impl LatencyMeasurement {
    pub fn is_success(&self) -> bool {
        self.latency_ms.is_some()
    }
}

/// A server picked for bandwidth testing
#[derive(Debug, Clone, PartialEq)]
pub struct SelectedServer {
    pub server: CandidateServer,
    pub latency_ms: f64,
    /// False when `latency_ms` is the placeholder for an unreachable group
    pub measured: bool,
}

/// Per-server bandwidth result
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct SpeedTestResult {
    pub server: String,
    pub location: String,
    pub download_mbps: f64,
    /// None when the upload could not be measured ("N/A")
    pub upload_mbps: Option<f64>,
    pub latency_ms: f64,
}

impl SpeedTestResult {
    pub fn download_display(&self) -> String {
        format!("{:.2} Mbps", self.download_mbps)
    }

    pub fn upload_display(&self) -> String {
        match self.upload_mbps {
            Some(mbps) => format!("{:.2} Mbps", mbps),
            None => "N/A".to_string(),
        }
    }

    pub fn latency_display(&self) -> String {
        format!("{:.1} ms", self.latency_ms)
    }
}

/// Aggregate output of one benchmark run
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct NetworkResult {
    pub public_ip: String,
    pub provider: String,
    pub location: String,
    pub tests: Vec<SpeedTestResult>,
}

/// Host identity as seen from the outside
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostInfo {
    pub public_ip: String,
    pub provider: String,
    pub location: String,
}

impl HostInfo {
    pub fn unknown() -> Self {
        Self {
            public_ip: "Unknown".to_string(),
            provider: "Unknown".to_string(),
            location: "Unknown".to_string(),
        }
    }
}

/// Progress notifications emitted while a benchmark runs
#[derive(Debug, Clone)]
pub enum ProbeEvent {
    DiscoveryFinished { servers: usize },
    /// No directory query returned anything
    NoServersFound,
    ProbingStarted { total: usize },
    LatencyProbed { server: CandidateServer, latency_ms: Option<f64> },
    SelectionFinished { selected: Vec<SelectedServer> },
    TestStarted { server: SelectedServer },
    /// Download was unmeasurable, server dropped
    TestSkipped { server: SelectedServer },
    TestFinished { result: SpeedTestResult },
    DeadlineReached { remaining: usize },
}
