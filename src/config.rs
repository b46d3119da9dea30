use crate::error::{ProbeError, Result};
use crate::types::{Region, OTHER_GROUP};
use directories::ProjectDirs;
use serde::Deserialize;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use tracing::{debug, info, warn};

// Include the region table at compile time
const REGIONS_JSON: &str = include_str!("../assets/regions.json");

// Global cache for the parsed region table
static REGIONS_CACHE: OnceLock<RegionTable> = OnceLock::new();

fn project_dirs() -> Option<ProjectDirs> {
    ProjectDirs::from("", "", "netprobe")
}

/// Static geography data: which regions to query, how countries map to
/// groups, and the order groups are visited in during selection.
#[derive(Debug, Clone, Deserialize)]
pub struct RegionTable {
    pub group_order: Vec<String>,
    pub regions: Vec<Region>,
    pub countries: HashMap<String, String>,
}

impl RegionTable {
    pub fn from_json(content: &str) -> Result<Self> {
        let table: RegionTable = serde_json::from_str(content)?;
        if table.group_order.is_empty() {
            return Err(ProbeError::Custom("region table has no group_order".to_string()));
        }
        Ok(table)
    }

    /// Group for a country name; unmapped countries land in "Other".
    pub fn group_for_country(&self, country: &str) -> &str {
        self.countries
            .get(country.trim())
            .map(|g| g.as_str())
            .unwrap_or(OTHER_GROUP)
    }

    /// Group visiting order with `home` moved to the front and "Other" last.
    pub fn priority(&self, home: Option<&str>) -> Vec<String> {
        let mut order: Vec<String> = Vec::with_capacity(self.group_order.len() + 1);
        if let Some(home) = home {
            if let Some(g) = self.group_order.iter().find(|g| g.eq_ignore_ascii_case(home)) {
                order.push(g.clone());
            } else {
                warn!(home, "home group not in region table, ignoring");
            }
        }
        for g in &self.group_order {
            if !order.contains(g) {
                order.push(g.clone());
            }
        }
        if !order.iter().any(|g| g == OTHER_GROUP) {
            order.push(OTHER_GROUP.to_string());
        }
        order
    }
}

/// Retrieve the region table
/// Strategy:
/// 1. Try to load from User Config (~/.config/netprobe/regions.json)
/// 2. Fallback to built-in assets/regions.json
pub fn region_table() -> &'static RegionTable {
    REGIONS_CACHE.get_or_init(|| {
        if let Some(proj_dirs) = project_dirs() {
            let path = proj_dirs.config_dir().join("regions.json");
            if path.exists() {
                match fs::read_to_string(&path)
                    .map_err(ProbeError::from)
                    .and_then(|c| RegionTable::from_json(&c))
                {
                    Ok(table) => {
                        info!(?path, "loaded region table from local config");
                        return table;
                    }
                    Err(e) => warn!(?path, error = %e, "ignoring unreadable region table"),
                }
            }
        }

        builtin_regions()
    })
}

fn builtin_regions() -> RegionTable {
    // The asset is checked by test_builtin_regions_parse
    RegionTable::from_json(REGIONS_JSON).unwrap_or_else(|_| RegionTable {
        group_order: Vec::new(),
        regions: Vec::new(),
        countries: HashMap::new(),
    })
}

/// Tunables for a benchmark run. Every field has a default so a partial
/// config.toml is fine.
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct Settings {
    pub max_servers: usize,
    /// Regions queried concurrently per discovery batch
    pub batch_size: usize,
    /// Entries requested per directory query
    pub directory_limit: usize,
    pub probes_per_group: usize,
    pub discovery_connect_timeout_secs: u64,
    pub discovery_timeout_secs: u64,
    pub ping_timeout_secs: u64,
    pub transfer_connect_timeout_secs: u64,
    pub transfer_max_time_secs: u64,
    pub upload_size_mb: u64,
    pub download_resource: String,
    /// Placeholder latency for groups where every probe failed
    pub failed_latency_ms: f64,
    pub home_group: Option<String>,
    pub directory_url: String,
    pub ip_services: Vec<String>,
    pub geo_services: Vec<GeoService>,
    pub report_url: Option<String>,
    /// Stop starting new bandwidth tests after this many seconds
    pub run_deadline_secs: Option<u64>,
}

#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum GeoFormat {
    IpApi,
    IpInfo,
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct GeoService {
    /// `{ip}` is replaced by the public address
    pub url: String,
    pub format: GeoFormat,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            max_servers: 20,
            batch_size: 5,
            directory_limit: 10,
            probes_per_group: 3,
            discovery_connect_timeout_secs: 3,
            discovery_timeout_secs: 5,
            ping_timeout_secs: 5,
            transfer_connect_timeout_secs: 5,
            transfer_max_time_secs: 15,
            upload_size_mb: 10,
            download_resource: "random4000x4000.jpg".to_string(),
            failed_latency_ms: 999.0,
            home_group: None,
            directory_url: "https://www.speedtest.net/api/js/servers".to_string(),
            ip_services: vec![
                "https://api.ipify.org".to_string(),
                "https://ifconfig.me/ip".to_string(),
            ],
            geo_services: vec![
                GeoService {
                    url: "http://ip-api.com/json/{ip}".to_string(),
                    format: GeoFormat::IpApi,
                },
                GeoService {
                    url: "https://ipinfo.io/{ip}/json".to_string(),
                    format: GeoFormat::IpInfo,
                },
            ],
            report_url: None,
            run_deadline_secs: None,
        }
    }
}

impl Settings {
    pub fn from_toml(content: &str) -> Result<Self> {
        let settings: Settings = toml::from_str(content)?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_servers == 0 {
            return Err(ProbeError::InvalidArgument("max_servers must be at least 1".to_string()));
        }
        if self.batch_size == 0 {
            return Err(ProbeError::InvalidArgument("batch_size must be at least 1".to_string()));
        }
        if self.probes_per_group == 0 {
            return Err(ProbeError::InvalidArgument(
                "probes_per_group must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    pub fn default_path() -> Option<PathBuf> {
        project_dirs().map(|d| d.config_dir().join("config.toml"))
    }

    /// Load settings.
    /// An explicit path must exist; the default location is optional.
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        if let Some(path) = explicit {
            let content = fs::read_to_string(path)?;
            debug!(?path, "loaded settings");
            return Self::from_toml(&content);
        }

        match Self::default_path() {
            Some(path) if path.exists() => {
                let content = fs::read_to_string(&path)?;
                info!(?path, "loaded settings from local config");
                Self::from_toml(&content)
            }
            _ => Ok(Self::default()),
        }
    }
}
