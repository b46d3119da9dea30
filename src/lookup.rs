use crate::config::{GeoFormat, GeoService, Settings};
use crate::traits::CommandExecutor;
use crate::types::HostInfo;
use crate::utils::shell_quote;
use serde_json::Value;
use std::net::Ipv4Addr;
use std::time::Duration;
use tracing::debug;

const LOOKUP_MAX_TIME_SECS: u64 = 5;

async fn fetch(executor: &dyn CommandExecutor, url: &str) -> String {
    let command = format!(
        "curl -4 -s --connect-timeout 3 --max-time {} {}",
        LOOKUP_MAX_TIME_SECS,
        shell_quote(url)
    );
    executor
        .execute(&command, Duration::from_secs(LOOKUP_MAX_TIME_SECS + 1))
        .await
}

/// First echo service answering with a valid IPv4 address.
pub async fn public_ip(executor: &dyn CommandExecutor, services: &[String]) -> Option<Ipv4Addr> {
    for url in services {
        let body = fetch(executor, url).await;
        match body.trim().parse::<Ipv4Addr>() {
            Ok(ip) => return Some(ip),
            Err(_) => debug!(service = %url, "no usable address from echo service"),
        }
    }
    None
}

fn text(v: &Value, key: &str) -> Option<String> {
    v.get(key)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

fn join_place(parts: &[Option<String>]) -> Option<String> {
    let parts: Vec<&str> = parts.iter().flatten().map(String::as_str).collect();
    if parts.is_empty() {
        None
    } else {
        Some(parts.join(", "))
    }
}

/// (provider, location) from a geolocation response.
pub fn parse_geo(body: &str, format: GeoFormat) -> Option<(String, String)> {
    let v: Value = serde_json::from_str(body).ok()?;
    match format {
        GeoFormat::IpApi => {
            if text(&v, "status").as_deref() == Some("fail") {
                return None;
            }
            let provider = text(&v, "isp").or_else(|| text(&v, "org"))?;
            let location = join_place(&[text(&v, "city"), text(&v, "regionName"), text(&v, "country")])
                .unwrap_or_else(|| "Unknown".to_string());
            Some((provider, location))
        }
        GeoFormat::IpInfo => {
            // "AS13335 Cloudflare, Inc." -> "Cloudflare, Inc."
            let org = text(&v, "org")?;
            let provider = match org.split_once(' ') {
                Some((asn, rest)) if asn.starts_with("AS") => rest.to_string(),
                _ => org,
            };
            let location = join_place(&[text(&v, "city"), text(&v, "region"), text(&v, "country")])
                .unwrap_or_else(|| "Unknown".to_string());
            Some((provider, location))
        }
    }
}

async fn geolocate(executor: &dyn CommandExecutor, ip: Ipv4Addr, services: &[GeoService]) -> Option<(String, String)> {
    for service in services {
        let url = service.url.replace("{ip}", &ip.to_string());
        let body = fetch(executor, &url).await;
        if let Some(found) = parse_geo(&body, service.format) {
            return Some(found);
        }
        debug!(service = %url, "geolocation lookup failed");
    }
    None
}

/// Never fails: whatever cannot be determined is "Unknown".
pub async fn lookup_host(executor: &dyn CommandExecutor, settings: &Settings) -> HostInfo {
    let mut info = HostInfo::unknown();
    let Some(ip) = public_ip(executor, &settings.ip_services).await else {
        return info;
    };
    info.public_ip = ip.to_string();

    if let Some((provider, location)) = geolocate(executor, ip, &settings.geo_services).await {
        info.provider = provider;
        info.location = location;
    }
    info
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::scripted::ScriptedExecutor;

    const IP_API: &str = r#"{"status":"success","country":"Germany","regionName":"Hesse","city":"Frankfurt am Main","isp":"Hetzner Online GmbH","org":"Hetzner","query":"203.0.113.7"}"#;

    #[tokio::test]
    async fn test_primary_services() {
        let executor = ScriptedExecutor::new()
            .on("api.ipify.org", "203.0.113.7")
            .on("ip-api.com/json/203.0.113.7", IP_API);

        let info = lookup_host(&executor, &Settings::default()).await;
        assert_eq!(info.public_ip, "203.0.113.7");
        assert_eq!(info.provider, "Hetzner Online GmbH");
        assert_eq!(info.location, "Frankfurt am Main, Hesse, Germany");
    }

    #[tokio::test]
    async fn test_fallback_services() {
        let executor = ScriptedExecutor::new()
            .on("api.ipify.org", "<html>502 Bad Gateway</html>")
            .on("ifconfig.me", "198.51.100.2")
            .on("ip-api.com", r#"{"status":"fail","message":"quota"}"#)
            .on(
                "ipinfo.io/198.51.100.2",
                r#"{"ip":"198.51.100.2","city":"Tokyo","region":"Tokyo","country":"JP","org":"AS2516 KDDI CORPORATION"}"#,
            );

        let info = lookup_host(&executor, &Settings::default()).await;
        assert_eq!(info.public_ip, "198.51.100.2");
        assert_eq!(info.provider, "KDDI CORPORATION");
        assert_eq!(info.location, "Tokyo, Tokyo, JP");
    }

    #[tokio::test]
    async fn test_everything_unknown_offline() {
        let info = lookup_host(&ScriptedExecutor::new(), &Settings::default()).await;
        assert_eq!(info, HostInfo::unknown());
    }

    #[tokio::test]
    async fn test_ip_known_geo_unknown() {
        let executor = ScriptedExecutor::new().on("api.ipify.org", "192.0.2.1");
        let info = lookup_host(&executor, &Settings::default()).await;
        assert_eq!(info.public_ip, "192.0.2.1");
        assert_eq!(info.provider, "Unknown");
        assert_eq!(info.location, "Unknown");
    }
}
