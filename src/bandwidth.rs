use crate::config::Settings;
use crate::traits::CommandExecutor;
use crate::types::{SelectedServer, SpeedTestResult};
use crate::utils::{bytes_per_sec_to_mbps, parse_number, shell_quote};
use std::time::Duration;
use tracing::{debug, info};

fn transfer_timeout(settings: &Settings) -> Duration {
    Duration::from_secs(settings.transfer_connect_timeout_secs + settings.transfer_max_time_secs + 2)
}

fn positive_mbps(output: &str) -> Option<f64> {
    parse_number(output)
        .filter(|bps| *bps > 0.0)
        .map(bytes_per_sec_to_mbps)
}

// curl exits non-zero when --max-time cuts a transfer short but still prints
// the speed it reached, hence the trailing `|| true`.

/// Download throughput in Mbps, `None` if nothing was transferred.
pub async fn measure_download(
    executor: &dyn CommandExecutor,
    server: &SelectedServer,
    settings: &Settings,
) -> Option<f64> {
    let url = server.server.download_url(&settings.download_resource);
    let command = format!(
        "curl -o /dev/null -s -w '%{{speed_download}}' --connect-timeout {} --max-time {} {} || true",
        settings.transfer_connect_timeout_secs,
        settings.transfer_max_time_secs,
        shell_quote(&url)
    );
    let output = executor.execute(&command, transfer_timeout(settings)).await;
    positive_mbps(&output)
}

/// Upload throughput in Mbps for a block of random data, `None` if
/// unmeasurable.
pub async fn measure_upload(
    executor: &dyn CommandExecutor,
    server: &SelectedServer,
    settings: &Settings,
) -> Option<f64> {
    let command = format!(
        "dd if=/dev/urandom bs=1M count={} 2>/dev/null | curl -o /dev/null -s -w '%{{speed_upload}}' \
         --connect-timeout {} --max-time {} -X POST --data-binary @- {} || true",
        settings.upload_size_mb,
        settings.transfer_connect_timeout_secs,
        settings.transfer_max_time_secs,
        shell_quote(&server.server.url)
    );
    let output = executor.execute(&command, transfer_timeout(settings)).await;
    positive_mbps(&output)
}

/// Download then upload. A server whose download cannot be measured yields
/// no result at all; a failed upload is kept as "N/A".
pub async fn test_server(
    executor: &dyn CommandExecutor,
    server: &SelectedServer,
    settings: &Settings,
) -> Option<SpeedTestResult> {
    let Some(download_mbps) = measure_download(executor, server, settings).await else {
        info!(id = %server.server.id, sponsor = %server.server.sponsor, "download unmeasurable, skipping server");
        return None;
    };

    let upload_mbps = measure_upload(executor, server, settings).await;
    if upload_mbps.is_none() {
        debug!(id = %server.server.id, "upload unmeasurable");
    }

    Some(SpeedTestResult {
        server: server.server.sponsor.clone(),
        location: server.server.location_label(),
        download_mbps,
        upload_mbps,
        latency_ms: server.latency_ms,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::scripted::ScriptedExecutor;
    use crate::types::CandidateServer;

    fn selected() -> SelectedServer {
        SelectedServer {
            server: CandidateServer {
                id: "42".to_string(),
                host: "speed.acme.de:8080".to_string(),
                name: "Frankfurt".to_string(),
                sponsor: "Acme".to_string(),
                country: "Germany".to_string(),
                url: "http://speed.acme.de:8080/speedtest/upload.php".to_string(),
                region: "Frankfurt".to_string(),
                group: "Western Europe".to_string(),
            },
            latency_ms: 21.5,
            measured: true,
        }
    }

    #[tokio::test]
    async fn test_full_result() {
        let executor = ScriptedExecutor::new()
            .on("speed_download", "12500000.000")
            .on("speed_upload", "2500000.000");

        let result = test_server(&executor, &selected(), &Settings::default()).await.unwrap();

        assert_eq!(result.server, "Acme");
        assert_eq!(result.location, "Frankfurt, Germany");
        assert!((result.download_mbps - 100.0).abs() < 1e-9);
        assert!((result.upload_mbps.unwrap() - 20.0).abs() < 1e-9);
        assert_eq!(result.latency_ms, 21.5);

        let commands = executor.commands();
        assert!(commands[0].contains("'http://speed.acme.de:8080/speedtest/random4000x4000.jpg'"));
        assert!(commands[1].contains("count=10"));
        assert!(commands[1].contains("'http://speed.acme.de:8080/speedtest/upload.php'"));
    }

    #[tokio::test]
    async fn test_zero_download_skips_server() {
        let executor = ScriptedExecutor::new()
            .on("speed_download", "0.000")
            .on("speed_upload", "2500000.000");

        assert!(test_server(&executor, &selected(), &Settings::default()).await.is_none());
        // Upload is not attempted after a failed download
        assert_eq!(executor.count_matching("speed_upload"), 0);
    }

    #[tokio::test]
    async fn test_failed_upload_is_na() {
        let executor = ScriptedExecutor::new().on("speed_download", "1000000");

        let result = test_server(&executor, &selected(), &Settings::default()).await.unwrap();
        assert_eq!(result.upload_mbps, None);
        assert_eq!(result.upload_display(), "N/A");
    }
}
