use crate::error::{ProbeError, Result};
use crate::types::NetworkResult;
use reqwest::Client;
use std::time::Duration;
use tracing::info;

const REPORT_TIMEOUT: u64 = 10;

fn client_builder() -> reqwest::ClientBuilder {
    Client::builder()
        .timeout(Duration::from_secs(REPORT_TIMEOUT))
        .user_agent(concat!("netprobe/", env!("CARGO_PKG_VERSION")))
}

/// POST the result as JSON to the collection service.
pub async fn submit(url: &str, result: &NetworkResult) -> Result<()> {
    submit_with(&client_builder().build()?, url, result).await
}

async fn submit_with(client: &Client, url: &str, result: &NetworkResult) -> Result<()> {
    let resp = client.post(url).json(result).send().await?;
    let status = resp.status();
    if !status.is_success() {
        let body = resp.text().await.unwrap_or_default();
        return Err(ProbeError::Custom(format!(
            "collection service answered {}: {}",
            status,
            body.trim()
        )));
    }

    info!(url, tests = result.tests.len(), "results reported");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    fn sample() -> NetworkResult {
        NetworkResult {
            public_ip: "192.0.2.1".to_string(),
            provider: "Example ISP".to_string(),
            location: "Oslo, Norway".to_string(),
            tests: Vec::new(),
        }
    }

    fn local_client() -> Client {
        client_builder().no_proxy().build().unwrap()
    }

    /// One-shot HTTP server answering with `status_line`; returns what it received.
    async fn serve_once(status_line: &'static str) -> (String, tokio::task::JoinHandle<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let handle = tokio::spawn(async move {
            let (mut sock, _) = listener.accept().await.unwrap();
            let mut buf = vec![0u8; 16 * 1024];
            let mut received = Vec::new();
            // Read until the JSON body has arrived
            loop {
                let n = sock.read(&mut buf).await.unwrap();
                if n == 0 {
                    break;
                }
                received.extend_from_slice(&buf[..n]);
                if received.ends_with(b"}") {
                    break;
                }
            }
            let reply = format!("{}\r\ncontent-length: 2\r\nconnection: close\r\n\r\nok", status_line);
            sock.write_all(reply.as_bytes()).await.unwrap();
            String::from_utf8_lossy(&received).to_string()
        });
        (format!("http://{}/results", addr), handle)
    }

    #[tokio::test]
    async fn test_submit_posts_json() {
        let (url, handle) = serve_once("HTTP/1.1 200 OK").await;
        submit_with(&local_client(), &url, &sample()).await.unwrap();

        let request = handle.await.unwrap();
        assert!(request.starts_with("POST /results"));
        assert!(request.contains("\"public_ip\":\"192.0.2.1\""));
    }

    #[tokio::test]
    async fn test_submit_rejected() {
        let (url, _handle) = serve_once("HTTP/1.1 403 Forbidden").await;
        let err = submit_with(&local_client(), &url, &sample()).await.unwrap_err();
        assert!(err.to_string().contains("403"));
    }
}
