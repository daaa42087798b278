use crate::collectors::ReachabilityProbe;
use crate::config::HostConfig;
use crate::state::HostRecord;
use futures::future::join_all;
use reqwest::Client;
use std::time::{Duration, Instant};
use tokio::net::TcpStream;
use tokio::time;
use tracing::{debug, warn};

const DEFAULT_TCP_PORT: u16 = 80;

/// Probes every host concurrently; the result keeps configuration order.
pub async fn probe_hosts<P: ReachabilityProbe>(probe: &P, hosts: &[HostConfig]) -> Vec<HostRecord> {
    join_all(hosts.iter().map(|host| async move {
        HostRecord {
            name: host.name.clone(),
            url: host.url.clone(),
            online: probe.is_reachable(&host.name, &host.url).await,
        }
    }))
    .await
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Target {
    Http(String),
    Tcp(String),
}

impl Target {
    fn parse(url: &str) -> Self {
        let url = url.trim();
        let lower = url.to_ascii_lowercase();
        if lower.starts_with("http://") || lower.starts_with("https://") {
            return Target::Http(url.to_string());
        }

        let addr = url.strip_prefix("tcp://").unwrap_or(url);
        let has_port = addr
            .rsplit_once(':')
            .is_some_and(|(_, port)| port.parse::<u16>().is_ok());
        if has_port {
            Target::Tcp(addr.to_string())
        } else {
            Target::Tcp(format!("{addr}:{DEFAULT_TCP_PORT}"))
        }
    }
}

/// HTTP GET for `http(s)://` URLs, plain TCP connect for everything else.
/// Any HTTP response counts as reachable, whatever its status.
#[derive(Debug, Clone)]
pub struct NetworkProbe {
    client: Client,
    timeout: Duration,
}

impl NetworkProbe {
    pub fn new(timeout: Duration) -> Self {
        let client = Client::builder()
            .user_agent(concat!("tailwind/", env!("CARGO_PKG_VERSION")))
            .build()
            .unwrap_or_else(|_| Client::new());
        Self { client, timeout }
    }

    async fn check_http(&self, name: &str, url: &str) -> bool {
        let start = Instant::now();
        let req = self.client.get(url).timeout(self.timeout);

        match req.send().await {
            Ok(resp) => {
                debug!(
                    host = %name,
                    status = resp.status().as_u16(),
                    latency_ms = start.elapsed().as_millis() as u64,
                    "http probe answered"
                );
                true
            }
            Err(err) if err.is_timeout() => {
                warn!(host = %name, url = %url, "http probe timeout");
                false
            }
            Err(err) => {
                warn!(host = %name, url = %url, error = %err, "http probe failed");
                false
            }
        }
    }

    async fn check_tcp(&self, name: &str, addr: &str) -> bool {
        match time::timeout(self.timeout, TcpStream::connect(addr)).await {
            Ok(Ok(_stream)) => true,
            Ok(Err(err)) => {
                warn!(host = %name, address = %addr, error = %err, "tcp probe failed");
                false
            }
            Err(_elapsed) => {
                warn!(host = %name, address = %addr, "tcp probe timeout");
                false
            }
        }
    }
}

impl ReachabilityProbe for NetworkProbe {
    async fn is_reachable(&self, name: &str, url: &str) -> bool {
        match Target::parse(url) {
            Target::Http(url) => self.check_http(name, &url).await,
            Target::Tcp(addr) => self.check_tcp(name, &addr).await,
        }
    }
}
