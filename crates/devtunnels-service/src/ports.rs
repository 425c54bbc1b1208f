//! Discovery of local web servers worth exposing.

use std::net::{Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

use devtunnels_core::config::messages;
use devtunnels_core::{DevTunnelsConfig, Error, ErrorCode, Logger, PortScanResult, Result};

const COMPONENT: &str = "PortScanner";

/// Probes loopback ports for listening HTTP servers.
pub struct PortScanner {
    ports: Vec<u16>,
    probe_timeout: Duration,
    logger: Arc<Logger>,
}

impl PortScanner {
    pub fn new(config: &DevTunnelsConfig, logger: Arc<Logger>) -> Self {
        Self {
            ports: config.common_ports.clone(),
            probe_timeout: config.port_probe_timeout(),
            logger,
        }
    }

    /// Replace the configured port list.
    #[must_use]
    pub fn with_ports(mut self, ports: Vec<u16>) -> Self {
        self.ports = ports;
        self
    }

    pub fn ports(&self) -> &[u16] {
        &self.ports
    }

    /// Probe one port. Failures are reported in the result, never raised.
    pub async fn probe_port(&self, port: u16) -> PortScanResult {
        let addr = SocketAddr::from((Ipv4Addr::LOCALHOST, port));

        let mut stream = match tokio::time::timeout(self.probe_timeout, TcpStream::connect(addr))
            .await
        {
            Ok(Ok(stream)) => stream,
            Ok(Err(e)) => return inactive(port, e.to_string()),
            Err(_) => {
                return inactive(
                    port,
                    format!("Connection timed out after {}ms", self.probe_timeout.as_millis()),
                );
            }
        };

        let is_http_service = tokio::time::timeout(self.probe_timeout, speaks_http(&mut stream, port))
            .await
            .unwrap_or(false);

        PortScanResult {
            port,
            is_active: true,
            is_http_service,
            error: None,
        }
    }

    /// Probe every configured port, in list order.
    pub async fn scan(&self) -> Vec<PortScanResult> {
        let mut results = Vec::with_capacity(self.ports.len());
        for &port in &self.ports {
            results.push(self.probe_port(port).await);
        }
        self.logger.debug_with(
            COMPONENT,
            "Port scan completed",
            json!(results),
        );
        results
    }

    /// Active HTTP ports, in list order.
    pub async fn find_web_servers(&self) -> Vec<u16> {
        let ports: Vec<u16> = self
            .scan()
            .await
            .into_iter()
            .filter(|r| r.is_active && r.is_http_service)
            .map(|r| r.port)
            .collect();
        self.logger
            .info(COMPONENT, format!("Found web servers on ports: {ports:?}"));
        ports
    }

    /// First active HTTP port, or `PORT_SCAN_FAILED` when there is none.
    pub async fn require_web_server(&self) -> Result<u16> {
        match self.find_web_servers().await.first() {
            Some(&port) => Ok(port),
            None => {
                self.logger.warn(COMPONENT, messages::PORT_NOT_FOUND);
                Err(Error::port_scan(
                    ErrorCode::PortScanFailed,
                    messages::PORT_NOT_FOUND,
                ))
            }
        }
    }
}

fn inactive(port: u16, error: String) -> PortScanResult {
    PortScanResult {
        port,
        is_active: false,
        is_http_service: false,
        error: Some(error),
    }
}

/// Send `HEAD /` and check the reply starts with an HTTP status line.
async fn speaks_http(stream: &mut TcpStream, port: u16) -> bool {
    let request = format!("HEAD / HTTP/1.0\r\nHost: localhost:{port}\r\n\r\n");
    if stream.write_all(request.as_bytes()).await.is_err() {
        return false;
    }

    let mut buf = [0u8; 5];
    let mut filled = 0;
    while filled < buf.len() {
        match stream.read(&mut buf[filled..]).await {
            Ok(0) | Err(_) => break,
            Ok(n) => filled += n,
        }
    }
    &buf[..filled] == b"HTTP/"
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use tokio::net::TcpListener;

    use devtunnels_core::LogLevel;

    use super::*;

    async fn serve_once(reply: &'static [u8]) -> u16 {
        let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, 0)).await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            while let Ok((mut socket, _)) = listener.accept().await {
                let mut req = [0u8; 256];
                let _ = socket.read(&mut req).await;
                let _ = socket.write_all(reply).await;
            }
        });
        port
    }

    async fn closed_port() -> u16 {
        let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, 0)).await.unwrap();
        listener.local_addr().unwrap().port()
    }

    fn scanner(ports: Vec<u16>) -> PortScanner {
        let config = DevTunnelsConfig {
            port_probe_timeout_ms: 300,
            ..DevTunnelsConfig::default()
        };
        PortScanner::new(&config, Arc::new(Logger::with_level(100, LogLevel::Debug)))
            .with_ports(ports)
    }

    #[tokio::test]
    async fn detects_http_server() {
        let port = serve_once(b"HTTP/1.1 200 OK\r\nContent-Length: 0\r\n\r\n").await;
        let result = scanner(vec![]).probe_port(port).await;
        assert!(result.is_active);
        assert!(result.is_http_service);
        assert!(result.error.is_none());
    }

    #[tokio::test]
    async fn non_http_listener_is_active_only() {
        let port = serve_once(b"SSH-2.0-OpenSSH_9.6\r\n").await;
        let result = scanner(vec![]).probe_port(port).await;
        assert!(result.is_active);
        assert!(!result.is_http_service);
    }

    #[tokio::test]
    async fn closed_port_is_inactive_with_error() {
        let port = closed_port().await;
        let result = scanner(vec![]).probe_port(port).await;
        assert!(!result.is_active);
        assert!(result.error.is_some());
    }

    #[tokio::test]
    async fn finds_web_servers_in_list_order() {
        let ssh = serve_once(b"SSH-2.0-x\r\n").await;
        let web_a = serve_once(b"HTTP/1.0 404 Not Found\r\n\r\n").await;
        let closed = closed_port().await;
        let web_b = serve_once(b"HTTP/1.1 200 OK\r\n\r\n").await;

        let scanner = scanner(vec![ssh, web_b, closed, web_a]);
        assert_eq!(scanner.find_web_servers().await, vec![web_b, web_a]);
        assert_eq!(scanner.require_web_server().await.unwrap(), web_b);
    }

    #[tokio::test]
    async fn require_web_server_fails_when_none() {
        let closed = closed_port().await;
        let err = scanner(vec![closed]).require_web_server().await.unwrap_err();
        assert_eq!(err.code(), ErrorCode::PortScanFailed);
        assert_eq!(err.component(), "PortScanner");
    }
}
