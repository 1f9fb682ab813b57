// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Network probes: HTTP health endpoints and TCP listeners.

use super::{ProbeError, ReadinessCheck};
use std::time::Duration;
use tokio::net::TcpStream;
use tracing::debug;
use url::Url;

/// Per-request timeout of a single probe attempt
const PROBE_REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

/// Ready once `url` answers with a 2xx status. Connection failures are transient.
pub fn http_health(url: Url) -> ReadinessCheck {
    let client = reqwest::Client::builder()
        .timeout(PROBE_REQUEST_TIMEOUT)
        .build()
        .map_err(|e| e.to_string());
    let target = format!("HTTP {}", url);

    ReadinessCheck::new(target, move || {
        let client = client.clone();
        let url = url.clone();
        async move {
            let client = client.map_err(ProbeError::Terminal)?;
            match client.get(url.clone()).send().await {
                Ok(response) if response.status().is_success() => Ok(true),
                Ok(response) => {
                    debug!(status = %response.status(), "{} answered but is not healthy", url);
                    Ok(false)
                }
                Err(e) => Err(ProbeError::Transient(e.to_string())),
            }
        }
    })
}

/// Ready once something accepts TCP connections on `addr` (host:port)
pub fn tcp_port(addr: impl Into<String>) -> ReadinessCheck {
    let addr = addr.into();
    let target = format!("TCP {}", addr);

    ReadinessCheck::new(target, move || {
        let addr = addr.clone();
        async move {
            match tokio::time::timeout(PROBE_REQUEST_TIMEOUT, TcpStream::connect(&addr)).await {
                Ok(Ok(_)) => Ok(true),
                Ok(Err(e)) => Err(ProbeError::Transient(e.to_string())),
                Err(_) => Err(ProbeError::Transient(format!("connect to {} timed out", addr))),
            }
        }
    })
}
