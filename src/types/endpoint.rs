// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0
use std::fmt;
use url::Url;

/// A reachable service of the provisioned environment
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ServiceEndpoint {
    pub service: String,
    pub host: String,
    pub port: u16,
}

impl ServiceEndpoint {
    /// HTTP URL for a path on this endpoint
    pub fn url(&self, path: &str) -> Result<Url, url::ParseError> {
        Url::parse(&format!("http://{}:{}", self.host, self.port))?.join(path)
    }
}

impl fmt::Display for ServiceEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}
