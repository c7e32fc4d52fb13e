use hyper::http::uri::Authority;
use std::{fmt, str::FromStr};

const DEFAULT_PORT: u16 = 2379;

/// A client endpoint of the store, in `host:port` form.
///
/// An `http://` scheme is accepted and ignored. Omitted ports default to the
/// standard client port.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Endpoint {
    host: String,
    port: u16,
}

#[derive(Debug, thiserror::Error)]
pub enum InvalidEndpoint {
    #[error("unsupported scheme in endpoint {0:?}")]
    Scheme(String),

    #[error("invalid endpoint {0:?}: {1}")]
    Authority(String, hyper::http::uri::InvalidUri),
}

/// A comma-separated list of endpoints.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Endpoints(pub Vec<Endpoint>);

// === impl Endpoint ===

impl Endpoint {
    pub fn host(&self) -> &str {
        &self.host
    }

    /// The host without IPv6 brackets, suitable for resolution.
    pub(crate) fn addr_host(&self) -> &str {
        self.host.trim_start_matches('[').trim_end_matches(']')
    }

    pub fn port(&self) -> u16 {
        self.port
    }
}

impl FromStr for Endpoint {
    type Err = InvalidEndpoint;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let authority = match s.split_once("://") {
            None => s,
            Some(("http", rest)) => rest.trim_end_matches('/'),
            Some(_) => return Err(InvalidEndpoint::Scheme(s.to_string())),
        };
        let authority = authority
            .parse::<Authority>()
            .map_err(|e| InvalidEndpoint::Authority(s.to_string(), e))?;
        Ok(Self {
            host: authority.host().to_string(),
            port: authority.port_u16().unwrap_or(DEFAULT_PORT),
        })
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

// === impl Endpoints ===

impl FromStr for Endpoints {
    type Err = InvalidEndpoint;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.split(',')
            .filter(|e| !e.trim().is_empty())
            .map(str::parse)
            .collect::<Result<Vec<_>, _>>()
            .map(Self)
    }
}
