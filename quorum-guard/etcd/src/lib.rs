#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

//! A cluster client that reads leadership and membership from etcd's v3 JSON
//! gateway.
//!
//! Each session is a single HTTP/1.1 connection to one endpoint. Sessions are
//! not pooled and requests are not retried.

pub mod api;
mod endpoint;

pub use self::endpoint::{Endpoint, Endpoints, InvalidEndpoint};

use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::{client::conn::http1, http, Request, StatusCode};
use hyper_util::rt::TokioIo;
use quorum_guard_core::{ClusterMember, ClusterSession, ConnectCluster};
use std::{sync::Arc, time::Duration};
use thiserror::Error;
use tokio::{net::TcpStream, task::JoinHandle, time};
use tracing::{debug, trace};

const STATUS_PATH: &str = "/v3/maintenance/status";
const MEMBER_LIST_PATH: &str = "/v3/cluster/member/list";

#[derive(Clone, Debug)]
pub struct EtcdConnector {
    endpoints: Arc<[Endpoint]>,
    dial_timeout: Duration,
    request_timeout: Duration,
}

/// An open connection to one etcd endpoint. The connection is closed when the
/// session is dropped.
pub struct EtcdSession {
    endpoint: Endpoint,
    tx: http1::SendRequest<Full<Bytes>>,
    conn: JoinHandle<()>,
    request_timeout: Duration,
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("no etcd endpoints configured")]
    NoEndpoints,

    #[error("failed to connect to {endpoint}: {source}")]
    Connect {
        endpoint: Endpoint,
        #[source]
        source: std::io::Error,
    },

    #[error("HTTP handshake with {endpoint} failed: {source}")]
    Handshake {
        endpoint: Endpoint,
        #[source]
        source: hyper::Error,
    },

    #[error("connecting to {0} timed out after {1:?}")]
    ConnectTimeout(Endpoint, Duration),

    #[error("invalid request: {0}")]
    Request(#[from] http::Error),

    #[error("request failed: {0}")]
    Http(#[from] hyper::Error),

    #[error("request to {0} timed out after {1:?}")]
    RequestTimeout(&'static str, Duration),

    #[error("{path} returned {status}: {message}")]
    Status {
        path: &'static str,
        status: StatusCode,
        message: String,
    },

    #[error("failed to decode response: {0}")]
    Json(#[from] serde_json::Error),

    #[error("cluster has no leader")]
    NoLeader,
}

// === impl EtcdConnector ===

impl EtcdConnector {
    pub fn new(
        endpoints: Vec<Endpoint>,
        dial_timeout: Duration,
        request_timeout: Duration,
    ) -> Result<Self, Error> {
        if endpoints.is_empty() {
            return Err(Error::NoEndpoints);
        }
        Ok(Self {
            endpoints: endpoints.into(),
            dial_timeout,
            request_timeout,
        })
    }

    pub fn endpoints(&self) -> &[Endpoint] {
        &self.endpoints
    }

    /// Tries each endpoint in order and returns the first session that
    /// completes its handshake within the dial timeout.
    pub async fn open(&self) -> Result<EtcdSession, Error> {
        let mut error = Error::NoEndpoints;
        for endpoint in self.endpoints.iter() {
            match time::timeout(self.dial_timeout, self.handshake(endpoint)).await {
                Ok(Ok(session)) => return Ok(session),
                Ok(Err(e)) => error = e,
                Err(_) => error = Error::ConnectTimeout(endpoint.clone(), self.dial_timeout),
            }
            debug!(%endpoint, %error, "Failed to connect");
        }
        Err(error)
    }

    async fn handshake(&self, endpoint: &Endpoint) -> Result<EtcdSession, Error> {
        let io = TcpStream::connect((endpoint.addr_host(), endpoint.port()))
            .await
            .map_err(|source| Error::Connect {
                endpoint: endpoint.clone(),
                source,
            })?;
        let _ = io.set_nodelay(true);

        let (tx, conn) = http1::handshake(TokioIo::new(io))
            .await
            .map_err(|source| Error::Handshake {
                endpoint: endpoint.clone(),
                source,
            })?;
        let conn = tokio::spawn(async move {
            if let Err(error) = conn.await {
                debug!(%error, "Connection closed");
            }
        });
        trace!(%endpoint, "Connected");

        Ok(EtcdSession {
            endpoint: endpoint.clone(),
            tx,
            conn,
            request_timeout: self.request_timeout,
        })
    }
}

#[async_trait::async_trait]
impl ConnectCluster for EtcdConnector {
    type Session = EtcdSession;

    async fn connect(&self) -> anyhow::Result<EtcdSession> {
        self.open().await.map_err(Into::into)
    }
}

// === impl EtcdSession ===

impl EtcdSession {
    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    pub async fn status(&mut self) -> Result<api::StatusResponse, Error> {
        self.post(STATUS_PATH).await
    }

    pub async fn member_list(&mut self) -> Result<api::MemberListResponse, Error> {
        self.post(MEMBER_LIST_PATH).await
    }

    async fn post<T>(&mut self, path: &'static str) -> Result<T, Error>
    where
        T: serde::de::DeserializeOwned,
    {
        let timeout = self.request_timeout;
        let bytes = time::timeout(timeout, self.send(path))
            .await
            .map_err(|_| Error::RequestTimeout(path, timeout))??;
        trace!(%path, body = ?bytes, "Response");
        serde_json::from_slice(&bytes).map_err(Into::into)
    }

    async fn send(&mut self, path: &'static str) -> Result<Bytes, Error> {
        let req = Request::post(path)
            .header(http::header::HOST, self.endpoint.to_string())
            .header(http::header::CONTENT_TYPE, "application/json")
            .body(Full::new(Bytes::from_static(b"{}")))?;

        self.tx.ready().await?;
        let rsp = self.tx.send_request(req).await?;
        let status = rsp.status();
        let bytes = rsp.into_body().collect().await?.to_bytes();
        if !status.is_success() {
            return Err(Error::Status {
                path,
                status,
                message: String::from_utf8_lossy(&bytes).into_owned(),
            });
        }
        Ok(bytes)
    }
}

#[async_trait::async_trait]
impl ClusterSession for EtcdSession {
    async fn current_leader(&mut self) -> anyhow::Result<u64> {
        let status = self.status().await?;
        if status.leader == 0 {
            return Err(Error::NoLeader.into());
        }
        Ok(status.leader)
    }

    async fn list_members(&mut self) -> anyhow::Result<Vec<ClusterMember>> {
        let list = self.member_list().await?;
        Ok(list
            .members
            .into_iter()
            .map(|m| ClusterMember {
                id: m.id,
                name: m.name,
            })
            .collect())
    }
}

impl Drop for EtcdSession {
    fn drop(&mut self) {
        self.conn.abort();
    }
}

#[cfg(test)]
mod tests;
