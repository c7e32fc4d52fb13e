use crate::{
    core::{ConnectCluster, Guard, Reason, Verdict},
    metrics::AdmissionMetrics,
};
use bytes::Bytes;
use futures::future;
use http_body_util::BodyExt;
use hyper::{http, Request, Response};
use k8s_openapi::api::core::v1::Pod;
use kube::{
    core::{admission::Operation, DynamicObject},
    Resource,
};
use std::{sync::Arc, time::Instant};
use thiserror::Error;
use tracing::{debug, error, info, trace, warn};

/// Validates pod deletions against the cluster's leadership.
#[derive(Clone, Debug)]
pub struct Admission<C> {
    guard: Guard<C>,
    validate_path: Arc<str>,
    metrics: AdmissionMetrics,
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("failed to read request body: {0}")]
    Request(#[from] hyper::Error),
}

/// The object kinds whose deletion is governed by the guard.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
enum GovernedKind {
    Pod,
}

type Review = kube::core::admission::AdmissionReview<DynamicObject>;
type AdmissionRequest = kube::core::admission::AdmissionRequest<DynamicObject>;
type AdmissionResponse = kube::core::admission::AdmissionResponse;

type Body = http_body_util::Full<Bytes>;

const JSON: &str = "application/json";

// === impl Admission ===

impl<C> tower::Service<Request<hyper::body::Incoming>> for Admission<C>
where
    C: ConnectCluster + Clone + Send + Sync + 'static,
{
    type Response = Response<Body>;
    type Error = Error;
    type Future = future::BoxFuture<'static, Result<Response<Body>, Error>>;

    fn poll_ready(
        &mut self,
        _cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<std::result::Result<(), Self::Error>> {
        std::task::Poll::Ready(Ok(()))
    }

    fn call(&mut self, req: Request<hyper::body::Incoming>) -> Self::Future {
        trace!(?req);
        if req.method() != http::Method::POST {
            return Box::pin(future::ok(text_response(
                http::StatusCode::METHOD_NOT_ALLOWED,
                "expected POST",
            )));
        }

        let admission = self.clone();
        Box::pin(async move {
            let (parts, body) = req.into_parts();
            let bytes = body.collect().await?.to_bytes();
            Ok(admission.handle(&parts, bytes).await)
        })
    }
}

impl<C> Admission<C>
where
    C: ConnectCluster,
{
    pub fn new(
        guard: Guard<C>,
        validate_path: impl Into<Arc<str>>,
        metrics: AdmissionMetrics,
    ) -> Self {
        Self {
            guard,
            validate_path: validate_path.into(),
            metrics,
        }
    }

    /// Handles a fully-read request.
    ///
    /// Protocol errors are answered before the envelope is decoded. Once the
    /// envelope decodes, every outcome is a 200 response carrying a review.
    async fn handle(self, parts: &http::request::Parts, body: Bytes) -> Response<Body> {
        if body.is_empty() {
            warn!("Empty request body");
            return text_response(http::StatusCode::BAD_REQUEST, "empty body");
        }

        let content_type = parts.headers.get(http::header::CONTENT_TYPE);
        if !is_json(content_type) {
            warn!(?content_type, "Unexpected Content-Type, expected {JSON}");
            return text_response(
                http::StatusCode::UNSUPPORTED_MEDIA_TYPE,
                "invalid Content-Type, expect `application/json`",
            );
        }

        let review: Review = match serde_json::from_slice(&body) {
            Ok(review) => review,
            Err(error) => {
                warn!(%error, "Failed to parse request body");
                return json_response(AdmissionResponse::invalid(error).into_review());
            }
        };
        trace!(?review);

        let req: AdmissionRequest = match review.try_into() {
            Ok(req) => req,
            Err(error) => {
                warn!(%error, "Invalid admission request");
                return json_response(AdmissionResponse::invalid(error).into_review());
            }
        };

        if parts.uri.path() != &*self.validate_path {
            debug!(path = %parts.uri.path(), "Not a validation path");
            return json_response(Review {
                types: req.types,
                request: None,
                response: None,
            });
        }

        let rsp = self.admit(req).await;
        debug!(?rsp);
        json_response(rsp.into_review())
    }

    async fn admit(&self, req: AdmissionRequest) -> AdmissionResponse {
        info!(
            kind = %req.kind.kind,
            namespace = req.namespace.as_deref().unwrap_or(""),
            name = %req.name,
            uid = %req.uid,
            operation = ?req.operation,
            user = req.user_info.username.as_deref().unwrap_or(""),
            "Admission review",
        );

        let start = Instant::now();
        let verdict = self.decide(&req).await;
        self.metrics.observe(&verdict, start.elapsed());

        if !verdict.is_allowed() {
            info!(name = %req.name, uid = %req.uid, reason = %verdict.reason(), "Denied");
        }
        into_response(&req, &verdict)
    }

    async fn decide(&self, req: &AdmissionRequest) -> Verdict {
        if req.operation != Operation::Delete {
            let op = operation_name(&req.operation);
            info!(operation = %op, name = %req.name, "Unsupported operation");
            return Verdict::deny(Reason::UnsupportedOperation(op.to_string()));
        }

        match GovernedKind::of(req) {
            Some(GovernedKind::Pod) => self.decide_pod(req).await,
            None => {
                let kind = format!("{}/{}/{}", req.kind.group, req.kind.version, req.kind.kind);
                info!(%kind, "Unsupported resource kind");
                Verdict::deny(Reason::UnsupportedKind(kind))
            }
        }
    }

    async fn decide_pod(&self, req: &AdmissionRequest) -> Verdict {
        match parse_pod(req) {
            Ok(Some(pod)) => trace!(?pod),
            Ok(None) => debug!(name = %req.name, "Admission request carries no object"),
            Err(error) => {
                info!(%error, name = %req.name, "Failed to decode pod");
                return Verdict::deny(Reason::InvalidObject(error.to_string()));
            }
        }

        self.guard.decide(&req.name).await
    }
}

// === impl GovernedKind ===

impl GovernedKind {
    fn of(req: &AdmissionRequest) -> Option<Self> {
        if is_kind::<Pod>(req) {
            return Some(Self::Pod);
        }

        None
    }
}

fn is_kind<T>(req: &AdmissionRequest) -> bool
where
    T: Resource,
    T::DynamicType: Default,
{
    let dt = Default::default();
    req.kind.group.eq_ignore_ascii_case(&T::group(&dt))
        && req.kind.kind.eq_ignore_ascii_case(&T::kind(&dt))
}

fn operation_name(op: &Operation) -> &'static str {
    match op {
        Operation::Create => "CREATE",
        Operation::Update => "UPDATE",
        Operation::Delete => "DELETE",
        Operation::Connect => "CONNECT",
    }
}

/// Decodes the pod under review. Deletions carry the pod as the old object.
fn parse_pod(req: &AdmissionRequest) -> Result<Option<Pod>, serde_json::Error> {
    let obj = match req.old_object.as_ref().or(req.object.as_ref()) {
        Some(obj) => obj,
        None => return Ok(None),
    };
    let value = serde_json::to_value(obj)?;
    serde_json::from_value(value).map(Some)
}

/// Builds a denying response and only flips it to allowed when the verdict
/// allows.
fn into_response(req: &AdmissionRequest, verdict: &Verdict) -> AdmissionResponse {
    let mut rsp = AdmissionResponse::from(req).deny(verdict.reason());
    rsp.result.reason = verdict.reason().code().to_string();
    if verdict.is_allowed() {
        rsp.allowed = true;
    }
    rsp
}

fn is_json(content_type: Option<&http::HeaderValue>) -> bool {
    content_type
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(';').next())
        .map(|mime| mime.trim().eq_ignore_ascii_case(JSON))
        .unwrap_or(false)
}

fn json_response(review: Review) -> Response<Body> {
    match serde_json::to_vec(&review) {
        Ok(bytes) => Response::builder()
            .status(http::StatusCode::OK)
            .header(http::header::CONTENT_TYPE, JSON)
            .body(Body::from(bytes))
            .expect("admission review response must be valid"),
        Err(error) => {
            error!(%error, ?review, "Failed to encode admission review");
            text_response(
                http::StatusCode::INTERNAL_SERVER_ERROR,
                format!("could not encode response: {error}"),
            )
        }
    }
}

fn text_response(status: http::StatusCode, msg: impl Into<Bytes>) -> Response<Body> {
    Response::builder()
        .status(status)
        .header(http::header::CONTENT_TYPE, "text/plain; charset=utf-8")
        .body(Body::from(msg.into()))
        .expect("error response must be valid")
}
