use crate::{
    admission::Admission,
    core::{Guard, DEFAULT_MEMBER_PREFIX},
    etcd::{EtcdConnector, Endpoints},
    metrics::AdmissionMetrics,
};
use anyhow::{bail, Result};
use clap::Parser;
use prometheus_client::registry::Registry;
use tokio::time::Duration;
use tracing::info;

#[derive(Debug, Parser)]
#[clap(
    name = "quorum-guard",
    about = "Denies deletion of the etcd leader's pod while other members exist"
)]
pub struct Args {
    #[clap(
        long,
        default_value = "quorum_guard=info,warn",
        env = "QUORUM_GUARD_LOG"
    )]
    log_level: kubert::LogFilter,

    #[clap(long, default_value = "plain")]
    log_format: kubert::LogFormat,

    #[clap(flatten)]
    client: kubert::ClientArgs,

    #[clap(flatten)]
    server: kubert::ServerArgs,

    #[clap(flatten)]
    admin: kubert::AdminArgs,

    /// Comma-separated client endpoints of the etcd cluster.
    #[clap(long, default_value = "etcd:2379")]
    etcd_endpoints: Endpoints,

    /// Pods whose names start with this prefix are etcd members.
    #[clap(long, default_value = DEFAULT_MEMBER_PREFIX)]
    member_prefix: String,

    #[clap(long, default_value = "5000")]
    etcd_dial_timeout_ms: u64,

    #[clap(long, default_value = "5000")]
    etcd_request_timeout_ms: u64,

    /// The request path on which pod deletions are validated. Reviews sent to
    /// any other path are answered without a verdict.
    #[clap(long, default_value = "/validate")]
    validate_path: String,
}

impl Args {
    #[inline]
    pub async fn parse_and_run() -> Result<()> {
        Self::parse().run().await
    }

    pub async fn run(self) -> Result<()> {
        let Self {
            admin,
            client,
            log_level,
            log_format,
            server,
            etcd_endpoints: Endpoints(etcd_endpoints),
            member_prefix,
            etcd_dial_timeout_ms,
            etcd_request_timeout_ms,
            validate_path,
        } = self;

        let connector = EtcdConnector::new(
            etcd_endpoints,
            Duration::from_millis(etcd_dial_timeout_ms),
            Duration::from_millis(etcd_request_timeout_ms),
        )?;

        let mut prom = Registry::with_prefix("quorum_guard");
        let metrics = AdmissionMetrics::register(prom.sub_registry_with_prefix("admission"));
        let rt_metrics = kubert::RuntimeMetrics::register(prom.sub_registry_with_prefix("kube"));

        let runtime = kubert::Runtime::builder()
            .with_log(log_level, log_format)
            .with_metrics(rt_metrics)
            .with_admin(admin.into_builder().with_prometheus(prom))
            .with_client(client)
            .with_server(server)
            .build()
            .await?;

        info!(
            endpoints = ?connector.endpoints(),
            %member_prefix,
            %validate_path,
            "Guarding etcd members",
        );
        let guard = Guard::new(connector, member_prefix);
        let admission = Admission::new(guard, validate_path, metrics);
        let runtime = runtime.spawn_server(admission);

        // Block the main thread on the shutdown signal. Once it fires, wait for
        // in-flight reviews to complete before exiting.
        if runtime.run().await.is_err() {
            bail!("Aborted");
        }

        Ok(())
    }
}
