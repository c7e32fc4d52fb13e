#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

pub mod cluster;
pub mod decision;

pub use self::{
    cluster::{ClusterMember, ClusterSession, ClusterSnapshot, ConnectCluster},
    decision::{Guard, Reason, Verdict},
};

/// The pod name prefix used by the cluster's member pods unless configured
/// otherwise.
pub const DEFAULT_MEMBER_PREFIX: &str = "etcd";
