#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

pub use quorum_guard_core as core;
pub use quorum_guard_etcd as etcd;

mod admission;
mod args;
mod metrics;

pub use self::{admission::Admission, args::Args, metrics::AdmissionMetrics};
