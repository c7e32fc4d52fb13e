use crate::cluster::{ClusterSession, ClusterSnapshot, ConnectCluster};
use std::{fmt, sync::Arc};
use tracing::{debug, info, warn};

/// Decides whether deleting a pod may endanger the cluster's quorum.
///
/// The guard holds no per-decision state: each member decision opens its own
/// session, reads a fresh snapshot, and releases the session before returning.
#[derive(Clone, Debug)]
pub struct Guard<C> {
    connect: C,
    member_prefix: Arc<str>,
}

/// The allowed/reason pair produced by one decision.
///
/// A verdict only allows when it was built from an allowing reason.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Verdict {
    allowed: bool,
    reason: Reason,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Reason {
    /// The pod does not carry the member prefix.
    NotClusterMember,

    /// The member is not the leader, or it is the last member.
    QuorumPreserved,

    /// The object under review could not be decoded.
    InvalidObject(String),

    /// The object kind is not governed by this guard.
    UnsupportedKind(String),

    /// Only deletions are governed by this guard.
    UnsupportedOperation(String),

    ClusterUnavailable,
    LeaderUnknown,
    MembersUnknown,
    UnknownMember,
    LeaderProtected,
}

// === impl Guard ===

impl<C> Guard<C>
where
    C: ConnectCluster,
{
    pub fn new(connect: C, member_prefix: impl Into<Arc<str>>) -> Self {
        Self {
            connect,
            member_prefix: member_prefix.into(),
        }
    }

    pub fn member_prefix(&self) -> &str {
        &self.member_prefix
    }

    pub fn is_member_pod(&self, name: &str) -> bool {
        name.starts_with(&*self.member_prefix)
    }

    /// Renders a verdict for deleting the pod named `name`.
    ///
    /// Checks run in order and stop at the first deny. The store is only
    /// contacted for member pods.
    pub async fn decide(&self, name: &str) -> Verdict {
        if !self.is_member_pod(name) {
            debug!(%name, prefix = %self.member_prefix, "Not a cluster member pod");
            return Verdict::allow(Reason::NotClusterMember);
        }

        let snapshot = match self.snapshot(name).await {
            Ok(snapshot) => snapshot,
            Err(verdict) => return verdict,
        };

        let verdict = snapshot.removal_verdict(name);
        info!(
            %name,
            leader = snapshot.leader_id,
            member = ?snapshot.resolve(name).map(|m| m.id),
            members = ?snapshot.members,
            allowed = verdict.allowed,
            reason = %verdict.reason,
            "Decided member deletion",
        );
        verdict
    }

    async fn snapshot(&self, name: &str) -> Result<ClusterSnapshot, Verdict> {
        let mut session = match self.connect.connect().await {
            Ok(session) => session,
            Err(error) => {
                warn!(%error, %name, "Failed to connect to cluster");
                return Err(Verdict::deny(Reason::ClusterUnavailable));
            }
        };

        let leader_id = match session.current_leader().await {
            Ok(id) => id,
            Err(error) => {
                warn!(%error, %name, "Failed to fetch cluster leader");
                return Err(Verdict::deny(Reason::LeaderUnknown));
            }
        };

        let members = match session.list_members().await {
            Ok(members) => members,
            Err(error) => {
                warn!(%error, %name, "Failed to list cluster members");
                return Err(Verdict::deny(Reason::MembersUnknown));
            }
        };

        Ok(ClusterSnapshot { leader_id, members })
    }
}

// === impl Verdict ===

impl Verdict {
    pub(crate) fn allow(reason: Reason) -> Self {
        Self {
            allowed: true,
            reason,
        }
    }

    pub fn deny(reason: Reason) -> Self {
        Self {
            allowed: false,
            reason,
        }
    }

    pub fn is_allowed(&self) -> bool {
        self.allowed
    }

    pub fn reason(&self) -> &Reason {
        &self.reason
    }
}

// === impl Reason ===

impl Reason {
    /// A stable CamelCase identifier for the reason.
    pub fn code(&self) -> &'static str {
        match self {
            Self::NotClusterMember => "NotClusterMember",
            Self::QuorumPreserved => "QuorumPreserved",
            Self::InvalidObject(_) => "InvalidObject",
            Self::UnsupportedKind(_) => "UnsupportedKind",
            Self::UnsupportedOperation(_) => "UnsupportedOperation",
            Self::ClusterUnavailable => "ClusterUnavailable",
            Self::LeaderUnknown => "LeaderUnknown",
            Self::MembersUnknown => "MembersUnknown",
            Self::UnknownMember => "UnknownMember",
            Self::LeaderProtected => "LeaderProtected",
        }
    }
}

impl fmt::Display for Reason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotClusterMember => f.write_str("not a cluster-member pod, deletion allowed"),
            Self::QuorumPreserved => f.write_str("member removal does not endanger quorum"),
            Self::InvalidObject(error) => f.write_str(error),
            Self::UnsupportedKind(kind) => write!(f, "unsupported resource kind: {kind}"),
            Self::UnsupportedOperation(op) => write!(f, "unsupported operation: {op}"),
            Self::ClusterUnavailable => f.write_str("cluster client unavailable"),
            Self::LeaderUnknown => f.write_str("could not determine leader"),
            Self::MembersUnknown => f.write_str("could not list members"),
            Self::UnknownMember => f.write_str("target not a recognized cluster member"),
            Self::LeaderProtected => {
                f.write_str("cannot delete the current leader while other members exist")
            }
        }
    }
}
