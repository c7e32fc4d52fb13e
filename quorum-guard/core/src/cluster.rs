use crate::decision::{Reason, Verdict};
use anyhow::Result;

/// A node registered in the coordination store's membership list.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ClusterMember {
    pub id: u64,

    /// Matches the name of the pod running this member. Empty for members that
    /// have been added but have not yet started.
    pub name: String,
}

/// Leadership and membership as observed by a single decision.
///
/// A snapshot is never shared between decisions: two concurrent decisions may
/// observe different snapshots.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ClusterSnapshot {
    pub leader_id: u64,
    pub members: Vec<ClusterMember>,
}

/// Opens a session against the coordination store.
///
/// Sessions are opened per decision and are never pooled. A failed attempt is
/// not retried.
#[async_trait::async_trait]
pub trait ConnectCluster {
    type Session: ClusterSession + Send;

    async fn connect(&self) -> Result<Self::Session>;
}

/// Read-only queries against an open session. The session is released when it
/// is dropped.
#[async_trait::async_trait]
pub trait ClusterSession {
    /// Returns the numeric id of the current consensus leader.
    async fn current_leader(&mut self) -> Result<u64>;

    async fn list_members(&mut self) -> Result<Vec<ClusterMember>>;
}

// === impl ClusterSnapshot ===

impl ClusterSnapshot {
    /// Finds the member whose name equals `name`.
    pub fn resolve(&self, name: &str) -> Option<&ClusterMember> {
        self.members.iter().find(|m| m.name == name)
    }

    /// Renders a verdict for removing the member named `name`.
    ///
    /// Removing a member other than the leader is always allowed, as is
    /// removing the sole remaining member. Removing the leader while peers
    /// exist is denied. A name that does not resolve to a member is denied,
    /// since the effect of its removal is unknown.
    pub fn removal_verdict(&self, name: &str) -> Verdict {
        let member = match self.resolve(name) {
            Some(member) => member,
            None => return Verdict::deny(Reason::UnknownMember),
        };

        if member.id != self.leader_id || self.members.len() == 1 {
            return Verdict::allow(Reason::QuorumPreserved);
        }

        Verdict::deny(Reason::LeaderProtected)
    }
}
