//! Response bodies of the JSON gateway. The gateway encodes 64-bit integers
//! as strings.

use serde::{Deserialize, Deserializer};

#[derive(Clone, Debug, Default, Deserialize)]
pub struct StatusResponse {
    #[serde(default)]
    pub version: String,

    /// Zero when the member knows of no leader.
    #[serde(default, deserialize_with = "uint64")]
    pub leader: u64,
}

#[derive(Clone, Debug, Default, Deserialize)]
pub struct MemberListResponse {
    #[serde(default)]
    pub members: Vec<Member>,
}

#[derive(Clone, Debug, Default, Deserialize)]
pub struct Member {
    #[serde(rename = "ID", default, deserialize_with = "uint64")]
    pub id: u64,

    /// Empty until the member has started.
    #[serde(default)]
    pub name: String,

    #[serde(default, rename = "isLearner")]
    pub is_learner: bool,
}

fn uint64<'de, D>(de: D) -> Result<u64, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Repr {
        Number(u64),
        String(String),
    }

    match Repr::deserialize(de)? {
        Repr::Number(n) => Ok(n),
        Repr::String(s) => s.parse().map_err(serde::de::Error::custom),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_leader_as_string() {
        let rsp: StatusResponse = serde_json::from_str(
            r#"{"header":{"cluster_id":"14841639068965178418","member_id":"10276657743932975437","revision":"1","raft_term":"2"},"version":"3.5.9","dbSize":"20480","leader":"10276657743932975437","raftIndex":"4","raftTerm":"2"}"#,
        )
        .unwrap();
        assert_eq!(rsp.leader, 10276657743932975437);
        assert_eq!(rsp.version, "3.5.9");
    }

    #[test]
    fn status_without_leader() {
        let rsp: StatusResponse = serde_json::from_str(r#"{"version":"3.5.9"}"#).unwrap();
        assert_eq!(rsp.leader, 0);
    }

    #[test]
    fn member_list() {
        let rsp: MemberListResponse = serde_json::from_str(
            r#"{"header":{},"members":[
                {"ID":"10276657743932975437","name":"etcd-0","peerURLs":["http://etcd-0:2380"],"clientURLs":["http://etcd-0:2379"]},
                {"ID":2,"name":"","peerURLs":["http://etcd-1:2380"],"isLearner":true}
            ]}"#,
        )
        .unwrap();
        assert_eq!(rsp.members.len(), 2);
        assert_eq!(rsp.members[0].id, 10276657743932975437);
        assert_eq!(rsp.members[0].name, "etcd-0");
        assert_eq!(rsp.members[1].id, 2);
        assert!(rsp.members[1].name.is_empty());
        assert!(rsp.members[1].is_learner);
    }

    #[test]
    fn rejects_malformed_ids() {
        let res = serde_json::from_str::<MemberListResponse>(r#"{"members":[{"ID":"x"}]}"#);
        assert!(res.is_err());
    }
}
