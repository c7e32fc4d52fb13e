use super::*;
use hyper::{body::Incoming, server::conn::http1 as server, service::service_fn, Response};
use quorum_guard_core::{Guard, Reason};
use std::{convert::Infallible, net::SocketAddr};
use tokio::net::{TcpListener, TcpSocket};

const STATUS: &str = r#"{"header":{"member_id":"2"},"version":"3.5.9","leader":"1"}"#;
const MEMBERS: &str = r#"{"members":[
    {"ID":"1","name":"etcd-0"},
    {"ID":"2","name":"etcd-1"},
    {"ID":"3","name":"etcd-2"}
]}"#;

/// Serves canned gateway responses on a loopback port.
async fn serve(status: &'static str, members: (StatusCode, &'static str)) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        loop {
            let (io, _) = listener.accept().await.unwrap();
            let svc = service_fn(move |req: Request<Incoming>| async move {
                let (code, body) = match req.uri().path() {
                    STATUS_PATH => (StatusCode::OK, status),
                    MEMBER_LIST_PATH => members,
                    _ => (StatusCode::NOT_FOUND, "not found"),
                };
                Ok::<_, Infallible>(
                    Response::builder()
                        .status(code)
                        .body(Full::new(Bytes::from_static(body.as_bytes())))
                        .unwrap(),
                )
            });
            tokio::spawn(server::Builder::new().serve_connection(TokioIo::new(io), svc));
        }
    });
    addr
}

fn connector(addrs: &[SocketAddr]) -> EtcdConnector {
    let endpoints = addrs
        .iter()
        .map(|a| a.to_string().parse().unwrap())
        .collect();
    EtcdConnector::new(endpoints, Duration::from_secs(1), Duration::from_secs(1)).unwrap()
}

/// Accepts connections and never answers on them.
async fn stalled() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let mut conns = Vec::new();
        loop {
            let (io, _) = listener.accept().await.unwrap();
            conns.push(io);
        }
    });
    addr
}

/// Returns an address with nothing listening on it.
async fn closed_addr() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    listener.local_addr().unwrap()
}

#[tokio::test]
async fn reads_leader_and_members() {
    let addr = serve(STATUS, (StatusCode::OK, MEMBERS)).await;
    let mut session = connector(&[addr]).connect().await.unwrap();

    assert_eq!(session.current_leader().await.unwrap(), 1);
    let members = session.list_members().await.unwrap();
    assert_eq!(
        members,
        vec![
            ClusterMember {
                id: 1,
                name: "etcd-0".to_string()
            },
            ClusterMember {
                id: 2,
                name: "etcd-1".to_string()
            },
            ClusterMember {
                id: 3,
                name: "etcd-2".to_string()
            },
        ]
    );
}

#[tokio::test]
async fn falls_through_to_next_endpoint() {
    let closed = closed_addr().await;
    let addr = serve(STATUS, (StatusCode::OK, MEMBERS)).await;
    let session = connector(&[closed, addr]).open().await.unwrap();
    assert_eq!(session.endpoint().port(), addr.port());
}

#[tokio::test]
async fn connect_fails_when_no_endpoint_is_reachable() {
    let closed = closed_addr().await;
    let error = connector(&[closed]).open().await.err().unwrap();
    assert!(matches!(error, Error::Connect { .. }), "{error}");
}

#[tokio::test]
async fn leaderless_status_is_an_error() {
    let addr = serve(r#"{"version":"3.5.9"}"#, (StatusCode::OK, MEMBERS)).await;
    let mut session = connector(&[addr]).connect().await.unwrap();
    let error = session.current_leader().await.unwrap_err();
    assert!(matches!(error.downcast_ref::<Error>(), Some(Error::NoLeader)));
}

#[tokio::test]
async fn error_status_is_an_error() {
    let addr = serve(
        STATUS,
        (StatusCode::SERVICE_UNAVAILABLE, r#"{"error":"etcdserver: no leader"}"#),
    )
    .await;
    let mut session = connector(&[addr]).connect().await.unwrap();
    let error = session.member_list().await.unwrap_err();
    match error {
        Error::Status { path, status, .. } => {
            assert_eq!(path, MEMBER_LIST_PATH);
            assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        }
        error => panic!("unexpected error: {error}"),
    }
}

#[tokio::test]
async fn malformed_body_is_an_error() {
    let addr = serve(STATUS, (StatusCode::OK, "<html>")).await;
    let mut session = connector(&[addr]).connect().await.unwrap();
    assert!(matches!(session.member_list().await, Err(Error::Json(_))));
}

#[tokio::test]
async fn stalled_request_times_out() {
    let addr = stalled().await;
    let endpoint = addr.to_string().parse().unwrap();
    let connector = EtcdConnector::new(
        vec![endpoint],
        Duration::from_secs(1),
        Duration::from_millis(100),
    )
    .unwrap();
    let mut session = connector.open().await.unwrap();
    match session.status().await {
        Err(Error::RequestTimeout(path, timeout)) => {
            assert_eq!(path, STATUS_PATH);
            assert_eq!(timeout, Duration::from_millis(100));
        }
        res => panic!("unexpected result: {:?}", res.map(|s| s.leader)),
    }
}

#[tokio::test]
async fn stalled_leader_lookup_is_denied() {
    let addr = stalled().await;
    let endpoint = addr.to_string().parse().unwrap();
    let connector = EtcdConnector::new(
        vec![endpoint],
        Duration::from_secs(1),
        Duration::from_millis(100),
    )
    .unwrap();
    let verdict = Guard::new(connector, "etcd").decide("etcd-1").await;
    assert!(!verdict.is_allowed());
    assert_eq!(verdict.reason(), &Reason::LeaderUnknown);
}

#[tokio::test]
async fn dial_times_out() {
    // A listener that never accepts drops new SYNs once its accept queue is
    // full, so further connects hang.
    let socket = TcpSocket::new_v4().unwrap();
    socket.bind("127.0.0.1:0".parse().unwrap()).unwrap();
    let listener = socket.listen(1).unwrap();
    let addr = listener.local_addr().unwrap();
    let mut backlog = Vec::new();
    loop {
        match time::timeout(Duration::from_millis(100), TcpStream::connect(addr)).await {
            Ok(io) => backlog.push(io.unwrap()),
            Err(_) => break,
        }
        assert!(backlog.len() < 64, "accept queue never filled");
    }

    let endpoint = addr.to_string().parse().unwrap();
    let dial_timeout = Duration::from_millis(100);
    let connector =
        EtcdConnector::new(vec![endpoint], dial_timeout, Duration::from_secs(1)).unwrap();
    match connector.open().await {
        Err(Error::ConnectTimeout(ep, timeout)) => {
            assert_eq!(ep.port(), addr.port());
            assert_eq!(timeout, dial_timeout);
        }
        res => panic!("unexpected result: {:?}", res.map(|s| s.endpoint().clone())),
    }
}

#[tokio::test]
async fn guards_the_leader() {
    let addr = serve(STATUS, (StatusCode::OK, MEMBERS)).await;
    let guard = Guard::new(connector(&[addr]), "etcd");

    let verdict = guard.decide("etcd-1").await;
    assert!(verdict.is_allowed());
    assert_eq!(verdict.reason(), &Reason::QuorumPreserved);

    let verdict = guard.decide("etcd-0").await;
    assert!(!verdict.is_allowed());
    assert_eq!(verdict.reason(), &Reason::LeaderProtected);
}

#[test]
fn requires_endpoints() {
    assert!(matches!(
        EtcdConnector::new(vec![], Duration::from_secs(1), Duration::from_secs(1)),
        Err(Error::NoEndpoints)
    ));
}
