//! Session establishment against an in-process signaling service: host and client
//! flows end to end over loopback QUIC, plus the permanent-stop behavior on 404.

use std::{cell::RefCell, collections::HashMap, rc::Rc, time::Duration};

use bytes::Bytes;
use serde_json::{json, Value};
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::{TcpListener, TcpStream},
};

use burrow::session::{
    establish::{establish_client, establish_host},
    signaling::{SignalKind, SignalingClient, SignalingError},
    state::{ConnectionStatus, StateMachine},
    SessionError,
};

mod common;

struct SessionRecord {
    host: String,
    client: Option<String>,
    offer: Option<Value>,
    answer: Option<Value>,
}

#[derive(Default)]
struct StubState {
    counter: u32,
    sessions: HashMap<String, SessionRecord>,
}

/// A tiny in-process stand-in for the signaling service, speaking just enough of
/// its HTTP contract for the establishment flows. Polls are answered immediately
/// rather than held open; the client's retry loop doesn't care.
struct SignalingStub {
    server: String,
    state: Rc<RefCell<StubState>>,
}

impl SignalingStub {
    async fn spawn() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let server = format!("127.0.0.1:{}", listener.local_addr().unwrap().port());
        let state = Rc::new(RefCell::new(StubState::default()));

        let accept_state = Rc::clone(&state);
        tokio::task::spawn_local(async move {
            loop {
                let (stream, _) = match listener.accept().await {
                    Ok(accepted) => accepted,
                    Err(_) => return,
                };

                let state = Rc::clone(&accept_state);
                tokio::task::spawn_local(async move {
                    handle_request(stream, state).await;
                });
            }
        });

        Self { server, state }
    }

    /// Waits until some session exists, returning its id.
    async fn wait_for_session(&self) -> String {
        loop {
            if let Some(id) = self.state.borrow().sessions.keys().next() {
                return id.clone();
            }

            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }
}

async fn handle_request(mut stream: TcpStream, state: Rc<RefCell<StubState>>) {
    let mut buf = Vec::new();
    let mut tmp = [0u8; 4096];

    let header_end = loop {
        match stream.read(&mut tmp).await {
            Ok(0) | Err(_) => return,
            Ok(count) => buf.extend_from_slice(&tmp[..count]),
        }

        if let Some(position) = buf.windows(4).position(|window| window == b"\r\n\r\n") {
            break position;
        }
    };

    let head = String::from_utf8_lossy(&buf[..header_end]).to_string();
    let content_length = head
        .lines()
        .find_map(|line| line.to_ascii_lowercase().strip_prefix("content-length:").map(|v| v.trim().to_string()))
        .and_then(|v| v.parse::<usize>().ok())
        .unwrap_or(0);

    while buf.len() < header_end + 4 + content_length {
        match stream.read(&mut tmp).await {
            Ok(0) | Err(_) => return,
            Ok(count) => buf.extend_from_slice(&tmp[..count]),
        }
    }
    let body = &buf[header_end + 4..header_end + 4 + content_length];

    let mut request_line = head.lines().next().unwrap_or("").split_whitespace();
    let method = request_line.next().unwrap_or("");
    let target = request_line.next().unwrap_or("");
    let (path, query) = target.split_once('?').unwrap_or((target, ""));
    let segments: Vec<&str> = path.trim_matches('/').split('/').collect();

    let (status, response_body) = route(method, &segments, query, body, &state);

    let body_text = response_body.map(|value| value.to_string()).unwrap_or_default();
    let reason = match status {
        200 => "OK",
        404 => "Not Found",
        _ => "Error",
    };
    let response = format!(
        "HTTP/1.1 {status} {reason}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body_text}",
        body_text.len()
    );

    let _ = stream.write_all(response.as_bytes()).await;
    let _ = stream.shutdown().await;
}

fn route(method: &str, segments: &[&str], query: &str, body: &[u8], state: &Rc<RefCell<StubState>>) -> (u16, Option<Value>) {
    let parsed_body: Value = serde_json::from_slice(body).unwrap_or(Value::Null);
    let mut state = state.borrow_mut();

    match (method, segments) {
        ("POST", ["session"]) => {
            state.counter += 1;
            let id = format!("s{}", state.counter);
            let record = SessionRecord {
                host: parsed_body["host"].as_str().unwrap_or("?").to_string(),
                client: None,
                offer: None,
                answer: None,
            };
            let response = session_json(&id, &record);
            state.sessions.insert(id, record);
            (200, Some(response))
        }
        ("POST", ["session", id]) => match state.sessions.get_mut(*id) {
            None => (404, None),
            Some(record) => {
                record.client = Some(parsed_body["client"].as_str().unwrap_or("?").to_string());
                (200, Some(session_json(id, record)))
            }
        },
        ("GET", ["session", id]) => match state.sessions.get(*id) {
            None => (404, None),
            Some(record) => (200, Some(session_json(id, record))),
        },
        ("POST", ["session", id, "signal"]) => match state.sessions.get_mut(*id) {
            None => (404, None),
            Some(record) => {
                match parsed_body["type"].as_str() {
                    Some("offer") => record.offer = Some(parsed_body.clone()),
                    Some("answer") => record.answer = Some(parsed_body.clone()),
                    _ => return (400, None),
                }
                (200, Some(json!({ "ok": true })))
            }
        },
        ("GET", ["session", id, "signal"]) => match state.sessions.get(*id) {
            None => (404, None),
            Some(record) => {
                let blob = match query.strip_prefix("type=") {
                    Some("offer") => &record.offer,
                    Some("answer") => &record.answer,
                    _ => &None,
                };
                match blob {
                    Some(blob) => (200, Some(blob.clone())),
                    None => (200, None),
                }
            }
        },
        _ => (404, None),
    }
}

fn session_json(id: &str, record: &SessionRecord) -> Value {
    json!({
        "id": id,
        "host": record.host,
        "client": record.client,
        "status": if record.client.is_some() { "joined" } else { "created" },
        "createdAt": 1u64,
        "signal": { "offer": record.offer, "answer": record.answer },
    })
}

#[test]
fn test_host_and_client_establish_and_exchange_messages() {
    common::run_local(async {
        let stub = SignalingStub::spawn().await;

        let host_state = StateMachine::new();
        let client_state = StateMachine::new();

        let host_task = {
            let state = Rc::clone(&host_state);
            let signaling = SignalingClient::new(stub.server.clone());
            tokio::task::spawn_local(async move { establish_host(&state, &signaling, "ada").await })
        };

        let session_id = stub.wait_for_session().await;

        let client_task = {
            let state = Rc::clone(&client_state);
            let signaling = SignalingClient::new(stub.server.clone());
            tokio::task::spawn_local(async move { establish_client(&state, &signaling, "grace", &session_id).await })
        };

        let host_peer = host_task.await.unwrap().expect("Host establishment failed");
        let client_peer = client_task.await.unwrap().expect("Client establishment failed");

        assert_eq!(host_state.status(), ConnectionStatus::Connected);
        assert_eq!(client_state.status(), ConnectionStatus::Connected);
        assert_eq!(host_peer.session.host, "ada");
        assert_eq!(client_peer.session.host, "ada");

        // The channel is live: messages cross in both directions.
        let (host_tx, mut host_rx) = host_peer.channel;
        let (client_tx, mut client_rx) = client_peer.channel;

        host_tx.send(Bytes::from_static(b"from-host")).unwrap();
        assert_eq!(client_rx.recv().await.unwrap(), Bytes::from_static(b"from-host"));

        client_tx.send(Bytes::from_static(b"from-client")).unwrap();
        assert_eq!(host_rx.recv().await.unwrap(), Bytes::from_static(b"from-client"));

        host_peer.connection.close(0u32.into(), b"done");
        client_peer.connection.close(0u32.into(), b"done");
    });
}

#[test]
fn test_polling_stops_permanently_on_gone_session() {
    common::run_local(async {
        let stub = SignalingStub::spawn().await;
        let signaling = SignalingClient::new(stub.server.clone());

        match signaling.poll_session("missing").await {
            Err(SignalingError::Gone) => {}
            other => panic!("Expected the session to be gone, got {other:?}"),
        }

        match signaling.poll_signal("missing", SignalKind::Offer).await {
            Err(SignalingError::Gone) => {}
            other => panic!("Expected the signal to be gone, got {other:?}"),
        }

        // A whole client attempt against a gone session fails rather than retrying.
        let state = StateMachine::new();
        let result = establish_client(&state, &signaling, "grace", "missing").await;
        match result {
            Err(SessionError::Signaling(SignalingError::Gone)) => {}
            Err(other) => panic!("Expected a gone session, got {other}"),
            Ok(_) => panic!("Establishment against a missing session can't succeed"),
        }
        assert_eq!(state.status(), ConnectionStatus::Failed);
    });
}

#[test]
fn test_abort_while_waiting_unwinds_to_failed() {
    common::run_local(async {
        let stub = SignalingStub::spawn().await;
        let state = StateMachine::new();

        let host_task = {
            let state = Rc::clone(&state);
            let signaling = SignalingClient::new(stub.server.clone());
            tokio::task::spawn_local(async move { establish_host(&state, &signaling, "ada").await })
        };

        // The host is now polling for a peer that will never join.
        stub.wait_for_session().await;
        state.request_abort();

        match host_task.await.unwrap() {
            Err(SessionError::Aborted) => {}
            Err(other) => panic!("Expected an aborted attempt, got {other}"),
            Ok(_) => panic!("An aborted attempt can't connect"),
        }
        assert_eq!(state.status(), ConnectionStatus::Failed);
    });
}
