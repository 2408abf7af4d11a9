use std::{
    sync::{Arc, Mutex},
    time::Duration,
};

use agent_chat_client::HttpBackend;
use agent_chat_core::{
    AgentId, ApiError, CreateSessionRequest, SessionApi, SessionId, StreamChunk, StreamTransport,
};
use axum::{
    Json, Router,
    extract::{Path, State},
    http::{StatusCode, header},
    response::IntoResponse,
    routing::{get, post},
};
use futures::StreamExt;
use serde_json::{Value, json};
use url::Url;

#[derive(Clone, Default)]
struct Recorder {
    calls: Arc<Mutex<Vec<String>>>,
    bodies: Arc<Mutex<Vec<Value>>>,
}

impl Recorder {
    fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

async fn serve(router: Router) -> HttpBackend {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    HttpBackend::new(Url::parse(&format!("http://{addr}")).unwrap()).unwrap()
}

fn request() -> CreateSessionRequest {
    CreateSessionRequest {
        agent_id: AgentId::parse("agent-7").unwrap(),
        title: "new session".to_string(),
    }
}

async fn create_ok(State(rec): State<Recorder>, Json(body): Json<Value>) -> Json<Value> {
    rec.calls.lock().unwrap().push("POST /api/sessions".to_string());
    rec.bodies.lock().unwrap().push(body);
    Json(json!({ "id": "s-42", "title": "new session" }))
}

async fn events(State(rec): State<Recorder>, Path(id): Path<String>) -> Json<Value> {
    rec.calls
        .lock()
        .unwrap()
        .push(format!("GET /api/sessions/{id}/events"));
    Json(json!({
        "data": [
            { "id": "e1", "source": "user", "kind": "message", "data": { "content": "hi" } },
            { "id": "e2", "source": "ai_agent", "kind": "message", "data": { "content": "hello" } }
        ]
    }))
}

#[tokio::test]
async fn test_create_session_posts_agent_and_title() {
    let rec = Recorder::default();
    let backend = serve(
        Router::new()
            .route("/api/sessions", post(create_ok))
            .with_state(rec.clone()),
    )
    .await;

    let id = backend.create_session(&request()).await.unwrap();

    assert_eq!(id, SessionId::parse("s-42"));
    assert_eq!(rec.calls(), vec!["POST /api/sessions"]);
    assert_eq!(
        rec.bodies.lock().unwrap()[0],
        json!({ "agent_id": "agent-7", "title": "new session" })
    );
}

#[tokio::test]
async fn test_create_session_reports_status() {
    let backend = serve(Router::new().route(
        "/api/sessions",
        post(|| async { (StatusCode::SERVICE_UNAVAILABLE, "down") }),
    ))
    .await;

    let err = backend.create_session(&request()).await.unwrap_err();
    assert!(matches!(err, ApiError::Status(503)));
}

#[tokio::test]
async fn test_create_session_tolerates_unparseable_body() {
    let backend = serve(Router::new().route(
        "/api/sessions",
        post(|| async { (StatusCode::CREATED, "<html>oops</html>") }),
    ))
    .await;

    let id = backend.create_session(&request()).await.unwrap();
    assert!(id.is_none());
}

/// Backend pointed at a listener that accepts connections and never answers.
async fn silent_backend() -> HttpBackend {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let mut held = Vec::new();
        while let Ok((socket, _)) = listener.accept().await {
            held.push(socket);
        }
    });
    HttpBackend::new(Url::parse(&format!("http://{addr}")).unwrap())
        .unwrap()
        .with_request_timeout(Duration::from_millis(200))
}

#[tokio::test]
async fn test_create_session_times_out_on_silent_server() {
    let backend = silent_backend().await;

    let result = tokio::time::timeout(Duration::from_secs(3), backend.create_session(&request()))
        .await
        .expect("create_session should give up on its own");

    assert!(matches!(result, Err(ApiError::Transport(_))));
}

#[tokio::test]
async fn test_list_events_times_out_on_silent_server() {
    let backend = silent_backend().await;

    let result = tokio::time::timeout(
        Duration::from_secs(3),
        backend.list_events(&SessionId::parse("abc").unwrap()),
    )
    .await
    .expect("list_events should give up on its own");

    assert!(matches!(result, Err(ApiError::Transport(_))));
}

#[tokio::test]
async fn test_list_events_decodes_session_path() {
    let rec = Recorder::default();
    let backend = serve(
        Router::new()
            .route("/api/sessions/{id}/events", get(events))
            .with_state(rec.clone()),
    )
    .await;

    let log = backend
        .list_events(&SessionId::parse("team/alpha 1").unwrap())
        .await
        .unwrap();

    assert_eq!(rec.calls(), vec!["GET /api/sessions/team/alpha 1/events"]);
    let ids: Vec<_> = log.iter().map(|e| e.id.as_str()).collect();
    assert_eq!(ids, vec!["e1", "e2"]);
}

#[tokio::test]
async fn test_list_events_without_array_is_empty() {
    let backend = serve(Router::new().route(
        "/api/sessions/{id}/events",
        get(|| async { Json(json!({ "data": "nope" })) }),
    ))
    .await;

    let log = backend
        .list_events(&SessionId::parse("abc").unwrap())
        .await
        .unwrap();
    assert!(log.is_empty());
}

#[tokio::test]
async fn test_list_events_error_status() {
    let backend = serve(Router::new()).await;

    let err = backend
        .list_events(&SessionId::parse("abc").unwrap())
        .await
        .unwrap_err();
    assert!(matches!(err, ApiError::Status(404)));
}

const SSE_BODY: &str = concat!(
    "event: event\n",
    "data: {\"id\":\"u1\",\"source\":\"user\",\"kind\":\"message\",\"data\":{\"content\":\"hello\"}}\n\n",
    "event: status\n",
    "data: {\"status\":\"processing\",\"detail\":\"thinking\"}\n\n",
    "event: chunk\n",
    "data: {\"event_id\":\"a1\",\"patches\":[{\"op\":\"add\",\"path\":\"/content\",\"value\":[\"hi\"]}]}\n\n",
    "event: done\n",
    "data: {}\n\n",
);

#[tokio::test]
async fn test_open_stream_yields_chunks() {
    let rec = Recorder::default();
    let backend = serve(
        Router::new()
            .route(
                "/api/sessions/{id}/events/stream",
                post(
                    |State(rec): State<Recorder>,
                     Path(id): Path<String>,
                     Json(body): Json<Value>| async move {
                        rec.calls.lock().unwrap().push(format!("STREAM {id}"));
                        rec.bodies.lock().unwrap().push(body);
                        ([(header::CONTENT_TYPE, "text/event-stream")], SSE_BODY).into_response()
                    },
                ),
            )
            .with_state(rec.clone()),
    )
    .await;

    let chunks: Vec<_> = backend
        .open(&SessionId::parse("s-1").unwrap(), "hello")
        .await
        .unwrap()
        .collect()
        .await;

    assert_eq!(rec.calls(), vec!["STREAM s-1"]);
    assert_eq!(
        rec.bodies.lock().unwrap()[0],
        json!({ "kind": "message", "source": "user", "content": "hello" })
    );
    assert_eq!(chunks.len(), 4);
    assert!(matches!(&chunks[0], Ok(StreamChunk::Event(e)) if e.id == "u1"));
    assert!(matches!(&chunks[1], Ok(StreamChunk::Status { status, .. }) if status == "processing"));
    assert!(matches!(&chunks[2], Ok(StreamChunk::Patch(p)) if p.event_id == "a1"));
    assert!(matches!(&chunks[3], Ok(StreamChunk::Done)));
}
