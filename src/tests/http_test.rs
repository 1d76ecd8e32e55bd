//! HTTP surface tests: the real router driven end to end with a scripted
//! gateway, pinning the wire format.

use axum::body::Body;
use axum::http::{Request, StatusCode, header};
use axum::{
    Router,
    routing::{get, post},
};
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceExt;

use super::common::{ScriptedGateway, sample_log};
use crate::config::Config;
use crate::services::agent::{AgentController, AgentLimits};
use crate::services::llm::ChatGateway;
use crate::services::safety::SafetyGate;
use crate::services::{DocIndex, SessionRegistry};
use crate::{AppState, handlers};

struct TestApp {
    router: Router,
    gateway: Arc<ScriptedGateway>,
    _cache_dir: tempfile::TempDir,
}

async fn test_app() -> TestApp {
    let cache_dir = tempfile::tempdir().expect("tempdir");
    let gateway = Arc::new(ScriptedGateway::new());
    let dyn_gateway: Arc<dyn ChatGateway> = gateway.clone();

    let mut config = Config::default();
    config.docs.cache_dir = cache_dir.path().display().to_string();
    config.docs.sources = Vec::new();

    let doc_index = Arc::new(DocIndex::new(dyn_gateway.clone(), &config.docs));
    doc_index.init().await;

    let registry = Arc::new(SessionRegistry::new(
        config.session.ttl_seconds,
        config.session.history_limit,
    ));
    let safety = SafetyGate::new(dyn_gateway.clone(), "parser-model");
    let agent = Arc::new(AgentController::new(
        dyn_gateway,
        safety,
        Arc::clone(&doc_index),
        "chat-model",
        AgentLimits {
            max_tool_hops: 4,
            max_answer_retries: 2,
            max_query_retries: 1,
            turn_deadline: Duration::from_secs(5),
        },
    ));

    let state = Arc::new(AppState {
        config: Arc::new(config),
        registry,
        doc_index,
        agent,
    });

    let router = Router::new()
        .route("/chatbot/init", post(handlers::chatbot::init_session))
        .route("/chatbot/chat", post(handlers::chatbot::chat))
        .route("/chatbot/sessions/stats", get(handlers::chatbot::session_stats))
        .route("/chatbot/sessions/:id/validate", get(handlers::chatbot::validate_session))
        .route("/chatbot/sessions/:id/schema", get(handlers::chatbot::get_schema))
        .route("/chatbot/sessions/:id/query", post(handlers::chatbot::run_query))
        .route(
            "/chatbot/sessions/:id/validation-history",
            get(handlers::chatbot::validation_history),
        )
        .route("/chatbot/docs/status", get(handlers::docs::docs_status))
        .with_state(state);

    TestApp { router, gateway, _cache_dir: cache_dir }
}

async fn send(
    router: &Router,
    method: &str,
    uri: &str,
    body: Option<serde_json::Value>,
) -> (StatusCode, serde_json::Value) {
    let request = match body {
        Some(json) => Request::builder()
            .method(method)
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(serde_json::to_vec(&json).expect("body")))
            .expect("request"),
        None => Request::builder()
            .method(method)
            .uri(uri)
            .body(Body::empty())
            .expect("request"),
    };

    let response = router.clone().oneshot(request).await.expect("response");
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("body bytes");
    let value = if bytes.is_empty() {
        serde_json::Value::Null
    } else {
        serde_json::from_slice(&bytes).expect("json body")
    };
    (status, value)
}

async fn init_session(app: &TestApp) -> String {
    let (status, body) = send(
        &app.router,
        "POST",
        "/chatbot/init",
        Some(serde_json::json!({ "logData": sample_log() })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    body["sessionId"].as_str().expect("sessionId").to_string()
}

#[tokio::test]
async fn test_init_and_schema() {
    let app = test_app().await;
    let session_id = init_session(&app).await;

    let (status, body) =
        send(&app.router, "GET", &format!("/chatbot/sessions/{}/schema", session_id), None).await;
    assert_eq!(status, StatusCode::OK);

    let att = &body["schema"]["ATT"];
    assert_eq!(att["table"], serde_json::json!("att_data"));
    let columns = att["columns"].as_array().expect("columns");
    let names: Vec<&str> = columns.iter().filter_map(|c| c["name"].as_str()).collect();
    for expected in ["time_boot_ms", "Roll", "Pitch"] {
        assert!(names.contains(&expected), "missing {}", expected);
    }
    assert!(columns.iter().all(|c| c["type"] == serde_json::json!("real")));

    let tables = body["availableTables"].as_array().expect("tables");
    assert!(tables.contains(&serde_json::json!("att_data")));
    assert!(tables.contains(&serde_json::json!("gps_0_data")));
}

#[tokio::test]
async fn test_init_rejects_non_object_log() {
    let app = test_app().await;
    let (status, body) = send(
        &app.router,
        "POST",
        "/chatbot/init",
        Some(serde_json::json!({ "logData": [1, 2, 3] })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].as_str().is_some());
}

#[tokio::test]
async fn test_session_validation_endpoint() {
    let app = test_app().await;
    let session_id = init_session(&app).await;

    let (status, body) =
        send(&app.router, "GET", &format!("/chatbot/sessions/{}/validate", session_id), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["valid"], serde_json::json!(true));

    let (status, body) =
        send(&app.router, "GET", "/chatbot/sessions/not-a-session/validate", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["valid"], serde_json::json!(false));
}

#[tokio::test]
async fn test_debug_query_endpoint() {
    let app = test_app().await;
    let session_id = init_session(&app).await;

    let (status, body) = send(
        &app.router,
        "POST",
        &format!("/chatbot/sessions/{}/query", session_id),
        Some(serde_json::json!({ "sql": "SELECT MAX(Alt) FROM gps_0_data" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["rows"][0][0], serde_json::json!(1448.0));
    assert_eq!(body["rowCount"], serde_json::json!(1));

    let (status, _) = send(
        &app.router,
        "POST",
        &format!("/chatbot/sessions/{}/query", session_id),
        Some(serde_json::json!({ "sql": "DROP TABLE gps_0_data" })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_chat_turn_over_http() {
    let app = test_app().await;
    let session_id = init_session(&app).await;

    app.gateway.push_tool_call(
        "call_1",
        "queryData",
        r#"{"sql": "SELECT MAX(Alt) FROM gps_0_data"}"#,
    );
    app.gateway.push_text(
        "ANSWER: The maximum altitude was 1448 meters.\n\
         DATA SOURCE: `SELECT MAX(Alt) FROM gps_0_data`",
    );

    let (status, body) = send(
        &app.router,
        "POST",
        "/chatbot/chat",
        Some(serde_json::json!({
            "message": "What is the maximum altitude?",
            "sessionId": session_id
        })),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    let response = body["response"].as_str().expect("response");
    assert!(response.starts_with("ANSWER:"));
    assert!(response.contains("1448"));

    let validation = &body["queryValidation"];
    assert!(validation["totalQueries"].as_u64().expect("totalQueries") >= 1);
    assert_eq!(validation["queriesWithDiscrepancies"], serde_json::json!(0));

    assert!(body["dataSchema"]["ATT"].is_object());
    assert!(body["availableTables"].as_array().is_some());
    assert!(body["thinking"].as_array().is_some());
    assert!(body["timestamp"].as_str().is_some());
}

#[tokio::test]
async fn test_chat_unknown_session_is_404() {
    let app = test_app().await;
    let (status, _) = send(
        &app.router,
        "POST",
        "/chatbot/chat",
        Some(serde_json::json!({ "message": "hello", "sessionId": "gone" })),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_validation_history_and_stats() {
    let app = test_app().await;
    let session_id = init_session(&app).await;

    app.gateway.push_text(
        "ANSWER: There are 3 attitude samples.\nDATA SOURCE: `SELECT COUNT(*) FROM att_data`",
    );
    let (status, _) = send(
        &app.router,
        "POST",
        "/chatbot/chat",
        Some(serde_json::json!({ "message": "how many samples?", "sessionId": session_id })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = send(
        &app.router,
        "GET",
        &format!("/chatbot/sessions/{}/validation-history", session_id),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["history"].as_array().expect("history").len(), 1);

    let (status, body) = send(&app.router, "GET", "/chatbot/sessions/stats", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["activeSessions"], serde_json::json!(1));
    assert_eq!(body["totalMessages"], serde_json::json!(1));
}

#[tokio::test]
async fn test_docs_status_endpoint() {
    let app = test_app().await;
    let (status, body) = send(&app.router, "GET", "/chatbot/docs/status", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["ready"], serde_json::json!(true));
    assert!(body["chunkCount"].as_u64().expect("chunkCount") > 0);
    assert_eq!(body["fallbackActive"], serde_json::json!(true));
}
