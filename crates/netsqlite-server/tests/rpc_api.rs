use axum::{
    body::Body,
    http::{Request, StatusCode},
    Router,
};
use netsqlite_db::{DbRuntimeSettings, PoolManager};
use netsqlite_server::{app, auth::TokenValidator, AppState};
use netsqlite_types::rpc::{ExecResponse, PingResponse, QueryMessage};
use netsqlite_types::{Code, RpcStatus, SqlValue};
use serde_json::{json, Value};
use std::sync::Arc;
use tower::ServiceExt;

const TOKEN: &str = "tok-test-1";

fn setup() -> (tempfile::TempDir, Arc<PoolManager>, Router) {
    let dir = tempfile::tempdir().expect("failed to create temp dir");
    let manager = Arc::new(
        PoolManager::new(dir.path(), DbRuntimeSettings::default()).expect("manager"),
    );
    let state = AppState {
        manager: Arc::clone(&manager),
        validator: Arc::new(TokenValidator::new([TOKEN])),
    };
    (dir, manager, app(state))
}

fn rpc(path: &str, token: Option<&str>, database: Option<&str>, body: Value) -> Request<Body> {
    let mut builder = Request::builder()
        .method("POST")
        .uri(path)
        .header("content-type", "application/json");
    if let Some(token) = token {
        builder = builder.header("authorization", format!("Bearer {token}"));
    }
    if let Some(database) = database {
        builder = builder.header("x-database-name", database);
    }
    builder.body(Body::from(body.to_string())).unwrap()
}

async fn body_bytes(response: axum::response::Response) -> Vec<u8> {
    axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap()
        .to_vec()
}

async fn error_status(response: axum::response::Response) -> RpcStatus {
    serde_json::from_slice(&body_bytes(response).await).expect("error body should be RpcStatus")
}

fn query_lines(bytes: &[u8]) -> Vec<QueryMessage> {
    bytes
        .split(|b| *b == b'\n')
        .filter(|line| !line.is_empty())
        .map(|line| serde_json::from_slice(line).unwrap())
        .collect()
}

async fn exec(router: &Router, sql: &str, args: Value) -> axum::response::Response {
    router
        .clone()
        .oneshot(rpc(
            "/v1/exec",
            Some(TOKEN),
            Some("app.db"),
            json!({"database_name": "app.db", "sql": sql, "args": args}),
        ))
        .await
        .unwrap()
}

#[tokio::test]
async fn health_is_public() {
    let (_dir, _manager, router) = setup();
    let response = router
        .oneshot(
            Request::builder()
                .uri("/health")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let json: Value = serde_json::from_slice(&body_bytes(response).await).unwrap();
    assert_eq!(json["status"], "ok");
}

#[tokio::test]
async fn missing_authorization_is_unauthenticated() {
    let (_dir, manager, router) = setup();
    let response = router
        .oneshot(rpc(
            "/v1/ping",
            None,
            Some("app.db"),
            json!({"database_name": "app.db"}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(error_status(response).await.code, Code::Unauthenticated);
    assert!(manager.is_empty(), "no pool may be created before auth");
}

#[tokio::test]
async fn invalid_token_is_unauthenticated_on_every_route() {
    let (_dir, manager, router) = setup();
    for path in ["/v1/ping", "/v1/exec", "/v1/query"] {
        let response = router
            .clone()
            .oneshot(rpc(
                path,
                Some("wrong-token"),
                Some("app.db"),
                json!({"database_name": "app.db", "sql": "SELECT 1"}),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED, "{path}");
    }
    assert!(manager.is_empty());
}

#[tokio::test]
async fn missing_database_header_is_invalid_argument() {
    let (_dir, _manager, router) = setup();
    let response = router
        .oneshot(rpc(
            "/v1/ping",
            Some(TOKEN),
            None,
            json!({"database_name": "app.db"}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(error_status(response).await.code, Code::InvalidArgument);
}

#[tokio::test]
async fn ping_names_the_database() {
    let (dir, manager, router) = setup();
    let response = router
        .oneshot(rpc(
            "/v1/ping",
            Some(TOKEN),
            Some("app.db"),
            json!({"database_name": "app.db"}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let pong: PingResponse = serde_json::from_slice(&body_bytes(response).await).unwrap();
    assert_eq!(pong.message, "PONG for db app.db");
    assert_eq!(manager.len(), 1);
    assert!(dir.path().join("app.db").exists());
}

#[tokio::test]
async fn empty_or_escaping_database_name_is_invalid_argument() {
    let (_dir, manager, router) = setup();
    for name in ["", "../outside.db"] {
        let response = router
            .clone()
            .oneshot(rpc(
                "/v1/ping",
                Some(TOKEN),
                Some("app.db"),
                json!({ "database_name": name }),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST, "{name:?}");
    }
    assert!(manager.is_empty());
}

#[tokio::test]
async fn exec_then_query_round_trip() {
    let (_dir, _manager, router) = setup();

    let response = exec(&router, "CREATE TABLE t (id TEXT PRIMARY KEY, v TEXT)", json!([])).await;
    assert_eq!(response.status(), StatusCode::OK);

    let response = exec(
        &router,
        "INSERT INTO t (id, v) VALUES (?, ?)",
        json!([{"type": "text", "value": "k1"}, {"type": "text", "value": "v1"}]),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);
    let result: ExecResponse = serde_json::from_slice(&body_bytes(response).await).unwrap();
    assert_eq!(result.rows_affected, 1);

    let response = router
        .oneshot(rpc(
            "/v1/query",
            Some(TOKEN),
            Some("app.db"),
            json!({"database_name": "app.db", "sql": "SELECT id, v FROM t"}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers()["content-type"],
        "application/x-ndjson"
    );

    let lines = query_lines(&body_bytes(response).await);
    assert_eq!(
        lines,
        vec![
            QueryMessage::Columns {
                names: vec!["id".into(), "v".into()]
            },
            QueryMessage::Row {
                values: vec![SqlValue::Text("k1".into()), SqlValue::Text("v1".into())]
            },
        ]
    );
}

#[tokio::test]
async fn exec_failure_is_internal() {
    let (_dir, _manager, router) = setup();
    let response = exec(&router, "INSERT INTO missing VALUES (1)", json!([])).await;
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    let status = error_status(response).await;
    assert_eq!(status.code, Code::Internal);
    assert!(!status.message.contains(TOKEN));

    // The database stays usable after a per-call failure.
    let response = exec(&router, "CREATE TABLE ok (x)", json!([])).await;
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn query_failure_before_stream_is_an_error_status() {
    let (_dir, _manager, router) = setup();
    let response = router
        .oneshot(rpc(
            "/v1/query",
            Some(TOKEN),
            Some("app.db"),
            json!({"database_name": "app.db", "sql": "SELECT * FROM nowhere"}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(error_status(response).await.code, Code::Internal);
}

#[tokio::test]
async fn query_with_wrong_argument_count_is_an_error_status() {
    let (_dir, _manager, router) = setup();
    let response = exec(&router, "CREATE TABLE t (id INTEGER)", json!([])).await;
    assert_eq!(response.status(), StatusCode::OK);

    let response = router
        .oneshot(rpc(
            "/v1/query",
            Some(TOKEN),
            Some("app.db"),
            json!({
                "database_name": "app.db",
                "sql": "SELECT id FROM t WHERE id = ?",
                "args": [{"type": "integer", "value": 1}, {"type": "integer", "value": 2}]
            }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(error_status(response).await.code, Code::Internal);
}

#[tokio::test]
async fn query_rows_match_column_count() {
    let (_dir, _manager, router) = setup();
    let response = router
        .oneshot(rpc(
            "/v1/query",
            Some(TOKEN),
            Some("app.db"),
            json!({
                "database_name": "app.db",
                "sql": "WITH RECURSIVE n(i) AS (SELECT 1 UNION ALL SELECT i + 1 FROM n WHERE i < 500) SELECT i, i * 2, 'x' FROM n",
            }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let lines = query_lines(&body_bytes(response).await);
    let QueryMessage::Columns { names } = &lines[0] else {
        panic!("first message must be columns, got {:?}", lines[0]);
    };
    assert_eq!(names.len(), 3);
    assert_eq!(lines.len(), 501);
    for line in &lines[1..] {
        match line {
            QueryMessage::Row { values } => assert_eq!(values.len(), names.len()),
            other => panic!("unexpected message {other:?}"),
        }
    }
}

#[tokio::test]
async fn query_error_mid_stream_is_final_line() {
    let (_dir, _manager, router) = setup();
    exec(&router, "CREATE TABLE t (v TEXT)", json!([])).await;
    exec(&router, "INSERT INTO t VALUES ('ok'), (CAST(x'ff' AS TEXT))", json!([])).await;

    let response = router
        .oneshot(rpc(
            "/v1/query",
            Some(TOKEN),
            Some("app.db"),
            json!({"database_name": "app.db", "sql": "SELECT v FROM t ORDER BY rowid"}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let lines = query_lines(&body_bytes(response).await);
    assert_eq!(lines.len(), 3);
    assert!(matches!(lines[0], QueryMessage::Columns { .. }));
    assert!(matches!(lines[1], QueryMessage::Row { .. }));
    match &lines[2] {
        QueryMessage::Error { status } => assert_eq!(status.code, Code::Internal),
        other => panic!("expected error line, got {other:?}"),
    }
}
