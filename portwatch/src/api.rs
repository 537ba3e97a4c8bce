use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use portwatch_core::{Error, FailureKind, SeriesPoint};
use reconcile::{ReconciliationResult, Reconciler};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::net::IpAddr;
use tokio_util::sync::CancellationToken;
use tracing::{error, warn};

#[derive(Clone)]
pub struct AppState {
    pub reconciler: Reconciler,
    /// Fired on shutdown; in-flight probes are aborted.
    pub shutdown: CancellationToken,
}

#[derive(Debug, Deserialize)]
struct ScanRequest {
    #[serde(alias = "ips_or_hostnames")]
    targets: Vec<String>,
}

#[derive(Serialize)]
pub struct ScanResponse<'a> {
    #[serde(flatten)]
    pub result: &'a ReconciliationResult,
    pub historical_scan_data: BTreeMap<IpAddr, BTreeMap<u16, Vec<SeriesPoint>>>,
}

impl<'a> ScanResponse<'a> {
    pub fn new(result: &'a ReconciliationResult) -> Self {
        ScanResponse { result, historical_scan_data: result.historical_scan_data() }
    }
}

#[derive(Serialize)]
struct ApiError {
    error: String,
    kind: FailureKind,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/scan", post(scan))
        .with_state(state)
}

async fn health() -> &'static str {
    "ok"
}

async fn scan(State(state): State<AppState>, body: Result<Json<ScanRequest>, JsonRejection>) -> Response {
    let Json(req) = match body {
        Ok(b) => b,
        Err(e) => {
            warn!(error = %e, "rejected scan request body");
            return json_error(StatusCode::BAD_REQUEST, e.body_text(), FailureKind::Validation);
        }
    };
    let targets = match reconcile::parse_targets(&req.targets) {
        Ok(t) => t,
        Err(e) => return error_response(&e),
    };
    match state.reconciler.reconcile(targets, state.shutdown.child_token()).await {
        Ok(result) => (StatusCode::OK, Json(ScanResponse::new(&result))).into_response(),
        Err(e) => error_response(&e),
    }
}

fn error_response(e: &Error) -> Response {
    let kind = e.kind();
    let status = match kind {
        FailureKind::Validation => StatusCode::BAD_REQUEST,
        _ => {
            error!(error = %e, "scan request failed");
            StatusCode::INTERNAL_SERVER_ERROR
        }
    };
    json_error(status, e.public_message(), kind)
}

fn json_error(status: StatusCode, message: impl Into<String>, kind: FailureKind) -> Response {
    (status, Json(ApiError { error: message.into(), kind })).into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use axum::body::{self, Body};
    use axum::http::Request;
    use history_sqlite::SqliteHistory;
    use portwatch_core::{Host, PortStatus, ProbeError, ScanTarget, Snapshot};
    use probe::Prober;
    use reconcile::ReconcileOptions;
    use std::sync::Arc;
    use std::time::Duration;
    use tempfile::TempDir;
    use time::OffsetDateTime;
    use tower::ServiceExt; // for `oneshot`

    /// Every hostname except `down.lan` resolves to 192.0.2.10 with 22 and 80 open.
    struct StaticProber;

    #[async_trait]
    impl Prober for StaticProber {
        async fn observe(&self, target: &ScanTarget) -> portwatch_core::Result<Snapshot> {
            if target.to_string() == "down.lan" {
                return Err(ProbeError::Exit { status: "exit status: 1".into(), stderr: String::new() }.into());
            }
            let ip: IpAddr = "192.0.2.10".parse().unwrap();
            Ok(Snapshot::new(Host::new(ip).with_hostname(target.to_string()), OffsetDateTime::now_utc())
                .with_port(22, PortStatus::Open)
                .with_port(80, PortStatus::Open))
        }
    }

    fn app() -> (TempDir, Router) {
        let dir = tempfile::tempdir().unwrap();
        let store = SqliteHistory::open_or_create(dir.path().join("api.db"), Duration::from_secs(5)).unwrap();
        let reconciler = Reconciler::new(Arc::new(store), Arc::new(StaticProber), ReconcileOptions::default());
        let state = AppState { reconciler, shutdown: CancellationToken::new() };
        (dir, router(state))
    }

    fn post_scan(body: &str) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri("/scan")
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    async fn json_body(resp: Response) -> serde_json::Value {
        let bytes = body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn health_is_ok() {
        let (_d, app) = app();
        let resp = app
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let bytes = body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        assert_eq!(&bytes[..], b"ok");
    }

    #[tokio::test]
    async fn empty_target_list_is_a_bad_request() {
        let (_d, app) = app();
        let resp = app.oneshot(post_scan(r#"{"targets": []}"#)).await.unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        assert_eq!(json_body(resp).await["kind"], "validation");
    }

    #[tokio::test]
    async fn malformed_body_is_a_bad_request() {
        let (_d, app) = app();
        let resp = app.clone().oneshot(post_scan("{not json")).await.unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        let resp = app.oneshot(post_scan(r#"{"targets": ["bad host!"]}"#)).await.unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn scan_reports_changes_and_history() {
        let (_d, app) = app();
        let resp = app
            .clone()
            .oneshot(post_scan(r#"{"ips_or_hostnames": ["web.lan", "down.lan"]}"#))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let v = json_body(resp).await;
        assert!(v["run_id"].is_string());
        assert_eq!(v["targets"][0]["target"], "web.lan");
        assert_eq!(v["targets"][0]["first_seen"], true);
        assert_eq!(v["targets"][0]["changes"]["80"], "added");
        assert_eq!(v["targets"][1]["status"], "failed");
        assert_eq!(v["targets"][1]["kind"], "unreachable");
        assert_eq!(v["historical_scan_data"]["192.0.2.10"]["22"].as_array().unwrap().len(), 1);

        let resp = app.oneshot(post_scan(r#"{"targets": ["web.lan"]}"#)).await.unwrap();
        let v = json_body(resp).await;
        assert_eq!(v["targets"][0]["first_seen"], false);
        assert!(v["targets"][0]["changes"].as_object().unwrap().is_empty());
        assert_eq!(v["historical_scan_data"]["192.0.2.10"]["22"].as_array().unwrap().len(), 2);
    }
}
