//! Web服务器

use crate::handlers::{self, AppState};
use axum::{
    routing::{get, post, put},
    Router,
};
use std::future::Future;
use std::net::SocketAddr;
use std::time::Duration;
use tower::ServiceBuilder;
use tower_http::{
    cors::{Any, CorsLayer},
    timeout::TimeoutLayer,
    trace::TraceLayer,
};
use tracing::info;

/// 服务器选项
#[derive(Debug, Clone)]
pub struct ServerOptions {
    pub request_timeout: Duration,
    pub enable_cors: bool,
}

impl Default for ServerOptions {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(30),
            enable_cors: true,
        }
    }
}

pub struct WebServer {
    addr: SocketAddr,
    app: Router,
}

impl WebServer {
    pub fn new(addr: SocketAddr, state: AppState, options: ServerOptions) -> Self {
        let app = create_app(state, &options);
        Self { addr, app }
    }

    /// 运行直到 `shutdown` 完成，处理中的请求会先结束
    pub async fn run<F>(self, shutdown: F) -> anyhow::Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        info!("Starting web server on {}", self.addr);

        let listener = tokio::net::TcpListener::bind(self.addr).await?;
        axum::serve(listener, self.app)
            .with_graceful_shutdown(shutdown)
            .await
            .map_err(|e| anyhow::anyhow!("Web server error: {}", e))?;

        info!("Web server stopped");
        Ok(())
    }
}

/// 构建完整路由
pub fn create_app(state: AppState, options: &ServerOptions) -> Router {
    let app = Router::new()
        .route("/", get(handlers::api_root))
        .route("/health", get(handlers::health))
        .route("/metrics", get(handlers::metrics))
        .nest("/api/v1", api_routes())
        .with_state(state)
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(TimeoutLayer::new(options.request_timeout)),
        );

    if options.enable_cors {
        app.layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
    } else {
        app
    }
}

/// API v1 路由
fn api_routes() -> Router<AppState> {
    Router::new()
        .route("/", get(handlers::api_root))
        .route("/cycles", post(handlers::start_cycle))
        .route("/patients/:patient_id/cycles", get(handlers::list_patient_cycles))
        .route("/cycles/:cycle_id", get(handlers::get_cycle))
        .route("/cycles/:cycle_id/stage", put(handlers::set_stage))
        .route("/cycles/:cycle_id/monitoring", post(handlers::record_monitoring))
        .route("/cycles/:cycle_id/egg-retrieval", post(handlers::record_egg_retrieval))
        .route("/cycles/:cycle_id/sperm-samples", post(handlers::record_sperm_sample))
        .route("/cycles/:cycle_id/fertilizations", post(handlers::record_fertilization))
        .route("/cycles/:cycle_id/embryos", get(handlers::list_cycle_embryos))
        .route("/cycles/:cycle_id/transfers", post(handlers::transfer_embryos))
        .route("/cycles/:cycle_id/cryopreservations", post(handlers::freeze_embryos))
        .route("/cycles/:cycle_id/outcome", post(handlers::record_outcome))
        .route("/embryos/:embryo_id/development", put(handlers::update_embryo_development))
        .route("/embryos/:embryo_id/status", put(handlers::set_embryo_status))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tenant::{CLINIC_HEADER, USER_HEADER};
    use axum::body::{to_bytes, Body};
    use axum::http::{Method, Request, StatusCode};
    use ivf_admin::WorkflowMetrics;
    use ivf_core::PatientRef;
    use ivf_database::MemoryStore;
    use ivf_workflow::{CycleWorkflow, WorkflowSettings};
    use serde_json::{json, Value};
    use std::sync::Arc;
    use tower::ServiceExt;
    use uuid::Uuid;

    struct TestApp {
        app: Router,
        clinic_id: Uuid,
        user_id: Uuid,
        patient_id: Uuid,
    }

    impl TestApp {
        async fn new() -> Self {
            let store = MemoryStore::new();
            let clinic_id = Uuid::new_v4();
            let patient_id = Uuid::new_v4();
            store
                .seed_patient(PatientRef {
                    id: patient_id,
                    clinic_id,
                    full_name: "Jane Roe".to_string(),
                    patient_code: "P0042".to_string(),
                })
                .await;

            let metrics = WorkflowMetrics::new().unwrap();
            let workflow = CycleWorkflow::new(
                Arc::new(store.clone()),
                Arc::new(store),
                WorkflowSettings::default(),
            )
            .with_listener(Arc::new(metrics.clone()));

            let state = AppState::new(Arc::new(workflow), metrics);
            Self {
                app: create_app(state, &ServerOptions::default()),
                clinic_id,
                user_id: Uuid::new_v4(),
                patient_id,
            }
        }

        async fn send(&self, method: Method, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
            let builder = Request::builder()
                .method(method)
                .uri(uri)
                .header(CLINIC_HEADER, self.clinic_id.to_string())
                .header(USER_HEADER, self.user_id.to_string());
            let request = match body {
                Some(body) => builder
                    .header("content-type", "application/json")
                    .body(Body::from(body.to_string()))
                    .unwrap(),
                None => builder.body(Body::empty()).unwrap(),
            };

            let response = self.app.clone().oneshot(request).await.unwrap();
            let status = response.status();
            let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
            let value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
            (status, value)
        }

        async fn start_cycle(&self) -> Value {
            let (status, body) = self
                .send(
                    Method::POST,
                    "/api/v1/cycles",
                    Some(json!({
                        "patientId": self.patient_id,
                        "cycleType": "ivf",
                        "startDate": "2026-03-01"
                    })),
                )
                .await;
            assert_eq!(status, StatusCode::CREATED);
            body
        }
    }

    #[tokio::test]
    async fn test_missing_tenant_headers_are_rejected() {
        let app = TestApp::new().await;
        let request = Request::builder()
            .uri(format!("/api/v1/patients/{}/cycles", app.patient_id))
            .body(Body::empty())
            .unwrap();

        let response = app.app.clone().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body: Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body["error"], true);
        assert_eq!(body["status"], 400);
    }

    #[tokio::test]
    async fn test_cycle_lifecycle_over_http() {
        let app = TestApp::new().await;
        let cycle = app.start_cycle().await;
        assert_eq!(cycle["current_stage"], "consultation");
        assert_eq!(cycle["cycle_code"], "P0042-C01");
        let cycle_id = cycle["id"].as_str().unwrap().to_string();

        let (status, body) = app
            .send(
                Method::PUT,
                &format!("/api/v1/cycles/{}/stage", cycle_id),
                Some(json!({ "stage": "stimulation" })),
            )
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["current_stage"], "stimulation");

        let (status, body) = app
            .send(
                Method::POST,
                &format!("/api/v1/cycles/{}/egg-retrieval", cycle_id),
                Some(json!({ "retrievalDate": "2026-03-14", "rightOvaryEggs": 6, "leftOvaryEggs": 4 })),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(body["total_eggs_retrieved"], 10);

        let (status, body) = app.send(Method::GET, &format!("/api/v1/cycles/{}", cycle_id), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["cycle"]["current_stage"], "fertilization");
        assert_eq!(body["cycle"]["actual_egg_retrieval"], "2026-03-14");

        let (status, body) = app
            .send(Method::GET, &format!("/api/v1/patients/{}/cycles", app.patient_id), None)
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body.as_array().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_error_statuses() {
        let app = TestApp::new().await;

        let (status, _) = app
            .send(Method::GET, &format!("/api/v1/cycles/{}", Uuid::new_v4()), None)
            .await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, body) = app
            .send(Method::POST, "/api/v1/cycles", Some(json!({ "cycleType": "ivf" })))
            .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["status"], 400);

        let cycle = app.start_cycle().await;
        let cycle_id = cycle["id"].as_str().unwrap();
        app.send(
            Method::PUT,
            &format!("/api/v1/cycles/{}/stage", cycle_id),
            Some(json!({ "stage": "cancelled" })),
        )
        .await;
        let (status, body) = app
            .send(
                Method::POST,
                &format!("/api/v1/cycles/{}/outcome", cycle_id),
                Some(json!({ "firstBetaValue": 120.0 })),
            )
            .await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body["status"], 409);
    }

    #[tokio::test]
    async fn test_health_and_metrics() {
        let app = TestApp::new().await;
        let (status, body) = app.send(Method::GET, "/health", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "healthy");

        let cycle = app.start_cycle().await;
        app.send(
            Method::PUT,
            &format!("/api/v1/cycles/{}/stage", cycle["id"].as_str().unwrap()),
            Some(json!({ "stage": "stimulation" })),
        )
        .await;

        let request = Request::builder().uri("/metrics").body(Body::empty()).unwrap();
        let response = app.app.clone().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let text = String::from_utf8(bytes.to_vec()).unwrap();
        assert!(text.contains("ivf_operations_total{operation=\"start_cycle\",result=\"ok\"} 1"));
        assert!(text.contains("ivf_stage_transitions_total{stage=\"stimulation\"} 1"));
    }
}
