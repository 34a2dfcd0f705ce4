//! Axum router configuration

use crate::{rest::handlers, AppState};
use axum::{routing::get, Router};
use tower_http::{catch_panic::CatchPanicLayer, trace::TraceLayer};

/// Create the main API router
pub fn create_router(state: AppState) -> Router {
    let api_v1 = Router::new()
        .route("/instances/:backend", get(handlers::list_instances))
        .route(
            "/instances/:backend/:tenant",
            get(handlers::get_or_create_instance),
        )
        .route("/instances/:backend/:tenant/uri", get(handlers::instance_uri));

    Router::new()
        .nest("/v1", api_v1)
        .route("/health", get(handlers::health_check))
        .layer(CatchPanicLayer::new())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use axum::body::{to_bytes, Body};
    use axum::http::{header, Request, StatusCode};
    use broker_core::{
        random_password, Adapter, Instance, InstanceDescription, OperationContext, Registry,
        ResourceIdentifier, TenantName,
    };
    use chrono::{DateTime, Utc};
    use parking_lot::Mutex;
    use std::collections::HashMap;
    use std::sync::Arc;
    use std::time::Duration;
    use tower::ServiceExt;

    #[derive(Debug, Clone)]
    struct FakeInstance {
        tenant: String,
        password: String,
        created_at: DateTime<Utc>,
    }

    impl Instance for FakeInstance {
        fn tenant_name(&self) -> &str {
            &self.tenant
        }

        fn connection_uri(&self) -> String {
            format!(
                "postgres://user_{}:{}@db.internal:5432/db_{}?sslmode=prefer",
                self.tenant, self.password, self.tenant
            )
        }

        fn describe(&self) -> InstanceDescription {
            InstanceDescription {
                instance: self.tenant.clone(),
                host: "db.internal".to_string(),
                port: 5432,
                resource: ResourceIdentifier::Database(format!("db_{}", self.tenant)),
                username: format!("user_{}", self.tenant),
                password: self.password.clone(),
                uri: self.connection_uri(),
                created_at: self.created_at,
            }
        }
    }

    /// Get-or-create over a map, optionally stalling every call
    #[derive(Default)]
    struct FakeAdapter {
        instances: Mutex<HashMap<String, FakeInstance>>,
        stall: Option<Duration>,
    }

    #[async_trait]
    impl Adapter for FakeAdapter {
        async fn list_instance_names(
            &self,
            _ctx: &OperationContext,
        ) -> broker_core::Result<Vec<String>> {
            let mut names: Vec<String> = self.instances.lock().keys().cloned().collect();
            names.sort();
            Ok(names)
        }

        async fn get_or_create_instance(
            &self,
            ctx: &OperationContext,
            tenant: &TenantName,
        ) -> broker_core::Result<Box<dyn Instance>> {
            if let Some(stall) = self.stall {
                ctx.guard("get instance", tokio::time::sleep(stall)).await?;
            }
            let instance = self
                .instances
                .lock()
                .entry(tenant.to_string())
                .or_insert_with(|| FakeInstance {
                    tenant: tenant.to_string(),
                    password: random_password(),
                    created_at: Utc::now(),
                })
                .clone();
            Ok(Box::new(instance))
        }
    }

    fn app_with(adapter: FakeAdapter, timeout: Duration) -> Router {
        let registry = Registry::new();
        registry.register_adapter("postgres", Arc::new(adapter));
        create_router(AppState::new(Arc::new(registry), timeout))
    }

    fn app() -> Router {
        app_with(FakeAdapter::default(), Duration::from_secs(5))
    }

    async fn get(app: &Router, uri: &str) -> (StatusCode, Option<String>, String) {
        let response = app
            .clone()
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let content_type = response
            .headers()
            .get(header::CONTENT_TYPE)
            .map(|v| v.to_str().unwrap().to_string());
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, content_type, String::from_utf8(body.to_vec()).unwrap())
    }

    #[tokio::test]
    async fn test_health_check_route() {
        let (status, _, body) = get(&app(), "/health").await;
        assert_eq!(status, StatusCode::OK);
        let json: serde_json::Value = serde_json::from_str(&body).unwrap();
        assert_eq!(json["status"], "ok");
        assert_eq!(json["backends"], serde_json::json!(["postgres"]));
    }

    #[tokio::test]
    async fn test_get_or_create_is_stable_across_requests() {
        let app = app();

        let (status, _, first) = get(&app, "/v1/instances/postgres/acme").await;
        assert_eq!(status, StatusCode::OK);
        let first: serde_json::Value = serde_json::from_str(&first).unwrap();
        assert_eq!(first["instance"], "acme");
        assert!(!first["password"].as_str().unwrap().is_empty());

        let (status, _, second) = get(&app, "/v1/instances/postgres/acme").await;
        assert_eq!(status, StatusCode::OK);
        let second: serde_json::Value = serde_json::from_str(&second).unwrap();
        assert_eq!(first["password"], second["password"]);
    }

    #[tokio::test]
    async fn test_tenant_name_is_case_normalized() {
        let app = app();
        let (_, _, upper) = get(&app, "/v1/instances/postgres/ACME").await;
        let (_, _, lower) = get(&app, "/v1/instances/postgres/acme").await;
        let upper: serde_json::Value = serde_json::from_str(&upper).unwrap();
        let lower: serde_json::Value = serde_json::from_str(&lower).unwrap();
        assert_eq!(upper["instance"], "acme");
        assert_eq!(upper["password"], lower["password"]);
    }

    #[tokio::test]
    async fn test_unknown_backend_is_not_found() {
        let (status, _, body) = get(&app(), "/v1/instances/unknown/acme").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        let json: serde_json::Value = serde_json::from_str(&body).unwrap();
        assert_eq!(json["code"], "ADAPTER_NOT_FOUND");

        let (status, _, _) = get(&app(), "/v1/instances/unknown").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_invalid_tenant_name_is_unprocessable() {
        let (status, _, body) = get(&app(), "/v1/instances/postgres/bad!name").await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        let json: serde_json::Value = serde_json::from_str(&body).unwrap();
        assert_eq!(json["code"], "INVALID_INSTANCE_NAME");
        assert!(json["error"].as_str().unwrap().contains("bad!name"));
    }

    #[tokio::test]
    async fn test_uri_route_returns_uri_list() {
        let app = app();
        let (status, content_type, uri) = get(&app, "/v1/instances/postgres/acme/uri").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(content_type.as_deref(), Some("text/uri-list"));
        assert!(uri.starts_with("postgres://user_acme:"));

        let (_, _, described) = get(&app, "/v1/instances/postgres/acme").await;
        let described: serde_json::Value = serde_json::from_str(&described).unwrap();
        assert_eq!(described["uri"], uri.as_str());
    }

    #[tokio::test]
    async fn test_list_instances() {
        let app = app();
        get(&app, "/v1/instances/postgres/zeta").await;
        get(&app, "/v1/instances/postgres/acme").await;

        let (status, _, body) = get(&app, "/v1/instances/postgres").await;
        assert_eq!(status, StatusCode::OK);
        let names: Vec<String> = serde_json::from_str(&body).unwrap();
        assert_eq!(names, vec!["acme", "zeta"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_backend_hits_request_deadline() {
        let adapter = FakeAdapter {
            stall: Some(Duration::from_secs(60)),
            ..Default::default()
        };
        let app = app_with(adapter, Duration::from_millis(100));

        let (status, _, body) = get(&app, "/v1/instances/postgres/acme").await;
        assert_eq!(status, StatusCode::GATEWAY_TIMEOUT);
        let json: serde_json::Value = serde_json::from_str(&body).unwrap();
        assert_eq!(json["code"], "DEADLINE_EXCEEDED");
    }
}
