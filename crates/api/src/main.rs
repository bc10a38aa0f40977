use std::sync::Arc;
use std::time::Duration;

use canopy_core::Value;
use canopy_dispatch::{
    CloudRegistry, DispatchConfig, FunctionRequest, JobRequest, NullAnalyticsAdapter,
};

#[tokio::main]
async fn main() {
    canopy_observability::init();

    let application_id = std::env::var("CANOPY_APPLICATION_ID").unwrap_or_else(|_| {
        tracing::warn!("CANOPY_APPLICATION_ID not set; using insecure dev default");
        "canopy-dev".to_string()
    });
    let master_key = std::env::var("CANOPY_MASTER_KEY").unwrap_or_else(|_| {
        tracing::warn!("CANOPY_MASTER_KEY not set; using insecure dev default");
        "dev-master-key".to_string()
    });

    let mut config = DispatchConfig::new(application_id, master_key);
    if let Ok(raw) = std::env::var("CANOPY_SLOW_TRACKING_TIMEOUT_MS") {
        match raw.parse::<u64>() {
            Ok(ms) => config = config.with_slow_tracking(Duration::from_millis(ms)),
            Err(_) => {
                tracing::warn!("CANOPY_SLOW_TRACKING_TIMEOUT_MS is not a number; slow tracking disabled");
            }
        }
    }

    let mut registry = CloudRegistry::new();
    register_builtin_cloud_code(&mut registry);

    let services = Arc::new(canopy_api::app::services::build_services(
        config,
        registry,
        Arc::new(NullAnalyticsAdapter),
    ));
    let app = canopy_api::app::build_app(services);

    let addr = std::env::var("CANOPY_BIND_ADDR").unwrap_or_else(|_| "0.0.0.0:8080".to_string());
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .unwrap_or_else(|err| panic!("failed to bind {addr}: {err}"));

    tracing::info!("listening on {}", listener.local_addr().unwrap());

    axum::serve(listener, app).await.unwrap();
}

/// Smoke-test registrations for dev deployments.
fn register_builtin_cloud_code(registry: &mut CloudRegistry) {
    registry.define_function("ping", |_req: FunctionRequest| async move {
        Ok(Value::String("pong".to_string()))
    });

    registry.define_job("noop", |req: JobRequest| async move {
        req.set_message("noop running").ok();
        Ok(Value::Null)
    });
}
