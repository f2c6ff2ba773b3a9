use std::{net::IpAddr, str::FromStr, sync::Arc, time::Duration};

use admin::setup_admin_router;
use axum::{
    extract::MatchedPath,
    http::Request,
    response::{Redirect, Response},
    routing::get,
    Router,
};
use blockvault_config::CONFIG;
use blockvault_core::{Runtime, RuntimeOptions};
use blockvault_object_storage::{build_range_source, StoreBackend};
use client::setup_client_router;
use tower_http::{classify::ServerErrorsFailureClass, cors::CorsLayer, trace::TraceLayer};
use tracing::{info_span, Span};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use utoipa_scalar::{Scalar, Servable};

mod admin;
mod client;

#[cfg(not(target_env = "msvc"))]
use tikv_jemallocator::Jemalloc;

#[cfg(not(target_env = "msvc"))]
#[global_allocator]
static GLOBAL: Jemalloc = Jemalloc;

const BLOCKVAULT_VERSION: &str = env!("CARGO_PKG_VERSION");

fn set_api_docs_info(mut openapi: utoipa::openapi::OpenApi) -> utoipa::openapi::OpenApi {
    openapi.info.title = "Blockvault API".to_string();
    openapi.info.version = BLOCKVAULT_VERSION.to_string();
    openapi.info.description =
        Some("Serves single blocks out of packed, gzip-compressed container files".to_string());

    openapi
}

#[tokio::main(worker_threads = 8)]
async fn main() -> anyhow::Result<()> {
    setup_tracing(&CONFIG.log_level);

    let backend = StoreBackend::from_config(&CONFIG)?;
    let source = build_range_source(&backend)?;
    let runtime = Arc::new(Runtime::new(RuntimeOptions::from_config(&CONFIG), source).await?);

    let router = build_router(runtime.clone());

    let addr = std::net::SocketAddr::new(
        IpAddr::from_str(&CONFIG.host)
            .map_err(|e| anyhow::anyhow!("Failed to parse IP address from config: {}", e))?,
        CONFIG.port,
    );

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| anyhow::anyhow!("Failed to bind to address {}: {}", addr, e))?;

    tracing::info!("listening on {}", addr);

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(|e| anyhow::anyhow!("Server failed: {}", e))?;

    runtime.shutdown().await;
    tracing::info!("Shut down cleanly");

    Ok(())
}

pub(crate) fn build_router(runtime: Arc<Runtime>) -> Router {
    let (client_router, mut api_docs) = setup_client_router();
    let (admin_router, api_docs_admin) = setup_admin_router();
    api_docs.merge(api_docs_admin);
    api_docs = set_api_docs_info(api_docs);

    let router = client_router
        .merge(admin_router)
        .merge(Scalar::with_url("/scalar/", api_docs))
        .route("/scalar", get(|| async { Redirect::to("/scalar/") }))
        .layer(CorsLayer::permissive());

    with_trace_layer(router).with_state(runtime)
}

async fn shutdown_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => tracing::info!("Received Ctrl-C, shutting down"),
        Err(e) => {
            tracing::error!("Unable to listen for Ctrl-C: {}", e);
            std::future::pending::<()>().await;
        }
    }
}

fn setup_tracing(log_level: &str) {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                // axum logs rejections from built-in extractors with the `axum::rejection`
                // target, at `TRACE` level.
                format!("{},tower_http=debug,axum::rejection=trace", log_level).into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

fn with_trace_layer<T>(router: Router<T>) -> Router<T>
where
    T: Send + Sync + Clone + 'static,
{
    router.layer(
        TraceLayer::new_for_http()
            .make_span_with(|request: &Request<_>| {
                let matched_path = request
                    .extensions()
                    .get::<MatchedPath>()
                    .map(MatchedPath::as_str);

                info_span!(
                    "http_request",
                    method = ?request.method(),
                    uri = %request.uri(),
                    matched_path,
                )
            })
            .on_request(|_request: &Request<_>, _span: &Span| {
                tracing::debug!("Request received");
            })
            .on_response(|response: &Response, latency: Duration, _span: &Span| {
                tracing::info!("Responded {} in {:?}", response.status(), latency);
            })
            .on_failure(
                |error: ServerErrorsFailureClass, latency: Duration, _span: &Span| {
                    tracing::error!("Request failed after {:?}: {}", latency, error);
                },
            ),
    )
}
