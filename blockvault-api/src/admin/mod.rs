use std::sync::Arc;

use axum::Router;
use blockvault_core::Runtime;
use utoipa::OpenApi;
use utoipa_axum::{router::OpenApiRouter, routes};

mod catalog;

#[derive(OpenApi)]
#[openapi()]
pub struct AdminApiDoc;

pub(crate) fn setup_admin_router() -> (Router<Arc<Runtime>>, utoipa::openapi::OpenApi) {
    let (admin_router, admin_api) = OpenApiRouter::with_openapi(AdminApiDoc::openapi())
        .routes(routes!(catalog::catalog_stats))
        .split_for_parts();

    (admin_router, admin_api)
}
