use std::sync::Arc;

use axum::{extract::State, Json};
use blockvault_core::{CatalogStats, Runtime};

#[tracing::instrument(level = "info", skip(state))]
#[utoipa::path(
    tag = "catalog",
    get,
    path = "/api/catalog",
    responses((status = 200, description = "Metadata store size and the last catalog refresh", body = CatalogStats)),
)]
pub(crate) async fn catalog_stats(State(state): State<Arc<Runtime>>) -> Json<CatalogStats> {
    Json(state.catalog_stats())
}
