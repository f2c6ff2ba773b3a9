use std::sync::Arc;

use axum::{
    body::Body,
    extract::{Path, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use blockvault_core::{BlockError, Runtime};

#[tracing::instrument(level = "info", skip(state))]
#[utoipa::path(
    tag = "blocks",
    get,
    path = "/block/{blockNumber}/{blockHash}",
    params(
        ("blockNumber" = String, Path, description = "Decimal block number"),
        ("blockHash" = String, Path, description = "Block hash as stored in the container header"),
    ),
    responses(
        (status = 200, description = "Decompressed block JSON", content_type = "application/json"),
        (status = 404, description = "Unknown block"),
        (status = 408, description = "Timed out waiting for another request to extract the block"),
        (status = 500, description = "Local cache I/O failure"),
        (status = 502, description = "Object store failure or unreadable container data"),
    )
)]
pub(crate) async fn get_block(
    State(state): State<Arc<Runtime>>,
    Path((block_number, block_hash)): Path<(String, String)>,
) -> Result<Response<Body>, (StatusCode, Json<String>)> {
    let Ok(number) = block_number.parse::<u64>() else {
        return Err((StatusCode::NOT_FOUND, Json("Unknown block".to_string())));
    };

    let stream = state
        .fetch_block(number, &block_hash)
        .await
        .map_err(|err| {
            let status = status_for(&err);
            if status.is_server_error() {
                tracing::error!("Failed to serve block {}-{}: {}", number, block_hash, err);
            }
            (status, Json(err.to_string()))
        })?;

    Ok((
        [(header::CONTENT_TYPE, "application/json")],
        Body::from_stream(stream),
    )
        .into_response())
}

pub(crate) fn status_for(err: &BlockError) -> StatusCode {
    match err {
        BlockError::NotFound(_) => StatusCode::NOT_FOUND,
        BlockError::Timeout(_) => StatusCode::REQUEST_TIMEOUT,
        BlockError::Upstream(_) | BlockError::MalformedHeader { .. } | BlockError::Corrupt { .. } => {
            StatusCode::BAD_GATEWAY
        }
        BlockError::LocalIo { .. } => StatusCode::INTERNAL_SERVER_ERROR,
    }
}
