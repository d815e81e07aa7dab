//! Health check

use axum::extract::State;
use axum::Json;
use std::sync::Arc;

use crate::models::AppState;

/// GET /health
pub async fn health(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "healthy",
        "service": "answer_engine",
        "version": env!("CARGO_PKG_VERSION"),
        "index": {
            "chunks": state.index.len(),
            "dimension": state.index.dim(),
        },
        "features": {
            "query_classification": true,
            "sql_path": true,
            "vector_path": true,
            "hybrid_fallback": true,
            "conversations": true,
        }
    }))
}
