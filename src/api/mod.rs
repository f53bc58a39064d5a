pub mod handlers;

use crate::service::Pipeline;
use axum::{
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower::ServiceBuilder;

pub use handlers::*;

/// 路由共享状态
#[derive(Clone)]
pub struct AppState {
    pub pipeline: Arc<Pipeline>,
}

impl AppState {
    pub fn new(pipeline: Pipeline) -> Self {
        Self {
            pipeline: Arc::new(pipeline),
        }
    }
}

pub fn build_router(state: AppState) -> Router {
    let documents = Router::new()
        .route("/api/documents", post(upload_document))
        .route("/api/documents/:id", get(get_document))
        .route("/api/documents/:id/extraction", post(deliver_extraction));

    let review = Router::new()
        .route("/api/quotes/:id", get(get_quote).put(save_quote))
        .route("/api/quotes/:id/approve", post(approve_quote))
        .route("/api/quotes/:id/rematch", post(rematch_quote));

    let prices = Router::new()
        .route("/api/prices", get(search_prices))
        .route("/api/prices/export", get(export_prices))
        .route("/api/materials/:id/history", get(material_history))
        .route("/api/materials/:id/suppliers", get(material_suppliers))
        .route("/api/categories/summary", get(category_summary))
        .route("/api/line-items/unmatched", get(unmatched_line_items));

    Router::new()
        .route("/health", get(health_check))
        .merge(documents)
        .merge(review)
        .merge(prices)
        .layer(ServiceBuilder::new())
        .with_state(state)
}
