use axum::{
    Router,
    routing::{get, post},
};

use crate::handlers;
use crate::state::AppState;

pub fn routes() -> Router<AppState> {
    Router::new()
        .nest("/files", file_routes())
        .nest("/shared", shared_routes())
}

fn file_routes() -> Router<AppState> {
    Router::new()
        .route(
            "/{workspace}/{entity_kind}/{entity_id}/{version}/{iteration}",
            post(handlers::files::upload_files),
        )
        // One path shape, two meanings: POST reads the trailing segment as a
        // sub type, GET as a file name.
        .route(
            "/{workspace}/{entity_kind}/{entity_id}/{version}/{iteration}/{file_name}",
            post(handlers::files::upload_sub_typed_files).get(handlers::files::download_file),
        )
        .route(
            "/{workspace}/{entity_kind}/{entity_id}/{version}/{iteration}/{sub_type}/{file_name}",
            get(handlers::files::download_sub_typed_file),
        )
        .layer(handlers::files::upload_body_limit())
}

fn shared_routes() -> Router<AppState> {
    Router::new()
        .route(
            "/{token}/{entity_kind}/{iteration}",
            post(handlers::files::upload_shared_rejected),
        )
        .route(
            "/{token}/{entity_kind}/{iteration}/{file_name}",
            get(handlers::files::download_shared_file)
                .post(handlers::files::upload_shared_sub_typed_rejected),
        )
        .route(
            "/{token}/{entity_kind}/{iteration}/{sub_type}/{file_name}",
            get(handlers::files::download_shared_sub_typed_file),
        )
}
