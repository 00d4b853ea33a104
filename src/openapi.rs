//! OpenAPI documentation.
//!
//! The document is generated with `utoipa` from the handler annotations and
//! served as JSON at `/api-docs/openapi.json`.

use axum::{routing::get, Json, Router};
use utoipa::OpenApi;

pub const OPENAPI_JSON_ROUTE: &str = "/api-docs/openapi.json";

#[derive(OpenApi)]
#[openapi(
    info(
        title = "Comments API",
        version = "1.0.0",
        description = "Stores comments keyed by content id.\n\n\
        Every comment endpoint is traced, logged and measured. Responses carry a \
        W3C `traceparent` header identifying the request's server span, and \
        request metrics are exposed for scraping at `/metrics`.",
        license(
            name = "MIT",
            url = "https://opensource.org/licenses/MIT"
        )
    ),
    servers(
        (url = "/", description = "Current server")
    ),
    tags(
        (name = "Comments", description = "Comment creation and listing"),
        (name = "Health", description = "Liveness and storage health")
    ),
    paths(
        crate::handlers::comments::create_comment,
        crate::handlers::comments::list_comments,
        crate::handlers::health::health_check,
        crate::handlers::health::root,
    ),
    components(
        schemas(
            crate::models::Comment,
            crate::models::NewComment,
            crate::error::ApiError,
            crate::handlers::health::HealthResponse,
            crate::handlers::health::RootResponse,
        )
    )
)]
pub struct ApiDoc;

async fn openapi_json() -> Json<utoipa::openapi::OpenApi> {
    Json(ApiDoc::openapi())
}

pub fn openapi_router() -> Router {
    Router::new().route(OPENAPI_JSON_ROUTE, get(openapi_json))
}
