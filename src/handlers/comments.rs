//! Comment creation and listing.

use axum::{
    extract::{
        rejection::{JsonRejection, PathRejection},
        Path, State,
    },
    http::StatusCode,
    Extension, Json,
};
use tracing::info;
use validator::Validate;

use crate::{
    error::{ApiError, ApiResult},
    models::{Comment, NewComment},
    telemetry::CorrelationContext,
    AppState,
};

#[utoipa::path(
    post,
    path = "/api/comment/new",
    tag = "Comments",
    request_body = NewComment,
    responses(
        (status = 201, description = "Comment stored", body = Comment),
        (status = 409, description = "Storage constraint violated", body = ApiError),
        (status = 422, description = "Malformed body or invalid email", body = ApiError),
        (status = 500, description = "Storage failure", body = ApiError)
    )
)]
pub async fn create_comment(
    State(state): State<AppState>,
    Extension(correlation): Extension<CorrelationContext>,
    payload: Result<Json<NewComment>, JsonRejection>,
) -> ApiResult<(StatusCode, Json<Comment>)> {
    let Json(payload) = payload?;
    payload.validate()?;

    let comment = state.store.insert(payload).await?;

    info!(
        comment_id = comment.id,
        content_id = comment.content_id,
        trace_id = %correlation.trace_id,
        "Comment created"
    );

    Ok((StatusCode::CREATED, Json(comment)))
}

#[utoipa::path(
    get,
    path = "/api/comment/list/{content_id}",
    tag = "Comments",
    params(
        ("content_id" = i32, Path, description = "Content the comments belong to")
    ),
    responses(
        (status = 200, description = "Comments, newest first", body = Vec<Comment>),
        (status = 422, description = "content_id is not an integer", body = ApiError),
        (status = 500, description = "Storage failure", body = ApiError)
    )
)]
pub async fn list_comments(
    State(state): State<AppState>,
    Extension(correlation): Extension<CorrelationContext>,
    content_id: Result<Path<i32>, PathRejection>,
) -> ApiResult<Json<Vec<Comment>>> {
    let Path(content_id) = content_id?;

    let comments = state.store.list_by_content_id(content_id).await?;

    info!(
        content_id,
        count = comments.len(),
        trace_id = %correlation.trace_id,
        "Comments listed"
    );

    Ok(Json(comments))
}
