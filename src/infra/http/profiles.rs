use axum::{
    Json,
    extract::{Path, State},
    response::{Html, IntoResponse, Response},
};

use crate::application::{Services, error::AppError, profiles::ProfileUpdate};
use crate::cache::RequestInfo;

pub(super) async fn profile_page(
    State(services): State<Services>,
    info: RequestInfo,
    Path(id): Path<u64>,
) -> Result<Response, AppError> {
    let body = services.profiles.page(&info, id).await?;
    Ok(Html(body).into_response())
}

pub(super) async fn profile_name(
    State(services): State<Services>,
    Path(id): Path<u64>,
) -> Result<Response, AppError> {
    let read = services.profiles.field(id, "name").await?;
    Ok(Json(read).into_response())
}

pub(super) async fn update_profile(
    State(services): State<Services>,
    info: RequestInfo,
    Path(id): Path<u64>,
    Json(changes): Json<ProfileUpdate>,
) -> Result<Response, AppError> {
    let profile = services.profiles.update(&info, id, changes).await?;
    Ok(Json(profile).into_response())
}
