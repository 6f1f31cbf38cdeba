use axum::{
    extract::{rejection::JsonRejection, Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Json},
};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use uuid::Uuid;
use validator::{Validate, ValidationErrors};

use crate::entities::SpkStatus;
use crate::services::spks::{CreateSpkRequest, SpkResponse, SpkStatistics, UpdateSpkRequest};
use crate::{errors::ServiceError, ApiResponse, ApiResult, AppState, PaginatedResponse};

#[derive(Debug, Deserialize)]
pub struct SpkListQuery {
    #[serde(default = "default_page")]
    pub page: u64,
    pub limit: Option<u64>,
    pub status: Option<SpkStatus>,
}

fn default_page() -> u64 {
    1
}

#[derive(Debug, Deserialize)]
pub struct SpkNumberQuery {
    pub number: String,
}

#[derive(Debug, Deserialize)]
pub struct DateRangeQuery {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

fn body<T>(payload: Result<Json<T>, JsonRejection>) -> Result<T, ServiceError> {
    payload
        .map(|Json(inner)| inner)
        .map_err(|rejection| ServiceError::BadRequest(rejection.body_text()))
}

fn validation_messages(errors: &ValidationErrors) -> Vec<String> {
    errors
        .field_errors()
        .iter()
        .flat_map(|(field, errors)| {
            errors.iter().map(move |error| {
                format!(
                    "{}: {}",
                    field,
                    error
                        .message
                        .as_deref()
                        .unwrap_or_else(|| error.code.as_ref())
                )
            })
        })
        .collect()
}

/// Create an SPK; the number is always assigned by the server.
pub async fn create_spk(
    State(state): State<AppState>,
    payload: Result<Json<CreateSpkRequest>, JsonRejection>,
) -> Result<impl IntoResponse, ServiceError> {
    let request = body(payload)?;

    if let Err(errors) = request.validate() {
        return Ok((
            StatusCode::BAD_REQUEST,
            Json(ApiResponse::<SpkResponse>::validation_errors(
                validation_messages(&errors),
            )),
        ));
    }

    let created = state.services.spks.create_spk(request).await?;
    Ok((StatusCode::CREATED, Json(ApiResponse::success(created))))
}

pub async fn update_spk(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    payload: Result<Json<UpdateSpkRequest>, JsonRejection>,
) -> Result<impl IntoResponse, ServiceError> {
    let patch = body(payload)?;

    if let Err(errors) = patch.validate() {
        return Ok((
            StatusCode::BAD_REQUEST,
            Json(ApiResponse::<SpkResponse>::validation_errors(
                validation_messages(&errors),
            )),
        ));
    }

    let updated = state.services.spks.update_spk(id, patch).await?;
    Ok((StatusCode::OK, Json(ApiResponse::success(updated))))
}

pub async fn list_spks(
    State(state): State<AppState>,
    Query(query): Query<SpkListQuery>,
) -> ApiResult<PaginatedResponse<SpkResponse>> {
    let limit = state.config.page_size(query.limit);
    let result = state
        .services
        .spks
        .list_spks(query.page, limit, query.status)
        .await?;

    let total_pages = result.total.div_ceil(limit);
    Ok(Json(ApiResponse::success(PaginatedResponse {
        items: result.spks,
        total: result.total,
        page: result.page,
        limit,
        total_pages,
    })))
}

pub async fn get_spk(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<SpkResponse> {
    match state.services.spks.get_spk(id).await? {
        Some(spk) => Ok(Json(ApiResponse::success(spk))),
        None => Err(ServiceError::NotFound(format!("SPK {} not found", id))),
    }
}

pub async fn get_spk_by_number(
    State(state): State<AppState>,
    Query(query): Query<SpkNumberQuery>,
) -> ApiResult<SpkResponse> {
    match state.services.spks.get_spk_by_number(&query.number).await? {
        Some(spk) => Ok(Json(ApiResponse::success(spk))),
        None => Err(ServiceError::NotFound(format!(
            "SPK {} not found",
            query.number
        ))),
    }
}

/// SPKs created between `start` and `end` inclusive, newest first.
pub async fn find_by_date_range(
    State(state): State<AppState>,
    Query(range): Query<DateRangeQuery>,
) -> ApiResult<Vec<SpkResponse>> {
    let spks = state
        .services
        .spks
        .find_by_date_range(range.start, range.end)
        .await?;
    Ok(Json(ApiResponse::success(spks)))
}

pub async fn spk_statistics(State(state): State<AppState>) -> ApiResult<SpkStatistics> {
    let stats = state.services.spks.statistics().await?;
    Ok(Json(ApiResponse::success(stats)))
}

pub async fn delete_spk(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ServiceError> {
    state.services.spks.delete_spk(id).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validation_messages_name_the_field() {
        let request = CreateSpkRequest {
            customer_name: String::new(),
            ..Default::default()
        };
        let errors = request.validate().unwrap_err();
        let messages = validation_messages(&errors);
        assert_eq!(messages, vec!["customer_name: Customer name is required"]);
    }
}
