use axum::extract::{Path, Query, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::Json;
use common_http_errors::{ApiError, ApiResult};

use crate::admin::{AdminDiscounts, AdminError, CampaignPage, CampaignQuery, CampaignStatistics, DiscountCampaign, DiscountDraft};
use crate::app::AppState;

impl From<AdminError> for ApiError {
    fn from(err: AdminError) -> Self {
        match err {
            AdminError::Validation(v) => ApiError::Invalid { code: "invalid_discount", fields: v.fields },
            AdminError::Gateway(g) => g.into(),
        }
    }
}

pub async fn list_campaigns(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<CampaignQuery>,
) -> ApiResult<Json<CampaignPage>> {
    let backend = state.backend_for(&headers);
    Ok(Json(AdminDiscounts::new(&backend).list(&query).await?))
}

pub async fn get_campaign(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> ApiResult<Json<DiscountCampaign>> {
    let backend = state.backend_for(&headers);
    Ok(Json(AdminDiscounts::new(&backend).get(&id).await?))
}

pub async fn create_campaign(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(draft): Json<DiscountDraft>,
) -> ApiResult<(StatusCode, Json<DiscountCampaign>)> {
    let backend = state.backend_for(&headers);
    let created = AdminDiscounts::new(&backend).create(draft).await?;
    Ok((StatusCode::CREATED, Json(created)))
}

pub async fn update_campaign(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
    Json(draft): Json<DiscountDraft>,
) -> ApiResult<Json<DiscountCampaign>> {
    let backend = state.backend_for(&headers);
    Ok(Json(AdminDiscounts::new(&backend).update(&id, draft).await?))
}

pub async fn suspend_campaign(State(state): State<AppState>, headers: HeaderMap, Path(id): Path<String>) -> ApiResult<StatusCode> {
    let backend = state.backend_for(&headers);
    AdminDiscounts::new(&backend).suspend(&id).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn reactivate_campaign(State(state): State<AppState>, headers: HeaderMap, Path(id): Path<String>) -> ApiResult<StatusCode> {
    let backend = state.backend_for(&headers);
    AdminDiscounts::new(&backend).reactivate(&id).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn delete_campaign(State(state): State<AppState>, headers: HeaderMap, Path(id): Path<String>) -> ApiResult<StatusCode> {
    let backend = state.backend_for(&headers);
    AdminDiscounts::new(&backend).delete(&id).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn campaign_statistics(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> ApiResult<Json<CampaignStatistics>> {
    let backend = state.backend_for(&headers);
    Ok(Json(AdminDiscounts::new(&backend).statistics(&id).await?))
}

pub async fn export_campaigns(State(state): State<AppState>, headers: HeaderMap) -> ApiResult<impl IntoResponse> {
    let backend = state.backend_for(&headers);
    let csv = AdminDiscounts::new(&backend).export().await?;
    Ok((
        [
            (header::CONTENT_TYPE, "text/csv; charset=utf-8"),
            (header::CONTENT_DISPOSITION, "attachment; filename=\"discounts.csv\""),
        ],
        csv,
    ))
}
