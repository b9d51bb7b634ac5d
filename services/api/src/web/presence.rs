//! services/api/src/web/presence.rs
//!
//! Driver presence endpoints: going online or offline and reporting location.

use crate::error::{ApiError, ErrorBody};
use crate::web::state::AppState;
use axum::{
    extract::{rejection::JsonRejection, Path, State},
    http::StatusCode,
    response::Json,
    Extension,
};
use chrono::{DateTime, Utc};
use ride_share_core::{AuthContext, DriverPresence, GeoPoint};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use utoipa::ToSchema;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Deserialize, ToSchema)]
pub struct LocationRequest {
    pub latitude: f64,
    pub longitude: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct LocationDto {
    pub latitude: f64,
    pub longitude: f64,
}

impl From<GeoPoint> for LocationDto {
    fn from(point: GeoPoint) -> Self {
        LocationDto {
            latitude: point.latitude,
            longitude: point.longitude,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct PresenceResponse {
    pub driver_id: Uuid,
    pub display_name: Option<String>,
    pub is_online: bool,
    /// Only shown to the driver and to posters of their accepted or started ride.
    pub location: Option<LocationDto>,
    pub last_seen_at: Option<DateTime<Utc>>,
}

impl From<DriverPresence> for PresenceResponse {
    fn from(presence: DriverPresence) -> Self {
        PresenceResponse {
            driver_id: presence.driver_id,
            display_name: presence.display_name,
            is_online: presence.is_online,
            location: presence.location.map(LocationDto::from),
            last_seen_at: presence.last_seen_at,
        }
    }
}

/// Mark the calling driver online.
#[utoipa::path(
    post,
    path = "/presence/online",
    responses(
        (status = 200, description = "Driver is online", body = PresenceResponse),
        (status = 403, description = "Caller is not a driver", body = ErrorBody)
    )
)]
pub async fn go_online_handler(
    State(app_state): State<Arc<AppState>>,
    Extension(ctx): Extension<AuthContext>,
) -> Result<Json<PresenceResponse>, ApiError> {
    let session = app_state.presence.start_tracking(&ctx).await?;
    let presence = app_state
        .presence
        .get_presence(&ctx, session.driver_id())
        .await?;
    Ok(Json(presence.into()))
}

/// Mark the calling driver offline. The last location is kept.
#[utoipa::path(
    post,
    path = "/presence/offline",
    responses(
        (status = 204, description = "Driver is offline"),
        (status = 403, description = "Caller is not a driver", body = ErrorBody)
    )
)]
pub async fn go_offline_handler(
    State(app_state): State<Arc<AppState>>,
    Extension(ctx): Extension<AuthContext>,
) -> Result<StatusCode, ApiError> {
    app_state.presence.go_offline(&ctx).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Report the calling driver's position. The driver must be online.
#[utoipa::path(
    post,
    path = "/presence/location",
    request_body = LocationRequest,
    responses(
        (status = 204, description = "Location stored"),
        (status = 409, description = "Driver is offline", body = ErrorBody),
        (status = 422, description = "Coordinates out of range", body = ErrorBody)
    )
)]
pub async fn report_location_handler(
    State(app_state): State<Arc<AppState>>,
    Extension(ctx): Extension<AuthContext>,
    payload: Result<Json<LocationRequest>, JsonRejection>,
) -> Result<StatusCode, ApiError> {
    let Json(payload) = payload?;
    app_state
        .presence
        .report_location(&ctx, payload.latitude, payload.longitude)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Current presence of a driver.
#[utoipa::path(
    get,
    path = "/presence/{driver_id}",
    params(("driver_id" = Uuid, Path, description = "The driver's user id.")),
    responses(
        (status = 200, body = PresenceResponse),
        (status = 404, description = "Driver never went online", body = ErrorBody)
    )
)]
pub async fn get_presence_handler(
    State(app_state): State<Arc<AppState>>,
    Extension(ctx): Extension<AuthContext>,
    Path(driver_id): Path<Uuid>,
) -> Result<Json<PresenceResponse>, ApiError> {
    let presence = app_state.presence.get_presence(&ctx, driver_id).await?;
    Ok(Json(presence.into()))
}
