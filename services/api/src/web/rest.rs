//! services/api/src/web/rest.rs
//!
//! Contains the Axum handlers for the ride and feed endpoints, the JSON payloads
//! they exchange, and the master definition for the OpenAPI specification.

use crate::error::{ApiError, ErrorBody};
use crate::web::presence;
use crate::web::state::AppState;
use axum::{
    extract::{rejection::JsonRejection, Path, State},
    http::StatusCode,
    response::{IntoResponse, Json},
    Extension,
};
use chrono::{DateTime, Utc};
use ride_share_core::{AuthContext, FeedKind, NewRide, Ride, RideStatus};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use utoipa::{OpenApi, ToSchema};
use uuid::Uuid;

//=========================================================================================
// OpenAPI Master Definition
//=========================================================================================

#[derive(OpenApi)]
#[openapi(
    paths(
        create_ride_handler,
        get_ride_handler,
        accept_ride_handler,
        start_ride_handler,
        complete_ride_handler,
        cancel_ride_handler,
        feed_handler,
        health_handler,
        presence::go_online_handler,
        presence::go_offline_handler,
        presence::report_location_handler,
        presence::get_presence_handler,
    ),
    components(
        schemas(
            CreateRideRequest,
            PriceInput,
            RideResponse,
            RideStatusDto,
            FeedName,
            HealthResponse,
            ErrorBody,
            presence::LocationRequest,
            presence::LocationDto,
            presence::PresenceResponse,
        )
    ),
    tags(
        (name = "Ride Share API", description = "Post, claim and follow shared rides.")
    )
)]
pub struct ApiDoc;

//=========================================================================================
// API Response and Payload Structs
//=========================================================================================

/// Price as typed by the poster: either a JSON number or a numeric string.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(untagged)]
pub enum PriceInput {
    Number(f64),
    Text(String),
}

impl Default for PriceInput {
    fn default() -> Self {
        PriceInput::Text(String::new())
    }
}

impl PriceInput {
    fn into_raw(self) -> String {
        match self {
            PriceInput::Number(value) => value.to_string(),
            PriceInput::Text(text) => text,
        }
    }
}

/// The payload for posting a ride. Missing fields are reported by the
/// validator, not the JSON extractor.
#[derive(Debug, Clone, Default, Deserialize, ToSchema)]
#[serde(default)]
pub struct CreateRideRequest {
    pub pickup: String,
    pub drop: String,
    /// Travel date as shown to riders, e.g. `2024-06-01`.
    pub date: String,
    pub time: String,
    pub price: PriceInput,
    pub car_type: Option<String>,
    /// `one_way` (default) or `round_trip`.
    pub trip_type: Option<String>,
    pub description: Option<String>,
}

impl From<CreateRideRequest> for NewRide {
    fn from(req: CreateRideRequest) -> Self {
        NewRide {
            pickup: req.pickup,
            drop: req.drop,
            date: req.date,
            time: req.time,
            price: req.price.into_raw(),
            car_type: req.car_type,
            trip_type: req.trip_type,
            description: req.description,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum RideStatusDto {
    Pending,
    Accepted,
    InProgress,
    Completed,
    Cancelled,
}

impl From<RideStatus> for RideStatusDto {
    fn from(status: RideStatus) -> Self {
        match status {
            RideStatus::Pending => RideStatusDto::Pending,
            RideStatus::Accepted => RideStatusDto::Accepted,
            RideStatus::InProgress => RideStatusDto::InProgress,
            RideStatus::Completed => RideStatusDto::Completed,
            RideStatus::Cancelled => RideStatusDto::Cancelled,
        }
    }
}

/// A ride as returned by every endpoint and WebSocket snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct RideResponse {
    pub id: Uuid,
    pub poster_id: Uuid,
    pub poster_display_name: String,
    pub pickup: String,
    pub drop: String,
    pub date: String,
    pub time: String,
    pub price: f64,
    pub car_type: Option<String>,
    pub trip_type: String,
    pub description: Option<String>,
    pub status: RideStatusDto,
    pub assigned_to: Option<Uuid>,
    pub assigned_name: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl From<Ride> for RideResponse {
    fn from(ride: Ride) -> Self {
        RideResponse {
            id: ride.id,
            poster_id: ride.poster_id,
            poster_display_name: ride.poster_display_name,
            pickup: ride.pickup,
            drop: ride.drop,
            date: ride.date,
            time: ride.time,
            price: ride.price,
            car_type: ride.car_type,
            trip_type: ride.trip_type.as_str().to_string(),
            description: ride.description,
            status: ride.status.into(),
            assigned_to: ride.assigned_to,
            assigned_name: ride.assigned_name,
            created_at: ride.created_at,
        }
    }
}

pub fn ride_responses(rides: Vec<Ride>) -> Vec<RideResponse> {
    rides.into_iter().map(RideResponse::from).collect()
}

/// The point-in-time feeds served over REST. Live variants are on `/ws`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum FeedName {
    Available,
    Posted,
    Accepted,
    Upcoming,
}

impl From<FeedName> for FeedKind {
    fn from(feed: FeedName) -> Self {
        match feed {
            FeedName::Available => FeedKind::Available,
            FeedName::Posted => FeedKind::Posted,
            FeedName::Accepted => FeedKind::Accepted,
            FeedName::Upcoming => FeedKind::Upcoming,
        }
    }
}

#[derive(Debug, Serialize, ToSchema)]
pub struct HealthResponse {
    pub status: String,
}

//=========================================================================================
// REST API Handlers
//=========================================================================================

/// Post a new ride as the calling user.
#[utoipa::path(
    post,
    path = "/rides",
    request_body = CreateRideRequest,
    responses(
        (status = 201, description = "Ride posted as pending", body = RideResponse),
        (status = 401, description = "No caller", body = ErrorBody),
        (status = 422, description = "Invalid ride fields", body = ErrorBody)
    )
)]
pub async fn create_ride_handler(
    State(app_state): State<Arc<AppState>>,
    Extension(ctx): Extension<AuthContext>,
    payload: Result<Json<CreateRideRequest>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let Json(payload) = payload?;
    let ride = app_state.rides.create_ride(&ctx, payload.into()).await?;
    Ok((StatusCode::CREATED, Json(RideResponse::from(ride))))
}

/// Fetch one ride.
#[utoipa::path(
    get,
    path = "/rides/{id}",
    params(("id" = Uuid, Path, description = "The ride id.")),
    responses(
        (status = 200, body = RideResponse),
        (status = 404, description = "No such ride", body = ErrorBody)
    )
)]
pub async fn get_ride_handler(
    State(app_state): State<Arc<AppState>>,
    Extension(ctx): Extension<AuthContext>,
    Path(ride_id): Path<Uuid>,
) -> Result<Json<RideResponse>, ApiError> {
    let ride = app_state.rides.get_ride(&ctx, ride_id).await?;
    Ok(Json(ride.into()))
}

/// Claim a pending ride as the calling driver. At most one driver wins.
#[utoipa::path(
    post,
    path = "/rides/{id}/accept",
    params(("id" = Uuid, Path, description = "The ride id.")),
    responses(
        (status = 200, description = "Ride assigned to the caller", body = RideResponse),
        (status = 403, description = "Caller is not a driver, or owns the ride", body = ErrorBody),
        (status = 409, description = "Ride already taken", body = ErrorBody)
    )
)]
pub async fn accept_ride_handler(
    State(app_state): State<Arc<AppState>>,
    Extension(ctx): Extension<AuthContext>,
    Path(ride_id): Path<Uuid>,
) -> Result<Json<RideResponse>, ApiError> {
    let ride = app_state.assignments.accept_ride(&ctx, ride_id).await?;
    Ok(Json(ride.into()))
}

/// Mark an accepted ride as under way. Assignee only.
#[utoipa::path(
    post,
    path = "/rides/{id}/start",
    params(("id" = Uuid, Path, description = "The ride id.")),
    responses(
        (status = 200, body = RideResponse),
        (status = 403, body = ErrorBody),
        (status = 409, body = ErrorBody)
    )
)]
pub async fn start_ride_handler(
    State(app_state): State<Arc<AppState>>,
    Extension(ctx): Extension<AuthContext>,
    Path(ride_id): Path<Uuid>,
) -> Result<Json<RideResponse>, ApiError> {
    let ride = app_state.assignments.start_ride(&ctx, ride_id).await?;
    Ok(Json(ride.into()))
}

/// Complete an accepted or in-progress ride. Assignee only.
#[utoipa::path(
    post,
    path = "/rides/{id}/complete",
    params(("id" = Uuid, Path, description = "The ride id.")),
    responses(
        (status = 200, body = RideResponse),
        (status = 403, body = ErrorBody),
        (status = 409, body = ErrorBody)
    )
)]
pub async fn complete_ride_handler(
    State(app_state): State<Arc<AppState>>,
    Extension(ctx): Extension<AuthContext>,
    Path(ride_id): Path<Uuid>,
) -> Result<Json<RideResponse>, ApiError> {
    let ride = app_state.assignments.complete_ride(&ctx, ride_id).await?;
    Ok(Json(ride.into()))
}

/// Cancel a pending or accepted ride. Poster or assignee only.
#[utoipa::path(
    post,
    path = "/rides/{id}/cancel",
    params(("id" = Uuid, Path, description = "The ride id.")),
    responses(
        (status = 200, body = RideResponse),
        (status = 403, body = ErrorBody),
        (status = 409, body = ErrorBody)
    )
)]
pub async fn cancel_ride_handler(
    State(app_state): State<Arc<AppState>>,
    Extension(ctx): Extension<AuthContext>,
    Path(ride_id): Path<Uuid>,
) -> Result<Json<RideResponse>, ApiError> {
    let ride = app_state.assignments.cancel_ride(&ctx, ride_id).await?;
    Ok(Json(ride.into()))
}

/// Current contents of one of the caller's feeds.
#[utoipa::path(
    get,
    path = "/feeds/{feed}",
    params(("feed" = FeedName, Path, description = "available, posted, accepted or upcoming.")),
    responses(
        (status = 200, body = [RideResponse]),
        (status = 401, body = ErrorBody)
    )
)]
pub async fn feed_handler(
    State(app_state): State<Arc<AppState>>,
    Extension(ctx): Extension<AuthContext>,
    Path(feed): Path<FeedName>,
) -> Result<Json<Vec<RideResponse>>, ApiError> {
    let rides = app_state.feeds.snapshot(&ctx, feed.into()).await?;
    Ok(Json(ride_responses(rides)))
}

/// Liveness probe.
#[utoipa::path(
    get,
    path = "/health",
    responses((status = 200, body = HealthResponse))
)]
pub async fn health_handler() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
    })
}
