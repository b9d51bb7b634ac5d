//! services/api/src/adapters/queries.rs
//!
//! SQL used by the PostgreSQL adapter. Statements are checked at runtime, so
//! the crate builds without a live database.

pub const RIDE_CHANGES_CHANNEL: &str = "ride_changes";
pub const PRESENCE_CHANGES_CHANNEL: &str = "driver_presence_changes";

/// Prefix for `QueryBuilder` reads; filters are appended as `AND ...` clauses.
pub const SELECT_RIDES: &str = r#"
SELECT id, poster_id, poster_display_name, pickup, drop_location, ride_date, ride_time,
       price, car_type, trip_type, description, status, assigned_to, assigned_name, created_at
FROM rides
WHERE TRUE"#;

pub const SELECT_RIDE_BY_ID: &str = r#"
SELECT id, poster_id, poster_display_name, pickup, drop_location, ride_date, ride_time,
       price, car_type, trip_type, description, status, assigned_to, assigned_name, created_at
FROM rides
WHERE id = $1;
"#;

pub const INSERT_RIDE: &str = r#"
INSERT INTO rides (id, poster_id, poster_display_name, pickup, drop_location, ride_date,
                   ride_time, price, car_type, trip_type, description)
VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
RETURNING id, poster_id, poster_display_name, pickup, drop_location, ride_date, ride_time,
          price, car_type, trip_type, description, status, assigned_to, assigned_name, created_at;
"#;

/// `$3` says whether the assignment columns are written at all; `$6` is the
/// optional expected status. A concurrent writer blocks on the row lock and
/// then re-evaluates the predicate against the committed row.
pub const UPDATE_RIDE_FIELDS: &str = r#"
UPDATE rides
SET status = COALESCE($2::text, status),
    assigned_to = CASE WHEN $3::boolean THEN $4::uuid ELSE assigned_to END,
    assigned_name = CASE WHEN $3::boolean THEN $5::text ELSE assigned_name END
WHERE id = $1
  AND ($6::text IS NULL OR status = $6::text)
RETURNING id, poster_id, poster_display_name, pickup, drop_location, ride_date, ride_time,
          price, car_type, trip_type, description, status, assigned_to, assigned_name, created_at;
"#;

pub const SELECT_RIDE_STATUS: &str = r#"
SELECT status FROM rides WHERE id = $1;
"#;

pub const UPSERT_PRESENCE_ONLINE: &str = r#"
INSERT INTO driver_presence (driver_id, display_name, is_online, last_seen_at)
VALUES ($1, $2, TRUE, NOW())
ON CONFLICT (driver_id) DO UPDATE
SET display_name = EXCLUDED.display_name,
    is_online = TRUE,
    last_seen_at = EXCLUDED.last_seen_at;
"#;

pub const UPSERT_PRESENCE_OFFLINE: &str = r#"
INSERT INTO driver_presence (driver_id, is_online)
VALUES ($1, FALSE)
ON CONFLICT (driver_id) DO UPDATE
SET is_online = FALSE;
"#;

pub const UPSERT_PRESENCE_LOCATION: &str = r#"
INSERT INTO driver_presence (driver_id, latitude, longitude, last_seen_at)
VALUES ($1, $2, $3, NOW())
ON CONFLICT (driver_id) DO UPDATE
SET latitude = EXCLUDED.latitude,
    longitude = EXCLUDED.longitude,
    last_seen_at = EXCLUDED.last_seen_at;
"#;

pub const SELECT_PRESENCE: &str = r#"
SELECT driver_id, display_name, is_online, latitude, longitude, last_seen_at
FROM driver_presence
WHERE driver_id = $1;
"#;

pub const SELECT_SESSION_ACTOR: &str = r#"
SELECT u.user_id, u.name, u.role
FROM auth_sessions s
JOIN users u ON u.user_id = s.user_id
WHERE s.id = $1 AND s.expires_at > NOW();
"#;
