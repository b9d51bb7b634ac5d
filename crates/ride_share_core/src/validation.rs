//! crates/ride_share_core/src/validation.rs
//!
//! Turns raw poster input into a `RideDraft`, and checks reported coordinates.

use crate::domain::{Actor, GeoPoint, NewRide, RideDraft, TripType};
use crate::error::{CoreError, CoreResult};

fn required(field: &str, value: &str) -> CoreResult<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(CoreError::Validation(format!("{field} is required")));
    }
    Ok(trimmed.to_string())
}

/// Blank optional text is stored as absent.
fn optional(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

pub fn parse_price(raw: &str) -> CoreResult<f64> {
    let trimmed = raw.trim();
    let price: f64 = trimmed
        .parse()
        .map_err(|_| CoreError::Validation(format!("price '{trimmed}' is not a number")))?;
    if !price.is_finite() {
        return Err(CoreError::Validation("price must be finite".to_string()));
    }
    if price < 0.0 {
        return Err(CoreError::Validation("price cannot be negative".to_string()));
    }
    Ok(price)
}

/// Validates a ride posting on behalf of `poster`.
pub fn validate_new_ride(input: &NewRide, poster: &Actor) -> CoreResult<RideDraft> {
    let pickup = required("pickup", &input.pickup)?;
    let drop = required("drop", &input.drop)?;
    let date = required("date", &input.date)?;
    let time = required("time", &input.time)?;
    let price_text = required("price", &input.price)?;

    if pickup.to_lowercase() == drop.to_lowercase() {
        return Err(CoreError::Validation(
            "pickup and drop cannot be the same".to_string(),
        ));
    }

    let price = parse_price(&price_text)?;

    let trip_type = match optional(input.trip_type.as_deref()) {
        Some(raw) => raw
            .parse::<TripType>()
            .map_err(|e| CoreError::Validation(e.to_string()))?,
        None => TripType::default(),
    };

    Ok(RideDraft {
        poster_id: poster.id,
        poster_display_name: poster.display_name.clone(),
        pickup,
        drop,
        date,
        time,
        price,
        car_type: optional(input.car_type.as_deref()),
        trip_type,
        description: optional(input.description.as_deref()),
    })
}

pub fn validate_location(latitude: f64, longitude: f64) -> CoreResult<GeoPoint> {
    if !latitude.is_finite() || !(-90.0..=90.0).contains(&latitude) {
        return Err(CoreError::Validation(format!(
            "latitude {latitude} is out of range"
        )));
    }
    if !longitude.is_finite() || !(-180.0..=180.0).contains(&longitude) {
        return Err(CoreError::Validation(format!(
            "longitude {longitude} is out of range"
        )));
    }
    Ok(GeoPoint {
        latitude,
        longitude,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Role;
    use rstest::{fixture, rstest};
    use uuid::Uuid;

    #[fixture]
    fn poster() -> Actor {
        Actor {
            id: Uuid::new_v4(),
            display_name: "Meera".to_string(),
            role: Some(Role::Passenger),
        }
    }

    #[fixture]
    fn input() -> NewRide {
        NewRide {
            pickup: "Ahmedabad".to_string(),
            drop: "Surat".to_string(),
            date: "2024-05-01".to_string(),
            time: "09:30".to_string(),
            price: "500".to_string(),
            car_type: Some("Sedan".to_string()),
            trip_type: Some("Round Trip".to_string()),
            description: Some("   ".to_string()),
        }
    }

    #[rstest]
    fn valid_input_becomes_a_draft(poster: Actor, input: NewRide) {
        let draft = validate_new_ride(&input, &poster).unwrap();

        assert_eq!(draft.poster_id, poster.id);
        assert_eq!(draft.poster_display_name, "Meera");
        assert_eq!(draft.price, 500.0);
        assert_eq!(draft.trip_type, TripType::RoundTrip);
        assert_eq!(draft.car_type.as_deref(), Some("Sedan"));
        assert_eq!(draft.description, None);
    }

    #[rstest]
    #[case::same_city("Surat", "Surat")]
    #[case::case_and_whitespace(" surat ", "SURAT")]
    fn pickup_equal_to_drop_is_rejected(
        poster: Actor,
        mut input: NewRide,
        #[case] pickup: &str,
        #[case] drop: &str,
    ) {
        input.pickup = pickup.to_string();
        input.drop = drop.to_string();

        let err = validate_new_ride(&input, &poster).unwrap_err();
        assert!(matches!(err, CoreError::Validation(_)));
    }

    #[rstest]
    #[case::negative("-1")]
    #[case::not_a_number("five hundred")]
    #[case::infinite("inf")]
    #[case::nan("NaN")]
    fn bad_prices_are_rejected(poster: Actor, mut input: NewRide, #[case] price: &str) {
        input.price = price.to_string();

        let err = validate_new_ride(&input, &poster).unwrap_err();
        assert!(matches!(err, CoreError::Validation(_)));
    }

    #[rstest]
    fn zero_price_is_allowed(poster: Actor, mut input: NewRide) {
        input.price = "0".to_string();
        assert_eq!(validate_new_ride(&input, &poster).unwrap().price, 0.0);
    }

    #[rstest]
    #[case::pickup(|i: &mut NewRide| i.pickup.clear())]
    #[case::drop(|i: &mut NewRide| i.drop = "  ".to_string())]
    #[case::date(|i: &mut NewRide| i.date.clear())]
    #[case::time(|i: &mut NewRide| i.time.clear())]
    #[case::price(|i: &mut NewRide| i.price.clear())]
    fn missing_required_fields_are_rejected(
        poster: Actor,
        mut input: NewRide,
        #[case] blank: fn(&mut NewRide),
    ) {
        blank(&mut input);
        let err = validate_new_ride(&input, &poster).unwrap_err();
        assert!(matches!(err, CoreError::Validation(_)));
    }

    #[rstest]
    fn trip_type_defaults_to_one_way(poster: Actor, mut input: NewRide) {
        input.trip_type = None;
        assert_eq!(
            validate_new_ride(&input, &poster).unwrap().trip_type,
            TripType::OneWay
        );
    }

    #[rstest]
    #[case(91.0, 0.0)]
    #[case(0.0, -180.5)]
    #[case(f64::NAN, 10.0)]
    fn out_of_range_coordinates_are_rejected(#[case] lat: f64, #[case] lon: f64) {
        assert!(matches!(
            validate_location(lat, lon),
            Err(CoreError::Validation(_))
        ));
    }
}
