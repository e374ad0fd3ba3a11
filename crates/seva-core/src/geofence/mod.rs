//! Geofence classification for attendance gating.
//!
//! Pure functions: device distance + configured radii in, zone out. The
//! recorder consults this before permitting any attendance transition.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Zone classification relative to the temple reference point.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Zone {
    /// Within the check-in radius; attendance actions allowed
    Inside,
    /// Past the check-in radius but within the outside radius
    Near,
    /// Past the outside radius; outside-hours accrue here
    Outside,
}

/// Radius configuration in meters.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeofenceConfig {
    /// Maximum distance at which check-in is permitted
    pub check_in_radius_m: f64,
    /// Distance beyond which the device counts as outside the temple grounds
    pub outside_radius_m: f64,
}

impl Default for GeofenceConfig {
    fn default() -> Self {
        Self {
            check_in_radius_m: 100.0,
            outside_radius_m: 500.0,
        }
    }
}

/// Classify a distance into a zone.
///
/// Boundaries are inclusive on the lower classification: exactly at
/// `check_in_radius_m` is still `Inside`, exactly at `outside_radius_m` is
/// still `Near`. Negative distances are rejected.
pub fn classify(distance_m: f64, config: &GeofenceConfig) -> Result<Zone> {
    if !distance_m.is_finite() || distance_m < 0.0 {
        return Err(Error::InvalidInput(format!(
            "distance must be a non-negative number, got {distance_m}"
        )));
    }

    if distance_m <= config.check_in_radius_m {
        Ok(Zone::Inside)
    } else if distance_m <= config.outside_radius_m {
        Ok(Zone::Near)
    } else {
        Ok(Zone::Outside)
    }
}

/// Whether a device at the given distance may check in.
pub fn can_check_in(distance_m: f64, config: &GeofenceConfig) -> Result<bool> {
    Ok(classify(distance_m, config)? == Zone::Inside)
}

/// Whether a device at the given distance is in the outside zone.
pub fn is_outside_zone(distance_m: f64, config: &GeofenceConfig) -> Result<bool> {
    Ok(classify(distance_m, config)? == Zone::Outside)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> GeofenceConfig {
        GeofenceConfig {
            check_in_radius_m: 100.0,
            outside_radius_m: 500.0,
        }
    }

    #[test]
    fn boundary_at_check_in_radius_is_inside() {
        assert_eq!(classify(100.0, &config()).unwrap(), Zone::Inside);
        assert!(can_check_in(100.0, &config()).unwrap());
    }

    #[test]
    fn just_past_check_in_radius_is_near() {
        assert_eq!(classify(100.01, &config()).unwrap(), Zone::Near);
        assert!(!can_check_in(100.01, &config()).unwrap());
    }

    #[test]
    fn boundary_at_outside_radius_is_near() {
        assert_eq!(classify(500.0, &config()).unwrap(), Zone::Near);
        assert!(!is_outside_zone(500.0, &config()).unwrap());
    }

    #[test]
    fn past_outside_radius_is_outside() {
        assert_eq!(classify(501.0, &config()).unwrap(), Zone::Outside);
        assert!(is_outside_zone(501.0, &config()).unwrap());
    }

    #[test]
    fn zero_distance_is_inside() {
        assert_eq!(classify(0.0, &config()).unwrap(), Zone::Inside);
    }

    #[test]
    fn negative_distance_is_rejected() {
        assert!(matches!(
            classify(-1.0, &config()),
            Err(Error::InvalidInput(_))
        ));
    }

    #[test]
    fn non_finite_distance_is_rejected() {
        assert!(classify(f64::NAN, &config()).is_err());
        assert!(classify(f64::INFINITY, &config()).is_err());
    }
}
