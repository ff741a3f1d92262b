//! Coordinates, the fixed reference point, and great-circle distance.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Mean Earth radius used by the spherical approximation.
pub const EARTH_RADIUS_METERS: f64 = 6_371_000.0;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinate {
    pub latitude: f64,
    pub longitude: f64,
}

#[derive(Debug, Error, PartialEq)]
pub enum GeoError {
    #[error("coordinate is not finite: ({latitude}, {longitude})")]
    NonFinite { latitude: f64, longitude: f64 },
    #[error("radius must be a positive finite number of meters, got {0}")]
    InvalidRadius(f64),
}

impl Coordinate {
    /// Out-of-range latitude/longitude is accepted as-is; only NaN and infinity are rejected.
    pub fn new(latitude: f64, longitude: f64) -> Result<Self, GeoError> {
        if latitude.is_finite() && longitude.is_finite() {
            Ok(Self {
                latitude,
                longitude,
            })
        } else {
            Err(GeoError::NonFinite {
                latitude,
                longitude,
            })
        }
    }
}

/// Haversine distance in meters between two coordinates.
pub fn distance(a: Coordinate, b: Coordinate) -> f64 {
    let phi1 = a.latitude.to_radians();
    let phi2 = b.latitude.to_radians();
    let delta_phi = (b.latitude - a.latitude).to_radians();
    let delta_lambda = (b.longitude - a.longitude).to_radians();

    let sin_phi = (delta_phi / 2.0).sin();
    let sin_lambda = (delta_lambda / 2.0).sin();
    let h = sin_phi * sin_phi + phi1.cos() * phi2.cos() * sin_lambda * sin_lambda;
    // Rounding can push h slightly outside [0, 1] near antipodes.
    let h = h.clamp(0.0, 1.0);

    2.0 * EARTH_RADIUS_METERS * h.sqrt().atan2((1.0 - h).sqrt())
}

/// The single point attendance is measured against, with its allowed radius.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ReferencePoint {
    point: Coordinate,
    radius_meters: f64,
}

impl ReferencePoint {
    pub fn new(point: Coordinate, radius_meters: f64) -> Result<Self, GeoError> {
        Coordinate::new(point.latitude, point.longitude)?;
        if !radius_meters.is_finite() || radius_meters <= 0.0 {
            return Err(GeoError::InvalidRadius(radius_meters));
        }
        Ok(Self {
            point,
            radius_meters,
        })
    }

    pub fn point(&self) -> Coordinate {
        self.point
    }

    pub fn radius_meters(&self) -> f64 {
        self.radius_meters
    }

    pub fn distance_from(&self, coordinate: Coordinate) -> f64 {
        distance(coordinate, self.point)
    }
}
