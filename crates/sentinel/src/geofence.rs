//! Restricted-zone geofencing
//!
//! Zones are WGS84 circles (haversine distance from a center) or bounding
//! boxes. The ingestion path uses them to fill in a snapshot's
//! `in_restricted_zone` flag when the device did not report one.

use anyhow::{bail, Result};
use safety_evaluator::GeoPosition;
use serde::{Deserialize, Serialize};

/// Mean Earth radius in meters
const EARTH_RADIUS_M: f64 = 6_371_008.8;

/// Geometry of a restricted zone
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ZoneShape {
    Circle {
        latitude: f64,
        longitude: f64,
        radius_m: f64,
    },
    /// Bounding box in WGS84 degrees. `west > east` crosses the antimeridian.
    BoundingBox {
        west: f64,
        south: f64,
        east: f64,
        north: f64,
    },
}

impl ZoneShape {
    pub fn contains(&self, position: &GeoPosition) -> bool {
        match *self {
            Self::Circle {
                latitude,
                longitude,
                radius_m,
            } => {
                haversine_m(latitude, longitude, position.latitude, position.longitude) <= radius_m
            }
            Self::BoundingBox {
                west,
                south,
                east,
                north,
            } => {
                let lat_ok = position.latitude >= south && position.latitude <= north;
                let lon_ok = if west <= east {
                    position.longitude >= west && position.longitude <= east
                } else {
                    position.longitude >= west || position.longitude <= east
                };
                lat_ok && lon_ok
            }
        }
    }
}

/// A designated restricted zone
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RestrictedZone {
    pub id: String,
    #[serde(default)]
    pub name: String,
    pub shape: ZoneShape,
}

impl RestrictedZone {
    pub fn validate(&self) -> Result<()> {
        if self.id.trim().is_empty() {
            bail!("zone id must not be empty");
        }
        let lat_ok = |v: f64| v.is_finite() && (-90.0..=90.0).contains(&v);
        let lon_ok = |v: f64| v.is_finite() && (-180.0..=180.0).contains(&v);
        match self.shape {
            ZoneShape::Circle {
                latitude,
                longitude,
                radius_m,
            } => {
                if !lat_ok(latitude) || !lon_ok(longitude) {
                    bail!("circle center ({latitude}, {longitude}) is out of range");
                }
                if !radius_m.is_finite() || radius_m <= 0.0 {
                    bail!("circle radius {radius_m} must be positive");
                }
            }
            ZoneShape::BoundingBox {
                west,
                south,
                east,
                north,
            } => {
                if !lat_ok(south) || !lat_ok(north) || !lon_ok(west) || !lon_ok(east) {
                    bail!("bounding box has out-of-range coordinates");
                }
                if south > north {
                    bail!("bounding box south {south} is above north {north}");
                }
            }
        }
        Ok(())
    }
}

/// Great-circle distance in meters
pub fn haversine_m(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    let (phi1, phi2) = (lat1.to_radians(), lat2.to_radians());
    let d_phi = (lat2 - lat1).to_radians();
    let d_lambda = (lon2 - lon1).to_radians();
    let a = (d_phi / 2.0).sin().powi(2) + phi1.cos() * phi2.cos() * (d_lambda / 2.0).sin().powi(2);
    2.0 * EARTH_RADIUS_M * a.sqrt().min(1.0).asin()
}

/// Set of configured restricted zones
#[derive(Debug, Clone, Default)]
pub struct GeofenceSet {
    zones: Vec<RestrictedZone>,
}

impl GeofenceSet {
    pub fn new(zones: Vec<RestrictedZone>) -> Self {
        Self { zones }
    }

    pub fn is_empty(&self) -> bool {
        self.zones.is_empty()
    }

    /// Zones containing `position`
    pub fn violations(&self, position: &GeoPosition) -> Vec<&RestrictedZone> {
        self.zones
            .iter()
            .filter(|z| z.shape.contains(position))
            .collect()
    }
}
