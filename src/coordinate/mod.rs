//! WGS84 → provider Mercator (BD09MC) conversion.
//!
//! Two interchangeable implementations of [`CoordinateTransform`] exist.
//! [`LocalTransform`] evaluates the datum shift and the provider's Mercator
//! fit in closed form and is what crawls use. [`ApiTransform`] asks the
//! provider's conversion endpoint; it is quota-limited and only serves as an
//! accuracy reference for [`compare_transforms`].

mod api;
mod compare;
pub mod datum;
pub mod mercator;

pub use api::ApiTransform;
pub use compare::{Comparison, Divergence, compare_transforms};

/// A point in the provider's Mercator plane, in metres.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MercatorCoordinate {
    pub x: f64,
    pub y: f64,
}

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("invalid input coordinate ({lon}, {lat})")]
    InvalidInput { lon: f64, lat: f64 },
    #[error("conversion request failed: {0}")]
    Http(#[from] crate::http::Error),
    #[error("conversion of ({lon}, {lat}) rejected with status {status}: {message}")]
    Rejected {
        lon: f64,
        lat: f64,
        status: i64,
        message: String,
    },
    #[error("malformed conversion response: {0}")]
    MalformedResponse(String),
}

pub trait CoordinateTransform: Sync {
    fn transform(
        &self,
        lon: f64,
        lat: f64,
    ) -> impl Future<Output = Result<MercatorCoordinate, Error>> + Send;
}

pub(crate) fn check_input(lon: f64, lat: f64) -> Result<(), Error> {
    if lon.is_finite() && lat.is_finite() {
        Ok(())
    } else {
        Err(Error::InvalidInput { lon, lat })
    }
}

/// Closed-form conversion; no network, no quota.
#[derive(Debug, Default, Clone, Copy)]
pub struct LocalTransform;

impl LocalTransform {
    pub fn convert(lon: f64, lat: f64) -> Result<MercatorCoordinate, Error> {
        check_input(lon, lat)?;
        let (bd_lon, bd_lat) = datum::wgs84_to_bd09(lon, lat);
        let (x, y) = mercator::bd09_to_mercator(bd_lon, bd_lat);
        Ok(MercatorCoordinate { x, y })
    }
}

impl CoordinateTransform for LocalTransform {
    async fn transform(&self, lon: f64, lat: f64) -> Result<MercatorCoordinate, Error> {
        Self::convert(lon, lat)
    }
}
