use serde::Deserialize;
use url::Url;

use crate::http::Fetch;

use super::{CoordinateTransform, Error, MercatorCoordinate, check_input};

/// Source datum code for WGS84 in the conversion API.
const FROM_WGS84: &str = "1";
/// Target datum code for BD09MC in the conversion API.
const TO_BD09MC: &str = "6";

#[derive(Deserialize)]
struct Response {
    status: i64,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    result: Vec<Point>,
}

#[derive(Deserialize)]
struct Point {
    x: f64,
    y: f64,
}

/// Conversion through the provider's `geoconv` endpoint.
pub struct ApiTransform<'a, F> {
    fetch: &'a F,
    endpoint: &'a Url,
    api_key: &'a str,
}

impl<'a, F: Fetch> ApiTransform<'a, F> {
    pub fn new(fetch: &'a F, endpoint: &'a Url, api_key: &'a str) -> Self {
        Self {
            fetch,
            endpoint,
            api_key,
        }
    }
}

impl<F: Fetch> CoordinateTransform for ApiTransform<'_, F> {
    async fn transform(&self, lon: f64, lat: f64) -> Result<MercatorCoordinate, Error> {
        check_input(lon, lat)?;
        let params = [
            ("coords", format!("{lon},{lat}")),
            ("from", FROM_WGS84.to_owned()),
            ("to", TO_BD09MC.to_owned()),
            ("output", "json".to_owned()),
            ("ak", self.api_key.to_owned()),
        ];
        let value = self.fetch.get_json(self.endpoint, &params).await?;
        let response: Response = serde_json::from_value(value)
            .map_err(|error| Error::MalformedResponse(error.to_string()))?;
        if response.status != 0 {
            return Err(Error::Rejected {
                lon,
                lat,
                status: response.status,
                message: response.message.unwrap_or_default(),
            });
        }
        let point = response
            .result
            .into_iter()
            .next()
            .ok_or_else(|| Error::MalformedResponse("empty result".into()))?;
        Ok(MercatorCoordinate {
            x: point.x,
            y: point.y,
        })
    }
}
