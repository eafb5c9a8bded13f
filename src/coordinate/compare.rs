use tracing::{info, warn};

use super::{CoordinateTransform, MercatorCoordinate};

/// Disagreement between a reference and a candidate conversion.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Divergence {
    pub reference: MercatorCoordinate,
    pub candidate: MercatorCoordinate,
}

impl Divergence {
    pub fn dx(&self) -> f64 {
        (self.reference.x - self.candidate.x).abs()
    }

    pub fn dy(&self) -> f64 {
        (self.reference.y - self.candidate.y).abs()
    }

    /// Either axis differs by more than `tolerance` metres.
    pub fn exceeds(&self, tolerance: f64) -> bool {
        self.dx() > tolerance || self.dy() > tolerance
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Comparison {
    pub lon: f64,
    pub lat: f64,
    /// `Err` carries the failure of whichever side could not convert.
    pub outcome: Result<Divergence, String>,
}

impl Comparison {
    pub fn exceeds(&self, tolerance: f64) -> bool {
        matches!(&self.outcome, Ok(divergence) if divergence.exceeds(tolerance))
    }
}

/// Convert every point with both transforms and log how far they disagree.
pub async fn compare_transforms<R, C>(
    reference: &R,
    candidate: &C,
    points: &[(f64, f64)],
    tolerance: f64,
) -> Vec<Comparison>
where
    R: CoordinateTransform,
    C: CoordinateTransform,
{
    let mut comparisons = Vec::with_capacity(points.len());
    for &(lon, lat) in points {
        let outcome = match (
            reference.transform(lon, lat).await,
            candidate.transform(lon, lat).await,
        ) {
            (Ok(reference), Ok(candidate)) => Ok(Divergence {
                reference,
                candidate,
            }),
            (Err(error), _) => Err(format!("reference: {error}")),
            (_, Err(error)) => Err(format!("candidate: {error}")),
        };
        match &outcome {
            Ok(divergence) if divergence.exceeds(tolerance) => warn!(
                lon,
                lat,
                dx = divergence.dx(),
                dy = divergence.dy(),
                tolerance,
                "conversions diverge beyond tolerance"
            ),
            Ok(divergence) => info!(
                lon,
                lat,
                dx = divergence.dx(),
                dy = divergence.dy(),
                "conversions agree"
            ),
            Err(error) => warn!(lon, lat, error, "conversion failed"),
        }
        comparisons.push(Comparison { lon, lat, outcome });
    }
    comparisons
}
