use std::path::PathBuf;

use futures::{StreamExt as _, stream};
use tracing::{info, warn};
use url::Url;

use crate::{
    config::{HeadingSource, ImageConfig},
    http::Fetch,
    panorama::PanoramaId,
};

use super::{AcquireRequest, Error, create_dir};

const ABSOLUTE: [f64; 4] = [0.0, 90.0, 180.0, 270.0];

/// The four camera headings, 90° apart and each within `[0, 360)`.
///
/// Anchored on `move_dir` the set contains `move_dir` itself (normalized into
/// `[0, 360)`) and starts from its remainder modulo 90.
pub fn headings(move_dir: Option<f64>, source: HeadingSource) -> [f64; 4] {
    if source == HeadingSource::Absolute {
        return ABSOLUTE;
    }
    match move_dir {
        Some(dir) if dir.is_finite() => {
            let offset = dir.rem_euclid(360.0) % 90.0;
            ABSOLUTE.map(|quadrant| {
                // An offset just below 90 can round the last heading up to 360.
                let heading = quadrant + offset;
                if heading >= 360.0 { heading - 360.0 } else { heading }
            })
        }
        Some(dir) => {
            warn!(move_dir = dir, "move direction is not finite, using absolute headings");
            ABSOLUTE
        }
        None => {
            warn!("move direction unknown, using absolute headings");
            ABSOLUTE
        }
    }
}

#[derive(Debug, Clone)]
pub struct Directional {
    endpoint: Url,
    image: ImageConfig,
    heading_source: HeadingSource,
    dir: PathBuf,
}

impl Directional {
    pub fn new(
        endpoint: Url,
        image: ImageConfig,
        heading_source: HeadingSource,
        dir: PathBuf,
    ) -> Self {
        Self {
            endpoint,
            image,
            heading_source,
            dir,
        }
    }

    fn params(&self, id: &PanoramaId, heading: f64) -> Vec<(&'static str, String)> {
        vec![
            ("qt", "pr3d".to_owned()),
            ("fovy", self.image.fovy.to_string()),
            ("quality", self.image.quality.to_string()),
            ("panoid", id.to_string()),
            ("heading", heading.to_string()),
            ("pitch", self.image.pitch.to_string()),
            ("width", self.image.width.to_string()),
            ("height", self.image.height.to_string()),
            ("from", "PC".to_owned()),
        ]
    }

    async fn download<F: Fetch>(
        &self,
        fetch: &F,
        request: &AcquireRequest<'_>,
        heading: f64,
    ) -> Option<PathBuf> {
        let params = self.params(request.panorama_id, heading);
        let body = fetch
            .get(&self.endpoint, &params)
            .await
            .inspect_err(|error| warn!(pid = request.pid, heading, %error, "image download failed"))
            .ok()?;
        let name = format!(
            "{}_{heading:.1}_{}_{}.jpg",
            request.pid, request.lon, request.lat
        );
        let path = self.dir.join(name);
        tokio::fs::write(&path, &body)
            .await
            .inspect_err(|error| warn!(?path, %error, "failed to save image"))
            .ok()?;
        info!(pid = request.pid, heading, ?path, "saved directional image");
        Some(path)
    }

    pub async fn acquire<F: Fetch>(
        &self,
        fetch: &F,
        request: &AcquireRequest<'_>,
    ) -> Result<Vec<PathBuf>, Error> {
        create_dir(&self.dir).await?;
        let headings = headings(request.move_dir, self.heading_source);
        let mut saved = stream::iter(headings.into_iter().enumerate())
            .map(|(slot, heading)| async move {
                self.download(fetch, request, heading)
                    .await
                    .map(|path| (slot, path))
            })
            .buffer_unordered(headings.len())
            .filter_map(|saved| async move { saved })
            .collect::<Vec<_>>()
            .await;
        saved.sort_by_key(|(slot, _)| *slot);
        Ok(saved.into_iter().map(|(_, path)| path).collect())
    }
}
