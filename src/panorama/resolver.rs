use serde_json::Value;
use tracing::{debug, warn};
use url::Url;

use crate::{coordinate::MercatorCoordinate, http::Fetch};

use super::{PanoramaId, PanoramaMetadata, ResolveError, ResolvedPanorama};

/// Which metadata request is in flight. A year redirection happens at most
/// once; the metadata behind a redirected id is authoritative.
enum Lookup {
    Initial(PanoramaId),
    Redirected(PanoramaId),
}

pub struct PanoramaResolver<'a, F> {
    fetch: &'a F,
    endpoint: &'a Url,
}

impl<'a, F: Fetch> PanoramaResolver<'a, F> {
    pub fn new(fetch: &'a F, endpoint: &'a Url) -> Self {
        Self { fetch, endpoint }
    }

    /// Spatial lookup of the panorama nearest to `coordinate`.
    pub async fn find_panorama(
        &self,
        coordinate: MercatorCoordinate,
    ) -> Result<PanoramaId, ResolveError> {
        let MercatorCoordinate { x, y } = coordinate;
        let params = [
            ("qt", "qsdata".to_owned()),
            ("x", x.to_string()),
            ("y", y.to_string()),
            ("mode", "day".to_owned()),
            ("type", "street".to_owned()),
            ("action", "0".to_owned()),
            ("pc", "1".to_owned()),
        ];
        let response = self
            .fetch
            .get_json(self.endpoint, &params)
            .await
            .map_err(|error| ResolveError::Lookup { x, y, error })
            .inspect_err(|error| warn!(%error, "panorama lookup failed"))?;
        let id = response
            .pointer("/content/id")
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|id| !id.is_empty())
            .ok_or(ResolveError::NoPanorama { x, y })?;
        debug!(x, y, id, "found panorama");
        Ok(PanoramaId::new(id))
    }

    async fn fetch_metadata(&self, id: &PanoramaId) -> Result<PanoramaMetadata, ResolveError> {
        let params = [
            ("qt", "sdata".to_owned()),
            ("sid", id.to_string()),
            ("pc", "1".to_owned()),
        ];
        let mut response = self
            .fetch
            .get_json(self.endpoint, &params)
            .await
            .map_err(|error| ResolveError::MetadataRequest {
                id: id.clone(),
                error,
            })
            .inspect_err(|error| warn!(%error, "metadata request failed"))?;
        let content = response
            .get_mut("content")
            .and_then(Value::as_array_mut)
            .filter(|content| !content.is_empty())
            .map(|content| content.swap_remove(0))
            .filter(|first| {
                !first.is_null() && first.as_object().is_none_or(|fields| !fields.is_empty())
            })
            .ok_or_else(|| ResolveError::EmptyMetadata { id: id.clone() })?;
        Ok(PanoramaMetadata::from_content(content))
    }

    /// Capture metadata for `id`, optionally travelling to the capture taken
    /// in `target_year`.
    pub async fn metadata(
        &self,
        id: &PanoramaId,
        target_year: Option<&str>,
    ) -> Result<ResolvedPanorama, ResolveError> {
        let mut lookup = Lookup::Initial(id.clone());
        loop {
            let (current, redirected) = match lookup {
                Lookup::Initial(id) => (id, false),
                Lookup::Redirected(id) => (id, true),
            };
            let metadata = self.fetch_metadata(&current).await?;
            let year = match target_year {
                Some(year) if !redirected => year,
                _ => {
                    return Ok(ResolvedPanorama {
                        id: current,
                        metadata,
                    });
                }
            };
            match metadata.id_for_year(year).cloned() {
                None => {
                    warn!(id = %current, year, "requested year not in timeline");
                    return Err(ResolveError::YearNotFound {
                        id: current,
                        year: year.to_owned(),
                    });
                }
                Some(found) if found == current => {
                    return Ok(ResolvedPanorama {
                        id: current,
                        metadata,
                    });
                }
                Some(found) => {
                    debug!(from = %current, to = %found, year, "travelling to capture year");
                    lookup = Lookup::Redirected(found);
                }
            }
        }
    }
}
