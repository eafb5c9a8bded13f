//! Turning a resolved panorama into image files.
//!
//! [`Acquirer::Directional`] saves four perspective crops around the capture
//! point, [`Acquirer::Panoramic`] downloads the tile grid of the whole
//! panorama and stitches it. Individual failed downloads shrink the result
//! instead of failing it; an empty result means nothing could be saved.

mod directional;
mod panoramic;
mod stitch;

pub use directional::{Directional, headings};
pub use panoramic::{Panoramic, TileDescriptor, TileGrid};
pub use stitch::stitch;

use std::path::PathBuf;

use crate::{
    config::{Config, Mode},
    http::Fetch,
    panorama::PanoramaId,
};

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("failed to create image directory {path:?}: {error}")]
    CreateDir {
        path: PathBuf,
        error: std::io::Error,
    },
    #[error("failed to encode {path:?}: {error}")]
    Encode {
        path: PathBuf,
        error: image::ImageError,
    },
    #[error("failed to write {path:?}: {error}")]
    Write {
        path: PathBuf,
        error: std::io::Error,
    },
    #[error("stitching task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

/// Everything an acquisition needs to know about one point.
#[derive(Debug, Clone, Copy)]
pub struct AcquireRequest<'a> {
    pub panorama_id: &'a PanoramaId,
    pub move_dir: Option<f64>,
    pub pid: &'a str,
    pub lon: f64,
    pub lat: f64,
}

async fn create_dir(path: &std::path::Path) -> Result<(), Error> {
    tokio::fs::create_dir_all(path)
        .await
        .map_err(|error| Error::CreateDir {
            path: path.to_owned(),
            error,
        })
}

#[derive(Debug, Clone)]
pub enum Acquirer {
    Directional(Directional),
    Panoramic(Panoramic),
}

impl Acquirer {
    pub fn from_config(config: &Config) -> Self {
        match config.mode {
            Mode::Directional => Self::Directional(Directional::new(
                config.endpoints.street_view.clone(),
                config.image.clone(),
                config.heading_source,
                config.paths.directional_dir(),
            )),
            Mode::Panoramic => Self::Panoramic(Panoramic::new(
                config.endpoints.street_view.clone(),
                TileGrid::for_zoom(config.image.panorama_zoom),
                config.paths.panoramic_dir(),
            )),
        }
    }

    /// Paths of the saved images, in a stable order.
    pub async fn acquire<F: Fetch>(
        &self,
        fetch: &F,
        request: &AcquireRequest<'_>,
    ) -> Result<Vec<PathBuf>, Error> {
        match self {
            Self::Directional(directional) => directional.acquire(fetch, request).await,
            Self::Panoramic(panoramic) => panoramic.acquire(fetch, request).await,
        }
    }
}
