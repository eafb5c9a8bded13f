use std::{collections::BTreeMap, path::PathBuf};

use bytes::Bytes;
use futures::{StreamExt as _, stream};
use image::codecs::jpeg::JpegEncoder;
use tracing::{info, warn};
use url::Url;

use crate::{http::Fetch, panorama::PanoramaId};

use super::{AcquireRequest, Error, create_dir, stitch};

const JPEG_QUALITY: u8 = 95;
const FALLBACK_ZOOM: i64 = 3;

/// Position of one tile in a panorama's grid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TileDescriptor {
    pub row: u32,
    pub col: u32,
    pub zoom: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TileGrid {
    pub zoom: i64,
    pub rows: u32,
    pub cols: u32,
}

impl TileGrid {
    /// Grid shape for `zoom`; unknown levels use zoom 3.
    pub fn for_zoom(zoom: i64) -> Self {
        let (rows, cols) = match zoom {
            1 => (1, 1),
            2 => (1, 2),
            3 => (2, 4),
            4 => (4, 8),
            5 => (8, 16),
            _ => {
                warn!(zoom, fallback = FALLBACK_ZOOM, "unsupported zoom level");
                return Self::for_zoom(FALLBACK_ZOOM);
            }
        };
        Self { zoom, rows, cols }
    }

    pub fn tile_count(&self) -> usize {
        (self.rows * self.cols) as usize
    }

    pub fn tiles(&self) -> impl Iterator<Item = TileDescriptor> + use<> {
        let Self { zoom, rows, cols } = *self;
        (0..rows).flat_map(move |row| (0..cols).map(move |col| TileDescriptor { row, col, zoom }))
    }
}

#[derive(Debug, Clone)]
pub struct Panoramic {
    endpoint: Url,
    grid: TileGrid,
    dir: PathBuf,
}

impl Panoramic {
    pub fn new(endpoint: Url, grid: TileGrid, dir: PathBuf) -> Self {
        Self {
            endpoint,
            grid,
            dir,
        }
    }

    async fn download<F: Fetch>(
        &self,
        fetch: &F,
        id: &PanoramaId,
        tile: TileDescriptor,
    ) -> Option<(TileDescriptor, Bytes)> {
        let params = [
            ("qt", "pdata".to_owned()),
            ("sid", id.to_string()),
            ("pos", format!("{}_{}", tile.row, tile.col)),
            ("z", tile.zoom.to_string()),
            ("from", "PC".to_owned()),
        ];
        fetch
            .get(&self.endpoint, &params)
            .await
            .inspect_err(|error| {
                warn!(%id, row = tile.row, col = tile.col, %error, "tile download failed")
            })
            .ok()
            .map(|body| (tile, body))
    }

    pub async fn acquire<F: Fetch>(
        &self,
        fetch: &F,
        request: &AcquireRequest<'_>,
    ) -> Result<Vec<PathBuf>, Error> {
        create_dir(&self.dir).await?;
        let id = request.panorama_id;
        let downloaded: Vec<_> = stream::iter(self.grid.tiles())
            .map(|tile| self.download(fetch, id, tile))
            .buffer_unordered(self.grid.tile_count())
            .filter_map(|tile| async move { tile })
            .collect()
            .await;
        if downloaded.len() < self.grid.tile_count() {
            warn!(
                %id,
                downloaded = downloaded.len(),
                expected = self.grid.tile_count(),
                "not every tile was downloaded"
            );
        }
        if downloaded.is_empty() {
            warn!(%id, pid = request.pid, "no tiles downloaded");
            return Ok(Vec::new());
        }

        let path = self
            .dir
            .join(format!("{}_{}_{}.jpg", request.pid, request.lon, request.lat));
        let grid = self.grid;
        let encode_path = path.clone();
        let encoded = tokio::task::spawn_blocking(move || encode(downloaded, &grid, encode_path))
            .await??;
        let Some(encoded) = encoded else {
            warn!(%id, pid = request.pid, "no tile could be decoded");
            return Ok(Vec::new());
        };
        tokio::fs::write(&path, encoded)
            .await
            .map_err(|error| Error::Write {
                path: path.clone(),
                error,
            })?;
        info!(pid = request.pid, ?path, "saved panorama");
        Ok(vec![path])
    }
}

/// Decode, stitch and JPEG-encode. Runs on the blocking pool.
fn encode(
    downloaded: Vec<(TileDescriptor, Bytes)>,
    grid: &TileGrid,
    path: PathBuf,
) -> Result<Option<Vec<u8>>, Error> {
    let tiles: BTreeMap<_, _> = downloaded
        .into_iter()
        .filter_map(|(tile, body)| {
            image::load_from_memory(&body)
                .inspect_err(|error| {
                    warn!(row = tile.row, col = tile.col, %error, "undecodable tile")
                })
                .ok()
                .map(|image| (tile, image))
        })
        .collect();
    let Some(panorama) = stitch(&tiles, grid) else {
        return Ok(None);
    };
    let mut buffer = Vec::new();
    JpegEncoder::new_with_quality(&mut buffer, JPEG_QUALITY)
        .encode_image(&panorama)
        .map_err(|error| Error::Encode { path, error })?;
    Ok(Some(buffer))
}
