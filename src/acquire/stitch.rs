use std::collections::BTreeMap;

use image::{DynamicImage, GenericImageView as _, Rgb, RgbImage, imageops};
use tracing::warn;

use super::{TileDescriptor, TileGrid};

const BLANK: Rgb<u8> = Rgb([255, 255, 255]);

/// Lay the tiles of `grid` out row by row.
///
/// Every cell is sized after one of the present tiles; cells without a tile
/// stay white. Returns `None` when there is no tile at all.
pub fn stitch(tiles: &BTreeMap<TileDescriptor, DynamicImage>, grid: &TileGrid) -> Option<RgbImage> {
    let (tile_width, tile_height) = tiles.values().next()?.dimensions();
    let mut canvas = RgbImage::from_pixel(tile_width * grid.cols, tile_height * grid.rows, BLANK);
    for descriptor in grid.tiles() {
        let Some(tile) = tiles.get(&descriptor) else {
            warn!(
                row = descriptor.row,
                col = descriptor.col,
                "tile missing, leaving it blank"
            );
            continue;
        };
        imageops::replace(
            &mut canvas,
            &tile.to_rgb8(),
            i64::from(descriptor.col * tile_width),
            i64::from(descriptor.row * tile_height),
        );
    }
    Some(canvas)
}
