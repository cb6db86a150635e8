use crate::error::Result;
use crate::overlay::colormap::Colormap;
use image::{Rgb, RgbImage};
use std::path::Path;

/// Padding between tiles, in pixels.
const GAP: u32 = 2;

/// Tiles single-channel images, row by row, `cols` per row.
///
/// Each image is min-max normalized on its own before going through the colormap.
///
/// # Shapes
///   - images [n][height * width]
pub fn tile_grid(
    images: &[Vec<f32>],
    width: usize,
    height: usize,
    cols: usize,
    colormap: Colormap,
) -> RgbImage {
    let cols = cols.max(1);
    let rows = images.len().div_ceil(cols);
    let grid_width = cols as u32 * (width as u32 + GAP) + GAP;
    let grid_height = rows as u32 * (height as u32 + GAP) + GAP;
    let mut grid = RgbImage::from_pixel(grid_width, grid_height, Rgb([255, 255, 255]));

    for (n, image) in images.iter().enumerate() {
        if image.len() != width * height {
            tracing::warn!(
                tile = n,
                len = image.len(),
                width,
                height,
                "skipping mismatched tile"
            );
            continue;
        }
        let left = (n % cols) as u32 * (width as u32 + GAP) + GAP;
        let top = (n / cols) as u32 * (height as u32 + GAP) + GAP;

        let min = image.iter().copied().fold(f32::INFINITY, f32::min);
        let max = image.iter().copied().fold(f32::NEG_INFINITY, f32::max);
        let range = if max > min { max - min } else { 1.0 };

        for (i, value) in image.iter().enumerate() {
            let [r, g, b] = colormap.rgb((value - min) / range);
            let x = left + (i % width) as u32;
            let y = top + (i / width) as u32;
            grid.put_pixel(
                x,
                y,
                Rgb([(r * 255.0) as u8, (g * 255.0) as u8, (b * 255.0) as u8]),
            );
        }
    }
    grid
}

/// Writes [`tile_grid`] to `path`.
pub fn save_grid(
    images: &[Vec<f32>],
    width: usize,
    height: usize,
    cols: usize,
    colormap: Colormap,
    path: impl AsRef<Path>,
) -> Result<()> {
    let path = path.as_ref();
    tile_grid(images, width, height, cols, colormap).save(path)?;
    tracing::info!(?path, n = images.len(), "saved sample grid");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn grid_dimensions() {
        let images = vec![vec![0.0; 6]; 5];
        let grid = tile_grid(&images, 3, 2, 2, Colormap::Greys);
        // 2 columns, 3 rows
        assert_eq!(grid.dimensions(), (2 * (3 + GAP) + GAP, 3 * (2 + GAP) + GAP));
    }

    #[test]
    fn mismatched_tiles_are_left_blank() {
        let images = vec![vec![0.0; 7], vec![0.0, 1.0], vec![1.0]];
        let grid = tile_grid(&images, 2, 1, 3, Colormap::Greys);
        assert_eq!(grid.dimensions(), (3 * (2 + GAP) + GAP, 1 + 2 * GAP));
        // the oversized first tile is skipped
        assert_eq!(*grid.get_pixel(GAP, GAP), Rgb([255, 255, 255]));
        let second = 2 + 2 * GAP;
        assert_eq!(*grid.get_pixel(second + 1, GAP), Rgb([0, 0, 0]));
    }

    #[test]
    fn tiles_are_normalized_independently() {
        let images = vec![vec![0.0, 255.0], vec![10.0, 20.0]];
        let grid = tile_grid(&images, 2, 1, 2, Colormap::Greys);
        // Greys: low values are white, high values black
        assert_eq!(*grid.get_pixel(GAP, GAP), Rgb([255, 255, 255]));
        assert_eq!(*grid.get_pixel(GAP + 1, GAP), Rgb([0, 0, 0]));
        let left = 2 + 2 * GAP;
        assert_eq!(*grid.get_pixel(left, GAP), Rgb([255, 255, 255]));
        assert_eq!(*grid.get_pixel(left + 1, GAP), Rgb([0, 0, 0]));
    }
}
