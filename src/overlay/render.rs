use crate::error::Result as CamResult;
use crate::grad_cam::Heatmap;
use crate::overlay::colormap::{Colormap, LUT_SIZE};
use burn::prelude::*;
use image::RgbImage;
use image::imageops::{self, FilterType};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Resampling used to stretch a heatmap onto the picture it explains.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Resampling {
    Nearest,
    Bilinear,
    #[default]
    Bicubic,
}

impl From<Resampling> for FilterType {
    fn from(resampling: Resampling) -> Self {
        match resampling {
            Resampling::Nearest => FilterType::Nearest,
            Resampling::Bilinear => FilterType::Triangle,
            Resampling::Bicubic => FilterType::CatmullRom,
        }
    }
}

/// Configuration to superimpose a [`Heatmap`] onto a picture.
#[derive(Config, Debug)]
pub struct OverlayConfig {
    #[config(default = "Colormap::Afmhot")]
    pub colormap: Colormap,

    /// Scale of the colorized heatmap added on top of the picture.
    ///
    /// This is not a blend fraction: `composite = colorized * alpha + picture`,
    /// and values above 1 are expected.
    #[config(default = 2.0)]
    pub alpha: f32,

    #[config(default = "Resampling::Bicubic")]
    pub filter: Resampling,
}

/// Quantizes heatmap values in [0, 1] into 256 levels, truncating.
pub fn heatmap_levels(values: &[f32]) -> Vec<u8> {
    values.iter().map(|v| (255.0 * v) as u8).collect()
}

/// Converts arbitrary values into bytes: negative values are shifted up to 0,
/// then everything is divided by the maximum (unless it is 0) and scaled to [0, 255].
pub fn scale_to_u8(values: &[f32]) -> Vec<u8> {
    let min = values.iter().copied().fold(f32::INFINITY, f32::min);
    let shift = if min.is_finite() { (-min).max(0.0) } else { 0.0 };
    let max = values
        .iter()
        .map(|v| v + shift)
        .fold(f32::NEG_INFINITY, f32::max);
    let max = if max.is_finite() && max != 0.0 { max } else { 1.0 };
    values
        .iter()
        .map(|v| ((v + shift) / max * 255.0) as u8)
        .collect()
}

/// Maps quantized heatmap levels through the colormap.
///
/// # Shapes
///   - levels [height * width]
///   - Output width × height RGB
pub fn colorize(levels: &[u8], width: usize, height: usize, colormap: Colormap) -> RgbImage {
    debug_assert_eq!(levels.len(), width * height);
    let lut = colormap.lut();
    debug_assert_eq!(lut.len(), LUT_SIZE);
    let colors: Vec<f32> = levels
        .iter()
        .flat_map(|level| lut[*level as usize])
        .collect();
    from_rgb_values(width, height, &colors)
}

/// Additive blend `colorized * alpha + picture`, with `colorized` resized to the picture.
pub fn superimpose(
    picture: &RgbImage,
    colorized: &RgbImage,
    alpha: f32,
    filter: Resampling,
) -> RgbImage {
    let (width, height) = picture.dimensions();
    let resized = imageops::resize(colorized, width, height, filter.into());
    let composite: Vec<f32> = resized
        .as_raw()
        .iter()
        .zip(picture.as_raw())
        .map(|(c, p)| *c as f32 * alpha + *p as f32)
        .collect();
    from_rgb_values(width as usize, height as usize, &composite)
}

/// Colorized heatmap, stretched to `width` × `height`.
pub fn render_heatmap<B: Backend>(
    heatmap: &Heatmap<B>,
    colormap: Colormap,
    width: u32,
    height: u32,
    filter: Resampling,
) -> RgbImage {
    let [rows, cols] = heatmap.dims();
    let colorized = colorize(&heatmap_levels(&heatmap.to_vec()), cols, rows, colormap);
    imageops::resize(&colorized, width, height, filter.into())
}

/// The picture with the colorized heatmap added on top.
pub fn overlay<B: Backend>(
    picture: &RgbImage,
    heatmap: &Heatmap<B>,
    config: &OverlayConfig,
) -> RgbImage {
    let [rows, cols] = heatmap.dims();
    let colorized = colorize(
        &heatmap_levels(&heatmap.to_vec()),
        cols,
        rows,
        config.colormap,
    );
    superimpose(picture, &colorized, config.alpha, config.filter)
}

/// Writes [`overlay`] to `path`. The image format follows the file extension.
pub fn save_overlay<B: Backend>(
    picture: &RgbImage,
    heatmap: &Heatmap<B>,
    config: &OverlayConfig,
    path: impl AsRef<Path>,
) -> CamResult<()> {
    let path = path.as_ref();
    let composite = overlay(picture, heatmap, config);
    composite.save(path)?;
    tracing::info!(?path, class = heatmap.class, "saved overlay");
    Ok(())
}

/// Writes [`render_heatmap`] to `path`, one `scale` × `scale` block per cell.
pub fn save_heatmap<B: Backend>(
    heatmap: &Heatmap<B>,
    colormap: Colormap,
    scale: u32,
    path: impl AsRef<Path>,
) -> CamResult<()> {
    let path = path.as_ref();
    let [rows, cols] = heatmap.dims();
    let image = render_heatmap(
        heatmap,
        colormap,
        cols as u32 * scale,
        rows as u32 * scale,
        Resampling::Nearest,
    );
    image.save(path)?;
    tracing::info!(?path, "saved heatmap");
    Ok(())
}

/// Builds an 8-bit image from interleaved RGB values of any range.
fn from_rgb_values(width: usize, height: usize, values: &[f32]) -> RgbImage {
    let bytes = scale_to_u8(values);
    RgbImage::from_raw(width as u32, height as u32, bytes)
        .unwrap_or_else(|| RgbImage::new(width as u32, height as u32))
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;
    use image::Rgb;

    type TestBackend = NdArray<f32>;

    fn heatmap(values: [[f32; 2]; 2]) -> Heatmap<TestBackend> {
        Heatmap {
            values: Tensor::from_floats(values, &Default::default()),
            class: 3,
            score: 1.5,
        }
    }

    #[test]
    fn levels_truncate() {
        assert_eq!(heatmap_levels(&[0.0, 0.5, 0.999, 1.0]), vec![0, 127, 254, 255]);
    }

    #[test]
    fn scaling_divides_by_the_maximum() {
        assert_eq!(scale_to_u8(&[0.0, 255.0, 510.0]), vec![0, 127, 255]);
        assert_eq!(scale_to_u8(&[10.0, 20.0]), vec![127, 255]);
    }

    #[test]
    fn scaling_shifts_negative_values() {
        assert_eq!(scale_to_u8(&[-1.0, 0.0, 1.0]), vec![0, 127, 255]);
    }

    #[test]
    fn scaling_all_zero_is_black() {
        assert_eq!(scale_to_u8(&[0.0, 0.0]), vec![0, 0]);
    }

    #[test]
    fn colorize_uses_the_lookup_table() {
        let image = colorize(&[0, 255], 2, 1, Colormap::Gray);
        assert_eq!(image.dimensions(), (2, 1));
        assert_eq!(*image.get_pixel(0, 0), Rgb([0, 0, 0]));
        assert_eq!(*image.get_pixel(1, 0), Rgb([255, 255, 255]));
    }

    #[test]
    fn overlay_has_the_picture_dimensions() {
        let picture = RgbImage::from_pixel(40, 30, Rgb([100, 100, 100]));
        let heatmap = heatmap([[0.0, 0.25], [0.5, 1.0]]);
        let composite = overlay(&picture, &heatmap, &OverlayConfig::new());
        assert_eq!(composite.dimensions(), (40, 30));
        // the hottest cell ends up as the brightest corner
        let hot = composite.get_pixel(39, 29);
        let cold = composite.get_pixel(0, 0);
        let brightness = |p: &Rgb<u8>| p.0.iter().map(|c| *c as u32).sum::<u32>();
        assert!(brightness(hot) > brightness(cold));
    }

    #[test]
    fn large_alpha_does_not_overflow() {
        let picture = RgbImage::from_pixel(4, 4, Rgb([255, 255, 255]));
        let colorized = RgbImage::from_pixel(2, 2, Rgb([255, 255, 255]));
        let composite = superimpose(&picture, &colorized, 10.0, Resampling::Nearest);
        assert!(composite.pixels().all(|p| *p == Rgb([255, 255, 255])));
    }

    #[test]
    fn rendered_heatmap_is_stretched() {
        let heatmap = heatmap([[1.0, 0.0], [0.0, 0.0]]);
        let image = render_heatmap(&heatmap, Colormap::Gray, 8, 8, Resampling::Nearest);
        assert_eq!(image.dimensions(), (8, 8));
        assert_eq!(*image.get_pixel(0, 0), Rgb([255, 255, 255]));
        assert_eq!(*image.get_pixel(7, 7), Rgb([0, 0, 0]));
    }

    #[test]
    fn config_defaults() {
        let config = OverlayConfig::new();
        assert_eq!(config.colormap, Colormap::Afmhot);
        assert_eq!(config.alpha, 2.0);
        assert_eq!(config.filter, Resampling::Bicubic);
    }
}
