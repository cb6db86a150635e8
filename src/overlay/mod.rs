//! Rendering of heatmaps: colormaps, overlays on the explained picture, sample grids.

mod colormap;
mod grid;
mod render;

pub use colormap::{Colormap, LUT_SIZE};
pub use grid::{save_grid, tile_grid};
pub use render::{
    OverlayConfig, Resampling, colorize, heatmap_levels, overlay, render_heatmap, save_heatmap,
    save_overlay, scale_to_u8, superimpose,
};
