use crate::error::CamError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Number of entries in a colormap lookup table.
pub const LUT_SIZE: usize = 256;

/// Named scalar → RGB palettes, following the matplotlib definitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Colormap {
    /// Black → red → yellow → white, with linear ramps.
    #[default]
    Afmhot,
    /// Black → red → yellow → white.
    Hot,
    /// Blue → cyan → yellow → red.
    Jet,
    /// Black → white.
    Gray,
    /// White → black.
    Greys,
}

/// (x, y) control points of a linear segment map, x ascending from 0 to 1.
type Segments = &'static [(f32, f32)];

const HOT: [Segments; 3] = [
    &[(0.0, 0.0416), (0.365079, 1.0), (1.0, 1.0)],
    &[(0.0, 0.0), (0.365079, 0.0), (0.746032, 1.0), (1.0, 1.0)],
    &[(0.0, 0.0), (0.746032, 0.0), (1.0, 1.0)],
];

const JET: [Segments; 3] = [
    &[(0.0, 0.0), (0.35, 0.0), (0.66, 1.0), (0.89, 1.0), (1.0, 0.5)],
    &[
        (0.0, 0.0),
        (0.125, 0.0),
        (0.375, 1.0),
        (0.64, 1.0),
        (0.91, 0.0),
        (1.0, 0.0),
    ],
    &[(0.0, 0.5), (0.11, 1.0), (0.34, 1.0), (0.65, 0.0), (1.0, 0.0)],
];

fn interpolate(segments: Segments, x: f32) -> f32 {
    for pair in segments.windows(2) {
        let (x0, y0) = pair[0];
        let (x1, y1) = pair[1];
        if x <= x1 {
            return y0 + (y1 - y0) * (x - x0) / (x1 - x0);
        }
    }
    segments.last().map(|(_, y)| *y).unwrap_or(0.0)
}

impl Colormap {
    pub const ALL: [Colormap; 5] = [
        Colormap::Afmhot,
        Colormap::Hot,
        Colormap::Jet,
        Colormap::Gray,
        Colormap::Greys,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Colormap::Afmhot => "afmhot",
            Colormap::Hot => "hot",
            Colormap::Jet => "jet",
            Colormap::Gray => "gray",
            Colormap::Greys => "greys",
        }
    }

    /// Color of `x`, clamped to [0, 1]. Channels are in [0, 1].
    pub fn rgb(&self, x: f32) -> [f32; 3] {
        let x = if x.is_nan() { 0.0 } else { x.clamp(0.0, 1.0) };
        match self {
            Colormap::Afmhot => [
                (2.0 * x).clamp(0.0, 1.0),
                (2.0 * x - 0.5).clamp(0.0, 1.0),
                (2.0 * x - 1.0).clamp(0.0, 1.0),
            ],
            Colormap::Hot => HOT.map(|segments| interpolate(segments, x)),
            Colormap::Jet => JET.map(|segments| interpolate(segments, x)),
            Colormap::Gray => [x; 3],
            Colormap::Greys => [1.0 - x; 3],
        }
    }

    /// Lookup table where entry `i` is the color of `i / 255`.
    pub fn lut(&self) -> Vec<[f32; 3]> {
        (0..LUT_SIZE)
            .map(|i| self.rgb(i as f32 / (LUT_SIZE - 1) as f32))
            .collect()
    }
}

impl fmt::Display for Colormap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Colormap {
    type Err = CamError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lower = s.to_ascii_lowercase();
        Colormap::ALL
            .into_iter()
            .find(|colormap| colormap.name() == lower)
            .ok_or_else(|| CamError::UnknownColormap(s.to_string()))
    }
}
