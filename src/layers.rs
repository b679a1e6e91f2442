//! Static geographic inputs: the named raster layers and the direction map.

use std::fmt;
use std::str::FromStr;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::error::{SimError, SimResult};

/// Largest raw channel value a raster cell can hold.
pub const MAX_CHANNEL_VALUE: u8 = 255;

/// Rescales a raw channel value to the 0..=100 economic index.
pub fn normalize(value: u8) -> Decimal {
    Decimal::from(value) * Decimal::ONE_HUNDRED / Decimal::from(MAX_CHANNEL_VALUE)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Layer {
    Topography,
    CellCoverage,
    TreeCover,
    DistanceFromRoad,
    DistanceFromWater,
}

impl Layer {
    pub const ALL: [Layer; 5] = [
        Layer::Topography,
        Layer::CellCoverage,
        Layer::TreeCover,
        Layer::DistanceFromRoad,
        Layer::DistanceFromWater,
    ];

    fn index(self) -> usize {
        match self {
            Layer::Topography => 0,
            Layer::CellCoverage => 1,
            Layer::TreeCover => 2,
            Layer::DistanceFromRoad => 3,
            Layer::DistanceFromWater => 4,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Layer::Topography => "topography",
            Layer::CellCoverage => "cell_coverage",
            Layer::TreeCover => "tree_cover",
            Layer::DistanceFromRoad => "distance_from_road",
            Layer::DistanceFromWater => "distance_from_water",
        }
    }
}

impl fmt::Display for Layer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Row-major grid of raw channel intensities.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Raster {
    width: usize,
    height: usize,
    values: Vec<u8>,
}

impl Raster {
    pub fn filled(width: usize, height: usize, value: u8) -> Self {
        Self {
            width,
            height,
            values: vec![value; width * height],
        }
    }

    /// Builds a raster from rows; every row must be as long as the first.
    pub fn from_rows(rows: &[Vec<u8>]) -> SimResult<Self> {
        let height = rows.len();
        let width = rows.first().map(Vec::len).unwrap_or(0);
        let mut values = Vec::with_capacity(width * height);
        for (index, row) in rows.iter().enumerate() {
            if row.len() != width {
                return Err(SimError::RaggedRows {
                    row: index,
                    expected: width,
                    found: row.len(),
                });
            }
            values.extend_from_slice(row);
        }
        Ok(Self {
            width,
            height,
            values,
        })
    }

    pub(crate) fn from_raw(width: usize, height: usize, values: Vec<u8>) -> Self {
        debug_assert_eq!(values.len(), width * height);
        Self {
            width,
            height,
            values,
        }
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    pub fn get(&self, x: usize, y: usize) -> Option<u8> {
        if x < self.width && y < self.height {
            Some(self.values[y * self.width + x])
        } else {
            None
        }
    }

    /// Keeps every `resolution`-th sample on both axes, starting at the origin.
    pub fn downsample(&self, resolution: usize) -> Raster {
        if resolution <= 1 {
            return self.clone();
        }
        let width = self.width.div_ceil(resolution);
        let height = self.height.div_ceil(resolution);
        let mut values = Vec::with_capacity(width * height);
        for y in (0..self.height).step_by(resolution) {
            for x in (0..self.width).step_by(resolution) {
                values.push(self.values[y * self.width + x]);
            }
        }
        Raster::from_raw(width, height, values)
    }
}

/// The five geographic layers, all sharing the grid's dimensions.
#[derive(Debug, Clone)]
pub struct NamedMaps {
    width: usize,
    height: usize,
    layers: [Raster; 5],
}

impl NamedMaps {
    pub fn new(
        topography: Raster,
        cell_coverage: Raster,
        tree_cover: Raster,
        distance_from_road: Raster,
        distance_from_water: Raster,
    ) -> SimResult<Self> {
        let layers = [
            topography,
            cell_coverage,
            tree_cover,
            distance_from_road,
            distance_from_water,
        ];
        let width = layers[0].width();
        let height = layers[0].height();
        for layer in Layer::ALL {
            let raster = &layers[layer.index()];
            if raster.width() != width || raster.height() != height {
                return Err(SimError::LayerShape {
                    layer,
                    width,
                    height,
                    found_width: raster.width(),
                    found_height: raster.height(),
                });
            }
        }
        Ok(Self {
            width,
            height,
            layers,
        })
    }

    /// Every layer set to the same value.
    pub fn uniform(width: usize, height: usize, value: u8) -> Self {
        let raster = Raster::filled(width, height, value);
        Self {
            width,
            height,
            layers: [
                raster.clone(),
                raster.clone(),
                raster.clone(),
                raster.clone(),
                raster,
            ],
        }
    }

    pub fn with_layer(mut self, layer: Layer, raster: Raster) -> SimResult<Self> {
        if raster.width() != self.width || raster.height() != self.height {
            return Err(SimError::LayerShape {
                layer,
                width: self.width,
                height: self.height,
                found_width: raster.width(),
                found_height: raster.height(),
            });
        }
        self.layers[layer.index()] = raster;
        Ok(self)
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    pub fn layer(&self, layer: Layer) -> &Raster {
        &self.layers[layer.index()]
    }

    pub fn value(&self, layer: Layer, x: usize, y: usize) -> SimResult<u8> {
        self.layer(layer).get(x, y).ok_or(SimError::OutOfBounds {
            x: x as i64,
            y: y as i64,
            width: self.width,
            height: self.height,
        })
    }

    pub fn normalized(&self, layer: Layer, x: usize, y: usize) -> SimResult<Decimal> {
        self.value(layer, x, y).map(normalize)
    }

    /// True when any layer carries a non-zero sample at the position.
    pub fn any_nonzero(&self, x: usize, y: usize) -> bool {
        self.layers
            .iter()
            .any(|raster| raster.get(x, y).is_some_and(|value| value != 0))
    }
}

/// Compass octant used as a direction label.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Octant {
    N,
    Ne,
    E,
    Se,
    S,
    Sw,
    W,
    Nw,
}

impl Octant {
    pub const ALL: [Octant; 8] = [
        Octant::N,
        Octant::Ne,
        Octant::E,
        Octant::Se,
        Octant::S,
        Octant::Sw,
        Octant::W,
        Octant::Nw,
    ];

    /// Offset a neighbor must sit at, relative to the defending cell, for a
    /// facility preferring this octant to attack it.
    pub fn attack_vector(self) -> (i64, i64) {
        match self {
            Octant::N => (0, 1),
            Octant::Ne => (1, 1),
            Octant::E => (1, 0),
            Octant::Se => (1, -1),
            Octant::S => (0, -1),
            Octant::Sw => (-1, -1),
            Octant::W => (-1, 0),
            Octant::Nw => (-1, 1),
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Octant::N => "N",
            Octant::Ne => "NE",
            Octant::E => "E",
            Octant::Se => "SE",
            Octant::S => "S",
            Octant::Sw => "SW",
            Octant::W => "W",
            Octant::Nw => "NW",
        }
    }
}

impl fmt::Display for Octant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for Octant {
    type Err = SimError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        Octant::ALL
            .into_iter()
            .find(|octant| octant.label().eq_ignore_ascii_case(trimmed))
            .ok_or_else(|| SimError::InvalidOctant(trimmed.to_string()))
    }
}

/// Static octant label for every grid position.
#[derive(Debug, Clone)]
pub struct DirectionMap {
    width: usize,
    height: usize,
    labels: Vec<Octant>,
}

impl DirectionMap {
    pub fn uniform(width: usize, height: usize, octant: Octant) -> Self {
        Self {
            width,
            height,
            labels: vec![octant; width * height],
        }
    }

    /// Takes the top-left `width`x`height` window of `rows`; anything beyond it
    /// is ignored, anything missing is an error.
    pub fn from_rows(rows: &[Vec<Octant>], width: usize, height: usize) -> SimResult<Self> {
        let coverage_error = || SimError::DirectionCoverage {
            width,
            height,
            found_width: rows.iter().map(Vec::len).min().unwrap_or(0),
            found_height: rows.len(),
        };
        if rows.len() < height {
            return Err(coverage_error());
        }
        let mut labels = Vec::with_capacity(width * height);
        for row in &rows[..height] {
            if row.len() < width {
                return Err(coverage_error());
            }
            labels.extend_from_slice(&row[..width]);
        }
        Ok(Self {
            width,
            height,
            labels,
        })
    }

    /// Parses one row per line with labels separated by commas or whitespace.
    pub fn parse(text: &str, width: usize, height: usize) -> SimResult<Self> {
        let rows = text
            .lines()
            .filter(|line| !line.trim().is_empty())
            .map(|line| {
                line.split(|c: char| c == ',' || c.is_whitespace())
                    .filter(|token| !token.is_empty())
                    .map(str::parse)
                    .collect::<SimResult<Vec<Octant>>>()
            })
            .collect::<SimResult<Vec<_>>>()?;
        Self::from_rows(&rows, width, height)
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    pub fn get(&self, x: usize, y: usize) -> SimResult<Octant> {
        if x < self.width && y < self.height {
            Ok(self.labels[y * self.width + x])
        } else {
            Err(SimError::OutOfBounds {
                x: x as i64,
                y: y as i64,
                width: self.width,
                height: self.height,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_spans_zero_to_hundred() {
        assert_eq!(normalize(0), Decimal::ZERO);
        assert_eq!(normalize(255), Decimal::ONE_HUNDRED);
        assert_eq!(normalize(51), Decimal::from(20));
    }

    #[test]
    fn downsample_keeps_every_nth_sample() {
        let rows: Vec<Vec<u8>> = (0..5)
            .map(|y| (0..5).map(|x| (y * 10 + x) as u8).collect())
            .collect();
        let raster = Raster::from_rows(&rows).unwrap();
        let small = raster.downsample(2);
        assert_eq!(small.width(), 3);
        assert_eq!(small.height(), 3);
        assert_eq!(small.get(1, 1), Some(22));
        assert_eq!(small.get(2, 2), Some(44));
    }

    #[test]
    fn ragged_rows_are_rejected() {
        let rows = vec![vec![1, 2, 3], vec![1, 2]];
        assert!(matches!(
            Raster::from_rows(&rows),
            Err(SimError::RaggedRows { row: 1, expected: 3, found: 2 })
        ));
    }

    #[test]
    fn mismatched_layers_are_rejected() {
        let maps = NamedMaps::uniform(3, 3, 0);
        let result = maps.with_layer(Layer::CellCoverage, Raster::filled(2, 3, 0));
        assert!(matches!(result, Err(SimError::LayerShape { .. })));
    }

    #[test]
    fn out_of_bounds_value_is_an_error() {
        let maps = NamedMaps::uniform(2, 2, 7);
        assert_eq!(maps.value(Layer::Topography, 1, 1).unwrap(), 7);
        assert!(matches!(
            maps.value(Layer::Topography, 2, 0),
            Err(SimError::OutOfBounds { x: 2, y: 0, .. })
        ));
    }

    #[test]
    fn direction_text_grid_is_cropped_to_the_grid() {
        let text = "N, NE, E\nse sw w\nS S S\n";
        let map = DirectionMap::parse(text, 2, 2).unwrap();
        assert_eq!(map.get(1, 0).unwrap(), Octant::Ne);
        assert_eq!(map.get(0, 1).unwrap(), Octant::Se);
        assert!(map.get(2, 0).is_err());
    }

    #[test]
    fn direction_map_must_cover_grid() {
        let text = "N N\nN N\n";
        assert!(matches!(
            DirectionMap::parse(text, 3, 2),
            Err(SimError::DirectionCoverage { .. })
        ));
        assert!(matches!(
            DirectionMap::parse("N Q", 2, 1),
            Err(SimError::InvalidOctant(_))
        ));
    }

    #[test]
    fn octant_labels_deserialize_from_yaml() {
        let rows: Vec<Vec<Octant>> = serde_yaml::from_str("[[N, NE], [SW, W]]").unwrap();
        assert_eq!(rows[0][1], Octant::Ne);
        assert_eq!(rows[1][0], Octant::Sw);
        assert_eq!(Octant::Sw.attack_vector(), (-1, -1));
    }
}
