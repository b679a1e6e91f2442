use std::{
    collections::BTreeMap,
    fs,
    path::{Path, PathBuf},
};

use anyhow::{bail, Context, Result};
use rand::Rng;
use rust_decimal::Decimal;
use serde::Deserialize;
use tracing::{debug, info};

use crate::{
    economics::{EconomicModel, ModelConstants},
    engine::StyleSelector,
    error::SimError,
    facility::{Coefficients, FacilityId, FacilitySet, Rgb},
    layers::{DirectionMap, Layer, NamedMaps, Octant, Raster},
    rng::RngManager,
    systems::PropagationStyle,
    world::{Grid, World},
};

fn default_resolution() -> usize {
    1
}

fn default_randomized() -> bool {
    true
}

fn default_styles() -> Vec<PropagationStyle> {
    PropagationStyle::ALL.to_vec()
}

#[derive(Debug, Clone, Deserialize)]
pub struct Scenario {
    pub name: String,
    pub description: Option<String>,
    pub seed: u64,
    #[serde(default)]
    pub ticks: Option<u64>,
    /// Keep every n-th raster sample on both axes.
    #[serde(default = "default_resolution")]
    pub resolution: usize,
    /// Seed cells with a random draw instead of the single-cell score.
    #[serde(default = "default_randomized")]
    pub randomized_initial_grid: bool,
    #[serde(default)]
    pub has_influx: bool,
    #[serde(default = "default_styles")]
    pub styles: Vec<PropagationStyle>,
    #[serde(default)]
    pub model: ModelConstants,
    /// Facilities left out of the initial assignment only.
    #[serde(default)]
    pub blacklist: Vec<String>,
    pub layers: LayerSources,
    #[serde(default)]
    pub eligibility: Option<LayerSource>,
    pub directions: DirectionSource,
    pub facilities: Vec<ScenarioFacility>,
    #[serde(skip)]
    pub base_dir: PathBuf,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LayerSources {
    pub topography: LayerSource,
    pub cell_coverage: LayerSource,
    pub tree_cover: LayerSource,
    pub distance_from_road: LayerSource,
    pub distance_from_water: LayerSource,
}

impl LayerSources {
    fn get(&self, layer: Layer) -> &LayerSource {
        match layer {
            Layer::Topography => &self.topography,
            Layer::CellCoverage => &self.cell_coverage,
            Layer::TreeCover => &self.tree_cover,
            Layer::DistanceFromRoad => &self.distance_from_road,
            Layer::DistanceFromWater => &self.distance_from_water,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum LayerSource {
    Image {
        image: PathBuf,
        #[serde(default)]
        band: usize,
    },
    Rows {
        rows: Vec<Vec<u8>>,
    },
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum DirectionSource {
    File { file: PathBuf },
    Rows { rows: Vec<Vec<Octant>> },
}

#[derive(Debug, Clone, Deserialize)]
pub struct ScenarioFacility {
    pub name: String,
    pub color: Rgb,
    pub coefficients: BTreeMap<String, Decimal>,
}

pub struct ScenarioLoader {
    base_dir: PathBuf,
}

impl ScenarioLoader {
    pub fn new(base_dir: impl AsRef<Path>) -> Self {
        Self {
            base_dir: base_dir.as_ref().to_path_buf(),
        }
    }

    pub fn load(&self, file: impl AsRef<Path>) -> Result<Scenario> {
        let path = self.base_dir.join(file);
        let data = fs::read_to_string(&path)
            .with_context(|| format!("Failed to read scenario file {}", path.display()))?;
        let mut scenario = Scenario::from_yaml_str(&data)
            .with_context(|| format!("Failed to parse {}", path.display()))?;
        scenario.base_dir = path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| self.base_dir.clone());
        Ok(scenario)
    }
}

impl Scenario {
    pub fn from_yaml_str(data: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(data)?)
    }

    pub fn ticks(&self, override_ticks: Option<u64>) -> u64 {
        override_ticks.or(self.ticks).unwrap_or(120)
    }

    /// A fixed style when `override_style` is given, else a random draw from
    /// the scenario's styles each tick.
    pub fn style_selector(&self, override_style: Option<u8>) -> Result<StyleSelector> {
        if let Some(code) = override_style {
            return Ok(StyleSelector::Fixed(PropagationStyle::try_from(code)?));
        }
        match self.styles.as_slice() {
            [] => bail!("scenario '{}' lists no propagation styles", self.name),
            [only] => Ok(StyleSelector::Fixed(*only)),
            styles => Ok(StyleSelector::Random(styles.to_vec())),
        }
    }

    pub fn build_world(&self) -> Result<World> {
        let facilities = self.facility_set()?;
        let blacklisted = self.blacklisted(&facilities)?;
        let layers = self.load_layers()?;
        let (width, height) = (layers.width(), layers.height());
        let eligible = self.eligibility_mask(&layers)?;
        let directions = self.load_directions(width, height)?;
        let model = EconomicModel::new(self.model.clone(), self.has_influx)?;

        let candidates: Vec<FacilityId> = facilities
            .iter()
            .map(|facility| facility.id)
            .filter(|id| !blacklisted.contains(id))
            .collect();
        if candidates.is_empty() {
            return Err(SimError::NoEligibleFacility.into());
        }

        let mut rng = RngManager::new(self.seed);
        let mut seed_stream = rng.stream("seed");
        let mut grid = Grid::new(width, height);
        for y in 0..height {
            for x in 0..width {
                if !eligible[y * width + x] {
                    continue;
                }
                let mut best: Option<(FacilityId, Decimal)> = None;
                for &id in &candidates {
                    let value = if self.randomized_initial_grid {
                        Decimal::from(seed_stream.gen_range(0u32..100))
                    } else {
                        model.score(&layers, facilities.get(id), x, y, None)?
                    };
                    if best.map_or(true, |(_, top)| value > top) {
                        best = Some((id, value));
                    }
                }
                if let Some((id, _)) = best {
                    grid.place(x, y, facilities.get(id))?;
                }
            }
        }

        info!(
            scenario = %self.name,
            width,
            height,
            occupied = grid.occupied_count(),
            facilities = facilities.len(),
            "world built"
        );
        Ok(World::new(facilities, layers, directions, model, grid)?)
    }

    fn facility_set(&self) -> Result<FacilitySet> {
        let mut facilities = FacilitySet::new();
        for entry in &self.facilities {
            if facilities.find(&entry.name).is_some() {
                bail!("facility '{}' is defined twice", entry.name);
            }
            let coefficients = Coefficients::from_map(&entry.name, &entry.coefficients)?;
            facilities.add(entry.name.clone(), entry.color, coefficients);
        }
        Ok(facilities)
    }

    fn blacklisted(&self, facilities: &FacilitySet) -> Result<Vec<FacilityId>> {
        self.blacklist
            .iter()
            .map(|name| {
                facilities
                    .find(name)
                    .ok_or_else(|| anyhow::Error::from(SimError::UnknownFacility(name.clone())))
            })
            .collect()
    }

    fn resolve(&self, path: &Path) -> PathBuf {
        self.base_dir.join(path)
    }

    fn load_raster(&self, source: &LayerSource) -> Result<Raster> {
        if self.resolution == 0 {
            bail!("resolution must be at least 1");
        }
        let raster = match source {
            LayerSource::Rows { rows } => Raster::from_rows(rows)?,
            LayerSource::Image { image: file, band } => {
                if *band > 2 {
                    bail!("band {band} out of range for RGB image {}", file.display());
                }
                let path = self.resolve(file);
                let decoded = image::open(&path)
                    .with_context(|| format!("Failed to open raster {}", path.display()))?
                    .to_rgb8();
                let (width, height) = decoded.dimensions();
                let values = decoded.pixels().map(|pixel| pixel.0[*band]).collect();
                Raster::from_raw(width as usize, height as usize, values)
            }
        };
        Ok(raster.downsample(self.resolution))
    }

    fn load_layers(&self) -> Result<NamedMaps> {
        let load = |layer: Layer| -> Result<Raster> {
            let raster = self
                .load_raster(self.layers.get(layer))
                .with_context(|| format!("Failed to load layer {layer}"))?;
            debug!(%layer, width = raster.width(), height = raster.height(), "layer loaded");
            Ok(raster)
        };
        Ok(NamedMaps::new(
            load(Layer::Topography)?,
            load(Layer::CellCoverage)?,
            load(Layer::TreeCover)?,
            load(Layer::DistanceFromRoad)?,
            load(Layer::DistanceFromWater)?,
        )?)
    }

    /// Explicit mask (non-zero is land) or, without one, any non-zero layer.
    fn eligibility_mask(&self, layers: &NamedMaps) -> Result<Vec<bool>> {
        let (width, height) = (layers.width(), layers.height());
        let mask: Vec<bool> = match &self.eligibility {
            Some(source) => {
                let raster = self
                    .load_raster(source)
                    .context("Failed to load eligibility mask")?;
                if raster.width() != width || raster.height() != height {
                    bail!(
                        "eligibility mask is {}x{}, layers are {width}x{height}",
                        raster.width(),
                        raster.height()
                    );
                }
                (0..height)
                    .flat_map(|y| (0..width).map(move |x| (x, y)))
                    .map(|(x, y)| raster.get(x, y).is_some_and(|value| value != 0))
                    .collect()
            }
            None => (0..height)
                .flat_map(|y| (0..width).map(move |x| (x, y)))
                .map(|(x, y)| layers.any_nonzero(x, y))
                .collect(),
        };
        Ok(mask)
    }

    fn load_directions(&self, width: usize, height: usize) -> Result<DirectionMap> {
        let map = match &self.directions {
            DirectionSource::Rows { rows } => DirectionMap::from_rows(rows, width, height)?,
            DirectionSource::File { file } => {
                let path = self.resolve(file);
                let text = fs::read_to_string(&path)
                    .with_context(|| format!("Failed to read direction map {}", path.display()))?;
                DirectionMap::parse(&text, width, height)
                    .with_context(|| format!("Invalid direction map {}", path.display()))?
            }
        };
        Ok(map)
    }
}
