use thiserror::Error;

use crate::layers::Layer;

#[derive(Debug, Error)]
pub enum SimError {
    #[error("cell ({x}, {y}) is outside the {width}x{height} grid")]
    OutOfBounds {
        x: i64,
        y: i64,
        width: usize,
        height: usize,
    },

    #[error("facility '{facility}' is missing coefficient '{name}'")]
    MissingCoefficient { facility: String, name: &'static str },

    #[error("facility '{facility}' has invalid coefficient '{name}': {reason}")]
    InvalidCoefficient {
        facility: String,
        name: &'static str,
        reason: String,
    },

    #[error("unknown facility '{0}'")]
    UnknownFacility(String),

    #[error("no facility is eligible for initial assignment")]
    NoEligibleFacility,

    #[error("propagation style must be 0..=3, got {0}")]
    InvalidStyle(u8),

    #[error("unknown direction label '{0}'")]
    InvalidOctant(String),

    #[error("layer {layer} is {found_width}x{found_height}, expected {width}x{height}")]
    LayerShape {
        layer: Layer,
        width: usize,
        height: usize,
        found_width: usize,
        found_height: usize,
    },

    #[error("layers are {found_width}x{found_height}, grid is {width}x{height}")]
    GridShape {
        width: usize,
        height: usize,
        found_width: usize,
        found_height: usize,
    },

    #[error("raster row {row} has {found} values, expected {expected}")]
    RaggedRows {
        row: usize,
        expected: usize,
        found: usize,
    },

    #[error("direction map is {found_width}x{found_height}, grid needs {width}x{height}")]
    DirectionCoverage {
        width: usize,
        height: usize,
        found_width: usize,
        found_height: usize,
    },

    #[error("invalid model constant: {0}")]
    InvalidConstant(String),

    #[error("decimal overflow while computing {0}")]
    Overflow(&'static str),
}

pub type SimResult<T> = std::result::Result<T, SimError>;
