//! Error types for scan compensation

use thiserror::Error;

/// Errors raised while reading typed values out of stored sections
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Option '{option}' in section '{section}' must be specified")]
    MissingOption { section: String, option: String },

    #[error("Unable to parse option '{option}' in section '{section}': {reason}")]
    InvalidValue {
        section: String,
        option: String,
        reason: String,
    },
}

/// Mesh construction failures
#[derive(Error, Debug, Clone, PartialEq)]
pub enum MeshError {
    #[error("bed_mesh: invalid {axis} bounds, min {min} must be less than max {max}")]
    InvalidBounds { axis: char, min: f64, max: f64 },

    #[error("bed_mesh: mesh requires at least 2x2 points, got {rows}x{cols}")]
    TooFewPoints { rows: usize, cols: usize },

    #[error("bed_mesh: row {row} has {actual} points, expected {expected}")]
    RaggedRow {
        row: usize,
        expected: usize,
        actual: usize,
    },

    #[error(
        "bed_mesh: probed matrix is {rows}x{cols}, but parameters declare {y_count}x{x_count}"
    )]
    ShapeMismatch {
        rows: usize,
        cols: usize,
        y_count: usize,
        x_count: usize,
    },

    #[error("bed_mesh: unknown interpolation algorithm '{0}'")]
    UnknownAlgorithm(String),

    #[error(
        "bed_mesh: {x_pps}x{y_pps} points per segment on a {x_count}x{y_count} grid exceeds {limit} mesh points"
    )]
    TooManyPoints {
        x_count: usize,
        y_count: usize,
        x_pps: usize,
        y_pps: usize,
        limit: usize,
    },

    #[error("bed_mesh: {algo} interpolation does not support a {x_count}x{y_count} probe grid")]
    UnsupportedGrid {
        algo: &'static str,
        x_count: usize,
        y_count: usize,
    },
}

/// Failures reading or writing the section storage file
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse storage: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Failed to serialize storage: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("Section '{0}' is not a table")]
    NotATable(String),
}

/// Errors surfaced to the operator by the compensation command
#[derive(Error, Debug)]
pub enum CompensationError {
    #[error("Value for parameter 'PROFILE' must be specified")]
    InvalidArgument,

    #[error("Profile {0} not found for scan compensation")]
    ProfileNotFound(String),

    #[error("Could not load profile {profile} for scan compensation: {source}")]
    ProfileLoad {
        profile: String,
        #[source]
        source: MeshError,
    },
}
