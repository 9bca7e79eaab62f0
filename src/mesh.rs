//! Height mesh built from a probed point matrix
//!
//! A [`Mesh`] owns the grid parameters it was built against, the probed
//! matrix, and an up-sampled matrix used for height lookups. Meshes are only
//! ever produced by a successful build, so a `Mesh` value is always
//! queryable.

use serde::{Deserialize, Serialize};
use std::str::FromStr;

use crate::error::MeshError;
use crate::interpolation::{
    bilinear, cardinal_spline, lagrange, linear_index, spline_control_points,
};

/// Rows of height values, row index = Y, column index = X
pub type PointMatrix = Vec<Vec<f64>>;

/// Largest probe count per axis Lagrange interpolation handles
const LAGRANGE_MAX_POINTS: usize = 6;
/// Smallest probe count per axis bicubic interpolation needs
const BICUBIC_MIN_POINTS: usize = 4;
/// Upper bound on up-sampled mesh cells
const MESH_MAX_POINTS: usize = 1 << 20;

/// Up-sampling algorithm applied between probed points
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum MeshAlgorithm {
    /// Use the probed matrix as-is
    Direct,
    #[default]
    Lagrange,
    Bicubic,
}

impl MeshAlgorithm {
    pub fn as_str(&self) -> &'static str {
        match self {
            MeshAlgorithm::Direct => "direct",
            MeshAlgorithm::Lagrange => "lagrange",
            MeshAlgorithm::Bicubic => "bicubic",
        }
    }
}

impl FromStr for MeshAlgorithm {
    type Err = MeshError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "direct" => Ok(MeshAlgorithm::Direct),
            "lagrange" => Ok(MeshAlgorithm::Lagrange),
            "bicubic" => Ok(MeshAlgorithm::Bicubic),
            other => Err(MeshError::UnknownAlgorithm(other.to_string())),
        }
    }
}

/// Regular sampling grid and the parameters needed to build a mesh on it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GridParams {
    pub min_x: f64,
    pub max_x: f64,
    pub min_y: f64,
    pub max_y: f64,
    /// Probed columns
    pub x_count: usize,
    /// Probed rows
    pub y_count: usize,
    /// Points inserted between each pair of probed columns
    pub mesh_x_pps: usize,
    /// Points inserted between each pair of probed rows
    pub mesh_y_pps: usize,
    pub algo: MeshAlgorithm,
    /// Bicubic spline tension
    pub tension: f64,
}

impl Default for GridParams {
    fn default() -> Self {
        Self {
            min_x: 0.0,
            max_x: 0.0,
            min_y: 0.0,
            max_y: 0.0,
            x_count: 0,
            y_count: 0,
            mesh_x_pps: 2,
            mesh_y_pps: 2,
            algo: MeshAlgorithm::default(),
            tension: 0.2,
        }
    }
}

impl GridParams {
    #[cfg(test)]
    pub fn direct(min: (f64, f64), max: (f64, f64), x_count: usize, y_count: usize) -> Self {
        Self {
            min_x: min.0,
            max_x: max.0,
            min_y: min.1,
            max_y: max.1,
            x_count,
            y_count,
            mesh_x_pps: 0,
            mesh_y_pps: 0,
            algo: MeshAlgorithm::Direct,
            ..Self::default()
        }
    }

    fn validate_bounds(&self) -> Result<(), MeshError> {
        // Written as a negated comparison so NaN bounds are rejected too
        if !(self.max_x > self.min_x) {
            return Err(MeshError::InvalidBounds {
                axis: 'x',
                min: self.min_x,
                max: self.max_x,
            });
        }
        if !(self.max_y > self.min_y) {
            return Err(MeshError::InvalidBounds {
                axis: 'y',
                min: self.min_y,
                max: self.max_y,
            });
        }
        Ok(())
    }

    /// Algorithm actually used for these counts. Bicubic falls back to
    /// Lagrange on small grids.
    fn effective_algorithm(&self) -> Result<MeshAlgorithm, MeshError> {
        if self.mesh_x_pps == 0 && self.mesh_y_pps == 0 {
            return Ok(MeshAlgorithm::Direct);
        }

        let max_count = self.x_count.max(self.y_count);
        let min_count = self.x_count.min(self.y_count);
        let unsupported = |algo| MeshError::UnsupportedGrid {
            algo,
            x_count: self.x_count,
            y_count: self.y_count,
        };

        match self.algo {
            MeshAlgorithm::Direct => Ok(MeshAlgorithm::Direct),
            MeshAlgorithm::Lagrange if max_count > LAGRANGE_MAX_POINTS => {
                Err(unsupported("lagrange"))
            }
            MeshAlgorithm::Lagrange => Ok(MeshAlgorithm::Lagrange),
            MeshAlgorithm::Bicubic if min_count >= BICUBIC_MIN_POINTS => Ok(MeshAlgorithm::Bicubic),
            MeshAlgorithm::Bicubic if max_count > LAGRANGE_MAX_POINTS => {
                Err(unsupported("bicubic"))
            }
            MeshAlgorithm::Bicubic => {
                tracing::warn!(
                    "bed_mesh: bicubic interpolation needs at least {} points per axis, \
                     using lagrange for a {}x{} grid",
                    BICUBIC_MIN_POINTS,
                    self.x_count,
                    self.y_count
                );
                Ok(MeshAlgorithm::Lagrange)
            }
        }
    }
}

/// Check a probed matrix is rectangular, at least 2x2, and matches the
/// declared counts
pub fn validate_matrix(params: &GridParams, matrix: &[Vec<f64>]) -> Result<(), MeshError> {
    let rows = matrix.len();
    let cols = matrix.first().map_or(0, Vec::len);

    if rows < 2 || cols < 2 {
        return Err(MeshError::TooFewPoints { rows, cols });
    }
    if let Some((row, r)) = matrix.iter().enumerate().find(|(_, r)| r.len() != cols) {
        return Err(MeshError::RaggedRow {
            row,
            expected: cols,
            actual: r.len(),
        });
    }
    if rows != params.y_count || cols != params.x_count {
        return Err(MeshError::ShapeMismatch {
            rows,
            cols,
            y_count: params.y_count,
            x_count: params.x_count,
        });
    }
    Ok(())
}

/// Up-sampled layout derived from grid parameters
#[derive(Debug, Clone, Copy)]
struct Layout {
    algo: MeshAlgorithm,
    x_mult: usize,
    y_mult: usize,
    x_count: usize,
    y_count: usize,
    x_dist: f64,
    y_dist: f64,
}

impl Layout {
    fn new(params: &GridParams) -> Result<Self, MeshError> {
        let algo = params.effective_algorithm()?;
        let too_many = || MeshError::TooManyPoints {
            x_count: params.x_count,
            y_count: params.y_count,
            x_pps: params.mesh_x_pps,
            y_pps: params.mesh_y_pps,
            limit: MESH_MAX_POINTS,
        };
        let (x_mult, y_mult) = match algo {
            MeshAlgorithm::Direct => (1, 1),
            _ => (
                params.mesh_x_pps.checked_add(1).ok_or_else(too_many)?,
                params.mesh_y_pps.checked_add(1).ok_or_else(too_many)?,
            ),
        };
        let upsampled = |count: usize, mult: usize| {
            count
                .checked_sub(1)
                .and_then(|segments| segments.checked_mul(mult))
                .and_then(|n| n.checked_add(1))
        };
        let x_count = upsampled(params.x_count, x_mult).ok_or_else(too_many)?;
        let y_count = upsampled(params.y_count, y_mult).ok_or_else(too_many)?;
        match x_count.checked_mul(y_count) {
            Some(cells) if cells <= MESH_MAX_POINTS => {}
            _ => return Err(too_many()),
        }

        Ok(Self {
            algo,
            x_mult,
            y_mult,
            x_count,
            y_count,
            x_dist: (params.max_x - params.min_x) / (x_count - 1) as f64,
            y_dist: (params.max_y - params.min_y) / (y_count - 1) as f64,
        })
    }
}

/// Queryable height surface
#[derive(Debug, Clone)]
pub struct Mesh {
    params: GridParams,
    profile_name: String,
    layout: Layout,
    probed: PointMatrix,
    matrix: PointMatrix,
}

impl Mesh {
    /// Build a mesh for `profile_name` from a probed matrix
    pub fn build(
        params: GridParams,
        profile_name: impl Into<String>,
        probed: PointMatrix,
    ) -> Result<Self, MeshError> {
        params.validate_bounds()?;
        validate_matrix(&params, &probed)?;
        let layout = Layout::new(&params)?;

        let mut mesh = Self {
            params,
            profile_name: profile_name.into(),
            layout,
            probed: Vec::new(),
            matrix: Vec::new(),
        };
        mesh.matrix = mesh.sample(&probed);
        mesh.probed = probed;

        tracing::debug!(
            "bed_mesh: built '{}' {}x{} probed, {}x{} {} mesh",
            mesh.profile_name,
            mesh.params.x_count,
            mesh.params.y_count,
            layout.x_count,
            layout.y_count,
            layout.algo.as_str()
        );
        Ok(mesh)
    }

    /// Replace the probed matrix, keeping grid parameters and name.
    /// The mesh is left untouched when the new matrix is rejected.
    pub fn rebuild(&mut self, probed: PointMatrix) -> Result<(), MeshError> {
        validate_matrix(&self.params, &probed)?;
        self.matrix = self.sample(&probed);
        self.probed = probed;
        Ok(())
    }

    pub fn params(&self) -> &GridParams {
        &self.params
    }

    pub fn profile_name(&self) -> &str {
        &self.profile_name
    }

    pub fn probed_matrix(&self) -> &PointMatrix {
        &self.probed
    }

    pub fn mesh_matrix(&self) -> &PointMatrix {
        &self.matrix
    }

    pub fn algorithm(&self) -> MeshAlgorithm {
        self.layout.algo
    }

    /// Height at `(x, y)`. Points outside the grid take the value at the
    /// nearest edge.
    pub fn calc_z(&self, x: f64, y: f64) -> f64 {
        let l = &self.layout;
        let xi = linear_index(x, self.params.min_x, l.x_dist, l.x_count);
        let yi = linear_index(y, self.params.min_y, l.y_dist, l.y_count);
        bilinear(&self.matrix, xi, yi)
    }

    /// Lowest and highest probed height
    pub fn z_range(&self) -> (f64, f64) {
        self.probed
            .iter()
            .flatten()
            .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &z| {
                (lo.min(z), hi.max(z))
            })
    }

    fn x_coordinate(&self, index: usize) -> f64 {
        self.params.min_x + self.layout.x_dist * index as f64
    }

    fn y_coordinate(&self, index: usize) -> f64 {
        self.params.min_y + self.layout.y_dist * index as f64
    }

    fn sample(&self, probed: &[Vec<f64>]) -> PointMatrix {
        match self.layout.algo {
            MeshAlgorithm::Direct => probed.to_vec(),
            MeshAlgorithm::Lagrange => self.sample_lagrange(probed),
            MeshAlgorithm::Bicubic => self.sample_bicubic(probed),
        }
    }

    /// Up-sampled matrix with probed values at every multiple of the
    /// multipliers and zeros elsewhere
    fn seed_matrix(&self, probed: &[Vec<f64>]) -> PointMatrix {
        let l = &self.layout;
        (0..l.y_count)
            .map(|row| {
                (0..l.x_count)
                    .map(|col| {
                        if row % l.y_mult == 0 && col % l.x_mult == 0 {
                            probed[row / l.y_mult][col / l.x_mult]
                        } else {
                            0.0
                        }
                    })
                    .collect()
            })
            .collect()
    }

    fn sample_lagrange(&self, probed: &[Vec<f64>]) -> PointMatrix {
        let l = self.layout;
        let mut m = self.seed_matrix(probed);

        let xpts: Vec<f64> = (0..self.params.x_count)
            .map(|i| self.x_coordinate(i * l.x_mult))
            .collect();
        let ypts: Vec<f64> = (0..self.params.y_count)
            .map(|j| self.y_coordinate(j * l.y_mult))
            .collect();

        // Rows holding probed values first, then every column
        for row in (0..l.y_count).step_by(l.y_mult) {
            let values: Vec<f64> = m[row].iter().step_by(l.x_mult).copied().collect();
            for col in (0..l.x_count).filter(|c| c % l.x_mult != 0) {
                m[row][col] = lagrange(&xpts, &values, self.x_coordinate(col));
            }
        }
        for col in 0..l.x_count {
            let values: Vec<f64> = m.iter().step_by(l.y_mult).map(|r| r[col]).collect();
            for row in (0..l.y_count).filter(|r| r % l.y_mult != 0) {
                m[row][col] = lagrange(&ypts, &values, self.y_coordinate(row));
            }
        }
        m
    }

    fn sample_bicubic(&self, probed: &[Vec<f64>]) -> PointMatrix {
        let l = self.layout;
        let tension = self.params.tension;
        let mut m = self.seed_matrix(probed);

        for row in (0..l.y_count).step_by(l.y_mult) {
            let line = m[row].clone();
            for col in (0..l.x_count).filter(|c| c % l.x_mult != 0) {
                let (p, t) = spline_control_points(&line, col, l.x_mult);
                m[row][col] = cardinal_spline(p, t, tension);
            }
        }
        for col in 0..l.x_count {
            let line: Vec<f64> = m.iter().map(|r| r[col]).collect();
            for row in (0..l.y_count).filter(|r| r % l.y_mult != 0) {
                let (p, t) = spline_control_points(&line, row, l.y_mult);
                m[row][col] = cardinal_spline(p, t, tension);
            }
        }
        m
    }
}
