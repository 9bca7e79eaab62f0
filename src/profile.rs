//! Stored calibration profiles
//!
//! Profiles live in sections named `<prefix> <name>`, e.g.
//! `bed_mesh Contact`. Each holds a schema `version`, the probed `points`
//! and one option per grid parameter. Profiles written by a different schema
//! version are skipped and reported rather than failing the load.

use serde::Serialize;
use std::collections::BTreeMap;

use crate::error::{ConfigError, MeshError};
use crate::mesh::{GridParams, Mesh, MeshAlgorithm, PointMatrix};
use crate::storage::{Section, SectionStore};

/// Schema version written by and accepted from storage
pub const PROFILE_VERSION: i64 = 1;

/// Default section namespace for profiles
pub const DEFAULT_PREFIX: &str = "bed_mesh";

/// A named, versioned calibration record
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Profile {
    pub name: String,
    pub schema_version: i64,
    pub grid_params: GridParams,
    pub points: PointMatrix,
}

/// Outcome of reading every profile section
#[derive(Debug, Clone, Default)]
pub struct LoadedProfiles {
    pub compatible: BTreeMap<String, Profile>,
    /// Names of profiles stored with another schema version
    pub incompatible: Vec<String>,
}

type FieldParser = fn(&Section, &str, &mut GridParams) -> Result<(), ConfigError>;

/// Grid parameter options and how each is parsed
fn profile_options() -> [(&'static str, FieldParser); 10] {
    [
        ("min_x", |s, k, p| {
            p.min_x = s.get_float(k)?;
            Ok(())
        }),
        ("max_x", |s, k, p| {
            p.max_x = s.get_float(k)?;
            Ok(())
        }),
        ("min_y", |s, k, p| {
            p.min_y = s.get_float(k)?;
            Ok(())
        }),
        ("max_y", |s, k, p| {
            p.max_y = s.get_float(k)?;
            Ok(())
        }),
        ("x_count", |s, k, p| {
            p.x_count = get_count(s, k)?;
            Ok(())
        }),
        ("y_count", |s, k, p| {
            p.y_count = get_count(s, k)?;
            Ok(())
        }),
        ("mesh_x_pps", |s, k, p| {
            p.mesh_x_pps = get_count(s, k)?;
            Ok(())
        }),
        ("mesh_y_pps", |s, k, p| {
            p.mesh_y_pps = get_count(s, k)?;
            Ok(())
        }),
        ("algo", |s, k, p| {
            p.algo = get_algorithm(s, k)?;
            Ok(())
        }),
        ("tension", |s, k, p| {
            p.tension = s.get_float(k)?;
            Ok(())
        }),
    ]
}

fn get_count(section: &Section, option: &str) -> Result<usize, ConfigError> {
    let value = section.get_int(option)?;
    usize::try_from(value).map_err(|_| ConfigError::InvalidValue {
        section: section.name().to_string(),
        option: option.to_string(),
        reason: format!("{} must not be negative", value),
    })
}

fn get_algorithm(section: &Section, option: &str) -> Result<MeshAlgorithm, ConfigError> {
    section
        .get(option)?
        .parse()
        .map_err(|e: MeshError| ConfigError::InvalidValue {
            section: section.name().to_string(),
            option: option.to_string(),
            reason: e.to_string(),
        })
}

/// Read-only table of compatible profiles
#[derive(Debug, Clone, Default)]
pub struct ProfileStore {
    profiles: BTreeMap<String, Profile>,
    incompatible: Vec<String>,
}

impl ProfileStore {
    /// Load every profile found under `prefix`
    pub fn load(storage: &SectionStore, prefix: &str) -> Result<Self, ConfigError> {
        let LoadedProfiles {
            compatible,
            incompatible,
        } = load_all(storage, prefix)?;

        tracing::info!(
            "Loaded {} profile(s), {} incompatible",
            compatible.len(),
            incompatible.len()
        );

        Ok(Self {
            profiles: compatible,
            incompatible,
        })
    }

    pub fn get_profiles(&self) -> &BTreeMap<String, Profile> {
        &self.profiles
    }

    pub fn get_profile(&self, name: &str) -> Option<&Profile> {
        self.profiles.get(name)
    }

    pub fn incompatible_profiles(&self) -> &[String] {
        &self.incompatible
    }

    /// Build a fresh mesh from a stored profile.
    /// Returns `Ok(None)` when no compatible profile has that name.
    pub fn build_mesh(&self, name: &str) -> Result<Option<Mesh>, MeshError> {
        let Some(profile) = self.profiles.get(name) else {
            return Ok(None);
        };
        Mesh::build(profile.grid_params.clone(), name, profile.points.clone()).map(Some)
    }
}

/// Read every profile section under `prefix`, excluding the bare `prefix`
/// section itself.
pub fn load_all(storage: &SectionStore, prefix: &str) -> Result<LoadedProfiles, ConfigError> {
    let mut loaded = LoadedProfiles::default();

    for section in storage.prefix_sections(prefix) {
        if section.name() == prefix {
            continue;
        }
        let Some((_, name)) = section.name().split_once(' ') else {
            tracing::warn!("Ignoring section [{}] without a profile name", section.name());
            continue;
        };
        let name = name.trim().to_string();

        let version = section.get_int_or("version", 0)?;
        if version != PROFILE_VERSION {
            tracing::info!(
                "{}: Profile [{}] not compatible with this version. \
                 Profile Version: {} Current Version: {}",
                prefix,
                name,
                version,
                PROFILE_VERSION
            );
            loaded.incompatible.push(name);
            continue;
        }

        let profile = parse_profile(section, name.clone(), version)?;
        loaded.compatible.insert(name, profile);
    }

    Ok(loaded)
}

fn parse_profile(section: &Section, name: String, version: i64) -> Result<Profile, ConfigError> {
    let points = section.get_lists("points")?;

    let mut grid_params = GridParams::default();
    for (option, parse) in profile_options() {
        parse(section, option, &mut grid_params)?;
    }

    Ok(Profile {
        name,
        schema_version: version,
        grid_params,
        points,
    })
}

/// Serialize a mesh into the section it is stored as
pub fn profile_section(prefix: &str, name: &str, mesh: &Mesh) -> Section {
    let mut section = Section::new(format!("{} {}", prefix, name));
    section.set("version", PROFILE_VERSION);

    let points: String = mesh
        .probed_matrix()
        .iter()
        .map(|row| {
            let row: Vec<String> = row.iter().map(|z| format!("{:.6}", z)).collect();
            format!("\n  {}", row.join(", "))
        })
        .collect();
    section.set("points", points);

    let p = mesh.params();
    section.set("min_x", p.min_x);
    section.set("max_x", p.max_x);
    section.set("min_y", p.min_y);
    section.set("max_y", p.max_y);
    section.set("x_count", p.x_count);
    section.set("y_count", p.y_count);
    section.set("mesh_x_pps", p.mesh_x_pps);
    section.set("mesh_y_pps", p.mesh_y_pps);
    section.set("algo", p.algo.as_str());
    section.set("tension", p.tension);
    section
}
