//! Active bed mesh ownership
//!
//! [`MeshProvider`] is everything compensation needs from whoever owns the
//! operational mesh. [`BedMesh`] is the storage-backed owner used by the
//! service.

use serde::Serialize;

use crate::error::{MeshError, StorageError};
use crate::mesh::{GridParams, Mesh, PointMatrix};
use crate::profile::{profile_section, ProfileStore};
use crate::storage::SectionStore;

/// Access to the operational mesh
pub trait MeshProvider {
    /// The mesh currently in use, if any
    fn active_mesh(&self) -> Option<&Mesh>;

    /// Persist `mesh` as the stored profile `name`
    fn save_profile(&mut self, name: &str, mesh: &Mesh) -> Result<(), StorageError>;

    /// Make `mesh` the operational mesh
    fn set_mesh(&mut self, mesh: Mesh);
}

/// Snapshot of the active mesh for status reporting
#[derive(Debug, Clone, Serialize)]
pub struct MeshStatus {
    pub profile_name: String,
    pub params: GridParams,
    pub algorithm: &'static str,
    pub probed_matrix: PointMatrix,
    pub mesh_matrix: PointMatrix,
    pub z_min: f64,
    pub z_max: f64,
}

impl From<&Mesh> for MeshStatus {
    fn from(mesh: &Mesh) -> Self {
        let (z_min, z_max) = mesh.z_range();
        Self {
            profile_name: mesh.profile_name().to_string(),
            params: mesh.params().clone(),
            algorithm: mesh.algorithm().as_str(),
            probed_matrix: mesh.probed_matrix().clone(),
            mesh_matrix: mesh.mesh_matrix().clone(),
            z_min,
            z_max,
        }
    }
}

/// Owner of the operational mesh, persisting profiles to section storage
pub struct BedMesh {
    storage: SectionStore,
    prefix: String,
    z_mesh: Option<Mesh>,
}

impl BedMesh {
    pub fn new(storage: SectionStore, prefix: impl Into<String>) -> Self {
        Self {
            storage,
            prefix: prefix.into(),
            z_mesh: None,
        }
    }

    /// Activate a stored profile. Returns `false` when it does not exist.
    pub fn load_profile(&mut self, profiles: &ProfileStore, name: &str) -> Result<bool, MeshError> {
        match profiles.build_mesh(name)? {
            Some(mesh) => {
                tracing::info!("bed_mesh: activated profile [{}]", name);
                self.z_mesh = Some(mesh);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    #[cfg(test)]
    pub fn clear_mesh(&mut self) {
        self.z_mesh = None;
    }

    pub fn status(&self) -> Option<MeshStatus> {
        self.z_mesh.as_ref().map(MeshStatus::from)
    }
}

impl MeshProvider for BedMesh {
    fn active_mesh(&self) -> Option<&Mesh> {
        self.z_mesh.as_ref()
    }

    fn save_profile(&mut self, name: &str, mesh: &Mesh) -> Result<(), StorageError> {
        self.storage.set_section(profile_section(&self.prefix, name, mesh));
        self.storage.save()?;
        tracing::info!("bed_mesh: profile [{}] saved", name);
        Ok(())
    }

    fn set_mesh(&mut self, mesh: Mesh) {
        self.z_mesh = Some(mesh);
    }
}
