//! Scan compensation
//!
//! Re-samples a trusted contact profile onto the grid of the active scan
//! mesh and writes the result back as the scan mesh's data, removing the
//! non-contact sensor's spatially varying bias.

use serde::Serialize;
use std::sync::Arc;

use crate::bed_mesh::MeshProvider;
use crate::console::{Console, EchoLevel};
use crate::error::CompensationError;
use crate::mesh::{Mesh, PointMatrix};
use crate::profile::ProfileStore;

/// Reference profile used when the command names none
pub const DEFAULT_REFERENCE: &str = "Contact";

const TITLE: &str = "Scan compensation";
const ERROR_TITLE: &str = "Scan compensation error";

/// What a compensation request did
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Outcome {
    /// `profile` was corrected against `reference` and saved
    Compensated { profile: String, reference: String },
    /// No mesh is loaded, nothing to correct
    NoActiveMesh,
    /// The active mesh is the reference itself
    AlreadyReference { profile: String },
    /// The corrected mesh could not be installed or saved
    Failed { reason: String },
}

impl Outcome {
    pub fn message(&self) -> String {
        match self {
            Outcome::Compensated { profile, reference } => format!(
                "Mesh scan profile {} compensated with contact profile {}",
                profile, reference
            ),
            Outcome::NoActiveMesh => "No active mesh to compensate".to_string(),
            Outcome::AlreadyReference { profile } => {
                format!("Active mesh {} is the reference profile, nothing to do", profile)
            }
            Outcome::Failed { reason } => reason.clone(),
        }
    }
}

/// Command handler applying a contact profile to the active mesh
#[derive(Clone)]
pub struct ScanCompensation {
    profiles: Arc<ProfileStore>,
    default_reference: String,
}

impl ScanCompensation {
    pub fn new(profiles: Arc<ProfileStore>, default_reference: impl Into<String>) -> Self {
        Self {
            profiles,
            default_reference: default_reference.into(),
        }
    }

    pub fn profiles(&self) -> &ProfileStore {
        &self.profiles
    }

    pub fn default_reference(&self) -> &str {
        &self.default_reference
    }

    /// Handle the `PROFILE` argument of an apply request
    pub fn cmd_apply(
        &self,
        profile: Option<&str>,
        provider: &mut impl MeshProvider,
        console: &mut impl Console,
    ) -> Result<Outcome, CompensationError> {
        let profile = profile.unwrap_or(&self.default_reference);
        compensate(&self.profiles, profile, provider, console)
    }
}

/// Correct the active mesh against the stored profile `reference`.
///
/// Argument and lookup problems are returned as errors. Failing to install
/// or save the corrected mesh is reported on the console and returned as
/// [`Outcome::Failed`].
pub fn compensate(
    profiles: &ProfileStore,
    reference: &str,
    provider: &mut impl MeshProvider,
    console: &mut impl Console,
) -> Result<Outcome, CompensationError> {
    if reference.trim().is_empty() {
        return Err(CompensationError::InvalidArgument);
    }
    if profiles.get_profile(reference).is_none() {
        return Err(CompensationError::ProfileNotFound(reference.to_string()));
    }

    let Some(active) = provider.active_mesh() else {
        tracing::debug!("No active mesh, skipping scan compensation");
        return Ok(Outcome::NoActiveMesh);
    };
    let profile_name = active.profile_name().to_string();
    if profile_name == reference {
        tracing::debug!("Active mesh is already [{}], skipping", reference);
        return Ok(Outcome::AlreadyReference {
            profile: profile_name,
        });
    }

    let contact_mesh = profiles
        .build_mesh(reference)
        .map_err(|source| CompensationError::ProfileLoad {
            profile: reference.to_string(),
            source,
        })?
        .ok_or_else(|| CompensationError::ProfileNotFound(reference.to_string()))?;

    let new_points = compensated_points(active, &contact_mesh);

    let mut mesh = active.clone();
    if let Err(e) = mesh.rebuild(new_points) {
        return Ok(report_failure(console, e.to_string()));
    }
    if let Err(e) = provider.save_profile(&profile_name, &mesh) {
        return Ok(report_failure(console, e.to_string()));
    }
    provider.set_mesh(mesh);

    let outcome = Outcome::Compensated {
        profile: profile_name,
        reference: reference.to_string(),
    };
    console.echo(EchoLevel::Debug, TITLE, &outcome.message());
    Ok(outcome)
}

/// Sample `contact` at every probed position of `active`.
///
/// The correction subtracts the sensor offset `z - contact_z` from each
/// scanned value, which leaves the contact height at that position.
pub fn compensated_points(active: &Mesh, contact: &Mesh) -> PointMatrix {
    let params = active.params();
    let points = active.probed_matrix();
    let rows = points.len();
    let cols = points.first().map_or(0, Vec::len);

    let x_step = (params.max_x - params.min_x) / (cols - 1) as f64;
    let y_step = (params.max_y - params.min_y) / (rows - 1) as f64;

    points
        .iter()
        .enumerate()
        .map(|(y, row)| {
            let y_pos = params.min_y + y as f64 * y_step;
            row.iter()
                .enumerate()
                .map(|(x, &z_val)| {
                    let x_pos = params.min_x + x as f64 * x_step;
                    let contact_z = contact.calc_z(x_pos, y_pos);
                    z_val - (z_val - contact_z)
                })
                .collect()
        })
        .collect()
}

fn report_failure(console: &mut impl Console, reason: String) -> Outcome {
    console.echo(EchoLevel::Error, ERROR_TITLE, &reason);
    Outcome::Failed { reason }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::console::ConsoleLog;
    use crate::error::StorageError;
    use crate::mesh::GridParams;
    use crate::profile::DEFAULT_PREFIX;
    use crate::storage::SectionStore;
    use approx::assert_abs_diff_eq;

    const PROFILES: &str = r#"
["bed_mesh Contact"]
version = 1
points = "1.0, 1.0\n1.0, 1.0"
min_x = 0.0
max_x = 10.0
min_y = 0.0
max_y = 10.0
x_count = 2
y_count = 2
mesh_x_pps = 0
mesh_y_pps = 0
algo = "direct"
tension = 0.2

["bed_mesh Tilted"]
version = 1
points = "0.0, 1.0\n2.0, 3.0"
min_x = 0.0
max_x = 10.0
min_y = 0.0
max_y = 10.0
x_count = 2
y_count = 2
mesh_x_pps = 0
mesh_y_pps = 0
algo = "direct"
tension = 0.2

["bed_mesh Broken"]
version = 1
points = "1.0, 1.0, 1.0\n1.0, 1.0"
min_x = 0.0
max_x = 10.0
min_y = 0.0
max_y = 10.0
x_count = 3
y_count = 2
mesh_x_pps = 0
mesh_y_pps = 0
algo = "direct"
tension = 0.2
"#;

    /// In-memory mesh owner recording what it was asked to do
    #[derive(Default)]
    struct FakeBedMesh {
        mesh: Option<Mesh>,
        saved: Vec<(String, PointMatrix)>,
        activations: usize,
        fail_save: bool,
    }

    impl MeshProvider for FakeBedMesh {
        fn active_mesh(&self) -> Option<&Mesh> {
            self.mesh.as_ref()
        }

        fn save_profile(&mut self, name: &str, mesh: &Mesh) -> Result<(), StorageError> {
            if self.fail_save {
                return Err(StorageError::Io(std::io::Error::new(
                    std::io::ErrorKind::PermissionDenied,
                    "read-only storage",
                )));
            }
            self.saved.push((name.to_string(), mesh.probed_matrix().clone()));
            Ok(())
        }

        fn set_mesh(&mut self, mesh: Mesh) {
            self.mesh = Some(mesh);
            self.activations += 1;
        }
    }

    fn profiles() -> ProfileStore {
        let storage = SectionStore::parse(PROFILES).unwrap();
        ProfileStore::load(&storage, DEFAULT_PREFIX).unwrap()
    }

    fn scan_mesh(name: &str, count: usize, z: f64) -> Mesh {
        let params = GridParams::direct((0.0, 0.0), (10.0, 10.0), count, count);
        Mesh::build(params, name, vec![vec![z; count]; count]).unwrap()
    }

    fn provider_with(mesh: Mesh) -> FakeBedMesh {
        FakeBedMesh {
            mesh: Some(mesh),
            ..Default::default()
        }
    }

    #[test]
    fn test_compensates_against_constant_contact() {
        let profiles = profiles();
        let mut provider = provider_with(scan_mesh("scan", 3, 5.0));
        let mut console = ConsoleLog::new(10);

        let outcome = compensate(&profiles, "Contact", &mut provider, &mut console).unwrap();

        assert_eq!(
            outcome,
            Outcome::Compensated {
                profile: "scan".to_string(),
                reference: "Contact".to_string()
            }
        );
        let mesh = provider.active_mesh().unwrap();
        assert_eq!(mesh.profile_name(), "scan");
        assert_eq!(mesh.probed_matrix(), &vec![vec![1.0; 3]; 3]);
        assert_eq!(provider.saved, vec![("scan".to_string(), vec![vec![1.0; 3]; 3])]);
        assert_eq!(provider.activations, 1);

        let messages: Vec<_> = console.messages().collect();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].level, EchoLevel::Debug);
        assert_eq!(
            messages[0].message,
            "Mesh scan profile scan compensated with contact profile Contact"
        );
    }

    #[test]
    fn test_result_equals_contact_height_at_each_cell() {
        let profiles = profiles();
        let contact = profiles.build_mesh("Tilted").unwrap().unwrap();
        let active = scan_mesh("scan", 5, 2.0);

        let points = compensated_points(&active, &contact);
        assert_eq!(points.len(), 5);

        for (y, row) in points.iter().enumerate() {
            assert_eq!(row.len(), 5);
            for (x, &z) in row.iter().enumerate() {
                let contact_z = contact.calc_z(x as f64 * 2.5, y as f64 * 2.5);
                assert_abs_diff_eq!(z, contact_z, epsilon = 1e-12);
            }
        }
        // Bilinear plane 0.1 * x + 0.2 * y at the grid corners and centre
        assert_abs_diff_eq!(points[0][0], 0.0, epsilon = 1e-12);
        assert_abs_diff_eq!(points[4][4], 3.0, epsilon = 1e-12);
        assert_abs_diff_eq!(points[2][2], 1.5, epsilon = 1e-12);
    }

    #[test]
    fn test_active_mesh_already_reference() {
        let profiles = profiles();
        let mut provider = provider_with(scan_mesh("Contact", 3, 5.0));
        let mut console = ConsoleLog::new(10);

        let outcome = compensate(&profiles, "Contact", &mut provider, &mut console).unwrap();

        assert!(matches!(outcome, Outcome::AlreadyReference { .. }));
        assert_eq!(provider.active_mesh().unwrap().probed_matrix(), &vec![vec![5.0; 3]; 3]);
        assert!(provider.saved.is_empty());
        assert_eq!(provider.activations, 0);
    }

    #[test]
    fn test_no_active_mesh() {
        let profiles = profiles();
        let mut provider = FakeBedMesh::default();
        let mut console = ConsoleLog::new(10);

        let outcome = compensate(&profiles, "Contact", &mut provider, &mut console).unwrap();

        assert_eq!(outcome, Outcome::NoActiveMesh);
        assert!(provider.mesh.is_none());
        assert!(provider.saved.is_empty());
        assert_eq!(console.messages().count(), 0);
    }

    #[test]
    fn test_blank_profile() {
        let profiles = profiles();
        let mut console = ConsoleLog::new(10);

        for blank in ["", "   "] {
            let mut provider = provider_with(scan_mesh("scan", 3, 5.0));
            let err = compensate(&profiles, blank, &mut provider, &mut console).unwrap_err();
            assert!(matches!(err, CompensationError::InvalidArgument));
            assert_eq!(provider.active_mesh().unwrap().probed_matrix(), &vec![vec![5.0; 3]; 3]);
            assert!(provider.saved.is_empty());
        }
    }

    #[test]
    fn test_unknown_profile() {
        let profiles = profiles();
        let mut provider = provider_with(scan_mesh("scan", 3, 5.0));
        let mut console = ConsoleLog::new(10);

        let err = compensate(&profiles, "DoesNotExist", &mut provider, &mut console).unwrap_err();

        assert!(matches!(err, CompensationError::ProfileNotFound(ref p) if p == "DoesNotExist"));
        assert_eq!(provider.active_mesh().unwrap().probed_matrix(), &vec![vec![5.0; 3]; 3]);
        assert!(provider.saved.is_empty());
    }

    #[test]
    fn test_reference_fails_to_build() {
        let profiles = profiles();
        let mut provider = provider_with(scan_mesh("scan", 3, 5.0));
        let mut console = ConsoleLog::new(10);

        let err = compensate(&profiles, "Broken", &mut provider, &mut console).unwrap_err();

        assert!(matches!(err, CompensationError::ProfileLoad { .. }));
        assert!(provider.saved.is_empty());
    }

    #[test]
    fn test_save_failure_is_reported() {
        let profiles = profiles();
        let mut provider = provider_with(scan_mesh("scan", 3, 5.0));
        provider.fail_save = true;
        let mut console = ConsoleLog::new(10);

        let outcome = compensate(&profiles, "Contact", &mut provider, &mut console).unwrap();

        assert!(matches!(outcome, Outcome::Failed { .. }));
        assert_eq!(provider.activations, 0);
        assert_eq!(provider.active_mesh().unwrap().probed_matrix(), &vec![vec![5.0; 3]; 3]);

        let messages: Vec<_> = console.messages().collect();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].level, EchoLevel::Error);
        assert_eq!(messages[0].title, ERROR_TITLE);
    }

    #[test]
    fn test_cmd_apply_uses_default_reference() {
        let handler = ScanCompensation::new(Arc::new(profiles()), DEFAULT_REFERENCE);
        let mut provider = provider_with(scan_mesh("scan", 2, 0.5));
        let mut console = ConsoleLog::new(10);

        let outcome = handler.cmd_apply(None, &mut provider, &mut console).unwrap();

        assert!(matches!(
            outcome,
            Outcome::Compensated { ref reference, .. } if reference == "Contact"
        ));
        assert_eq!(provider.active_mesh().unwrap().probed_matrix(), &vec![vec![1.0; 2]; 2]);
    }
}
