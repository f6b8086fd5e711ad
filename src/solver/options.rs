use crate::solver::eqn::PressureEqn;
use crate::solver::error::CouplingError;
use crate::solver::fields::{FaceField, VectorField};
use crate::solver::mesh::Mesh;
use nalgebra::Vector2;

/// Field names the coupling core assembles equations for. A provider
/// targeting anything else is a configuration error.
pub const COUPLED_FIELDS: &[&str] = &["p", "U", "rho"];

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SourceError {
    #[error("source '{source_name}' targets unknown field '{field}'")]
    UnknownField { source_name: String, field: String },
}

/// External source/constraint provider.
///
/// One provider participates at up to four call sites, each with its own
/// contract:
///
/// * [`make_relative`]: adjust the interpolated density / provisional
///   flux pair for reference-frame motion, before equation assembly;
/// * [`add_source`]: add mass-rate contributions into the equation whose
///   field name matches [`target_field`];
/// * [`constrain`]: impose hard constraints (fixed-value regions) on the
///   assembled matrix before it is solved;
/// * [`correct_velocity`]: final adjustment of the reconstructed
///   velocity.
///
/// All methods default to no-ops so a provider only implements the sites
/// it participates in.
///
/// [`make_relative`]: SourceProvider::make_relative
/// [`add_source`]: SourceProvider::add_source
/// [`constrain`]: SourceProvider::constrain
/// [`correct_velocity`]: SourceProvider::correct_velocity
/// [`target_field`]: SourceProvider::target_field
pub trait SourceProvider {
    fn name(&self) -> &str;

    /// Name of the field whose equation this provider feeds.
    fn target_field(&self) -> &str;

    fn make_relative(&self, _mesh: &Mesh, _rho_f: &FaceField, _phi: &mut FaceField) {}

    fn add_source(&self, _mesh: &Mesh, _eqn: &mut PressureEqn) {}

    fn constrain(&self, _mesh: &Mesh, _eqn: &mut PressureEqn) -> Result<(), CouplingError> {
        Ok(())
    }

    fn correct_velocity(&self, _mesh: &Mesh, _u: &mut VectorField) {}
}

/// Registered source providers, applied in registration order.
#[derive(Default)]
pub struct SourceRegistry {
    providers: Vec<Box<dyn SourceProvider>>,
}

impl SourceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<P: SourceProvider + 'static>(&mut self, provider: P) {
        self.providers.push(Box::new(provider));
    }

    pub fn len(&self) -> usize {
        self.providers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }

    pub fn names(&self) -> Vec<&str> {
        self.providers.iter().map(|p| p.name()).collect()
    }

    /// Check every provider against the set of fields the core solves
    /// for. Call once at setup; a mismatch is fatal.
    pub fn validate(&self, known_fields: &[&str]) -> Result<(), SourceError> {
        for p in &self.providers {
            if !known_fields.contains(&p.target_field()) {
                return Err(SourceError::UnknownField {
                    source_name: p.name().to_string(),
                    field: p.target_field().to_string(),
                });
            }
        }
        Ok(())
    }

    /// Flux-adjustment hook, run on the interpolated density and the
    /// provisional flux before the pressure equation sees them.
    pub fn make_relative(&self, mesh: &Mesh, rho_f: &FaceField, phi: &mut FaceField) {
        for p in &self.providers {
            p.make_relative(mesh, rho_f, phi);
        }
    }

    /// Add source contributions into `eqn`. A provider targeting a field
    /// the core never assembles aborts the run.
    pub fn apply_sources(
        &self,
        mesh: &Mesh,
        eqn: &mut PressureEqn,
        known_fields: &[&str],
    ) -> Result<(), SourceError> {
        for p in &self.providers {
            if p.target_field() == eqn.field() {
                p.add_source(mesh, eqn);
            } else if !known_fields.contains(&p.target_field()) {
                return Err(SourceError::UnknownField {
                    source_name: p.name().to_string(),
                    field: p.target_field().to_string(),
                });
            }
        }
        Ok(())
    }

    /// Apply hard constraints onto the assembled equation.
    pub fn constrain(&self, mesh: &Mesh, eqn: &mut PressureEqn) -> Result<(), CouplingError> {
        for p in &self.providers {
            if p.target_field() == eqn.field() {
                p.constrain(mesh, eqn)?;
            }
        }
        Ok(())
    }

    /// Post-solve velocity correction hook.
    pub fn correct_velocity(&self, mesh: &Mesh, u: &mut VectorField) {
        for p in &self.providers {
            p.correct_velocity(mesh, u);
        }
    }
}

/// Uniform volumetric mass source over the whole domain (kg m^-3 s^-1).
pub struct UniformMassSource {
    pub name: String,
    pub rate: f64,
}

impl SourceProvider for UniformMassSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn target_field(&self) -> &str {
        "p"
    }

    fn add_source(&self, mesh: &Mesh, eqn: &mut PressureEqn) {
        for i in 0..mesh.num_cells() {
            eqn.add_rhs(i, self.rate * mesh.cell_vol[i]);
        }
    }
}

/// Fixed-pressure region: pins the listed cells to `value`.
pub struct FixedPressureZone {
    pub name: String,
    pub cells: Vec<usize>,
    pub value: f64,
}

impl SourceProvider for FixedPressureZone {
    fn name(&self) -> &str {
        &self.name
    }

    fn target_field(&self) -> &str {
        "p"
    }

    fn constrain(&self, _mesh: &Mesh, eqn: &mut PressureEqn) -> Result<(), CouplingError> {
        for &c in &self.cells {
            eqn.fix_value(c, self.value)?;
        }
        Ok(())
    }
}

/// Reference-frame motion: makes the provisional flux relative to a frame
/// moving at `frame_velocity` by removing the frame's mass flux through
/// every face.
pub struct MovingFrameFlux {
    pub name: String,
    pub frame_velocity: [f64; 2],
}

impl SourceProvider for MovingFrameFlux {
    fn name(&self) -> &str {
        &self.name
    }

    fn target_field(&self) -> &str {
        "U"
    }

    fn make_relative(&self, mesh: &Mesh, rho_f: &FaceField, phi: &mut FaceField) {
        let v = Vector2::new(self.frame_velocity[0], self.frame_velocity[1]);
        for f in 0..mesh.num_faces() {
            phi.values[f] -= rho_f.values[f] * v.dot(&mesh.face_sf(f));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::solver::fields::ScalarField;

    struct BadProvider;

    impl SourceProvider for BadProvider {
        fn name(&self) -> &str {
            "bad"
        }
        fn target_field(&self) -> &str {
            "temperature"
        }
    }

    #[test]
    fn validate_rejects_unknown_target() {
        let mut reg = SourceRegistry::new();
        reg.register(BadProvider);
        let err = reg.validate(COUPLED_FIELDS).unwrap_err();
        assert_eq!(
            err,
            SourceError::UnknownField {
                source_name: "bad".into(),
                field: "temperature".into()
            }
        );
    }

    #[test]
    fn apply_sources_rejects_unknown_target() {
        let mesh = Mesh::closed_box(2, 2, 1.0, 1.0);
        let mut reg = SourceRegistry::new();
        reg.register(BadProvider);
        let mut eqn = PressureEqn::new(&mesh, "p");
        assert!(reg.apply_sources(&mesh, &mut eqn, COUPLED_FIELDS).is_err());
    }

    #[test]
    fn mass_source_feeds_pressure_equation_only() {
        let mesh = Mesh::closed_box(2, 2, 1.0, 1.0);
        let mut reg = SourceRegistry::new();
        reg.register(UniformMassSource {
            name: "parcels".into(),
            rate: 3.0,
        });
        reg.register(MovingFrameFlux {
            name: "frame".into(),
            frame_velocity: [1.0, 0.0],
        });

        let mut eqn = PressureEqn::new(&mesh, "p");
        // put a known implicit term so rhs checks are meaningful
        let psi = ScalarField::new(4, 1.0);
        let p = ScalarField::zeros(4);
        eqn.ddt_pressure_correction(&mesh, &psi, &p, 1.0);
        reg.apply_sources(&mesh, &mut eqn, COUPLED_FIELDS).unwrap();
        eqn.finalize(&mesh).unwrap();
        let bc = crate::solver::fields::BoundaryPolicy::zero_gradient();
        let gamma = FaceField::zeros(mesh.num_faces());
        eqn.refresh_non_orthogonal(&mesh, &gamma, &p, &bc);
        // each cell: rate * volume = 3.0 * 0.25
        for v in eqn.rhs() {
            assert!((v - 0.75).abs() < 1e-12);
        }
    }

    #[test]
    fn frame_flux_removed_per_face() {
        let mesh = Mesh::closed_box(2, 1, 2.0, 1.0);
        let reg = {
            let mut r = SourceRegistry::new();
            r.register(MovingFrameFlux {
                name: "frame".into(),
                frame_velocity: [2.0, 0.0],
            });
            r
        };
        let rho_f = FaceField::new(mesh.num_faces(), 1.0);
        let mut phi = FaceField::zeros(mesh.num_faces());
        reg.make_relative(&mesh, &rho_f, &mut phi);
        for f in 0..mesh.num_faces() {
            let expected = -2.0 * mesh.face_sf(f).x;
            assert!((phi.values[f] - expected).abs() < 1e-12);
        }
    }
}
