use crate::solver::mesh::BoundaryType;
use nalgebra::Vector2;
use serde::{Deserialize, Serialize};
use wide::f64x4;

/// Cell-centered scalar values, indexed by cell id.
#[derive(Clone, Debug, PartialEq)]
pub struct ScalarField {
    pub values: Vec<f64>,
}

impl ScalarField {
    pub fn new(n: usize, val: f64) -> Self {
        Self {
            values: vec![val; n],
        }
    }

    pub fn zeros(n: usize) -> Self {
        Self::new(n, 0.0)
    }

    pub fn from_fn<F: FnMut(usize) -> f64>(n: usize, f: F) -> Self {
        Self {
            values: (0..n).map(f).collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn min(&self) -> f64 {
        self.values.iter().copied().fold(f64::INFINITY, f64::min)
    }

    pub fn max(&self) -> f64 {
        self.values
            .iter()
            .copied()
            .fold(f64::NEG_INFINITY, f64::max)
    }

    /// Elementwise clip to `[lo, hi]`. Out-of-range values are expected
    /// during iteration and clipped without any error.
    pub fn clamp_range(&mut self, lo: f64, hi: f64) {
        for v in &mut self.values {
            *v = v.clamp(lo, hi);
        }
    }
}

/// Cell-centered vector values, stored SoA like the rest of the solver.
#[derive(Clone, Debug, PartialEq)]
pub struct VectorField {
    pub vx: Vec<f64>,
    pub vy: Vec<f64>,
}

impl VectorField {
    pub fn new(n: usize, val: Vector2<f64>) -> Self {
        Self {
            vx: vec![val.x; n],
            vy: vec![val.y; n],
        }
    }

    pub fn zeros(n: usize) -> Self {
        Self::new(n, Vector2::zeros())
    }

    pub fn len(&self) -> usize {
        self.vx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vx.is_empty()
    }

    pub fn at(&self, i: usize) -> Vector2<f64> {
        Vector2::new(self.vx[i], self.vy[i])
    }

    pub fn set(&mut self, i: usize, v: Vector2<f64>) {
        self.vx[i] = v.x;
        self.vy[i] = v.y;
    }
}

/// Face-centered scalar values (mass fluxes, interpolated coefficients),
/// indexed by face id. Kept distinct from [`ScalarField`] so cell and face
/// data cannot be mixed up.
#[derive(Clone, Debug, PartialEq)]
pub struct FaceField {
    pub values: Vec<f64>,
}

impl FaceField {
    pub fn new(n: usize, val: f64) -> Self {
        Self {
            values: vec![val; n],
        }
    }

    pub fn zeros(n: usize) -> Self {
        Self::new(n, 0.0)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// Boundary treatment of a scalar field on one patch type.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub enum BcValue {
    FixedValue(f64),
    ZeroGradient,
}

/// Per-patch boundary metadata for a scalar field. The discrete operators
/// look values up through [`BoundaryPolicy::value_for`]: `Some` means
/// Dirichlet, `None` means zero-gradient, matching how boundary closures
/// are interpreted throughout the solver.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct BoundaryPolicy {
    pub inlet: BcValue,
    pub outlet: BcValue,
    pub wall: BcValue,
}

impl BoundaryPolicy {
    pub fn uniform(bc: BcValue) -> Self {
        Self {
            inlet: bc,
            outlet: bc,
            wall: bc,
        }
    }

    pub fn zero_gradient() -> Self {
        Self::uniform(BcValue::ZeroGradient)
    }

    pub fn value_for(&self, bt: BoundaryType) -> Option<f64> {
        let bc = match bt {
            BoundaryType::Inlet => self.inlet,
            BoundaryType::Outlet => self.outlet,
            BoundaryType::Wall => self.wall,
        };
        match bc {
            BcValue::FixedValue(v) => Some(v),
            BcValue::ZeroGradient => None,
        }
    }
}

/// Boundary treatment of a vector field on one patch type.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub enum BcVector {
    FixedValue([f64; 2]),
    ZeroGradient,
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct VectorBoundaryPolicy {
    pub inlet: BcVector,
    pub outlet: BcVector,
    pub wall: BcVector,
}

impl VectorBoundaryPolicy {
    pub fn uniform(bc: BcVector) -> Self {
        Self {
            inlet: bc,
            outlet: bc,
            wall: bc,
        }
    }

    /// No-slip walls, zero-gradient elsewhere.
    pub fn no_slip() -> Self {
        Self {
            inlet: BcVector::ZeroGradient,
            outlet: BcVector::ZeroGradient,
            wall: BcVector::FixedValue([0.0, 0.0]),
        }
    }

    pub fn value_for(&self, bt: BoundaryType) -> Option<Vector2<f64>> {
        let bc = match bt {
            BoundaryType::Inlet => self.inlet,
            BoundaryType::Outlet => self.outlet,
            BoundaryType::Wall => self.wall,
        };
        match bc {
            BcVector::FixedValue(v) => Some(Vector2::new(v[0], v[1])),
            BcVector::ZeroGradient => None,
        }
    }
}

/// Momentum-predictor output consumed by the pressure corrector.
///
/// `a_diag` is the momentum matrix diagonal per unit cell volume; `h` is
/// the velocity implied by the off-diagonal, transient and source momentum
/// terms alone. Both come from an external momentum assembly and are
/// treated as frozen input during one corrector call.
#[derive(Clone, Debug)]
pub struct MomentumCoeffs {
    pub a_diag: ScalarField,
    pub h: VectorField,
}

impl MomentumCoeffs {
    pub fn new(a_diag: ScalarField, h: VectorField) -> Self {
        Self { a_diag, h }
    }

    /// `rAU = 1/A()`, the pressure-gradient scaling of the correction.
    pub fn reciprocal_a(&self) -> ScalarField {
        ScalarField {
            values: self.a_diag.values.iter().map(|&a| 1.0 / a).collect(),
        }
    }
}

/// All fields mutated by the coupling core, owned by the time-step driver
/// and lent to the corrector for the duration of one outer iteration.
///
/// `*_old` holds the previous time level; [`FlowState::store_old`] must be
/// called by the driver once per time step, before the first outer
/// iteration. `rho_thermo` is the thermodynamic density working copy that
/// the two-phase density update manipulates around the pressure solve.
#[derive(Clone, Debug)]
pub struct FlowState {
    pub p: ScalarField,
    pub p_old: ScalarField,
    pub u: VectorField,
    pub u_old: VectorField,
    pub rho: ScalarField,
    pub rho_old: ScalarField,
    pub rho_thermo: ScalarField,
    pub phi: FaceField,
    pub phi_old: FaceField,
    pub k: ScalarField,
    pub dpdt: ScalarField,
}

impl FlowState {
    pub fn new(n_cells: usize, n_faces: usize) -> Self {
        Self {
            p: ScalarField::zeros(n_cells),
            p_old: ScalarField::zeros(n_cells),
            u: VectorField::zeros(n_cells),
            u_old: VectorField::zeros(n_cells),
            rho: ScalarField::zeros(n_cells),
            rho_old: ScalarField::zeros(n_cells),
            rho_thermo: ScalarField::zeros(n_cells),
            phi: FaceField::zeros(n_faces),
            phi_old: FaceField::zeros(n_faces),
            k: ScalarField::zeros(n_cells),
            dpdt: ScalarField::zeros(n_cells),
        }
    }

    pub fn n_cells(&self) -> usize {
        self.p.len()
    }

    pub fn n_faces(&self) -> usize {
        self.phi.len()
    }

    /// Advance the time levels: current values become the `*_old` ones.
    pub fn store_old(&mut self) {
        self.p_old.values.copy_from_slice(&self.p.values);
        self.rho_old.values.copy_from_slice(&self.rho.values);
        self.u_old.vx.copy_from_slice(&self.u.vx);
        self.u_old.vy.copy_from_slice(&self.u.vy);
        self.phi_old.values.copy_from_slice(&self.phi.values);
    }
}

/// `y[i] = a[i] * b[i]` over a SIMD span, scalar tail.
pub fn hadamard(a: &[f64], b: &[f64], y: &mut [f64]) {
    let n = y.len();
    let mut i = 0;
    while i + 4 <= n {
        let va = f64x4::from(&a[i..i + 4]);
        let vb = f64x4::from(&b[i..i + 4]);
        let arr: [f64; 4] = (va * vb).into();
        y[i..i + 4].copy_from_slice(&arr);
        i += 4;
    }
    while i < n {
        y[i] = a[i] * b[i];
        i += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::solver::mesh::BoundaryType;

    #[test]
    fn scalar_field_clamp() {
        let mut f = ScalarField {
            values: vec![-1.0, 0.5, 7.0],
        };
        f.clamp_range(0.0, 2.0);
        assert_eq!(f.values, vec![0.0, 0.5, 2.0]);
    }

    #[test]
    fn boundary_policy_lookup() {
        let bc = BoundaryPolicy {
            inlet: BcValue::ZeroGradient,
            outlet: BcValue::FixedValue(1.5),
            wall: BcValue::ZeroGradient,
        };
        assert_eq!(bc.value_for(BoundaryType::Outlet), Some(1.5));
        assert_eq!(bc.value_for(BoundaryType::Inlet), None);
        assert_eq!(bc.value_for(BoundaryType::Wall), None);
    }

    #[test]
    fn vector_policy_no_slip() {
        let bc = VectorBoundaryPolicy::no_slip();
        let wall = bc.value_for(BoundaryType::Wall).unwrap();
        assert_eq!(wall, Vector2::new(0.0, 0.0));
        assert!(bc.value_for(BoundaryType::Outlet).is_none());
    }

    #[test]
    fn store_old_copies_all_time_levels() {
        let mut state = FlowState::new(3, 5);
        state.p.values[1] = 4.0;
        state.rho.values[2] = 1.2;
        state.phi.values[4] = -0.3;
        state.u.vx[0] = 2.0;
        state.store_old();
        assert_eq!(state.p_old.values[1], 4.0);
        assert_eq!(state.rho_old.values[2], 1.2);
        assert_eq!(state.phi_old.values[4], -0.3);
        assert_eq!(state.u_old.vx[0], 2.0);
    }

    #[test]
    fn hadamard_matches_scalar_product() {
        let a: Vec<f64> = (0..11).map(|i| i as f64).collect();
        let b: Vec<f64> = (0..11).map(|i| 0.5 * i as f64).collect();
        let mut y = vec![0.0; 11];
        hadamard(&a, &b, &mut y);
        for i in 0..11 {
            assert_eq!(y[i], a[i] * b[i]);
        }
    }

    #[test]
    fn reciprocal_a() {
        let m = MomentumCoeffs::new(
            ScalarField {
                values: vec![2.0, 4.0],
            },
            VectorField::zeros(2),
        );
        assert_eq!(m.reciprocal_a().values, vec![0.5, 0.25]);
    }

    #[test]
    fn boundary_policy_serde_round_trip() {
        let bc = BoundaryPolicy {
            inlet: BcValue::FixedValue(2.0),
            outlet: BcValue::ZeroGradient,
            wall: BcValue::ZeroGradient,
        };
        let json = serde_json::to_string(&bc).unwrap();
        let back: BoundaryPolicy = serde_json::from_str(&json).unwrap();
        assert_eq!(back.value_for(BoundaryType::Inlet), Some(2.0));
    }
}
