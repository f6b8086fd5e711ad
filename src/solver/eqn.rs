use crate::solver::error::CouplingError;
use crate::solver::fields::{BoundaryPolicy, FaceField, ScalarField};
use crate::solver::fvm::Fvm;
use crate::solver::linear_solver::{
    solve_named, LinearSolver, SolverControls, SolverReport, SparseMatrix,
};
use crate::solver::mesh::Mesh;

/// Implicit pressure-correction equation.
///
/// The equation is assembled in two layers with different lifetimes:
///
/// * the *implicit structure* (matrix diagonal, one Laplacian coefficient
///   per interior face, Dirichlet boundary coefficients) plus every
///   explicit term frozen for the sub-iteration (`rhs_base`), built once
///   per outer iteration and turned into a CSR matrix by [`finalize`];
/// * the *non-orthogonal correction*, the only part that changes between
///   correction passes, recomputed by [`refresh_non_orthogonal`] into the
///   working right-hand side without touching the matrix.
///
/// [`finalize`]: PressureEqn::finalize
/// [`refresh_non_orthogonal`]: PressureEqn::refresh_non_orthogonal
pub struct PressureEqn {
    field: &'static str,
    diag: Vec<f64>,
    face_coeff: Vec<f64>,
    boundary_coeff: Vec<f64>,
    boundary_value: Vec<f64>,
    rhs_base: Vec<f64>,
    rhs: Vec<f64>,
    nonorth: Vec<f64>,
    constrained: Vec<Option<f64>>,
    matrix: Option<SparseMatrix>,
}

impl PressureEqn {
    pub fn new(mesh: &Mesh, field: &'static str) -> Self {
        let n_cells = mesh.num_cells();
        let n_faces = mesh.num_faces();
        Self {
            field,
            diag: vec![0.0; n_cells],
            face_coeff: vec![0.0; n_faces],
            boundary_coeff: vec![0.0; n_faces],
            boundary_value: vec![0.0; n_faces],
            rhs_base: vec![0.0; n_cells],
            rhs: vec![0.0; n_cells],
            nonorth: vec![0.0; n_faces],
            constrained: vec![None; n_cells],
            matrix: None,
        }
    }

    pub fn field(&self) -> &'static str {
        self.field
    }

    /// Explicit density transient: `d(rho)/dt` integrated over each cell.
    pub fn ddt_density(&mut self, mesh: &Mesh, rho: &ScalarField, rho_old: &ScalarField, dt: f64) {
        for i in 0..mesh.num_cells() {
            self.rhs_base[i] -= mesh.cell_vol[i] * (rho.values[i] - rho_old.values[i]) / dt;
        }
    }

    /// Implicit compressible transient in time-correction form:
    /// `psi * (ddt(p) - ddt(p)|current)`. Only the pressure *change*
    /// within the sub-iteration enters, so the explicit `ddt(rho)` term is
    /// not double-counted.
    pub fn ddt_pressure_correction(
        &mut self,
        mesh: &Mesh,
        psi: &ScalarField,
        p: &ScalarField,
        dt: f64,
    ) {
        for i in 0..mesh.num_cells() {
            let coeff = psi.values[i] * mesh.cell_vol[i] / dt;
            self.diag[i] += coeff;
            self.rhs_base[i] += coeff * p.values[i];
        }
    }

    /// Explicit divergence of the provisional flux.
    pub fn div_flux(&mut self, mesh: &Mesh, phi: &FaceField) {
        for f in 0..mesh.num_faces() {
            let v = phi.values[f];
            self.rhs_base[mesh.face_owner[f]] -= v;
            if let Some(neigh) = mesh.face_neighbor[f] {
                self.rhs_base[neigh] += v;
            }
        }
    }

    /// Volumetric mass source (e.g. the dispersed-phase contribution),
    /// added verbatim to the right-hand side.
    pub fn mass_source(&mut self, mesh: &Mesh, srho: &ScalarField) {
        for i in 0..mesh.num_cells() {
            self.rhs_base[i] += srho.values[i] * mesh.cell_vol[i];
        }
    }

    /// Direct right-hand-side contribution for one cell (mass rate).
    /// Used by source providers.
    pub fn add_rhs(&mut self, cell: usize, mass_rate: f64) {
        debug_assert!(cell < self.rhs_base.len());
        self.rhs_base[cell] += mass_rate;
    }

    /// Implicit Laplacian `laplacian(gamma, p)` with the over-relaxed
    /// surface-vector decomposition: the component of `Sf` along the
    /// cell-to-cell vector is implicit, the remainder feeds the explicit
    /// non-orthogonal correction refreshed per pass.
    pub fn laplacian(&mut self, mesh: &Mesh, gamma: &FaceField, p_bc: &BoundaryPolicy) {
        for f in 0..mesh.num_faces() {
            let sf = mesh.face_sf(f);
            let d = mesh.face_delta(f);
            let sf_d = sf.dot(&d);
            debug_assert!(sf_d > 0.0, "degenerate face {}", f);
            let g = gamma.values[f] * sf.norm_squared() / sf_d;

            match mesh.face_neighbor[f] {
                Some(neigh) => {
                    let owner = mesh.face_owner[f];
                    self.face_coeff[f] = g;
                    self.diag[owner] += g;
                    self.diag[neigh] += g;
                }
                None => {
                    if let Some(pb) = mesh.face_boundary[f].and_then(|bt| p_bc.value_for(bt)) {
                        let owner = mesh.face_owner[f];
                        self.boundary_coeff[f] = g;
                        self.boundary_value[f] = pb;
                        self.diag[owner] += g;
                        self.rhs_base[owner] += g * pb;
                    }
                    // zero-gradient boundary: no contribution
                }
            }
        }
    }

    /// Pin the solution at `cell` to `value`. The row is replaced by an
    /// identity row and the column is eliminated into the neighbours'
    /// right-hand sides, keeping the matrix symmetric.
    pub fn fix_value(&mut self, cell: usize, value: f64) -> Result<(), CouplingError> {
        if cell >= self.constrained.len() {
            return Err(CouplingError::CellOutOfRange {
                context: "fix_value",
                cell,
                n_cells: self.constrained.len(),
            });
        }
        debug_assert!(self.matrix.is_none(), "constraints must precede finalize");
        self.constrained[cell] = Some(value);
        Ok(())
    }

    /// Freeze the implicit structure into a CSR matrix. Fails if any
    /// unconstrained row is empty: such an equation is not well posed and
    /// indicates a configuration error, not a numerical one.
    pub fn finalize(&mut self, mesh: &Mesh) -> Result<(), CouplingError> {
        let n_cells = mesh.num_cells();

        for i in 0..n_cells {
            if self.constrained[i].is_none() && self.diag[i] == 0.0 {
                return Err(CouplingError::SingularEquation { cell: i });
            }
        }

        // Eliminate constrained columns into the base right-hand side.
        for f in 0..mesh.num_faces() {
            let g = self.face_coeff[f];
            if g == 0.0 {
                continue;
            }
            let owner = mesh.face_owner[f];
            let neigh = match mesh.face_neighbor[f] {
                Some(n) => n,
                None => continue,
            };
            if let Some(v) = self.constrained[neigh] {
                if self.constrained[owner].is_none() {
                    self.rhs_base[owner] += g * v;
                }
            }
            if let Some(v) = self.constrained[owner] {
                if self.constrained[neigh].is_none() {
                    self.rhs_base[neigh] += g * v;
                }
            }
        }

        let mut triplets = Vec::with_capacity(n_cells + 2 * mesh.num_faces());
        for i in 0..n_cells {
            if self.constrained[i].is_some() {
                triplets.push((i, i, 1.0));
                continue;
            }
            triplets.push((i, i, self.diag[i]));
            for k in mesh.cell_face_offsets[i]..mesh.cell_face_offsets[i + 1] {
                let f = mesh.cell_faces[k];
                let g = self.face_coeff[f];
                if g == 0.0 {
                    continue;
                }
                let owner = mesh.face_owner[f];
                let other = if owner == i {
                    match mesh.face_neighbor[f] {
                        Some(n) => n,
                        None => continue,
                    }
                } else {
                    owner
                };
                if self.constrained[other].is_none() {
                    triplets.push((i, other, -g));
                }
            }
        }

        self.matrix = Some(SparseMatrix::from_triplets(n_cells, n_cells, &triplets));
        Ok(())
    }

    /// Recompute the explicit non-orthogonal Laplacian contribution from
    /// the current pressure and rebuild the working right-hand side. The
    /// matrix produced by [`finalize`](Self::finalize) is reused untouched.
    pub fn refresh_non_orthogonal(
        &mut self,
        mesh: &Mesh,
        gamma: &FaceField,
        p: &ScalarField,
        p_bc: &BoundaryPolicy,
    ) {
        debug_assert!(self.matrix.is_some(), "refresh requires a finalized matrix");

        let grad_p = Fvm::gradient(mesh, p, |bt| p_bc.value_for(bt));
        for f in 0..mesh.num_faces() {
            if mesh.face_neighbor[f].is_none() {
                continue;
            }
            let sf = mesh.face_sf(f);
            let d = mesh.face_delta(f);
            let delta = d * (sf.norm_squared() / sf.dot(&d));
            let k = sf - delta;

            let owner = mesh.face_owner[f];
            let neigh = mesh.face_neighbor[f].unwrap();
            let w = mesh.interp_factor(f);
            let g_own = grad_p.at(owner);
            let g_face = g_own + (grad_p.at(neigh) - g_own) * w;

            self.nonorth[f] = gamma.values[f] * k.dot(&g_face);
        }

        self.rhs.copy_from_slice(&self.rhs_base);
        for f in 0..mesh.num_faces() {
            let e = self.nonorth[f];
            if e == 0.0 {
                continue;
            }
            let owner = mesh.face_owner[f];
            if self.constrained[owner].is_none() {
                self.rhs[owner] += e;
            }
            if let Some(neigh) = mesh.face_neighbor[f] {
                if self.constrained[neigh].is_none() {
                    self.rhs[neigh] -= e;
                }
            }
        }
        for (i, c) in self.constrained.iter().enumerate() {
            if let Some(v) = c {
                self.rhs[i] = *v;
            }
        }
    }

    /// Solve the finalized system in place into `p`.
    pub fn solve(
        &self,
        solver: &dyn LinearSolver,
        controls: &SolverControls,
        final_inner_iter: bool,
        p: &mut ScalarField,
    ) -> SolverReport {
        let matrix = self
            .matrix
            .as_ref()
            .expect("solve requires a finalized matrix");
        solve_named(
            solver,
            self.field,
            matrix,
            &self.rhs,
            &mut p.values,
            controls,
            final_inner_iter,
        )
    }

    /// Face flux implied by the solved Laplacian, signed so that
    /// `phi = phiHbyA + eqn.flux(...)` is the continuity-consistent flux.
    pub fn flux(&self, mesh: &Mesh, p: &ScalarField) -> FaceField {
        let mut out = FaceField::zeros(mesh.num_faces());
        for f in 0..mesh.num_faces() {
            let owner = mesh.face_owner[f];
            let q = match mesh.face_neighbor[f] {
                Some(neigh) => {
                    self.face_coeff[f] * (p.values[neigh] - p.values[owner]) + self.nonorth[f]
                }
                None => self.boundary_coeff[f] * (self.boundary_value[f] - p.values[owner]),
            };
            out.values[f] = -q;
        }
        out
    }

    /// Right-hand side currently loaded for the solve (test hook).
    pub fn rhs(&self) -> &[f64] {
        &self.rhs
    }

    /// The frozen CSR matrix, available after `finalize`.
    pub fn matrix(&self) -> Option<&SparseMatrix> {
        self.matrix.as_ref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::solver::fields::{BcValue, BoundaryPolicy};
    use crate::solver::linear_solver::ConjugateGradient;
    use crate::solver::mesh::Mesh;

    fn dirichlet_lr(left: f64, right: f64) -> BoundaryPolicy {
        BoundaryPolicy {
            inlet: BcValue::FixedValue(left),
            outlet: BcValue::FixedValue(right),
            wall: BcValue::ZeroGradient,
        }
    }

    fn assemble_laplacian(mesh: &Mesh, p_bc: &BoundaryPolicy) -> PressureEqn {
        let gamma = FaceField::new(mesh.num_faces(), 1.0);
        let mut eqn = PressureEqn::new(mesh, "p");
        eqn.laplacian(mesh, &gamma, p_bc);
        eqn
    }

    #[test]
    fn neumann_laplacian_rows_sum_to_zero() {
        let mesh = Mesh::closed_box(3, 3, 1.0, 1.0);
        let mut eqn = assemble_laplacian(&mesh, &BoundaryPolicy::zero_gradient());
        // All-Neumann alone is singular; pin one cell so finalize accepts.
        eqn.fix_value(0, 0.0).unwrap();
        eqn.finalize(&mesh).unwrap();
        let m = eqn.matrix().unwrap();
        // Cells 1 and 3 neighbour the pinned corner; their eliminated
        // column went to the RHS, so their rows no longer sum to zero.
        for i in 1..mesh.num_cells() {
            if i == 1 || i == 3 {
                continue;
            }
            let mut sum = 0.0;
            for j in m.row_offsets[i]..m.row_offsets[i + 1] {
                sum += m.values[j];
            }
            assert!(sum.abs() < 1e-12, "row {} sums to {}", i, sum);
        }
    }

    #[test]
    fn one_dimensional_dirichlet_profile_is_linear() {
        // 3 cells in a row, p=1 on the left face, p=0 on the right.
        let mesh = Mesh::channel(3, 1, 3.0, 1.0);
        let mut eqn = assemble_laplacian(&mesh, &dirichlet_lr(1.0, 0.0));
        eqn.finalize(&mesh).unwrap();
        let gamma = FaceField::new(mesh.num_faces(), 1.0);
        let mut p = ScalarField::zeros(3);
        eqn.refresh_non_orthogonal(&mesh, &gamma, &p, &dirichlet_lr(1.0, 0.0));
        eqn.solve(
            &ConjugateGradient,
            &SolverControls::default(),
            true,
            &mut p,
        );
        let expected = [5.0 / 6.0, 0.5, 1.0 / 6.0];
        for (i, e) in expected.iter().enumerate() {
            assert!((p.values[i] - e).abs() < 1e-8, "cell {}: {}", i, p.values[i]);
        }
    }

    #[test]
    fn flux_of_solved_system_balances_per_cell() {
        let bc = dirichlet_lr(1.0, 0.0);
        let mesh = Mesh::channel(4, 2, 2.0, 1.0);
        let mut eqn = assemble_laplacian(&mesh, &bc);
        eqn.finalize(&mesh).unwrap();
        let gamma = FaceField::new(mesh.num_faces(), 1.0);
        let mut p = ScalarField::zeros(mesh.num_cells());
        eqn.refresh_non_orthogonal(&mesh, &gamma, &p, &bc);
        eqn.solve(
            &ConjugateGradient,
            &SolverControls::default(),
            true,
            &mut p,
        );
        // Steady pure-Laplacian: the implied flux must be divergence-free.
        let flux = eqn.flux(&mesh, &p);
        let net = Fvm::surface_sum(&mesh, &flux);
        for v in &net.values {
            assert!(v.abs() < 1e-7, "cell imbalance {}", v);
        }
    }

    #[test]
    fn matrix_is_reused_across_non_orthogonal_refresh() {
        let bc = BoundaryPolicy::zero_gradient();
        let mesh = Mesh::skewed_box(5, 5, 1.0, 1.0, 0.15);
        let gamma = FaceField::new(mesh.num_faces(), 1.0);
        let mut eqn = PressureEqn::new(&mesh, "p");
        eqn.laplacian(&mesh, &gamma, &bc);
        eqn.fix_value(0, 0.0).unwrap();
        eqn.finalize(&mesh).unwrap();

        let p1 = ScalarField::from_fn(mesh.num_cells(), |i| i as f64);
        let p2 = ScalarField::from_fn(mesh.num_cells(), |i| (i as f64).sin());

        eqn.refresh_non_orthogonal(&mesh, &gamma, &p1, &bc);
        let vals_before = eqn.matrix().unwrap().values.clone();
        let cols_before = eqn.matrix().unwrap().col_indices.clone();
        let rhs1 = eqn.rhs().to_vec();

        eqn.refresh_non_orthogonal(&mesh, &gamma, &p2, &bc);
        assert_eq!(eqn.matrix().unwrap().values, vals_before);
        assert_eq!(eqn.matrix().unwrap().col_indices, cols_before);
        assert_ne!(eqn.rhs(), &rhs1[..], "explicit terms must be refreshed");
    }

    #[test]
    fn non_orthogonal_correction_vanishes_on_orthogonal_mesh() {
        let bc = dirichlet_lr(1.0, 0.0);
        let mesh = Mesh::channel(4, 4, 1.0, 1.0);
        let gamma = FaceField::new(mesh.num_faces(), 1.0);
        let mut eqn = assemble_laplacian(&mesh, &bc);
        eqn.finalize(&mesh).unwrap();
        let p = ScalarField::from_fn(mesh.num_cells(), |i| i as f64 * 0.1);
        eqn.refresh_non_orthogonal(&mesh, &gamma, &p, &bc);
        for v in &eqn.nonorth {
            assert!(v.abs() < 1e-12);
        }
    }

    #[test]
    fn constrained_cell_holds_its_value() {
        let mesh = Mesh::closed_box(3, 3, 1.0, 1.0);
        let bc = BoundaryPolicy::zero_gradient();
        let mut eqn = assemble_laplacian(&mesh, &bc);
        eqn.fix_value(4, 2.0).unwrap();
        eqn.finalize(&mesh).unwrap();
        let gamma = FaceField::new(mesh.num_faces(), 1.0);
        let mut p = ScalarField::zeros(9);
        eqn.refresh_non_orthogonal(&mesh, &gamma, &p, &bc);
        eqn.solve(
            &ConjugateGradient,
            &SolverControls::default(),
            true,
            &mut p,
        );
        // Zero-flux Laplacian with one pinned cell relaxes to the pinned
        // value everywhere.
        for v in &p.values {
            assert!((v - 2.0).abs() < 1e-8);
        }
    }

    #[test]
    fn empty_equation_is_rejected() {
        let mesh = Mesh::closed_box(2, 2, 1.0, 1.0);
        let mut eqn = PressureEqn::new(&mesh, "p");
        let err = eqn.finalize(&mesh).unwrap_err();
        assert!(matches!(err, CouplingError::SingularEquation { cell: 0 }));
    }

    #[test]
    fn fix_value_rejects_out_of_range_cell() {
        let mesh = Mesh::closed_box(2, 2, 1.0, 1.0);
        let mut eqn = PressureEqn::new(&mesh, "p");
        assert!(matches!(
            eqn.fix_value(99, 0.0),
            Err(CouplingError::CellOutOfRange { cell: 99, .. })
        ));
    }
}
