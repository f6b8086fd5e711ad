use crate::solver::fields::{FaceField, ScalarField, VectorField};
use crate::solver::mesh::{BoundaryType, Mesh};
use nalgebra::Vector2;
use wide::f64x4;

const SMALL: f64 = 1e-30;

/// Explicit finite-volume operators. All take boundary closures in the
/// same convention as the rest of the solver: `Some(v)` is a fixed face
/// value, `None` is zero-gradient (the owner value is used).
pub struct Fvm;

impl Fvm {
    /// Linear cell-to-face interpolation of a scalar field.
    pub fn interpolate<F>(mesh: &Mesh, field: &ScalarField, bc: F) -> FaceField
    where
        F: Fn(BoundaryType) -> Option<f64>,
    {
        let mut out = FaceField::zeros(mesh.num_faces());
        for f in 0..mesh.num_faces() {
            let owner = mesh.face_owner[f];
            let val_owner = field.values[owner];
            out.values[f] = match mesh.face_neighbor[f] {
                Some(neigh) => {
                    let w = mesh.interp_factor(f);
                    val_owner + w * (field.values[neigh] - val_owner)
                }
                None => match mesh.face_boundary[f].and_then(&bc) {
                    Some(v) => v,
                    None => val_owner,
                },
            };
        }
        out
    }

    /// Face value of a vector field (linear interior interpolation,
    /// boundary closure on the boundary).
    fn face_vector<F>(mesh: &Mesh, field: &VectorField, f: usize, bc: &F) -> Vector2<f64>
    where
        F: Fn(BoundaryType) -> Option<Vector2<f64>>,
    {
        let owner = mesh.face_owner[f];
        let v_owner = field.at(owner);
        match mesh.face_neighbor[f] {
            Some(neigh) => {
                let w = mesh.interp_factor(f);
                v_owner + (field.at(neigh) - v_owner) * w
            }
            None => match mesh.face_boundary[f].and_then(bc) {
                Some(v) => v,
                None => v_owner,
            },
        }
    }

    /// Face-normal projection of an interpolated vector field:
    /// `flux_f = (interp(field))_f . Sf`.
    pub fn flux<F>(mesh: &Mesh, field: &VectorField, bc: F) -> FaceField
    where
        F: Fn(BoundaryType) -> Option<Vector2<f64>>,
    {
        let mut out = FaceField::zeros(mesh.num_faces());
        for f in 0..mesh.num_faces() {
            out.values[f] = Self::face_vector(mesh, field, f, &bc).dot(&mesh.face_sf(f));
        }
        out
    }

    /// Green-Gauss gradient of a scalar field.
    pub fn gradient<F>(mesh: &Mesh, field: &ScalarField, bc: F) -> VectorField
    where
        F: Fn(BoundaryType) -> Option<f64>,
    {
        let n_cells = mesh.num_cells();
        let mut grad_x = vec![0.0; n_cells];
        let mut grad_y = vec![0.0; n_cells];

        let face_vals = Self::interpolate(mesh, field, bc);
        for f in 0..mesh.num_faces() {
            let owner = mesh.face_owner[f];
            let sf = mesh.face_sf(f);
            let v = face_vals.values[f];
            grad_x[owner] += v * sf.x;
            grad_y[owner] += v * sf.y;
            if let Some(neigh) = mesh.face_neighbor[f] {
                grad_x[neigh] -= v * sf.x;
                grad_y[neigh] -= v * sf.y;
            }
        }

        let mut i = 0;
        while i + 4 <= n_cells {
            let v_vol = f64x4::from(&mesh.cell_vol[i..i + 4]);
            let gx: [f64; 4] = (f64x4::from(&grad_x[i..i + 4]) / v_vol).into();
            let gy: [f64; 4] = (f64x4::from(&grad_y[i..i + 4]) / v_vol).into();
            grad_x[i..i + 4].copy_from_slice(&gx);
            grad_y[i..i + 4].copy_from_slice(&gy);
            i += 4;
        }
        while i < n_cells {
            grad_x[i] /= mesh.cell_vol[i];
            grad_y[i] /= mesh.cell_vol[i];
            i += 1;
        }

        VectorField {
            vx: grad_x,
            vy: grad_y,
        }
    }

    /// Net outflow of a face flux per cell, integrated (not divided by
    /// volume): `sum_f sign(c, f) * flux_f`.
    pub fn surface_sum(mesh: &Mesh, flux: &FaceField) -> ScalarField {
        let mut out = ScalarField::zeros(mesh.num_cells());
        for f in 0..mesh.num_faces() {
            let v = flux.values[f];
            out.values[mesh.face_owner[f]] += v;
            if let Some(neigh) = mesh.face_neighbor[f] {
                out.values[neigh] -= v;
            }
        }
        out
    }

    /// Divergence of a face flux: `surface_sum / V`.
    pub fn divergence(mesh: &Mesh, flux: &FaceField) -> ScalarField {
        let mut out = Self::surface_sum(mesh, flux);
        for (v, vol) in out.values.iter_mut().zip(&mesh.cell_vol) {
            *v /= vol;
        }
        out
    }

    /// Transient flux correction for the provisional flux (Euler scheme).
    ///
    /// Interpolating `rho*U` to faces loses the time accuracy the old flux
    /// carried; this term reintroduces the difference, damped by an
    /// orthogonality coefficient that switches the correction off where
    /// the old flux and the old interpolated momentum disagree strongly.
    /// Only interior faces are corrected; boundary fluxes are set by the
    /// boundary conditions, not by the interpolation.
    pub fn ddt_corr(
        mesh: &Mesh,
        dt: f64,
        rho_old: &ScalarField,
        u_old: &VectorField,
        phi_old: &FaceField,
    ) -> FaceField {
        let n_cells = mesh.num_cells();
        let mut rho_u_old = VectorField::zeros(n_cells);
        for i in 0..n_cells {
            rho_u_old.vx[i] = rho_old.values[i] * u_old.vx[i];
            rho_u_old.vy[i] = rho_old.values[i] * u_old.vy[i];
        }

        let mut out = FaceField::zeros(mesh.num_faces());
        for f in 0..mesh.num_faces() {
            let neigh = match mesh.face_neighbor[f] {
                Some(n) => n,
                None => continue,
            };
            let owner = mesh.face_owner[f];
            let w = mesh.interp_factor(f);
            let v_own = rho_u_old.at(owner);
            let m = (v_own + (rho_u_old.at(neigh) - v_own) * w).dot(&mesh.face_sf(f));
            let diff = phi_old.values[f] - m;
            let coeff = 1.0 - (diff.abs() / (phi_old.values[f].abs() + SMALL)).min(1.0);
            out.values[f] = coeff * diff / dt;
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::solver::mesh::Mesh;

    fn linear_field(mesh: &Mesh, a: f64, b: f64, c: f64) -> ScalarField {
        ScalarField::from_fn(mesh.num_cells(), |i| {
            a + b * mesh.cell_cx[i] + c * mesh.cell_cy[i]
        })
    }

    #[test]
    fn interpolate_linear_field_is_exact_on_interior() {
        let mesh = Mesh::closed_box(4, 4, 1.0, 1.0);
        let field = linear_field(&mesh, 1.0, 2.0, -3.0);
        let face_vals = Fvm::interpolate(&mesh, &field, |_| None);
        for f in 0..mesh.num_faces() {
            if mesh.face_neighbor[f].is_some() {
                let exact = 1.0 + 2.0 * mesh.face_cx[f] - 3.0 * mesh.face_cy[f];
                assert!((face_vals.values[f] - exact).abs() < 1e-12);
            }
        }
    }

    #[test]
    fn gradient_of_linear_field_interior_cells() {
        // Green-Gauss recovers the exact slope wherever every face value
        // is the linear interpolant, i.e. on cells with no boundary face.
        let mesh = Mesh::closed_box(5, 5, 1.0, 1.0);
        let field = linear_field(&mesh, 0.0, 2.0, -1.0);
        let grad = Fvm::gradient(&mesh, &field, |_| None);
        // Interior cells (not touching the boundary)
        for j in 1..4 {
            for i in 1..4 {
                let c = j * 5 + i;
                assert!((grad.vx[c] - 2.0).abs() < 1e-12, "d/dx at cell {}", c);
                assert!((grad.vy[c] + 1.0).abs() < 1e-12, "d/dy at cell {}", c);
            }
        }
    }

    #[test]
    fn divergence_of_uniform_flow_is_zero() {
        let mesh = Mesh::closed_box(4, 3, 2.0, 1.0);
        let u = VectorField::new(mesh.num_cells(), Vector2::new(1.0, 0.5));
        // Fixed boundary value equal to the interior makes the field
        // globally uniform.
        let flux = Fvm::flux(&mesh, &u, |_| Some(Vector2::new(1.0, 0.5)));
        let div = Fvm::divergence(&mesh, &flux);
        for v in &div.values {
            assert!(v.abs() < 1e-12);
        }
    }

    #[test]
    fn surface_sum_closed_walls() {
        // Zero velocity at the walls: net outflow of every boundary cell
        // only sees interior faces.
        let mesh = Mesh::closed_box(3, 3, 1.0, 1.0);
        let u = VectorField::new(mesh.num_cells(), Vector2::new(1.0, 0.0));
        let flux = Fvm::flux(&mesh, &u, |_| Some(Vector2::zeros()));
        let total: f64 = Fvm::surface_sum(&mesh, &flux).values.iter().sum();
        assert!(total.abs() < 1e-12);
    }

    #[test]
    fn ddt_corr_vanishes_for_consistent_flux() {
        let mesh = Mesh::closed_box(3, 3, 1.0, 1.0);
        let rho = ScalarField::new(mesh.num_cells(), 1.0);
        let u = VectorField::new(mesh.num_cells(), Vector2::new(0.7, -0.2));
        let bc = |_| Some(Vector2::new(0.7, -0.2));
        // phi_old exactly equals interp(rho*U).Sf
        let mut rho_u = VectorField::zeros(mesh.num_cells());
        for i in 0..mesh.num_cells() {
            rho_u.vx[i] = u.vx[i];
            rho_u.vy[i] = u.vy[i];
        }
        let phi_old = Fvm::flux(&mesh, &rho_u, bc);
        let corr = Fvm::ddt_corr(&mesh, 0.1, &rho, &u, &phi_old);
        for v in &corr.values {
            assert!(v.abs() < 1e-12);
        }
    }

    #[test]
    fn ddt_corr_zero_on_boundary_faces() {
        let mesh = Mesh::closed_box(3, 3, 1.0, 1.0);
        let rho = ScalarField::new(mesh.num_cells(), 1.0);
        let u = VectorField::new(mesh.num_cells(), Vector2::new(1.0, 0.0));
        let phi_old = FaceField::new(mesh.num_faces(), 0.5);
        let corr = Fvm::ddt_corr(&mesh, 0.1, &rho, &u, &phi_old);
        for f in 0..mesh.num_faces() {
            if mesh.face_neighbor[f].is_none() {
                assert_eq!(corr.values[f], 0.0);
            }
        }
    }
}
