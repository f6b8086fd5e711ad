use crate::solver::eqn::PressureEqn;
use crate::solver::error::CouplingError;
use crate::solver::fields::{
    hadamard, BoundaryPolicy, FaceField, FlowState, MomentumCoeffs, ScalarField,
    VectorBoundaryPolicy, VectorField,
};
use crate::solver::fvm::Fvm;
use crate::solver::linear_solver::{LinearSolver, SolverControls, SolverReport};
use crate::solver::mesh::Mesh;
use crate::solver::options::{SourceRegistry, COUPLED_FIELDS};
use crate::solver::pimple::{IterationContext, NonOrthPass};
use crate::solver::thermo::Thermodynamics;
use serde::{Deserialize, Serialize};
use wide::f64x4;

#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct PressureCorrectorConfig {
    pub p_bc: BoundaryPolicy,
    pub u_bc: VectorBoundaryPolicy,
    /// Blending factor applied to `p` after each solve: 1 keeps the solved
    /// value, 0 keeps the previous one.
    pub p_relax: f64,
    pub p_solver: SolverControls,
}

impl Default for PressureCorrectorConfig {
    fn default() -> Self {
        Self {
            p_bc: BoundaryPolicy::zero_gradient(),
            u_bc: VectorBoundaryPolicy::no_slip(),
            p_relax: 1.0,
            p_solver: SolverControls::default(),
        }
    }
}

/// Continuity error of the corrected flux against the thermodynamic
/// density, normalized by the total mass.
#[derive(Clone, Copy, Debug, Default)]
pub struct ContinuityErrors {
    pub local: f64,
    pub global: f64,
    pub cumulative: f64,
}

#[derive(Clone, Debug)]
pub struct CorrectorReport {
    pub solves: Vec<SolverReport>,
    pub continuity: ContinuityErrors,
    /// Whether a final non-orthogonal pass recovered the flux. False means
    /// the provisional flux was kept (zero-pass fallback).
    pub flux_finalized: bool,
    pub p_min: f64,
    pub p_max: f64,
}

/// Pressure-velocity-density corrector of the PIMPLE loop.
///
/// One [`correct`](Self::correct) call takes the momentum predictor's
/// output and the current guessed pressure to a mutually consistent
/// (p, U, rho, phi) set: density update around the solve, provisional
/// flux, implicit pressure equation with non-orthogonal correction, flux
/// finalization and velocity reconstruction, in that fixed order.
pub struct PressureCorrector {
    config: PressureCorrectorConfig,
    cumulative_continuity: f64,
}

impl PressureCorrector {
    pub fn new(config: PressureCorrectorConfig) -> Self {
        Self {
            config,
            cumulative_continuity: 0.0,
        }
    }

    pub fn config(&self) -> &PressureCorrectorConfig {
        &self.config
    }

    #[allow(clippy::too_many_arguments)]
    pub fn correct(
        &mut self,
        mesh: &Mesh,
        state: &mut FlowState,
        momentum: &MomentumCoeffs,
        thermo: &dyn Thermodynamics,
        srho: &ScalarField,
        options: &SourceRegistry,
        ctx: &IterationContext,
        dt: f64,
        solver: &dyn LinearSolver,
    ) -> Result<CorrectorReport, CouplingError> {
        let n_cells = mesh.num_cells();
        debug_assert_eq!(state.n_cells(), n_cells);
        debug_assert_eq!(momentum.a_diag.len(), n_cells);
        debug_assert_eq!(srho.len(), n_cells);

        let p_prev = state.p.clone();

        let mut psi = ScalarField::zeros(n_cells);
        thermo.compressibility(&state.p, &mut psi);

        // Density update, phase 1: take the thermodynamic density, then
        // strip the current pressure's compressible part so the implicit
        // psi*ddt(p) term does not count it twice.
        state.rho.values.copy_from_slice(&state.rho_thermo.values);
        for i in 0..n_cells {
            state.rho_thermo.values[i] -= psi.values[i] * state.p.values[i];
        }

        // Continuity predictor
        let rau = momentum.reciprocal_a();
        let mut rho_rau = ScalarField::zeros(n_cells);
        hadamard(&state.rho.values, &rau.values, &mut rho_rau.values);
        let rhorauf = Fvm::interpolate(mesh, &rho_rau, |_| None);

        let mut hbya = VectorField::zeros(n_cells);
        hadamard(&rau.values, &momentum.h.vx, &mut hbya.vx);
        hadamard(&rau.values, &momentum.h.vy, &mut hbya.vy);

        let mut phi_hbya = momentum_flux(mesh, &state.rho, &hbya, &self.config.u_bc);
        let ddtcorr = Fvm::ddt_corr(mesh, dt, &state.rho_old, &state.u_old, &state.phi_old);
        for f in 0..mesh.num_faces() {
            phi_hbya.values[f] += rhorauf.values[f] * ddtcorr.values[f];
        }

        let rho_f = Fvm::interpolate(mesh, &state.rho, |_| None);
        options.make_relative(mesh, &rho_f, &mut phi_hbya);

        // Pressure correction equation; all terms except the Laplacian
        // are frozen for the sub-iteration.
        let mut eqn = PressureEqn::new(mesh, "p");
        eqn.ddt_density(mesh, &state.rho, &state.rho_old, dt);
        eqn.ddt_pressure_correction(mesh, &psi, &state.p, dt);
        eqn.div_flux(mesh, &phi_hbya);
        eqn.mass_source(mesh, srho);
        options.apply_sources(mesh, &mut eqn, COUPLED_FIELDS)?;
        eqn.laplacian(mesh, &rhorauf, &self.config.p_bc);
        options.constrain(mesh, &mut eqn)?;
        eqn.finalize(mesh)?;

        let (solves, flux_finalized) = run_non_orthogonal_loop(
            mesh,
            &mut eqn,
            &rhorauf,
            &self.config.p_bc,
            &mut state.p,
            &phi_hbya,
            &mut state.phi,
            ctx.non_orthogonal_passes(),
            solver,
            &self.config.p_solver,
            ctx.final_inner_iter(),
        );
        if !flux_finalized {
            log::debug!("no non-orthogonal pass ran; keeping the provisional flux");
            state.phi.values.copy_from_slice(&phi_hbya.values);
        }

        relax(&mut state.p, &p_prev, self.config.p_relax);

        // Density update, phase 2: restore the compressible part with the
        // newly solved pressure.
        for i in 0..n_cells {
            state.rho_thermo.values[i] += psi.values[i] * state.p.values[i];
        }

        // Transport density with the corrected flux and measure how far
        // it drifts from the thermodynamic value.
        let net = Fvm::surface_sum(mesh, &state.phi);
        for i in 0..n_cells {
            state.rho.values[i] = state.rho_old.values[i]
                + dt * (srho.values[i] - net.values[i] / mesh.cell_vol[i]);
        }
        let continuity = self.continuity_errors(state, mesh);
        log::info!(
            "continuity errors: sum local = {:.6e}, global = {:.6e}, cumulative = {:.6e}",
            continuity.local,
            continuity.global,
            continuity.cumulative
        );

        // Velocity reconstruction: remove the continuity error from the
        // provisional velocity with the corrected pressure gradient.
        let grad_p = Fvm::gradient(mesh, &state.p, |bt| self.config.p_bc.value_for(bt));
        reconstruct_velocity(&hbya, &rau, &grad_p, &mut state.u);
        correct_boundary_flux(mesh, &rho_f, &self.config.u_bc, &mut state.phi);
        options.correct_velocity(mesh, &mut state.u);

        kinetic_energy(&state.u, &mut state.k);
        if thermo.needs_dpdt() {
            for i in 0..n_cells {
                state.dpdt.values[i] = (state.p.values[i] - state.p_old.values[i]) / dt;
            }
        }

        // Final density from the thermodynamic field, clipped to the
        // physical bounds.
        state.rho.values.copy_from_slice(&state.rho_thermo.values);
        state.rho.clamp_range(thermo.rho_min(), thermo.rho_max());

        let p_min = state.p.min();
        let p_max = state.p.max();
        log::info!("p min/max = {:.6e} / {:.6e}", p_min, p_max);

        Ok(CorrectorReport {
            solves,
            continuity,
            flux_finalized,
            p_min,
            p_max,
        })
    }

    fn continuity_errors(&mut self, state: &FlowState, mesh: &Mesh) -> ContinuityErrors {
        let mut total_mass = 0.0;
        let mut local = 0.0;
        let mut global = 0.0;
        for i in 0..mesh.num_cells() {
            let dm = (state.rho.values[i] - state.rho_thermo.values[i]) * mesh.cell_vol[i];
            local += dm.abs();
            global += dm;
            total_mass += state.rho.values[i] * mesh.cell_vol[i];
        }
        if total_mass.abs() > 0.0 {
            local /= total_mass;
            global /= total_mass;
        }
        self.cumulative_continuity += global;
        ContinuityErrors {
            local,
            global,
            cumulative: self.cumulative_continuity,
        }
    }
}

/// The non-orthogonal correction loop: refresh the explicit terms, solve,
/// and recover the corrected flux on the final pass only. Intermediate
/// passes leave `phi` untouched; callers handle the no-pass fallback.
#[allow(clippy::too_many_arguments)]
pub(crate) fn run_non_orthogonal_loop<I>(
    mesh: &Mesh,
    eqn: &mut PressureEqn,
    rhorauf: &FaceField,
    p_bc: &BoundaryPolicy,
    p: &mut ScalarField,
    phi_hbya: &FaceField,
    phi: &mut FaceField,
    passes: I,
    solver: &dyn LinearSolver,
    controls: &SolverControls,
    final_inner_iter: bool,
) -> (Vec<SolverReport>, bool)
where
    I: IntoIterator<Item = NonOrthPass>,
{
    let mut reports = Vec::new();
    let mut finalized = false;
    for pass in passes {
        eqn.refresh_non_orthogonal(mesh, rhorauf, p, p_bc);
        reports.push(eqn.solve(solver, controls, final_inner_iter, p));
        if pass.is_final {
            let correction = eqn.flux(mesh, p);
            for f in 0..phi.len() {
                phi.values[f] = phi_hbya.values[f] + correction.values[f];
            }
            finalized = true;
        }
    }
    (reports, finalized)
}

/// `p = prev + factor * (p - prev)`
fn relax(p: &mut ScalarField, prev: &ScalarField, factor: f64) {
    if factor == 1.0 {
        return;
    }
    let n = p.len();
    let vf = f64x4::splat(factor);
    let mut i = 0;
    while i + 4 <= n {
        let vp = f64x4::from(&p.values[i..i + 4]);
        let vq = f64x4::from(&prev.values[i..i + 4]);
        let res: [f64; 4] = (vq + vf * (vp - vq)).into();
        p.values[i..i + 4].copy_from_slice(&res);
        i += 4;
    }
    while i < n {
        p.values[i] = prev.values[i] + factor * (p.values[i] - prev.values[i]);
        i += 1;
    }
}

/// `U = HbyA - rAU * grad(p)`
fn reconstruct_velocity(
    hbya: &VectorField,
    rau: &ScalarField,
    grad_p: &VectorField,
    u: &mut VectorField,
) {
    let n = u.len();
    let mut i = 0;
    while i + 4 <= n {
        let vr = f64x4::from(&rau.values[i..i + 4]);
        let ux: [f64; 4] =
            (f64x4::from(&hbya.vx[i..i + 4]) - vr * f64x4::from(&grad_p.vx[i..i + 4])).into();
        let uy: [f64; 4] =
            (f64x4::from(&hbya.vy[i..i + 4]) - vr * f64x4::from(&grad_p.vy[i..i + 4])).into();
        u.vx[i..i + 4].copy_from_slice(&ux);
        u.vy[i..i + 4].copy_from_slice(&uy);
        i += 4;
    }
    while i < n {
        u.vx[i] = hbya.vx[i] - rau.values[i] * grad_p.vx[i];
        u.vy[i] = hbya.vy[i] - rau.values[i] * grad_p.vy[i];
        i += 1;
    }
}

/// `K = 0.5 * |U|^2`
fn kinetic_energy(u: &VectorField, k: &mut ScalarField) {
    let n = k.len();
    let half = f64x4::splat(0.5);
    let mut i = 0;
    while i + 4 <= n {
        let vx = f64x4::from(&u.vx[i..i + 4]);
        let vy = f64x4::from(&u.vy[i..i + 4]);
        let res: [f64; 4] = (half * (vx * vx + vy * vy)).into();
        k.values[i..i + 4].copy_from_slice(&res);
        i += 4;
    }
    while i < n {
        k.values[i] = 0.5 * (u.vx[i] * u.vx[i] + u.vy[i] * u.vy[i]);
        i += 1;
    }
}

/// Face-normal projection of `interp(rho * v)` with the momentum boundary
/// conditions: fixed-velocity patches use the boundary velocity with the
/// owner-side density, zero-gradient patches extrapolate the owner value.
fn momentum_flux(
    mesh: &Mesh,
    rho: &ScalarField,
    v: &VectorField,
    u_bc: &VectorBoundaryPolicy,
) -> FaceField {
    let n_cells = mesh.num_cells();
    let mut rho_v = VectorField::zeros(n_cells);
    hadamard(&rho.values, &v.vx, &mut rho_v.vx);
    hadamard(&rho.values, &v.vy, &mut rho_v.vy);

    let mut out = FaceField::zeros(mesh.num_faces());
    for f in 0..mesh.num_faces() {
        let owner = mesh.face_owner[f];
        let face_val = match mesh.face_neighbor[f] {
            Some(neigh) => {
                let w = mesh.interp_factor(f);
                rho_v.at(owner) + (rho_v.at(neigh) - rho_v.at(owner)) * w
            }
            None => match mesh.face_boundary[f].and_then(|bt| u_bc.value_for(bt)) {
                Some(ub) => ub * rho.values[owner],
                None => rho_v.at(owner),
            },
        };
        out.values[f] = face_val.dot(&mesh.face_sf(f));
    }
    out
}

/// Re-evaluate boundary fluxes from the velocity boundary conditions.
fn correct_boundary_flux(
    mesh: &Mesh,
    rho_f: &FaceField,
    u_bc: &VectorBoundaryPolicy,
    phi: &mut FaceField,
) {
    for f in 0..mesh.num_faces() {
        if mesh.face_neighbor[f].is_some() {
            continue;
        }
        if let Some(ub) = mesh.face_boundary[f].and_then(|bt| u_bc.value_for(bt)) {
            phi.values[f] = rho_f.values[f] * ub.dot(&mesh.face_sf(f));
        }
    }
}
