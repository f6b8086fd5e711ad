use crate::solver::fields::ScalarField;
use serde::{Deserialize, Serialize};

/// Equation of state linking density to pressure.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub enum EquationOfState {
    /// Perfect gas at a frozen temperature: `rho = p / (R T)`,
    /// `psi = 1 / (R T)`.
    PerfectGas { r_specific: f64, temperature: f64 },

    /// Linearized barotropic law `rho = rho_ref + psi * (p - p_ref)`.
    /// With `psi = 0` this is the incompressible limit.
    Linear { rho_ref: f64, p_ref: f64, psi: f64 },
}

impl EquationOfState {
    pub fn density(&self, p: f64) -> f64 {
        match *self {
            EquationOfState::PerfectGas {
                r_specific,
                temperature,
            } => p / (r_specific * temperature),
            EquationOfState::Linear { rho_ref, p_ref, psi } => rho_ref + psi * (p - p_ref),
        }
    }

    /// `d(rho)/d(p)` at fixed thermodynamic state.
    pub fn compressibility(&self, _p: f64) -> f64 {
        match *self {
            EquationOfState::PerfectGas {
                r_specific,
                temperature,
            } => 1.0 / (r_specific * temperature),
            EquationOfState::Linear { psi, .. } => psi,
        }
    }
}

/// What the coupling core needs from the thermodynamics collaborator:
/// a density evaluation, the compressibility field, the physical density
/// bounds, and whether downstream transport wants `dp/dt`.
pub trait Thermodynamics {
    fn density(&self, p: &ScalarField, rho: &mut ScalarField);
    fn compressibility(&self, p: &ScalarField, psi: &mut ScalarField);
    fn rho_min(&self) -> f64;
    fn rho_max(&self) -> f64;
    fn needs_dpdt(&self) -> bool {
        false
    }
}

/// Default thermodynamics package around an [`EquationOfState`].
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct Thermo {
    pub eos: EquationOfState,
    pub rho_min: f64,
    pub rho_max: f64,
    pub dpdt: bool,
}

impl Thermo {
    pub fn new(eos: EquationOfState) -> Self {
        Self {
            eos,
            rho_min: 1e-3,
            rho_max: 1e3,
            dpdt: false,
        }
    }

    pub fn perfect_gas(r_specific: f64, temperature: f64) -> Self {
        Self::new(EquationOfState::PerfectGas {
            r_specific,
            temperature,
        })
    }

    pub fn with_bounds(mut self, rho_min: f64, rho_max: f64) -> Self {
        self.rho_min = rho_min;
        self.rho_max = rho_max;
        self
    }

    pub fn with_dpdt(mut self) -> Self {
        self.dpdt = true;
        self
    }
}

impl Thermodynamics for Thermo {
    fn density(&self, p: &ScalarField, rho: &mut ScalarField) {
        debug_assert_eq!(p.len(), rho.len());
        for (r, &pi) in rho.values.iter_mut().zip(&p.values) {
            *r = self.eos.density(pi);
        }
    }

    fn compressibility(&self, p: &ScalarField, psi: &mut ScalarField) {
        debug_assert_eq!(p.len(), psi.len());
        for (ps, &pi) in psi.values.iter_mut().zip(&p.values) {
            *ps = self.eos.compressibility(pi);
        }
    }

    fn rho_min(&self) -> f64 {
        self.rho_min
    }

    fn rho_max(&self) -> f64 {
        self.rho_max
    }

    fn needs_dpdt(&self) -> bool {
        self.dpdt
    }
}
