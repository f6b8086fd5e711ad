pub mod solver;

pub use solver::eqn::PressureEqn;
pub use solver::error::CouplingError;
pub use solver::fields::{FlowState, MomentumCoeffs};
pub use solver::mesh::Mesh;
pub use solver::pimple::{IterationContext, PimpleConfig};
pub use solver::pressure::{PressureCorrector, PressureCorrectorConfig};
