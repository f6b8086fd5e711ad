use crate::solver::options::SourceError;

/// Fatal errors raised while assembling the coupled pressure system.
///
/// Numerical trouble (bound overshoot, linear-solver stagnation) is *not*
/// represented here; those conditions are recovered from inside the
/// corrector. Only structural problems that leave the equation ill-defined
/// abort the run.
#[derive(Debug, thiserror::Error)]
pub enum CouplingError {
    #[error(transparent)]
    Source(#[from] SourceError),

    /// The assembled pressure equation has an empty row: no transient,
    /// Laplacian or constraint contribution touches this cell.
    #[error("pressure equation is singular: cell {cell} has a zero diagonal and no constraint")]
    SingularEquation { cell: usize },

    /// A constraint or source addressed a cell outside the mesh.
    #[error("{context}: cell index {cell} out of range (mesh has {n_cells} cells)")]
    CellOutOfRange {
        context: &'static str,
        cell: usize,
        n_cells: usize,
    },
}
