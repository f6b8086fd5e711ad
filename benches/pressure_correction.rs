use criterion::{black_box, criterion_group, criterion_main, Criterion};
use rhopimple::solver::fields::{FlowState, MomentumCoeffs, ScalarField, VectorField};
use rhopimple::solver::linear_solver::BiCgStab;
use rhopimple::solver::mesh::Mesh;
use rhopimple::solver::options::SourceRegistry;
use rhopimple::solver::pimple::{IterationContext, PimpleConfig};
use rhopimple::solver::pressure::{PressureCorrector, PressureCorrectorConfig};
use rhopimple::solver::thermo::{EquationOfState, Thermo, Thermodynamics};

fn setup(n: usize) -> (Mesh, FlowState, MomentumCoeffs, Thermo, ScalarField) {
    let mesh = Mesh::closed_box(n, n, 1.0, 1.0);
    let thermo = Thermo::new(EquationOfState::Linear {
        rho_ref: 1.0,
        p_ref: 1.0,
        psi: 0.5,
    })
    .with_bounds(1e-6, 1e6);

    let n_cells = mesh.num_cells();
    let mut state = FlowState::new(n_cells, mesh.num_faces());
    state.p = ScalarField::from_fn(n_cells, |i| {
        let dx = mesh.cell_cx[i] - 0.5;
        let dy = mesh.cell_cy[i] - 0.5;
        1.0 + 0.3 * (-20.0 * (dx * dx + dy * dy)).exp()
    });
    thermo.density(&state.p, &mut state.rho_thermo);
    state.rho.values.copy_from_slice(&state.rho_thermo.values);
    state.store_old();

    let momentum = MomentumCoeffs::new(
        ScalarField::new(n_cells, 1.0),
        VectorField::zeros(n_cells),
    );
    let srho = ScalarField::zeros(n_cells);
    (mesh, state, momentum, thermo, srho)
}

fn pressure_correction_benchmark(c: &mut Criterion) {
    for n in [16usize, 32] {
        let (mesh, state, momentum, thermo, srho) = setup(n);
        let options = SourceRegistry::new();
        let pimple = PimpleConfig::default();
        let ctx = IterationContext::new(&pimple, 0, 0);

        c.bench_function(&format!("pressure_correct_{}x{}", n, n), |b| {
            b.iter(|| {
                let mut corrector = PressureCorrector::new(PressureCorrectorConfig::default());
                let mut s = state.clone();
                let report = corrector
                    .correct(
                        &mesh,
                        &mut s,
                        &momentum,
                        &thermo,
                        &srho,
                        &options,
                        &ctx,
                        0.01,
                        &BiCgStab,
                    )
                    .unwrap();
                black_box(report);
            })
        });
    }
}

criterion_group!(benches, pressure_correction_benchmark);
criterion_main!(benches);
