use std::sync::Arc;

use nalgebra::{DVector, Matrix3};
use nalgebra_sparse::CsrMatrix;

use crate::discretization::mesh::Mesh;
use crate::error::SolveError;
use crate::operators::diffusion::DiffusionOperator;
use crate::operators::linear::LinearSolver;
use crate::operators::NumericalTolerances;
use crate::physics::composer::BoundaryConditions;
use crate::state::composite::{CompositeVector, Entity};
use crate::state::evaluator::derivative_key;
use crate::state::State;

/// How the linearized operator is prepared for inversion.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AssemblyMode {
    /// Diagonal only; applying the inverse is a Jacobi sweep.
    Local,
    /// Full operator, inverted through the face Schur complement.
    Global,
}

/// Drops the accumulation derivative of cells whose companion field sits
/// below a threshold.
#[derive(Clone, Debug)]
pub struct AccumulationMask {
    pub key: String,
    pub threshold: f64,
}

/// Approximate Jacobian of a diffusion-accumulation residual.
pub struct PreconditionerBuilder {
    operator: DiffusionOperator,
    solver: Box<dyn LinearSolver>,
    mode: AssemblyMode,
    mask: Option<AccumulationMask>,
    requester: String,
    global: Option<CsrMatrix<f64>>,
}

impl PreconditionerBuilder {
    pub fn new(
        mesh: Arc<Mesh>,
        tensors: &[Matrix3<f64>],
        solver: Box<dyn LinearSolver>,
        mode: AssemblyMode,
        requester: &str,
    ) -> Self {
        // gravity only enters the right-hand side, never the Jacobian
        let operator = DiffusionOperator::new(mesh, tensors, [0.0; 3], NumericalTolerances::default());
        Self {
            operator,
            solver,
            mode,
            mask: None,
            requester: requester.to_string(),
            global: None,
        }
    }

    pub fn with_mask(mut self, mask: AccumulationMask) -> Self {
        self.mask = Some(mask);
        self
    }

    pub fn mode(&self) -> AssemblyMode {
        self.mode
    }

    pub fn symbolic_assemble(&mut self) {
        self.operator.symbolic_assemble();
    }

    pub fn init(&mut self) {
        self.operator.init();
        self.global = None;
    }

    pub fn add_diffusion(&mut self, face_coef: &DVector<f64>) {
        self.operator.setup(face_coef, None);
    }

    /// Add `dQ/du / h` on cells, masked by the accumulation policy.
    pub fn add_accumulation(&mut self, state: &mut State, conserved: &str, primary: &str, h: f64) {
        state.has_derivative_changed(conserved, &self.requester, primary);
        let dq = state
            .field(&derivative_key(conserved, primary))
            .component(Entity::Cell);
        let mut diag = dq / h;
        if let Some(mask) = &self.mask {
            state.has_changed(&mask.key, &self.requester);
            let companion = state.field(&mask.key).component(Entity::Cell);
            let mut masked = 0;
            for (c, d) in diag.iter_mut().enumerate() {
                if companion[c] < mask.threshold {
                    *d = 0.0;
                    masked += 1;
                }
            }
            log::debug!("accumulation masked on {masked} cells by '{}'", mask.key);
        }
        self.operator.add_cell_diagonal(&diag);
    }

    /// Add `-dS/du` when the source depends on the primary variable.
    /// Returns whether anything was added.
    pub fn add_source_derivative(&mut self, state: &mut State, source: &str, primary: &str) -> bool {
        if !state.depends_on(source, primary) {
            return false;
        }
        state.has_derivative_changed(source, &self.requester, primary);
        let ds = state
            .field(&derivative_key(source, primary))
            .component(Entity::Cell);
        self.operator.add_cell_diagonal(&ds.map(|v| -v));
        true
    }

    pub fn apply_bcs(&mut self, bc: &BoundaryConditions) {
        self.operator.apply_bcs(bc);
    }

    pub fn assemble(&mut self) {
        match self.mode {
            AssemblyMode::Local => self.operator.assemble_local(),
            AssemblyMode::Global => {
                self.global = Some(self.operator.assemble_global());
                self.operator.compute_schur_complement();
            }
        }
        log::debug!("preconditioner assembled ({:?})", self.mode);
    }

    /// Full matrix of the last global assembly.
    pub fn global_matrix(&self) -> Option<&CsrMatrix<f64>> {
        self.global.as_ref()
    }

    pub fn operator(&self) -> &DiffusionOperator {
        &self.operator
    }

    pub fn apply_inverse(&self, r: &CompositeVector) -> Result<CompositeVector, SolveError> {
        self.operator.apply_inverse(r, self.solver.as_ref())
    }
}
