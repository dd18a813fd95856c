//! Two-point diffusion with cell and face unknowns.
//!
//! For a cell `c` and one of its faces `f` the flux leaving `c` through `f` is
//!
//! ```text
//! F_cf = k_f T_cf [ (u_c - u_f) + rho_c g . (x_f - x_c) ]
//! T_cf = A_f (n . K_c n) / |x_f - x_c|
//! ```
//!
//! Cell rows hold the net outflow `sum_f F_cf`. Face rows hold the flux
//! mismatch `-sum_c F_cf`, replaced by `u_f - g` on Dirichlet faces and
//! shifted by the prescribed flux on Neumann faces. The operator is stored as
//! one dense local matrix per cell so that the cell block is diagonal and
//! eliminates exactly onto the faces.

use std::sync::Arc;

use nalgebra::{DMatrix, DVector, Matrix3, Vector3};
use nalgebra_sparse::{CooMatrix, CsrMatrix};

use super::linear::LinearSolver;
use super::NumericalTolerances;
use crate::discretization::mesh::Mesh;
use crate::error::SolveError;
use crate::numerics::timing::record_linear_solve;
use crate::physics::composer::{BcKind, BoundaryConditions};
use crate::state::composite::{CompositeVector, Entity};

/// Cell-local stiffness: row/column 0 is the cell, `1 + i` its i-th face.
#[derive(Clone, Debug)]
pub struct LocalMatrix {
    pub faces: Vec<usize>,
    pub matrix: DMatrix<f64>,
    pub rhs: DVector<f64>,
}

enum Assembled {
    None,
    Local(DVector<f64>),
    Global(CsrMatrix<f64>),
}

pub struct DiffusionOperator {
    mesh: Arc<Mesh>,
    tolerances: NumericalTolerances,
    /// Per cell and local face: `A (n . K n) / d`.
    transmissibility: Vec<Vec<f64>>,
    /// Per cell and local face: `g . (x_f - x_c)`.
    elevation: Vec<Vec<f64>>,
    /// Coefficient-weighted transmissibility from the last `setup`.
    weighted: Vec<Vec<f64>>,
    /// `rho_c g . (x_f - x_c)` from the last `setup`.
    gravity_head: Vec<Vec<f64>>,
    local: Vec<LocalMatrix>,
    bc: Option<BoundaryConditions>,
    symbolic: bool,
    assembled: Assembled,
}

impl DiffusionOperator {
    pub fn new(
        mesh: Arc<Mesh>,
        tensors: &[Matrix3<f64>],
        gravity: [f64; 3],
        tolerances: NumericalTolerances,
    ) -> Self {
        let g = Vector3::from(gravity);
        let mut transmissibility = Vec::with_capacity(mesh.num_cells());
        let mut elevation = Vec::with_capacity(mesh.num_cells());
        for cell in &mesh.cells {
            let k = &tensors[cell.id];
            let mut trans = Vec::with_capacity(cell.face_ids.len());
            let mut elev = Vec::with_capacity(cell.face_ids.len());
            for &f in &cell.face_ids {
                let face = &mesh.faces[f];
                let n = Vector3::from(face.normal);
                let d = tolerances.safe_distance(face.centroid, cell.centroid);
                let area = face.area.max(tolerances.min_face_area);
                trans.push(area * n.dot(&(k * n)) / d);
                let dx = Vector3::from(face.centroid) - Vector3::from(cell.centroid);
                elev.push(g.dot(&dx));
            }
            transmissibility.push(trans);
            elevation.push(elev);
        }

        Self {
            mesh,
            tolerances,
            transmissibility,
            elevation,
            weighted: Vec::new(),
            gravity_head: Vec::new(),
            local: Vec::new(),
            bc: None,
            symbolic: false,
            assembled: Assembled::None,
        }
    }

    pub fn mesh(&self) -> &Arc<Mesh> {
        &self.mesh
    }

    /// Declare the structure of every local matrix. Must precede any assembly.
    pub fn symbolic_assemble(&mut self) {
        self.local = self
            .mesh
            .cells
            .iter()
            .map(|cell| {
                let n = 1 + cell.face_ids.len();
                LocalMatrix {
                    faces: cell.face_ids.clone(),
                    matrix: DMatrix::zeros(n, n),
                    rhs: DVector::zeros(n),
                }
            })
            .collect();
        self.symbolic = true;
    }

    pub fn is_symbolic(&self) -> bool {
        self.symbolic
    }

    fn check_symbolic(&self, what: &str) {
        assert!(
            self.symbolic,
            "diffusion operator: {what} called before symbolic_assemble()"
        );
    }

    /// Clear every local matrix and forget boundary conditions and assembly.
    pub fn init(&mut self) {
        self.check_symbolic("init");
        for local in self.local.iter_mut() {
            local.matrix.fill(0.0);
            local.rhs.fill(0.0);
        }
        self.weighted.clear();
        self.gravity_head.clear();
        self.bc = None;
        self.assembled = Assembled::None;
    }

    /// Add the diffusion stiffness built from face coefficients and, when
    /// gravity is active, per-cell mass densities.
    pub fn setup(&mut self, face_coef: &DVector<f64>, density: Option<&DVector<f64>>) {
        self.check_symbolic("setup");
        self.weighted.clear();
        self.gravity_head.clear();
        for (c, local) in self.local.iter_mut().enumerate() {
            let mut weighted = Vec::with_capacity(local.faces.len());
            let mut heads = Vec::with_capacity(local.faces.len());
            for (i, &f) in local.faces.iter().enumerate() {
                let t = self.transmissibility[c][i] * face_coef[f];
                let head = density.map_or(0.0, |rho| rho[c] * self.elevation[c][i]);
                local.matrix[(0, 0)] += t;
                local.matrix[(0, 1 + i)] -= t;
                local.matrix[(1 + i, 0)] -= t;
                local.matrix[(1 + i, 1 + i)] += t;
                local.rhs[0] -= t * head;
                local.rhs[1 + i] += t * head;
                weighted.push(t);
                heads.push(head);
            }
            self.weighted.push(weighted);
            self.gravity_head.push(heads);
        }
        self.bc = None;
        self.assembled = Assembled::None;
    }

    /// Unweighted transmissibility and gravity head of the last `setup` for
    /// face `f` seen from cell `c`.
    pub fn cell_face_terms(&self, c: usize, f: usize) -> Option<(f64, f64)> {
        let i = self.mesh.cells[c].face_ids.iter().position(|&g| g == f)?;
        let head = self.gravity_head.get(c).map_or(0.0, |h| h[i]);
        Some((self.transmissibility[c][i], head))
    }

    /// Add a per-cell diagonal term (accumulation or source derivative).
    pub fn add_cell_diagonal(&mut self, diag: &DVector<f64>) {
        self.check_symbolic("add_cell_diagonal");
        for (c, local) in self.local.iter_mut().enumerate() {
            local.matrix[(0, 0)] += diag[c];
        }
    }

    /// Impose composed boundary conditions on the local systems.
    pub fn apply_bcs(&mut self, bc: &BoundaryConditions) {
        self.check_symbolic("apply_bcs");
        for local in self.local.iter_mut() {
            let n = local.faces.len();
            for i in 0..n {
                let f = local.faces[i];
                match bc.get(f) {
                    (BcKind::Dirichlet, value) => {
                        for j in 0..=n {
                            if j != 1 + i {
                                local.rhs[j] -= local.matrix[(j, 1 + i)] * value;
                                local.matrix[(j, 1 + i)] = 0.0;
                                local.matrix[(1 + i, j)] = 0.0;
                            }
                        }
                        local.matrix[(1 + i, 1 + i)] = 1.0;
                        local.rhs[1 + i] = value;
                    }
                    (BcKind::Neumann, q) => {
                        local.rhs[1 + i] -= q * self.mesh.faces[f].area;
                    }
                    (BcKind::None, _) => {}
                }
            }
        }
        self.bc = Some(bc.clone());
    }

    pub fn local_matrices(&self) -> &[LocalMatrix] {
        &self.local
    }

    /// `A u - b` on cells and faces.
    pub fn residual(&self, u: &CompositeVector) -> CompositeVector {
        self.check_symbolic("residual");
        let uc = u.component(Entity::Cell);
        let uf = u.component(Entity::Face);
        let mut r = CompositeVector::cells_and_faces(&self.mesh);
        {
            let mut rc = DVector::zeros(self.mesh.num_cells());
            let mut rf = DVector::zeros(self.mesh.num_faces());
            for (c, local) in self.local.iter().enumerate() {
                let mut x = DVector::zeros(1 + local.faces.len());
                x[0] = uc[c];
                for (i, &f) in local.faces.iter().enumerate() {
                    x[1 + i] = uf[f];
                }
                let y = &local.matrix * x - &local.rhs;
                rc[c] += y[0];
                for (i, &f) in local.faces.iter().enumerate() {
                    rf[f] += y[1 + i];
                }
            }
            r.component_mut(Entity::Cell).copy_from(&rc);
            r.component_mut(Entity::Face).copy_from(&rf);
        }
        r
    }

    /// Flux through every face along its normal (out of its first cell).
    pub fn fluxes(&self, u: &CompositeVector) -> DVector<f64> {
        self.check_symbolic("fluxes");
        let uc = u.component(Entity::Cell);
        let uf = u.component(Entity::Face);
        let mut flux = DVector::zeros(self.mesh.num_faces());
        for (c, local) in self.local.iter().enumerate() {
            for (i, &f) in local.faces.iter().enumerate() {
                if self.mesh.faces[f].neighbor_cell_ids.0 != c {
                    continue;
                }
                let face_value = match &self.bc {
                    Some(bc) if bc.markers[f] == BcKind::Dirichlet => bc.values[f],
                    _ => uf[f],
                };
                flux[f] = self.weighted[c][i] * (uc[c] - face_value + self.gravity_head[c][i]);
            }
        }
        flux
    }

    /// Solve the face rows for face values with the cell values held fixed.
    pub fn update_consistent_faces(
        &self,
        u: &mut CompositeVector,
        solver: &dyn LinearSolver,
    ) -> Result<(), SolveError> {
        self.check_symbolic("update_consistent_faces");
        let nf = self.mesh.num_faces();
        let uc = u.component(Entity::Cell).clone();
        let mut coo = CooMatrix::new(nf, nf);
        let mut rhs = DVector::zeros(nf);
        for (c, local) in self.local.iter().enumerate() {
            for (i, &f) in local.faces.iter().enumerate() {
                rhs[f] += local.rhs[1 + i] - local.matrix[(1 + i, 0)] * uc[c];
                for (j, &g) in local.faces.iter().enumerate() {
                    let v = local.matrix[(1 + i, 1 + j)];
                    if v != 0.0 {
                        coo.push(f, g, v);
                    }
                }
            }
        }
        let xf = record_linear_solve(|| solver.solve(&CsrMatrix::from(&coo), &rhs))?;
        u.component_mut(Entity::Face).copy_from(&xf);
        Ok(())
    }

    /// Cheap block-Jacobi assembly: keep only the diagonal.
    pub fn assemble_local(&mut self) {
        self.check_symbolic("assemble_local");
        let nc = self.mesh.num_cells();
        let mut diag = DVector::zeros(nc + self.mesh.num_faces());
        for (c, local) in self.local.iter().enumerate() {
            diag[c] += local.matrix[(0, 0)];
            for (i, &f) in local.faces.iter().enumerate() {
                diag[nc + f] += local.matrix[(1 + i, 1 + i)];
            }
        }
        self.assembled = Assembled::Local(diag);
    }

    /// Full operator over `[cells, faces]`.
    pub fn assemble_global(&self) -> CsrMatrix<f64> {
        self.check_symbolic("assemble_global");
        let nc = self.mesh.num_cells();
        let n = nc + self.mesh.num_faces();
        let mut coo = CooMatrix::new(n, n);
        for (c, local) in self.local.iter().enumerate() {
            let index = |k: usize| if k == 0 { c } else { nc + local.faces[k - 1] };
            for j in 0..local.matrix.nrows() {
                for k in 0..local.matrix.ncols() {
                    let v = local.matrix[(j, k)];
                    if v != 0.0 {
                        coo.push(index(j), index(k), v);
                    }
                }
            }
        }
        CsrMatrix::from(&coo)
    }

    /// Eliminate the (diagonal) cell block onto faces:
    /// `S = A_ff - A_fc A_cc^-1 A_cf`.
    pub fn compute_schur_complement(&mut self) {
        self.check_symbolic("compute_schur_complement");
        let nf = self.mesh.num_faces();
        let mut coo = CooMatrix::new(nf, nf);
        for local in &self.local {
            let a = self.cell_pivot(local);
            let n = local.faces.len();
            for i in 0..n {
                for j in 0..n {
                    let v = local.matrix[(1 + i, 1 + j)]
                        - local.matrix[(1 + i, 0)] * local.matrix[(0, 1 + j)] / a;
                    if v != 0.0 {
                        coo.push(local.faces[i], local.faces[j], v);
                    }
                }
            }
        }
        self.assembled = Assembled::Global(CsrMatrix::from(&coo));
    }

    #[inline]
    fn cell_pivot(&self, local: &LocalMatrix) -> f64 {
        let a = local.matrix[(0, 0)];
        if a.abs() < self.tolerances.eps_diagonal {
            self.tolerances.eps_diagonal
        } else {
            a
        }
    }

    pub fn schur_complement(&self) -> Option<&CsrMatrix<f64>> {
        match &self.assembled {
            Assembled::Global(s) => Some(s),
            _ => None,
        }
    }

    /// Approximately solve `A x = r` with whichever assembly was performed last.
    pub fn apply_inverse(
        &self,
        r: &CompositeVector,
        solver: &dyn LinearSolver,
    ) -> Result<CompositeVector, SolveError> {
        let nc = self.mesh.num_cells();
        let rc = r.component(Entity::Cell);
        let rf = r.component(Entity::Face);
        let mut out = r.like();

        match &self.assembled {
            Assembled::None => panic!("diffusion operator applied before assembly"),
            Assembled::Local(diag) => {
                let eps = self.tolerances.eps_diagonal;
                let inv = |d: f64, v: f64| if d.abs() > eps { v / d } else { v };
                let xc = out.component_mut(Entity::Cell);
                for c in 0..nc {
                    xc[c] = inv(diag[c], rc[c]);
                }
                let xf = out.component_mut(Entity::Face);
                for f in 0..rf.len() {
                    xf[f] = inv(diag[nc + f], rf[f]);
                }
            }
            Assembled::Global(schur) => {
                let mut rhs = rf.clone();
                for (c, local) in self.local.iter().enumerate() {
                    let a = self.cell_pivot(local);
                    for (i, &f) in local.faces.iter().enumerate() {
                        rhs[f] -= local.matrix[(1 + i, 0)] * rc[c] / a;
                    }
                }
                let xf = record_linear_solve(|| solver.solve(schur, &rhs))?;
                let mut xc = DVector::zeros(nc);
                for (c, local) in self.local.iter().enumerate() {
                    let a = self.cell_pivot(local);
                    let coupled: f64 = local
                        .faces
                        .iter()
                        .enumerate()
                        .map(|(i, &f)| local.matrix[(0, 1 + i)] * xf[f])
                        .sum();
                    xc[c] = (rc[c] - coupled) / a;
                }
                out.component_mut(Entity::Cell).copy_from(&xc);
                out.component_mut(Entity::Face).copy_from(&xf);
            }
        }
        Ok(out)
    }
}
