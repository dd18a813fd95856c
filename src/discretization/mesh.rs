use glam::DVec3;

/// The complete computational grid seen by one partition.
pub struct Mesh {
    pub cells: Vec<Cell>,
    pub faces: Vec<Face>,
    boundary_face_ids: Vec<usize>,
    face_to_boundary: Vec<Option<usize>>,
}

/// A single control volume.
pub struct Cell {
    pub id: usize,
    pub volume: f64,
    pub centroid: [f64; 3],
    pub face_ids: Vec<usize>,
    /// `false` for ghost cells owned by another partition.
    pub owned: bool,
}

/// An interface between two cells, or between a cell and the domain boundary.
pub struct Face {
    pub area: f64,
    /// Unit normal pointing out of the first cell in `neighbor_cell_ids`.
    pub normal: [f64; 3],
    /// Tuple of (cell1_id, optional cell2_id). `None` indicates a boundary face.
    pub neighbor_cell_ids: (usize, Option<usize>),
    pub centroid: [f64; 3],
    /// Region label used by boundary selectors ("surface", "bottom", ...).
    pub label: Option<String>,
}

impl Mesh {
    pub fn new(cells: Vec<Cell>, faces: Vec<Face>) -> Self {
        let mut boundary_face_ids = Vec::new();
        let mut face_to_boundary = vec![None; faces.len()];
        for (f, face) in faces.iter().enumerate() {
            if face.neighbor_cell_ids.1.is_none() {
                face_to_boundary[f] = Some(boundary_face_ids.len());
                boundary_face_ids.push(f);
            }
        }
        Self {
            cells,
            faces,
            boundary_face_ids,
            face_to_boundary,
        }
    }

    pub fn num_cells(&self) -> usize {
        self.cells.len()
    }

    pub fn num_faces(&self) -> usize {
        self.faces.len()
    }

    pub fn num_boundary_faces(&self) -> usize {
        self.boundary_face_ids.len()
    }

    #[inline]
    pub fn face_cells(&self, f: usize) -> (usize, Option<usize>) {
        self.faces[f].neighbor_cell_ids
    }

    /// Faces of cell `c` with the orientation of the stored normal relative
    /// to `c`: `+1.0` when the normal points out of `c`, `-1.0` otherwise.
    pub fn cell_faces_and_dirs(&self, c: usize) -> impl Iterator<Item = (usize, f64)> + '_ {
        self.cells[c].face_ids.iter().map(move |&f| {
            let dir = if self.faces[f].neighbor_cell_ids.0 == c {
                1.0
            } else {
                -1.0
            };
            (f, dir)
        })
    }

    /// Face ids on the domain boundary, in boundary-face index order.
    pub fn boundary_faces(&self) -> &[usize] {
        &self.boundary_face_ids
    }

    /// Index of face `f` in the boundary-face component, if it is a boundary face.
    #[inline]
    pub fn boundary_face_index(&self, f: usize) -> Option<usize> {
        self.face_to_boundary[f]
    }

    pub fn owned_cells(&self) -> impl Iterator<Item = &Cell> {
        self.cells.iter().filter(|c| c.owned)
    }

    /// Faces carrying a given region label.
    pub fn faces_with_label<'a>(&'a self, label: &'a str) -> impl Iterator<Item = usize> + 'a {
        self.faces
            .iter()
            .enumerate()
            .filter(move |(_, face)| face.label.as_deref() == Some(label))
            .map(|(f, _)| f)
    }

    pub fn relabel(&mut self, from: &str, to: &str) {
        for face in self.faces.iter_mut() {
            if face.label.as_deref() == Some(from) {
                face.label = Some(to.to_string());
            }
        }
    }
}

impl Face {
    #[inline]
    pub fn normal_vec(&self) -> DVec3 {
        DVec3::from_array(self.normal)
    }

    #[inline]
    pub fn centroid_vec(&self) -> DVec3 {
        DVec3::from_array(self.centroid)
    }

    #[inline]
    pub fn is_boundary(&self) -> bool {
        self.neighbor_cell_ids.1.is_none()
    }
}

impl Cell {
    #[inline]
    pub fn centroid_vec(&self) -> DVec3 {
        DVec3::from_array(self.centroid)
    }
}
