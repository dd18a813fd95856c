use super::mesh::{Cell, Face, Mesh};
use glam::DVec3;

/// Build a structured hexahedral mesh of `n[0] x n[1] x n[2]` cells spanning
/// `origin .. origin + extent`. Boundary faces are labelled
/// `xmin`, `xmax`, `ymin`, `ymax`, `zmin` and `zmax`.
pub fn create_box_mesh(n: [usize; 3], origin: [f64; 3], extent: [f64; 3]) -> Mesh {
    let [nx, ny, nz] = n;
    let h = DVec3::new(
        extent[0] / nx as f64,
        extent[1] / ny as f64,
        extent[2] / nz as f64,
    );
    let origin = DVec3::from_array(origin);
    let cell_id = |i: usize, j: usize, k: usize| i + nx * (j + ny * k);

    let mut cells = Vec::with_capacity(nx * ny * nz);
    for k in 0..nz {
        for j in 0..ny {
            for i in 0..nx {
                let centroid = origin + h * DVec3::new(i as f64 + 0.5, j as f64 + 0.5, k as f64 + 0.5);
                cells.push(Cell {
                    id: cell_id(i, j, k),
                    volume: h.x * h.y * h.z,
                    centroid: centroid.to_array(),
                    face_ids: Vec::with_capacity(6),
                    owned: true,
                });
            }
        }
    }

    let mut faces = Vec::new();
    // Sweep each axis; `along` is the number of face planes, `a`/`b` span the plane.
    for axis in 0..3 {
        let (na, nb, nc) = match axis {
            0 => (nx, ny, nz),
            1 => (ny, nx, nz),
            _ => (nz, nx, ny),
        };
        let area = match axis {
            0 => h.y * h.z,
            1 => h.x * h.z,
            _ => h.x * h.y,
        };
        let mut unit = [0.0; 3];
        unit[axis] = 1.0;
        let unit = DVec3::from_array(unit);
        let (lo, hi) = match axis {
            0 => ("xmin", "xmax"),
            1 => ("ymin", "ymax"),
            _ => ("zmin", "zmax"),
        };

        for c2 in 0..nc {
            for b in 0..nb {
                for a in 0..=na {
                    let ijk = |a: usize| match axis {
                        0 => (a, b, c2),
                        1 => (b, a, c2),
                        _ => (b, c2, a),
                    };
                    let (i, j, k) = ijk(a);
                    let mut offset = DVec3::new(i as f64 + 0.5, j as f64 + 0.5, k as f64 + 0.5);
                    offset[axis] = a as f64;
                    let centroid = (origin + h * offset).to_array();

                    let face = if a == 0 {
                        let (i, j, k) = ijk(0);
                        Face {
                            area,
                            normal: (-unit).to_array(),
                            neighbor_cell_ids: (cell_id(i, j, k), None),
                            centroid,
                            label: Some(lo.to_string()),
                        }
                    } else if a == na {
                        let (i, j, k) = ijk(na - 1);
                        Face {
                            area,
                            normal: unit.to_array(),
                            neighbor_cell_ids: (cell_id(i, j, k), None),
                            centroid,
                            label: Some(hi.to_string()),
                        }
                    } else {
                        let (i0, j0, k0) = ijk(a - 1);
                        let (i1, j1, k1) = ijk(a);
                        Face {
                            area,
                            normal: unit.to_array(),
                            neighbor_cell_ids: (cell_id(i0, j0, k0), Some(cell_id(i1, j1, k1))),
                            centroid,
                            label: None,
                        }
                    };

                    let f = faces.len();
                    cells[face.neighbor_cell_ids.0].face_ids.push(f);
                    if let Some(l) = face.neighbor_cell_ids.1 {
                        cells[l].face_ids.push(f);
                    }
                    faces.push(face);
                }
            }
        }
    }

    Mesh::new(cells, faces)
}

/// A vertical soil column of `nz` cells with unit cross-section, spanning
/// `z in [-depth, 0]`. The top face is labelled `surface`, the bottom `bottom`.
pub fn create_column_mesh(nz: usize, depth: f64) -> Mesh {
    let mut mesh = create_box_mesh([1, 1, nz], [0.0, 0.0, -depth], [1.0, 1.0, depth]);
    mesh.relabel("zmax", "surface");
    mesh.relabel("zmin", "bottom");
    mesh
}

/// A one-dimensional row of `n` cells along x with unit cross-section.
pub fn create_line_mesh(n: usize, length: f64) -> Mesh {
    create_box_mesh([n, 1, 1], [0.0, 0.0, 0.0], [length, 1.0, 1.0])
}
