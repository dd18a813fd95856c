use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::Path;

use nalgebra::DVector;

use crate::discretization::mesh::Mesh;
use crate::numerics::transient::StepRecord;

/// Write column-major data with a header row. Shorter columns leave blanks.
pub fn write_csv<P: AsRef<Path>>(path: P, headers: &[&str], columns: &[Vec<f64>]) -> io::Result<()> {
    if headers.len() != columns.len() {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!(
                "header count ({}) does not match column count ({})",
                headers.len(),
                columns.len()
            ),
        ));
    }

    let mut out = BufWriter::new(File::create(path)?);
    writeln!(out, "{}", headers.join(","))?;

    let n_rows = columns.iter().map(Vec::len).max().unwrap_or(0);
    for i in 0..n_rows {
        let row: Vec<String> = columns
            .iter()
            .map(|col| col.get(i).map(|v| format!("{v:.15e}")).unwrap_or_default())
            .collect();
        writeln!(out, "{}", row.join(","))?;
    }
    out.flush()
}

/// One row per cell: centroid coordinates followed by the named cell fields.
pub fn write_cell_profile<P: AsRef<Path>>(
    path: P,
    mesh: &Mesh,
    fields: &[(&str, &DVector<f64>)],
) -> io::Result<()> {
    let n = mesh.num_cells();
    if let Some((name, _)) = fields.iter().find(|(_, v)| v.len() != n) {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("field '{name}' is not a cell field ({n} cells)"),
        ));
    }

    let mut headers = vec!["x", "y", "z"];
    headers.extend(fields.iter().map(|(name, _)| *name));

    let mut columns: Vec<Vec<f64>> = (0..3)
        .map(|d| mesh.cells.iter().map(|c| c.centroid[d]).collect())
        .collect();
    columns.extend(fields.iter().map(|(_, v)| v.iter().copied().collect()));
    write_csv(path, &headers, &columns)
}

/// Step history of a transient run.
pub fn write_history<P: AsRef<Path>>(path: P, history: &[StepRecord]) -> io::Result<()> {
    let mut out = BufWriter::new(File::create(path)?);
    writeln!(out, "step,time,dt,iterations,error")?;
    for r in history {
        writeln!(
            out,
            "{},{:.15e},{:.15e},{},{:.6e}",
            r.step, r.time, r.dt, r.iterations, r.error
        )?;
    }
    out.flush()
}
