//! NDJSON dumps of built row buffers, for `plan` runs.

use std::fs::{self, File};
use std::io::{self, BufWriter, Write};
use std::path::Path;

use serde::Serialize;

use crate::graph::{RowBuffers, TableCounts};

/// Writes one JSON object per line.
pub struct NdjsonWriter<W: Write> {
    writer: W,
    lines: usize,
}

impl<W: Write> NdjsonWriter<W> {
    pub fn new(writer: W) -> Self {
        Self { writer, lines: 0 }
    }

    pub fn write<T: Serialize>(&mut self, row: &T) -> io::Result<()> {
        serde_json::to_writer(&mut self.writer, row)?;
        self.writer.write_all(b"\n")?;
        self.lines += 1;
        Ok(())
    }

    pub fn write_all<T: Serialize>(&mut self, rows: &[T]) -> io::Result<()> {
        rows.iter().try_for_each(|row| self.write(row))
    }

    pub fn finish(mut self) -> io::Result<usize> {
        self.writer.flush()?;
        Ok(self.lines)
    }
}

fn dump_file<T: Serialize>(dir: &Path, name: &str, rows: &[T]) -> io::Result<usize> {
    let file = File::create(dir.join(name))?;
    let mut writer = NdjsonWriter::new(BufWriter::new(file));
    writer.write_all(rows)?;
    writer.finish()
}

/// Write the four buffers as `objects.ndjson`, `nodes_parentless.ndjson`,
/// `nodes_parented.ndjson` and `attributes.ndjson` under `dir`.
pub fn write_rows(dir: &Path, rows: &RowBuffers) -> io::Result<TableCounts> {
    fs::create_dir_all(dir)?;
    Ok(TableCounts {
        objects: dump_file(dir, "objects.ndjson", &rows.objects)?,
        parentless_nodes: dump_file(dir, "nodes_parentless.ndjson", &rows.parentless_nodes)?,
        parented_nodes: dump_file(dir, "nodes_parented.ndjson", &rows.parented_nodes)?,
        attributes: dump_file(dir, "attributes.ndjson", &rows.attributes)?,
    })
}
