use super::records::RecordError;
use super::{ParticleFileReader, PositionBuffer, fold_unit_interval, open_file};
use crate::domain::{ParticleFileFormat, PmResult};
use std::io::BufRead;
use std::path::{Path, PathBuf};

/// Plain-text particle files `{prefix}.{i}`, numbered from 1.
///
/// The first line holds the particle count, every following line
/// `x y z mass` in units of the box. The mass column is ignored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AsciiReader {
    directory: PathBuf,
    prefix: String,
    file_count: usize,
}

impl AsciiReader {
    pub fn new(directory: impl Into<PathBuf>, prefix: impl Into<String>, file_count: usize) -> Self {
        Self {
            directory: directory.into(),
            prefix: prefix.into(),
            file_count,
        }
    }
}

impl ParticleFileReader for AsciiReader {
    fn format(&self) -> ParticleFileFormat {
        ParticleFileFormat::Ascii
    }

    fn file_count(&self) -> usize {
        self.file_count
    }

    fn file_path(&self, index: usize) -> PathBuf {
        self.directory.join(format!("{}.{}", self.prefix, index + 1))
    }

    fn particle_count(&self, index: usize) -> PmResult<usize> {
        let path = self.file_path(index);
        let mut lines = open_file(&path)?.lines();
        Ok(read_count(&path, &mut lines)?)
    }

    fn read_file(&self, index: usize) -> PmResult<PositionBuffer> {
        let path = self.file_path(index);
        let mut planar = parse_positions(open_file(&path)?, &path)?;
        fold_unit_interval(&mut planar);
        Ok(PositionBuffer::Planar(planar))
    }
}

fn read_count(
    path: &Path,
    lines: &mut impl Iterator<Item = std::io::Result<String>>,
) -> Result<usize, RecordError> {
    let line = next_line(path, lines, 1)?;
    line.trim().parse::<usize>().map_err(|_| RecordError::Text {
        path: path.to_path_buf(),
        line: 1,
        reason: format!("expected a particle count, found '{}'", line.trim()),
    })
}

fn next_line(
    path: &Path,
    lines: &mut impl Iterator<Item = std::io::Result<String>>,
    number: usize,
) -> Result<String, RecordError> {
    match lines.next() {
        Some(Ok(line)) => Ok(line),
        Some(Err(source)) => Err(RecordError::Io {
            path: path.to_path_buf(),
            source,
        }),
        None => Err(RecordError::Text {
            path: path.to_path_buf(),
            line: number,
            reason: "file ends before the announced particle count".to_string(),
        }),
    }
}

/// Parses a whole file into planar `[x.., y.., z..]` order.
pub(super) fn parse_positions(source: impl BufRead, path: &Path) -> Result<Vec<f64>, RecordError> {
    let mut lines = source.lines();
    let count = read_count(path, &mut lines)?;
    let mut planar = vec![0.0; 3 * count];
    for particle in 0..count {
        let number = particle + 2;
        let line = next_line(path, &mut lines, number)?;
        let mut columns = line.split_whitespace();
        let mut row = [0.0; 4];
        for value in &mut row {
            *value = columns
                .next()
                .and_then(|token| token.parse::<f64>().ok())
                .ok_or_else(|| RecordError::Text {
                    path: path.to_path_buf(),
                    line: number,
                    reason: format!("expected four numeric columns, found '{}'", line.trim()),
                })?;
        }
        for (axis, value) in row[..3].iter().enumerate() {
            planar[particle + axis * count] = *value;
        }
    }
    Ok(planar)
}

/// Writes positions as an ASCII particle file with unit masses.
pub fn write_ascii_particles(
    mut sink: impl std::io::Write,
    positions: &[[f64; 3]],
) -> std::io::Result<()> {
    writeln!(sink, "{}", positions.len())?;
    for [x, y, z] in positions {
        writeln!(sink, "{x:e} {y:e} {z:e} 1.0")?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::{AsciiReader, parse_positions, write_ascii_particles};
    use crate::modules::ingest::ParticleFileReader;
    use std::io::Cursor;
    use std::path::Path;

    #[test]
    fn positions_come_back_planar() {
        let mut text = Vec::new();
        write_ascii_particles(&mut text, &[[0.1, 0.2, 0.3], [0.4, 0.5, 0.6]])
            .expect("writing to memory should succeed");
        let planar = parse_positions(Cursor::new(text), Path::new("mem.1"))
            .expect("file should parse");
        assert_eq!(planar, vec![0.1, 0.4, 0.2, 0.5, 0.3, 0.6]);
    }

    #[test]
    fn short_file_reports_the_line() {
        let error = parse_positions(Cursor::new("3\n0.1 0.2 0.3 1\n"), Path::new("cut.1"))
            .expect_err("two particles are missing");
        let message = error.to_string();
        assert!(message.contains("cut.1"));
        assert!(message.contains("line 3"));
    }

    #[test]
    fn bad_column_is_a_text_error() {
        let error = parse_positions(Cursor::new("1\n0.1 oops 0.3 1\n"), Path::new("bad.1"))
            .expect_err("non-numeric column");
        assert!(error.to_string().contains("four numeric columns"));
    }

    #[test]
    fn missing_mass_column_is_a_text_error() {
        let error = parse_positions(Cursor::new("1\n0.1 0.2 0.3\n"), Path::new("short.1"))
            .expect_err("the mass column is missing");
        let message = error.to_string();
        assert!(message.contains("four numeric columns"));
        assert!(message.contains("line 2"));
    }

    #[test]
    fn file_names_are_one_based() {
        let reader = AsciiReader::new("out", "particles", 2);
        assert_eq!(
            reader.file_path(0),
            std::path::PathBuf::from("out/particles.1")
        );
    }
}
