use crate::sampler::Sample;

use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

/// Returns `<directory>/<prefix>_<filename>`, or `<directory>/<filename>`
/// when the prefix is empty.
pub fn path(directory: &Path, prefix: &str, filename: &str) -> PathBuf {
    if prefix.is_empty() {
        directory.join(filename)
    } else {
        directory.join(format!("{prefix}_{filename}"))
    }
}

/// Creates or truncates the file at `path` and writes the samples to it.
pub fn write(path: &Path, header: &str, samples: &[Sample]) -> io::Result<()> {
    let mut writer = File::create(path).map(BufWriter::new)?;

    write_to(&mut writer, header, samples)?;

    writer.flush()
}

/// Writes the header row followed by one row per sample. The header keeps a
/// trailing comma for compatibility with existing consumers of these files.
pub fn write_to(writer: &mut impl Write, header: &str, samples: &[Sample]) -> io::Result<()> {
    writeln!(writer, "time[ms],{header},")?;

    for sample in samples {
        writeln!(
            writer,
            "{},{}",
            sample.captured_at().timestamp_millis(),
            sample.payload()
        )?;
    }

    Ok(())
}
