//! JSON Lines output.

use firehose_extract_core::{BlockRange, Chain, Error, Record, Result};
use std::{
    fs::File,
    io::{BufWriter, Write},
    path::{Path, PathBuf},
};

/// Directory used when no output file is given.
pub const DEFAULT_OUTPUT_DIR: &str = "jsonl";

/// Default output path: `jsonl/{chain}_{accounts}_{start}_to_{end}.jsonl`,
/// with accounts joined by `_`.
pub fn output_filename<S: AsRef<str>>(chain: Chain, accounts: &[S], period: BlockRange) -> PathBuf {
    let accounts = accounts
        .iter()
        .map(AsRef::as_ref)
        .collect::<Vec<_>>()
        .join("_");

    Path::new(DEFAULT_OUTPUT_DIR).join(format!(
        "{chain}_{accounts}_{}_to_{}.jsonl",
        period.start(),
        period.end()
    ))
}

/// Writes records as one JSON object per line, truncating any existing file.
pub struct JsonlSink {
    path: PathBuf,
}

impl JsonlSink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Writes every record and returns how many lines were written. Missing
    /// parent directories are created.
    pub fn write_all<'a, I>(&self, records: I) -> Result<usize>
    where
        I: IntoIterator<Item = &'a Record>,
    {
        let io_error = |e: std::io::Error| sink_error(&self.path, e);

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(io_error)?;
        }

        let file = File::create(&self.path).map_err(io_error)?;
        let mut writer = BufWriter::new(file);
        let mut written = 0;

        for record in records {
            serde_json::to_writer(&mut writer, record)
                .map_err(|e| sink_error(&self.path, e))?;
            writer.write_all(b"\n").map_err(io_error)?;
            written += 1;
        }

        writer.flush().map_err(io_error)?;
        Ok(written)
    }
}

fn sink_error(path: &Path, e: impl core::fmt::Display) -> Error {
    Error::Sink {
        context: format!("{}: {e}", path.display()),
    }
}
