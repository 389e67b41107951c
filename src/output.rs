//! Append-only CSV persistence for completed trials.
//!
//! Each row is appended independently so a crash mid-run loses at most the
//! trial being written. Durations are nanoseconds; the speedup is a decimal
//! fraction.

use std::fs::OpenOptions;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

pub const CSV_HEADER: &str =
    "selectedClassLineNo,speedup,duration,effectiveDuration,progressPointHits";

#[derive(Debug)]
pub struct CsvSink {
    path: PathBuf,
}

impl CsvSink {
    /// Opens the sink, appending the header row. The header is written on
    /// every attach so multi-run files stay self-describing per run.
    pub fn create(path: &Path) -> io::Result<Self> {
        let mut file = OpenOptions::new().create(true).append(true).open(path)?;
        writeln!(file, "{CSV_HEADER}")?;
        Ok(Self { path: path.to_path_buf() })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Appends one completed-trial row.
    pub fn append_row(
        &self,
        class: &str,
        line: i32,
        speedup: f32,
        duration_ns: i64,
        effective_ns: i64,
        points_hit: u64,
    ) -> io::Result<()> {
        let mut file = OpenOptions::new().append(true).open(&self.path)?;
        writeln!(
            file,
            "{class}:{line},{speedup},{duration_ns},{effective_ns},{points_hit}"
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn writes_header_and_rows() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("out.csv");
        let sink = CsvSink::create(&path).expect("create");
        sink.append_row("com.acme.Widget", 42, 0.25, 102_000_000, 98_500_000, 17)
            .expect("append");
        sink.append_row("com.acme.Widget", 42, 0.0, 101_000_000, 101_000_000, 25)
            .expect("append");

        let contents = std::fs::read_to_string(&path).expect("read");
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(lines[0], CSV_HEADER);
        assert_eq!(lines[1], "com.acme.Widget:42,0.25,102000000,98500000,17");
        assert_eq!(lines[2], "com.acme.Widget:42,0,101000000,101000000,25");
    }

    #[test]
    fn reattach_appends_new_header() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("out.csv");
        CsvSink::create(&path).expect("first attach");
        CsvSink::create(&path).expect("second attach");
        let contents = std::fs::read_to_string(&path).expect("read");
        assert_eq!(contents.lines().filter(|l| *l == CSV_HEADER).count(), 2);
    }
}
