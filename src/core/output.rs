use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::info;

use crate::core::error::{ReportError, Result};
use crate::core::report::{
    RenderedReport, BREAKDOWN_STEM, DATE_STAMP_FORMAT, SUMMARY_STEM, TASKS_STEM,
};

/// Writes report artifacts as a dated copy plus a `_latest` copy.
pub struct ReportWriter {
    output_dir: PathBuf,
    replace_existing: bool,
}

/// One artifact to be written under both of its names.
struct Artifact<'a> {
    stem: &'static str,
    extension: &'static str,
    content: &'a str,
}

impl ReportWriter {
    pub fn new(output_dir: impl Into<PathBuf>) -> Self {
        Self {
            output_dir: output_dir.into(),
            replace_existing: false,
        }
    }

    /// Allow a rerun on the same date to replace that date's artifacts.
    pub fn replace_existing(mut self, replace: bool) -> Self {
        self.replace_existing = replace;
        self
    }

    /// Write every artifact of `report`, returning the paths written.
    ///
    /// Dated targets are checked before anything is written, so a refused run
    /// leaves the directory untouched.
    pub fn write(&self, report: &RenderedReport) -> Result<Vec<PathBuf>> {
        fs::create_dir_all(&self.output_dir)
            .map_err(|e| ReportError::write(&self.output_dir, e))?;
        info!("Ensured output directory exists: {}", self.output_dir.display());

        let mut artifacts = vec![
            Artifact {
                stem: BREAKDOWN_STEM,
                extension: "csv",
                content: &report.breakdown_csv,
            },
            Artifact {
                stem: SUMMARY_STEM,
                extension: "md",
                content: &report.markdown,
            },
        ];
        if let Some(tasks) = &report.tasks_csv {
            artifacts.push(Artifact {
                stem: TASKS_STEM,
                extension: "csv",
                content: tasks,
            });
        }

        let stamp = report.run_date.format(DATE_STAMP_FORMAT).to_string();
        if !self.replace_existing {
            for artifact in &artifacts {
                let dated = self.dated_path(artifact, &stamp);
                if dated.exists() {
                    return Err(ReportError::AlreadyExists { path: dated });
                }
            }
        }

        let mut written = Vec::new();
        for artifact in &artifacts {
            for path in [self.dated_path(artifact, &stamp), self.latest_path(artifact)] {
                info!("Saving {}", path.display());
                write_atomic(&path, artifact.content.as_bytes())?;
                written.push(path);
            }
        }

        info!("All outputs saved successfully");
        Ok(written)
    }

    fn dated_path(&self, artifact: &Artifact<'_>, stamp: &str) -> PathBuf {
        self.output_dir
            .join(format!("{}_{}.{}", artifact.stem, stamp, artifact.extension))
    }

    fn latest_path(&self, artifact: &Artifact<'_>) -> PathBuf {
        self.output_dir
            .join(format!("{}_latest.{}", artifact.stem, artifact.extension))
    }
}

/// Write through a temp file in the same directory, then rename over `path`.
pub fn write_atomic(path: &Path, data: &[u8]) -> Result<()> {
    let parent = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    let mut tmp =
        tempfile::NamedTempFile::new_in(parent).map_err(|e| ReportError::write(path, e))?;
    tmp.write_all(data).map_err(|e| ReportError::write(path, e))?;
    tmp.flush().map_err(|e| ReportError::write(path, e))?;
    tmp.persist(path)
        .map_err(|e| ReportError::write(path, e.error))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn report(tasks: bool) -> RenderedReport {
        RenderedReport {
            run_date: NaiveDate::from_ymd_opt(2025, 7, 1).unwrap(),
            markdown: "# STT Transcription Report\n".to_string(),
            breakdown_csv: "origin_batch_id\n".to_string(),
            tasks_csv: tasks.then(|| "id\n".to_string()),
        }
    }

    #[test]
    fn test_write_atomic_creates_file() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("test.txt");
        write_atomic(&path, b"hello world").unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), "hello world");

        write_atomic(&path, b"replaced").unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), "replaced");
    }

    #[test]
    fn test_writes_dated_and_latest() {
        let tmp = tempfile::tempdir().unwrap();
        let out = tmp.path().join("reports");
        let written = ReportWriter::new(&out).write(&report(true)).unwrap();

        let names: Vec<String> = written
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(
            names,
            vec![
                "original_id_breakdown_20250701.csv",
                "original_id_breakdown_latest.csv",
                "summary_report_20250701.md",
                "summary_report_latest.md",
                "transcription_data_20250701.csv",
                "transcription_data_latest.csv",
            ]
        );
        assert_eq!(
            fs::read_to_string(out.join("summary_report_latest.md")).unwrap(),
            "# STT Transcription Report\n"
        );
    }

    #[test]
    fn test_refuses_to_overwrite_dated_report() {
        let tmp = tempfile::tempdir().unwrap();
        let writer = ReportWriter::new(tmp.path());
        writer.write(&report(false)).unwrap();

        let mut rerun = report(false);
        rerun.markdown = "changed\n".to_string();
        let err = writer.write(&rerun).unwrap_err();
        assert_eq!(err.kind(), "write");
        // Nothing was touched, latest included.
        assert_eq!(
            fs::read_to_string(tmp.path().join("summary_report_latest.md")).unwrap(),
            "# STT Transcription Report\n"
        );

        ReportWriter::new(tmp.path())
            .replace_existing(true)
            .write(&rerun)
            .unwrap();
        assert_eq!(
            fs::read_to_string(tmp.path().join("summary_report_20250701.md")).unwrap(),
            "changed\n"
        );
    }

    #[test]
    fn test_unwritable_location_is_write_error() {
        let tmp = tempfile::tempdir().unwrap();
        let blocker = tmp.path().join("not-a-dir");
        fs::write(&blocker, b"file").unwrap();

        let err = ReportWriter::new(blocker.join("reports"))
            .write(&report(false))
            .unwrap_err();
        assert_eq!(err.kind(), "write");
    }
}
