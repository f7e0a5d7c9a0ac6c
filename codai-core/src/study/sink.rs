//! Where finished study reports go

use super::StudyReport;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;
use tracing::info;

/// Destination for a [`StudyReport`]
pub trait ReportSink {
    fn write_report(&mut self, report: &StudyReport) -> crate::Result<()>;
}

/// Pretty-printed JSON
#[derive(Debug)]
pub struct JsonReportSink<W: Write> {
    writer: W,
}

impl<W: Write> JsonReportSink<W> {
    pub const fn new(writer: W) -> Self {
        Self { writer }
    }

    pub fn into_inner(self) -> W {
        self.writer
    }
}

impl<W: Write> ReportSink for JsonReportSink<W> {
    fn write_report(&mut self, report: &StudyReport) -> crate::Result<()> {
        serde_json::to_writer_pretty(&mut self.writer, report)?;
        writeln!(self.writer)?;
        self.writer.flush()?;
        Ok(())
    }
}

/// YAML document
#[derive(Debug)]
pub struct YamlReportSink<W: Write> {
    writer: W,
}

impl<W: Write> YamlReportSink<W> {
    pub const fn new(writer: W) -> Self {
        Self { writer }
    }

    pub fn into_inner(self) -> W {
        self.writer
    }
}

impl<W: Write> ReportSink for YamlReportSink<W> {
    fn write_report(&mut self, report: &StudyReport) -> crate::Result<()> {
        serde_yaml::to_writer(&mut self.writer, report)?;
        self.writer.flush()?;
        Ok(())
    }
}

/// Write `report` to `path`, picking YAML for `.yaml`/`.yml` and JSON
/// otherwise
pub fn write_report_file(report: &StudyReport, path: &Path) -> crate::Result<()> {
    let file = File::create(path).map_err(|err| crate::Error::from_io(path, err))?;
    let writer = BufWriter::new(file);

    match path.extension().and_then(|ext| ext.to_str()) {
        Some("yaml" | "yml") => YamlReportSink::new(writer).write_report(report)?,
        _ => JsonReportSink::new(writer).write_report(report)?,
    }

    info!(path = %path.display(), "study report written");
    Ok(())
}
