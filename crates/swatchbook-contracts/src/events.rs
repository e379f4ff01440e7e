use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{bail, Result};
use chrono::{SecondsFormat, Utc};
use serde::Serialize;
use serde_json::{Map, Value};
use uuid::Uuid;

/// Milestones of one palette run, written as the `type` of each line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    RunStarted,
    ImageAcquired,
    PaletteWarning,
    PaletteSynthesized,
    SwatchRendered,
    ReportWritten,
    CleanupWarning,
    RunFailed,
}

impl EventKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::RunStarted => "run_started",
            Self::ImageAcquired => "image_acquired",
            Self::PaletteWarning => "palette_warning",
            Self::PaletteSynthesized => "palette_synthesized",
            Self::SwatchRendered => "swatch_rendered",
            Self::ReportWritten => "report_written",
            Self::CleanupWarning => "cleanup_warning",
            Self::RunFailed => "run_failed",
        }
    }
}

#[derive(Serialize)]
struct EventLine<'a> {
    #[serde(rename = "type")]
    kind: EventKind,
    run_id: &'a str,
    ts: String,
    #[serde(flatten)]
    fields: &'a Map<String, Value>,
}

/// JSONL diagnostics for a single run: one line per milestone, appended in
/// the order the pipeline reaches them.
#[derive(Debug, Clone)]
pub struct EventWriter {
    path: PathBuf,
    run_id: String,
}

impl EventWriter {
    pub fn new(path: impl Into<PathBuf>, run_id: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            run_id: run_id.into(),
        }
    }

    pub fn for_new_run(path: impl Into<PathBuf>) -> Self {
        Self::new(path, new_run_id())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    /// `fields` must be a JSON object; its keys sit beside `type`, `run_id`
    /// and `ts`.
    pub fn record(&self, kind: EventKind, fields: Value) -> Result<()> {
        let Value::Object(fields) = fields else {
            bail!("{} event fields must be a JSON object", kind.as_str());
        };
        let line = serde_json::to_string(&EventLine {
            kind,
            run_id: &self.run_id,
            ts: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
            fields: &fields,
        })?;

        if let Some(dir) = self.path.parent().filter(|dir| !dir.as_os_str().is_empty()) {
            fs::create_dir_all(dir)?;
        }
        let mut file = OpenOptions::new().create(true).append(true).open(&self.path)?;
        writeln!(file, "{line}")?;
        Ok(())
    }
}

pub fn new_run_id() -> String {
    format!("run-{}", Uuid::new_v4().simple())
}
