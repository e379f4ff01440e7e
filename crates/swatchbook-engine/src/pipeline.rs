use std::error::Error as StdError;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use serde_json::{json, Value};
use swatchbook_contracts::events::{EventKind, EventWriter};
use swatchbook_contracts::palette::Palette;
use swatchbook_contracts::sources::ImageSource;

use crate::acquire::{AcquiredImage, Acquirer};
use crate::config::{FetchConfig, SynthesisConfig};
use crate::error::{PipelineError, StorageError};
use crate::model::PaletteModel;
use crate::report::{write_report, ReportTemplate};
use crate::swatch;
use crate::synthesize::Synthesizer;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunRequest {
    pub image1_url: String,
    pub image1_path: PathBuf,
    pub image2_url: String,
    pub image2_path: PathBuf,
    pub output: PathBuf,
}

#[derive(Debug, Clone)]
pub struct RunOutcome {
    pub report_path: PathBuf,
    pub report_bytes: usize,
    pub palette: Palette,
    pub model: String,
    pub warnings: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notice {
    Step(String),
    Warning(String),
}

type NoticeFn<'a> = Box<dyn Fn(&Notice) + 'a>;

/// Validate, acquire, synthesize, render, compose, write. Strictly in that
/// order, stopping at the first failure.
pub struct Pipeline<'a> {
    model: &'a dyn PaletteModel,
    synthesis: SynthesisConfig,
    acquirer: Acquirer,
    template: ReportTemplate,
    events: Option<EventWriter>,
    notify: NoticeFn<'a>,
}

impl<'a> Pipeline<'a> {
    pub fn new(
        model: &'a dyn PaletteModel,
        synthesis: SynthesisConfig,
        fetch: &FetchConfig,
        template: ReportTemplate,
    ) -> Result<Self, PipelineError> {
        Ok(Self {
            model,
            synthesis,
            acquirer: Acquirer::new(fetch).map_err(PipelineError::ClientSetup)?,
            template,
            events: None,
            notify: Box::new(|_| {}),
        })
    }

    pub fn with_events(mut self, events: EventWriter) -> Self {
        self.events = Some(events);
        self
    }

    pub fn on_notice(mut self, notify: impl Fn(&Notice) + 'a) -> Self {
        self.notify = Box::new(notify);
        self
    }

    pub fn run(&self, request: &RunRequest) -> Result<RunOutcome, PipelineError> {
        self.emit(
            EventKind::RunStarted,
            json!({
                "image1_url": request.image1_url,
                "image2_url": request.image2_url,
                "output": request.output.display().to_string(),
                "model": self.model.name(),
            }),
        );
        let result = self.run_stages(request);
        if let Err(err) = &result {
            self.emit(EventKind::RunFailed, json!({ "error": error_chain_text(err) }));
        }
        result
    }

    fn run_stages(&self, request: &RunRequest) -> Result<RunOutcome, PipelineError> {
        let first = ImageSource::new(&request.image1_url, &request.image1_path).map_err(|source| {
            PipelineError::InvalidSource {
                which: "image1",
                source,
            }
        })?;
        let second = ImageSource::new(&request.image2_url, &request.image2_path).map_err(|source| {
            PipelineError::InvalidSource {
                which: "image2",
                source,
            }
        })?;

        let mut temp_images = TempImages::default();
        let first = self.acquire(&mut temp_images, &first, "image1")?;
        let second = self.acquire(&mut temp_images, &second, "image2")?;
        let image1 = read_local(&first.path)?;
        let image2 = read_local(&second.path)?;

        self.step("Analyzing images and generating palette...");
        let synthesis =
            Synthesizer::new(self.model, &self.synthesis).synthesize(&first.path, &second.path)?;
        let palette = synthesis.palette;
        let mut warnings = palette.composition_warnings();
        for warning in &warnings {
            self.warn(warning);
            self.emit(EventKind::PaletteWarning, json!({ "warning": warning }));
        }
        self.emit(
            EventKind::PaletteSynthesized,
            json!({
                "model": synthesis.model,
                "strategy": palette.strategy(),
                "colors": palette.colors(),
            }),
        );

        self.step("Rendering palette swatch...");
        let swatch = swatch::render(&palette)?;
        self.emit(
            EventKind::SwatchRendered,
            json!({ "width": swatch.width, "height": swatch.height, "bands": palette.colors().len() }),
        );

        self.step("Generating HTML report...");
        let html = self.template.compose(&image1, &image2, &swatch, &palette);
        write_report(&request.output, &html)?;
        self.emit(
            EventKind::ReportWritten,
            json!({ "path": request.output.display().to_string(), "bytes": html.len() }),
        );

        for warning in temp_images.cleanup() {
            self.warn(&warning);
            self.emit(EventKind::CleanupWarning, json!({ "warning": warning }));
            warnings.push(warning);
        }

        Ok(RunOutcome {
            report_path: request.output.clone(),
            report_bytes: html.len(),
            palette,
            model: synthesis.model,
            warnings,
        })
    }

    fn acquire(
        &self,
        temp_images: &mut TempImages,
        source: &ImageSource,
        which: &'static str,
    ) -> Result<AcquiredImage, PipelineError> {
        self.step(&format!("Downloading {which} from {}...", source.url()));
        let acquired = self
            .acquirer
            .acquire(source, &mut |created: &Path| temp_images.track(created))
            .map_err(|source| PipelineError::DownloadFailed { which, source })?;
        self.emit(
            EventKind::ImageAcquired,
            json!({
                "which": which,
                "path": acquired.path.display().to_string(),
                "width": acquired.width,
                "height": acquired.height,
                "bytes": acquired.bytes,
            }),
        );
        Ok(acquired)
    }

    fn step(&self, message: &str) {
        (self.notify)(&Notice::Step(message.to_string()));
    }

    fn warn(&self, message: &str) {
        (self.notify)(&Notice::Warning(message.to_string()));
    }

    fn emit(&self, kind: EventKind, fields: Value) {
        let Some(events) = self.events.as_ref() else {
            return;
        };
        if let Err(err) = events.record(kind, fields) {
            self.warn(&format!("event log write failed: {err:#}"));
        }
    }
}

/// Files the acquirer created during one run. Whatever is still tracked when
/// the guard drops is removed, so error paths clean up too.
#[derive(Debug, Default)]
struct TempImages {
    paths: Vec<PathBuf>,
}

impl TempImages {
    fn track(&mut self, path: &Path) {
        if !self.paths.iter().any(|existing| existing == path) {
            self.paths.push(path.to_path_buf());
        }
    }

    /// Best-effort removal; failures come back as warnings.
    fn cleanup(&mut self) -> Vec<String> {
        let mut warnings = Vec::new();
        for path in self.paths.drain(..) {
            match fs::remove_file(&path) {
                Ok(()) => {}
                Err(err) if err.kind() == ErrorKind::NotFound => {}
                Err(err) => warnings.push(format!("could not remove {}: {err}", path.display())),
            }
        }
        warnings
    }
}

impl Drop for TempImages {
    fn drop(&mut self) {
        let _ = self.cleanup();
    }
}

fn read_local(path: &Path) -> Result<Vec<u8>, StorageError> {
    fs::read(path).map_err(|source| StorageError::Read {
        path: path.to_path_buf(),
        source,
    })
}

/// `outer | caused by: inner | ...`, skipping repeated messages.
pub fn error_chain_text(err: &(dyn StdError + 'static)) -> String {
    let mut parts: Vec<String> = Vec::new();
    let mut current = Some(err);
    while let Some(cause) = current {
        let text = cause.to_string();
        let trimmed = text.trim();
        if !trimmed.is_empty() && parts.last().map(|last| last != trimmed).unwrap_or(true) {
            parts.push(trimmed.to_string());
        }
        current = cause.source();
    }
    parts.join(" | caused by: ")
}
