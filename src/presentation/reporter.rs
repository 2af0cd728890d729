//! Line-oriented rendering of image events.

use std::io::Write;

use crate::domain::entities::LoadState;
use crate::infrastructure::image::{ImageEvent, ImageEventKind, ImageLoader};

/// Sizes of both tiers of a loaded image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImageDimensions {
    /// Original width.
    pub width: u32,
    /// Original height.
    pub height: u32,
    /// Preview width.
    pub preview_width: u32,
    /// Preview height.
    pub preview_height: u32,
}

impl ImageDimensions {
    /// Looks up the dimensions of `url` in the loader's memory cache.
    #[must_use]
    pub fn lookup(loader: &ImageLoader, url: &str) -> Option<Self> {
        let original = loader.original(url)?;
        let preview = loader.preview(url)?;
        Some(Self {
            width: original.width(),
            height: original.height(),
            preview_width: preview.width(),
            preview_height: preview.height(),
        })
    }
}

/// Counts of final states across the requested URLs.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReportSummary {
    /// URLs that loaded.
    pub loaded: usize,
    /// URLs that failed.
    pub failed: usize,
    /// Failed URLs that can be retried.
    pub retryable: usize,
    /// URLs still idle or loading.
    pub pending: usize,
}

impl ReportSummary {
    /// Tallies a set of load states.
    pub fn from_states<'a>(states: impl IntoIterator<Item = &'a LoadState>) -> Self {
        states
            .into_iter()
            .fold(Self::default(), |mut summary, state| {
                match state {
                    LoadState::Loaded => summary.loaded += 1,
                    LoadState::Failed(failure) => {
                        summary.failed += 1;
                        if failure.retryable {
                            summary.retryable += 1;
                        }
                    }
                    LoadState::Idle | LoadState::Loading => summary.pending += 1,
                }
                summary
            })
    }
}

impl std::fmt::Display for ReportSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} loaded, {} failed ({} retryable)",
            self.loaded, self.failed, self.retryable
        )?;
        if self.pending > 0 {
            write!(f, ", {} pending", self.pending)?;
        }
        Ok(())
    }
}

/// Writes one line per image event.
pub struct EventReporter<W: Write> {
    out: W,
}

impl<W: Write> EventReporter<W> {
    /// Creates a reporter writing to `out`.
    pub const fn new(out: W) -> Self {
        Self { out }
    }

    /// Writes the line for `event`.
    ///
    /// # Errors
    /// Returns error if writing fails.
    pub fn report(
        &mut self,
        event: &ImageEvent,
        dimensions: Option<ImageDimensions>,
    ) -> std::io::Result<()> {
        writeln!(self.out, "{}", render_event(event, dimensions))
    }

    /// Writes the final summary line.
    ///
    /// # Errors
    /// Returns error if writing fails.
    pub fn finish(&mut self, summary: &ReportSummary) -> std::io::Result<()> {
        writeln!(self.out, "{summary}")?;
        self.out.flush()
    }

    /// Consumes the reporter, returning the writer.
    pub fn into_inner(self) -> W {
        self.out
    }
}

fn render_event(event: &ImageEvent, dimensions: Option<ImageDimensions>) -> String {
    match &event.kind {
        ImageEventKind::Loading => format!("loading  {}", event.url),
        ImageEventKind::Loaded { source } => match dimensions {
            Some(d) => format!(
                "loaded   {} [{source}] {}x{}, preview {}x{}",
                event.url, d.width, d.height, d.preview_width, d.preview_height
            ),
            None => format!("loaded   {} [{source}]", event.url),
        },
        ImageEventKind::Failed(failure) => {
            let hint = if failure.retryable { " (retryable)" } else { "" };
            format!("failed   {}: {}{hint}", event.url, failure.message)
        }
    }
}
