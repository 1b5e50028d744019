//! Progress notification for in-flight files.

use std::fmt;
use std::sync::Arc;

use futures_util::StreamExt;
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use once_cell::sync::Lazy;
use tokio_stream::wrappers::WatchStream;

use crate::prompt::{DialoguerPrompter, Prompter};
use crate::stats::{StatsSnapshot, StatsTracker};

/// What a progress adapter sees of a file about to be transferred.
#[derive(Debug, Clone)]
pub struct TrackedFile {
    pub name: String,
    pub location: String,
    pub size: Option<u64>,
    pub stats: Option<StatsTracker>,
}

pub trait ProgressAdapter: Send + Sync {
    /// Whether files should carry a [`StatsTracker`].
    fn reports_stats(&self) -> bool {
        true
    }

    /// Called once with every file of a transfer, before any byte is staged.
    fn progress(&self, files: &[TrackedFile]);
}

const TOTAL_STYLE: &str = "|{bar:28}| {msg}";
const SPINNER_STYLE: &str = "|{spinner}| {msg}";
const BAR_CHARS: &str = "◼◼ ";

static TOTAL_TEMPLATE: Lazy<Option<ProgressStyle>> = Lazy::new(|| {
    ProgressStyle::with_template(TOTAL_STYLE)
        .ok()
        .map(|style| style.progress_chars(BAR_CHARS))
});

static SPINNER_TEMPLATE: Lazy<Option<ProgressStyle>> =
    Lazy::new(|| ProgressStyle::with_template(SPINNER_STYLE).ok());

/// One terminal bar per file: determinate when the size is known,
/// a spinner otherwise.
#[derive(Debug, Default, Clone)]
pub struct Bars {
    multi: MultiProgress,
}

impl Bars {
    pub fn new() -> Self {
        Self::default()
    }

    fn bar(&self, file: &TrackedFile, stats: &StatsTracker) {
        let total = stats.total().filter(|t| *t > 0);
        let bar = match total {
            Some(total) => styled(ProgressBar::new(total), &TOTAL_TEMPLATE),
            None => styled(ProgressBar::new_spinner(), &SPINNER_TEMPLATE),
        };
        let bar = self.multi.add(bar);
        let name = file.name.clone();
        let mut updates = WatchStream::new(stats.subscribe());

        tokio::spawn(async move {
            while let Some(snapshot) = updates.next().await {
                render(&bar, &name, &snapshot, total.is_some());
                if snapshot.done {
                    bar.finish();
                    break;
                }
            }
        });
    }
}

fn styled(bar: ProgressBar, template: &Lazy<Option<ProgressStyle>>) -> ProgressBar {
    match template.as_ref() {
        Some(style) => bar.with_style(style.clone()),
        None => bar,
    }
}

fn render(bar: &ProgressBar, name: &str, snapshot: &StatsSnapshot, determinate: bool) {
    if determinate {
        bar.set_position(snapshot.transferred);
        bar.set_message(format!(
            "{} {} {} {name}",
            snapshot.percentage_display(),
            snapshot.speed_display(),
            snapshot.remaining_display()
        ));
    } else {
        bar.tick();
        bar.set_message(format!(
            "{} {} {name}",
            snapshot.transferred,
            snapshot.elapsed_display()
        ));
    }
}

impl ProgressAdapter for Bars {
    fn progress(&self, files: &[TrackedFile]) {
        for file in files {
            if let Some(stats) = &file.stats {
                self.bar(file, stats);
            }
        }
    }
}

/// Logs one line per file.
#[derive(Debug, Default, Clone, Copy)]
pub struct Text;

impl ProgressAdapter for Text {
    fn reports_stats(&self) -> bool {
        false
    }

    fn progress(&self, files: &[TrackedFile]) {
        for file in files {
            tracing::info!(name = %file.name, location = %file.location, "Downloading {}...", file.name);
        }
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct Silent;

impl ProgressAdapter for Silent {
    fn reports_stats(&self) -> bool {
        false
    }

    fn progress(&self, _files: &[TrackedFile]) {}
}

/// Caller-supplied progress function. Stats are always attached.
pub struct FnProgress<F>(pub F);

impl<F> ProgressAdapter for FnProgress<F>
where
    F: Fn(&[TrackedFile]) + Send + Sync,
{
    fn progress(&self, files: &[TrackedFile]) {
        (self.0)(files)
    }
}

/// Progress notifier plus the prompt capability used by a transfer.
#[derive(Clone)]
pub struct Adapter {
    progress: Arc<dyn ProgressAdapter>,
    prompter: Arc<dyn Prompter>,
}

impl Adapter {
    pub fn new(progress: Arc<dyn ProgressAdapter>, prompter: Arc<dyn Prompter>) -> Self {
        Self { progress, prompter }
    }

    pub fn bars() -> Self {
        Self::default()
    }

    pub fn text() -> Self {
        Self::default().with_progress(Arc::new(Text))
    }

    pub fn silent() -> Self {
        Self::default().with_progress(Arc::new(Silent))
    }

    #[must_use]
    pub fn with_progress(mut self, progress: Arc<dyn ProgressAdapter>) -> Self {
        self.progress = progress;
        self
    }

    #[must_use]
    pub fn with_progress_fn<F>(self, f: F) -> Self
    where
        F: Fn(&[TrackedFile]) + Send + Sync + 'static,
    {
        self.with_progress(Arc::new(FnProgress(f)))
    }

    #[must_use]
    pub fn with_prompter(mut self, prompter: Arc<dyn Prompter>) -> Self {
        self.prompter = prompter;
        self
    }

    pub fn reports_stats(&self) -> bool {
        self.progress.reports_stats()
    }

    pub fn progress(&self, files: &[TrackedFile]) {
        self.progress.progress(files);
    }

    pub fn prompter(&self) -> &Arc<dyn Prompter> {
        &self.prompter
    }
}

impl Default for Adapter {
    fn default() -> Self {
        Self::new(Arc::new(Bars::new()), Arc::new(DialoguerPrompter))
    }
}

impl fmt::Debug for Adapter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Adapter")
            .field("reports_stats", &self.reports_stats())
            .field("progress", &"{ ... }")
            .field("prompter", &"{ ... }")
            .finish()
    }
}
