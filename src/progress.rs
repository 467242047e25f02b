//! Live event stream for apply and destroy

use colored::Colorize;
use indicatif::{ProgressBar, ProgressStyle};
use reconcile::{EventSink, EventStatus, LogEvents, ResourceStatus, StackEvent};

use crate::ui;

/// Render one event as a log line
pub fn format_event(event: &StackEvent) -> String {
    let time = event.timestamp.format("%H:%M:%S");
    let status = ui::event_status(event.status, 12);
    let mut line = format!(
        "{} {} {} {}",
        time.to_string().dimmed(),
        status,
        event.logical_name.bold(),
        event.resource_type.dimmed()
    );
    if let Some(reason) = &event.reason {
        line.push_str(&format!(" {}", format!("({reason})").dimmed()));
    }
    line
}

/// Event sink that prints every event above a progress bar
///
/// The bar advances once per resource that reaches a final status. It is
/// hidden when stdout is not a terminal. With `--quiet` nothing is printed
/// and events go to the log instead.
pub struct ProgressSink {
    pb: ProgressBar,
    quiet: bool,
}

impl ProgressSink {
    pub fn new(total: usize, quiet: bool) -> Self {
        let pb = if quiet || !console::Term::stdout().is_term() {
            ProgressBar::hidden()
        } else {
            let pb = ProgressBar::new(total as u64);
            if let Ok(style) = ProgressStyle::default_bar()
                .template("{spinner:.green} [{bar:40.cyan/blue}] {pos}/{len} {msg}")
            {
                pb.set_style(style.progress_chars("=>-"));
            }
            pb
        };
        Self { pb, quiet }
    }

    pub fn finish(&self) {
        self.pb.finish_and_clear();
    }
}

impl EventSink for ProgressSink {
    fn on_event(&self, event: &StackEvent) {
        if self.quiet {
            LogEvents.on_event(event);
        } else {
            let line = format_event(event);
            if self.pb.is_hidden() {
                println!("{line}");
            } else {
                self.pb.suspend(|| println!("{line}"));
            }
        }

        match event.status {
            EventStatus::Resource(ResourceStatus::InProgress) => {
                self.pb.set_message(event.logical_name.clone());
            }
            EventStatus::Resource(
                ResourceStatus::Complete
                | ResourceStatus::Deleted
                | ResourceStatus::Retained
                | ResourceStatus::Failed,
            ) => self.pb.inc(1),
            _ => {}
        }
    }
}
