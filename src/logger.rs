use std::io::IsTerminal;

use indicatif::{ProgressBar, ProgressStyle};
use tracing_subscriber::EnvFilter;

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum VerbosityLevel {
    Summary = 0,  // Warnings and the final report (default)
    Detailed = 1, // Analysis progress
    Debug = 2,    // Every lookup
}

impl VerbosityLevel {
    pub fn from_verbose_count(count: u8) -> Self {
        match count {
            0 => VerbosityLevel::Summary,
            1 => VerbosityLevel::Detailed,
            2.. => VerbosityLevel::Debug,
        }
    }

    /// Default filter directive for this level
    pub fn filter_directive(self) -> &'static str {
        match self {
            VerbosityLevel::Summary => "warn",
            VerbosityLevel::Detailed => "rormatch=info,warn",
            VerbosityLevel::Debug => "rormatch=debug,info",
        }
    }
}

/// Install the global fmt subscriber on stderr. `RUST_LOG` wins over the `-v` count.
pub fn init_tracing(verbosity: VerbosityLevel) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(verbosity.filter_directive()));

    // A second init (e.g. in tests) keeps the first subscriber
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(verbosity >= VerbosityLevel::Debug)
        .try_init();
}

/// Progress bar for candidate evaluation, only when stderr is a terminal and output is not chatty
pub fn candidate_progress(verbosity: VerbosityLevel) -> Option<ProgressBar> {
    if verbosity >= VerbosityLevel::Debug || !std::io::stderr().is_terminal() {
        return None;
    }

    let pb = ProgressBar::new(0);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("[{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({percent}%) {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("##-"),
    );
    pb.set_message("Scoring candidates...");
    Some(pb)
}
