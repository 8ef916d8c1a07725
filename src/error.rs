//! Fatal pipeline errors.
//!
//! Anything that reaches a [`PipelineError`] aborts the run and no report is
//! published. Per-record problems never end up here; they are tallied in a
//! [`RejectionTally`](crate::validation::RejectionTally) instead.

use std::fmt;

/// The pipeline stage a fatal error came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Config,
    Schema,
    Input,
    Spill,
    Report,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Config => "configuration",
            Self::Schema => "schema",
            Self::Input => "input",
            Self::Spill => "spill",
            Self::Report => "report",
        })
    }
}

/// A fatal error, tagged with the stage that failed.
#[derive(Debug)]
pub enum PipelineError {
    /// Invalid knobs or paths.
    Config(anyhow::Error),
    /// The schema could not be loaded or compiled.
    Schema(anyhow::Error),
    /// The event input could not be opened or read.
    Input(anyhow::Error),
    /// Writing or reading a spill segment failed.
    SpillIo(anyhow::Error),
    /// Writing the final report failed.
    ReportIo(anyhow::Error),
}

impl PipelineError {
    #[must_use]
    pub fn stage(&self) -> Stage {
        match self {
            Self::Config(_) => Stage::Config,
            Self::Schema(_) => Stage::Schema,
            Self::Input(_) => Stage::Input,
            Self::SpillIo(_) => Stage::Spill,
            Self::ReportIo(_) => Stage::Report,
        }
    }

    fn inner(&self) -> &anyhow::Error {
        match self {
            Self::Config(e)
            | Self::Schema(e)
            | Self::Input(e)
            | Self::SpillIo(e)
            | Self::ReportIo(e) => e,
        }
    }
}

impl fmt::Display for PipelineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} stage failed: {:#}", self.stage(), self.inner())
    }
}

impl std::error::Error for PipelineError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&**self.inner())
    }
}
