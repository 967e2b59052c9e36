//! Failure taxonomy shared by every stage of the bridge.
//!
//! Nothing here is recovered locally: callers propagate a [`FractalError`] up to
//! the binary, which prints it and exits non-zero. Keeping the kinds apart lets
//! tests assert on *why* initialisation stopped instead of on process exit.

use std::fmt;
use std::path::PathBuf;

use thiserror::Error;

use crate::sync::Ownership;

/// Coarse classification used by the top-level handler and by tests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Config,
    Environment,
    Build,
    Interop,
    Io,
    Sync,
}

#[derive(Debug, Error)]
pub enum FractalError {
    /// Fixed parameters that cannot describe a valid dispatch or window.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// Window, adapter, device or surface could not be provided.
    #[error("environment unavailable: {0}")]
    Environment(String),

    #[error(transparent)]
    Build(#[from] BuildError),

    /// The shared texture could not be created, imported or bound.
    #[error("interop failure: {0}")]
    Interop(String),

    #[error("failed to read {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Sync(#[from] SyncError),
}

impl FractalError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            FractalError::Config(_) => ErrorKind::Config,
            FractalError::Environment(_) => ErrorKind::Environment,
            FractalError::Build(_) => ErrorKind::Build,
            FractalError::Interop(_) => ErrorKind::Interop,
            FractalError::Io { .. } => ErrorKind::Io,
            FractalError::Sync(_) => ErrorKind::Sync,
        }
    }

    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        FractalError::Io {
            path: path.into(),
            source,
        }
    }
}

/// Step of a program build that rejected its input.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuildStage {
    /// A single shader stage failed to parse or validate.
    Compile,
    /// Vertex and fragment stages do not form a usable program.
    Link,
    /// The compute program failed to parse, validate or create a pipeline.
    ProgramBuild,
    /// The requested kernel entry point does not exist or is malformed.
    KernelLookup,
}

impl fmt::Display for BuildStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BuildStage::Compile => f.write_str("compile"),
            BuildStage::Link => f.write_str("link"),
            BuildStage::ProgramBuild => f.write_str("program build"),
            BuildStage::KernelLookup => f.write_str("kernel lookup"),
        }
    }
}

/// A build failure together with the diagnostic log the backend produced.
#[derive(Debug, Error)]
#[error("{stage} failed for {unit}:\n{log}")]
pub struct BuildError {
    pub stage: BuildStage,
    pub unit: String,
    pub log: String,
}

impl BuildError {
    pub(crate) fn new(stage: BuildStage, unit: impl Into<String>, log: impl Into<String>) -> Self {
        let log = log.into();
        let log = if log.trim().is_empty() {
            String::from("(backend returned no diagnostic text)")
        } else {
            log
        };
        Self {
            stage,
            unit: unit.into(),
            log,
        }
    }
}

/// Violations of the shared-texture ownership protocol, plus device failures
/// while a handoff is in flight.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("shared texture is {actual:?}, expected {expected:?}")]
    NotOwned {
        expected: Ownership,
        actual: Ownership,
    },

    #[error("illegal ownership transition {from:?} -> {to:?}")]
    IllegalTransition { from: Ownership, to: Ownership },

    #[error("device failure during {step}: {message}")]
    Device { step: &'static str, message: String },
}

pub type Result<T, E = FractalError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_follow_variants() {
        let build = FractalError::from(BuildError::new(BuildStage::Link, "fractal", "bad"));
        assert_eq!(build.kind(), ErrorKind::Build);

        let io = FractalError::io(
            "missing.vert",
            std::io::Error::new(std::io::ErrorKind::NotFound, "gone"),
        );
        assert_eq!(io.kind(), ErrorKind::Io);
        assert!(io.to_string().contains("missing.vert"));

        let sync = FractalError::from(SyncError::NotOwned {
            expected: Ownership::GraphicsOwned,
            actual: Ownership::ComputeOwned,
        });
        assert_eq!(sync.kind(), ErrorKind::Sync);
    }

    #[test]
    fn build_error_never_carries_an_empty_log() {
        let err = BuildError::new(BuildStage::Compile, "fractal.frag", "   ");
        assert!(!err.log.trim().is_empty());
        assert!(err.to_string().starts_with("compile failed for fractal.frag"));
    }
}
