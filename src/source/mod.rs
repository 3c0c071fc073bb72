//! Intake adapters that feed the engine from outside collaborators.

pub mod directory;

pub use directory::{DirectorySource, ScanReport, SourceError};
