//! CLI error handling with user-friendly messages.
//!
//! Centralizes error handling for the CLI, providing consistent formatting
//! and appropriate exit codes.

use std::fmt;
use std::path::PathBuf;
use std::process;

use stratacache::config::ConfigFileError;
use stratacache::CacheError;

/// CLI-specific errors with user-friendly messages.
#[derive(Debug)]
pub enum CliError {
    /// Failed to initialize logging
    LoggingInit(std::io::Error),
    /// Configuration file could not be loaded
    Config(ConfigFileError),
    /// Cache could not be opened
    CacheOpen(CacheError),
    /// Background disk work did not complete
    CacheTask(CacheError),
    /// Eviction pass did not complete
    CleanupFailed,
    /// Key has no entry on disk
    NotFound(String),
    /// Failed to read input file
    FileRead { path: PathBuf, error: std::io::Error },
    /// Failed to write output file
    FileWrite { path: PathBuf, error: std::io::Error },
    /// Invalid command-line argument
    InvalidArgument(String),
}

impl CliError {
    /// Exit code for this error: 2 for a missing entry, 1 otherwise.
    pub fn exit_code(&self) -> i32 {
        match self {
            CliError::NotFound(_) => 2,
            _ => 1,
        }
    }

    /// Exit the process with an appropriate error message and code.
    pub fn exit(&self) -> ! {
        eprintln!("Error: {}", self);

        if let CliError::CacheOpen(CacheError::InvalidConfig(_)) = self {
            eprintln!();
            eprintln!("Check the [cache] section of your config file, or pass --dir.");
        }

        process::exit(self.exit_code())
    }
}

impl fmt::Display for CliError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CliError::LoggingInit(e) => write!(f, "Failed to initialize logging: {}", e),
            CliError::Config(e) => write!(f, "Configuration error: {}", e),
            CliError::CacheOpen(e) => write!(f, "Failed to open cache: {}", e),
            CliError::CacheTask(e) => write!(f, "Cache operation did not complete: {}", e),
            CliError::CleanupFailed => {
                write!(f, "Eviction pass failed, see the log file for details")
            }
            CliError::NotFound(key) => write!(f, "No cached entry for key '{}'", key),
            CliError::FileRead { path, error } => {
                write!(f, "Failed to read file '{}': {}", path.display(), error)
            }
            CliError::FileWrite { path, error } => {
                write!(f, "Failed to write file '{}': {}", path.display(), error)
            }
            CliError::InvalidArgument(msg) => write!(f, "Invalid argument: {}", msg),
        }
    }
}

impl std::error::Error for CliError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            CliError::LoggingInit(e) => Some(e),
            CliError::Config(e) => Some(e),
            CliError::CacheOpen(e) | CliError::CacheTask(e) => Some(e),
            CliError::FileRead { error, .. } | CliError::FileWrite { error, .. } => Some(error),
            _ => None,
        }
    }
}

impl From<ConfigFileError> for CliError {
    fn from(e: ConfigFileError) -> Self {
        CliError::Config(e)
    }
}
