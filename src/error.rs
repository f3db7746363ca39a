//! Resolution-level error types.
//!
//! Backend failures (`SourceError`) and watch sentinels (`WatchError`) live
//! in `crate::source`; this module covers everything the resolution manager
//! itself can report.

use crate::source::SourceError;
use std::fmt;
use thiserror::Error;

/// Errors reported by reference parsing and the resolution manager.
#[derive(Debug, Error)]
pub enum Error {
    /// A `$`-prefixed string is missing the `:` between source name and
    /// selector, or has an empty name/selector.
    #[error("invalid reference syntax at {0:?}: expected `$<source>:<selector>[?<params>]`")]
    Syntax(String),

    /// The inline parameter block after `?` did not parse.
    #[error("invalid parameters syntax at {reference:?}")]
    Params {
        reference: String,
        #[source]
        source: serde_yaml::Error,
    },

    /// A reference names a source that was never registered.
    #[error("config source {0:?} not found")]
    UnknownSource(String),

    /// A source was registered twice under the same name.
    #[error("config source {0:?} is already registered")]
    DuplicateSource(String),

    /// Session creation failed for a source.
    #[error("failed to create session for config source {name:?}")]
    NewSession {
        name: String,
        #[source]
        source: SourceError,
    },

    /// A session failed to retrieve a value.
    #[error("config source {name:?} failed to retrieve value")]
    Retrieve {
        name: String,
        #[source]
        source: SourceError,
    },

    /// One or more sessions failed during end-of-batch or close.
    #[error("session lifecycle failed: {0}")]
    Lifecycle(Aggregate),

    /// `Manager::resolve` was called more than once.
    #[error("resolve may only be called once per manager")]
    AlreadyResolved,
}

/// A collection of session errors surfaced as one combined failure.
#[derive(Debug)]
pub struct Aggregate(pub Vec<SourceError>);

impl fmt::Display for Aggregate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} error(s)", self.0.len())?;
        for err in &self.0 {
            write!(f, "; {err}")?;
        }
        Ok(())
    }
}

impl std::error::Error for Aggregate {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn aggregate_display_joins_messages() {
        let agg = Aggregate(vec![
            SourceError::NotFound("first".into()),
            SourceError::NotFound("second".into()),
        ]);
        let text = agg.to_string();
        assert!(text.starts_with("2 error(s)"));
        assert!(text.contains("first"));
        assert!(text.contains("second"));
    }

    #[test]
    fn syntax_error_names_offending_string() {
        let err = Error::Syntax("$broken".into());
        assert!(err.to_string().contains("$broken"));
    }
}
