//! Reference syntax parser.
//!
//! A scalar string in a configuration document may reference a config source
//! instead of being used literally. The syntax is a single line:
//!
//! ```text
//! $<source>:<selector>[?<params>]
//! ```
//!
//! `<source>` names a registered config source, `<selector>` is an opaque
//! string meaningful only to that source, and `<params>` is an optional
//! single-line brace/colon/comma block providing extra retrieval controls.
//! Examples:
//!
//! ```text
//! logs_dir: $env:LOGS_DIR
//! bytes_from_file: $file:/etc/secret.bin?{binary:true}
//! ```
//!
//! Strings that do not start with `$` pass through unchanged. A literal
//! leading `$` cannot currently be escaped; that is a known limitation of
//! the provisional syntax.

use crate::error::Error;
use serde_json::Value;

/// Sentinel character that marks a reference.
pub const SENTINEL: char = '$';

/// A parsed reference to a config source value.
#[derive(Debug, Clone, PartialEq)]
pub struct Reference {
    /// Name of the config source to retrieve from.
    pub source: String,
    /// Selector passed through to the source.
    pub selector: String,
    /// Optional structured retrieval parameters.
    pub params: Option<Value>,
}

impl Reference {
    /// Parse a scalar string.
    ///
    /// Returns `Ok(None)` for opaque literals (no leading `$`), `Ok(Some)`
    /// for a well-formed reference, and an error for a `$`-prefixed string
    /// that is not valid reference syntax.
    pub fn parse(raw: &str) -> Result<Option<Self>, Error> {
        let Some(body) = raw.strip_prefix(SENTINEL) else {
            return Ok(None);
        };

        let (name, rest) = body
            .split_once(':')
            .ok_or_else(|| Error::Syntax(raw.to_string()))?;
        let source = name.trim();

        let (selector, params) = match rest.split_once('?') {
            Some((selector, params)) => (selector.trim(), Some(parse_params(raw, params)?)),
            None => (rest.trim(), None),
        };

        if source.is_empty() || selector.is_empty() {
            return Err(Error::Syntax(raw.to_string()));
        }

        Ok(Some(Self {
            source: source.to_string(),
            selector: selector.to_string(),
            params,
        }))
    }
}

/// Parse the inline parameter block.
///
/// The block is YAML with the spaces removed so that it survives as a single
/// scalar in the host document. Re-inserting a space after each delimiter
/// makes it legal single-line YAML again.
fn parse_params(reference: &str, raw: &str) -> Result<Value, Error> {
    let mut yaml = String::with_capacity(raw.len() * 2);
    for c in raw.chars() {
        yaml.push(c);
        if matches!(c, '{' | '}' | ':' | ',') {
            yaml.push(' ');
        }
    }

    serde_yaml::from_str(&yaml).map_err(|err| Error::Params {
        reference: reference.to_string(),
        source: err,
    })
}
