//! Per-layer error types, aggregated into [`MarkerCheckError`].
//!
//! Stylesheet loading never aborts on malformed input (see spec §7); these
//! error types exist only to surface that malformed input as structured,
//! line-numbered data rather than silently ignoring it. The tokenizer and
//! parser never fail at all — an unrecognized marker becomes an `Unknown`
//! token and an unexpected structure becomes a [`crate::diagnostics::Diagnostic`],
//! never an `Err`, so this module carries no error type for those layers.

#[derive(thiserror::Error, Debug)]
pub enum MarkerCheckError {
    #[error(transparent)]
    Stylesheet(#[from] StylesheetError),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

#[derive(thiserror::Error, PartialEq, Debug)]
pub enum StylesheetError {
    #[error("line {0}: unknown field \\{1}")]
    UnknownField(usize, String),
    #[error("line {0}: duplicate field \\{1}")]
    DuplicateField(usize, String),
    #[error("line {0}: malformed integer value: {1:?}")]
    MalformedInteger(usize, String),
    #[error("line {0}: malformed float value: {1:?}")]
    MalformedFloat(usize, String),
    #[error("line {0}: malformed attribute spec: {1:?}")]
    MalformedAttributeSpec(usize, String),
    #[error("line {0}: marker \\{1} is missing a required \\name field")]
    MissingName(usize, String),
    #[error("line {0}: milestone \\{1} has no \\endmarker")]
    MissingMilestoneEnd(usize, String),
    #[error("line {0}: duplicate definition of marker \\{1}")]
    DuplicateMarker(usize, String),
    #[error("line {0}: unknown styletype {1:?}")]
    UnknownStyleType(usize, String),
    #[error("line {0}: unknown texttype {1:?}")]
    UnknownTextType(usize, String),
    #[error("line {0}: unknown justification {1:?}")]
    UnknownJustification(usize, String),
    #[error("stylesheet contains no \\marker entries")]
    NoMarkers,
}
