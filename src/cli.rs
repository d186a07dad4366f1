use clap::Parser;

/// Checks a single USFM book against a stylesheet's marker catalog (spec §6).
#[derive(Parser, Debug)]
#[command(name = "markercheck")]
#[command(about = "Validates USFM marker and structure usage for one book of Scripture.", long_about = None)]
pub struct Cli {
    /// Disable USFM-3-only features (milestones, \rb, non-default attributes).
    #[arg(long = "usfm2")]
    pub usfm2: bool,

    /// Three-letter USFM book code, e.g. GEN.
    pub book_code: String,

    /// Path to the USFM source file to check.
    pub usfm_file: String,
}
