use std::{path::PathBuf, time::Duration};

use crate::normalizer::{NormalizedImage, LABEL_HEIGHT_INCHES, LABEL_WIDTH_INCHES};

/// How the print client is invoked. Loaded once from config.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PrintSettings {
    /// Program plus leading arguments, e.g. `["lp"]` or `["sudo", "-n", "lp"]`.
    pub command: Vec<String>,
    /// Remote CUPS server (`-h`).
    pub server_host: Option<String>,
    /// Values passed as `-o <value>`.
    pub options: Vec<String>,
    /// Upper bound on a single print client run.
    pub timeout: Duration,
    /// Where the scoped temp file is created (OS temp dir when `None`).
    pub temp_dir: Option<PathBuf>,
}

/// Custom media size for the label plus fit-to-page scaling.
pub fn default_print_options() -> Vec<String> {
    vec![
        format!("media=Custom.{LABEL_WIDTH_INCHES}x{LABEL_HEIGHT_INCHES}in"),
        "fit-to-page".to_string(),
    ]
}

/// A single submission to the print subsystem.
#[derive(Clone, Copy, Debug)]
pub struct PrintJob<'a> {
    pub printer: &'a str,
    /// Always >= 1.
    pub copies: u32,
    pub image: &'a NormalizedImage,
}

/// Output of a successful print client run.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PrintReceipt {
    pub stdout: String,
    pub stderr: String,
}
