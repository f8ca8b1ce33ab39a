use std::path::{Path, PathBuf};

use async_trait::async_trait;

use crate::Result;

use super::types::{PrintJob, PrintReceipt, PrintSettings};

/// A concrete print client invocation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CliInvocation {
    pub program: PathBuf,
    pub args: Vec<String>,
}

impl CliInvocation {
    /// Space-joined command line for logs.
    pub fn display(&self) -> String {
        std::iter::once(self.program.display().to_string())
            .chain(self.args.iter().cloned())
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// Build the `lp` command line for a job.
///
/// `<command...> [-h host] -d <printer> -n <copies> [-o <option>]... <file>`
pub fn build_invocation(
    settings: &PrintSettings,
    printer: &str,
    copies: u32,
    file: &Path,
) -> CliInvocation {
    let mut parts = settings.command.iter();
    let program = PathBuf::from(parts.next().map(String::as_str).unwrap_or("lp"));
    let mut args: Vec<String> = parts.cloned().collect();

    if let Some(host) = &settings.server_host {
        args.push("-h".to_string());
        args.push(host.clone());
    }

    args.push("-d".to_string());
    args.push(printer.to_string());
    args.push("-n".to_string());
    args.push(copies.max(1).to_string());

    for opt in &settings.options {
        args.push("-o".to_string());
        args.push(opt.clone());
    }

    // The image file as the final positional argument.
    args.push(file.display().to_string());

    CliInvocation { program, args }
}

/// Port for the print subsystem.
///
/// Implementations own the temporary file for the job and must remove it on
/// every exit path.
#[async_trait]
pub trait PrintClient: Send + Sync {
    async fn print(&self, job: PrintJob<'_>) -> Result<PrintReceipt>;
}
