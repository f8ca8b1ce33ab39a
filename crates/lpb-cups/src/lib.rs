//! CUPS adapter: submits label images with the `lp` print client.
//!
//! Each job gets its own temporary file. The file is owned by a
//! `NamedTempFile` guard, so it is removed on every exit path: success,
//! non-zero exit, launch failure and timeout.

use std::process::Stdio;

use async_trait::async_trait;
use tempfile::NamedTempFile;
use tokio::{io::AsyncWriteExt, process::Command};
use tracing::{error, info, warn};

use lpb_core::{
    errors::Error,
    print::{build_invocation, PrintClient, PrintJob, PrintReceipt, PrintSettings},
    Result,
};

#[derive(Clone, Debug)]
pub struct LpClient {
    settings: PrintSettings,
}

impl LpClient {
    pub fn new(settings: PrintSettings) -> Self {
        Self { settings }
    }

    async fn write_temp_file(&self, job: &PrintJob<'_>) -> Result<NamedTempFile> {
        let suffix = format!(".{}", job.image.format.extension());
        let mut builder = tempfile::Builder::new();
        builder.prefix("lpb-label-").suffix(&suffix);

        let file = match &self.settings.temp_dir {
            Some(dir) => builder.tempfile_in(dir)?,
            None => builder.tempfile()?,
        };

        // The guard keeps ownership of the path; the bytes go through tokio.
        let mut dst = tokio::fs::File::from_std(file.as_file().try_clone()?);
        dst.write_all(&job.image.bytes).await?;
        dst.flush().await?;
        Ok(file)
    }
}

#[async_trait]
impl PrintClient for LpClient {
    async fn print(&self, job: PrintJob<'_>) -> Result<PrintReceipt> {
        let file = self.write_temp_file(&job).await?;

        let inv = build_invocation(&self.settings, job.printer, job.copies, file.path());
        let command_line = inv.display();
        info!(command = %command_line, "executing print command");

        let mut cmd = Command::new(&inv.program);
        cmd.args(&inv.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            // A timed-out `output()` future is dropped; take the child with it.
            .kill_on_drop(true);

        let output = match tokio::time::timeout(self.settings.timeout, cmd.output()).await {
            Ok(Ok(output)) => output,
            Ok(Err(source)) => {
                error!(command = %command_line, error = %source, "failed to launch print command");
                return Err(Error::PrintLaunch {
                    program: inv.program.display().to_string(),
                    source,
                });
            }
            Err(_) => {
                error!(
                    command = %command_line,
                    timeout_secs = self.settings.timeout.as_secs_f64(),
                    "print command timed out"
                );
                return Err(Error::PrintTimeout(self.settings.timeout));
            }
        };

        let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
        let stderr = String::from_utf8_lossy(&output.stderr).into_owned();

        if !output.status.success() {
            error!(
                command = %command_line,
                status = ?output.status.code(),
                stdout = %stdout.trim(),
                stderr = %stderr.trim(),
                "print command failed"
            );
            return Err(Error::PrintFailed {
                status: output.status.code(),
                stdout,
                stderr,
            });
        }

        info!(stdout = %stdout.trim(), stderr = %stderr.trim(), "print command succeeded");

        if let Err(e) = file.close() {
            warn!(error = %e, "failed to remove print temp file");
        }

        Ok(PrintReceipt { stdout, stderr })
    }
}
