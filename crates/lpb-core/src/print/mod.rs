//! Print job model and the `lp` command line.

pub mod client;
pub mod types;

pub use client::{build_invocation, CliInvocation, PrintClient};
pub use types::{default_print_options, PrintJob, PrintReceipt, PrintSettings};
