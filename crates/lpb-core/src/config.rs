use std::{
    collections::HashMap,
    env, fs,
    path::{Path, PathBuf},
    time::Duration,
};

use tracing::{info, warn};

use crate::{
    errors::Error,
    print::{default_print_options, PrintSettings},
    Result,
};

const DEFAULT_PRINT_COMMAND: &str = "lp";
const DEFAULT_PRINT_TIMEOUT_SECS: u64 = 60;

/// Typed configuration, loaded once at startup and shared read-only.
#[derive(Clone, Debug)]
pub struct Config {
    pub telegram_bot_token: String,
    /// CUPS destination. `None` keeps the bot running but every print attempt
    /// is answered with a configuration error.
    pub printer_name: Option<String>,
    /// Sender ids allowed to use the bot. Empty means open access.
    pub allowed_users: Vec<i64>,
    pub print: PrintSettings,
}

impl Config {
    /// Load from the process environment, with `.env` (if present) filling
    /// in keys the environment does not set.
    pub fn load() -> Result<Self> {
        let dotenv = read_dotenv(Path::new(".env"));
        Self::from_lookup(layered(|key| env::var(key).ok(), &dotenv))
    }

    /// Build the config from an arbitrary key lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let telegram_bot_token = lookup("TELEGRAM_BOT_TOKEN").unwrap_or_default();
        if telegram_bot_token.trim().is_empty() {
            return Err(Error::Config(
                "TELEGRAM_BOT_TOKEN environment variable is required".to_string(),
            ));
        }

        let printer_name = lookup("CUPS_PRINTER_NAME").and_then(non_empty);
        let server_host = lookup("CUPS_SERVER_HOST").and_then(non_empty);
        let allowed_users = parse_csv_i64("ALLOWED_USER_IDS", lookup("ALLOWED_USER_IDS"));

        let command = parse_command(lookup("PRINT_COMMAND"))?;
        let options = lookup("PRINT_OPTIONS")
            .map(|v| parse_csv(&v))
            .unwrap_or_else(default_print_options);
        let timeout = Duration::from_secs(
            parse_u64("PRINT_TIMEOUT_SECS", lookup("PRINT_TIMEOUT_SECS"))?
                .unwrap_or(DEFAULT_PRINT_TIMEOUT_SECS),
        );
        if timeout.is_zero() {
            return Err(Error::Config(
                "PRINT_TIMEOUT_SECS must be greater than zero".to_string(),
            ));
        }
        let temp_dir = lookup("PRINT_TEMP_DIR")
            .and_then(non_empty)
            .map(PathBuf::from);

        Ok(Self {
            telegram_bot_token: telegram_bot_token.trim().to_string(),
            printer_name,
            allowed_users,
            print: PrintSettings {
                command,
                server_host,
                options,
                timeout,
                temp_dir,
            },
        })
    }

    pub fn is_open_access(&self) -> bool {
        self.allowed_users.is_empty()
    }

    /// Startup summary; warns about the settings that degrade the bot.
    pub fn log_summary(&self) {
        match &self.printer_name {
            Some(printer) => info!(printer = %printer, "printing to CUPS destination"),
            None => warn!("CUPS_PRINTER_NAME is not set; printing will fail"),
        }
        if let Some(host) = &self.print.server_host {
            info!(host = %host, "using remote CUPS server");
        }
        if self.is_open_access() {
            warn!("ALLOWED_USER_IDS is not set; the bot is open to everyone");
        } else {
            info!(users = ?self.allowed_users, "bot access restricted");
        }
        info!(
            command = %self.print.command.join(" "),
            options = ?self.print.options,
            timeout_secs = self.print.timeout.as_secs(),
            "print client settings"
        );
    }
}

fn read_dotenv(path: &Path) -> HashMap<String, String> {
    fs::read_to_string(path)
        .map(|contents| parse_dotenv(&contents))
        .unwrap_or_default()
}

/// `KEY=value` lines; blank lines and `#` comments are skipped, and one pair
/// of surrounding quotes is stripped.
fn parse_dotenv(contents: &str) -> HashMap<String, String> {
    let mut out = HashMap::new();
    for raw in contents.lines() {
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let Some((k, v)) = line.split_once('=') else {
            continue;
        };

        let key = k.trim();
        if key.is_empty() {
            continue;
        }

        let mut val = v.trim();
        if val.len() >= 2
            && ((val.starts_with('"') && val.ends_with('"'))
                || (val.starts_with('\'') && val.ends_with('\'')))
        {
            val = &val[1..val.len() - 1];
        }

        out.insert(key.to_string(), val.to_string());
    }
    out
}

/// Lookup that prefers `primary` and falls back to the `.env` values.
/// The process environment is never written.
fn layered<'a>(
    primary: impl Fn(&str) -> Option<String> + 'a,
    dotenv: &'a HashMap<String, String>,
) -> impl Fn(&str) -> Option<String> + 'a {
    move |key| primary(key).or_else(|| dotenv.get(key).cloned())
}

fn parse_command(v: Option<String>) -> Result<Vec<String>> {
    let Some(v) = v else {
        return Ok(vec![DEFAULT_PRINT_COMMAND.to_string()]);
    };
    let parts = v
        .split_whitespace()
        .map(|s| s.to_string())
        .collect::<Vec<_>>();
    if parts.is_empty() {
        return Err(Error::Config("PRINT_COMMAND must not be empty".to_string()));
    }
    Ok(parts)
}

fn parse_u64(key: &str, v: Option<String>) -> Result<Option<u64>> {
    let Some(v) = v.and_then(non_empty) else {
        return Ok(None);
    };
    v.trim()
        .parse::<u64>()
        .map(Some)
        .map_err(|e| Error::Config(format!("{key}: invalid number {v:?}: {e}")))
}

fn parse_csv_i64(key: &str, v: Option<String>) -> Vec<i64> {
    v.unwrap_or_default()
        .split(',')
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .filter_map(|s| match s.parse::<i64>() {
            Ok(id) => Some(id),
            Err(_) => {
                warn!(entry = %s, "{key}: skipping entry that is not a user id");
                None
            }
        })
        .collect()
}

fn parse_csv(v: &str) -> Vec<String> {
    v.split(',')
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .map(|s| s.to_string())
        .collect()
}

fn non_empty(s: String) -> Option<String> {
    if s.trim().is_empty() {
        None
    } else {
        Some(s.trim().to_string())
    }
}
