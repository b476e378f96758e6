use anyhow::{Context, Result};
use directories::ProjectDirs;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

const LOG_FILE_BASENAME: &str = "framereel.log";
const LOG_DIR_ENV: &str = "FRAMEREEL_LOG_PATH";
const LOG_RETENTION_DAYS: u64 = 7;

/// Subsystem for macOS unified logging (os_log)
#[cfg(target_os = "macos")]
const OSLOG_SUBSYSTEM: &str = "dev.framereel.framereel";

/// Get the log directory path
pub fn get_log_dir() -> Result<PathBuf> {
    resolve_log_dir()
}

/// Install the global subscriber: stderr, a daily rolling file and, on macOS, os_log.
///
/// Keep the returned guard alive for the lifetime of the process so the file
/// writer flushes.
pub fn init_logging() -> Result<WorkerGuard> {
    let log_dir = resolve_log_dir()?;
    std::fs::create_dir_all(&log_dir)
        .with_context(|| format!("Failed to create log directory: {:?}", log_dir))?;

    prune_old_logs(
        &log_dir,
        Duration::from_secs(60 * 60 * 24 * LOG_RETENTION_DAYS),
    );

    let file_appender = tracing_appender::rolling::daily(&log_dir, LOG_FILE_BASENAME);
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let file_layer = tracing_subscriber::fmt::layer()
        .with_writer(non_blocking)
        .with_ansi(false);
    let stderr_layer = tracing_subscriber::fmt::layer().with_writer(std::io::stderr);

    #[cfg(target_os = "macos")]
    {
        // Visible with `log stream --predicate 'subsystem == "dev.framereel.framereel"'`
        let oslog_layer = tracing_oslog::OsLogger::new(OSLOG_SUBSYSTEM, "default");

        tracing_subscriber::registry()
            .with(env_filter)
            .with(stderr_layer)
            .with(file_layer)
            .with(oslog_layer)
            .init();
    }

    #[cfg(not(target_os = "macos"))]
    {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(stderr_layer)
            .with(file_layer)
            .init();
    }

    Ok(guard)
}

fn resolve_log_dir() -> Result<PathBuf> {
    if let Ok(override_path) = std::env::var(LOG_DIR_ENV) {
        return Ok(PathBuf::from(override_path));
    }

    #[cfg(target_os = "macos")]
    {
        let home = std::env::var_os("HOME")
            .map(PathBuf::from)
            .context("Failed to determine home directory for log path")?;
        return Ok(home.join("Library").join("Logs").join("framereel"));
    }

    #[cfg(not(target_os = "macos"))]
    {
        let proj_dirs = ProjectDirs::from("dev", "framereel", "framereel")
            .context("Failed to determine project directories for log path")?;

        #[cfg(target_os = "linux")]
        {
            let base = proj_dirs
                .state_dir()
                .unwrap_or_else(|| proj_dirs.data_local_dir());
            return Ok(base.join("logs"));
        }

        #[cfg(not(target_os = "linux"))]
        {
            return Ok(proj_dirs.data_local_dir().join("logs"));
        }
    }
}

fn prune_old_logs(log_dir: &Path, max_age: Duration) {
    let Ok(entries) = std::fs::read_dir(log_dir) else {
        return;
    };

    let Some(cutoff) = SystemTime::now().checked_sub(max_age) else {
        return;
    };

    for entry in entries.flatten() {
        let path = entry.path();
        if !path.is_file() {
            continue;
        }

        let is_log = path
            .file_name()
            .and_then(|name| name.to_str())
            .map(|name| name.starts_with(LOG_FILE_BASENAME))
            .unwrap_or(false);
        if !is_log {
            continue;
        }

        let Ok(modified) = entry.metadata().and_then(|m| m.modified()) else {
            continue;
        };

        if modified < cutoff {
            let _ = std::fs::remove_file(&path);
        }
    }
}
