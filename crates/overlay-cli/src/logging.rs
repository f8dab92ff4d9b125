use crate::error::{CliError, Result};
use std::fs::File;
use std::path::PathBuf;
use std::sync::Mutex;
use tracing_subscriber::{
    EnvFilter,
    filter::LevelFilter,
    fmt::{self},
    prelude::*,
};

/// Installs the global subscriber. Logs go to stderr (and optionally a file);
/// stdout is left to the protocol.
///
/// `RUST_LOG` directives refine the level chosen by `-v`/`--quiet`.
pub fn setup_logging(verbosity: u8, quiet: bool, log_file: Option<PathBuf>) -> Result<()> {
    let directives = std::env::var(EnvFilter::DEFAULT_ENV).unwrap_or_default();
    let env_filter = build_filter(level_for(verbosity, quiet), &directives);

    let stderr_layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_ansi(true)
        .with_target(false)
        .compact();

    let subscriber = tracing_subscriber::registry()
        .with(env_filter)
        .with(stderr_layer);

    if let Some(path) = log_file {
        let file = File::create(&path).map_err(CliError::Io)?;
        let file_layer = fmt::layer()
            .with_writer(Mutex::new(file))
            .with_ansi(false)
            .with_target(true);
        subscriber.with(file_layer).init();
    } else {
        subscriber.init();
    }

    Ok(())
}

fn level_for(verbosity: u8, quiet: bool) -> LevelFilter {
    if quiet {
        return LevelFilter::OFF;
    }
    match verbosity {
        0 => LevelFilter::WARN,
        1 => LevelFilter::INFO,
        2 => LevelFilter::DEBUG,
        _ => LevelFilter::TRACE,
    }
}

/// `level` applies to every target the directives do not mention. Unparsable
/// directives are skipped.
fn build_filter(level: LevelFilter, directives: &str) -> EnvFilter {
    EnvFilter::builder()
        .with_default_directive(level.into())
        .parse_lossy(directives)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use tracing::{debug, info, trace, warn};

    fn capture(filter: EnvFilter, emit: impl FnOnce()) -> String {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("capture.log");
        let file = File::create(&path).unwrap();
        let subscriber = tracing_subscriber::registry().with(filter).with(
            fmt::layer()
                .with_writer(Mutex::new(file))
                .with_ansi(false),
        );
        tracing::subscriber::with_default(subscriber, emit);
        std::fs::read_to_string(path).unwrap()
    }

    #[test]
    fn verbosity_flags_select_the_default_level() {
        assert_eq!(level_for(0, false), LevelFilter::WARN);
        assert_eq!(level_for(1, false), LevelFilter::INFO);
        assert_eq!(level_for(2, false), LevelFilter::DEBUG);
        assert_eq!(level_for(7, false), LevelFilter::TRACE);
        assert_eq!(level_for(3, true), LevelFilter::OFF);
    }

    #[test]
    fn without_directives_the_default_level_is_the_ceiling() {
        assert_eq!(
            build_filter(LevelFilter::INFO, "").max_level_hint(),
            Some(LevelFilter::INFO)
        );
    }

    #[test]
    #[serial]
    fn default_level_filters_events_and_keeps_fields() {
        let content = capture(build_filter(LevelFilter::INFO, ""), || {
            info!(item = "EMD-6057", "Map loaded");
            debug!(item = "EMD-6057", "Trying source");
        });
        assert!(content.contains("Map loaded"));
        assert!(content.contains("item=\"EMD-6057\""));
        assert!(!content.contains("Trying source"));
    }

    #[test]
    #[serial]
    fn directives_refine_single_targets() {
        let content = capture(build_filter(LevelFilter::WARN, "overlay::engine=trace"), || {
            trace!(target: "overlay::engine", "Candidate url expanded");
            info!(target: "overlay::bridge", "Command handled");
            warn!(target: "overlay::bridge", "Command failed");
        });
        assert!(content.contains("Candidate url expanded"));
        assert!(!content.contains("Command handled"));
        assert!(content.contains("Command failed"));
    }

    #[test]
    #[serial]
    fn unparsable_directives_fall_back_to_the_default() {
        let content = capture(build_filter(LevelFilter::INFO, "overlay=loudest"), || {
            info!(target: "overlay", "Viewer cleared");
            debug!(target: "overlay", "Threshold updated");
        });
        assert!(content.contains("Viewer cleared"));
        assert!(!content.contains("Threshold updated"));
    }

    #[test]
    #[serial]
    fn unwritable_log_file_is_an_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let result = setup_logging(0, false, Some(dir.path().to_path_buf()));
        assert!(matches!(result, Err(CliError::Io(_))));
    }
}
