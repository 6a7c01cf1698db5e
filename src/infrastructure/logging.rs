use crate::domain::settings::LogSettings;
use std::path::PathBuf;
use std::str::FromStr;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Keeps the file writer flushing; drop it last.
pub struct LoggingGuard {
    _file_guard: Option<WorkerGuard>,
}

fn rotation(name: &str) -> Rotation {
    match name.to_lowercase().as_str() {
        "hourly" => Rotation::HOURLY,
        "minutely" => Rotation::MINUTELY,
        "never" => Rotation::NEVER,
        _ => Rotation::DAILY,
    }
}

fn level(name: &str, fallback: LevelFilter) -> LevelFilter {
    LevelFilter::from_str(name).unwrap_or_else(|_| {
        eprintln!("Unknown log level {:?}, using {}", name, fallback);
        fallback
    })
}

/// RUST_LOG wins. Otherwise the crate logs at `level` and the BLE backend at
/// `bluetooth_level`, which keeps per-pulse traces readable.
fn build_filter(settings: &LogSettings) -> EnvFilter {
    if let Ok(filter) = EnvFilter::try_from_default_env() {
        return filter;
    }
    let bluetooth = level(&settings.bluetooth_level, LevelFilter::WARN);
    EnvFilter::builder()
        .with_default_directive(level(&settings.level, LevelFilter::INFO).into())
        .parse_lossy(format!("btleplug={}", bluetooth))
}

pub fn init_logger(settings: &LogSettings) -> anyhow::Result<LoggingGuard> {
    let filter = build_filter(settings);

    // stdout belongs to the command console
    let console_layer = settings.console_logging_enabled.then(|| {
        fmt::layer()
            .with_writer(std::io::stderr)
            .with_file(settings.show_file_line)
            .with_line_number(settings.show_file_line)
            .with_thread_ids(settings.show_thread_ids)
            .with_target(settings.show_target)
            .with_ansi(settings.ansi_colors)
    });

    let (file_layer, file_guard, log_dir) = if settings.file_logging_enabled {
        let log_dir = PathBuf::from(&settings.log_dir);
        std::fs::create_dir_all(&log_dir)?;
        let appender = RollingFileAppender::new(
            rotation(&settings.rotation),
            &log_dir,
            &settings.file_name_prefix,
        );
        let (writer, guard) = tracing_appender::non_blocking(appender);
        let layer = fmt::layer()
            .with_writer(writer)
            .with_ansi(false)
            .with_file(settings.show_file_line)
            .with_line_number(settings.show_file_line)
            .with_thread_ids(settings.show_thread_ids)
            .with_target(true);
        (Some(layer), Some(guard), Some(log_dir))
    } else {
        (None, None, None)
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(console_layer)
        .with(file_layer)
        .try_init()?;

    match &log_dir {
        Some(dir) => tracing::info!("Logging to {}", dir.display()),
        None => tracing::info!("File logging disabled"),
    }

    Ok(LoggingGuard {
        _file_guard: file_guard,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rotation_names() {
        assert_eq!(rotation("Hourly"), Rotation::HOURLY);
        assert_eq!(rotation("never"), Rotation::NEVER);
        assert_eq!(rotation("weekly"), Rotation::DAILY);
    }

    #[test]
    fn test_filter_quiets_backend() {
        if std::env::var_os("RUST_LOG").is_some() {
            return;
        }
        let settings = LogSettings {
            level: "debug".into(),
            bluetooth_level: "error".into(),
            ..LogSettings::default()
        };
        let filter = build_filter(&settings).to_string();
        assert!(filter.contains("btleplug=error"), "{}", filter);
        assert!(filter.contains("debug"), "{}", filter);
    }

    #[test]
    fn test_bad_level_falls_back() {
        if std::env::var_os("RUST_LOG").is_some() {
            return;
        }
        let settings = LogSettings {
            level: "loud".into(),
            ..LogSettings::default()
        };
        let filter = build_filter(&settings).to_string();
        assert!(filter.contains("btleplug=warn"), "{}", filter);
        assert!(filter.contains("info"), "{}", filter);
    }
}
