use std::panic;
use std::path::PathBuf;
use std::sync::OnceLock;

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt::writer::BoxMakeWriter;

use crate::config::parse_bool;

static LOG_GUARD: OnceLock<WorkerGuard> = OnceLock::new();

/// `HF_LOG_*` switches shared by every binary.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LogSettings {
    /// Daily-rotated `<dir>/<app>.log` instead of stdout.
    pub dir: Option<PathBuf>,
    /// Also run the default panic hook, which prints a backtrace.
    pub include_backtrace: bool,
    /// Emit ANSI colors; off when logging to files.
    pub ansi: bool,
}

impl LogSettings {
    pub fn from_env() -> Self {
        let dir = std::env::var_os("HF_LOG_DIR")
            .filter(|dir| !dir.is_empty())
            .map(PathBuf::from);
        Self {
            ansi: dir.is_none() && parse_bool("HF_LOG_ANSI", true),
            dir,
            include_backtrace: parse_bool("HF_LOG_INCLUDE_BACKTRACE", false),
        }
    }
}

/// Routes panics through `tracing` so they reach the log files. Installed once per process.
pub fn install_tracing_panic_hook(app_name: &'static str) {
    static INSTALLED: OnceLock<()> = OnceLock::new();

    INSTALLED.get_or_init(|| {
        let default_hook = panic::take_hook();
        let include_backtrace = LogSettings::from_env().include_backtrace;

        panic::set_hook(Box::new(move |info| {
            let thread = std::thread::current();
            let thread_name = thread.name().unwrap_or("unnamed");
            let location = info
                .location()
                .map(|loc| format!("{}:{}", loc.file(), loc.line()));
            let message = info
                .payload()
                .downcast_ref::<&str>()
                .map(|s| (*s).to_string())
                .or_else(|| info.payload().downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "non-string panic payload".into());

            tracing::error!(
                app = app_name,
                %thread_name,
                location = location.as_deref().unwrap_or("unknown"),
                panic_message = %message,
                "thread panicked"
            );

            if include_backtrace {
                default_hook(info);
            }
        }));
    });
}

fn file_writer(app_name: &'static str, dir: PathBuf) -> Option<BoxMakeWriter> {
    if let Err(err) = std::fs::create_dir_all(&dir) {
        eprintln!("cannot create log dir {}: {err}; logging to stdout", dir.display());
        return None;
    }
    let appender = tracing_appender::rolling::daily(dir, format!("{app_name}.log"));
    let (writer, guard) = tracing_appender::non_blocking(appender);
    let _ = LOG_GUARD.set(guard);
    Some(BoxMakeWriter::new(writer))
}

/// Installs the global subscriber. `RUST_LOG` filters, defaulting to `info`.
pub fn init_tracing_subscriber(app_name: &'static str) {
    let settings = LogSettings::from_env();
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_ansi(settings.ansi);

    match settings.dir.and_then(|dir| file_writer(app_name, dir)) {
        Some(writer) => {
            let _ = builder.with_writer(writer).try_init();
        }
        None => {
            let _ = builder.try_init();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::test_env::with_env;

    #[test]
    fn file_logging_disables_ansi() {
        with_env(
            &[
                ("HF_LOG_DIR", Some("/tmp/hireflow-logs")),
                ("HF_LOG_ANSI", Some("true")),
                ("HF_LOG_INCLUDE_BACKTRACE", Some("1")),
            ],
            || {
                let settings = LogSettings::from_env();
                assert_eq!(settings.dir, Some(PathBuf::from("/tmp/hireflow-logs")));
                assert!(!settings.ansi);
                assert!(settings.include_backtrace);
            },
        );
    }

    #[test]
    fn stdout_logging_by_default() {
        with_env(
            &[
                ("HF_LOG_DIR", None),
                ("HF_LOG_ANSI", None),
                ("HF_LOG_INCLUDE_BACKTRACE", None),
            ],
            || {
                assert_eq!(
                    LogSettings::from_env(),
                    LogSettings {
                        dir: None,
                        include_backtrace: false,
                        ansi: true,
                    }
                );
            },
        );
    }
}
