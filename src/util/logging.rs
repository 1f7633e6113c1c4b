use std::fs::OpenOptions;
use std::path::Path;

use env_logger::Target;

#[derive(Copy, Clone, Debug)]
pub enum LogVerbosity {
    Normal,
    Verbose,
    Debug,
}

/// Initialise the global logger. With `log_file` set, log lines go to that
/// file (append mode, matching the original's `freopen(path, "w", stderr)`
/// followed by unbuffered writes) instead of stderr.
pub fn init_logger(verbosity: LogVerbosity, log_file: Option<&Path>) {
    let level = match verbosity {
        LogVerbosity::Normal => log::LevelFilter::Info,
        LogVerbosity::Verbose => log::LevelFilter::Debug,
        LogVerbosity::Debug => log::LevelFilter::Trace,
    };

    let mut builder = env_logger::Builder::from_default_env();
    builder.filter_level(level).format_timestamp_millis();

    if let Some(path) = log_file {
        match OpenOptions::new().create(true).append(true).open(path) {
            Ok(file) => {
                builder.target(Target::Pipe(Box::new(file)));
            }
            Err(e) => {
                eprintln!("failed to open log file {}: {e}", path.display());
            }
        }
    }

    let _ = builder.try_init();
}
