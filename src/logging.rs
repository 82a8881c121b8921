use std::path::Path;

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Install the global subscriber: human-readable output on stderr, filtered by
/// `RUST_LOG` (default `info`), plus a plain-text copy in `log_file` if given.
pub fn init(log_file: Option<&Path>) -> Result<(), tracing_subscriber::util::TryInitError> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let file_layer = log_file.map(|path| {
        let dir = path.parent().unwrap_or_else(|| Path::new("."));
        std::fs::create_dir_all(dir).ok();
        let name = path.file_name().map(|n| n.to_os_string()).unwrap_or_else(|| "cascade-jobs.log".into());
        let appender = tracing_appender::rolling::never(dir, name);
        fmt::layer().with_ansi(false).with_writer(appender)
    });

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(file_layer)
        .try_init()
}
