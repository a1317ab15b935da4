use coach::config::LoggingConfig;
use tracing_subscriber::EnvFilter;

pub fn init_logging(config: &LoggingConfig) {
    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::util::SubscriberInitExt;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("warn,coach={}", config.level)));

    // `tracing_appender::rolling::daily` panics if it can't create the initial
    // log file, so writability is checked first.
    let log_dir = std::env::var("COACH_LOG_DIR").ok().or_else(|| config.dir.clone());
    let file_layer = log_dir.as_deref().and_then(|dir| {
        if let Err(e) = std::fs::create_dir_all(dir) {
            eprintln!("Warning: Could not create log directory {} ({}), file logging disabled", dir, e);
            return None;
        }
        let test_path = std::path::Path::new(dir).join(".coach_write_test");
        match std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&test_path)
        {
            Ok(_) => {
                let _ = std::fs::remove_file(&test_path);

                let file_appender = tracing_appender::rolling::daily(dir, "coach.log");
                let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

                // The guard flushes on drop; keep it for the life of the process
                Box::leak(Box::new(guard));

                Some(
                    tracing_subscriber::fmt::layer()
                        .with_writer(non_blocking)
                        .with_ansi(false)
                        .with_target(true),
                )
            }
            Err(e) => {
                eprintln!(
                    "Warning: Could not write to log directory {} ({}), file logging disabled",
                    dir, e
                );
                None
            }
        }
    });

    let (plain, json) = if config.json {
        (None, Some(tracing_subscriber::fmt::layer().json().with_target(true)))
    } else {
        (
            Some(
                tracing_subscriber::fmt::layer()
                    .with_target(true)
                    .with_thread_ids(false)
                    .with_file(false)
                    .with_line_number(false),
            ),
            None,
        )
    };

    let file_logging_enabled = file_layer.is_some();
    tracing_subscriber::registry()
        .with(filter)
        .with(plain)
        .with(json)
        .with(file_layer)
        .init();

    if let (true, Some(dir)) = (file_logging_enabled, log_dir) {
        eprintln!("Logging to: {}/coach.log", dir);
    }
}

pub fn init_logging_simple() {
    // Minimal logging for one-shot commands
    let _ = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::WARN)
        .try_init();
}
