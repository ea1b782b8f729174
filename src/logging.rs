use std::fs;

use time::UtcOffset;
use tracing::Level;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;

const FILTER_FILE: &str = "logging.env";

/// Must be kept alive for as long as logging is wanted, dropping it flushes and stops the writer.
pub struct LoggingHandle {
    _non_blocking_guard: WorkerGuard,
}

pub fn init_logging() -> Result<LoggingHandle, String> {
    let timer = tracing_subscriber::fmt::time::OffsetTime::new(
        UtcOffset::current_local_offset().unwrap_or_else(|err| {
            eprintln!("Failed to get timezone: {}", err);
            UtcOffset::UTC
        }),
        time::macros::format_description!("[year]-[month]-[day] [hour]:[minute]:[second] +[offset_hour]"),
    );
    let (non_blocking, guard) = tracing_appender::non_blocking(std::io::stdout());

    let env_filter = read_env_filter().unwrap_or_else(|err| {
        eprintln!("Failed to read env filter, using environment variable or default: {}", err);
        EnvFilter::builder()
            .with_default_directive(Level::DEBUG.into())
            .from_env_lossy()
    });

    println!("Env Filter: {}", env_filter);

    let subscriber = tracing_subscriber::fmt()
        .with_timer(timer)
        .with_writer(non_blocking)
        .with_env_filter(env_filter)
        .finish();

    tracing::subscriber::set_global_default(subscriber)
        .map_err(|err| format!("failed to initialize logger: {}", err))?;
    tracing_log::LogTracer::init().map_err(|err| format!("failed to forward log records: {}", err))?;

    Ok(LoggingHandle {
        _non_blocking_guard: guard,
    })
}

fn read_env_filter() -> Result<EnvFilter, String> {
    let s = fs::read_to_string(FILTER_FILE).map_err(|err| format!("Failed to read file {}: {}", FILTER_FILE, err))?;
    let first_line = s.lines().next().ok_or_else(|| format!("{} is empty", FILTER_FILE))?;
    parse_filter(first_line)
}

fn parse_filter(directives: &str) -> Result<EnvFilter, String> {
    EnvFilter::builder()
        .with_default_directive(Level::DEBUG.into())
        .parse(directives)
        .map_err(|err| format!("Failed to parse env filter: {}", err))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn filters() {
        let filter = parse_filter("info,heating_control::control=trace").expect("Should parse");
        assert!(filter.to_string().contains("heating_control::control=trace"));
        assert!(parse_filter("heating_control=loud").is_err());
    }
}
