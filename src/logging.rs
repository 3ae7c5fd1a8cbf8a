//! Logging bootstrap.
//!
//! Everything goes to stderr; stdout belongs to the JSON-RPC stream and must
//! never carry log output. `LOG_LEVEL` selects the filter
//! (debug|info|warn|error|silent); `ADMIN_MODE` suppresses everything below
//! `error` so an attached terminal UI stays readable.

use tracing_subscriber::EnvFilter;

fn filter_directive() -> String {
    let admin_mode = std::env::var("ADMIN_MODE")
        .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
        .unwrap_or(false);
    if admin_mode {
        return "error".to_string();
    }
    match std::env::var("LOG_LEVEL").as_deref() {
        Ok("silent") => "off".to_string(),
        Ok(level @ ("debug" | "info" | "warn" | "error")) => level.to_string(),
        _ => "info".to_string(),
    }
}

pub fn init() {
    let filter = EnvFilter::try_new(filter_directive())
        .unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_ansi(false)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_filter_directive_defaults_to_info() {
        std::env::remove_var("ADMIN_MODE");
        std::env::remove_var("LOG_LEVEL");
        assert_eq!(filter_directive(), "info");
    }
}
