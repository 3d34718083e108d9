use reqflow_core::config::{AppConfig, LoadOptions};
use serde_json::json;

/// Render the effective configuration with secrets redacted.
pub fn run() -> String {
    let config = match AppConfig::load(LoadOptions::default()) {
        Ok(config) => config,
        Err(error) => {
            return serde_json::to_string(&json!({
                "command": "config",
                "status": "error",
                "message": format!("configuration issue: {error}"),
            }))
            .unwrap_or_else(|_| "{\"status\":\"error\"}".to_string());
        }
    };

    let payload = json!({
        "command": "config",
        "status": "ok",
        "database": {
            "url": config.database.url,
            "max_connections": config.database.max_connections,
            "timeout_secs": config.database.timeout_secs,
        },
        "mail": {
            "host": config.mail.host,
            "port": config.mail.port,
            "username": config.mail.username,
            "password": config.mail.password.as_ref().map(|_| "<redacted>"),
            "sender": config.mail.sender,
            "connect_timeout_secs": config.mail.connect_timeout_secs,
            "send_timeout_secs": config.mail.send_timeout_secs,
            "fallback_host": config.mail.fallback_host,
        },
        "notify": {
            "max_retries": config.notify.max_retries,
            "sweep_interval_secs": config.notify.sweep_interval_secs,
        },
        "server": {
            "bind_address": config.server.bind_address,
            "port": config.server.port,
            "graceful_shutdown_secs": config.server.graceful_shutdown_secs,
        },
        "logging": {
            "level": config.logging.level,
            "format": config.logging.format,
        },
    });

    serde_json::to_string_pretty(&payload)
        .unwrap_or_else(|_| "{\"status\":\"error\"}".to_string())
}

#[cfg(test)]
mod tests {
    use std::env;
    use std::sync::{Mutex, OnceLock};

    static ENV_LOCK: OnceLock<Mutex<()>> = OnceLock::new();

    fn env_lock() -> &'static Mutex<()> {
        ENV_LOCK.get_or_init(|| Mutex::new(()))
    }

    #[test]
    fn config_output_redacts_the_relay_password() {
        let _guard = env_lock().lock().expect("env lock");

        env::set_var("REQFLOW_MAIL_USERNAME", "courier");
        env::set_var("REQFLOW_MAIL_PASSWORD", "relay-secret-value");

        let output = super::run();

        env::remove_var("REQFLOW_MAIL_USERNAME");
        env::remove_var("REQFLOW_MAIL_PASSWORD");

        assert!(output.contains("\"status\": \"ok\""));
        assert!(output.contains("<redacted>"));
        assert!(!output.contains("relay-secret-value"));
    }
}
