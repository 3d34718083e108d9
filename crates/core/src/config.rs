use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub mail: MailConfig,
    pub notify: NotifyConfig,
    pub server: ServerConfig,
    pub logging: LoggingConfig,
}

#[derive(Clone, Debug)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub timeout_secs: u64,
}

/// Outbound mail relay settings. The relay speaks HTTP JSON; `host`/`port`
/// form the primary base URL and `fallback_host` (same port) the secondary.
#[derive(Clone, Debug)]
pub struct MailConfig {
    pub host: String,
    pub port: u16,
    pub username: Option<String>,
    pub password: Option<SecretString>,
    pub sender: String,
    pub connect_timeout_secs: u64,
    pub send_timeout_secs: u64,
    pub fallback_host: Option<String>,
}

#[derive(Clone, Debug)]
pub struct NotifyConfig {
    pub max_retries: u32,
    pub sweep_interval_secs: u64,
}

#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub bind_address: String,
    pub port: u16,
    pub graceful_shutdown_secs: u64,
}

#[derive(Clone, Debug)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    Compact,
    Pretty,
    Json,
}

#[derive(Clone, Debug, Default)]
pub struct ConfigOverrides {
    pub database_url: Option<String>,
    pub log_level: Option<String>,
    pub mail_host: Option<String>,
    pub mail_sender: Option<String>,
    pub mail_password: Option<String>,
    pub notify_max_retries: Option<u32>,
}

#[derive(Clone, Debug, Default)]
pub struct LoadOptions {
    pub config_path: Option<PathBuf>,
    pub require_file: bool,
    pub overrides: ConfigOverrides,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not read config file `{path}`: {source}")]
    ReadFile { path: PathBuf, source: std::io::Error },
    #[error("could not parse config file `{path}`: {source}")]
    ParseFile { path: PathBuf, source: toml::de::Error },
    #[error("required config file was not found: `{0}`")]
    MissingConfigFile(PathBuf),
    #[error("environment variable interpolation failed for `{var}`")]
    MissingEnvInterpolation { var: String },
    #[error("unterminated environment interpolation expression")]
    UnterminatedInterpolation,
    #[error("invalid environment override for `{key}`: `{value}`")]
    InvalidEnvOverride { key: String, value: String },
    #[error("configuration validation failed: {0}")]
    Validation(String),
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database: DatabaseConfig {
                url: "sqlite://reqflow.db".to_string(),
                max_connections: 5,
                timeout_secs: 30,
            },
            mail: MailConfig {
                host: "localhost".to_string(),
                port: 8025,
                username: None,
                password: None,
                sender: "reqflow@localhost".to_string(),
                connect_timeout_secs: 5,
                send_timeout_secs: 10,
                fallback_host: None,
            },
            notify: NotifyConfig { max_retries: 3, sweep_interval_secs: 60 },
            server: ServerConfig {
                bind_address: "127.0.0.1".to_string(),
                port: 8080,
                graceful_shutdown_secs: 15,
            },
            logging: LoggingConfig { level: "info".to_string(), format: LogFormat::Compact },
        }
    }
}

impl std::str::FromStr for LogFormat {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "compact" => Ok(Self::Compact),
            "pretty" => Ok(Self::Pretty),
            "json" => Ok(Self::Json),
            other => Err(ConfigError::Validation(format!(
                "unsupported log format `{other}` (expected compact|pretty|json)"
            ))),
        }
    }
}

impl AppConfig {
    pub fn load(options: LoadOptions) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        let maybe_path = resolve_config_path(options.config_path.as_deref());

        if let Some(path) = maybe_path {
            let patch = read_patch(&path)?;
            config.apply_patch(patch);
        } else if options.require_file {
            let expected = options.config_path.unwrap_or_else(|| PathBuf::from("reqflow.toml"));
            return Err(ConfigError::MissingConfigFile(expected));
        }

        config.apply_env_overrides()?;
        config.apply_overrides(options.overrides);
        config.validate()?;

        Ok(config)
    }

    fn apply_patch(&mut self, patch: ConfigPatch) {
        if let Some(database) = patch.database {
            if let Some(url) = database.url {
                self.database.url = url;
            }
            if let Some(max_connections) = database.max_connections {
                self.database.max_connections = max_connections;
            }
            if let Some(timeout_secs) = database.timeout_secs {
                self.database.timeout_secs = timeout_secs;
            }
        }

        if let Some(mail) = patch.mail {
            if let Some(host) = mail.host {
                self.mail.host = host;
            }
            if let Some(port) = mail.port {
                self.mail.port = port;
            }
            if let Some(username) = mail.username {
                self.mail.username = Some(username);
            }
            if let Some(password) = mail.password {
                self.mail.password = Some(password.into());
            }
            if let Some(sender) = mail.sender {
                self.mail.sender = sender;
            }
            if let Some(connect_timeout_secs) = mail.connect_timeout_secs {
                self.mail.connect_timeout_secs = connect_timeout_secs;
            }
            if let Some(send_timeout_secs) = mail.send_timeout_secs {
                self.mail.send_timeout_secs = send_timeout_secs;
            }
            if let Some(fallback_host) = mail.fallback_host {
                self.mail.fallback_host = Some(fallback_host);
            }
        }

        if let Some(notify) = patch.notify {
            if let Some(max_retries) = notify.max_retries {
                self.notify.max_retries = max_retries;
            }
            if let Some(sweep_interval_secs) = notify.sweep_interval_secs {
                self.notify.sweep_interval_secs = sweep_interval_secs;
            }
        }

        if let Some(server) = patch.server {
            if let Some(bind_address) = server.bind_address {
                self.server.bind_address = bind_address;
            }
            if let Some(port) = server.port {
                self.server.port = port;
            }
            if let Some(graceful_shutdown_secs) = server.graceful_shutdown_secs {
                self.server.graceful_shutdown_secs = graceful_shutdown_secs;
            }
        }

        if let Some(logging) = patch.logging {
            if let Some(level) = logging.level {
                self.logging.level = level;
            }
            if let Some(format) = logging.format {
                self.logging.format = format;
            }
        }
    }

    fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        if let Some(value) = read_env("REQFLOW_DATABASE_URL") {
            self.database.url = value;
        }
        if let Some(value) = read_env("REQFLOW_DATABASE_MAX_CONNECTIONS") {
            self.database.max_connections = parse_u32("REQFLOW_DATABASE_MAX_CONNECTIONS", &value)?;
        }
        if let Some(value) = read_env("REQFLOW_DATABASE_TIMEOUT_SECS") {
            self.database.timeout_secs = parse_u64("REQFLOW_DATABASE_TIMEOUT_SECS", &value)?;
        }

        if let Some(value) = read_env("REQFLOW_MAIL_HOST") {
            self.mail.host = value;
        }
        if let Some(value) = read_env("REQFLOW_MAIL_PORT") {
            self.mail.port = parse_u16("REQFLOW_MAIL_PORT", &value)?;
        }
        if let Some(value) = read_env("REQFLOW_MAIL_USERNAME") {
            self.mail.username = Some(value);
        }
        if let Some(value) = read_env("REQFLOW_MAIL_PASSWORD") {
            self.mail.password = Some(value.into());
        }
        if let Some(value) = read_env("REQFLOW_MAIL_SENDER") {
            self.mail.sender = value;
        }
        if let Some(value) = read_env("REQFLOW_MAIL_CONNECT_TIMEOUT_SECS") {
            self.mail.connect_timeout_secs =
                parse_u64("REQFLOW_MAIL_CONNECT_TIMEOUT_SECS", &value)?;
        }
        if let Some(value) = read_env("REQFLOW_MAIL_SEND_TIMEOUT_SECS") {
            self.mail.send_timeout_secs = parse_u64("REQFLOW_MAIL_SEND_TIMEOUT_SECS", &value)?;
        }
        if let Some(value) = read_env("REQFLOW_MAIL_FALLBACK_HOST") {
            self.mail.fallback_host = Some(value);
        }

        if let Some(value) = read_env("REQFLOW_NOTIFY_MAX_RETRIES") {
            self.notify.max_retries = parse_u32("REQFLOW_NOTIFY_MAX_RETRIES", &value)?;
        }
        if let Some(value) = read_env("REQFLOW_NOTIFY_SWEEP_INTERVAL_SECS") {
            self.notify.sweep_interval_secs =
                parse_u64("REQFLOW_NOTIFY_SWEEP_INTERVAL_SECS", &value)?;
        }

        if let Some(value) = read_env("REQFLOW_SERVER_BIND_ADDRESS") {
            self.server.bind_address = value;
        }
        if let Some(value) = read_env("REQFLOW_SERVER_PORT") {
            self.server.port = parse_u16("REQFLOW_SERVER_PORT", &value)?;
        }
        if let Some(value) = read_env("REQFLOW_SERVER_GRACEFUL_SHUTDOWN_SECS") {
            self.server.graceful_shutdown_secs =
                parse_u64("REQFLOW_SERVER_GRACEFUL_SHUTDOWN_SECS", &value)?;
        }

        let log_level = read_env("REQFLOW_LOGGING_LEVEL").or_else(|| read_env("REQFLOW_LOG_LEVEL"));
        if let Some(value) = log_level {
            self.logging.level = value;
        }
        let log_format =
            read_env("REQFLOW_LOGGING_FORMAT").or_else(|| read_env("REQFLOW_LOG_FORMAT"));
        if let Some(value) = log_format {
            self.logging.format = value.parse()?;
        }

        Ok(())
    }

    fn apply_overrides(&mut self, overrides: ConfigOverrides) {
        if let Some(database_url) = overrides.database_url {
            self.database.url = database_url;
        }
        if let Some(log_level) = overrides.log_level {
            self.logging.level = log_level;
        }
        if let Some(mail_host) = overrides.mail_host {
            self.mail.host = mail_host;
        }
        if let Some(mail_sender) = overrides.mail_sender {
            self.mail.sender = mail_sender;
        }
        if let Some(mail_password) = overrides.mail_password {
            self.mail.password = Some(mail_password.into());
        }
        if let Some(notify_max_retries) = overrides.notify_max_retries {
            self.notify.max_retries = notify_max_retries;
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_database(&self.database)?;
        validate_mail(&self.mail)?;
        validate_notify(&self.notify)?;
        validate_server(&self.server)?;
        validate_logging(&self.logging)?;
        Ok(())
    }
}

fn resolve_config_path(explicit_path: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit_path {
        return path.exists().then_some(path.to_path_buf());
    }

    [PathBuf::from("reqflow.toml"), PathBuf::from("config/reqflow.toml")]
        .into_iter()
        .find(|path| path.exists())
}

fn read_patch(path: &Path) -> Result<ConfigPatch, ConfigError> {
    let raw = fs::read_to_string(path)
        .map_err(|source| ConfigError::ReadFile { path: path.to_path_buf(), source })?;

    let interpolated = interpolate_env_vars(&raw)?;
    toml::from_str::<ConfigPatch>(&interpolated)
        .map_err(|source| ConfigError::ParseFile { path: path.to_path_buf(), source })
}

fn interpolate_env_vars(input: &str) -> Result<String, ConfigError> {
    let mut output = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch == '$' && matches!(chars.peek(), Some('{')) {
            chars.next();
            let mut key = String::new();

            loop {
                match chars.next() {
                    Some('}') => break,
                    Some(next) => key.push(next),
                    None => return Err(ConfigError::UnterminatedInterpolation),
                }
            }

            let value = env::var(&key)
                .map_err(|_| ConfigError::MissingEnvInterpolation { var: key.clone() })?;
            output.push_str(&value);
            continue;
        }

        output.push(ch);
    }

    Ok(output)
}

fn validate_database(database: &DatabaseConfig) -> Result<(), ConfigError> {
    let url = database.url.trim();
    let sqlite_url =
        url.starts_with("sqlite://") || url.starts_with("sqlite::") || url == ":memory:";
    if !sqlite_url {
        return Err(ConfigError::Validation(
            "database.url must be a sqlite URL (`sqlite://...`, `sqlite::...`, or `:memory:`)"
                .to_string(),
        ));
    }

    if database.max_connections == 0 {
        return Err(ConfigError::Validation(
            "database.max_connections must be greater than zero".to_string(),
        ));
    }

    if database.timeout_secs == 0 || database.timeout_secs > 300 {
        return Err(ConfigError::Validation(
            "database.timeout_secs must be in range 1..=300".to_string(),
        ));
    }

    Ok(())
}

fn validate_mail(mail: &MailConfig) -> Result<(), ConfigError> {
    if mail.host.trim().is_empty() {
        return Err(ConfigError::Validation("mail.host must not be empty".to_string()));
    }
    if mail.port == 0 {
        return Err(ConfigError::Validation("mail.port must be greater than zero".to_string()));
    }
    if !mail.sender.contains('@') {
        return Err(ConfigError::Validation(format!(
            "mail.sender must be an email address, got `{}`",
            mail.sender
        )));
    }
    if mail.connect_timeout_secs == 0 || mail.connect_timeout_secs > 300 {
        return Err(ConfigError::Validation(
            "mail.connect_timeout_secs must be in range 1..=300".to_string(),
        ));
    }
    if mail.send_timeout_secs == 0 || mail.send_timeout_secs > 300 {
        return Err(ConfigError::Validation(
            "mail.send_timeout_secs must be in range 1..=300".to_string(),
        ));
    }
    if let Some(fallback) = &mail.fallback_host {
        if fallback.trim().is_empty() {
            return Err(ConfigError::Validation(
                "mail.fallback_host must not be empty when set".to_string(),
            ));
        }
    }
    if mail.username.is_some() != mail.password.is_some() {
        return Err(ConfigError::Validation(
            "mail.username and mail.password must be set together".to_string(),
        ));
    }

    Ok(())
}

fn validate_notify(notify: &NotifyConfig) -> Result<(), ConfigError> {
    if notify.max_retries == 0 || notify.max_retries > 10 {
        return Err(ConfigError::Validation(
            "notify.max_retries must be in range 1..=10".to_string(),
        ));
    }
    if notify.sweep_interval_secs == 0 || notify.sweep_interval_secs > 3600 {
        return Err(ConfigError::Validation(
            "notify.sweep_interval_secs must be in range 1..=3600".to_string(),
        ));
    }

    Ok(())
}

fn validate_server(server: &ServerConfig) -> Result<(), ConfigError> {
    if server.port == 0 {
        return Err(ConfigError::Validation(
            "server.port must be greater than zero".to_string(),
        ));
    }

    if server.graceful_shutdown_secs == 0 {
        return Err(ConfigError::Validation(
            "server.graceful_shutdown_secs must be greater than zero".to_string(),
        ));
    }

    Ok(())
}

fn validate_logging(logging: &LoggingConfig) -> Result<(), ConfigError> {
    let level = logging.level.trim().to_ascii_lowercase();
    match level.as_str() {
        "trace" | "debug" | "info" | "warn" | "error" => Ok(()),
        _ => Err(ConfigError::Validation(
            "logging.level must be one of trace|debug|info|warn|error".to_string(),
        )),
    }
}

fn read_env(key: &str) -> Option<String> {
    env::var(key).ok().filter(|value| !value.trim().is_empty())
}

fn parse_u16(key: &str, value: &str) -> Result<u16, ConfigError> {
    value.parse::<u16>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn parse_u32(key: &str, value: &str) -> Result<u32, ConfigError> {
    value.parse::<u32>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn parse_u64(key: &str, value: &str) -> Result<u64, ConfigError> {
    value.parse::<u64>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

#[derive(Debug, Default, Deserialize)]
struct ConfigPatch {
    database: Option<DatabasePatch>,
    mail: Option<MailPatch>,
    notify: Option<NotifyPatch>,
    server: Option<ServerPatch>,
    logging: Option<LoggingPatch>,
}

#[derive(Debug, Default, Deserialize)]
struct DatabasePatch {
    url: Option<String>,
    max_connections: Option<u32>,
    timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct MailPatch {
    host: Option<String>,
    port: Option<u16>,
    username: Option<String>,
    password: Option<String>,
    sender: Option<String>,
    connect_timeout_secs: Option<u64>,
    send_timeout_secs: Option<u64>,
    fallback_host: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct NotifyPatch {
    max_retries: Option<u32>,
    sweep_interval_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct ServerPatch {
    bind_address: Option<String>,
    port: Option<u16>,
    graceful_shutdown_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct LoggingPatch {
    level: Option<String>,
    format: Option<LogFormat>,
}

#[cfg(test)]
mod tests {
    use std::env;
    use std::fs;
    use std::io;
    use std::sync::{Mutex, OnceLock};

    use secrecy::ExposeSecret;
    use tempfile::TempDir;

    use super::{AppConfig, ConfigError, ConfigOverrides, LoadOptions, LogFormat};

    static ENV_LOCK: OnceLock<Mutex<()>> = OnceLock::new();

    fn env_lock() -> &'static Mutex<()> {
        ENV_LOCK.get_or_init(|| Mutex::new(()))
    }

    fn clear_vars(vars: &[&str]) {
        for var in vars {
            env::remove_var(var);
        }
    }

    fn ensure(condition: bool, message: &'static str) -> Result<(), String> {
        if condition {
            Ok(())
        } else {
            Err(message.to_string())
        }
    }

    #[test]
    fn defaults_validate_cleanly() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        let config = AppConfig::load(LoadOptions::default())
            .map_err(|err| format!("config load failed: {err}"))?;

        ensure(config.notify.max_retries == 3, "default max_retries should be 3")?;
        ensure(config.mail.port == 8025, "default relay port should be 8025")?;
        ensure(config.mail.fallback_host.is_none(), "no fallback host by default")
    }

    #[test]
    fn file_load_supports_env_interpolation() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("TEST_RELAY_PASSWORD", "relay-secret-from-env");

        let result = (|| -> Result<(), String> {
            let dir = TempDir::new().map_err(|err: io::Error| err.to_string())?;
            let path = dir.path().join("reqflow.toml");
            fs::write(
                &path,
                r#"
[mail]
host = "relay.internal"
username = "courier"
password = "${TEST_RELAY_PASSWORD}"
"#,
            )
            .map_err(|err| err.to_string())?;

            let config =
                AppConfig::load(LoadOptions { config_path: Some(path), ..LoadOptions::default() })
                    .map_err(|err| format!("config load failed: {err}"))?;

            ensure(config.mail.host == "relay.internal", "host should come from the file")?;
            let password = config.mail.password.as_ref().map(|value| value.expose_secret());
            ensure(
                password == Some("relay-secret-from-env"),
                "relay password should be loaded from environment",
            )?;
            Ok(())
        })();

        clear_vars(&["TEST_RELAY_PASSWORD"]);
        result
    }

    #[test]
    fn precedence_defaults_file_env_overrides() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("REQFLOW_DATABASE_URL", "sqlite://from-env.db");
        env::set_var("REQFLOW_MAIL_HOST", "relay-from-env");

        let result = (|| -> Result<(), String> {
            let dir = TempDir::new().map_err(|err: io::Error| err.to_string())?;
            let path = dir.path().join("reqflow.toml");
            fs::write(
                &path,
                r#"
[database]
url = "sqlite://from-file.db"

[mail]
host = "relay-from-file"

[logging]
level = "warn"
"#,
            )
            .map_err(|err| err.to_string())?;

            let config = AppConfig::load(LoadOptions {
                config_path: Some(path),
                overrides: ConfigOverrides {
                    database_url: Some("sqlite://from-override.db".to_string()),
                    log_level: Some("debug".to_string()),
                    ..ConfigOverrides::default()
                },
                ..LoadOptions::default()
            })
            .map_err(|err| format!("config load failed: {err}"))?;

            ensure(
                config.database.url == "sqlite://from-override.db",
                "override database url should win",
            )?;
            ensure(config.logging.level == "debug", "overridden log level should be debug")?;
            ensure(
                config.mail.host == "relay-from-env",
                "env mail host should win over file and defaults",
            )?;
            Ok(())
        })();

        clear_vars(&["REQFLOW_DATABASE_URL", "REQFLOW_MAIL_HOST"]);
        result
    }

    #[test]
    fn validation_fails_fast_with_actionable_error() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("REQFLOW_MAIL_SENDER", "not-an-address");

        let result = (|| -> Result<(), String> {
            let error = match AppConfig::load(LoadOptions::default()) {
                Ok(_) => {
                    return Err("expected validation failure but config load succeeded".to_string())
                }
                Err(error) => error,
            };
            let has_message = matches!(
                error,
                ConfigError::Validation(ref message) if message.contains("mail.sender")
            );
            ensure(has_message, "validation failure should mention mail.sender")
        })();

        clear_vars(&["REQFLOW_MAIL_SENDER"]);
        result
    }

    #[test]
    fn username_without_password_is_rejected() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("REQFLOW_MAIL_USERNAME", "courier");

        let result = (|| -> Result<(), String> {
            let error = match AppConfig::load(LoadOptions::default()) {
                Ok(_) => return Err("expected validation failure".to_string()),
                Err(error) => error,
            };
            let has_message = matches!(
                error,
                ConfigError::Validation(ref message) if message.contains("set together")
            );
            ensure(has_message, "validation failure should mention credential pairing")
        })();

        clear_vars(&["REQFLOW_MAIL_USERNAME"]);
        result
    }

    #[test]
    fn secret_values_are_not_leaked_by_debug() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("REQFLOW_MAIL_USERNAME", "courier");
        env::set_var("REQFLOW_MAIL_PASSWORD", "relay-secret-value");

        let result = (|| -> Result<(), String> {
            let config = AppConfig::load(LoadOptions::default())
                .map_err(|err| format!("config load failed: {err}"))?;
            let debug = format!("{config:?}");

            ensure(
                !debug.contains("relay-secret-value"),
                "debug output should not contain the relay password",
            )?;
            ensure(
                matches!(config.logging.format, LogFormat::Compact),
                "default logging format should be compact",
            )?;
            Ok(())
        })();

        clear_vars(&["REQFLOW_MAIL_USERNAME", "REQFLOW_MAIL_PASSWORD"]);
        result
    }
}
