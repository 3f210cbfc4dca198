use thiserror::Error;

/// Ошибки загрузки и проверки конфигурации
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("invalid proxy target '{target}': {reason}")]
    InvalidTarget { target: String, reason: String },

    #[error("invalid pattern '{pattern}': {source}")]
    InvalidPattern {
        pattern: String,
        #[source]
        source: regex::Error,
    },

    #[error("invalid listen address '{0}'")]
    InvalidListen(String),

    #[error("duplicate proxy context '{0}'")]
    DuplicateContext(String),
}

pub type ConfigResult<T> = Result<T, ConfigError>;
