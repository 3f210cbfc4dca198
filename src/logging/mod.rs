use tracing::{info, error};
use tracing_subscriber::EnvFilter;
use serde_json::json;
use chrono::{DateTime, Utc};
use std::fs::OpenOptions;
use std::io::Write;
use pingora_proxy::Session;
use crate::config::{LogConfig, LoggingConfig};

/// Инициализирует систему логирования
pub fn init_logging(config: &LoggingConfig) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    // RUST_LOG имеет приоритет над уровнем из конфигурации
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.level))?;

    if config.format == "json" {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(env_filter)
            .with_current_span(false)
            .with_target(true)
            .try_init()?;
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_target(true)
            .try_init()?;
    }

    info!("Logging initialized with level: {}, format: {}", config.level, config.format);
    Ok(())
}

/// Одна запись access лога
#[derive(Debug, Clone)]
pub struct AccessRecord {
    pub timestamp: DateTime<Utc>,
    pub client_ip: String,
    pub method: String,
    pub uri: String,
    pub status: u16,
    pub duration_ms: u64,
    pub route: &'static str,
    pub upstream: Option<String>,
    pub user_agent: String,
}

impl AccessRecord {
    pub fn from_session(
        session: &Session,
        status: u16,
        duration_ms: u64,
        route: &'static str,
        upstream: Option<String>,
    ) -> Self {
        let req = session.req_header();
        Self {
            timestamp: Utc::now(),
            client_ip: session
                .client_addr()
                .map(|addr| addr.to_string())
                .unwrap_or_else(|| "unknown".to_string()),
            method: req.method.as_str().to_string(),
            uri: req.uri.to_string(),
            status,
            duration_ms,
            route,
            upstream,
            user_agent: req
                .headers
                .get("user-agent")
                .and_then(|h| h.to_str().ok())
                .unwrap_or("-")
                .to_string(),
        }
    }
}

/// Логирование HTTP запросов в файл
#[derive(Debug)]
pub struct AccessLogger {
    config: LogConfig,
}

impl AccessLogger {
    pub fn new(config: LogConfig) -> Self {
        Self { config }
    }

    pub fn enabled(&self) -> bool {
        self.config.enabled
    }

    /// Форматирует запись: json или в стиле combined log
    pub fn format_entry(&self, record: &AccessRecord) -> String {
        if self.config.format == "json" {
            json!({
                "timestamp": record.timestamp.to_rfc3339(),
                "client_ip": record.client_ip,
                "method": record.method,
                "uri": record.uri,
                "status": record.status,
                "duration_ms": record.duration_ms,
                "route": record.route,
                "upstream": record.upstream,
                "user_agent": record.user_agent,
            })
            .to_string()
        } else {
            format!(
                "{} - - [{}] \"{} {}\" {} {}ms {} \"{}\"",
                record.client_ip,
                record.timestamp.format("%d/%b/%Y:%H:%M:%S %z"),
                record.method,
                record.uri,
                record.status,
                record.duration_ms,
                record.upstream.as_deref().unwrap_or(record.route),
                record.user_agent
            )
        }
    }

    /// Логирует HTTP запрос
    pub async fn log_request(&self, record: &AccessRecord) {
        if !self.config.enabled {
            return;
        }

        let entry = self.format_entry(record);
        if let Err(e) = self.write_to_file(&entry).await {
            error!("Failed to write access log: {}", e);
        }
    }

    /// Записывает лог в файл
    async fn write_to_file(&self, log_entry: &str) -> Result<(), std::io::Error> {
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.config.path)?;

        writeln!(file, "{}", log_entry)?;
        file.flush()?;
        Ok(())
    }
}
