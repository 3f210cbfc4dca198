use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::net::SocketAddr;
use std::path::{Component, Path, PathBuf};
use log::info;

use crate::alias::AliasResolver;
use crate::error::{ConfigError, ConfigResult};
use crate::routing::ProxyRules;

/// Конфигурация dev сервера
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct Config {
    /// Плагины фреймворка, порядок важен. Сервер их не исполняет, только сообщает о них
    pub plugins: Vec<String>,
    pub resolve: ResolveConfig,
    pub server: ServerConfig,
    pub logging: LoggingConfig,
    pub metrics: MetricsConfig,
    // Директория файла конфигурации, относительно нее разрешаются пути
    #[serde(skip)]
    pub base_dir: PathBuf,
    /// Правила, чей target пришел из окружения: (context, переменная, значение)
    #[serde(skip)]
    pub target_overrides: Vec<(String, String, String)>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ResolveConfig {
    pub alias: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ServerConfig {
    pub listen: String,
    /// Корень для статики
    pub root: String,
    pub spa_fallback: bool,
    pub cors: bool,
    pub proxy: Vec<ProxyRuleConfig>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ProxyRuleConfig {
    /// Префикс пути или регулярное выражение, если начинается с '^'
    pub context: String,
    pub target: String,
    /// Переменная окружения, которая переопределяет target
    #[serde(default)]
    pub target_env: Option<String>,
    #[serde(default)]
    pub change_origin: bool,
    /// Добавлять X-Forwarded-For/Proto/Host, по умолчанию запрос уходит как есть
    #[serde(default)]
    pub xfwd: bool,
    #[serde(default)]
    pub rewrite: Option<RewriteConfig>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RewriteConfig {
    pub pattern: String,
    #[serde(default)]
    pub replacement: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub format: String, // json или text
    pub level: String,  // error, warn, info, debug, trace
    pub access_log: LogConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LogConfig {
    pub enabled: bool,
    pub path: String,
    pub format: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct MetricsConfig {
    pub enabled: bool,
    pub port: u16,
}

impl Default for Config {
    /// Повторяет исходную конфигурацию фронтенда: vue плагины, алиас `@` и прокси `/api`
    fn default() -> Self {
        Self {
            plugins: vec!["vue".to_string(), "vue-jsx".to_string()],
            resolve: ResolveConfig::default(),
            server: ServerConfig::default(),
            logging: LoggingConfig::default(),
            metrics: MetricsConfig::default(),
            base_dir: PathBuf::from("."),
            target_overrides: Vec::new(),
        }
    }
}

impl Default for ResolveConfig {
    fn default() -> Self {
        let mut alias = BTreeMap::new();
        alias.insert("@".to_string(), "./src".to_string());
        Self { alias }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: "127.0.0.1:5173".to_string(),
            root: "./dist".to_string(),
            spa_fallback: true,
            cors: true,
            proxy: vec![ProxyRuleConfig {
                context: "/api".to_string(),
                target: "http://localhost:8080".to_string(),
                target_env: Some("DEVPROXY_API_TARGET".to_string()),
                change_origin: false,
                xfwd: false,
                rewrite: Some(RewriteConfig {
                    pattern: "^/api".to_string(),
                    replacement: String::new(),
                }),
            }],
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            format: "text".to_string(),
            level: "info".to_string(),
            access_log: LogConfig::default(),
        }
    }
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            path: "./access.log".to_string(),
            format: "json".to_string(),
        }
    }
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            port: 9090,
        }
    }
}

impl Config {
    /// Загружает конфигурацию из YAML файла
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> ConfigResult<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)?;
        let base_dir = path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));

        let config = Self::from_yaml_str(&content, base_dir)?;
        info!("Loaded config from: {}", path.display());
        Ok(config)
    }

    /// Разбирает YAML и применяет переопределения из окружения.
    /// Пустой документ дает конфигурацию по умолчанию, base_dir становится абсолютным
    pub fn from_yaml_str(content: &str, base_dir: PathBuf) -> ConfigResult<Self> {
        let mut config: Config = if content.trim().is_empty() {
            Config::default()
        } else {
            serde_yaml::from_str(content)?
        };
        config.base_dir = std::path::absolute(&base_dir)?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Подставляет target из переменных окружения, указанных в target_env
    pub fn apply_env_overrides(&mut self) {
        self.target_overrides.clear();
        for rule in &mut self.server.proxy {
            let Some(var) = &rule.target_env else {
                continue;
            };
            if let Ok(value) = std::env::var(var) {
                if !value.trim().is_empty() {
                    info!("Proxy target for '{}' overridden by {}: {}", rule.context, var, value);
                    rule.target = value.trim().to_string();
                    self.target_overrides
                        .push((rule.context.clone(), var.clone(), rule.target.clone()));
                }
            }
        }
    }

    /// Проверяет адрес, правила прокси и алиасы
    pub fn validate(&self) -> ConfigResult<()> {
        self.listen_addr()?;
        ProxyRules::from_config(&self.server.proxy)?;
        Ok(())
    }

    pub fn listen_addr(&self) -> ConfigResult<SocketAddr> {
        self.server
            .listen
            .parse()
            .map_err(|_| ConfigError::InvalidListen(self.server.listen.clone()))
    }

    /// Разрешает путь относительно директории конфигурации
    pub fn resolve_path(&self, path: &str) -> PathBuf {
        self.base_dir
            .join(path)
            .components()
            .filter(|c| !matches!(c, Component::CurDir))
            .collect()
    }

    /// Настройки access лога с путем, разрешенным от директории конфигурации
    pub fn access_log_config(&self) -> LogConfig {
        let mut access_log = self.logging.access_log.clone();
        access_log.path = self
            .resolve_path(&access_log.path)
            .to_string_lossy()
            .into_owned();
        access_log
    }

    pub fn static_root(&self) -> PathBuf {
        self.resolve_path(&self.server.root)
    }

    pub fn alias_resolver(&self) -> AliasResolver {
        AliasResolver::new(
            self.resolve
                .alias
                .iter()
                .map(|(token, dir)| (token.clone(), self.resolve_path(dir))),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_document_gives_defaults() {
        let config = Config::from_yaml_str("", PathBuf::from("/srv/front")).unwrap();

        assert_eq!(config.plugins, vec!["vue", "vue-jsx"]);
        assert_eq!(config.server.proxy.len(), 1);
        assert_eq!(config.server.proxy[0].context, "/api");
        assert_eq!(config.resolve.alias.get("@").map(String::as_str), Some("./src"));
        assert_eq!(config.static_root(), PathBuf::from("/srv/front/dist"));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_document_keeps_other_defaults() {
        let yaml = r#"
server:
  listen: "0.0.0.0:3000"
  proxy:
    - context: /backend
      target: http://127.0.0.1:9000
      change_origin: true
"#;
        let config = Config::from_yaml_str(yaml, PathBuf::from(".")).unwrap();

        assert_eq!(config.server.listen, "0.0.0.0:3000");
        assert!(config.server.spa_fallback);
        assert_eq!(config.server.proxy.len(), 1);
        let rule = &config.server.proxy[0];
        assert!(rule.change_origin);
        assert!(rule.rewrite.is_none());
        assert!(rule.target_env.is_none());
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_target_env_override() {
        let yaml = r#"
server:
  proxy:
    - context: /api
      target: http://localhost:8080
      target_env: GSLOG_DEVPROXY_TEST_TARGET_OVERRIDE
"#;
        std::env::set_var("GSLOG_DEVPROXY_TEST_TARGET_OVERRIDE", "http://10.0.0.5:8081");
        let config = Config::from_yaml_str(yaml, PathBuf::from(".")).unwrap();
        std::env::remove_var("GSLOG_DEVPROXY_TEST_TARGET_OVERRIDE");

        assert_eq!(config.server.proxy[0].target, "http://10.0.0.5:8081");
        assert_eq!(
            config.target_overrides,
            vec![(
                "/api".to_string(),
                "GSLOG_DEVPROXY_TEST_TARGET_OVERRIDE".to_string(),
                "http://10.0.0.5:8081".to_string()
            )]
        );
    }

    #[test]
    fn test_relative_base_dir_made_absolute() {
        let config = Config::from_yaml_str("", PathBuf::from(".")).unwrap();
        let cwd = std::env::current_dir().unwrap();

        assert!(config.base_dir.is_absolute());
        let resolved = config.alias_resolver().resolve("@/components/PostList.vue").unwrap();
        assert!(resolved.is_absolute());
        assert_eq!(resolved, cwd.join("src/components/PostList.vue"));
        assert_eq!(config.static_root(), cwd.join("dist"));
    }

    #[test]
    fn test_access_log_path_resolved_against_config_dir() {
        let yaml = "logging:\n  access_log:\n    enabled: true\n    path: logs/access.log\n";
        let config = Config::from_yaml_str(yaml, PathBuf::from("/srv/front")).unwrap();

        assert_eq!(config.access_log_config().path, "/srv/front/logs/access.log");

        let yaml = "logging:\n  access_log:\n    path: /var/log/devproxy.log\n";
        let config = Config::from_yaml_str(yaml, PathBuf::from("/srv/front")).unwrap();
        assert_eq!(config.access_log_config().path, "/var/log/devproxy.log");
    }

    #[test]
    fn test_invalid_listen_rejected() {
        let yaml = "server:\n  listen: not-an-address\n";
        let config = Config::from_yaml_str(yaml, PathBuf::from(".")).unwrap();

        assert!(matches!(config.validate(), Err(ConfigError::InvalidListen(_))));
    }

    #[test]
    fn test_invalid_yaml_rejected() {
        let result = Config::from_yaml_str("server: [", PathBuf::from("."));
        assert!(matches!(result, Err(ConfigError::Yaml(_))));
    }
}
