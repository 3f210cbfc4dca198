use http::Uri;
use log::{debug, info};
use regex::Regex;
use std::collections::HashSet;

use crate::config::{ProxyRuleConfig, RewriteConfig};
use crate::error::{ConfigError, ConfigResult};
use crate::types::RequestContext;

/// Результат маршрутизации запроса
#[derive(Debug, Clone, PartialEq)]
pub enum Route {
    /// Запрос уходит на upstream правила с индексом `rule`
    Proxy { rule: usize, forward: ForwardTarget },
    /// Обычная раздача статики dev сервером
    Static,
}

impl Route {
    pub fn label(&self) -> &'static str {
        match self {
            Route::Proxy { .. } => "proxy",
            Route::Static => "static",
        }
    }
}

/// Куда уходит проксируемый запрос
#[derive(Debug, Clone, PartialEq)]
pub struct ForwardTarget {
    pub origin: String,
    pub base_path: String,
    /// Путь после rewrite, может быть пустым
    pub path: String,
}

impl ForwardTarget {
    /// Базовый путь target + переписанный путь, с '/' между ними,
    /// если переписанный путь начинается не с '/' и не с '?'
    fn joined_path(&self) -> String {
        let needs_slash = !self.path.is_empty()
            && !self.path.starts_with('/')
            && !self.path.starts_with('?');
        format!(
            "{}{}{}",
            self.base_path,
            if needs_slash { "/" } else { "" },
            self.path
        )
    }

    /// Полный URL: origin + базовый путь target + переписанный путь
    pub fn url(&self) -> String {
        format!("{}{}", self.origin, self.joined_path())
    }

    /// Request target для upstream, всегда начинается с '/'
    pub fn request_uri(&self) -> String {
        let mut uri = self.joined_path();
        if !uri.starts_with('/') {
            uri.insert(0, '/');
        }
        uri
    }
}

/// Upstream, разобранный из target
#[derive(Debug, Clone, PartialEq)]
pub struct Upstream {
    pub tls: bool,
    pub host: String,
    pub port: u16,
    /// host[:port] как в target, используется для Host при change_origin
    pub authority: String,
    pub origin: String,
    pub base_path: String,
}

impl Upstream {
    pub fn parse(target: &str) -> ConfigResult<Self> {
        let invalid = |reason: &str| ConfigError::InvalidTarget {
            target: target.to_string(),
            reason: reason.to_string(),
        };

        let uri: Uri = target.parse().map_err(|_| invalid("not a valid URL"))?;

        let tls = match uri.scheme_str() {
            Some("http") => false,
            Some("https") => true,
            Some(_) => return Err(invalid("scheme must be http or https")),
            None => return Err(invalid("missing scheme")),
        };

        let authority = uri.authority().ok_or_else(|| invalid("missing host"))?;
        let host = authority.host().to_string();
        if host.is_empty() {
            return Err(invalid("missing host"));
        }
        let port = authority.port_u16().unwrap_or(if tls { 443 } else { 80 });

        let base_path = uri.path().trim_end_matches('/').to_string();

        Ok(Self {
            tls,
            host,
            port,
            authority: authority.as_str().to_string(),
            origin: format!("{}://{}", if tls { "https" } else { "http" }, authority.as_str()),
            base_path,
        })
    }

    /// Адрес для подключения
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Чистая функция переписывания пути
#[derive(Debug, Clone)]
pub struct PathRewrite {
    pattern: Option<Regex>,
    replacement: String,
}

impl PathRewrite {
    pub fn identity() -> Self {
        Self {
            pattern: None,
            replacement: String::new(),
        }
    }

    /// Убирает префикс один раз, только в начале пути
    pub fn strip_prefix(prefix: &str) -> Self {
        let pattern = Regex::new(&format!("^{}", regex::escape(prefix)))
            .expect("escaped literal is a valid regex");
        Self {
            pattern: Some(pattern),
            replacement: String::new(),
        }
    }

    pub fn from_config(config: &RewriteConfig) -> ConfigResult<Self> {
        let pattern = Regex::new(&config.pattern).map_err(|source| ConfigError::InvalidPattern {
            pattern: config.pattern.clone(),
            source,
        })?;
        Ok(Self {
            pattern: Some(pattern),
            replacement: config.replacement.clone(),
        })
    }

    /// Заменяет первое совпадение, остальной путь не трогает
    pub fn apply(&self, path: &str) -> String {
        match &self.pattern {
            Some(pattern) => pattern.replace(path, self.replacement.as_str()).into_owned(),
            None => path.to_string(),
        }
    }
}

#[derive(Debug, Clone)]
enum ContextMatcher {
    Prefix(String),
    Pattern(Regex),
}

/// Правило прокси: предикат по пути и преобразование пути
#[derive(Debug, Clone)]
pub struct ProxyRule {
    pub context: String,
    matcher: ContextMatcher,
    pub upstream: Upstream,
    rewrite: PathRewrite,
    pub change_origin: bool,
    /// Дописывать X-Forwarded-* заголовки
    pub xfwd: bool,
}

impl ProxyRule {
    pub fn new(context: &str, target: &str, rewrite: PathRewrite) -> ConfigResult<Self> {
        let matcher = if context.starts_with('^') {
            let pattern = Regex::new(context).map_err(|source| ConfigError::InvalidPattern {
                pattern: context.to_string(),
                source,
            })?;
            ContextMatcher::Pattern(pattern)
        } else {
            ContextMatcher::Prefix(context.to_string())
        };

        Ok(Self {
            context: context.to_string(),
            matcher,
            upstream: Upstream::parse(target)?,
            rewrite,
            change_origin: false,
            xfwd: false,
        })
    }

    pub fn from_config(config: &ProxyRuleConfig) -> ConfigResult<Self> {
        let rewrite = match &config.rewrite {
            Some(rewrite) => PathRewrite::from_config(rewrite)?,
            None => PathRewrite::identity(),
        };
        let mut rule = Self::new(&config.context, &config.target, rewrite)?;
        rule.change_origin = config.change_origin;
        rule.xfwd = config.xfwd;
        Ok(rule)
    }

    pub fn matches(&self, path: &str) -> bool {
        match &self.matcher {
            ContextMatcher::Prefix(prefix) => path.starts_with(prefix.as_str()),
            ContextMatcher::Pattern(pattern) => pattern.is_match(path),
        }
    }

    pub fn rewrite(&self, path: &str) -> String {
        self.rewrite.apply(path)
    }

    /// Вычисляет цель пересылки. Вызывать только для совпавших путей
    pub fn forward(&self, path: &str) -> ForwardTarget {
        ForwardTarget {
            origin: self.upstream.origin.clone(),
            base_path: self.upstream.base_path.clone(),
            path: self.rewrite(path),
        }
    }
}

/// Набор правил в порядке конфигурации, побеждает первое совпадение
#[derive(Debug, Clone, Default)]
pub struct ProxyRules {
    rules: Vec<ProxyRule>,
}

impl ProxyRules {
    pub fn new(rules: Vec<ProxyRule>) -> Self {
        Self { rules }
    }

    pub fn from_config(configs: &[ProxyRuleConfig]) -> ConfigResult<Self> {
        let mut seen = HashSet::new();
        let mut rules = Vec::with_capacity(configs.len());

        for config in configs {
            if !seen.insert(config.context.as_str()) {
                return Err(ConfigError::DuplicateContext(config.context.clone()));
            }
            let rule = ProxyRule::from_config(config)?;
            debug!("Compiled proxy rule: {} -> {}", rule.context, rule.upstream.origin);
            rules.push(rule);
        }

        Ok(Self { rules })
    }

    pub fn route(&self, path: &str) -> Route {
        self.rules
            .iter()
            .enumerate()
            .find(|(_, rule)| rule.matches(path))
            .map(|(index, rule)| Route::Proxy {
                rule: index,
                forward: rule.forward(path),
            })
            .unwrap_or(Route::Static)
    }

    pub fn get(&self, index: usize) -> Option<&ProxyRule> {
        self.rules.get(index)
    }

    pub fn iter(&self) -> impl Iterator<Item = &ProxyRule> {
        self.rules.iter()
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

/// Определяет маршрутизацию запроса
pub fn route_request(rules: &ProxyRules, uri: &str, ctx: &mut RequestContext) {
    ctx.route = rules.route(uri);

    match &ctx.route {
        Route::Proxy { forward, .. } => {
            info!("Proxying {} -> {}", uri, forward.url());
        }
        Route::Static => {
            debug!("Serving {} from static root", uri);
        }
    }
}
