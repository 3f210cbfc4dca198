use async_trait::async_trait;
use http::{HeaderValue, Uri};
use log::{info, warn};
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;

use pingora::prelude::*;
use pingora::http::{RequestHeader, ResponseHeader};

use crate::config::Config;
use crate::cors::{add_cors_headers_for_request, handle_cors_preflight};
use crate::logging::{AccessLogger, AccessRecord};
use crate::metrics::{record_request, UPSTREAM_ERRORS};
use crate::routing::{route_request, ForwardTarget, ProxyRule, ProxyRules, Route, Upstream};
use crate::static_files::StaticFiles;
use crate::types::RequestContext;

/// Dev сервер: правила прокси плюс раздача статики
pub struct DevProxy {
    rules: Arc<ProxyRules>,
    static_files: StaticFiles,
    cors: bool,
    access_logger: Arc<AccessLogger>,
}

impl DevProxy {
    pub fn new(
        rules: Arc<ProxyRules>,
        static_files: StaticFiles,
        cors: bool,
        access_logger: Arc<AccessLogger>,
    ) -> Self {
        Self {
            rules,
            static_files,
            cors,
            access_logger,
        }
    }

    /// Собирает прокси из проверенной конфигурации
    pub fn from_config(config: &Config) -> crate::error::ConfigResult<Self> {
        let rules = ProxyRules::from_config(&config.server.proxy)?;
        Ok(Self::new(
            Arc::new(rules),
            StaticFiles::new(config.static_root(), config.server.spa_fallback),
            config.server.cors,
            Arc::new(AccessLogger::new(config.access_log_config())),
        ))
    }

    fn proxied_rule<'s, 'c>(&'s self, ctx: &'c RequestContext) -> Option<(&'s ProxyRule, &'c ForwardTarget)> {
        match &ctx.route {
            Route::Proxy { rule, forward } => self.rules.get(*rule).map(|r| (r, forward)),
            Route::Static => None,
        }
    }
}

/// Переписывает заголовок запроса к upstream: новый путь и, при change_origin, Host.
/// Метод, остальные заголовки и тело не меняются
pub fn rewrite_upstream_request(
    upstream_request: &mut RequestHeader,
    rule: &ProxyRule,
    forward: &ForwardTarget,
) -> Result<()> {
    let uri: Uri = forward.request_uri().parse().map_err(|e| {
        Error::because(
            ErrorType::InvalidHTTPHeader,
            format!("rewritten path '{}' is not a valid URI", forward.request_uri()),
            e,
        )
    })?;
    upstream_request.set_uri(uri);

    if rule.change_origin {
        upstream_request.insert_header("Host", rule.upstream.authority.as_str())?;
    }
    Ok(())
}

/// Дописывает X-Forwarded-For/Proto/Host к уже пришедшим от клиента значениям
pub fn append_forwarded_headers(
    upstream_request: &mut RequestHeader,
    client_ip: Option<IpAddr>,
    host: Option<HeaderValue>,
) -> Result<()> {
    if let Some(ip) = client_ip {
        extend_header(upstream_request, "X-Forwarded-For", &ip.to_string())?;
    }
    extend_header(upstream_request, "X-Forwarded-Proto", "http")?;
    if let Some(host) = host.as_ref().and_then(|h| h.to_str().ok()) {
        extend_header(upstream_request, "X-Forwarded-Host", host)?;
    }
    Ok(())
}

// Значение клиента остается первым в списке через запятую
fn extend_header(upstream_request: &mut RequestHeader, name: &'static str, value: &str) -> Result<()> {
    let existing = upstream_request
        .headers
        .get(name)
        .map(|v| v.to_str().map(str::to_string));
    match existing {
        Some(Ok(prev)) => {
            upstream_request.insert_header(name, format!("{}, {}", prev, value))?;
        }
        Some(Err(_)) => {
            upstream_request.append_header(name, value)?;
        }
        None => {
            upstream_request.insert_header(name, value)?;
        }
    }
    Ok(())
}

/// Разрешает адрес upstream. Неизвестный хост дает ошибку upstream,
/// на которую движок отвечает 502
pub async fn resolve_upstream(upstream: &Upstream) -> Result<SocketAddr> {
    let address = upstream.address();
    let mut addrs = tokio::net::lookup_host(address.as_str()).await.map_err(|e| {
        Error::because(
            ErrorType::ConnectNoRoute,
            format!("cannot resolve upstream {}", address),
            e,
        )
        .into_up()
    })?;
    addrs.next().ok_or_else(|| {
        Error::explain(
            ErrorType::ConnectNoRoute,
            format!("upstream {} resolved to no addresses", address),
        )
        .into_up()
    })
}

#[async_trait]
impl ProxyHttp for DevProxy {
    type CTX = RequestContext;

    fn new_ctx(&self) -> Self::CTX {
        RequestContext::new()
    }

    async fn request_filter(&self, session: &mut Session, ctx: &mut Self::CTX) -> Result<bool> {
        let uri = session
            .req_header()
            .uri
            .path_and_query()
            .map(|pq| pq.as_str())
            .unwrap_or("/")
            .to_string();

        // Обработка CORS preflight запросов
        if self.cors && handle_cors_preflight(session, &uri).await? {
            ctx.served_locally = true;
            return Ok(true);
        }

        route_request(&self.rules, &uri, ctx);

        if ctx.route == Route::Static {
            self.static_files.serve(session, self.cors).await?;
            ctx.served_locally = true;
            return Ok(true);
        }

        Ok(false) // Продолжаем с проксированием
    }

    async fn upstream_peer(&self, _session: &mut Session, ctx: &mut Self::CTX) -> Result<Box<HttpPeer>> {
        let Some((rule, _)) = self.proxied_rule(ctx) else {
            return Err(Error::explain(
                ErrorType::InternalError,
                "upstream requested for a statically served request",
            ));
        };

        let upstream = &rule.upstream;
        let addr = match resolve_upstream(upstream).await {
            Ok(addr) => addr,
            Err(e) => {
                warn!("Upstream {} for '{}' not resolved: {}", upstream.address(), rule.context, e);
                UPSTREAM_ERRORS.with_label_values(&[rule.context.as_str()]).inc();
                return Err(e);
            }
        };
        let sni = if upstream.tls { upstream.host.clone() } else { String::new() };
        Ok(Box::new(HttpPeer::new(addr, upstream.tls, sni)))
    }

    fn fail_to_connect(
        &self,
        _session: &mut Session,
        _peer: &HttpPeer,
        ctx: &mut Self::CTX,
        e: Box<Error>,
    ) -> Box<Error> {
        // Повторов нет: ошибка уходит движку как есть
        if let Some((rule, forward)) = self.proxied_rule(ctx) {
            warn!("Upstream {} unreachable for {}: {}", rule.upstream.address(), forward.url(), e);
            UPSTREAM_ERRORS.with_label_values(&[rule.context.as_str()]).inc();
        }
        e
    }

    async fn upstream_request_filter(
        &self,
        session: &mut Session,
        upstream_request: &mut RequestHeader,
        ctx: &mut Self::CTX,
    ) -> Result<()> {
        let Some((rule, forward)) = self.proxied_rule(ctx) else {
            return Ok(());
        };

        rewrite_upstream_request(upstream_request, rule, forward)?;

        if rule.xfwd {
            let client_ip = session.client_addr().and_then(|a| a.as_inet()).map(|a| a.ip());
            let host = session.req_header().headers.get("host").cloned();
            append_forwarded_headers(upstream_request, client_ip, host)?;
        }

        Ok(())
    }

    async fn response_filter(
        &self,
        session: &mut Session,
        upstream_response: &mut ResponseHeader,
        _ctx: &mut Self::CTX,
    ) -> Result<()> {
        if self.cors {
            add_cors_headers_for_request(session, upstream_response)?;
        }
        Ok(())
    }

    async fn logging(&self, session: &mut Session, e: Option<&Error>, ctx: &mut Self::CTX) {
        let response_code = session
            .response_written()
            .map_or(0, |resp| resp.status.as_u16());
        let route = ctx.route.label();
        let duration = ctx.start_time.elapsed();
        let method = session.req_header().method.as_str().to_string();

        record_request(&method, response_code, route, duration.as_secs_f64());

        let upstream = self.proxied_rule(ctx).map(|(_, forward)| forward.url());
        if let Some(e) = e {
            warn!(
                "{} {} failed after {:.3}s: {}",
                method,
                session.req_header().uri,
                duration.as_secs_f64(),
                e
            );
        } else {
            info!(
                "[{}] {} {} -> {}, response: {} (duration: {:.3}s, local: {})",
                route,
                method,
                session.req_header().uri,
                upstream.as_deref().unwrap_or("static"),
                response_code,
                duration.as_secs_f64(),
                ctx.served_locally
            );
        }

        if self.access_logger.enabled() {
            let record = AccessRecord::from_session(
                session,
                response_code,
                duration.as_millis() as u64,
                route,
                upstream,
            );
            self.access_logger.log_request(&record).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::routing::PathRewrite;

    fn api_rule(change_origin: bool) -> ProxyRule {
        let mut rule = ProxyRule::new(
            "/api",
            "http://localhost:8080",
            PathRewrite::strip_prefix("/api"),
        )
        .unwrap();
        rule.change_origin = change_origin;
        rule
    }

    #[test]
    fn test_upstream_request_keeps_method_and_headers() {
        let rule = api_rule(false);
        let forward = rule.forward("/api/users/42?expand=posts");

        let mut request = RequestHeader::build("PUT", b"/api/users/42?expand=posts", None).unwrap();
        request.insert_header("Host", "localhost:5173").unwrap();
        request.insert_header("Content-Type", "application/json").unwrap();
        request.insert_header("Authorization", "Bearer token").unwrap();

        rewrite_upstream_request(&mut request, &rule, &forward).unwrap();

        assert_eq!(request.method, "PUT");
        assert_eq!(request.uri.to_string(), "/users/42?expand=posts");
        assert_eq!(request.headers.get("host").unwrap(), "localhost:5173");
        assert_eq!(request.headers.get("content-type").unwrap(), "application/json");
        assert_eq!(request.headers.get("authorization").unwrap(), "Bearer token");
    }

    #[test]
    fn test_upstream_request_for_bare_prefix() {
        let rule = api_rule(false);
        let forward = rule.forward("/api");

        let mut request = RequestHeader::build("GET", b"/api", None).unwrap();
        rewrite_upstream_request(&mut request, &rule, &forward).unwrap();

        assert_eq!(request.uri.path(), "/");
    }

    #[test]
    fn test_change_origin_sets_host() {
        let rule = api_rule(true);
        let forward = rule.forward("/api/posts");

        let mut request = RequestHeader::build("GET", b"/api/posts", None).unwrap();
        request.insert_header("Host", "localhost:5173").unwrap();
        rewrite_upstream_request(&mut request, &rule, &forward).unwrap();

        assert_eq!(request.headers.get("host").unwrap(), "localhost:8080");
    }

    #[test]
    fn test_client_forwarded_for_kept_without_xfwd() {
        let rule = api_rule(false);
        let forward = rule.forward("/api/posts");

        let mut request = RequestHeader::build("GET", b"/api/posts", None).unwrap();
        request.insert_header("X-Forwarded-For", "10.1.1.1").unwrap();
        rewrite_upstream_request(&mut request, &rule, &forward).unwrap();

        assert!(!rule.xfwd);
        let values: Vec<_> = request.headers.get_all("x-forwarded-for").iter().collect();
        assert_eq!(values, vec!["10.1.1.1"]);
        assert!(request.headers.get("x-forwarded-proto").is_none());
        assert!(request.headers.get("x-forwarded-host").is_none());
    }

    #[test]
    fn test_forwarded_headers_appended_to_client_values() {
        let mut request = RequestHeader::build("GET", b"/posts", None).unwrap();
        request.insert_header("X-Forwarded-For", "10.1.1.1").unwrap();

        append_forwarded_headers(
            &mut request,
            Some("127.0.0.1".parse().unwrap()),
            Some(HeaderValue::from_static("localhost:5173")),
        )
        .unwrap();

        assert_eq!(request.headers.get("x-forwarded-for").unwrap(), "10.1.1.1, 127.0.0.1");
        assert_eq!(request.headers.get("x-forwarded-proto").unwrap(), "http");
        assert_eq!(request.headers.get("x-forwarded-host").unwrap(), "localhost:5173");
    }

    #[tokio::test]
    async fn test_unresolvable_upstream_is_an_error() {
        let upstream = Upstream::parse("http://nonexistent.invalid:8080").unwrap();
        let err = resolve_upstream(&upstream).await.unwrap_err();

        assert_eq!(*err.etype(), ErrorType::ConnectNoRoute);
        assert_eq!(*err.esource(), ErrorSource::Upstream);
    }

    #[tokio::test]
    async fn test_ip_upstream_resolves() {
        let upstream = Upstream::parse("http://127.0.0.1:8080").unwrap();
        let addr = resolve_upstream(&upstream).await.unwrap();

        assert_eq!(addr, "127.0.0.1:8080".parse::<SocketAddr>().unwrap());
    }

    #[test]
    fn test_from_default_config() {
        let proxy = DevProxy::from_config(&Config::default()).unwrap();

        assert_eq!(proxy.rules.len(), 1);
        assert!(proxy.cors);
        assert!(!proxy.access_logger.enabled());
    }
}
