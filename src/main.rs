use clap::{Arg, Command};
use log::{error, info};
use std::path::{Path, PathBuf};

use pingora_core::server::Server;
use pingora_proxy::http_proxy_service;

use gslog_devproxy::config::Config;
use gslog_devproxy::error::ConfigError;
use gslog_devproxy::logging::init_logging;
use gslog_devproxy::metrics::init_metrics;
use gslog_devproxy::routing::{ProxyRules, Route};
use gslog_devproxy::static_files::StaticFiles;
use gslog_devproxy::DevProxy;

const DEFAULT_CONFIG: &str = "devproxy.yaml";

fn main() {
    // Парсим аргументы командной строки
    let matches = Command::new("gslog-devproxy")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Development server: static files plus /api proxy to the backend")
        .arg(Arg::new("test")
            .short('t')
            .long("test")
            .help("Test configuration and exit")
            .action(clap::ArgAction::SetTrue))
        .arg(Arg::new("config")
            .short('c')
            .long("config")
            .value_name("FILE")
            .help("Configuration file path")
            .default_value(DEFAULT_CONFIG))
        .arg(Arg::new("resolve")
            .long("resolve")
            .value_name("IMPORT")
            .help("Print the file an aliased import resolves to and exit"))
        .arg(Arg::new("route")
            .long("route")
            .value_name("PATH")
            .help("Print how a request path would be handled and exit"))
        .get_matches();

    let config_path = matches
        .get_one::<String>("config")
        .map(String::as_str)
        .unwrap_or(DEFAULT_CONFIG);

    // Если запрошена проверка конфигурации
    if matches.get_flag("test") {
        env_logger::init();
        test_configuration(config_path);
        return;
    }

    let config = load_config(config_path);

    if let Some(import) = matches.get_one::<String>("resolve") {
        match config.alias_resolver().resolve(import) {
            Some(path) => println!("{} -> {}", import, path.display()),
            None => println!("{} is not aliased", import),
        }
        return;
    }

    if let Some(path) = matches.get_one::<String>("route") {
        print_route(&config, path);
        return;
    }

    // Инициализируем структурированное логирование
    if let Err(e) = init_logging(&config.logging) {
        eprintln!("Failed to initialize logging: {}, falling back to env_logger", e);
        env_logger::init();
    }

    // Сообщения загрузки конфигурации были до логгера, повторяем их
    info!("Using config {} (base dir {})", config_path, config.base_dir.display());
    for (context, var, target) in &config.target_overrides {
        info!("Proxy target for '{}' overridden by {}: {}", context, var, target);
    }

    if let Err(e) = config.validate() {
        error!("Invalid configuration {}: {}", config_path, e);
        std::process::exit(1);
    }

    info!("Starting gslog-devproxy v{}...", env!("CARGO_PKG_VERSION"));

    let proxy = match DevProxy::from_config(&config) {
        Ok(proxy) => proxy,
        Err(e) => {
            error!("Failed to build proxy: {}", e);
            std::process::exit(1);
        }
    };

    let mut server = match Server::new(None) {
        Ok(server) => server,
        Err(e) => {
            error!("Failed to create server: {}", e);
            std::process::exit(1);
        }
    };
    server.bootstrap();

    let mut proxy_service = http_proxy_service(&server.configuration, proxy);
    proxy_service.add_tcp(&config.server.listen);
    server.add_service(proxy_service);

    // Добавляем Prometheus metrics сервис если включен
    if config.metrics.enabled {
        init_metrics();
        let mut prometheus_service = pingora_core::services::listening::Service::prometheus_http_service();
        prometheus_service.add_tcp(&format!("127.0.0.1:{}", config.metrics.port));
        server.add_service(prometheus_service);
        info!("Prometheus metrics service started on port {}", config.metrics.port);
    }

    info!("Dev server listening on http://{}", config.server.listen);
    info!("Serving static files from {}", config.static_root().display());
    if !config.plugins.is_empty() {
        info!("Plugins: {}", config.plugins.join(", "));
    }
    for (token, dir) in config.alias_resolver().entries() {
        info!("  alias {} -> {}", token, dir.display());
    }
    for rule in &config.server.proxy {
        info!(
            "  {} -> {}{}",
            rule.context,
            rule.target,
            rule.rewrite
                .as_ref()
                .map(|r| format!(" (rewrite {} => '{}')", r.pattern, r.replacement))
                .unwrap_or_default()
        );
    }

    server.run_forever();
}

/// Загружает конфигурацию; если файла нет, работает с настройками по умолчанию
fn load_config(config_path: &str) -> Config {
    match Config::load_from_file(config_path) {
        Ok(config) => config,
        Err(ConfigError::Io(e)) if e.kind() == std::io::ErrorKind::NotFound => {
            eprintln!("Config file {} not found, using default configuration", config_path);
            let base_dir = Path::new(config_path)
                .parent()
                .filter(|p| !p.as_os_str().is_empty())
                .map(Path::to_path_buf)
                .unwrap_or_else(|| PathBuf::from("."));
            match Config::from_yaml_str("", base_dir) {
                Ok(config) => config,
                Err(e) => {
                    eprintln!("Failed to build default configuration: {}", e);
                    std::process::exit(1);
                }
            }
        }
        Err(e) => {
            eprintln!("Failed to load config from {}: {}", config_path, e);
            std::process::exit(1);
        }
    }
}

fn print_route(config: &Config, path: &str) {
    let rules = match ProxyRules::from_config(&config.server.proxy) {
        Ok(rules) => rules,
        Err(e) => {
            eprintln!("Invalid proxy rules: {}", e);
            std::process::exit(1);
        }
    };

    match rules.route(path) {
        Route::Proxy { rule, forward } => {
            let context = rules.get(rule).map(|r| r.context.as_str()).unwrap_or("?");
            println!("{} -> proxy [{}] {}", path, context, forward.url());
        }
        Route::Static => {
            let files = StaticFiles::new(config.static_root(), config.server.spa_fallback);
            let path_only = path.split('?').next().unwrap_or(path);
            let response = files.resolve("GET", path_only, true);
            println!("{} -> static {:?}", path, response);
        }
    }
}

/// Функция проверки конфигурации (как nginx -t)
fn test_configuration(config_path: &str) {
    println!("gslog-devproxy: testing configuration file...");

    let mut errors = 0;
    let mut warnings = 0;

    match Config::load_from_file(config_path) {
        Ok(config) => {
            println!("gslog-devproxy: configuration file {} syntax is ok", config_path);

            if let Err(e) = config.listen_addr() {
                println!("gslog-devproxy: [error] {}", e);
                errors += 1;
            }

            match ProxyRules::from_config(&config.server.proxy) {
                Ok(rules) => {
                    println!("gslog-devproxy: found {} proxy rule(s)", rules.len());
                    for rule in rules.iter() {
                        println!("gslog-devproxy:   {} -> {}", rule.context, rule.upstream.origin);
                    }
                }
                Err(e) => {
                    println!("gslog-devproxy: [error] {}", e);
                    errors += 1;
                }
            }

            let root = config.static_root();
            if !root.is_dir() {
                println!("gslog-devproxy: [warn] static root {} not found", root.display());
                warnings += 1;
            }

            for (token, dir) in config.alias_resolver().entries() {
                if !dir.is_dir() {
                    println!("gslog-devproxy: [warn] alias '{}' points to missing directory {}", token, dir.display());
                    warnings += 1;
                }
            }

            if !config.plugins.is_empty() {
                println!("gslog-devproxy: plugins: {}", config.plugins.join(", "));
            }
        }
        Err(e) => {
            println!("gslog-devproxy: [error] configuration file {} test failed: {}", config_path, e);
            errors += 1;
        }
    }

    // Выводим результат
    if errors > 0 {
        println!("gslog-devproxy: configuration file {} test failed", config_path);
        std::process::exit(1);
    } else if warnings > 0 {
        println!("gslog-devproxy: configuration file {} test is successful (with {} warning(s))", config_path, warnings);
    } else {
        println!("gslog-devproxy: configuration file {} test is successful", config_path);
    }
}
