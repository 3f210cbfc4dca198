use pingora::http::ResponseHeader;
use pingora_core::Result;
use pingora_proxy::Session;
use log::info;

const ALLOW_METHODS: &str = "GET, HEAD, POST, PUT, DELETE, OPTIONS, PATCH";
const SERVER_NAME: &str = concat!("gslog-devproxy/", env!("CARGO_PKG_VERSION"));

/// Обрабатывает CORS preflight запросы
pub async fn handle_cors_preflight(session: &mut Session, uri: &str) -> Result<bool> {
    let req = session.req_header();
    if req.method != "OPTIONS" || !req.headers.contains_key("access-control-request-method") {
        return Ok(false);
    }

    let requested_headers = req
        .headers
        .get("access-control-request-headers")
        .and_then(|h| h.to_str().ok())
        .map(str::to_string);

    let mut response = ResponseHeader::build(204, None)?;
    add_cors_headers_for_request(session, &mut response)?;
    if let Some(headers) = requested_headers {
        response.insert_header("Access-Control-Allow-Headers", headers)?;
    }
    response.insert_header("Access-Control-Max-Age", "86400")?;
    response.insert_header("Content-Length", "0")?;
    response.insert_header("Server", SERVER_NAME)?;

    session.write_response_header(Box::new(response), true).await?;

    info!("CORS preflight response sent for: {}", uri);
    Ok(true)
}

/// Добавляет CORS заголовки к ответу на основе Origin запроса.
/// Заголовки, выставленные upstream, не перезаписываются
pub fn add_cors_headers_for_request(session: &Session, response: &mut ResponseHeader) -> Result<()> {
    if response.headers.contains_key("access-control-allow-origin") {
        return Ok(());
    }

    let origin = session
        .req_header()
        .headers
        .get("origin")
        .and_then(|h| h.to_str().ok())
        .unwrap_or("");

    if origin.is_empty() {
        response.insert_header("Access-Control-Allow-Origin", "*")?;
    } else {
        // Dev сервер разрешает любой origin, отражая его обратно
        response.insert_header("Access-Control-Allow-Origin", origin.to_string())?;
        response.insert_header("Access-Control-Allow-Credentials", "true")?;
        response.insert_header("Vary", "Origin")?;
    }
    response.insert_header("Access-Control-Allow-Methods", ALLOW_METHODS)?;

    Ok(())
}

/// Заголовки, которые dev сервер добавляет ко всем своим ответам
pub fn add_dev_headers(session: &Session, response: &mut ResponseHeader, cors: bool) -> Result<()> {
    if cors {
        add_cors_headers_for_request(session, response)?;
    }
    response.insert_header("Server", SERVER_NAME)?;
    Ok(())
}
