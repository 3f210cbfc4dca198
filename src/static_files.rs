use bytes::Bytes;
use log::{debug, warn};
use percent_encoding::percent_decode_str;
use pingora::http::ResponseHeader;
use pingora_core::Result;
use pingora_proxy::Session;
use std::path::{Path, PathBuf};

use crate::cors::add_dev_headers;

/// Что отдать на запрос к статике
#[derive(Debug, PartialEq)]
pub enum StaticResponse {
    File { path: PathBuf, content_type: String },
    Forbidden,
    NotFound,
    MethodNotAllowed,
}

impl StaticResponse {
    pub fn status(&self) -> u16 {
        match self {
            StaticResponse::File { .. } => 200,
            StaticResponse::Forbidden => 403,
            StaticResponse::NotFound => 404,
            StaticResponse::MethodNotAllowed => 405,
        }
    }
}

/// Раздача файлов из корня dev сервера
#[derive(Debug, Clone)]
pub struct StaticFiles {
    root: PathBuf,
    spa_fallback: bool,
}

impl StaticFiles {
    pub fn new(root: PathBuf, spa_fallback: bool) -> Self {
        Self { root, spa_fallback }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Сопоставляет путь запроса с файлом под корнем.
    /// Сегменты декодируются из %XX до проверки на выход за корень
    pub fn resolve(&self, method: &str, path: &str, accepts_html: bool) -> StaticResponse {
        if method != "GET" && method != "HEAD" {
            return StaticResponse::MethodNotAllowed;
        }

        let mut candidate = self.root.clone();
        for raw in path.split('/') {
            let Ok(segment) = percent_decode_str(raw).decode_utf8() else {
                return StaticResponse::NotFound;
            };
            if segment.is_empty() || segment == "." {
                continue;
            }
            if segment == ".." || segment.contains(['/', '\\', '\0']) {
                return StaticResponse::Forbidden;
            }
            candidate.push(&*segment);
        }

        if candidate.is_dir() {
            candidate.push("index.html");
        }

        if candidate.is_file() {
            return Self::file(candidate);
        }

        if self.spa_fallback && accepts_html {
            let index = self.root.join("index.html");
            if index.is_file() {
                debug!("SPA fallback for {} -> {}", path, index.display());
                return Self::file(index);
            }
        }

        StaticResponse::NotFound
    }

    fn file(path: PathBuf) -> StaticResponse {
        let content_type = mime_guess::from_path(&path)
            .first_or_octet_stream()
            .essence_str()
            .to_string();
        StaticResponse::File { path, content_type }
    }

    /// Отвечает на запрос файлом или ошибкой, возвращает отданный статус
    pub async fn serve(&self, session: &mut Session, cors: bool) -> Result<u16> {
        let req = session.req_header();
        let method = req.method.as_str().to_string();
        let path = req.uri.path().to_string();
        let accepts_html = req
            .headers
            .get("accept")
            .and_then(|h| h.to_str().ok())
            .is_some_and(|accept| accept.contains("text/html"));

        let (status, content_type, body) = match self.resolve(&method, &path, accepts_html) {
            StaticResponse::File { path: file, content_type } => match tokio::fs::read(&file).await {
                Ok(content) => (200, content_type, Bytes::from(content)),
                Err(e) => {
                    warn!("Failed to read static file {}: {}", file.display(), e);
                    (404, "text/plain".to_string(), Bytes::from_static(b"Not Found"))
                }
            },
            other => {
                let message: &'static [u8] = match other {
                    StaticResponse::Forbidden => b"Forbidden",
                    StaticResponse::MethodNotAllowed => b"Method Not Allowed",
                    _ => b"Not Found",
                };
                (other.status(), "text/plain".to_string(), Bytes::from_static(message))
            }
        };

        let mut response = ResponseHeader::build(status, None)?;
        let content_type = if content_type.starts_with("text/") {
            format!("{}; charset=utf-8", content_type)
        } else {
            content_type
        };
        response.insert_header("Content-Type", content_type)?;
        response.insert_header("Content-Length", body.len().to_string())?;
        response.insert_header("Cache-Control", "no-cache")?;
        if status == 405 {
            response.insert_header("Allow", "GET, HEAD")?;
        }
        add_dev_headers(session, &mut response, cors)?;

        let head_only = method == "HEAD";
        session.write_response_header(Box::new(response), head_only).await?;
        if !head_only {
            session.write_response_body(Some(body), true).await?;
        }

        Ok(status)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    fn site() -> tempfile::TempDir {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("index.html"), "<div id=\"app\"></div>").unwrap();
        fs::create_dir(dir.path().join("assets")).unwrap();
        fs::write(dir.path().join("assets/main.js"), "console.log(1)").unwrap();
        dir
    }

    #[test]
    fn test_resolve_existing_file() {
        let dir = site();
        let files = StaticFiles::new(dir.path().to_path_buf(), false);

        match files.resolve("GET", "/assets/main.js", false) {
            StaticResponse::File { path, content_type } => {
                assert_eq!(path, dir.path().join("assets/main.js"));
                assert!(content_type.contains("javascript"));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_root_maps_to_index() {
        let dir = site();
        let files = StaticFiles::new(dir.path().to_path_buf(), false);

        assert_eq!(
            files.resolve("HEAD", "/", false),
            StaticResponse::File {
                path: dir.path().join("index.html"),
                content_type: "text/html".to_string(),
            }
        );
    }

    #[test]
    fn test_parent_segments_forbidden() {
        let dir = site();
        let files = StaticFiles::new(dir.path().to_path_buf(), true);

        assert_eq!(files.resolve("GET", "/../etc/passwd", true), StaticResponse::Forbidden);
        assert_eq!(files.resolve("GET", "/assets/../../x", false), StaticResponse::Forbidden);
    }

    #[test]
    fn test_percent_encoded_names_decoded() {
        let dir = site();
        fs::write(dir.path().join("my file.png"), [0x89, b'P', b'N', b'G']).unwrap();
        let files = StaticFiles::new(dir.path().to_path_buf(), false);

        match files.resolve("GET", "/my%20file.png", false) {
            StaticResponse::File { path, content_type } => {
                assert_eq!(path, dir.path().join("my file.png"));
                assert_eq!(content_type, "image/png");
            }
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(files.resolve("GET", "/%ff.png", false), StaticResponse::NotFound);
    }

    #[test]
    fn test_encoded_traversal_forbidden() {
        let dir = site();
        let files = StaticFiles::new(dir.path().to_path_buf(), true);

        assert_eq!(files.resolve("GET", "/%2e%2e/etc/passwd", true), StaticResponse::Forbidden);
        assert_eq!(files.resolve("GET", "/assets%2f..%2fx", false), StaticResponse::Forbidden);
        assert_eq!(files.resolve("GET", "/assets%5c..%5cx", false), StaticResponse::Forbidden);
        assert_eq!(files.resolve("GET", "/index.html%00.js", false), StaticResponse::Forbidden);
    }

    #[test]
    fn test_spa_fallback_only_for_html() {
        let dir = site();
        let files = StaticFiles::new(dir.path().to_path_buf(), true);

        assert_eq!(
            files.resolve("GET", "/posts/3", true),
            StaticResponse::File {
                path: dir.path().join("index.html"),
                content_type: "text/html".to_string(),
            }
        );
        assert_eq!(files.resolve("GET", "/missing.js", false), StaticResponse::NotFound);

        let strict = StaticFiles::new(dir.path().to_path_buf(), false);
        assert_eq!(strict.resolve("GET", "/posts/3", true), StaticResponse::NotFound);
    }

    #[test]
    fn test_write_methods_not_allowed() {
        let dir = site();
        let files = StaticFiles::new(dir.path().to_path_buf(), true);

        let response = files.resolve("POST", "/index.html", false);
        assert_eq!(response, StaticResponse::MethodNotAllowed);
        assert_eq!(response.status(), 405);
    }
}
