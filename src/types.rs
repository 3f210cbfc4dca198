use crate::routing::Route;

/// Контекст запроса
#[derive(Debug)]
pub struct RequestContext {
    pub route: Route,
    /// Ответ отдан самим dev сервером (статика, preflight)
    pub served_locally: bool,
    /// Время начала запроса для измерения длительности
    pub start_time: std::time::Instant,
}

impl RequestContext {
    pub fn new() -> Self {
        Self {
            route: Route::Static,
            served_locally: false,
            start_time: std::time::Instant::now(),
        }
    }
}

impl Default for RequestContext {
    fn default() -> Self {
        Self::new()
    }
}
