pub mod alias;
pub mod config;
pub mod cors;
pub mod error;
pub mod logging;
pub mod metrics;
pub mod proxy;
pub mod routing;
pub mod static_files;
pub mod types;

pub use config::Config;
pub use error::{ConfigError, ConfigResult};
pub use proxy::DevProxy;
pub use routing::{ForwardTarget, PathRewrite, ProxyRule, ProxyRules, Route};
pub use types::RequestContext;
