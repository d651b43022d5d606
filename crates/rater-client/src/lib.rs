pub mod config;
pub mod credentials;
pub mod http;

pub mod mock;

pub use config::{ClientConfig, ConfigError};
pub use credentials::{clear_session, default_credentials_path, load_session, save_session};
pub use http::HttpBackend;
pub use mock::MockBackend;
