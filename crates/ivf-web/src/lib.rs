//! # IVF Web模块
//!
//! 以 `/api/v1` 提供周期管理HTTP接口。租户上下文来自上游网关写入的请求头。

pub mod error;
pub mod handlers;
pub mod server;
pub mod tenant;

pub use error::ApiError;
pub use handlers::AppState;
pub use server::{create_app, ServerOptions, WebServer};
pub use tenant::Tenant;
