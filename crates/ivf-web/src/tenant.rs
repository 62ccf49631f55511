//! 租户上下文提取
//!
//! 诊所与操作人由上游网关认证后写入请求头，这里只做解析。

use crate::error::ApiError;
use axum::{async_trait, extract::FromRequestParts, http::request::Parts};
use ivf_core::{IvfError, TenantContext};
use uuid::Uuid;

pub const CLINIC_HEADER: &str = "x-clinic-id";
pub const USER_HEADER: &str = "x-user-id";

/// 从请求头解析出的租户上下文
#[derive(Debug, Clone, Copy)]
pub struct Tenant(pub TenantContext);

fn header_uuid(parts: &Parts, name: &str) -> Result<Uuid, IvfError> {
    let value = parts
        .headers
        .get(name)
        .ok_or_else(|| IvfError::validation(format!("missing {} header", name)))?;

    value
        .to_str()
        .ok()
        .and_then(|v| Uuid::parse_str(v.trim()).ok())
        .ok_or_else(|| IvfError::validation(format!("invalid {} header", name)))
}

#[async_trait]
impl<S> FromRequestParts<S> for Tenant
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let clinic_id = header_uuid(parts, CLINIC_HEADER)?;
        let user_id = header_uuid(parts, USER_HEADER)?;
        Ok(Tenant(TenantContext::new(clinic_id, user_id)))
    }
}
