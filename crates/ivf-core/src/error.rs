//! 错误定义模块

use thiserror::Error;

/// IVF系统统一错误类型
#[derive(Error, Debug)]
pub enum IvfError {
    #[error("配置错误: {0}")]
    Config(String),

    #[error("数据库错误: {0}")]
    Database(String),

    #[error("序列化错误: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("验证错误: {0}")]
    Validation(String),

    #[error("资源未找到: {0}")]
    NotFound(String),

    #[error("数据冲突: {0}")]
    Conflict(String),

    #[error("系统内部错误: {0}")]
    Internal(String),

    #[error("无效状态转换: 从 {from} 到 {event}")]
    InvalidStateTransition { from: String, event: String },
}

impl IvfError {
    /// 构造验证错误
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    /// 构造未找到错误
    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }
}

#[cfg(feature = "database")]
impl From<sqlx::Error> for IvfError {
    fn from(err: sqlx::Error) -> Self {
        match &err {
            sqlx::Error::Database(db_err) if db_err.code().as_deref() == Some("23505") => {
                IvfError::Conflict(db_err.message().to_string())
            }
            sqlx::Error::RowNotFound => IvfError::NotFound("row not found".to_string()),
            _ => IvfError::Database(err.to_string()),
        }
    }
}

/// IVF系统统一结果类型
pub type Result<T> = std::result::Result<T, IvfError>;
