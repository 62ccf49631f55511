//! # IVF管理模块
//!
//! 提供服务运行所需的管理功能：
//! - 配置管理：默认值、TOML文件与环境变量叠加，启动时验证
//! - 日志初始化
//! - 工作流指标：操作结果与阶段变更计数

pub mod config;
pub mod logging;
pub mod monitoring;

pub use config::{ConfigManager, ConfigValidator, IvfConfig, LogFormat};
pub use monitoring::WorkflowMetrics;
