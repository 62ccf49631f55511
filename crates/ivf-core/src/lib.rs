//! # IVF Core
//!
//! IVF周期管理系统的核心模块，提供基础数据结构、错误定义、存储接口和通用工具。

pub mod error;
pub mod models;
pub mod requests;
pub mod store;
pub mod utils;

pub use error::{IvfError, Result};
pub use models::*;
pub use requests::*;
pub use store::{CycleStore, CycleTransaction, PatientDirectory};
