//! # IVF数据库模块
//!
//! 负责周期、胚胎与临床事件的持久化，提供PostgreSQL连接池、事务化存储实现，
//! 以及用于单进程部署和测试的内存存储。

pub mod connection;
pub mod memory;
pub mod models;
pub mod queries;

// 重新导出主要类型
pub use connection::{DatabasePool, PoolSettings};
pub use memory::MemoryStore;
pub use queries::{PgPatientDirectory, PgStore};
