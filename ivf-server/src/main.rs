//! IVF周期管理服务主程序

use anyhow::Context;
use clap::Parser;
use ivf_admin::{logging, ConfigManager, WorkflowMetrics};
use ivf_core::{CycleStore, PatientDirectory};
use ivf_database::{DatabasePool, MemoryStore, PgPatientDirectory, PgStore, PoolSettings};
use ivf_web::{AppState, ServerOptions, WebServer};
use ivf_workflow::{AuditRelay, CycleWorkflow, TracingAuditSink};
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{error, info, warn};

/// IVF服务器命令行参数
#[derive(Parser, Debug)]
#[command(name = "ivf-server")]
#[command(about = "IVF 治疗周期管理服务")]
struct Args {
    /// 配置文件路径
    #[arg(short, long)]
    config: Option<String>,

    /// 监听主机，覆盖配置文件
    #[arg(long)]
    host: Option<String>,

    /// 监听端口，覆盖配置文件
    #[arg(short, long)]
    port: Option<u16>,

    /// 日志级别，覆盖配置文件
    #[arg(short, long)]
    log_level: Option<String>,

    /// 使用内存存储，不连接数据库
    #[arg(long)]
    in_memory: bool,

    /// 输出合并后的配置并退出
    #[arg(long)]
    print_config: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // 正式日志配置来自配置文件，加载期间的日志先交给临时订阅器
    let manager = tracing::subscriber::with_default(logging::bootstrap(), || -> anyhow::Result<ConfigManager> {
        let mut manager = ConfigManager::load(args.config.as_deref())?;
        manager.apply_overrides(args.host, args.port, args.log_level)?;
        Ok(manager)
    })?;

    if args.print_config {
        print!("{}", manager.to_toml()?);
        return Ok(());
    }

    let config = manager.config().clone();
    logging::init(&config.logging)?;

    info!("启动IVF周期管理服务...");
    if let Some(path) = manager.config_path() {
        info!("  配置文件: {}", path);
    }
    info!("  监听地址: {}:{}", config.server.host, config.server.port);
    info!("  胚胎状态策略: {:?}", config.workflow.embryo_status_policy);

    let (store, patients): (Arc<dyn CycleStore>, Arc<dyn PatientDirectory>) = if args.in_memory {
        warn!("使用内存存储，进程退出后数据丢失");
        let store = MemoryStore::new();
        let patients: Arc<dyn PatientDirectory> = Arc::new(store.clone());
        let store: Arc<dyn CycleStore> = Arc::new(store);
        (store, patients)
    } else {
        let settings = PoolSettings {
            url: config.database.url.clone(),
            max_connections: config.database.max_connections,
            min_connections: config.database.min_connections,
            connect_timeout: config.database.connect_timeout(),
        };
        let pool = DatabasePool::connect(&settings)
            .await
            .context("Failed to connect to database")?;

        let store = PgStore::new(pool.clone());
        if config.database.create_tables {
            store.create_tables().await.context("Failed to create tables")?;
        }
        let patients: Arc<dyn PatientDirectory> = Arc::new(PgPatientDirectory::new(pool));
        let store: Arc<dyn CycleStore> = Arc::new(store);
        (store, patients)
    };

    let metrics = WorkflowMetrics::new()?;
    let workflow = CycleWorkflow::new(store.clone(), patients, config.workflow.to_settings())
        .with_listener(Arc::new(metrics.clone()));

    let relay = if config.audit.enabled {
        let relay = AuditRelay::new(store, Arc::new(TracingAuditSink), config.audit.batch_size);
        Some(tokio::spawn(relay.run(config.audit.relay_interval())))
    } else {
        info!("审计投递已禁用");
        None
    };

    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port)
        .parse()
        .context("Invalid listen address")?;
    let options = ServerOptions {
        request_timeout: config.server.request_timeout(),
        enable_cors: config.server.enable_cors,
    };
    let server = WebServer::new(addr, AppState::new(Arc::new(workflow), metrics), options);

    let result = server.run(shutdown_signal()).await;

    if let Some(handle) = relay {
        handle.abort();
    }

    if let Err(e) = &result {
        error!("服务器运行失败: {:#}", e);
    }
    info!("IVF周期管理服务已停止");
    result
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    info!("收到停止信号，正在关闭...");
}
