//! LogicLoom Daemon - 以 HTTP / WebSocket 提供 Pengine Actor

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use ll_durable::{KvBackend, MemoryKv, SqliteKv, DEFAULT_MAX_ENTRY_SIZE};
use ll_engine::MiniLog;
use ll_pengine::{HttpFetcher, PengineConfig, PengineHost};

#[derive(Parser, Debug)]
#[command(name = "logicloom-daemon")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// 监听地址
    #[arg(long, env = "LL_ADDR", default_value = "127.0.0.1:8765")]
    addr: SocketAddr,

    /// SQLite 连接串, 例如 `sqlite://logicloom.db?mode=rwc`; 缺省时使用内存存储
    #[arg(long, env = "LL_DATABASE")]
    database: Option<String>,

    /// 单个存储条目的上限 (字节)
    #[arg(long, env = "LL_MAX_ENTRY_SIZE", default_value_t = DEFAULT_MAX_ENTRY_SIZE)]
    max_entry_size: usize,

    /// 每帧最多复制的操作数
    #[arg(long, env = "LL_GOSSIP_BATCH", default_value_t = 64)]
    gossip_batch: usize,

    /// 未指定 chunk 时的分页大小
    #[arg(long, env = "LL_DEFAULT_CHUNK")]
    default_chunk: Option<usize>,

    /// 跨 Actor 调用与源码拉取的超时 (秒)
    #[arg(long, env = "LL_CALL_TIMEOUT", default_value_t = 30)]
    call_timeout: u64,

    /// 保存时跳过的模块, 逗号分隔
    #[arg(long, value_delimiter = ',')]
    exclude: Vec<String>,

    #[arg(short, long)]
    verbose: bool,
}

impl Args {
    fn config(&self) -> PengineConfig {
        PengineConfig {
            max_entry_size: self.max_entry_size,
            gossip_batch: self.gossip_batch.max(1),
            default_chunk: self.default_chunk,
            call_timeout: Duration::from_secs(self.call_timeout),
            save_exclusions: self.exclude.clone(),
            ..Default::default()
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // 初始化日志
    let default_filter = if args.verbose {
        "logicloom_daemon=debug,ll_pengine=debug,ll_wire=debug,tower_http=debug"
    } else {
        "logicloom_daemon=info,ll_pengine=info,ll_wire=info"
    };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("LogicLoom Daemon starting...");

    let config = args.config();

    // 初始化存储
    let backend: Arc<dyn KvBackend> = match &args.database {
        Some(url) => {
            let kv = SqliteKv::connect(url, config.max_entry_size).await?;
            tracing::info!(%url, "SQLite store initialized");
            Arc::new(kv)
        }
        None => {
            tracing::warn!("No database configured, programs are kept in memory only");
            Arc::new(MemoryKv::new(config.max_entry_size))
        }
    };

    let fetcher = Arc::new(HttpFetcher::new(config.call_timeout)?);
    let host = PengineHost::new(config, backend, fetcher, MiniLog::new);
    tracing::info!(
        max_entry_size = host.config().max_entry_size,
        gossip_batch = host.config().gossip_batch,
        "Pengine host initialized"
    );

    tracing::info!("Press Ctrl+C to shutdown...");
    tokio::select! {
        result = ll_wire::serve(args.addr, host) => result?,
        signal = tokio::signal::ctrl_c() => {
            signal?;
            tracing::info!("Shutting down...");
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_args_to_config() {
        let args = Args::parse_from([
            "logicloom-daemon",
            "--addr",
            "0.0.0.0:9000",
            "--gossip-batch",
            "0",
            "--default-chunk",
            "20",
            "--exclude",
            "scratch,tmp",
        ]);
        assert_eq!(args.addr.port(), 9000);
        let config = args.config();
        assert_eq!(config.gossip_batch, 1);
        assert_eq!(config.default_chunk, Some(20));
        assert_eq!(config.save_exclusions, vec!["scratch", "tmp"]);
        assert_eq!(config.call_timeout, Duration::from_secs(30));
    }
}
