//! 键值后端

use std::collections::BTreeMap;
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Row, SqlitePool};
use tokio::sync::RwLock;
use tracing::info;

use ll_core::{LogicLoomError, Result};

/// 单条记录默认上限 (字节)
pub const DEFAULT_MAX_ENTRY_SIZE: usize = 128 * 1024;

/// 持久 KV 后端能力
#[async_trait]
pub trait KvBackend: Send + Sync + 'static {
    async fn get(&self, key: &str) -> Result<Option<String>>;

    async fn put(&self, key: &str, value: &str) -> Result<()>;

    async fn delete(&self, key: &str) -> Result<()>;

    /// 按键排序列出前缀下的所有条目
    async fn list(&self, prefix: &str) -> Result<Vec<(String, String)>>;

    /// 单条记录 (键 + 值) 的最大字节数
    fn max_entry_size(&self) -> usize;
}

fn check_entry_size(key: &str, value: &str, max: usize) -> Result<()> {
    if key.len() + value.len() + 1 > max {
        return Err(LogicLoomError::Store(format!(
            "entry `{key}` is {} bytes, limit is {max}",
            key.len() + value.len() + 1
        )));
    }
    Ok(())
}

/// 内存后端, 克隆共享同一份数据
#[derive(Clone)]
pub struct MemoryKv {
    entries: Arc<RwLock<BTreeMap<String, String>>>,
    writes: Arc<AtomicU64>,
    max_entry_size: usize,
}

impl MemoryKv {
    pub fn new(max_entry_size: usize) -> Self {
        Self {
            entries: Arc::default(),
            writes: Arc::default(),
            max_entry_size,
        }
    }

    /// 写操作 (put + delete) 计数
    pub fn writes(&self) -> u64 {
        self.writes.load(Ordering::SeqCst)
    }

    pub async fn keys(&self) -> Vec<String> {
        self.entries.read().await.keys().cloned().collect()
    }
}

impl Default for MemoryKv {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_ENTRY_SIZE)
    }
}

#[async_trait]
impl KvBackend for MemoryKv {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.entries.read().await.get(key).cloned())
    }

    async fn put(&self, key: &str, value: &str) -> Result<()> {
        check_entry_size(key, value, self.max_entry_size)?;
        self.writes.fetch_add(1, Ordering::SeqCst);
        self.entries
            .write()
            .await
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.writes.fetch_add(1, Ordering::SeqCst);
        self.entries.write().await.remove(key);
        Ok(())
    }

    async fn list(&self, prefix: &str) -> Result<Vec<(String, String)>> {
        let entries = self.entries.read().await;
        Ok(entries
            .range(prefix.to_string()..)
            .take_while(|(k, _)| k.starts_with(prefix))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect())
    }

    fn max_entry_size(&self) -> usize {
        self.max_entry_size
    }
}

/// SQLite 后端 (单表 `kv`)
#[derive(Clone)]
pub struct SqliteKv {
    pool: SqlitePool,
    max_entry_size: usize,
}

fn db_err(e: sqlx::Error) -> LogicLoomError {
    LogicLoomError::Database(e.to_string())
}

impl SqliteKv {
    /// 打开 (必要时创建) 数据库, 例如 `sqlite://logicloom.db` 或 `sqlite::memory:`
    pub async fn connect(url: &str, max_entry_size: usize) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(url)
            .map_err(db_err)?
            .create_if_missing(true);
        let mut pool = SqlitePoolOptions::new();
        if url.contains(":memory:") {
            // 内存库只存在于单个连接中
            pool = pool.max_connections(1).idle_timeout(None).max_lifetime(None);
        }
        let pool = pool.connect_with(options).await.map_err(db_err)?;
        sqlx::query("CREATE TABLE IF NOT EXISTS kv (key TEXT PRIMARY KEY, value TEXT NOT NULL)")
            .execute(&pool)
            .await
            .map_err(db_err)?;
        info!("Opened SQLite store at {}", url);
        Ok(Self {
            pool,
            max_entry_size,
        })
    }
}

#[async_trait]
impl KvBackend for SqliteKv {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let row = sqlx::query("SELECT value FROM kv WHERE key = ?1")
            .bind(key)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?;
        row.map(|r| r.try_get::<String, _>("value"))
            .transpose()
            .map_err(db_err)
    }

    async fn put(&self, key: &str, value: &str) -> Result<()> {
        check_entry_size(key, value, self.max_entry_size)?;
        sqlx::query(
            "INSERT INTO kv (key, value) VALUES (?1, ?2) \
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
        )
        .bind(key)
        .bind(value)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        sqlx::query("DELETE FROM kv WHERE key = ?1")
            .bind(key)
            .execute(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(())
    }

    async fn list(&self, prefix: &str) -> Result<Vec<(String, String)>> {
        let rows = sqlx::query(
            "SELECT key, value FROM kv WHERE substr(key, 1, length(?1)) = ?1 ORDER BY key",
        )
        .bind(prefix)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;
        rows.into_iter()
            .map(|r| Ok((r.try_get("key").map_err(db_err)?, r.try_get("value").map_err(db_err)?)))
            .collect()
    }

    fn max_entry_size(&self) -> usize {
        self.max_entry_size
    }
}
