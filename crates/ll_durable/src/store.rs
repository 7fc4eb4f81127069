//! 分片记录存储
//!
//! 键布局 (均以 Actor 名为命名空间):
//!
//! - 标量槽: `<ns>/<key>:v<版本>`
//! - 记录项: `<ns>/<prefix>:v<版本>/<item>`
//! - 分片:   `<项键>#00000`, `<项键>#00001`, ..., 最后一片为终止哨兵
//!   `"\0end:<分片数>:<sha256>"`

use std::collections::BTreeMap;
use std::sync::Arc;

use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use ll_core::{LogicLoomError, Result};

use crate::kv::KvBackend;
use crate::schema::{Envelope, Schema, SCHEMA_VERSION};

const SENTINEL: &str = "\u{0}end:";

/// 某个 Actor 的持久化视图
#[derive(Clone)]
pub struct Store {
    backend: Arc<dyn KvBackend>,
    namespace: String,
}

impl Store {
    pub fn new(backend: Arc<dyn KvBackend>, namespace: impl Into<String>) -> Self {
        Self {
            backend,
            namespace: namespace.into(),
        }
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    fn slot_key(&self, key: &str) -> String {
        format!("{}/{}:v{}", self.namespace, key, SCHEMA_VERSION)
    }

    fn record_prefix(&self, prefix: &str) -> String {
        format!("{}/{}:v{}/", self.namespace, prefix, SCHEMA_VERSION)
    }

    /// 读取标量槽
    pub async fn get<T: Schema>(&self, key: &str) -> Result<Option<T>> {
        let slot = self.slot_key(key);
        if let Some(text) = self.backend.get(&slot).await? {
            return Ok(Envelope::decode(&slot, &text));
        }
        let shards = self.backend.list(&format!("{slot}#")).await?;
        if shards.is_empty() {
            return Ok(None);
        }
        Ok(reassemble("", shards)
            .remove(&slot)
            .and_then(|text| Envelope::decode(&slot, &text)))
    }

    pub async fn put<T: Schema>(&self, key: &str, value: &T) -> Result<()> {
        let slot = self.slot_key(key);
        self.write_entry(&slot, value).await
    }

    pub async fn delete(&self, key: &str) -> Result<()> {
        let slot = self.slot_key(key);
        self.backend.delete(&slot).await?;
        for (shard, _) in self.backend.list(&format!("{slot}#")).await? {
            self.backend.delete(&shard).await?;
        }
        Ok(())
    }

    /// 读取整个记录, 重组分片
    pub async fn record<T: Schema>(&self, prefix: &str) -> Result<BTreeMap<String, T>> {
        let base = self.record_prefix(prefix);
        let entries = self.backend.list(&base).await?;
        Ok(reassemble(&base, entries)
            .into_iter()
            .filter_map(|(item, text)| {
                Envelope::decode(&format!("{base}{item}"), &text).map(|v| (item, v))
            })
            .collect())
    }

    pub async fn put_record<T: Schema>(&self, prefix: &str, items: &BTreeMap<String, T>) -> Result<()> {
        for (item, value) in items {
            self.put_record_item(prefix, item, value).await?;
        }
        Ok(())
    }

    pub async fn put_record_item<T: Schema>(&self, prefix: &str, item: &str, value: &T) -> Result<()> {
        let key = format!("{}{}", self.record_prefix(prefix), item);
        self.write_entry(&key, value).await
    }

    /// 删除前缀下的全部条目
    pub async fn delete_record(&self, prefix: &str) -> Result<()> {
        let base = self.record_prefix(prefix);
        for (key, _) in self.backend.list(&base).await? {
            self.backend.delete(&key).await?;
        }
        Ok(())
    }

    /// 写入单个值: 超过容量时顺序写入分片, 最后写哨兵, 再清理旧代的残留
    async fn write_entry<T: Schema>(&self, key: &str, value: &T) -> Result<()> {
        let text = serde_json::to_string(&Envelope::new(value.to_stored()))?;
        let shard_key_len = key.len() + 6;
        let capacity = self.backend.max_entry_size().saturating_sub(shard_key_len + 1) / 2;

        if text.len() <= capacity {
            self.backend.put(key, &text).await?;
            for (stale, _) in self.backend.list(&format!("{key}#")).await? {
                self.backend.delete(&stale).await?;
            }
            return Ok(());
        }

        // 分片至少要放下一个字符, 哨兵分片也受同一上限约束
        let max = self.backend.max_entry_size();
        if capacity < 4 {
            return Err(LogicLoomError::Store(format!(
                "max entry size {max} is too small to shard `{key}`"
            )));
        }
        let pieces = split_on_char_boundaries(&text, capacity);
        let digest = hex::encode(Sha256::digest(text.as_bytes()));
        let sentinel = format!("{SENTINEL}{}:{}", pieces.len(), digest);
        if shard_key_len + sentinel.len() + 1 > max {
            return Err(LogicLoomError::Store(format!(
                "max entry size {max} leaves no room for the shard sentinel of `{key}` ({} bytes)",
                shard_key_len + sentinel.len() + 1
            )));
        }

        for (idx, piece) in pieces.iter().enumerate() {
            self.backend.put(&shard_key(key, idx), piece).await?;
        }
        self.backend.put(&shard_key(key, pieces.len()), &sentinel).await?;
        debug!(key, shards = pieces.len(), bytes = text.len(), "Wrote sharded entry");

        self.backend.delete(key).await?;
        for (stale, _) in self.backend.list(&format!("{key}#")).await? {
            if shard_index(&stale).is_some_and(|(_, idx)| idx > pieces.len()) {
                self.backend.delete(&stale).await?;
            }
        }
        Ok(())
    }
}

fn shard_key(key: &str, idx: usize) -> String {
    format!("{key}#{idx:05}")
}

/// 拆分 `root#00042` 形式的分片键
fn shard_index(key: &str) -> Option<(&str, usize)> {
    let (root, suffix) = key.rsplit_once('#')?;
    if suffix.len() != 5 || !suffix.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    suffix.parse().ok().map(|idx| (root, idx))
}

fn split_on_char_boundaries(text: &str, capacity: usize) -> Vec<&str> {
    let mut pieces = Vec::new();
    let mut rest = text;
    while !rest.is_empty() {
        let mut end = capacity.min(rest.len());
        while !rest.is_char_boundary(end) {
            end -= 1;
        }
        if end == 0 {
            // 容量小于单个字符时至少取一个字符
            end = rest.chars().next().map_or(rest.len(), char::len_utf8);
        }
        let (head, tail) = rest.split_at(end);
        pieces.push(head);
        rest = tail;
    }
    pieces
}

struct OpenShards {
    root: String,
    next: usize,
    buffer: String,
}

/// 按键序重组条目, 返回 项名 -> 完整文本
fn reassemble(base: &str, entries: Vec<(String, String)>) -> BTreeMap<String, String> {
    let mut out = BTreeMap::new();
    let mut open: Option<OpenShards> = None;

    for (key, value) in entries {
        let Some(relative) = key.strip_prefix(base) else {
            continue;
        };
        let Some((root, idx)) = shard_index(relative) else {
            out.insert(relative.to_string(), value);
            continue;
        };

        if let Some(trailer) = value.strip_prefix(SENTINEL) {
            match open.take() {
                Some(shards) if shards.root == root && shards.next == idx => {
                    if sentinel_matches(trailer, idx, &shards.buffer) {
                        out.insert(shards.root, shards.buffer);
                    } else {
                        warn!(key = %key, "Shard set does not match its sentinel, skipping");
                    }
                }
                Some(shards) => {
                    warn!(key = %key, open = %shards.root, "Sentinel out of sequence, skipping");
                }
                None => warn!(key = %key, "Sentinel without shards, skipping"),
            }
        } else if idx == 0 {
            if let Some(stale) = open.replace(OpenShards {
                root: root.to_string(),
                next: 1,
                buffer: value,
            }) {
                warn!(root = %stale.root, "Unterminated shard set, skipping");
            }
        } else {
            match open.as_mut() {
                Some(shards) if shards.root == root && shards.next == idx => {
                    shards.buffer.push_str(&value);
                    shards.next += 1;
                }
                _ => warn!(key = %key, "Stray shard, skipping"),
            }
        }
    }
    if let Some(stale) = open {
        warn!(root = %stale.root, "Unterminated shard set, skipping");
    }
    out
}

fn sentinel_matches(trailer: &str, count: usize, payload: &str) -> bool {
    let Some((n, digest)) = trailer.split_once(':') else {
        return false;
    };
    n.parse::<usize>().ok() == Some(count)
        && digest == hex::encode(Sha256::digest(payload.as_bytes()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kv::MemoryKv;
    use crate::schema::{LinkRecord, ModuleSource, PengineMetadata};

    fn source(module: &str, text: &str) -> ModuleSource {
        ModuleSource {
            module: module.into(),
            txid: 1,
            text: text.into(),
        }
    }

    fn store(max: usize) -> (MemoryKv, Store) {
        let kv = MemoryKv::new(max);
        (kv.clone(), Store::new(Arc::new(kv), "actor"))
    }

    #[tokio::test]
    async fn test_scalar_slots_are_versioned() {
        let (kv, store) = store(1024);
        let meta = PengineMetadata {
            title: Some("demo".into()),
            ..Default::default()
        };
        store.put("meta", &meta).await.unwrap();
        assert_eq!(kv.keys().await, vec!["actor/meta:v1".to_string()]);
        assert_eq!(store.get::<PengineMetadata>("meta").await.unwrap(), Some(meta));
        assert!(store.get::<LinkRecord>("meta").await.unwrap().is_none());

        store.delete("meta").await.unwrap();
        assert!(store.get::<PengineMetadata>("meta").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_large_values_are_sharded_and_reassembled() {
        let (kv, store) = store(256);
        let text = "fact(ü, 'ünïcødé').\n".repeat(40);
        let mut items = BTreeMap::new();
        items.insert("user".to_string(), source("user", &text));
        items.insert("small".to_string(), source("small", "a."));
        store.put_record("program/1", &items).await.unwrap();

        let keys = kv.keys().await;
        assert!(keys.contains(&"actor/program/1:v1/small".to_string()));
        assert!(keys.contains(&"actor/program/1:v1/user#00000".to_string()));
        assert!(!keys.contains(&"actor/program/1:v1/user".to_string()));

        let loaded = store.record::<ModuleSource>("program/1").await.unwrap();
        assert_eq!(loaded, items);
    }

    #[tokio::test]
    async fn test_limit_too_small_for_sentinel_is_rejected() {
        let (kv, store) = store(120);
        let item = "m".repeat(50);
        let err = store
            .put_record_item("program/1", &item, &source("m", &"p(1).\n".repeat(20)))
            .await
            .unwrap_err();
        assert!(matches!(err, LogicLoomError::Store(ref m) if m.contains("sentinel")));
        // 校验先于写入
        assert!(kv.keys().await.is_empty());
        assert_eq!(kv.writes(), 0);
    }

    #[tokio::test]
    async fn test_limit_too_small_for_any_shard_is_rejected() {
        let (kv, store) = store(26);
        let err = store.put("meta", &PengineMetadata::default()).await.unwrap_err();
        assert!(matches!(err, LogicLoomError::Store(ref m) if m.contains("too small")));
        assert!(kv.keys().await.is_empty());
    }

    #[tokio::test]
    async fn test_large_scalar_round_trip() {
        let (_, store) = store(200);
        let meta = PengineMetadata {
            src_text: Some("x(1).\n".repeat(100)),
            ..Default::default()
        };
        store.put("meta", &meta).await.unwrap();
        assert_eq!(store.get::<PengineMetadata>("meta").await.unwrap(), Some(meta));
    }

    #[tokio::test]
    async fn test_rewrites_remove_stale_generations() {
        let (kv, store) = store(256);
        store
            .put_record_item("program/1", "user", &source("user", &"big(1).\n".repeat(60)))
            .await
            .unwrap();
        store
            .put_record_item("program/1", "user", &source("user", "small."))
            .await
            .unwrap();
        assert_eq!(kv.keys().await, vec!["actor/program/1:v1/user".to_string()]);

        store
            .put_record_item("program/1", "user", &source("user", &"big(2).\n".repeat(60)))
            .await
            .unwrap();
        let keys = kv.keys().await;
        assert!(keys.iter().all(|k| k.contains('#')));
        assert_eq!(
            store.record::<ModuleSource>("program/1").await.unwrap()["user"].text,
            "big(2).\n".repeat(60)
        );
    }

    #[tokio::test]
    async fn test_mixed_generations_fail_the_digest() {
        let (kv, store) = store(256);
        store
            .put_record_item("program/1", "user", &source("user", &"old(1).\n".repeat(60)))
            .await
            .unwrap();
        let old_second = kv
            .get("actor/program/1:v1/user#00001")
            .await
            .unwrap()
            .unwrap();
        store
            .put_record_item("program/1", "user", &source("user", &"new(1).\n".repeat(60)))
            .await
            .unwrap();
        // 模拟写入中途崩溃: 一片来自旧代
        kv.put("actor/program/1:v1/user#00001", &old_second)
            .await
            .unwrap();
        assert!(store
            .record::<ModuleSource>("program/1")
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn test_stray_and_unterminated_shards_are_skipped() {
        let (kv, store) = store(256);
        store
            .put_record_item("links", "b", &LinkRecord { module: "b".into(), owner: "b".into() })
            .await
            .unwrap();
        kv.put("actor/links:v1/a#00003", "garbage").await.unwrap();
        kv.put("actor/links:v1/c#00000", "{\"v\":1").await.unwrap();

        let links = store.record::<LinkRecord>("links").await.unwrap();
        assert_eq!(links.keys().collect::<Vec<_>>(), vec!["b"]);
    }

    #[tokio::test]
    async fn test_delete_record_clears_prefix() {
        let (kv, store) = store(256);
        store
            .put_record_item("program/1", "user", &source("user", &"x.\n".repeat(100)))
            .await
            .unwrap();
        store
            .put_record_item("program/2", "user", &source("user", "y."))
            .await
            .unwrap();
        store.delete_record("program/1").await.unwrap();
        assert_eq!(kv.keys().await, vec!["actor/program/2:v1/user".to_string()]);
    }

    #[test]
    fn test_shard_key_parsing() {
        assert_eq!(shard_index("user#00012"), Some(("user", 12)));
        assert_eq!(shard_index("user#12"), None);
        assert_eq!(shard_index("a#b#00000"), Some(("a#b", 0)));
        assert_eq!(split_on_char_boundaries("aéb", 2), vec!["a", "é", "b"]);
    }
}
