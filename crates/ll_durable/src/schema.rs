//! 持久化结构: 显式的标签联合 + 版本信封

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;

/// 持久化格式版本; 升级后旧数据被放弃而非迁移
pub const SCHEMA_VERSION: u32 = 1;

/// Actor 的事务元数据 (保存的提交点)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TxMeta {
    pub id: String,
    pub txid: u64,
    pub time: DateTime<Utc>,
}

/// 一个模块在某次保存时的源码
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModuleSource {
    pub module: String,
    pub txid: u64,
    pub text: String,
}

/// Pengine 元数据
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PengineMetadata {
    pub title: Option<String>,
    pub src_urls: Vec<String>,
    pub src_text: Option<String>,
    /// `src_text` 的 SHA-256 (hex)
    pub src_digest: Option<String>,
    pub application: Option<String>,
    pub listeners: Vec<String>,
}

/// 模块链接登记 (活动通道不持久化)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LinkRecord {
    pub module: String,
    pub owner: String,
}

/// 所有可持久化的值
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "data", rename_all = "snake_case")]
pub enum Stored {
    TxMeta(TxMeta),
    Source(ModuleSource),
    Metadata(PengineMetadata),
    Link(LinkRecord),
}

/// 带版本号的外层信封
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    pub v: u32,
    pub record: Stored,
}

impl Envelope {
    pub fn new(record: Stored) -> Self {
        Self {
            v: SCHEMA_VERSION,
            record,
        }
    }

    /// 解码并校验版本与类型; 不符合时记录日志并视为不存在
    pub fn decode<T: Schema>(key: &str, text: &str) -> Option<T> {
        let envelope: Envelope = match serde_json::from_str(text) {
            Ok(e) => e,
            Err(e) => {
                warn!(key, "Discarding unreadable value: {}", e);
                return None;
            }
        };
        if envelope.v != SCHEMA_VERSION {
            warn!(key, version = envelope.v, "Discarding value with foreign schema version");
            return None;
        }
        let kind = envelope.record.kind();
        let value = T::from_stored(envelope.record);
        if value.is_none() {
            warn!(key, kind, "Discarding value of unexpected kind");
        }
        value
    }
}

impl Stored {
    pub fn kind(&self) -> &'static str {
        match self {
            Stored::TxMeta(_) => "tx_meta",
            Stored::Source(_) => "source",
            Stored::Metadata(_) => "metadata",
            Stored::Link(_) => "link",
        }
    }
}

/// 持久化类型与 `Stored` 变体之间的转换
pub trait Schema: Sized + Send + Sync {
    fn to_stored(&self) -> Stored;

    fn from_stored(stored: Stored) -> Option<Self>;
}

macro_rules! impl_schema {
    ($ty:ident => $variant:ident) => {
        impl Schema for $ty {
            fn to_stored(&self) -> Stored {
                Stored::$variant(self.clone())
            }

            fn from_stored(stored: Stored) -> Option<Self> {
                match stored {
                    Stored::$variant(value) => Some(value),
                    _ => None,
                }
            }
        }
    };
}

impl_schema!(TxMeta => TxMeta);
impl_schema!(ModuleSource => Source);
impl_schema!(PengineMetadata => Metadata);
impl_schema!(LinkRecord => Link);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_envelope_layout() {
        let link = LinkRecord {
            module: "shared".into(),
            owner: "shared".into(),
        };
        let text = serde_json::to_string(&Envelope::new(link.to_stored())).unwrap();
        assert_eq!(
            text,
            r#"{"v":1,"record":{"kind":"link","data":{"module":"shared","owner":"shared"}}}"#
        );
        assert_eq!(Envelope::decode::<LinkRecord>("k", &text), Some(link));
    }

    #[test]
    fn test_wrong_kind_or_version_is_absent() {
        let meta = PengineMetadata::default();
        let text = serde_json::to_string(&Envelope::new(meta.to_stored())).unwrap();
        assert!(Envelope::decode::<TxMeta>("k", &text).is_none());

        let old = text.replacen("\"v\":1", "\"v\":0", 1);
        assert!(Envelope::decode::<PengineMetadata>("k", &old).is_none());
        assert!(Envelope::decode::<PengineMetadata>("k", "not json").is_none());
    }
}
