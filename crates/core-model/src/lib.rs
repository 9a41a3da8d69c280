use std::collections::BTreeMap;
use std::fmt;
use std::sync::OnceLock;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

/// Identifier of the signed-in user that owns a row. Never empty.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TenantId(String);

impl TenantId {
    /// Returns `None` for blank input so an empty owner can never be written.
    pub fn new(raw: impl Into<String>) -> Option<Self> {
        let raw = raw.into();
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return None;
        }
        Some(Self(trimmed.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TenantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum ItemKind {
    Image,
    Video,
    Audio,
    Storyboard,
    Canvas,
    Copy,
}

impl ItemKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ItemKind::Image => "image",
            ItemKind::Video => "video",
            ItemKind::Audio => "audio",
            ItemKind::Storyboard => "storyboard",
            ItemKind::Canvas => "canvas",
            ItemKind::Copy => "copy",
        }
    }
}

impl fmt::Display for ItemKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ItemKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "image" => Ok(ItemKind::Image),
            "video" => Ok(ItemKind::Video),
            "audio" => Ok(ItemKind::Audio),
            "storyboard" => Ok(ItemKind::Storyboard),
            "canvas" => Ok(ItemKind::Canvas),
            "copy" => Ok(ItemKind::Copy),
            _ => anyhow::bail!("unknown item kind: {s}"),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum LogStatus {
    Success,
    Error,
}

impl LogStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogStatus::Success => "success",
            LogStatus::Error => "error",
        }
    }
}

/// Opaque binary content. Only `mime` and `len` travel in the JSON document;
/// the bytes are persisted next to it as an attachment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BinaryHandle {
    pub mime: String,
    pub len: usize,
    #[serde(skip)]
    pub bytes: Vec<u8>,
}

impl BinaryHandle {
    pub fn new(mime: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            mime: mime.into(),
            len: bytes.len(),
            bytes,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "lowercase")]
pub enum Payload {
    Text(String),
    Binary(BinaryHandle),
}

impl Payload {
    pub fn text(value: impl Into<String>) -> Self {
        Payload::Text(value.into())
    }

    fn attachment(&self) -> Option<&[u8]> {
        match self {
            Payload::Binary(handle) => Some(&handle.bytes),
            Payload::Text(_) => None,
        }
    }

    fn restore_attachment(&mut self, bytes: Vec<u8>) {
        if let Payload::Binary(handle) = self {
            handle.len = bytes.len();
            handle.bytes = bytes;
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryItem {
    pub id: String,
    pub tenant_id: TenantId,
    pub kind: ItemKind,
    pub prompt: String,
    pub payload: Payload,
    /// Epoch milliseconds.
    pub created_at: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogItem {
    pub id: String,
    pub tenant_id: TenantId,
    pub model: String,
    pub prompt: String,
    pub output: String,
    pub token_count: u64,
    pub status: LogStatus,
    pub error_detail: Option<String>,
    pub media_preview: Option<Payload>,
    /// Epoch milliseconds.
    pub created_at: i64,
}

/// A row of a tenant-scoped, append/delete-only collection.
///
/// The bounded collection engine is generic over this trait: it needs the
/// indexed columns (`id`, `tenant_id`, `created_at`) and the optional binary
/// attachment, everything else is stored as the serialized document.
pub trait TenantRecord: Serialize + serde::de::DeserializeOwned {
    fn id(&self) -> &str;
    fn tenant_id(&self) -> &TenantId;
    fn created_at(&self) -> i64;
    fn attachment(&self) -> Option<&[u8]>;
    fn restore_attachment(&mut self, bytes: Vec<u8>);

    fn validate(&self) -> Result<(), String> {
        check_owner(self)
    }
}

fn check_owner<R: TenantRecord + ?Sized>(record: &R) -> Result<(), String> {
    if record.id().trim().is_empty() {
        return Err("record id is empty".to_string());
    }
    if record.tenant_id().as_str().trim().is_empty() {
        return Err(format!("record {} has an empty tenant", record.id()));
    }
    Ok(())
}

impl TenantRecord for HistoryItem {
    fn id(&self) -> &str {
        &self.id
    }

    fn tenant_id(&self) -> &TenantId {
        &self.tenant_id
    }

    fn created_at(&self) -> i64 {
        self.created_at
    }

    fn attachment(&self) -> Option<&[u8]> {
        self.payload.attachment()
    }

    fn restore_attachment(&mut self, bytes: Vec<u8>) {
        self.payload.restore_attachment(bytes);
    }
}

impl TenantRecord for LogItem {
    fn id(&self) -> &str {
        &self.id
    }

    fn tenant_id(&self) -> &TenantId {
        &self.tenant_id
    }

    fn created_at(&self) -> i64 {
        self.created_at
    }

    fn attachment(&self) -> Option<&[u8]> {
        self.media_preview.as_ref().and_then(Payload::attachment)
    }

    fn restore_attachment(&mut self, bytes: Vec<u8>) {
        if let Some(preview) = self.media_preview.as_mut() {
            preview.restore_attachment(bytes);
        }
    }
}

/// Closed set of value shapes the settings collection accepts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "lowercase")]
pub enum SettingValue {
    Text(String),
    Flag(bool),
    Number(i64),
    Record(BTreeMap<String, String>),
}

impl SettingValue {
    pub fn as_text(&self) -> Option<&str> {
        match self {
            SettingValue::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_flag(&self) -> Option<bool> {
        match self {
            SettingValue::Flag(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_number(&self) -> Option<i64> {
        match self {
            SettingValue::Number(n) => Some(*n),
            _ => None,
        }
    }

    /// Parses command-line input: `true`/`false`, integers, `k=v,k=v`, else text.
    pub fn parse_loose(input: &str) -> Self {
        match input {
            "true" => return SettingValue::Flag(true),
            "false" => return SettingValue::Flag(false),
            _ => {}
        }
        if let Ok(n) = input.parse::<i64>() {
            return SettingValue::Number(n);
        }
        if input.contains('=') {
            let record: BTreeMap<String, String> = input
                .split(',')
                .filter_map(|pair| pair.split_once('='))
                .map(|(k, v)| (k.trim().to_string(), v.trim().to_string()))
                .collect();
            if !record.is_empty() {
                return SettingValue::Record(record);
            }
        }
        SettingValue::Text(input.to_string())
    }
}

impl fmt::Display for SettingValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SettingValue::Text(s) => f.write_str(s),
            SettingValue::Flag(b) => write!(f, "{b}"),
            SettingValue::Number(n) => write!(f, "{n}"),
            SettingValue::Record(map) => {
                let pairs: Vec<String> = map.iter().map(|(k, v)| format!("{k}={v}")).collect();
                f.write_str(&pairs.join(","))
            }
        }
    }
}

pub mod setting_keys {
    pub const THEME: &str = "ui.theme";
    /// Tenant id of the active session; absent when signed out.
    pub const SESSION: &str = "auth.session";
    pub const AUTH_TOKEN: &str = "auth.token";

    pub fn feature_flag(name: &str) -> String {
        format!("feature.{name}")
    }
}

pub fn deterministic_id(parts: &[&str]) -> String {
    let mut hasher = blake3::Hasher::new();
    for part in parts {
        hasher.update(part.as_bytes());
        hasher.update(&[0x1f]);
    }
    hasher.finalize().to_hex().to_string()
}

static ID_COUNTER: AtomicU64 = AtomicU64::new(0);
static PROCESS_NONCE: OnceLock<String> = OnceLock::new();

/// Mints a globally unique item id.
///
/// Tenant and timestamp alone collide for two items created in the same
/// millisecond, so a per-process counter and a nonce derived from the process
/// id and start instant are mixed in as well.
pub fn new_item_id(tenant: &TenantId, created_at: i64) -> String {
    let nonce = PROCESS_NONCE.get_or_init(|| {
        let started = chrono::Utc::now()
            .timestamp_nanos_opt()
            .unwrap_or_default()
            .to_string();
        deterministic_id(&["nonce", &std::process::id().to_string(), &started])
    });
    let seq = ID_COUNTER.fetch_add(1, Ordering::Relaxed);
    let digest = deterministic_id(&[
        tenant.as_str(),
        &created_at.to_string(),
        nonce,
        &seq.to_string(),
    ]);
    digest[..32].to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tenant(s: &str) -> TenantId {
        TenantId::new(s).unwrap()
    }

    #[test]
    fn deterministic_id_stable() {
        let id1 = deterministic_id(&["a", "b"]);
        let id2 = deterministic_id(&["a", "b"]);
        assert_eq!(id1, id2);
    }

    #[test]
    fn deterministic_id_order_matters() {
        let id1 = deterministic_id(&["a", "b"]);
        let id2 = deterministic_id(&["b", "a"]);
        assert_ne!(id1, id2);
    }

    #[test]
    fn item_ids_unique_within_same_millisecond() {
        let t = tenant("u1");
        let a = new_item_id(&t, 1_000);
        let b = new_item_id(&t, 1_000);
        assert_ne!(a, b);
        assert_eq!(a.len(), 32);
    }

    #[test]
    fn item_ids_differ_across_tenants() {
        let a = new_item_id(&tenant("u1"), 5);
        let b = new_item_id(&tenant("u2"), 5);
        assert_ne!(a, b);
    }

    #[test]
    fn blank_tenant_rejected() {
        assert!(TenantId::new("").is_none());
        assert!(TenantId::new("   ").is_none());
        assert_eq!(TenantId::new(" u1 ").unwrap().as_str(), "u1");
    }

    #[test]
    fn item_kind_round_trips_through_str() {
        for kind in [
            ItemKind::Image,
            ItemKind::Video,
            ItemKind::Audio,
            ItemKind::Storyboard,
            ItemKind::Canvas,
            ItemKind::Copy,
        ] {
            assert_eq!(kind.as_str().parse::<ItemKind>().unwrap(), kind);
        }
        assert!("gif".parse::<ItemKind>().is_err());
    }

    #[test]
    fn binary_bytes_stay_out_of_json() {
        let item = HistoryItem {
            id: "h1".to_string(),
            tenant_id: tenant("u1"),
            kind: ItemKind::Audio,
            prompt: "a chime".to_string(),
            payload: Payload::Binary(BinaryHandle::new("audio/wav", vec![1, 2, 3])),
            created_at: 10,
        };
        let json = serde_json::to_string(&item).unwrap();
        assert!(json.contains("\"len\":3"));
        assert!(!json.contains("bytes"));
        assert_eq!(item.attachment(), Some(&[1u8, 2, 3][..]));

        let mut back: HistoryItem = serde_json::from_str(&json).unwrap();
        assert_eq!(back.attachment().map(<[u8]>::len), Some(0));
        back.restore_attachment(vec![1, 2, 3]);
        assert_eq!(back, item);
    }

    #[test]
    fn log_validation_only_checks_ownership() {
        let log = LogItem {
            id: "l1".to_string(),
            tenant_id: tenant("u1"),
            model: "m".to_string(),
            prompt: "p".to_string(),
            output: "o".to_string(),
            token_count: 3,
            status: LogStatus::Success,
            error_detail: Some("partial: trimmed output".to_string()),
            media_preview: None,
            created_at: 1,
        };
        assert!(log.validate().is_ok());
        let mut orphan = log.clone();
        orphan.id = " ".to_string();
        assert!(orphan.validate().is_err());
    }

    #[test]
    fn setting_value_parse_loose() {
        assert_eq!(SettingValue::parse_loose("true"), SettingValue::Flag(true));
        assert_eq!(SettingValue::parse_loose("42"), SettingValue::Number(42));
        assert_eq!(
            SettingValue::parse_loose("dark"),
            SettingValue::Text("dark".to_string())
        );
        let SettingValue::Record(map) = SettingValue::parse_loose("a=1, b=2") else {
            panic!("expected record");
        };
        assert_eq!(map.get("b").map(String::as_str), Some("2"));
    }
}
