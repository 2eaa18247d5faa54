//! Types that mirror the metrics backend's JSON schema.
//!
//! Server documents are kept as raw JSON so partial pushes can be merged
//! field by field; the typed records below are decoded on read and are
//! lenient about missing or ill-typed sections.

use serde::de::{self, DeserializeOwned, Unexpected};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServerIdentity {
    Ai,
    App,
    Storage,
}

impl ServerIdentity {
    pub const ALL: [ServerIdentity; 3] = [ServerIdentity::Ai, ServerIdentity::App, ServerIdentity::Storage];

    pub fn as_str(self) -> &'static str {
        match self {
            ServerIdentity::Ai => "ai",
            ServerIdentity::App => "app",
            ServerIdentity::Storage => "storage",
        }
    }

    /// Key under which this server appears in an overview document.
    pub fn overview_key(self) -> &'static str {
        match self {
            ServerIdentity::Ai => "ai_server",
            ServerIdentity::App => "app_server",
            ServerIdentity::Storage => "storage_server",
        }
    }

    /// REST path serving this server's full document.
    pub fn api_path(self) -> &'static str {
        match self {
            ServerIdentity::Ai => "/api/ai-server/",
            ServerIdentity::App => "/api/app-server/",
            ServerIdentity::Storage => "/api/storage-server/",
        }
    }

    pub fn title(self) -> &'static str {
        match self {
            ServerIdentity::Ai => "AI Server",
            ServerIdentity::App => "App Server",
            ServerIdentity::Storage => "Storage Server",
        }
    }
}

impl fmt::Display for ServerIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown server identity `{0}`")]
pub struct UnknownServer(pub String);

impl FromStr for ServerIdentity {
    type Err = UnknownServer;

    // The backend pushes `ai_server`; the REST paths use `ai-server`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let short = s
            .strip_suffix("_server")
            .or_else(|| s.strip_suffix("-server"))
            .unwrap_or(s);
        match short {
            "ai" => Ok(ServerIdentity::Ai),
            "app" => Ok(ServerIdentity::App),
            "storage" => Ok(ServerIdentity::Storage),
            _ => Err(UnknownServer(s.to_string())),
        }
    }
}

/// Readiness of the live channel. Only the transport writes it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    Closing,
}

impl ConnectionState {
    pub fn as_str(self) -> &'static str {
        match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Closing => "closing",
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct CpuMetrics {
    pub usage_percent: f64,
    pub cores: u32,
    pub temperature: Option<f64>,
    pub load_average: Option<Vec<f64>>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct MemoryMetrics {
    pub used_gb: f64,
    pub total_gb: f64,
    pub usage_percent: f64,
    pub available_gb: f64,
    pub cached_gb: Option<f64>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct GpuMetrics {
    pub name: String,
    pub usage_percent: f64,
    pub memory_used_mb: f64,
    pub memory_total_mb: f64,
    pub memory_usage_percent: f64,
    pub temperature: f64,
    pub power_draw_w: f64,
    pub fan_speed_percent: Option<f64>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct DiskMetrics {
    pub mount_point: String,
    pub used_gb: f64,
    pub total_gb: f64,
    pub usage_percent: f64,
    pub available_gb: f64,
    pub filesystem: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct VmMetrics {
    pub vmid: u64,
    pub name: String,
    pub status: String,
    pub cpu_usage: f64,
    pub memory_used_gb: f64,
    pub memory_total_gb: f64,
    pub memory_usage_percent: f64,
    pub disk_usage_gb: f64,
    pub disk_total_gb: Option<f64>,
    pub uptime_seconds: Option<u64>,
}

impl VmMetrics {
    pub fn is_running(&self) -> bool {
        self.status.eq_ignore_ascii_case("running")
    }
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct FilesystemStats {
    pub mount_point: String,
    pub used_gb: f64,
    pub total_gb: f64,
    pub usage_percent: f64,
    pub file_count: u64,
    pub avg_file_size_mb: f64,
    pub largest_file_mb: Option<f64>,
}

/// Vector-database (Qdrant) statistics reported by the storage server.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct VectorDbStats {
    pub status: String,
    pub collections: u64,
    pub total_points: u64,
    pub disk_usage_gb: f64,
    pub memory_usage_mb: f64,
    pub version: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct Health {
    pub status: String,
    pub last_updated: Option<String>,
    pub uptime_seconds: Option<u64>,
    pub response_time_ms: Option<f64>,
}

impl Health {
    pub fn is_online(&self) -> bool {
        self.status.eq_ignore_ascii_case("online")
    }
}

/// One server's metrics document.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ServerSnapshot {
    doc: Map<String, Value>,
}

impl ServerSnapshot {
    pub fn from_map(doc: Map<String, Value>) -> Self {
        Self { doc }
    }

    pub fn as_map(&self) -> &Map<String, Value> {
        &self.doc
    }

    /// Merge `patch` into this document. Objects merge recursively; arrays
    /// and scalars from the patch replace what was there.
    pub fn merge(&mut self, patch: &Map<String, Value>) {
        merge_map(&mut self.doc, patch);
    }

    fn section<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        match self.doc.get(key) {
            None | Some(Value::Null) => None,
            Some(v) => T::deserialize(v).ok(),
        }
    }

    // Skips entries that fail to decode instead of dropping the whole list.
    fn list<T: DeserializeOwned>(&self, key: &str) -> Vec<T> {
        self.doc
            .get(key)
            .and_then(Value::as_array)
            .map(|items| items.iter().filter_map(|v| T::deserialize(v).ok()).collect())
            .unwrap_or_default()
    }

    pub fn cpu(&self) -> Option<CpuMetrics> {
        self.section("cpu")
    }

    pub fn memory(&self) -> Option<MemoryMetrics> {
        self.section("memory")
    }

    pub fn gpu(&self) -> Option<GpuMetrics> {
        self.section("gpu")
    }

    pub fn disks(&self) -> Vec<DiskMetrics> {
        self.list("disks")
    }

    pub fn vms(&self) -> Vec<VmMetrics> {
        self.list("vms")
    }

    pub fn filesystems(&self) -> Vec<FilesystemStats> {
        self.list("filesystems")
    }

    pub fn vector_db(&self) -> Option<VectorDbStats> {
        self.section("qdrant")
    }

    pub fn health(&self) -> Option<Health> {
        self.section("server_status").or_else(|| self.section("health"))
    }

    /// Numeric value at `path`, e.g. `["cpu", "usage_percent"]`.
    pub fn metric(&self, path: &[&str]) -> Option<f64> {
        let (first, rest) = path.split_first()?;
        let mut cur = self.doc.get(*first)?;
        for key in rest {
            cur = cur.get(*key)?;
        }
        cur.as_f64()
    }
}

fn merge_map(target: &mut Map<String, Value>, patch: &Map<String, Value>) {
    for (key, incoming) in patch {
        match (target.get_mut(key), incoming) {
            (Some(Value::Object(existing)), Value::Object(nested)) => merge_map(existing, nested),
            _ => {
                target.insert(key.clone(), incoming.clone());
            }
        }
    }
}

#[derive(Deserialize)]
struct OverviewDoc {
    #[serde(default)]
    total_servers: u32,
    #[serde(default)]
    online_servers: u32,
    #[serde(default)]
    alerts_count: u32,
    #[serde(default)]
    last_updated: Option<String>,
    #[serde(default)]
    ai_server: Option<Map<String, Value>>,
    #[serde(default)]
    app_server: Option<Map<String, Value>>,
    #[serde(default)]
    storage_server: Option<Map<String, Value>>,
}

/// Unified view over all servers.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OverviewSnapshot {
    pub total_servers: u32,
    pub online_servers: u32,
    pub alerts_count: u32,
    pub last_updated: Option<String>,
    pub servers: BTreeMap<ServerIdentity, ServerSnapshot>,
}

impl OverviewSnapshot {
    /// Decode a full overview document as served by `/api/servers/overview`
    /// or pushed with `server_type: "overview"`.
    pub fn from_value(value: &Value) -> Result<Self, serde_json::Error> {
        // serde would also accept a sequence for the struct below
        let unexpected = match value {
            Value::Object(_) => None,
            Value::Array(_) => Some(Unexpected::Seq),
            Value::Null => Some(Unexpected::Unit),
            Value::Bool(b) => Some(Unexpected::Bool(*b)),
            Value::Number(_) => Some(Unexpected::Other("number")),
            Value::String(s) => Some(Unexpected::Str(s.as_str())),
        };
        if let Some(unexpected) = unexpected {
            return Err(de::Error::invalid_type(unexpected, &"an overview object"));
        }
        let doc = OverviewDoc::deserialize(value)?;
        let mut servers = BTreeMap::new();
        for (id, section) in [
            (ServerIdentity::Ai, doc.ai_server),
            (ServerIdentity::App, doc.app_server),
            (ServerIdentity::Storage, doc.storage_server),
        ] {
            if let Some(map) = section {
                servers.insert(id, ServerSnapshot::from_map(map));
            }
        }
        Ok(Self {
            total_servers: doc.total_servers,
            online_servers: doc.online_servers,
            alerts_count: doc.alerts_count,
            last_updated: doc.last_updated,
            servers,
        })
    }

    pub fn server(&self, id: ServerIdentity) -> Option<&ServerSnapshot> {
        self.servers.get(&id)
    }

    /// Number of known servers whose health status reads `online`.
    pub fn count_online(&self) -> u32 {
        self.servers
            .values()
            .filter(|s| s.health().is_some_and(|h| h.is_online()))
            .count() as u32
    }

    /// Value used for the chart sample; absent metrics read as zero.
    pub fn usage(&self, id: ServerIdentity, section: &str) -> f64 {
        self.server(id)
            .and_then(|s| s.metric(&[section, "usage_percent"]))
            .unwrap_or(0.0)
    }
}
