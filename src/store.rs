//! Remote snapshot store.
//!
//! Sensor devices append readings to a Firebase Realtime Database. This
//! module reads full snapshots of a path: one round trip per call, no caching,
//! no incremental reads.

use std::path::Path;
use std::sync::Mutex;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use serde::Deserialize;
use serde_json::Value;

use crate::error::StoreError;

/// Read access to a JSON tree addressed by slash-separated paths.
pub trait SnapshotStore: Send + Sync {
    /// Read the subtree at `path` ("/" for the root). Absent paths are `NotFound`.
    fn read(&self, path: &str) -> Result<Value, StoreError>;
}

impl<S: SnapshotStore + ?Sized> SnapshotStore for std::sync::Arc<S> {
    fn read(&self, path: &str) -> Result<Value, StoreError> {
        (**self).read(path)
    }
}

/// Store credentials loaded from a local JSON file at startup.
///
/// Accepts a service-account style file extended with the database URL and a
/// REST auth token (database secret or OAuth access token). Unknown fields are
/// ignored.
#[derive(Clone, Deserialize)]
pub struct StoreCredentials {
    #[serde(alias = "databaseURL")]
    pub database_url: String,
    #[serde(default, alias = "database_secret", alias = "access_token")]
    pub auth_token: Option<String>,
    #[serde(default)]
    pub project_id: Option<String>,
}

impl std::fmt::Debug for StoreCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StoreCredentials")
            .field("database_url", &self.database_url)
            .field("auth_token", &self.auth_token.as_ref().map(|_| "<redacted>"))
            .field("project_id", &self.project_id)
            .finish()
    }
}

impl StoreCredentials {
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| anyhow!("failed to read credentials file {}: {}", path.display(), e))?;
        let creds: Self = serde_json::from_str(&raw)
            .map_err(|e| anyhow!("invalid credentials file {}: {}", path.display(), e))?;
        url::Url::parse(&creds.database_url)
            .with_context(|| format!("invalid database_url in {}", path.display()))?;
        Ok(creds)
    }
}

/// Firebase Realtime Database REST reader.
pub struct RestSnapshotStore {
    agent: ureq::Agent,
    base_url: String,
    auth_token: Option<String>,
}

impl RestSnapshotStore {
    pub fn new(credentials: &StoreCredentials, timeout: Duration) -> Self {
        Self {
            agent: ureq::AgentBuilder::new().timeout(timeout).build(),
            base_url: credentials.database_url.trim_end_matches('/').to_string(),
            auth_token: credentials.auth_token.clone(),
        }
    }

    /// REST URL for `path`, e.g. `https://db.example/Client/SensorData.json`.
    pub fn url_for(&self, path: &str) -> String {
        format!("{}/{}.json", self.base_url, path.trim_matches('/'))
    }
}

impl SnapshotStore for RestSnapshotStore {
    fn read(&self, path: &str) -> Result<Value, StoreError> {
        let mut request = self.agent.get(&self.url_for(path));
        if let Some(token) = &self.auth_token {
            request = request.query("auth", token);
        }
        let response = request.call().map_err(|err| match err {
            ureq::Error::Status(code, _) => {
                StoreError::Unreachable(format!("store returned status {}", code))
            }
            other => StoreError::Unreachable(other.to_string()),
        })?;
        let value: Value = serde_json::from_reader(response.into_reader())
            .map_err(|e| StoreError::Malformed(format!("response is not JSON: {}", e)))?;
        if value.is_null() {
            return Err(StoreError::NotFound(path.to_string()));
        }
        Ok(value)
    }
}

/// In-process store holding one JSON tree. Used by tests and offline runs.
#[derive(Debug, Default)]
pub struct InMemorySnapshotStore {
    root: Mutex<Value>,
}

impl InMemorySnapshotStore {
    pub fn new(root: Value) -> Self {
        Self {
            root: Mutex::new(root),
        }
    }

    /// Load the tree from a JSON file (e.g. a database export).
    pub fn from_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| anyhow!("failed to read snapshot file {}: {}", path.display(), e))?;
        let root = serde_json::from_str(&raw)
            .map_err(|e| anyhow!("invalid snapshot file {}: {}", path.display(), e))?;
        Ok(Self::new(root))
    }

}

impl SnapshotStore for InMemorySnapshotStore {
    fn read(&self, path: &str) -> Result<Value, StoreError> {
        let guard = self
            .root
            .lock()
            .map_err(|_| StoreError::Unreachable("snapshot lock poisoned".to_string()))?;
        let mut node: &Value = &guard;
        for segment in path.split('/').filter(|s| !s.is_empty()) {
            node = match node {
                Value::Object(map) => map.get(segment),
                Value::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
                _ => None,
            }
            .ok_or_else(|| StoreError::NotFound(path.to_string()))?;
        }
        if node.is_null() {
            return Err(StoreError::NotFound(path.to_string()));
        }
        Ok(node.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::io::Write;

    #[test]
    fn in_memory_store_walks_paths() {
        let store = InMemorySnapshotStore::new(json!({
            "Client": {"SensorData": {"a": {"timestamp": 1}}},
            "Server": null
        }));
        assert_eq!(
            store.read("/Client/SensorData/a").unwrap(),
            json!({"timestamp": 1})
        );
        assert!(matches!(store.read("/Server"), Err(StoreError::NotFound(_))));
        assert!(matches!(store.read("/Missing"), Err(StoreError::NotFound(_))));
        assert!(store.read("/").is_ok());
    }

    #[test]
    fn rest_urls_are_rooted_at_database_url() {
        let creds = StoreCredentials {
            database_url: "https://example-rtdb.firebasedatabase.app/".to_string(),
            auth_token: None,
            project_id: None,
        };
        let store = RestSnapshotStore::new(&creds, Duration::from_secs(1));
        assert_eq!(
            store.url_for("/"),
            "https://example-rtdb.firebasedatabase.app/.json"
        );
        assert_eq!(
            store.url_for("/Client/SensorData"),
            "https://example-rtdb.firebasedatabase.app/Client/SensorData.json"
        );
    }

    #[test]
    fn credentials_load_accepts_aliases_and_redacts_token() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{"type":"service_account","project_id":"greenhouse","databaseURL":"https://greenhouse.example/","database_secret":"s3cret"}}"#
        )
        .unwrap();
        let creds = StoreCredentials::load(file.path()).unwrap();
        assert_eq!(creds.database_url, "https://greenhouse.example/");
        assert_eq!(creds.auth_token.as_deref(), Some("s3cret"));
        assert!(!format!("{:?}", creds).contains("s3cret"));
    }

    #[test]
    fn credentials_load_fails_for_missing_file() {
        assert!(StoreCredentials::load(Path::new("/nonexistent/creds.json")).is_err());
    }
}
