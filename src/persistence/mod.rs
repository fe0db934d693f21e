// Persistence collaborators
pub mod redis;

pub use redis::RedisPersister;

use std::collections::HashMap;
use std::sync::Mutex;

use serde_json::Value;

/// Fire-and-forget sink for per-cycle data and model snapshots.
///
/// Calls must never block or fail the processing loop; implementations log
/// their own errors and drop the payload on failure.
pub trait Persister: Send + Sync {
    /// Persist freshly applied rows, one named table per data kind
    fn save_snapshot(&self, strategy: &str, tables: &[(String, Value)]);

    /// Persist a serialized model
    fn save_model(&self, name: &str, bytes: &[u8]);
}

/// In-process persister for tests and dry runs
#[derive(Default)]
pub struct MemoryPersister {
    tables: Mutex<HashMap<String, Vec<Value>>>,
    models: Mutex<HashMap<String, Vec<u8>>>,
}

impl MemoryPersister {
    pub fn new() -> Self {
        Self::default()
    }

    /// All rows ever saved under `strategy:table`
    pub fn rows(&self, strategy: &str, table: &str) -> Vec<Value> {
        self.tables
            .lock()
            .unwrap()
            .get(&format!("{strategy}:{table}"))
            .cloned()
            .unwrap_or_default()
    }

    pub fn model(&self, name: &str) -> Option<Vec<u8>> {
        self.models.lock().unwrap().get(name).cloned()
    }
}

impl Persister for MemoryPersister {
    fn save_snapshot(&self, strategy: &str, tables: &[(String, Value)]) {
        let mut store = self.tables.lock().unwrap();
        for (table, rows) in tables {
            let entry = store.entry(format!("{strategy}:{table}")).or_default();
            match rows {
                Value::Array(items) => entry.extend(items.iter().cloned()),
                other => entry.push(other.clone()),
            }
        }
    }

    fn save_model(&self, name: &str, bytes: &[u8]) {
        self.models
            .lock()
            .unwrap()
            .insert(name.to_string(), bytes.to_vec());
    }
}
