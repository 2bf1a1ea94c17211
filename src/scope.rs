use dashmap::DashMap;
use serde::de::DeserializeOwned;
use serde_json::Value;

/// Shared, concurrent key/value store that b-thread bodies can publish into
/// via `BpContext::global_scope()` and the host can read back after any
/// cycle. Backed by `dashmap` so concurrent advances within one cycle (see
/// the concurrency model) can write without an external lock.
#[derive(Default)]
pub struct GlobalScope {
    values: DashMap<String, Value>,
}

impl GlobalScope {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, name: impl Into<String>, value: Value) {
        self.values.insert(name.into(), value);
    }

    /// Deserializes the stored value as `T`. Returns `None` if the key is
    /// absent or the stored value doesn't deserialize as `T`; never panics.
    pub fn get<T: DeserializeOwned>(&self, name: &str) -> Option<T> {
        let entry = self.values.get(name)?;
        serde_json::from_value(entry.value().clone()).ok()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.values.contains_key(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn absent_key_returns_none() {
        let scope = GlobalScope::new();
        assert_eq!(scope.get::<u64>("missing"), None);
    }

    #[test]
    fn wrong_type_returns_none_not_panic() {
        let scope = GlobalScope::new();
        scope.set("k", Value::String("not-a-number".into()));
        assert_eq!(scope.get::<u64>("k"), None);
    }

    #[test]
    fn round_trips_matching_type() {
        let scope = GlobalScope::new();
        scope.set("k", serde_json::json!(42));
        assert_eq!(scope.get::<u64>("k"), Some(42));
    }
}
