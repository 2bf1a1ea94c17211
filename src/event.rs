use serde::{Deserialize, Serialize};
use std::hash::{Hash, Hasher};

/// An immutable event: a name plus an optional opaque payload.
///
/// Identity is by name and payload equality when a payload is present.
/// The payload is opaque to the core's selection and interrupt logic but
/// must remain comparable and serializable for replay and testing.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Event {
    pub name: String,
    pub payload: Option<serde_json::Value>,
}

impl Event {
    pub fn new(name: impl Into<String>) -> Self {
        Event {
            name: name.into(),
            payload: None,
        }
    }

    pub fn with_payload(name: impl Into<String>, payload: serde_json::Value) -> Self {
        Event {
            name: name.into(),
            payload: Some(payload),
        }
    }
}

impl PartialEq for Event {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name && self.payload == other.payload
    }
}
impl Eq for Event {}

// serde_json::Value does not implement Hash, but it does implement Eq via
// structural comparison. We hash its canonical string form instead, which is
// stable for any value produced by serde_json (map key order from a
// `BTreeMap`-less `serde_json::Map` is insertion order, not guaranteed, but
// events constructed by this crate's own `Event::with_payload` and compared
// for dedup purposes only need a hash consistent with `eq`, not a canonical
// cross-process digest).
impl Hash for Event {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.name.hash(state);
        match &self.payload {
            Some(v) => {
                1u8.hash(state);
                v.to_string().hash(state);
            }
            None => 0u8.hash(state),
        }
    }
}

impl std::fmt::Display for Event {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.payload {
            Some(p) => write!(f, "{}({p})", self.name),
            None => write!(f, "{}", self.name),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn events_without_payload_compare_by_name() {
        assert_eq!(Event::new("a"), Event::new("a"));
        assert_ne!(Event::new("a"), Event::new("b"));
    }

    #[test]
    fn events_with_payload_compare_structurally() {
        let a = Event::with_payload("a", serde_json::json!({"x": 1}));
        let b = Event::with_payload("a", serde_json::json!({"x": 1}));
        let c = Event::with_payload("a", serde_json::json!({"x": 2}));
        assert_eq!(a, b);
        assert_ne!(a, c);
    }
}
