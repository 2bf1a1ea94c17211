use crate::error::BpError;
use crate::event::Event;
use std::collections::BTreeSet;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

/// A decidable membership predicate over events.
///
/// Every variant's `contains` is infallible except `HostPredicate`, whose
/// underlying closure is host-supplied and may fail; the whole algebra is
/// lifted into `Result` so callers never need to special-case it.
#[derive(Clone)]
pub enum EventSet {
    All,
    None,
    Singleton(Event),
    Enumerated(BTreeSet<String>),
    AllExcept(Box<EventSet>),
    Union(Box<EventSet>, Box<EventSet>),
    Intersection(Box<EventSet>, Box<EventSet>),
    Complement(Box<EventSet>),
    HostPredicate(Arc<dyn Fn(&Event) -> Result<bool, String> + Send + Sync>),
}

impl EventSet {
    pub fn singleton(e: Event) -> Self {
        EventSet::Singleton(e)
    }

    /// Enumerated set identified by event name only, comparing domain
    /// identifiers rather than full payloads when building coarse-grained
    /// sets.
    pub fn enumerated(names: impl IntoIterator<Item = impl Into<String>>) -> Self {
        EventSet::Enumerated(names.into_iter().map(Into::into).collect())
    }

    pub fn all_except(inner: EventSet) -> Self {
        EventSet::AllExcept(Box::new(inner))
    }

    pub fn union(a: EventSet, b: EventSet) -> Self {
        EventSet::Union(Box::new(a), Box::new(b))
    }

    pub fn intersection(a: EventSet, b: EventSet) -> Self {
        EventSet::Intersection(Box::new(a), Box::new(b))
    }

    pub fn complement(a: EventSet) -> Self {
        EventSet::Complement(Box::new(a))
    }

    pub fn host_predicate(
        f: impl Fn(&Event) -> Result<bool, String> + Send + Sync + 'static,
    ) -> Self {
        EventSet::HostPredicate(Arc::new(f))
    }

    pub fn contains(&self, e: &Event) -> Result<bool, BpError> {
        match self {
            EventSet::All => Ok(true),
            EventSet::None => Ok(false),
            EventSet::Singleton(s) => Ok(s == e),
            EventSet::Enumerated(names) => Ok(names.contains(&e.name)),
            EventSet::AllExcept(s) => s.contains(e).map(|b| !b),
            EventSet::Union(a, b) => Ok(a.contains(e)? || b.contains(e)?),
            EventSet::Intersection(a, b) => Ok(a.contains(e)? && b.contains(e)?),
            EventSet::Complement(a) => a.contains(e).map(|b| !b),
            EventSet::HostPredicate(f) => f(e).map_err(|reason| BpError::HostPredicateFailure {
                reason,
            }),
        }
    }

    pub fn is_empty_syntactically(&self) -> bool {
        matches!(self, EventSet::None)
    }
}

impl fmt::Debug for EventSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EventSet::All => write!(f, "All"),
            EventSet::None => write!(f, "None"),
            EventSet::Singleton(e) => write!(f, "Singleton({e})"),
            EventSet::Enumerated(names) => write!(f, "Enumerated({names:?})"),
            EventSet::AllExcept(s) => write!(f, "AllExcept({s:?})"),
            EventSet::Union(a, b) => write!(f, "Union({a:?}, {b:?})"),
            EventSet::Intersection(a, b) => write!(f, "Intersection({a:?}, {b:?})"),
            EventSet::Complement(a) => write!(f, "Complement({a:?})"),
            EventSet::HostPredicate(arc) => write!(f, "HostPredicate(@{:p})", Arc::as_ptr(arc)),
        }
    }
}

impl Default for EventSet {
    fn default() -> Self {
        EventSet::None
    }
}

/// Structural equality, with one approximation: two `HostPredicate`s compare
/// equal only when they share the same closure (`Arc::ptr_eq`), since the
/// closure itself isn't comparable. Used only for snapshot-dedup bookkeeping
/// by external model-checking layers, never for selection correctness.
impl PartialEq for EventSet {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (EventSet::All, EventSet::All) => true,
            (EventSet::None, EventSet::None) => true,
            (EventSet::Singleton(a), EventSet::Singleton(b)) => a == b,
            (EventSet::Enumerated(a), EventSet::Enumerated(b)) => a == b,
            (EventSet::AllExcept(a), EventSet::AllExcept(b)) => a == b,
            (EventSet::Union(a1, a2), EventSet::Union(b1, b2)) => a1 == b1 && a2 == b2,
            (EventSet::Intersection(a1, a2), EventSet::Intersection(b1, b2)) => {
                a1 == b1 && a2 == b2
            }
            (EventSet::Complement(a), EventSet::Complement(b)) => a == b,
            (EventSet::HostPredicate(a), EventSet::HostPredicate(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }
}

impl Hash for EventSet {
    fn hash<H: Hasher>(&self, state: &mut H) {
        match self {
            EventSet::All => 0u8.hash(state),
            EventSet::None => 1u8.hash(state),
            EventSet::Singleton(e) => {
                2u8.hash(state);
                e.hash(state);
            }
            EventSet::Enumerated(names) => {
                3u8.hash(state);
                names.hash(state);
            }
            EventSet::AllExcept(s) => {
                4u8.hash(state);
                s.hash(state);
            }
            EventSet::Union(a, b) => {
                5u8.hash(state);
                a.hash(state);
                b.hash(state);
            }
            EventSet::Intersection(a, b) => {
                6u8.hash(state);
                a.hash(state);
                b.hash(state);
            }
            EventSet::Complement(a) => {
                7u8.hash(state);
                a.hash(state);
            }
            EventSet::HostPredicate(arc) => {
                8u8.hash(state);
                Arc::as_ptr(arc).hash(state);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn all_and_none() {
        let e = Event::new("x");
        assert!(EventSet::All.contains(&e).unwrap());
        assert!(!EventSet::None.contains(&e).unwrap());
    }

    #[test]
    fn all_except_inverts() {
        let e = Event::new("x");
        let s = EventSet::all_except(EventSet::singleton(Event::new("x")));
        assert!(!s.contains(&e).unwrap());
        assert!(s.contains(&Event::new("y")).unwrap());
    }

    #[test]
    fn host_predicate_failure_surfaces() {
        let s = EventSet::host_predicate(|_| Err("boom".to_string()));
        let err = s.contains(&Event::new("x")).unwrap_err();
        assert!(matches!(err, BpError::HostPredicateFailure { .. }));
    }

    #[test]
    fn union_and_intersection() {
        let a = EventSet::singleton(Event::new("a"));
        let b = EventSet::singleton(Event::new("b"));
        let u = EventSet::union(a.clone(), b.clone());
        assert!(u.contains(&Event::new("a")).unwrap());
        assert!(u.contains(&Event::new("b")).unwrap());
        assert!(!u.contains(&Event::new("c")).unwrap());

        let i = EventSet::intersection(a, b);
        assert!(!i.contains(&Event::new("a")).unwrap());
    }
}
