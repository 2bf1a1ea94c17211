use crate::error::BpError;
use async_trait::async_trait;

/// Pluggable boundary for `bp.load_resource(path)`. The core ships only
/// `NullResourceLoader`; real filesystem/network loading is the host's
/// concern and is out of scope for this crate.
#[async_trait]
pub trait ResourceLoader: Send + Sync {
    async fn load(&self, path: &str) -> Result<Vec<u8>, BpError>;
}

/// Default loader: every request fails with `ResourceNotFound`.
#[derive(Default)]
pub struct NullResourceLoader;

#[async_trait]
impl ResourceLoader for NullResourceLoader {
    async fn load(&self, path: &str) -> Result<Vec<u8>, BpError> {
        Err(BpError::ResourceNotFound {
            path: path.to_string(),
        })
    }
}

/// In-memory loader used by tests and hosts that want to seed resources
/// without touching the filesystem.
#[derive(Default)]
pub struct InMemoryResourceLoader {
    resources: dashmap::DashMap<String, Vec<u8>>,
}

impl InMemoryResourceLoader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, path: impl Into<String>, bytes: Vec<u8>) {
        self.resources.insert(path.into(), bytes);
    }
}

#[async_trait]
impl ResourceLoader for InMemoryResourceLoader {
    async fn load(&self, path: &str) -> Result<Vec<u8>, BpError> {
        self.resources
            .get(path)
            .map(|v| v.clone())
            .ok_or_else(|| BpError::ResourceNotFound {
                path: path.to_string(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn null_loader_always_fails() {
        let loader = NullResourceLoader;
        let err = loader.load("anything").await.unwrap_err();
        assert!(matches!(err, BpError::ResourceNotFound { .. }));
    }

    #[tokio::test]
    async fn in_memory_loader_returns_seeded_bytes() {
        let loader = InMemoryResourceLoader::new();
        loader.insert("a.txt", b"hello".to_vec());
        let bytes = loader.load("a.txt").await.unwrap();
        assert_eq!(bytes, b"hello");
        assert!(loader.load("missing").await.is_err());
    }
}
