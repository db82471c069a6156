//! Image storage abstraction for room backgrounds.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::RwLock;
use thiserror::Error;

/// Largest accepted upload.
pub const MAX_UPLOAD_BYTES: usize = 20 * 1024 * 1024;

/// Cache-Control header applied to uploads by default.
pub const DEFAULT_CACHE_CONTROL: &str = "private, max-age=86400";

/// Upload errors.
#[derive(Debug, Error)]
pub enum UploadError {
    #[error("Image too large: {size} bytes (limit {limit})")]
    TooLarge { size: usize, limit: usize },
    #[error("Upload rejected: {0}")]
    Rejected(String),
    #[error("Image not found: {0}")]
    NotFound(String),
}

impl UploadError {
    /// Message shown to the user when an upload fails.
    pub fn notice(&self) -> &'static str {
        "Upload failed. The network may be unstable or the file may be too large. \
         Please use a file smaller than 20MB."
    }
}

/// Result type for image storage operations.
pub type UploadResult<T> = Result<T, UploadError>;

/// Boxed future for async operations (compatible with WASM).
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + 'a>>;

/// Opaque reference to a stored image.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ImageRef(pub String);

/// Metadata sent along with an upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadMetadata {
    pub cache_control: String,
}

impl Default for UploadMetadata {
    fn default() -> Self {
        Self {
            cache_control: DEFAULT_CACHE_CONTROL.to_string(),
        }
    }
}

/// Trait for image hosting backends.
pub trait ImageStore {
    /// Store `bytes` under `name`.
    fn upload(&self, name: &str, bytes: Vec<u8>, metadata: UploadMetadata) -> BoxFuture<'_, UploadResult<ImageRef>>;

    /// Public URL of a stored image.
    fn download_url(&self, image: &ImageRef) -> BoxFuture<'_, UploadResult<String>>;
}

struct StoredImage {
    bytes: Vec<u8>,
    metadata: UploadMetadata,
}

/// In-memory image store for tests and the headless driver.
pub struct MemoryImageStore {
    images: RwLock<HashMap<String, StoredImage>>,
    limit: usize,
}

impl Default for MemoryImageStore {
    fn default() -> Self {
        Self::with_limit(MAX_UPLOAD_BYTES)
    }
}

impl MemoryImageStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_limit(limit: usize) -> Self {
        Self {
            images: RwLock::new(HashMap::new()),
            limit,
        }
    }

    /// Stored bytes of an image, if present.
    pub fn bytes(&self, image: &ImageRef) -> Option<Vec<u8>> {
        let images = self.images.read().ok()?;
        images.get(&image.0).map(|stored| stored.bytes.clone())
    }

    pub fn cache_control(&self, image: &ImageRef) -> Option<String> {
        let images = self.images.read().ok()?;
        images.get(&image.0).map(|stored| stored.metadata.cache_control.clone())
    }
}

impl ImageStore for MemoryImageStore {
    fn upload(&self, name: &str, bytes: Vec<u8>, metadata: UploadMetadata) -> BoxFuture<'_, UploadResult<ImageRef>> {
        let name = name.to_string();
        Box::pin(async move {
            if bytes.len() > self.limit {
                return Err(UploadError::TooLarge {
                    size: bytes.len(),
                    limit: self.limit,
                });
            }
            if name.is_empty() {
                return Err(UploadError::Rejected("empty name".to_string()));
            }
            let mut images = self
                .images
                .write()
                .map_err(|e| UploadError::Rejected(format!("Lock error: {}", e)))?;
            images.insert(name.clone(), StoredImage { bytes, metadata });
            Ok(ImageRef(name))
        })
    }

    fn download_url(&self, image: &ImageRef) -> BoxFuture<'_, UploadResult<String>> {
        let name = image.0.clone();
        Box::pin(async move {
            let images = self
                .images
                .read()
                .map_err(|e| UploadError::Rejected(format!("Lock error: {}", e)))?;
            if !images.contains_key(&name) {
                return Err(UploadError::NotFound(name));
            }
            Ok(format!("memory://{}", name))
        })
    }
}
