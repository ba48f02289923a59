use crate::error::ResourceError;
use crate::http::content_type;
use memmap2::Mmap;
use std::collections::HashMap;
use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Looks up the bytes behind a request path
pub trait ResourceProvider: Send + Sync {
    fn resolve(&self, root_dir: &Path, path: &str) -> Result<Resource, ResourceError>;
}

enum Body {
    Mapped(Mmap),
    Shared(Arc<[u8]>),
    Empty,
}

/// Resolved file contents. A mapped file is unmapped when this is dropped.
pub struct Resource {
    body: Body,
    content_type: &'static str,
}

impl Resource {
    pub fn from_bytes(bytes: impl Into<Arc<[u8]>>, content_type: &'static str) -> Self {
        Self {
            body: Body::Shared(bytes.into()),
            content_type,
        }
    }

    pub fn as_bytes(&self) -> &[u8] {
        match &self.body {
            Body::Mapped(map) => &map[..],
            Body::Shared(bytes) => &bytes[..],
            Body::Empty => &[],
        }
    }

    pub fn len(&self) -> usize {
        self.as_bytes().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn content_type(&self) -> &'static str {
        self.content_type
    }

    pub fn is_mapped(&self) -> bool {
        matches!(self.body, Body::Mapped(_))
    }
}

/// Join a request path onto `root`, skipping segments that could escape it
pub fn safe_join(root: &Path, path: &str) -> PathBuf {
    let mut fs_path = root.to_path_buf();
    for segment in path.split('/') {
        // Skip empty segments and prevent directory traversal
        if segment.is_empty() || segment == "." || segment == ".." {
            continue;
        }
        fs_path.push(segment);
    }
    fs_path
}

/// Serves files from disk through read-only memory maps
#[derive(Debug, Default, Clone, Copy)]
pub struct MmapResourceProvider;

impl ResourceProvider for MmapResourceProvider {
    fn resolve(&self, root_dir: &Path, path: &str) -> Result<Resource, ResourceError> {
        let fs_path = safe_join(root_dir, path);

        let meta = match fs::metadata(&fs_path) {
            Ok(meta) if meta.is_file() => meta,
            _ => return Err(ResourceError::NotFound(fs_path)),
        };

        let file = File::open(&fs_path).map_err(|source| ResourceError::Io {
            path: fs_path.clone(),
            source,
        })?;

        let content_type = content_type(path);
        if meta.len() == 0 {
            return Ok(Resource { body: Body::Empty, content_type });
        }

        // The mapping is private and read-only; the file is not expected to
        // be truncated while served.
        let map = unsafe { Mmap::map(&file) }.map_err(|source| ResourceError::Io {
            path: fs_path.clone(),
            source,
        })?;

        Ok(Resource { body: Body::Mapped(map), content_type })
    }
}

/// Serves a fixed set of in-memory files keyed by request path
#[derive(Debug, Default, Clone)]
pub struct MemoryResourceProvider {
    files: HashMap<String, Arc<[u8]>>,
}

impl MemoryResourceProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_file(mut self, path: &str, contents: &[u8]) -> Self {
        self.files.insert(path.to_string(), Arc::from(contents));
        self
    }
}

impl ResourceProvider for MemoryResourceProvider {
    fn resolve(&self, root_dir: &Path, path: &str) -> Result<Resource, ResourceError> {
        self.files
            .get(path)
            .map(|bytes| Resource::from_bytes(bytes.clone(), content_type(path)))
            .ok_or_else(|| ResourceError::NotFound(safe_join(root_dir, path)))
    }
}
