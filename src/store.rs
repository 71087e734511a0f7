//! Object store for collections and containers
//!
//! The engine talks to storage only through [`ObjectStore`]. [`FileStore`]
//! keeps one directory per collection and one per container:
//!
//! ```text
//! store/
//! └── {collection}/
//!     └── {container}/
//!         ├── 2024-05-01T10:00:00Z_thesis.zip   # content, timestamp-prefixed
//!         ├── sword_atom.xml                    # source Atom entry
//!         ├── sword_metadata.json               # extracted metadata
//!         ├── sword_statement.rdf               # statement (RDF/XML)
//!         ├── sword_statement.atom              # statement (Atom feed)
//!         └── sword_receipt.xml                 # cached deposit receipt
//! ```
//!
//! Every `store_*` call overwrites its artifact in full. Nothing is
//! transactional across artifacts; callers sequence their writes.

use crate::error::ServerError;
use crate::statement::Statement;
use crate::uri_manager::StatementFormat;
use async_trait::async_trait;
use chrono::Utc;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, info};

use crate::namespaces::DATE_FORMAT;

/// Extracted metadata: term -> values, e.g. `title -> ["My Thesis"]`
pub type Metadata = BTreeMap<String, Vec<String>>;

/// Prefix reserved for protocol-internal files
pub const INTERNAL_PREFIX: &str = "sword_";

const ATOM_FILE: &str = "sword_atom.xml";
const METADATA_FILE: &str = "sword_metadata.json";
const STATEMENT_RDF_FILE: &str = "sword_statement.rdf";
const STATEMENT_ATOM_FILE: &str = "sword_statement.atom";
const RECEIPT_FILE: &str = "sword_receipt.xml";

/// Identity of a container
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ContainerId {
    pub collection: String,
    pub id: String,
}

impl ContainerId {
    pub fn new(collection: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            collection: collection.into(),
            id: id.into(),
        }
    }
}

impl std::fmt::Display for ContainerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.collection, self.id)
    }
}

#[async_trait]
pub trait ObjectStore: Send + Sync + 'static {
    async fn collection_names(&self) -> Result<Vec<String>, ServerError>;

    async fn collection_exists(&self, collection: &str) -> Result<bool, ServerError>;

    async fn container_exists(&self, oid: &ContainerId) -> Result<bool, ServerError>;

    async fn list_containers(&self, collection: &str) -> Result<Vec<String>, ServerError>;

    async fn create_collection(&self, collection: &str) -> Result<(), ServerError>;

    /// Create a container. A suggested id is honoured only if it is a safe
    /// path segment and not already taken; otherwise a fresh UUID is used.
    async fn create_container(
        &self,
        collection: &str,
        suggested_id: Option<&str>,
    ) -> Result<ContainerId, ServerError>;

    /// Store content under a collision-free, timestamp-prefixed name, which is returned
    async fn store_content(
        &self,
        oid: &ContainerId,
        content: &[u8],
        filename: &str,
    ) -> Result<String, ServerError>;

    /// Store a file under exactly `filename` (derived resources, packager artifacts)
    async fn store_file(
        &self,
        oid: &ContainerId,
        filename: &str,
        content: &[u8],
    ) -> Result<PathBuf, ServerError>;

    async fn store_atom(&self, oid: &ContainerId, atom: &[u8]) -> Result<(), ServerError>;

    async fn store_metadata(&self, oid: &ContainerId, metadata: &Metadata) -> Result<(), ServerError>;

    /// Writes both the RDF and the Atom feed serialisations
    async fn store_statement(&self, oid: &ContainerId, statement: &Statement) -> Result<(), ServerError>;

    async fn store_receipt(&self, oid: &ContainerId, receipt: &str) -> Result<(), ServerError>;

    /// Remove everything except the statement and receipt. The source Atom
    /// document and the extracted metadata survive when `keep_metadata` is set.
    async fn remove_content(&self, oid: &ContainerId, keep_metadata: bool) -> Result<(), ServerError>;

    /// Remove the container and everything in it. Absent containers are a no-op.
    async fn remove_container(&self, oid: &ContainerId) -> Result<(), ServerError>;

    /// Statement of the container, or an empty one if none has been stored
    async fn load_statement(&self, oid: &ContainerId) -> Result<Statement, ServerError>;

    /// Extracted metadata, or an empty map if none has been stored
    async fn load_metadata(&self, oid: &ContainerId) -> Result<Metadata, ServerError>;

    async fn read_receipt(&self, oid: &ContainerId) -> Result<Option<String>, ServerError>;

    async fn read_statement(
        &self,
        oid: &ContainerId,
        format: StatementFormat,
    ) -> Result<Option<String>, ServerError>;

    /// Content files of the container; internal files are never listed
    async fn list_content(&self, oid: &ContainerId) -> Result<Vec<String>, ServerError>;

    async fn read_file(&self, oid: &ContainerId, filename: &str) -> Result<Option<Vec<u8>>, ServerError>;

    /// Filesystem location of a file in the container
    fn file_path(&self, oid: &ContainerId, filename: &str) -> Result<PathBuf, ServerError>;
}

/// A path segment that cannot escape its parent directory
pub fn is_safe_segment(segment: &str) -> bool {
    !segment.is_empty()
        && segment != "."
        && segment != ".."
        && !segment.contains(['/', '\\', '\0'])
}

/// Representation suffixes the router strips off container URIs
const RESERVED_SUFFIXES: [&str; 2] = [".atom", ".rdf"];

/// Client-suggested ids are restricted to a conservative character set and
/// may not end in a representation suffix, or the id would alias another
/// container's feed or statement URI
pub fn is_acceptable_slug(slug: &str) -> bool {
    is_safe_segment(slug)
        && !slug.starts_with('.')
        && !RESERVED_SUFFIXES.iter().any(|suffix| slug.ends_with(suffix))
        && slug
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'))
}

/// Strip any directory part a client put in a filename
pub fn sanitize_filename(filename: &str) -> String {
    let base = filename.rsplit(['/', '\\']).next().unwrap_or("").trim();
    if is_safe_segment(base) {
        base.to_string()
    } else {
        "unnamed.file".to_string()
    }
}

/// Filesystem-backed store
pub struct FileStore {
    root_dir: PathBuf,
}

impl FileStore {
    /// Create a file store at the given directory
    pub async fn new<P: AsRef<Path>>(root_dir: P) -> Result<Self, ServerError> {
        let root_dir = root_dir.as_ref().to_path_buf();

        fs::create_dir_all(&root_dir).await?;

        info!(path = %root_dir.display(), "Initialized object store");

        Ok(Self { root_dir })
    }

    /// Top up the store to `count` collections, named with fresh UUIDs.
    /// Existing collections are never removed.
    pub async fn provision_collections(&self, count: usize) -> Result<Vec<String>, ServerError> {
        let existing = self.collection_names().await?;
        for _ in existing.len()..count {
            let name = uuid::Uuid::new_v4().to_string();
            self.create_collection(&name).await?;
        }
        self.collection_names().await
    }

    fn collection_dir(&self, collection: &str) -> Result<PathBuf, ServerError> {
        if !is_safe_segment(collection) {
            return Err(ServerError::Internal(format!("unsafe collection name: {}", collection)));
        }
        Ok(self.root_dir.join(collection))
    }

    fn container_dir(&self, oid: &ContainerId) -> Result<PathBuf, ServerError> {
        if !is_safe_segment(&oid.id) {
            return Err(ServerError::Internal(format!("unsafe container id: {}", oid.id)));
        }
        Ok(self.collection_dir(&oid.collection)?.join(&oid.id))
    }

    async fn list_dir(dir: &Path, dirs_only: bool) -> Result<Vec<String>, ServerError> {
        let mut names = Vec::new();
        let mut entries = fs::read_dir(dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let is_dir = entry.file_type().await?.is_dir();
            if is_dir == dirs_only {
                names.push(entry.file_name().to_string_lossy().into_owned());
            }
        }
        names.sort();
        Ok(names)
    }

    async fn read_optional(path: &Path) -> Result<Option<Vec<u8>>, ServerError> {
        match fs::read(path).await {
            Ok(data) => Ok(Some(data)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn read_optional_string(path: &Path) -> Result<Option<String>, ServerError> {
        Ok(Self::read_optional(path)
            .await?
            .map(|data| String::from_utf8_lossy(&data).into_owned()))
    }
}

#[async_trait]
impl ObjectStore for FileStore {
    async fn collection_names(&self) -> Result<Vec<String>, ServerError> {
        Self::list_dir(&self.root_dir, true).await
    }

    async fn collection_exists(&self, collection: &str) -> Result<bool, ServerError> {
        if !is_safe_segment(collection) {
            return Ok(false);
        }
        Ok(fs::metadata(self.collection_dir(collection)?)
            .await
            .map(|m| m.is_dir())
            .unwrap_or(false))
    }

    async fn container_exists(&self, oid: &ContainerId) -> Result<bool, ServerError> {
        if !is_safe_segment(&oid.collection) || !is_safe_segment(&oid.id) {
            return Ok(false);
        }
        Ok(fs::metadata(self.container_dir(oid)?)
            .await
            .map(|m| m.is_dir())
            .unwrap_or(false))
    }

    async fn list_containers(&self, collection: &str) -> Result<Vec<String>, ServerError> {
        Self::list_dir(&self.collection_dir(collection)?, true).await
    }

    async fn create_collection(&self, collection: &str) -> Result<(), ServerError> {
        fs::create_dir_all(self.collection_dir(collection)?).await?;
        info!(collection = %collection, "Created collection");
        Ok(())
    }

    async fn create_container(
        &self,
        collection: &str,
        suggested_id: Option<&str>,
    ) -> Result<ContainerId, ServerError> {
        let mut oid = match suggested_id.filter(|s| is_acceptable_slug(s)) {
            Some(slug) => ContainerId::new(collection, slug),
            None => ContainerId::new(collection, uuid::Uuid::new_v4().to_string()),
        };

        // create_dir fails on an existing directory, so claiming an id is atomic
        loop {
            match fs::create_dir(self.container_dir(&oid)?).await {
                Ok(()) => break,
                Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                    debug!(collection = %collection, id = %oid.id, "Container id taken, generating a new one");
                    oid.id = uuid::Uuid::new_v4().to_string();
                }
                Err(e) => return Err(e.into()),
            }
        }

        info!(container = %oid, "Created container");
        Ok(oid)
    }

    async fn store_content(
        &self,
        oid: &ContainerId,
        content: &[u8],
        filename: &str,
    ) -> Result<String, ServerError> {
        let dir = self.container_dir(oid)?;
        let filename = sanitize_filename(filename);
        let stamp = Utc::now().format(DATE_FORMAT);

        let mut stored = format!("{}_{}", stamp, filename);
        let mut counter = 1;
        while fs::metadata(dir.join(&stored)).await.is_ok() {
            stored = format!("{}-{}_{}", stamp, counter, filename);
            counter += 1;
        }

        fs::write(dir.join(&stored), content).await?;
        info!(container = %oid, file = %stored, size = content.len(), "Stored content");
        Ok(stored)
    }

    async fn store_file(
        &self,
        oid: &ContainerId,
        filename: &str,
        content: &[u8],
    ) -> Result<PathBuf, ServerError> {
        let path = self.file_path(oid, filename)?;
        fs::write(&path, content).await?;
        debug!(container = %oid, file = %filename, size = content.len(), "Stored file");
        Ok(path)
    }

    async fn store_atom(&self, oid: &ContainerId, atom: &[u8]) -> Result<(), ServerError> {
        fs::write(self.container_dir(oid)?.join(ATOM_FILE), atom).await?;
        Ok(())
    }

    async fn store_metadata(&self, oid: &ContainerId, metadata: &Metadata) -> Result<(), ServerError> {
        let json = serde_json::to_vec_pretty(metadata)?;
        fs::write(self.container_dir(oid)?.join(METADATA_FILE), json).await?;
        Ok(())
    }

    async fn store_statement(&self, oid: &ContainerId, statement: &Statement) -> Result<(), ServerError> {
        let dir = self.container_dir(oid)?;
        fs::write(dir.join(STATEMENT_RDF_FILE), statement.to_rdf_xml()?).await?;
        fs::write(dir.join(STATEMENT_ATOM_FILE), statement.to_atom_feed()?).await?;
        debug!(container = %oid, deposits = statement.original_deposits.len(), "Stored statement");
        Ok(())
    }

    async fn store_receipt(&self, oid: &ContainerId, receipt: &str) -> Result<(), ServerError> {
        fs::write(self.container_dir(oid)?.join(RECEIPT_FILE), receipt).await?;
        Ok(())
    }

    async fn remove_content(&self, oid: &ContainerId, keep_metadata: bool) -> Result<(), ServerError> {
        let dir = self.container_dir(oid)?;
        let mut entries = match fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(e.into()),
        };

        let mut removed = 0usize;
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name().to_string_lossy().into_owned();
            let protected = name == STATEMENT_RDF_FILE
                || name == STATEMENT_ATOM_FILE
                || name == RECEIPT_FILE
                || (keep_metadata && (name == METADATA_FILE || name == ATOM_FILE));
            if protected {
                continue;
            }
            if entry.file_type().await?.is_dir() {
                fs::remove_dir_all(entry.path()).await?;
            } else {
                fs::remove_file(entry.path()).await?;
            }
            removed += 1;
        }

        info!(container = %oid, removed = removed, keep_metadata = keep_metadata, "Removed content");
        Ok(())
    }

    async fn remove_container(&self, oid: &ContainerId) -> Result<(), ServerError> {
        if !self.container_exists(oid).await? {
            return Ok(());
        }
        fs::remove_dir_all(self.container_dir(oid)?).await?;
        info!(container = %oid, "Removed container");
        Ok(())
    }

    async fn load_statement(&self, oid: &ContainerId) -> Result<Statement, ServerError> {
        match Self::read_optional(&self.container_dir(oid)?.join(STATEMENT_RDF_FILE)).await? {
            Some(rdf) => Statement::parse(&rdf),
            None => Ok(Statement::default()),
        }
    }

    async fn load_metadata(&self, oid: &ContainerId) -> Result<Metadata, ServerError> {
        match Self::read_optional(&self.container_dir(oid)?.join(METADATA_FILE)).await? {
            Some(json) => Ok(serde_json::from_slice(&json)?),
            None => Ok(Metadata::new()),
        }
    }

    async fn read_receipt(&self, oid: &ContainerId) -> Result<Option<String>, ServerError> {
        Self::read_optional_string(&self.container_dir(oid)?.join(RECEIPT_FILE)).await
    }

    async fn read_statement(
        &self,
        oid: &ContainerId,
        format: StatementFormat,
    ) -> Result<Option<String>, ServerError> {
        let file = match format {
            StatementFormat::Rdf => STATEMENT_RDF_FILE,
            StatementFormat::Atom => STATEMENT_ATOM_FILE,
        };
        Self::read_optional_string(&self.container_dir(oid)?.join(file)).await
    }

    async fn list_content(&self, oid: &ContainerId) -> Result<Vec<String>, ServerError> {
        let files = Self::list_dir(&self.container_dir(oid)?, false).await?;
        Ok(files
            .into_iter()
            .filter(|f| !f.starts_with(INTERNAL_PREFIX))
            .collect())
    }

    async fn read_file(&self, oid: &ContainerId, filename: &str) -> Result<Option<Vec<u8>>, ServerError> {
        if !is_safe_segment(filename) || !self.container_exists(oid).await? {
            return Ok(None);
        }
        Self::read_optional(&self.file_path(oid, filename)?).await
    }

    fn file_path(&self, oid: &ContainerId, filename: &str) -> Result<PathBuf, ServerError> {
        if !is_safe_segment(filename) {
            return Err(ServerError::Internal(format!("unsafe file name: {}", filename)));
        }
        Ok(self.container_dir(oid)?.join(filename))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    async fn store_with_collection() -> (TempDir, FileStore) {
        let temp_dir = TempDir::new().unwrap();
        let store = FileStore::new(temp_dir.path()).await.unwrap();
        store.create_collection("c1").await.unwrap();
        (temp_dir, store)
    }

    #[tokio::test]
    async fn test_provision_collections() {
        let temp_dir = TempDir::new().unwrap();
        let store = FileStore::new(temp_dir.path()).await.unwrap();
        assert_eq!(store.provision_collections(3).await.unwrap().len(), 3);
        // Topping up never removes
        assert_eq!(store.provision_collections(2).await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_create_container_slug_policy() {
        let (_dir, store) = store_with_collection().await;

        let first = store.create_container("c1", Some("my-item")).await.unwrap();
        assert_eq!(first.id, "my-item");

        let second = store.create_container("c1", Some("my-item")).await.unwrap();
        assert_ne!(second.id, "my-item");
        assert!(store.container_exists(&first).await.unwrap());
        assert!(store.container_exists(&second).await.unwrap());

        let unsafe_slug = store.create_container("c1", Some("../escape")).await.unwrap();
        assert_ne!(unsafe_slug.id, "../escape");

        // Suffixes the router reads as a representation are never used as ids
        for slug in ["item.atom", "item.rdf"] {
            let oid = store.create_container("c1", Some(slug)).await.unwrap();
            assert_ne!(oid.id, slug);
        }
        assert!(is_acceptable_slug("report.v2.pdf"));
        assert!(!is_acceptable_slug("feed.atom"));
    }

    #[tokio::test]
    async fn test_create_container_claims_each_id_once() {
        let (_dir, store) = store_with_collection().await;
        let store = std::sync::Arc::new(store);

        let mut handles = Vec::new();
        for _ in 0..8 {
            let store = std::sync::Arc::clone(&store);
            handles.push(tokio::spawn(async move {
                store.create_container("c1", Some("shared")).await.unwrap()
            }));
        }
        let mut ids = std::collections::HashSet::new();
        for handle in handles {
            assert!(ids.insert(handle.await.unwrap().id));
        }
        assert!(ids.contains("shared"));
        assert_eq!(store.list_containers("c1").await.unwrap().len(), 8);
    }

    #[tokio::test]
    async fn test_create_container_requires_collection() {
        let (_dir, store) = store_with_collection().await;
        assert!(store.create_container("missing", None).await.is_err());
    }

    #[tokio::test]
    async fn test_content_names_are_collision_free() {
        let (_dir, store) = store_with_collection().await;
        let oid = store.create_container("c1", None).await.unwrap();

        let a = store.store_content(&oid, b"one", "file.zip").await.unwrap();
        let b = store.store_content(&oid, b"two", "file.zip").await.unwrap();
        assert_ne!(a, b);
        assert!(a.ends_with("_file.zip"));
        assert_eq!(store.read_file(&oid, &a).await.unwrap().unwrap(), b"one");
        assert_eq!(store.read_file(&oid, &b).await.unwrap().unwrap(), b"two");
    }

    #[tokio::test]
    async fn test_remove_content_keeps_internal_files() {
        let (_dir, store) = store_with_collection().await;
        let oid = store.create_container("c1", None).await.unwrap();

        let mut metadata = Metadata::new();
        metadata.insert("title".to_string(), vec!["Kept".to_string()]);
        store.store_content(&oid, b"data", "a.bin").await.unwrap();
        store.store_metadata(&oid, &metadata).await.unwrap();
        store.store_atom(&oid, b"<entry/>").await.unwrap();
        store.store_statement(&oid, &Statement::new("agg", "rem")).await.unwrap();
        store.store_receipt(&oid, "<entry/>").await.unwrap();

        store.remove_content(&oid, true).await.unwrap();
        assert!(store.list_content(&oid).await.unwrap().is_empty());
        assert_eq!(store.load_metadata(&oid).await.unwrap(), metadata);
        let atom_path = store.container_dir(&oid).unwrap().join(ATOM_FILE);
        assert!(fs::try_exists(&atom_path).await.unwrap());
        assert!(store.read_receipt(&oid).await.unwrap().is_some());

        store.remove_content(&oid, false).await.unwrap();
        assert!(store.load_metadata(&oid).await.unwrap().is_empty());
        assert!(!fs::try_exists(&atom_path).await.unwrap());
        assert_eq!(store.load_statement(&oid).await.unwrap().rem_uri, "rem");
    }

    #[tokio::test]
    async fn test_absent_artifacts_load_as_defaults() {
        let (_dir, store) = store_with_collection().await;
        let oid = store.create_container("c1", None).await.unwrap();

        assert_eq!(store.load_statement(&oid).await.unwrap(), Statement::default());
        assert!(store.load_metadata(&oid).await.unwrap().is_empty());
        assert!(store.read_receipt(&oid).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_remove_container_is_idempotent() {
        let (_dir, store) = store_with_collection().await;
        let oid = store.create_container("c1", None).await.unwrap();
        store.store_content(&oid, b"x", "x").await.unwrap();

        store.remove_container(&oid).await.unwrap();
        assert!(!store.container_exists(&oid).await.unwrap());
        store.remove_container(&oid).await.unwrap();
    }

    #[tokio::test]
    async fn test_unsafe_paths() {
        let (_dir, store) = store_with_collection().await;
        assert!(!store.collection_exists("..").await.unwrap());
        assert!(!store.container_exists(&ContainerId::new("c1", "..")).await.unwrap());

        let oid = store.create_container("c1", None).await.unwrap();
        assert!(store.read_file(&oid, "../x").await.unwrap().is_none());
        assert_eq!(sanitize_filename("../../etc/passwd"), "passwd");
        assert_eq!(sanitize_filename(""), "unnamed.file");
    }
}
