//! Ingest and dissemination packagers
//!
//! Ingesters run over content just stored in a container and may derive
//! further resources from it. Disseminators produce a single artifact file
//! representing the media resource in a negotiated format.
//!
//! | Key | Packager |
//! |-----|----------|
//! | `package/Binary` | [`BinaryIngester`] (opaque) |
//! | `package/SimpleZip` | [`SimpleZipIngester`] (unpacks members) |
//! | `package/METSDSpaceSIP` | [`BinaryIngester`] (stored opaque) |
//! | `application/zip` (+ SimpleZip) | [`DefaultDisseminator`] |
//! | `application/atom+xml;type=feed` | [`FeedDisseminator`] |

use crate::error::ServerError;
use crate::namespaces::{packaging, ATOM_NS, DATE_FORMAT, DC_NS};
use crate::negotiator::ContentType;
use crate::store::{sanitize_filename, ContainerId, Metadata, ObjectStore, INTERNAL_PREFIX};
use crate::uri_manager::UriManager;
use crate::xml::{self, DocWriter};
use async_trait::async_trait;
use chrono::Utc;
use quick_xml::events::Event;
use quick_xml::NsReader;
use std::collections::HashMap;
use std::io::{Cursor, Read, Write};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Artifact written by [`DefaultDisseminator`]
pub const ZIP_ARTIFACT: &str = "sword_default-package.zip";

/// Artifact written by [`FeedDisseminator`]
pub const FEED_ARTIFACT: &str = "sword_media-feed.xml";

/// Upper bound on the bytes unpacked from one SimpleZip deposit
const MAX_EXTRACTED_BYTES: u64 = 512 * 1024 * 1024;

#[async_trait]
pub trait IngestPackager: Send + Sync {
    /// Inspect `stored_filename` in the container. Returns the names of
    /// derived resources written next to it. Must not touch extracted
    /// metadata when `metadata_relevant` is false.
    async fn ingest(
        &self,
        store: &dyn ObjectStore,
        oid: &ContainerId,
        stored_filename: &str,
        metadata_relevant: bool,
    ) -> Result<Vec<String>, ServerError>;
}

#[async_trait]
pub trait DisseminationPackager: Send + Sync {
    /// Packaging URI of the produced artifact, if it has one
    fn packaging(&self) -> Option<&'static str>;

    /// Produce (or refresh) the artifact and return its path
    async fn package(
        &self,
        store: &dyn ObjectStore,
        uris: &UriManager,
        oid: &ContainerId,
    ) -> Result<PathBuf, ServerError>;
}

/// Leaves the deposit as an opaque file
pub struct BinaryIngester;

#[async_trait]
impl IngestPackager for BinaryIngester {
    async fn ingest(
        &self,
        _store: &dyn ObjectStore,
        oid: &ContainerId,
        stored_filename: &str,
        _metadata_relevant: bool,
    ) -> Result<Vec<String>, ServerError> {
        debug!(container = %oid, file = %stored_filename, "Binary deposit, nothing to unpack");
        Ok(Vec::new())
    }
}

/// Unpacks the members of a ZIP deposit into the container
pub struct SimpleZipIngester;

impl SimpleZipIngester {
    /// Read every file member. Directory structure is flattened; members
    /// colliding with internal names are skipped.
    fn extract(data: &[u8]) -> Result<Vec<(String, Vec<u8>)>, ServerError> {
        let mut archive = zip::ZipArchive::new(Cursor::new(data))?;
        let mut files = Vec::new();
        let mut total: u64 = 0;

        for i in 0..archive.len() {
            let mut file = archive.by_index(i)?;
            if !file.is_file() {
                continue;
            }
            let name = sanitize_filename(file.name());
            if name.starts_with(INTERNAL_PREFIX) {
                warn!(member = %file.name(), "Skipping zip member with reserved name");
                continue;
            }
            total += file.size();
            if total > MAX_EXTRACTED_BYTES {
                return Err(ServerError::Internal(
                    "zip package expands beyond the extraction limit".to_string(),
                ));
            }
            let mut contents = Vec::new();
            file.read_to_end(&mut contents)?;
            files.push((name, contents));
        }

        Ok(files)
    }
}

#[async_trait]
impl IngestPackager for SimpleZipIngester {
    async fn ingest(
        &self,
        store: &dyn ObjectStore,
        oid: &ContainerId,
        stored_filename: &str,
        _metadata_relevant: bool,
    ) -> Result<Vec<String>, ServerError> {
        let data = store
            .read_file(oid, stored_filename)
            .await?
            .ok_or_else(|| ServerError::Internal(format!("stored file vanished: {}", stored_filename)))?;

        let extracted = tokio::task::spawn_blocking(move || Self::extract(&data))
            .await
            .map_err(|e| ServerError::Internal(format!("unzip task failed: {}", e)))?;

        let members = match extracted {
            Ok(members) => members,
            Err(ServerError::Zip(e)) => {
                // Not a readable zip: keep the deposit as an opaque file
                warn!(container = %oid, error = %e, "SimpleZip deposit is not a valid zip");
                return Ok(Vec::new());
            }
            Err(e) => return Err(e),
        };

        let mut derived = Vec::with_capacity(members.len());
        for (name, contents) in members {
            if name == stored_filename {
                continue;
            }
            store.store_file(oid, &name, &contents).await?;
            derived.push(name);
        }

        info!(container = %oid, derived = derived.len(), "Unpacked SimpleZip deposit");
        Ok(derived)
    }
}

/// Stores the Atom entry of a deposit and extracts its metadata
#[derive(Debug, Default, Clone, Copy)]
pub struct EntryIngester;

impl EntryIngester {
    /// Pull metadata out of an Atom entry. Atom fields map to
    /// `title`, `date`, `creator` and `abstract`; any `dcterms:*` child then
    /// sets the term named by its local name, replacing the Atom-derived value.
    pub fn extract(atom: &[u8]) -> Result<Metadata, ServerError> {
        let text = std::str::from_utf8(atom)
            .map_err(|e| ServerError::Internal(format!("entry is not UTF-8: {}", e)))?;
        let mut reader = NsReader::from_str(text);

        let mut from_atom = Metadata::new();
        let mut from_dc = Metadata::new();
        let mut depth = 0usize;
        let mut saw_entry = false;
        let mut target: Option<(String, bool)> = None;
        let mut parts: Vec<String> = Vec::new();

        loop {
            let (resolved, event) = reader.read_resolved_event()?;
            let ns = xml::namespace_of(&resolved);
            match event {
                Event::Start(ref el) => {
                    depth += 1;
                    let local = String::from_utf8_lossy(el.local_name().as_ref()).into_owned();
                    if depth == 1 {
                        if ns.as_deref() != Some(ATOM_NS) || local != "entry" {
                            return Err(ServerError::Internal(
                                "document root is not an atom:entry".to_string(),
                            ));
                        }
                        saw_entry = true;
                    } else if depth == 2 {
                        parts.clear();
                        target = match ns.as_deref() {
                            Some(ATOM_NS) => match local.as_str() {
                                "title" => Some(("title".to_string(), false)),
                                "updated" => Some(("date".to_string(), false)),
                                "author" => Some(("creator".to_string(), false)),
                                "summary" => Some(("abstract".to_string(), false)),
                                _ => None,
                            },
                            Some(DC_NS) => Some((local, true)),
                            _ => None,
                        };
                    }
                }
                Event::Empty(ref el) if depth == 0 => {
                    let is_entry = ns.as_deref() == Some(ATOM_NS) && el.local_name().as_ref() == b"entry";
                    if !is_entry {
                        return Err(ServerError::Internal(
                            "document root is not an atom:entry".to_string(),
                        ));
                    }
                    saw_entry = true;
                }
                Event::Text(t) if target.is_some() => {
                    let value = t.unescape()?;
                    let value = value.trim();
                    if !value.is_empty() {
                        parts.push(value.to_string());
                    }
                }
                Event::CData(c) if target.is_some() => {
                    let value = String::from_utf8_lossy(&c.into_inner()).trim().to_string();
                    if !value.is_empty() {
                        parts.push(value);
                    }
                }
                Event::End(_) => {
                    if depth == 2 {
                        if let Some((key, is_dc)) = target.take() {
                            let value = parts.join(" ");
                            if !value.is_empty() {
                                let map = if is_dc { &mut from_dc } else { &mut from_atom };
                                map.entry(key).or_default().push(value);
                            }
                        }
                    }
                    depth = depth.saturating_sub(1);
                }
                Event::Eof => break,
                _ => {}
            }
        }

        if !saw_entry {
            return Err(ServerError::Internal("empty entry document".to_string()));
        }

        from_atom.extend(from_dc);
        Ok(from_atom)
    }

    /// Store the entry and its metadata. In additive mode values are merged
    /// into what the container already has; otherwise they replace it.
    pub async fn ingest(
        &self,
        store: &dyn ObjectStore,
        oid: &ContainerId,
        atom: &[u8],
        additive: bool,
    ) -> Result<Metadata, ServerError> {
        let extracted = Self::extract(atom)?;
        store.store_atom(oid, atom).await?;

        let metadata = if additive {
            let mut merged = store.load_metadata(oid).await?;
            for (key, values) in extracted {
                let existing = merged.entry(key).or_default();
                for value in values {
                    if !existing.contains(&value) {
                        existing.push(value);
                    }
                }
            }
            merged
        } else {
            extracted
        };

        store.store_metadata(oid, &metadata).await?;
        debug!(container = %oid, terms = metadata.len(), additive = additive, "Ingested entry");
        Ok(metadata)
    }
}

/// Zips every content file of the container
pub struct DefaultDisseminator;

impl DefaultDisseminator {
    fn build_zip(files: Vec<(String, Vec<u8>)>) -> Result<Vec<u8>, ServerError> {
        let mut writer = zip::ZipWriter::new(Cursor::new(Vec::new()));
        let options = zip::write::SimpleFileOptions::default()
            .compression_method(zip::CompressionMethod::Deflated);
        for (name, data) in files {
            writer.start_file(name, options)?;
            writer.write_all(&data)?;
        }
        Ok(writer.finish()?.into_inner())
    }
}

#[async_trait]
impl DisseminationPackager for DefaultDisseminator {
    fn packaging(&self) -> Option<&'static str> {
        Some(packaging::SIMPLE_ZIP)
    }

    async fn package(
        &self,
        store: &dyn ObjectStore,
        _uris: &UriManager,
        oid: &ContainerId,
    ) -> Result<PathBuf, ServerError> {
        let mut files = Vec::new();
        for name in store.list_content(oid).await? {
            if let Some(data) = store.read_file(oid, &name).await? {
                files.push((name, data));
            }
        }
        let count = files.len();

        let zipped = tokio::task::spawn_blocking(move || Self::build_zip(files))
            .await
            .map_err(|e| ServerError::Internal(format!("zip task failed: {}", e)))??;

        let path = store.store_file(oid, ZIP_ARTIFACT, &zipped).await?;
        debug!(container = %oid, files = count, "Built zip package");
        Ok(path)
    }
}

/// Materialises an Atom feed listing the container's files
pub struct FeedDisseminator;

#[async_trait]
impl DisseminationPackager for FeedDisseminator {
    fn packaging(&self) -> Option<&'static str> {
        None
    }

    async fn package(
        &self,
        store: &dyn ObjectStore,
        uris: &UriManager,
        oid: &ContainerId,
    ) -> Result<PathBuf, ServerError> {
        let updated = Utc::now().format(DATE_FORMAT).to_string();
        let em_uri = uris.em_uri(oid);

        let mut doc = DocWriter::new()?;
        doc.start("feed", &[("xmlns", ATOM_NS)])?;
        doc.text("id", &[], &format!("{}.atom", em_uri))?;
        doc.text("title", &[], &format!("Media resource of {}", oid))?;
        doc.text("updated", &[], &updated)?;
        doc.empty("link", &[("rel", "self"), ("href", format!("{}.atom", em_uri).as_str())])?;

        for name in store.list_content(oid).await? {
            let part = uris.part_uri(oid, &name);
            doc.start("entry", &[])?;
            doc.text("id", &[], &part)?;
            doc.text("title", &[], &name)?;
            doc.text("updated", &[], &updated)?;
            doc.empty("link", &[("rel", "edit-media"), ("href", part.as_str())])?;
            doc.empty(
                "content",
                &[("type", guess_content_type(&name)), ("src", part.as_str())],
            )?;
            doc.end("entry")?;
        }
        doc.end("feed")?;

        store.store_file(oid, FEED_ARTIFACT, doc.finish().as_bytes()).await
    }
}

/// Guess a MIME type from a file extension
pub fn guess_content_type(name: &str) -> &'static str {
    match name.rsplit('.').next().map(|e| e.to_ascii_lowercase()).as_deref() {
        Some("zip") => "application/zip",
        Some("xml") => "application/xml",
        Some("pdf") => "application/pdf",
        Some("txt") => "text/plain",
        Some("html") | Some("htm") => "text/html",
        Some("json") => "application/json",
        Some("png") => "image/png",
        Some("jpg") | Some("jpeg") => "image/jpeg",
        Some("gif") => "image/gif",
        _ => "application/octet-stream",
    }
}

/// Packagers keyed by packaging URI (ingest) and media format (dissemination)
pub struct PackagerRegistry {
    ingesters: HashMap<String, Arc<dyn IngestPackager>>,
    disseminators: HashMap<String, Arc<dyn DisseminationPackager>>,
    fallback: Arc<dyn IngestPackager>,
    entry: EntryIngester,
}

impl PackagerRegistry {
    /// An empty registry; unknown packaging is ingested as binary
    pub fn new() -> Self {
        Self {
            ingesters: HashMap::new(),
            disseminators: HashMap::new(),
            fallback: Arc::new(BinaryIngester),
            entry: EntryIngester,
        }
    }

    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register_ingester(packaging::BINARY, Arc::new(BinaryIngester));
        registry.register_ingester(packaging::SIMPLE_ZIP, Arc::new(SimpleZipIngester));
        registry.register_ingester(packaging::METS_DSPACE_SIP, Arc::new(BinaryIngester));

        let zip: Arc<dyn DisseminationPackager> = Arc::new(DefaultDisseminator);
        registry.register_disseminator(
            &ContentType::from_mimetype("application/zip", Some(packaging::SIMPLE_ZIP)),
            zip.clone(),
        );
        registry.register_disseminator(&ContentType::from_mimetype("application/zip", None), zip);
        registry.register_disseminator(
            &ContentType::from_mimetype("application/atom+xml;type=feed", None),
            Arc::new(FeedDisseminator),
        );
        registry
    }

    pub fn register_ingester(&mut self, packaging: &str, packager: Arc<dyn IngestPackager>) {
        self.ingesters.insert(packaging.to_string(), packager);
    }

    pub fn register_disseminator(&mut self, content_type: &ContentType, packager: Arc<dyn DisseminationPackager>) {
        self.disseminators.insert(content_type.media_format(), packager);
    }

    pub fn ingester(&self, packaging: &str) -> Arc<dyn IngestPackager> {
        match self.ingesters.get(packaging) {
            Some(p) => p.clone(),
            None => {
                warn!(packaging = %packaging, "No ingester for packaging, storing opaque");
                self.fallback.clone()
            }
        }
    }

    pub fn disseminator(&self, content_type: &ContentType) -> Option<Arc<dyn DisseminationPackager>> {
        self.disseminators.get(&content_type.media_format()).cloned()
    }

    pub fn entry_ingester(&self) -> &EntryIngester {
        &self.entry
    }
}

impl Default for PackagerRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}
