//! The SWORD protocol engine
//!
//! Maps deposit, update and delete requests onto container state. Every
//! operation validates first, then mutates, then answers with a response
//! value. Expected protocol conditions become [`SwordError`] values inside
//! responses; `Ok(None)` means the collection or container does not exist;
//! `Err` is reserved for storage faults.
//!
//! ## Write order
//!
//! Content and metadata are written before the statement, and the
//! statement before the cached receipt. Each multi-step mutation runs
//! under a per-container lock.

use crate::config::Config;
use crate::documents::{self, ReceiptLinks};
use crate::error::{ErrorKind, ServerError, SwordError};
use crate::namespaces::packaging;
use crate::negotiator::{ContentNegotiator, ContentType};
use crate::packager::{EntryIngester, PackagerRegistry};
use crate::request::{
    DeleteRequest, DeleteResponse, DepositRequest, DepositResponse, MediaResource, Representation,
};
use crate::statement::Statement;
use crate::store::{ContainerId, Metadata, ObjectStore, INTERNAL_PREFIX};
use crate::uri_manager::{StatementFormat, UriManager};
use base64::{engine::general_purpose, Engine as _};
use chrono::Utc;
use dashmap::DashMap;
use md5::{Digest, Md5};
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{debug, info, warn};

pub const ENTRY_TYPE: &str = "application/atom+xml;type=entry";
pub const FEED_TYPE: &str = "application/atom+xml;type=feed";
pub const RDF_TYPE: &str = "application/rdf+xml";
pub const HTML_TYPE: &str = "text/html";

/// What a deposit stored, for the statement and the augmented receipt
#[derive(Default)]
struct StoredDeposit {
    deposit_uri: Option<String>,
    derived_uris: Vec<String>,
}

pub struct SwordServer {
    config: Arc<Config>,
    store: Arc<dyn ObjectStore>,
    uris: UriManager,
    packagers: PackagerRegistry,
    media_negotiator: ContentNegotiator,
    container_negotiator: ContentNegotiator,
    locks: DashMap<ContainerId, Arc<Mutex<()>>>,
}

impl SwordServer {
    pub fn new(config: Arc<Config>, store: Arc<dyn ObjectStore>) -> Self {
        Self::with_packagers(config, store, PackagerRegistry::with_defaults())
    }

    pub fn with_packagers(
        config: Arc<Config>,
        store: Arc<dyn ObjectStore>,
        packagers: PackagerRegistry,
    ) -> Self {
        let uris = UriManager::new(&config.base_url);

        // Media resource formats, most preferred first; only those a
        // disseminator can produce are offered
        let mut media = Vec::new();
        for p in &config.disseminate_packaging {
            media.push(ContentType::from_mimetype("application/zip", Some(p)));
        }
        media.push(ContentType::from_mimetype("application/zip", None));
        media.push(ContentType::from_mimetype(FEED_TYPE, None));
        media.retain(|ct| packagers.disseminator(ct).is_some());
        media.push(ContentType::from_mimetype(HTML_TYPE, None));
        let media_negotiator = ContentNegotiator::new(
            media,
            ContentType::from_mimetype("application/zip", None),
        );

        let container_negotiator = ContentNegotiator::new(
            vec![
                ContentType::from_mimetype(ENTRY_TYPE, None),
                ContentType::from_mimetype(FEED_TYPE, None),
                ContentType::from_mimetype(RDF_TYPE, None),
            ],
            ContentType::from_mimetype(ENTRY_TYPE, None),
        );

        Self {
            config,
            store,
            uris,
            packagers,
            media_negotiator,
            container_negotiator,
            locks: DashMap::new(),
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn shared_config(&self) -> Arc<Config> {
        Arc::clone(&self.config)
    }

    pub fn uris(&self) -> &UriManager {
        &self.uris
    }

    pub fn store(&self) -> &dyn ObjectStore {
        self.store.as_ref()
    }

    pub async fn exists(&self, oid: &ContainerId) -> Result<bool, ServerError> {
        self.store.container_exists(oid).await
    }

    async fn lock(&self, oid: &ContainerId) -> OwnedMutexGuard<()> {
        let lock = self.locks.entry(oid.clone()).or_default().clone();
        lock.lock_owned().await
    }

    // =========================================================================
    // Pre-checks
    // =========================================================================

    /// Deposit pre-checks, in order: sentinel packaging, checksum, mediation
    fn check_deposit_errors(&self, req: &DepositRequest) -> Option<SwordError> {
        if req.packaging == self.config.error_content_package {
            return Some(SwordError::new(
                ErrorKind::Content,
                "Unsupported Packaging format specified",
            ));
        }

        if let Some(expected) = &req.content_md5 {
            let body = req
                .content
                .as_deref()
                .or(req.atom.as_deref())
                .unwrap_or_default();
            if !checksum_matches(body, expected) {
                return Some(SwordError::new(
                    ErrorKind::ChecksumMismatch,
                    "Content-MD5 header does not match file checksum",
                ));
            }
        }

        self.check_mediation(req.on_behalf_of())
    }

    fn check_mediation(&self, on_behalf_of: Option<&str>) -> Option<SwordError> {
        match on_behalf_of {
            Some(obo) if !self.config.mediation => Some(SwordError::new(
                ErrorKind::MediationNotAllowed,
                format!("Mediated deposit on behalf of {} is not allowed", obo),
            )),
            _ => None,
        }
    }

    /// Reject an unparseable Atom entry before anything is written
    fn check_entry(req: &DepositRequest) -> Option<SwordError> {
        let atom = req.atom.as_deref().filter(|a| !a.is_empty())?;
        match EntryIngester::extract(atom) {
            Ok(_) => None,
            Err(e) => Some(SwordError::bad_request(format!("Invalid Atom entry: {}", e))),
        }
    }

    fn precheck(&self, req: &DepositRequest) -> Option<SwordError> {
        self.check_deposit_errors(req).or_else(|| Self::check_entry(req))
    }

    // =========================================================================
    // Shared steps
    // =========================================================================

    /// Store and ingest the content of a request, if any
    async fn store_content(
        &self,
        oid: &ContainerId,
        req: &DepositRequest,
        ingest: bool,
    ) -> Result<StoredDeposit, ServerError> {
        let content = match req.content.as_deref().filter(|c| !c.is_empty()) {
            Some(c) => c,
            None => return Ok(StoredDeposit::default()),
        };

        let stored = self.store.store_content(oid, content, &req.filename).await?;
        let derived = if ingest {
            self.packagers
                .ingester(&req.packaging)
                .ingest(self.store.as_ref(), oid, &stored, req.metadata_relevant)
                .await?
        } else {
            Vec::new()
        };

        Ok(StoredDeposit {
            deposit_uri: Some(self.uris.part_uri(oid, &stored)),
            derived_uris: derived.iter().map(|name| self.uris.part_uri(oid, name)).collect(),
        })
    }

    fn record_deposit(&self, statement: &mut Statement, req: &DepositRequest, stored: &StoredDeposit) {
        if let Some(uri) = &stored.deposit_uri {
            statement.add_original_deposit(
                uri.clone(),
                Utc::now(),
                req.packaging.clone(),
                req.auth.username.clone(),
                req.auth.on_behalf_of.clone(),
            );
        }
        statement.add_aggregates(stored.derived_uris.iter().cloned());
    }

    fn new_statement(&self, oid: &ContainerId) -> Statement {
        Statement::new(self.uris.agg_uri(oid), self.uris.edit_uri(oid))
    }

    /// Persist the statement, then build and cache the receipt. Returns the
    /// augmented copy for the response.
    async fn finish(
        &self,
        oid: &ContainerId,
        statement: &Statement,
        stored: StoredDeposit,
    ) -> Result<String, ServerError> {
        self.store.store_statement(oid, statement).await?;

        let metadata = self.store.load_metadata(oid).await?;
        let receipt = self.build_receipt(oid, statement, &metadata, &ReceiptLinks::default())?;
        self.store.store_receipt(oid, &receipt).await?;

        let links = ReceiptLinks {
            original_deposit: stored.deposit_uri,
            derived_resources: stored.derived_uris,
        };
        if links.is_empty() {
            Ok(receipt)
        } else {
            self.build_receipt(oid, statement, &metadata, &links)
        }
    }

    fn build_receipt(
        &self,
        oid: &ContainerId,
        statement: &Statement,
        metadata: &Metadata,
        links: &ReceiptLinks,
    ) -> Result<String, ServerError> {
        documents::deposit_receipt(&self.uris, &self.config, oid, statement, metadata, links)
    }

    fn respond(in_progress: bool, location: String, receipt: String) -> DepositResponse {
        if in_progress {
            DepositResponse::Accepted { location, receipt }
        } else {
            DepositResponse::Created { location, receipt }
        }
    }

    // =========================================================================
    // Deposit operations
    // =========================================================================

    /// Create a container in `collection` from a deposit
    pub async fn deposit_new(
        &self,
        collection: &str,
        req: &DepositRequest,
    ) -> Result<Option<DepositResponse>, ServerError> {
        if let Some(error) = self.precheck(req) {
            return Ok(Some(DepositResponse::Error(error)));
        }
        if !self.store.collection_exists(collection).await? {
            return Ok(None);
        }

        let oid = self.store.create_container(collection, req.slug.as_deref()).await?;
        let _guard = self.lock(&oid).await;

        if let Some(atom) = req.atom.as_deref().filter(|a| !a.is_empty()) {
            self.packagers
                .entry_ingester()
                .ingest(self.store.as_ref(), &oid, atom, false)
                .await?;
        }
        let stored = self.store_content(&oid, req, true).await?;

        let mut statement = self.new_statement(&oid);
        statement.in_progress = req.in_progress;
        self.record_deposit(&mut statement, req, &stored);

        let receipt = self.finish(&oid, &statement, stored).await?;
        info!(container = %oid, in_progress = req.in_progress, "Created container");
        Ok(Some(Self::respond(req.in_progress, self.uris.edit_uri(&oid), receipt)))
    }

    /// Replace the content of a container. Its metadata is replaced only if
    /// an entry is supplied. Deposit history is discarded.
    pub async fn replace(
        &self,
        oid: &ContainerId,
        req: &DepositRequest,
    ) -> Result<Option<DepositResponse>, ServerError> {
        if let Some(error) = self.precheck(req) {
            return Ok(Some(DepositResponse::Error(error)));
        }
        if !self.exists(oid).await? {
            return Ok(None);
        }
        let _guard = self.lock(oid).await;

        // Metadata belongs to the container; only a new entry replaces it
        self.store.remove_content(oid, !req.has_atom()).await?;
        if let Some(atom) = req.atom.as_deref().filter(|a| !a.is_empty()) {
            self.packagers
                .entry_ingester()
                .ingest(self.store.as_ref(), oid, atom, false)
                .await?;
        }
        let stored = self.store_content(oid, req, true).await?;

        let mut statement = self.new_statement(oid);
        statement.in_progress = req.in_progress;
        self.record_deposit(&mut statement, req, &stored);

        let receipt = self.finish(oid, &statement, stored).await?;
        info!(container = %oid, "Replaced container content");
        Ok(Some(Self::respond(req.in_progress, self.uris.edit_uri(oid), receipt)))
    }

    /// Add a file to the media resource. The file is stored opaque; no
    /// ingestion or metadata extraction takes place.
    pub async fn add_content(
        &self,
        oid: &ContainerId,
        req: &DepositRequest,
    ) -> Result<Option<DepositResponse>, ServerError> {
        if let Some(error) = self.check_deposit_errors(req) {
            return Ok(Some(DepositResponse::Error(error)));
        }
        if !req.has_content() {
            return Ok(Some(DepositResponse::Error(SwordError::bad_request(
                "No content sent to the server",
            ))));
        }
        if !self.exists(oid).await? {
            return Ok(None);
        }
        let _guard = self.lock(oid).await;

        let mut statement = self.store.load_statement(oid).await?;
        if statement.rem_uri.is_empty() {
            statement = self.new_statement(oid);
        }
        statement.in_progress = req.in_progress;

        let stored = self.store_content(oid, req, false).await?;
        self.record_deposit(&mut statement, req, &stored);

        let location = match (&stored.deposit_uri, req.packaging.as_str()) {
            (Some(uri), packaging::BINARY) => uri.clone(),
            _ => self.uris.em_uri(oid),
        };

        let receipt = self.finish(oid, &statement, stored).await?;
        info!(container = %oid, "Added content to media resource");
        Ok(Some(Self::respond(req.in_progress, location, receipt)))
    }

    /// Add content and/or metadata to an existing container. Metadata is
    /// merged; a new original deposit is appended to the history.
    pub async fn deposit_existing(
        &self,
        oid: &ContainerId,
        req: &DepositRequest,
    ) -> Result<Option<DepositResponse>, ServerError> {
        if let Some(error) = self.precheck(req) {
            return Ok(Some(DepositResponse::Error(error)));
        }
        if !self.exists(oid).await? {
            return Ok(None);
        }
        let _guard = self.lock(oid).await;

        let mut statement = self.store.load_statement(oid).await?;
        if statement.rem_uri.is_empty() {
            statement = self.new_statement(oid);
        }
        statement.in_progress = req.in_progress;

        if let Some(atom) = req.atom.as_deref().filter(|a| !a.is_empty()) {
            self.packagers
                .entry_ingester()
                .ingest(self.store.as_ref(), oid, atom, true)
                .await?;
        }
        let stored = self.store_content(oid, req, true).await?;
        self.record_deposit(&mut statement, req, &stored);

        let receipt = self.finish(oid, &statement, stored).await?;
        info!(container = %oid, in_progress = req.in_progress, "Deposited into existing container");
        Ok(Some(Self::respond(req.in_progress, self.uris.edit_uri(oid), receipt)))
    }

    /// Replace the metadata of a container from an Atom entry. The statement
    /// is left unchanged; only the receipt is rebuilt.
    pub async fn update_metadata(
        &self,
        oid: &ContainerId,
        req: &DepositRequest,
    ) -> Result<Option<DepositResponse>, ServerError> {
        if let Some(error) = self.precheck(req) {
            return Ok(Some(DepositResponse::Error(error)));
        }
        let atom = match req.atom.as_deref().filter(|a| !a.is_empty()) {
            Some(atom) => atom,
            None => {
                return Ok(Some(DepositResponse::Error(SwordError::bad_request(
                    "No Atom entry sent to the server",
                ))))
            }
        };
        if !self.exists(oid).await? {
            return Ok(None);
        }
        let _guard = self.lock(oid).await;

        let metadata = self
            .packagers
            .entry_ingester()
            .ingest(self.store.as_ref(), oid, atom, false)
            .await?;

        let mut statement = self.store.load_statement(oid).await?;
        if statement.rem_uri.is_empty() {
            statement = self.new_statement(oid);
        }
        let receipt = self.build_receipt(oid, &statement, &metadata, &ReceiptLinks::default())?;
        self.store.store_receipt(oid, &receipt).await?;

        // The statement is untouched, so its state decides the reply
        info!(container = %oid, "Updated container metadata");
        Ok(Some(Self::respond(statement.in_progress, self.uris.edit_uri(oid), receipt)))
    }

    /// Empty deposit on the container: only moves it between in-progress and
    /// archived
    pub async fn complete_deposit(
        &self,
        oid: &ContainerId,
        req: &DepositRequest,
    ) -> Result<Option<DepositResponse>, ServerError> {
        if let Some(error) = self.check_mediation(req.on_behalf_of()) {
            return Ok(Some(DepositResponse::Error(error)));
        }
        if !self.exists(oid).await? {
            return Ok(None);
        }
        let _guard = self.lock(oid).await;

        let mut statement = self.store.load_statement(oid).await?;
        if statement.rem_uri.is_empty() {
            statement = self.new_statement(oid);
        }
        statement.in_progress = req.in_progress;

        let receipt = self.finish(oid, &statement, StoredDeposit::default()).await?;
        info!(container = %oid, state = %statement.state().uri(), "Completed deposit");
        Ok(Some(Self::respond(req.in_progress, self.uris.edit_uri(oid), receipt)))
    }

    // =========================================================================
    // Delete operations
    // =========================================================================

    /// Clear the media resource, leaving the container with its metadata and
    /// a fresh statement
    pub async fn delete_content(
        &self,
        oid: &ContainerId,
        req: &DeleteRequest,
    ) -> Result<Option<DeleteResponse>, ServerError> {
        if let Some(error) = self.check_mediation(req.on_behalf_of()) {
            return Ok(Some(DeleteResponse::Error(error)));
        }
        if !self.exists(oid).await? {
            return Ok(None);
        }
        let _guard = self.lock(oid).await;

        self.store.remove_content(oid, true).await?;

        let mut statement = self.new_statement(oid);
        statement.in_progress = req.in_progress;
        let receipt = self.finish(oid, &statement, StoredDeposit::default()).await?;

        info!(container = %oid, "Deleted container content");
        Ok(Some(DeleteResponse::Receipt(receipt)))
    }

    pub async fn delete_container(
        &self,
        oid: &ContainerId,
        req: &DeleteRequest,
    ) -> Result<Option<DeleteResponse>, ServerError> {
        if let Some(error) = self.check_mediation(req.on_behalf_of()) {
            return Ok(Some(DeleteResponse::Error(error)));
        }
        if !self.exists(oid).await? {
            return Ok(None);
        }

        {
            let _guard = self.lock(oid).await;
            self.store.remove_container(oid).await?;
        }
        self.locks.remove(oid);

        info!(container = %oid, "Deleted container");
        Ok(Some(DeleteResponse::Deleted))
    }

    // =========================================================================
    // Retrieval
    // =========================================================================

    /// Negotiate the media resource format. `force_feed` is set for the
    /// `.atom` form of the URI, which always serves the feed.
    pub fn negotiate_media(
        &self,
        accept: Option<&str>,
        accept_packaging: Option<&str>,
        force_feed: bool,
    ) -> Result<ContentType, SwordError> {
        if force_feed {
            return Ok(ContentType::from_mimetype(FEED_TYPE, None));
        }
        self.media_negotiator
            .negotiate(accept, accept_packaging)
            .ok_or_else(|| {
                SwordError::new(
                    ErrorKind::Content,
                    "Requested Accept/Accept-Packaging is not supported by this server",
                )
                .with_status(406)
            })
    }

    pub fn negotiate_container(&self, accept: Option<&str>) -> Result<ContentType, SwordError> {
        self.container_negotiator.negotiate(accept, None).ok_or_else(|| {
            SwordError::new(ErrorKind::Content, "Requested Accept is not supported by this server")
                .with_status(415)
        })
    }

    /// The media resource in a negotiated format: a redirect to the splash
    /// page for HTML, otherwise a disseminated artifact
    pub async fn get_media_resource(
        &self,
        oid: &ContainerId,
        content_type: &ContentType,
    ) -> Result<Option<MediaResource>, ServerError> {
        if !self.exists(oid).await? {
            return Ok(None);
        }

        if content_type.mimetype() == HTML_TYPE {
            debug!(container = %oid, "Redirecting media resource request to splash page");
            return Ok(Some(MediaResource::Redirect(
                self.uris.html_uri(&oid.collection, Some(&oid.id)),
            )));
        }

        let packager = self.packagers.disseminator(content_type).ok_or_else(|| {
            ServerError::Internal(format!("no disseminator for {}", content_type.media_format()))
        })?;

        let _guard = self.lock(oid).await;
        let path = packager.package(self.store.as_ref(), &self.uris, oid).await?;
        debug!(container = %oid, format = %content_type, "Disseminated media resource");

        Ok(Some(MediaResource::Package {
            path,
            content_type: content_type.clone(),
            packaging: packager.packaging().map(str::to_string),
        }))
    }

    /// Receipt, RDF statement or Atom statement, by negotiated mimetype
    pub async fn get_container_representation(
        &self,
        oid: &ContainerId,
        content_type: &ContentType,
    ) -> Result<Option<Representation>, ServerError> {
        if !self.exists(oid).await? {
            return Ok(None);
        }

        let mimetype = content_type.mimetype();
        let body = match mimetype.as_str() {
            ENTRY_TYPE => match self.store.read_receipt(oid).await? {
                Some(receipt) => receipt,
                None => {
                    warn!(container = %oid, "No cached receipt, regenerating");
                    let statement = self.store.load_statement(oid).await?;
                    let metadata = self.store.load_metadata(oid).await?;
                    self.build_receipt(oid, &statement, &metadata, &ReceiptLinks::default())?
                }
            },
            RDF_TYPE => self.statement_body(oid, StatementFormat::Rdf).await?,
            FEED_TYPE => self.statement_body(oid, StatementFormat::Atom).await?,
            other => {
                return Err(ServerError::Internal(format!(
                    "unsupported container representation {}",
                    other
                )))
            }
        };

        Ok(Some(Representation {
            content_type: mimetype,
            body,
        }))
    }

    pub async fn get_statement(
        &self,
        oid: &ContainerId,
        format: StatementFormat,
    ) -> Result<Option<Representation>, ServerError> {
        if !self.exists(oid).await? {
            return Ok(None);
        }
        let content_type = match format {
            StatementFormat::Rdf => RDF_TYPE,
            StatementFormat::Atom => FEED_TYPE,
        };
        Ok(Some(Representation {
            content_type: content_type.to_string(),
            body: self.statement_body(oid, format).await?,
        }))
    }

    async fn statement_body(&self, oid: &ContainerId, format: StatementFormat) -> Result<String, ServerError> {
        if let Some(body) = self.store.read_statement(oid, format).await? {
            return Ok(body);
        }
        let mut statement = self.store.load_statement(oid).await?;
        if statement.rem_uri.is_empty() {
            statement = self.new_statement(oid);
        }
        match format {
            StatementFormat::Rdf => statement.to_rdf_xml(),
            StatementFormat::Atom => statement.to_atom_feed(),
        }
    }

    /// Bytes of one stored file. Internal files are not served.
    pub async fn get_part(&self, oid: &ContainerId, filename: &str) -> Result<Option<Vec<u8>>, ServerError> {
        if filename.starts_with(INTERNAL_PREFIX) || !self.exists(oid).await? {
            return Ok(None);
        }
        self.store.read_file(oid, filename).await
    }

    // =========================================================================
    // Listings
    // =========================================================================

    /// `root` is set for the top-level service document, which may advertise
    /// a sub-service document
    pub async fn service_document(&self, root: bool) -> Result<String, ServerError> {
        let collections = self.store.collection_names().await?;
        let sub = (root && self.config.use_sub)
            .then(|| self.uris.sub_sd_uri(&uuid::Uuid::new_v4().to_string()));
        documents::service_document(&self.uris, &self.config, &collections, sub.as_deref())
    }

    pub async fn list_collection(&self, collection: &str) -> Result<Option<String>, ServerError> {
        if !self.store.collection_exists(collection).await? {
            return Ok(None);
        }
        let containers = self.store.list_containers(collection).await?;
        documents::collection_feed(&self.uris, collection, &containers).map(Some)
    }

    pub async fn home_page(&self) -> Result<String, ServerError> {
        let collections = self.store.collection_names().await?;
        Ok(documents::home_page(&self.uris, &collections))
    }

    pub async fn collection_page(&self, collection: &str) -> Result<Option<String>, ServerError> {
        if !self.store.collection_exists(collection).await? {
            return Ok(None);
        }
        let containers = self.store.list_containers(collection).await?;
        Ok(Some(documents::collection_page(&self.uris, collection, &containers)))
    }

    pub async fn item_page(&self, oid: &ContainerId) -> Result<Option<String>, ServerError> {
        if !self.exists(oid).await? {
            return Ok(None);
        }
        let statement = self.store.load_statement(oid).await?;
        let metadata = self.store.load_metadata(oid).await?;
        let parts = self.store.list_content(oid).await?;
        Ok(Some(documents::item_page(&self.uris, oid, &statement, &metadata, &parts)))
    }
}

/// `Content-MD5` may be hex (either case) or base64 of the raw digest
fn checksum_matches(body: &[u8], expected: &str) -> bool {
    let digest = Md5::digest(body);
    let expected = expected.trim();
    expected.eq_ignore_ascii_case(&hex::encode(&digest))
        || expected == general_purpose::STANDARD.encode(&digest)
}
