//! HTTP surface for the SWORD server
//!
//! All paths are relative to the configured base URL:
//!
//! - `GET /health` - Health check
//! - `GET /sd-uri[/{sub}]` - Service document
//! - `GET|POST /col-uri/{collection}` - List containers / create a container
//! - `GET /cont-uri/{collection}/{id}[.atom]` - Negotiated media resource
//! - `GET|PUT|POST|DELETE /em-uri/{collection}/{id}[.atom]` - Media resource
//! - `GET|PUT|POST|DELETE /edit-uri/{collection}/{id}` - Container
//! - `GET /state-uri/{collection}/{id}.{rdf|atom}` - Statement
//! - `GET /agg-uri/{collection}/{id}` - 303 to the container
//! - `GET /part-uri/{collection}/{id}/{filename}` - One stored file
//! - `GET /`, `/html/{collection}[/{id}]` - Browsable pages
//!
//! Mutating requests are checked in a fixed order: operation enabled (405),
//! credentials (401), header values (400), declared size (413), then the
//! engine.

pub mod parse;
pub mod response;

use crate::auth::{AuthFailure, Authenticator};
use crate::error::{ErrorKind, ServerError, SwordError};
use crate::packager::guess_content_type;
use crate::request::{Auth, DeleteResponse, DepositRequest, DepositResponse, MediaResource};
use crate::server::{SwordServer, HTML_TYPE};
use crate::store::ContainerId;
use crate::uri_manager::{interpret_oid, interpret_part_path, interpret_statement_path, strip_atom_suffix};
use bytes::Bytes;
use hyper::body::{Body, Incoming};
use hyper::header::{self, HeaderName};
use hyper::http::request::Parts;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, StatusCode};
use hyper_util::rt::TokioIo;
use parse::{BodyMode, SwordHeaders};
use response::HttpResponse;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{debug, error, info, warn};

/// Unwrap a `Result<T, HttpResponse>`, answering early with the response
macro_rules! or_respond {
    ($e:expr) => {
        match $e {
            Ok(value) => value,
            Err(response) => return Ok(response),
        }
    };
}

/// Unwrap an engine `Option`, answering 404 on `None`
macro_rules! or_not_found {
    ($e:expr) => {
        match $e {
            Some(value) => value,
            None => return Ok(response::not_found()),
        }
    };
}

pub struct HttpServer {
    engine: Arc<SwordServer>,
    auth: Authenticator,
    bind_addr: SocketAddr,
}

impl HttpServer {
    pub fn new(engine: Arc<SwordServer>, bind_addr: SocketAddr) -> Self {
        let auth = Authenticator::new(engine.shared_config());
        Self {
            engine,
            auth,
            bind_addr,
        }
    }

    pub fn engine(&self) -> &SwordServer {
        &self.engine
    }

    /// Start the HTTP server
    pub async fn run(self: Arc<Self>) -> Result<(), ServerError> {
        let listener = TcpListener::bind(self.bind_addr).await?;
        info!(addr = %self.bind_addr, base_url = %self.engine.uris().base_url(), "HTTP server listening");

        loop {
            let (stream, remote_addr) = listener.accept().await?;
            let io = TokioIo::new(stream);
            let server = self.clone();

            tokio::spawn(async move {
                let service = service_fn(move |req: Request<Incoming>| {
                    let server = server.clone();
                    async move { Ok::<_, Infallible>(server.handle(req).await) }
                });

                if let Err(err) = http1::Builder::new()
                    .serve_connection(io, service)
                    .await
                {
                    warn!(addr = %remote_addr, error = %err, "Connection error");
                }
            });
        }
    }

    /// Answer one request. Faults are logged and become a bare 500.
    pub async fn handle<B>(&self, req: Request<B>) -> HttpResponse
    where
        B: Body<Data = Bytes>,
        B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        let (parts, body) = req.into_parts();
        let path = parts.uri.path().to_string();
        debug!(method = %parts.method, path = %path, "Incoming request");

        let base_path = self.engine.uris().base_path();
        let route = match path.strip_prefix(base_path.as_str()) {
            Some(route) => route,
            None if path == base_path.trim_end_matches('/') => "",
            None => return response::not_found(),
        };

        match self.route(&parts, body, route).await {
            Ok(response) => response,
            Err(e) => {
                error!(method = %parts.method, path = %path, error = %e, "Request failed");
                response::internal_error()
            }
        }
    }

    /// Route requests to handlers
    async fn route<B>(&self, parts: &Parts, body: B, route: &str) -> Result<HttpResponse, ServerError>
    where
        B: Body<Data = Bytes>,
        B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        let (resource, rest) = route.split_once('/').unwrap_or((route, ""));

        match (&parts.method, resource) {
            (&Method::GET, "health") => self.handle_health().await,
            (&Method::GET, "") => self.handle_home_page().await,

            (&Method::GET, "sd-uri") => self.handle_service_document(parts, rest.is_empty()).await,

            (&Method::GET, "col-uri") => self.handle_list_collection(parts, rest).await,
            (&Method::POST, "col-uri") => self.handle_deposit_new(parts, body, rest).await,

            (&Method::GET, "cont-uri") | (&Method::GET, "em-uri") => {
                self.handle_get_media(parts, rest).await
            }
            (&Method::PUT, "em-uri") => self.handle_replace_media(parts, body, rest).await,
            (&Method::POST, "em-uri") => self.handle_add_media(parts, body, rest).await,
            (&Method::DELETE, "em-uri") => self.handle_delete_media(parts, rest).await,

            (&Method::GET, "edit-uri") => self.handle_get_container(parts, rest).await,
            (&Method::PUT, "edit-uri") => self.handle_put_container(parts, body, rest).await,
            (&Method::POST, "edit-uri") => self.handle_post_container(parts, body, rest).await,
            (&Method::DELETE, "edit-uri") => self.handle_delete_container(parts, rest).await,

            (&Method::GET, "state-uri") => self.handle_statement(parts, rest).await,
            (&Method::GET, "agg-uri") => self.handle_aggregation(rest),
            (&Method::GET, "part-uri") => self.handle_part(rest).await,
            (&Method::GET, "html") => self.handle_html(rest).await,

            (_, "sd-uri") | (_, "state-uri") | (_, "agg-uri") | (_, "html") | (_, "cont-uri") | (_, "part-uri") => {
                Ok(response::method_not_allowed("GET"))
            }
            (_, "col-uri") => Ok(response::method_not_allowed("GET, POST")),
            (_, "em-uri") | (_, "edit-uri") => {
                Ok(response::method_not_allowed("GET, PUT, POST, DELETE"))
            }

            _ => Ok(response::not_found()),
        }
    }

    // =========================================================================
    // Request helpers
    // =========================================================================

    fn authenticate(&self, parts: &Parts) -> Result<Auth, HttpResponse> {
        self.auth
            .basic_authenticate(
                Self::header(parts, header::AUTHORIZATION.as_str()),
                Self::header(parts, "on-behalf-of").map(str::trim).filter(|v| !v.is_empty()),
            )
            .map_err(|failure| match failure.sword_error() {
                Some(err) => response::sword_error(&err),
                None => response::unauthorized(failure == AuthFailure::MissingCredentials),
            })
    }

    fn check_update_allowed(&self) -> Result<(), HttpResponse> {
        if self.engine.config().allow_update {
            return Ok(());
        }
        Err(response::sword_error(&SwordError::new(
            ErrorKind::MethodNotAllowed,
            "Update operations not currently permitted",
        )))
    }

    fn check_delete_allowed(&self) -> Result<(), HttpResponse> {
        if self.engine.config().allow_delete {
            return Ok(());
        }
        Err(response::sword_error(&SwordError::new(
            ErrorKind::MethodNotAllowed,
            "Delete operations not currently permitted",
        )))
    }

    fn headers(parts: &Parts) -> Result<SwordHeaders, HttpResponse> {
        SwordHeaders::from_headers(&parts.headers).map_err(|e| response::sword_error(&e))
    }

    /// Validate headers, enforce the size ceiling, then buffer and parse the body
    async fn read_deposit<B>(
        &self,
        parts: &Parts,
        body: B,
        auth: Auth,
        mode: BodyMode,
    ) -> Result<DepositRequest, HttpResponse>
    where
        B: Body<Data = Bytes>,
        B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        let to_response = |e: SwordError| response::sword_error(&e);
        let headers = Self::headers(parts)?;
        let max = self.engine.config().max_upload_size;

        headers.check_size(max).map_err(to_response)?;
        let bytes = parse::read_body(body, max).await.map_err(to_response)?;
        parse::deposit_request(&headers, bytes, auth, mode)
            .await
            .map_err(to_response)
    }

    fn oid(rest: &str) -> Result<ContainerId, HttpResponse> {
        interpret_oid(rest).ok_or_else(response::not_found)
    }

    fn header<'a>(parts: &'a Parts, name: &str) -> Option<&'a str> {
        parts.headers.get(name).and_then(|v| v.to_str().ok())
    }

    /// Render a deposit outcome. `created` is the success status for the
    /// resource; accepted deposits are always 202.
    fn deposit_reply(&self, outcome: DepositResponse, created: StatusCode) -> HttpResponse {
        let (status, location, receipt) = match outcome {
            DepositResponse::Error(e) => return response::sword_error(&e),
            DepositResponse::Created { location, receipt } => (created, location, receipt),
            DepositResponse::Accepted { location, receipt } => {
                (StatusCode::ACCEPTED, location, receipt)
            }
        };

        if status == StatusCode::NO_CONTENT {
            return response::empty(status);
        }
        if !self.engine.config().return_deposit_receipt {
            if status == StatusCode::OK {
                return response::empty(StatusCode::NO_CONTENT);
            }
            return response::receipt(status, &location, None);
        }
        response::receipt(status, &location, Some(receipt))
    }

    fn delete_reply(outcome: DeleteResponse) -> HttpResponse {
        match outcome {
            DeleteResponse::Error(e) => response::sword_error(&e),
            DeleteResponse::Receipt(_) | DeleteResponse::Deleted => response::empty(StatusCode::NO_CONTENT),
        }
    }

    // =========================================================================
    // Handlers
    // =========================================================================

    /// GET /health
    async fn handle_health(&self) -> Result<HttpResponse, ServerError> {
        let collections = self.engine.store().collection_names().await?;
        let body = serde_json::json!({
            "status": "ok",
            "sword_version": self.engine.config().sword_version,
            "collections": collections.len(),
            "base_url": self.engine.uris().base_url(),
        });
        Ok(response::json(StatusCode::OK, &body))
    }

    /// GET / - Home page
    async fn handle_home_page(&self) -> Result<HttpResponse, ServerError> {
        let page = self.engine.home_page().await?;
        Ok(response::document(StatusCode::OK, HTML_TYPE, page))
    }

    /// GET /html/{collection}[/{id}]
    async fn handle_html(&self, rest: &str) -> Result<HttpResponse, ServerError> {
        let page = if rest.is_empty() {
            Some(self.engine.home_page().await?)
        } else if rest.contains('/') {
            let oid = or_respond!(Self::oid(rest));
            self.engine.item_page(&oid).await?
        } else {
            self.engine.collection_page(rest).await?
        };
        let page = or_not_found!(page);
        Ok(response::document(StatusCode::OK, HTML_TYPE, page))
    }

    /// GET /sd-uri[/{sub}]
    async fn handle_service_document(&self, parts: &Parts, root: bool) -> Result<HttpResponse, ServerError> {
        or_respond!(self.authenticate(parts));
        let sd = self.engine.service_document(root).await?;
        Ok(response::document(StatusCode::OK, "application/atomsvc+xml", sd))
    }

    /// GET /col-uri/{collection}
    async fn handle_list_collection(&self, parts: &Parts, collection: &str) -> Result<HttpResponse, ServerError> {
        or_respond!(self.authenticate(parts));
        let feed = or_not_found!(self.engine.list_collection(collection).await?);
        Ok(response::document(StatusCode::OK, "application/atom+xml;type=feed", feed))
    }

    /// POST /col-uri/{collection} - Create a container
    async fn handle_deposit_new<B>(&self, parts: &Parts, body: B, collection: &str) -> Result<HttpResponse, ServerError>
    where
        B: Body<Data = Bytes>,
        B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        let auth = or_respond!(self.authenticate(parts));
        let req = or_respond!(self.read_deposit(parts, body, auth, BodyMode::CONTAINER).await);
        if req.is_empty() {
            return Ok(response::sword_error(&SwordError::bad_request("No content sent to the server")));
        }

        let outcome = or_not_found!(self.engine.deposit_new(collection, &req).await?);
        Ok(self.deposit_reply(outcome, StatusCode::CREATED))
    }

    /// GET /em-uri/{collection}/{id}[.atom] (and /cont-uri) - unauthenticated
    async fn handle_get_media(&self, parts: &Parts, rest: &str) -> Result<HttpResponse, ServerError> {
        let (force_feed, rest) = strip_atom_suffix(rest);
        let oid = or_respond!(Self::oid(rest));

        let content_type = match self.engine.negotiate_media(
            Self::header(parts, header::ACCEPT.as_str()),
            Self::header(parts, "accept-packaging"),
            force_feed,
        ) {
            Ok(ct) => ct,
            Err(e) => return Ok(response::sword_error(&e)),
        };

        match or_not_found!(self.engine.get_media_resource(&oid, &content_type).await?) {
            MediaResource::Redirect(url) => Ok(response::redirect(StatusCode::FOUND, &url)),
            MediaResource::Package {
                path,
                content_type,
                packaging,
            } => {
                let data = tokio::fs::read(&path).await?;
                let extra: Vec<(HeaderName, String)> = packaging
                    .into_iter()
                    .map(|p| (HeaderName::from_static("packaging"), p))
                    .collect();
                Ok(response::content(&content_type.mimetype(), &extra, data))
            }
        }
    }

    /// PUT /em-uri/{collection}/{id} - Replace the content
    async fn handle_replace_media<B>(&self, parts: &Parts, body: B, rest: &str) -> Result<HttpResponse, ServerError>
    where
        B: Body<Data = Bytes>,
        B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        or_respond!(self.check_update_allowed());
        let auth = or_respond!(self.authenticate(parts));
        let oid = or_respond!(Self::oid(rest));
        let req = or_respond!(self.read_deposit(parts, body, auth, BodyMode::MEDIA_REPLACE).await);
        if req.is_empty() {
            return Ok(response::sword_error(&SwordError::bad_request("No content sent to the server")));
        }

        let outcome = or_not_found!(self.engine.replace(&oid, &req).await?);
        Ok(self.deposit_reply(outcome, StatusCode::NO_CONTENT))
    }

    /// POST /em-uri/{collection}/{id} - Add a file to the media resource
    async fn handle_add_media<B>(&self, parts: &Parts, body: B, rest: &str) -> Result<HttpResponse, ServerError>
    where
        B: Body<Data = Bytes>,
        B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        or_respond!(self.check_update_allowed());
        let auth = or_respond!(self.authenticate(parts));
        let oid = or_respond!(Self::oid(rest));
        let req = or_respond!(self.read_deposit(parts, body, auth, BodyMode::MEDIA).await);

        let outcome = or_not_found!(self.engine.add_content(&oid, &req).await?);
        Ok(self.deposit_reply(outcome, StatusCode::CREATED))
    }

    /// DELETE /em-uri/{collection}/{id} - Clear the content
    async fn handle_delete_media(&self, parts: &Parts, rest: &str) -> Result<HttpResponse, ServerError> {
        or_respond!(self.check_delete_allowed());
        let auth = or_respond!(self.authenticate(parts));
        let oid = or_respond!(Self::oid(rest));
        let headers = or_respond!(Self::headers(parts));

        let outcome = or_not_found!(self.engine.delete_content(&oid, &headers.delete_request(auth)).await?);
        Ok(Self::delete_reply(outcome))
    }

    /// GET /edit-uri/{collection}/{id} - Receipt or statement, by Accept
    async fn handle_get_container(&self, parts: &Parts, rest: &str) -> Result<HttpResponse, ServerError> {
        or_respond!(self.authenticate(parts));
        let oid = or_respond!(Self::oid(rest));

        let content_type = match self
            .engine
            .negotiate_container(Self::header(parts, header::ACCEPT.as_str()))
        {
            Ok(ct) => ct,
            Err(e) => return Ok(response::sword_error(&e)),
        };

        let representation = or_not_found!(self.engine.get_container_representation(&oid, &content_type).await?);
        Ok(response::document(
            StatusCode::OK,
            &representation.content_type,
            representation.body,
        ))
    }

    /// PUT /edit-uri/{collection}/{id} - Replace metadata, or metadata and content
    async fn handle_put_container<B>(&self, parts: &Parts, body: B, rest: &str) -> Result<HttpResponse, ServerError>
    where
        B: Body<Data = Bytes>,
        B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        or_respond!(self.check_update_allowed());
        let auth = or_respond!(self.authenticate(parts));
        let oid = or_respond!(Self::oid(rest));
        let req = or_respond!(self.read_deposit(parts, body, auth, BodyMode::CONTAINER).await);
        if req.is_empty() {
            return Ok(response::sword_error(&SwordError::bad_request("No content sent to the server")));
        }

        let outcome = if req.has_content() {
            self.engine.replace(&oid, &req).await?
        } else {
            self.engine.update_metadata(&oid, &req).await?
        };
        Ok(self.deposit_reply(or_not_found!(outcome), StatusCode::OK))
    }

    /// POST /edit-uri/{collection}/{id} - Add to the container; an empty
    /// body completes an in-progress deposit
    async fn handle_post_container<B>(&self, parts: &Parts, body: B, rest: &str) -> Result<HttpResponse, ServerError>
    where
        B: Body<Data = Bytes>,
        B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        or_respond!(self.check_update_allowed());
        let auth = or_respond!(self.authenticate(parts));
        let oid = or_respond!(Self::oid(rest));
        let req = or_respond!(self.read_deposit(parts, body, auth, BodyMode::CONTAINER).await);

        let outcome = if req.is_empty() {
            self.engine.complete_deposit(&oid, &req).await?
        } else {
            self.engine.deposit_existing(&oid, &req).await?
        };
        Ok(self.deposit_reply(or_not_found!(outcome), StatusCode::OK))
    }

    /// DELETE /edit-uri/{collection}/{id} - Remove the container
    async fn handle_delete_container(&self, parts: &Parts, rest: &str) -> Result<HttpResponse, ServerError> {
        or_respond!(self.check_delete_allowed());
        let auth = or_respond!(self.authenticate(parts));
        let oid = or_respond!(Self::oid(rest));
        let headers = or_respond!(Self::headers(parts));

        let outcome = or_not_found!(self.engine.delete_container(&oid, &headers.delete_request(auth)).await?);
        Ok(Self::delete_reply(outcome))
    }

    /// GET /state-uri/{collection}/{id}.{rdf|atom}
    async fn handle_statement(&self, parts: &Parts, rest: &str) -> Result<HttpResponse, ServerError> {
        or_respond!(self.authenticate(parts));
        let (format, rest) = or_not_found!(interpret_statement_path(rest));
        let oid = or_respond!(Self::oid(rest));

        let statement = or_not_found!(self.engine.get_statement(&oid, format).await?);
        Ok(response::document(StatusCode::OK, &statement.content_type, statement.body))
    }

    /// GET /agg-uri/{collection}/{id} - The aggregation is described by the container
    fn handle_aggregation(&self, rest: &str) -> Result<HttpResponse, ServerError> {
        let oid = or_respond!(Self::oid(rest));
        Ok(response::redirect(StatusCode::SEE_OTHER, &self.engine.uris().edit_uri(&oid)))
    }

    /// GET /part-uri/{collection}/{id}/{filename}
    async fn handle_part(&self, rest: &str) -> Result<HttpResponse, ServerError> {
        let (oid, filename) = or_not_found!(interpret_part_path(rest));
        let data = or_not_found!(self.engine.get_part(&oid, &filename).await?);
        Ok(response::content(guess_content_type(&filename), &[], data))
    }
}
