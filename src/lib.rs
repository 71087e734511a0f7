//! SWORD Server - SWORD v2 deposit server
//!
//! Implements the SWORD AtomPub profile for depositing packages into a
//! repository: a service document lists collections, a POST to a collection
//! creates a container, and each container exposes its content, metadata and
//! deposit history through several URIs.
//!
//! ## Resources
//!
//! | Resource | Path | Role |
//! |----------|------|------|
//! | Service Document | `sd-uri` | Collections and what they accept |
//! | Collection | `col-uri/{c}` | Create containers |
//! | Container | `edit-uri/{c}/{id}` | Receipt, metadata, statement |
//! | Media Resource | `em-uri/{c}/{id}` | Deposited content |
//! | Statement | `state-uri/{c}/{id}.{rdf,atom}` | State and deposit history |
//!
//! ## Storage Layout
//!
//! ```text
//! ~/.local/share/sword-server/
//! ├── store/
//! │   └── {collection}/
//! │       └── {container}/    # content files + sword_* artifacts
//! └── config.toml             # Configuration
//! ```

pub mod auth;
pub mod config;
pub mod documents;
pub mod error;
pub mod http;
pub mod namespaces;
pub mod negotiator;
pub mod packager;
pub mod request;
pub mod server;
pub mod statement;
pub mod store;
pub mod uri_manager;
mod xml;

// Re-exports
pub use auth::{AuthFailure, Authenticator};
pub use config::Config;
pub use error::{ErrorKind, ServerError, SwordError};
pub use http::HttpServer;
pub use negotiator::{ContentNegotiator, ContentType};
pub use packager::PackagerRegistry;
pub use request::{Auth, DeleteRequest, DeleteResponse, DepositRequest, DepositResponse};
pub use server::SwordServer;
pub use statement::{State, Statement};
pub use store::{ContainerId, FileStore, ObjectStore};
pub use uri_manager::{StatementFormat, UriManager};
