//! Atom/AtomPub documents served by the engine
//!
//! Deposit receipts, the service document, collection listings and the
//! HTML splash pages. All builders are pure: the same inputs produce the
//! same document apart from `updated` timestamps.

use crate::config::Config;
use crate::error::ServerError;
use crate::namespaces::{
    rel, APP_NS, ATOM_NS, DATE_FORMAT, DC_NS, GENERATOR_URI, GENERATOR_VERSION, SWORD_NS,
};
use crate::statement::Statement;
use crate::store::{ContainerId, Metadata};
use crate::uri_manager::{StatementFormat, UriManager};
use crate::xml::DocWriter;
use chrono::Utc;

const DEFAULT_TITLE: &str = "SWORD Deposit";
const DEFAULT_CREATOR: &str = "SWORD Client";
const DEFAULT_ABSTRACT: &str = "Content deposited with SWORD client";

/// Extra links carried only by the receipt returned from a deposit
#[derive(Debug, Clone, Default)]
pub struct ReceiptLinks {
    pub original_deposit: Option<String>,
    pub derived_resources: Vec<String>,
}

impl ReceiptLinks {
    pub fn is_empty(&self) -> bool {
        self.original_deposit.is_none() && self.derived_resources.is_empty()
    }
}

fn first<'a>(metadata: &'a Metadata, key: &str, default: &'a str) -> &'a str {
    metadata
        .get(key)
        .and_then(|v| v.first())
        .map(String::as_str)
        .unwrap_or(default)
}

/// Build the deposit receipt for a container.
///
/// Title, creator and abstract fall back to fixed defaults. Every metadata
/// term is repeated as `dcterms:*` foreign markup and the statement's RDF is
/// embedded after the links. `links` are appended last; the cached receipt is
/// built without them.
pub fn deposit_receipt(
    uris: &UriManager,
    config: &Config,
    oid: &ContainerId,
    statement: &Statement,
    metadata: &Metadata,
    links: &ReceiptLinks,
) -> Result<String, ServerError> {
    let edit_uri = uris.edit_uri(oid);
    let em_uri = uris.em_uri(oid);
    let em_feed_uri = format!("{}.atom", em_uri);
    let cont_uri = uris.cont_uri(oid);
    let splash_uri = uris.html_uri(&oid.collection, Some(&oid.id));
    let atom_statement = uris.state_uri(oid, StatementFormat::Atom);
    let rdf_statement = uris.state_uri(oid, StatementFormat::Rdf);
    let updated = Utc::now().format(DATE_FORMAT).to_string();

    let mut doc = DocWriter::new()?;
    doc.start(
        "entry",
        &[("xmlns", ATOM_NS), ("xmlns:sword", SWORD_NS), ("xmlns:dcterms", DC_NS)],
    )?;
    doc.text("title", &[], first(metadata, "title", DEFAULT_TITLE))?;
    doc.text("id", &[], &uris.atom_id(oid))?;
    doc.text("updated", &[], &updated)?;
    doc.start("author", &[])?;
    doc.text("name", &[], first(metadata, "creator", DEFAULT_CREATOR))?;
    doc.end("author")?;
    doc.text("summary", &[("type", "text")], first(metadata, "abstract", DEFAULT_ABSTRACT))?;
    doc.empty("generator", &[("uri", GENERATOR_URI), ("version", GENERATOR_VERSION)])?;

    for (term, values) in metadata {
        let name = format!("dcterms:{}", term);
        for value in values {
            doc.text(&name, &[], value)?;
        }
    }

    doc.text(
        "sword:verboseDescription",
        &[],
        "SSS has done this, that and the other to process the deposit",
    )?;
    doc.text("sword:treatment", &[], "Treatment description")?;

    doc.empty("link", &[("rel", "alternate"), ("href", splash_uri.as_str())])?;
    doc.empty("content", &[("type", "application/zip"), ("src", cont_uri.as_str())])?;
    doc.empty("link", &[("rel", "edit"), ("href", edit_uri.as_str())])?;
    doc.empty("link", &[("rel", "edit-media"), ("href", em_uri.as_str())])?;
    doc.empty(
        "link",
        &[
            ("rel", "edit-media"),
            ("type", "application/atom+xml;type=feed"),
            ("href", em_feed_uri.as_str()),
        ],
    )?;
    doc.empty("link", &[("rel", rel::ADD), ("href", edit_uri.as_str())])?;

    for packaging in &config.disseminate_packaging {
        doc.text("sword:packaging", &[], packaging)?;
    }

    doc.empty(
        "link",
        &[
            ("rel", rel::STATEMENT),
            ("type", "application/atom+xml;type=feed"),
            ("href", atom_statement.as_str()),
        ],
    )?;
    doc.empty(
        "link",
        &[
            ("rel", rel::STATEMENT),
            ("type", "application/rdf+xml"),
            ("href", rdf_statement.as_str()),
        ],
    )?;

    statement.write_rdf(&mut doc)?;

    if let Some(uri) = &links.original_deposit {
        doc.empty("link", &[("rel", rel::ORIGINAL_DEPOSIT), ("href", uri.as_str())])?;
    }
    for uri in &links.derived_resources {
        doc.empty("link", &[("rel", rel::DERIVED_RESOURCE), ("href", uri.as_str())])?;
    }

    doc.end("entry")?;
    Ok(doc.finish())
}

/// The AtomPub service document. `sub_service` is the sub-service document
/// URI advertised on every collection, if any.
pub fn service_document(
    uris: &UriManager,
    config: &Config,
    collections: &[String],
    sub_service: Option<&str>,
) -> Result<String, ServerError> {
    let max_upload = config.max_upload_size.to_string();

    let mut doc = DocWriter::new()?;
    doc.start(
        "service",
        &[
            ("xmlns", APP_NS),
            ("xmlns:atom", ATOM_NS),
            ("xmlns:sword", SWORD_NS),
            ("xmlns:dcterms", DC_NS),
        ],
    )?;
    doc.text("sword:version", &[], &config.sword_version)?;
    doc.text("sword:maxUploadSize", &[], &max_upload)?;
    doc.start("workspace", &[])?;
    doc.text("atom:title", &[], "Main Site")?;

    for name in collections {
        let href = uris.col_uri(name);
        doc.start("collection", &[("href", href.as_str())])?;
        doc.text("atom:title", &[], &format!("Collection {}", name))?;

        if config.accept_nothing {
            doc.empty("accept", &[])?;
        } else {
            for accept in &config.app_accept {
                doc.text("accept", &[], accept)?;
            }
            for accept in &config.multipart_accept {
                doc.text("accept", &[("alternate", "multipart-related")], accept)?;
            }
        }

        doc.text("sword:collectionPolicy", &[], "Collection Policy")?;
        doc.text("dcterms:abstract", &[], "Collection Description")?;
        doc.text("sword:mediation", &[], if config.mediation { "true" } else { "false" })?;
        doc.text("sword:treatment", &[], "Treatment description")?;
        for packaging in &config.accept_packaging {
            doc.text("sword:acceptPackaging", &[], packaging)?;
        }
        if let Some(sub) = sub_service {
            doc.text("sword:service", &[], sub)?;
        }
        doc.end("collection")?;
    }

    doc.end("workspace")?;
    doc.end("service")?;
    Ok(doc.finish())
}

/// Atom feed with one `edit` link per container in the collection
pub fn collection_feed(
    uris: &UriManager,
    collection: &str,
    containers: &[String],
) -> Result<String, ServerError> {
    let mut doc = DocWriter::new()?;
    doc.start("feed", &[("xmlns", ATOM_NS)])?;
    doc.text("id", &[], &uris.col_uri(collection))?;
    doc.text("title", &[], &format!("Collection {}", collection))?;
    doc.text("updated", &[], &Utc::now().format(DATE_FORMAT).to_string())?;
    for id in containers {
        let href = uris.edit_uri(&ContainerId::new(collection, id.as_str()));
        doc.start("entry", &[])?;
        doc.empty("link", &[("rel", "edit"), ("href", href.as_str())])?;
        doc.end("entry")?;
    }
    doc.end("feed")?;
    Ok(doc.finish())
}

fn escape(text: &str) -> String {
    quick_xml::escape::escape(text).into_owned()
}

fn html_page(title: &str, body: &str) -> String {
    format!(
        "<!DOCTYPE html>\n<html>\n<head><title>{title}</title></head>\n<body>\n<h1>{title}</h1>\n{body}</body>\n</html>\n",
        title = escape(title),
        body = body
    )
}

/// Home page listing collections
pub fn home_page(uris: &UriManager, collections: &[String]) -> String {
    let mut body = String::from("<p>Simple SWORD Server</p>\n<ul>\n");
    body.push_str(&format!(
        "<li><a href=\"{}\">Service Document</a></li>\n",
        escape(&uris.sd_uri())
    ));
    for name in collections {
        body.push_str(&format!(
            "<li><a href=\"{}\">Collection {}</a></li>\n",
            escape(&uris.html_uri(name, None)),
            escape(name)
        ));
    }
    body.push_str("</ul>\n");
    html_page("Simple SWORD Server", &body)
}

/// Splash page of a collection
pub fn collection_page(uris: &UriManager, collection: &str, containers: &[String]) -> String {
    let mut body = format!(
        "<p>Deposit URI: {}</p>\n<ul>\n",
        escape(&uris.col_uri(collection))
    );
    for id in containers {
        body.push_str(&format!(
            "<li><a href=\"{}\">{}</a></li>\n",
            escape(&uris.html_uri(collection, Some(id))),
            escape(id)
        ));
    }
    body.push_str("</ul>\n");
    html_page(&format!("Collection {}", collection), &body)
}

/// Splash page of a container: state, metadata and parts
pub fn item_page(
    uris: &UriManager,
    oid: &ContainerId,
    statement: &Statement,
    metadata: &Metadata,
    parts: &[String],
) -> String {
    let state = statement.state();
    let mut body = format!(
        "<p>State: <a href=\"{}\">{}</a></p>\n<dl>\n",
        escape(state.uri()),
        escape(state.description())
    );
    for (term, values) in metadata {
        for value in values {
            body.push_str(&format!("<dt>{}</dt><dd>{}</dd>\n", escape(term), escape(value)));
        }
    }
    body.push_str("</dl>\n<ul>\n");
    for part in parts {
        body.push_str(&format!(
            "<li><a href=\"{}\">{}</a></li>\n",
            escape(&uris.part_uri(oid, part)),
            escape(part)
        ));
    }
    body.push_str(&format!(
        "</ul>\n<p><a href=\"{}\">Edit-URI</a> | <a href=\"{}\">Statement</a></p>\n",
        escape(&uris.edit_uri(oid)),
        escape(&uris.state_uri(oid, StatementFormat::Rdf))
    ));
    html_page(&format!("Item {}", oid), &body)
}
