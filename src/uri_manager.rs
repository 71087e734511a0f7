//! Canonical resource URIs
//!
//! Pure functions of `(base_url, collection, id[, filename])`. No state and no
//! I/O; every role gets its own path prefix so distinct
//! `(collection, id, role)` triples never collide.

use crate::store::ContainerId;
use url::Url;

/// The two serialisations a statement is published under
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatementFormat {
    Atom,
    Rdf,
}

impl StatementFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            StatementFormat::Atom => "atom",
            StatementFormat::Rdf => "rdf",
        }
    }
}

#[derive(Debug, Clone)]
pub struct UriManager {
    base_url: String,
}

impl UriManager {
    /// `base_url` is normalised to end with exactly one `/`
    pub fn new(base_url: &str) -> Self {
        let trimmed = base_url.trim_end_matches('/');
        Self {
            base_url: format!("{}/", trimmed),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Path of an absolute URI relative to the base, if it is one of ours
    pub fn relative_path<'a>(&self, uri: &'a str) -> Option<&'a str> {
        uri.strip_prefix(self.base_url.as_str())
    }

    /// Base path component (`/` for a root deployment), used for routing
    pub fn base_path(&self) -> String {
        Url::parse(&self.base_url)
            .map(|u| u.path().to_string())
            .unwrap_or_else(|_| "/".to_string())
    }

    pub fn sd_uri(&self) -> String {
        format!("{}sd-uri", self.base_url)
    }

    pub fn sub_sd_uri(&self, sub: &str) -> String {
        format!("{}sd-uri/{}", self.base_url, sub)
    }

    pub fn col_uri(&self, collection: &str) -> String {
        format!("{}col-uri/{}", self.base_url, collection)
    }

    pub fn edit_uri(&self, oid: &ContainerId) -> String {
        format!("{}edit-uri/{}", self.base_url, oid)
    }

    pub fn em_uri(&self, oid: &ContainerId) -> String {
        format!("{}em-uri/{}", self.base_url, oid)
    }

    pub fn cont_uri(&self, oid: &ContainerId) -> String {
        format!("{}cont-uri/{}", self.base_url, oid)
    }

    pub fn state_uri(&self, oid: &ContainerId, format: StatementFormat) -> String {
        format!("{}state-uri/{}.{}", self.base_url, oid, format.extension())
    }

    pub fn part_uri(&self, oid: &ContainerId, filename: &str) -> String {
        format!(
            "{}part-uri/{}/{}",
            self.base_url,
            oid,
            urlencoding::encode(filename)
        )
    }

    pub fn agg_uri(&self, oid: &ContainerId) -> String {
        format!("{}agg-uri/{}", self.base_url, oid)
    }

    pub fn html_uri(&self, collection: &str, id: Option<&str>) -> String {
        match id {
            Some(id) => format!("{}html/{}/{}", self.base_url, collection, id),
            None => format!("{}html/{}", self.base_url, collection),
        }
    }

    /// Tag URI used as the Atom entry id
    pub fn atom_id(&self, oid: &ContainerId) -> String {
        format!("tag:container@sss/{}", oid)
    }
}

/// `{collection}/{id}` from a route remainder
pub fn interpret_oid(path: &str) -> Option<ContainerId> {
    let (collection, id) = path.split_once('/')?;
    if collection.is_empty() || id.is_empty() || id.contains('/') {
        return None;
    }
    Some(ContainerId::new(collection, id))
}

/// `{collection}/{id}/{filename}` from a part route remainder; filename is decoded
pub fn interpret_part_path(path: &str) -> Option<(ContainerId, String)> {
    let mut parts = path.splitn(3, '/');
    let collection = parts.next()?;
    let id = parts.next()?;
    let filename = parts.next()?;
    if collection.is_empty() || id.is_empty() || filename.is_empty() {
        return None;
    }
    let filename = urlencoding::decode(filename).ok()?.into_owned();
    Some((ContainerId::new(collection, id), filename))
}

/// Split a `.atom` / `.rdf` suffix off a statement route remainder
pub fn interpret_statement_path(path: &str) -> Option<(StatementFormat, &str)> {
    if let Some(rest) = path.strip_suffix(".rdf") {
        Some((StatementFormat::Rdf, rest))
    } else {
        path.strip_suffix(".atom").map(|rest| (StatementFormat::Atom, rest))
    }
}

/// Split a `.atom` suffix off a media resource route remainder
pub fn strip_atom_suffix(path: &str) -> (bool, &str) {
    match path.strip_suffix(".atom") {
        Some(rest) => (true, rest),
        None => (false, path),
    }
}
