//! Content negotiation
//!
//! Reconciles a client's `Accept` / `Accept-Packaging` headers with the
//! ordered list of representations a resource can serve. The client's
//! preference always wins; the server's order only breaks ties between
//! entries of equal weight.
//!
//! Entries without an explicit `q` are spread over the gap between the
//! highest explicit `q` and 1.0, earlier entries ranking higher, so explicit
//! weights are always outranked by unweighted entries while header order is
//! kept as a secondary signal.

use std::hash::{Hash, Hasher};
use tracing::debug;

/// A media type plus optional SWORD packaging format
#[derive(Debug, Clone)]
pub struct ContentType {
    pub type_: String,
    pub subtype: String,
    pub params: Option<String>,
    pub packaging: Option<String>,
}

impl ContentType {
    pub fn new(type_: &str, subtype: &str, params: Option<&str>, packaging: Option<&str>) -> Self {
        Self {
            type_: type_.to_string(),
            subtype: subtype.to_string(),
            params: params.map(str::to_string),
            packaging: packaging.map(str::to_string),
        }
    }

    /// Parse `type/subtype[;params]`. A bare `*` is read as `*/*`.
    pub fn from_mimetype(mimetype: &str, packaging: Option<&str>) -> Self {
        let mut parts = mimetype.splitn(2, ';');
        let full = parts.next().unwrap_or("").trim();
        let params = parts
            .next()
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .map(str::to_string);
        let (type_, subtype) = match full.split_once('/') {
            Some((t, s)) => (t.trim(), s.trim()),
            None => (full, "*"),
        };
        Self {
            type_: type_.to_string(),
            subtype: subtype.to_string(),
            params,
            packaging: packaging.map(str::to_string),
        }
    }

    pub fn mimetype(&self) -> String {
        match &self.params {
            Some(p) => format!("{}/{};{}", self.type_, self.subtype, p),
            None => format!("{}/{}", self.type_, self.subtype),
        }
    }

    /// Canonical composite key over mimetype and packaging
    pub fn media_format(&self) -> String {
        match &self.packaging {
            Some(p) => format!("(& (type=\"{}\") (packaging=\"{}\") )", self.mimetype(), p),
            None => format!("(& (type=\"{}\") )", self.mimetype()),
        }
    }

    /// Wildcard-aware match. Missing params on either side match anything;
    /// packaging must be equal unless `packaging_wildcard` is set, in which
    /// case a missing packaging on either side also matches.
    pub fn matches(&self, other: &ContentType, packaging_wildcard: bool) -> bool {
        let type_match = self.type_ == "*" || other.type_ == "*" || self.type_ == other.type_;
        let subtype_match =
            self.subtype == "*" || other.subtype == "*" || self.subtype == other.subtype;
        let params_match = match (&self.params, &other.params) {
            (Some(a), Some(b)) => a == b,
            _ => true,
        };
        let packaging_match = if packaging_wildcard {
            match (&self.packaging, &other.packaging) {
                (Some(a), Some(b)) => a == b,
                _ => true,
            }
        } else {
            self.packaging == other.packaging
        };
        type_match && subtype_match && params_match && packaging_match
    }
}

impl PartialEq for ContentType {
    fn eq(&self, other: &Self) -> bool {
        self.media_format() == other.media_format()
    }
}

impl Eq for ContentType {}

impl Hash for ContentType {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.media_format().hash(state);
    }
}

impl std::fmt::Display for ContentType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.media_format())
    }
}

/// Server side of a negotiation: what a resource can serve, most preferred first
#[derive(Debug, Clone)]
pub struct ContentNegotiator {
    pub acceptable: Vec<ContentType>,
    pub default: ContentType,
}

impl ContentNegotiator {
    pub fn new(acceptable: Vec<ContentType>, default: ContentType) -> Self {
        Self { acceptable, default }
    }

    /// Pick a representation, or `None` when client and server cannot agree
    pub fn negotiate(&self, accept: Option<&str>, accept_packaging: Option<&str>) -> Option<ContentType> {
        if accept.is_none() && accept_packaging.is_none() {
            return Some(self.default.clone());
        }

        let packaging = accept_packaging.or(self.default.packaging.as_deref());
        let default_accept = self.default.mimetype();
        let accept = accept.unwrap_or(default_accept.as_str());
        debug!(accept = %accept, packaging = ?packaging, "Negotiating");

        let tiers = analyse_accept(accept, packaging);
        for (q, candidates) in &tiers {
            let allowable: Vec<&ContentType> = candidates
                .iter()
                .filter_map(|c| self.acceptable.iter().find(|a| c.matches(a, false)))
                .collect();

            match allowable.len() {
                0 => continue,
                1 => {
                    debug!(q = q, accepted = %allowable[0], "Negotiated");
                    return Some(allowable[0].clone());
                }
                _ => {
                    let chosen = self.acceptable.iter().find(|a| allowable.contains(a));
                    debug!(q = q, accepted = ?chosen.map(|c| c.mimetype()), "Negotiated by server preference");
                    return chosen.cloned();
                }
            }
        }
        None
    }
}

/// Group the entries of an `Accept` header by effective q, highest first.
/// Explicit `q=0` entries are refused outright and dropped.
pub fn analyse_accept(accept: &str, packaging: Option<&str>) -> Vec<(f64, Vec<ContentType>)> {
    let mut explicit: Vec<(f64, ContentType)> = Vec::new();
    let mut unweighted: Vec<ContentType> = Vec::new();
    let mut highest_q = 0.0_f64;

    for part in accept.split(',') {
        let mut components = part.split(';').map(str::trim);
        let mimetype = match components.next() {
            Some(m) if !m.is_empty() => m,
            _ => continue,
        };

        let mut q = None;
        let mut params = Vec::new();
        for component in components {
            match component.strip_prefix("q=").map(|v| v.parse::<f64>()) {
                Some(Ok(value)) => q = Some(value.clamp(0.0, 1.0)),
                Some(Err(_)) => {}
                None if !component.is_empty() => params.push(component),
                None => {}
            }
        }

        let mut content_type = ContentType::from_mimetype(mimetype, packaging);
        if !params.is_empty() {
            content_type.params = Some(params.join(";"));
        }

        match q {
            Some(value) if value <= 0.0 => continue,
            Some(value) => {
                highest_q = highest_q.max(value);
                explicit.push((value, content_type));
            }
            None => unweighted.push(content_type),
        }
    }

    let q_range = 1.0 - highest_q;
    let count = unweighted.len() as f64;
    let mut weighted = explicit;
    for (i, content_type) in unweighted.into_iter().enumerate() {
        let synthetic = highest_q + q_range * (count - i as f64) / count;
        weighted.push((synthetic, content_type));
    }

    let mut tiers: Vec<(f64, Vec<ContentType>)> = Vec::new();
    for (q, content_type) in weighted {
        match tiers.iter_mut().find(|(tq, _)| *tq == q) {
            Some((_, group)) => group.push(content_type),
            None => tiers.push((q, vec![content_type])),
        }
    }
    tiers.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));
    tiers
}
