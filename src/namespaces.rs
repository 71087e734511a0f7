//! XML namespaces and fixed protocol URIs

pub const APP_NS: &str = "http://www.w3.org/2007/app";
pub const ATOM_NS: &str = "http://www.w3.org/2005/Atom";
pub const SWORD_NS: &str = "http://purl.org/net/sword/terms/";
pub const DC_NS: &str = "http://purl.org/dc/terms/";
pub const RDF_NS: &str = "http://www.w3.org/1999/02/22-rdf-syntax-ns#";
pub const ORE_NS: &str = "http://www.openarchives.org/ore/terms/";
pub const XSD_NS: &str = "http://www.w3.org/2001/XMLSchema#";

/// Packaging formats
pub mod packaging {
    pub const BINARY: &str = "http://purl.org/net/sword/package/Binary";
    pub const SIMPLE_ZIP: &str = "http://purl.org/net/sword/package/SimpleZip";
    pub const METS_DSPACE_SIP: &str = "http://purl.org/net/sword/package/METSDSpaceSIP";
    /// Sentinel that makes the server answer with ErrorContent
    pub const ERROR: &str = "http://purl.org/net/sword/package/error";
}

/// Link relations used in receipts and statements
pub mod rel {
    pub const ADD: &str = "http://purl.org/net/sword/terms/add";
    pub const STATEMENT: &str = "http://purl.org/net/sword/terms/statement";
    pub const ORIGINAL_DEPOSIT: &str = "http://purl.org/net/sword/terms/originalDeposit";
    pub const DERIVED_RESOURCE: &str = "http://purl.org/net/sword/terms/derivedResource";
}

pub const GENERATOR_URI: &str = "http://www.swordapp.org/sss";
pub const GENERATOR_VERSION: &str = "1.0";

/// Timestamp layout used in documents and stored filenames
pub const DATE_FORMAT: &str = "%Y-%m-%dT%H:%M:%SZ";
