//! The Statement: a container's deposit history and state
//!
//! Persisted as RDF/XML (an ORE resource map with SWORD extensions) and
//! served either as that RDF or as an Atom feed. The RDF form is the
//! durable record: [`Statement::parse`] inverts [`Statement::to_rdf_xml`]
//! for the identity pair, the state, the original deposits and the plain
//! aggregates.

use crate::error::ServerError;
use crate::namespaces::{ATOM_NS, DATE_FORMAT, ORE_NS, RDF_NS, SWORD_NS, XSD_NS};
use crate::xml::{self, DocWriter};
use chrono::{DateTime, NaiveDateTime, SubsecRound, TimeZone, Utc};
use quick_xml::events::Event;
use quick_xml::NsReader;

/// The two states a container can be in
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    InProgress,
    Archived,
}

impl State {
    pub fn from_in_progress(in_progress: bool) -> Self {
        if in_progress {
            State::InProgress
        } else {
            State::Archived
        }
    }

    pub fn uri(&self) -> &'static str {
        match self {
            State::InProgress => "http://purl.org/net/sword/state/in-progress",
            State::Archived => "http://purl.org/net/sword/state/archived",
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            State::InProgress => {
                "The work is currently in progress, and has not passed to a reviewer"
            }
            State::Archived => "The work has passed through review and is now in the archive",
        }
    }
}

/// One discrete deposit event
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OriginalDeposit {
    pub uri: String,
    pub deposited_on: DateTime<Utc>,
    pub packaging: String,
    pub deposited_by: String,
    pub on_behalf_of: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Statement {
    pub aggregation_uri: String,
    pub rem_uri: String,
    pub original_deposits: Vec<OriginalDeposit>,
    pub aggregates: Vec<String>,
    pub in_progress: bool,
}

impl Statement {
    pub fn new(aggregation_uri: impl Into<String>, rem_uri: impl Into<String>) -> Self {
        Self {
            aggregation_uri: aggregation_uri.into(),
            rem_uri: rem_uri.into(),
            ..Default::default()
        }
    }

    pub fn state(&self) -> State {
        State::from_in_progress(self.in_progress)
    }

    /// Append a deposit event. No dedup; timestamps keep second precision
    /// so they survive serialisation.
    pub fn add_original_deposit(
        &mut self,
        uri: impl Into<String>,
        deposited_on: DateTime<Utc>,
        packaging: impl Into<String>,
        deposited_by: impl Into<String>,
        on_behalf_of: Option<String>,
    ) {
        self.original_deposits.push(OriginalDeposit {
            uri: uri.into(),
            deposited_on: deposited_on.trunc_subsecs(0),
            packaging: packaging.into(),
            deposited_by: deposited_by.into(),
            on_behalf_of,
        });
    }

    /// Union URIs into the plain aggregates
    pub fn add_aggregates<I, S>(&mut self, uris: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        for uri in uris {
            let uri = uri.into();
            if !self.aggregates.contains(&uri) {
                self.aggregates.push(uri);
            }
        }
    }

    pub fn to_rdf_xml(&self) -> Result<String, ServerError> {
        let mut doc = DocWriter::new()?;
        self.write_rdf(&mut doc)?;
        Ok(doc.finish())
    }

    /// Write the `rdf:RDF` element into an enclosing document
    pub(crate) fn write_rdf(&self, doc: &mut DocWriter) -> Result<(), ServerError> {
        let state = self.state();

        doc.start(
            "rdf:RDF",
            &[("xmlns:rdf", RDF_NS), ("xmlns:ore", ORE_NS), ("xmlns:sword", SWORD_NS)],
        )?;

        doc.start("rdf:Description", &[("rdf:about", self.rem_uri.as_str())])?;
        doc.empty("ore:describes", &[("rdf:resource", self.aggregation_uri.as_str())])?;
        doc.end("rdf:Description")?;

        doc.start("rdf:Description", &[("rdf:about", self.aggregation_uri.as_str())])?;
        doc.empty("ore:isDescribedBy", &[("rdf:resource", self.rem_uri.as_str())])?;
        for uri in &self.aggregates {
            doc.empty("ore:aggregates", &[("rdf:resource", uri.as_str())])?;
        }
        for deposit in &self.original_deposits {
            doc.empty("ore:aggregates", &[("rdf:resource", deposit.uri.as_str())])?;
            doc.empty("sword:originalDeposit", &[("rdf:resource", deposit.uri.as_str())])?;
        }
        doc.empty("sword:state", &[("rdf:resource", state.uri())])?;
        doc.end("rdf:Description")?;

        let date_type = format!("{}dateTime", XSD_NS);
        let string_type = format!("{}string", XSD_NS);
        for deposit in &self.original_deposits {
            doc.start("rdf:Description", &[("rdf:about", deposit.uri.as_str())])?;
            doc.empty("sword:packaging", &[("rdf:resource", deposit.packaging.as_str())])?;
            doc.text(
                "sword:depositedOn",
                &[("rdf:datatype", date_type.as_str())],
                &deposit.deposited_on.format(DATE_FORMAT).to_string(),
            )?;
            doc.text(
                "sword:depositedBy",
                &[("rdf:datatype", string_type.as_str())],
                &deposit.deposited_by,
            )?;
            if let Some(obo) = &deposit.on_behalf_of {
                doc.text(
                    "sword:depositedOnBehalfOf",
                    &[("rdf:datatype", string_type.as_str())],
                    obo,
                )?;
            }
            doc.end("rdf:Description")?;
        }

        doc.start("rdf:Description", &[("rdf:about", state.uri())])?;
        doc.text("sword:stateDescription", &[], state.description())?;
        doc.end("rdf:Description")?;

        doc.end("rdf:RDF")
    }

    pub fn to_atom_feed(&self) -> Result<String, ServerError> {
        let state = self.state();
        let mut doc = DocWriter::new()?;
        doc.start("atom:feed", &[("xmlns:atom", ATOM_NS), ("xmlns:sword", SWORD_NS)])?;

        doc.start("sword:state", &[("href", state.uri())])?;
        doc.text("sword:stateDescription", &[], state.description())?;
        doc.end("sword:state")?;

        let original_term = format!("{}originalDeposit", SWORD_NS);
        for deposit in &self.original_deposits {
            doc.start("atom:entry", &[])?;
            doc.empty(
                "atom:category",
                &[
                    ("scheme", SWORD_NS),
                    ("term", original_term.as_str()),
                    ("label", "Orignal Deposit"),
                ],
            )?;
            doc.empty("atom:content", &[("type", "application/zip"), ("src", deposit.uri.as_str())])?;
            doc.text("sword:packaging", &[], deposit.packaging.as_str())?;
            doc.text(
                "sword:depositedOn",
                &[],
                &deposit.deposited_on.format(DATE_FORMAT).to_string(),
            )?;
            doc.text("sword:depositedBy", &[], &deposit.deposited_by)?;
            if let Some(obo) = &deposit.on_behalf_of {
                doc.text("sword:depositedOnBehalfOf", &[], obo)?;
            }
            doc.end("atom:entry")?;
        }

        for uri in &self.aggregates {
            doc.start("atom:entry", &[])?;
            doc.empty("atom:content", &[("type", "application/octet-stream"), ("src", uri.as_str())])?;
            doc.end("atom:entry")?;
        }

        doc.end("atom:feed")?;
        Ok(doc.finish())
    }

    /// Rebuild a statement from its RDF/XML serialisation.
    ///
    /// An original deposit is an `rdf:Description` whose `about` is the
    /// target of a `sword:originalDeposit` assertion; the plain aggregates are
    /// the `ore:aggregates` targets that are not original deposits.
    pub fn parse(rdf: &[u8]) -> Result<Statement, ServerError> {
        let text = std::str::from_utf8(rdf)
            .map_err(|e| ServerError::Statement(format!("statement is not UTF-8: {}", e)))?;
        let mut reader = NsReader::from_str(text);

        let mut statement = Statement::default();
        let mut aggregated: Vec<String> = Vec::new();
        let mut declared_originals: Vec<String> = Vec::new();
        let mut described: Vec<DescriptionFields> = Vec::new();
        let mut description: Option<DescriptionFields> = None;
        let mut field: Option<TextField> = None;
        let mut saw_root = false;

        loop {
            let (resolved, event) = reader.read_resolved_event()?;
            let ns = xml::namespace_of(&resolved);
            match event {
                Event::Start(ref el) | Event::Empty(ref el) => {
                    let is_start = matches!(event, Event::Start(_));
                    let local = el.local_name();
                    let local = local.as_ref();
                    let ns = ns.as_deref();

                    match (ns, local) {
                        (Some(RDF_NS), b"RDF") => saw_root = true,
                        (Some(RDF_NS), b"Description") => {
                            let about = xml::ns_attr(&reader, el, RDF_NS, "about")?
                                .unwrap_or_default();
                            description = Some(DescriptionFields::new(about));
                        }
                        (Some(ORE_NS), b"describes") => {
                            if let Some(desc) = &description {
                                statement.rem_uri = desc.about.clone();
                                statement.aggregation_uri =
                                    xml::ns_attr(&reader, el, RDF_NS, "resource")?.unwrap_or_default();
                            }
                        }
                        (Some(ORE_NS), b"aggregates") => {
                            if let Some(resource) = xml::ns_attr(&reader, el, RDF_NS, "resource")? {
                                aggregated.push(resource);
                            }
                        }
                        (Some(SWORD_NS), b"originalDeposit") => {
                            if let Some(resource) = xml::ns_attr(&reader, el, RDF_NS, "resource")? {
                                declared_originals.push(resource);
                            }
                        }
                        (Some(SWORD_NS), b"state") => {
                            let state = xml::ns_attr(&reader, el, RDF_NS, "resource")?;
                            statement.in_progress =
                                state.as_deref() == Some(State::InProgress.uri());
                        }
                        (Some(SWORD_NS), b"packaging") => {
                            if let Some(desc) = description.as_mut() {
                                desc.packaging = xml::ns_attr(&reader, el, RDF_NS, "resource")?;
                            }
                        }
                        (Some(SWORD_NS), b"depositedOn") if is_start => {
                            field = Some(TextField::DepositedOn)
                        }
                        (Some(SWORD_NS), b"depositedBy") if is_start => {
                            field = Some(TextField::DepositedBy)
                        }
                        (Some(SWORD_NS), b"depositedOnBehalfOf") if is_start => {
                            field = Some(TextField::OnBehalfOf)
                        }
                        _ => {}
                    }
                }
                Event::Text(t) => {
                    if let (Some(f), Some(desc)) = (field, description.as_mut()) {
                        let value = t.unescape()?.trim().to_string();
                        match f {
                            TextField::DepositedOn => desc.deposited_on = Some(value),
                            TextField::DepositedBy => desc.deposited_by = Some(value),
                            TextField::OnBehalfOf => desc.on_behalf_of = Some(value),
                        }
                    }
                }
                Event::End(ref el) => {
                    field = None;
                    let is_description = ns.as_deref() == Some(RDF_NS)
                        && el.local_name().as_ref() == b"Description";
                    if is_description {
                        described.extend(description.take());
                    }
                }
                Event::Eof => break,
                _ => {}
            }
        }

        if !saw_root {
            return Err(ServerError::Statement("missing rdf:RDF root".to_string()));
        }

        for desc in described {
            if !declared_originals.contains(&desc.about) {
                continue;
            }
            if let Some(deposit) = desc.into_deposit()? {
                statement.original_deposits.push(deposit);
            }
        }

        statement.aggregates = Vec::new();
        for uri in aggregated {
            let is_original = statement.original_deposits.iter().any(|d| d.uri == uri);
            if !is_original && !statement.aggregates.contains(&uri) {
                statement.aggregates.push(uri);
            }
        }

        Ok(statement)
    }
}

#[derive(Debug, Clone, Copy)]
enum TextField {
    DepositedOn,
    DepositedBy,
    OnBehalfOf,
}

struct DescriptionFields {
    about: String,
    packaging: Option<String>,
    deposited_on: Option<String>,
    deposited_by: Option<String>,
    on_behalf_of: Option<String>,
}

impl DescriptionFields {
    fn new(about: String) -> Self {
        Self {
            about,
            packaging: None,
            deposited_on: None,
            deposited_by: None,
            on_behalf_of: None,
        }
    }

    fn into_deposit(self) -> Result<Option<OriginalDeposit>, ServerError> {
        let packaging = match self.packaging {
            Some(p) => p,
            None => return Ok(None),
        };
        let raw_date = self.deposited_on.ok_or_else(|| {
            ServerError::Statement(format!("deposit {} has no depositedOn", self.about))
        })?;
        let naive = NaiveDateTime::parse_from_str(&raw_date, DATE_FORMAT).map_err(|e| {
            ServerError::Statement(format!("bad depositedOn '{}': {}", raw_date, e))
        })?;
        Ok(Some(OriginalDeposit {
            uri: self.about,
            deposited_on: Utc.from_utc_datetime(&naive),
            packaging,
            deposited_by: self.deposited_by.unwrap_or_default(),
            on_behalf_of: self.on_behalf_of,
        }))
    }
}
