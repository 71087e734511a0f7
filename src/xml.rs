//! Small writer/reader helpers over quick-xml shared by the document modules

use crate::error::ServerError;
use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};
use quick_xml::name::ResolveResult;
use quick_xml::{NsReader, Writer};

/// Indented XML document builder
pub struct DocWriter {
    writer: Writer<Vec<u8>>,
}

impl DocWriter {
    pub fn new() -> Result<Self, ServerError> {
        let mut writer = Writer::new_with_indent(Vec::new(), b' ', 2);
        writer.write_event(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)))?;
        Ok(Self { writer })
    }

    pub fn start(&mut self, name: &str, attrs: &[(&str, &str)]) -> Result<(), ServerError> {
        let mut el = BytesStart::new(name);
        for attr in attrs {
            el.push_attribute(*attr);
        }
        self.writer.write_event(Event::Start(el))?;
        Ok(())
    }

    pub fn end(&mut self, name: &str) -> Result<(), ServerError> {
        self.writer.write_event(Event::End(BytesEnd::new(name)))?;
        Ok(())
    }

    pub fn empty(&mut self, name: &str, attrs: &[(&str, &str)]) -> Result<(), ServerError> {
        let mut el = BytesStart::new(name);
        for attr in attrs {
            el.push_attribute(*attr);
        }
        self.writer.write_event(Event::Empty(el))?;
        Ok(())
    }

    /// `<name attrs>text</name>`
    pub fn text(&mut self, name: &str, attrs: &[(&str, &str)], text: &str) -> Result<(), ServerError> {
        self.start(name, attrs)?;
        self.writer.write_event(Event::Text(BytesText::new(text)))?;
        self.end(name)
    }

    pub fn finish(self) -> String {
        String::from_utf8_lossy(&self.writer.into_inner()).into_owned()
    }
}

/// Owned namespace URI of a resolved name, if bound
pub fn namespace_of(ns: &ResolveResult) -> Option<String> {
    match ns {
        ResolveResult::Bound(n) => Some(String::from_utf8_lossy(n.as_ref()).into_owned()),
        _ => None,
    }
}

/// Value of a namespaced attribute such as `rdf:about`
pub fn ns_attr<R>(
    reader: &NsReader<R>,
    el: &BytesStart,
    ns: &str,
    local: &str,
) -> Result<Option<String>, ServerError> {
    for attr in el.attributes() {
        let attr = attr?;
        let (resolved, name) = reader.resolve_attribute(attr.key);
        if namespace_of(&resolved).as_deref() == Some(ns) && name.as_ref() == local.as_bytes() {
            return Ok(Some(attr.unescape_value()?.into_owned()));
        }
    }
    Ok(None)
}
