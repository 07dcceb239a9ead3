//! WebDAV XML document model and shared helpers.
//!
//! PROPFIND answers are multistatus documents in the `DAV:` namespace.
//! The element set this server emits is small and fixed, so responses
//! are rendered straight into a string; property text is escaped here.

use chrono::{DateTime, Utc};

/// Status line attached to every propstat this server produces.
const PROPSTAT_OK: &str = "HTTP/1.1 200 OK";

/// One PROPFIND response document.
#[derive(Debug, Default)]
pub struct Multistatus {
    pub responses: Vec<DavResponse>,
}

/// A single `response` element describing one filesystem node.
#[derive(Debug)]
pub struct DavResponse {
    pub href: String,
    pub prop: Prop,
}

/// The property set rendered for a node. Absent optional fields are
/// omitted from the document.
#[derive(Debug, Default)]
pub struct Prop {
    pub display_name: String,
    pub is_collection: bool,
    pub content_length: Option<u64>,
    pub content_type: Option<String>,
    pub last_modified: Option<DateTime<Utc>>,
    pub etag: Option<String>,
}

impl Multistatus {
    /// Renders the document, UTF-8 declaration included.
    pub fn to_xml(&self) -> String {
        let mut out = String::with_capacity(128 + self.responses.len() * 256);
        out.push_str("<?xml version=\"1.0\" encoding=\"utf-8\"?>\n");
        out.push_str("<multistatus xmlns=\"DAV:\">");
        for response in &self.responses {
            response.render(&mut out);
        }
        out.push_str("</multistatus>");
        out
    }
}

impl DavResponse {
    fn render(&self, out: &mut String) {
        out.push_str("<response><href>");
        escape_into(out, &self.href);
        out.push_str("</href><propstat><prop>");

        if !self.prop.display_name.is_empty() {
            out.push_str("<displayname>");
            escape_into(out, &self.prop.display_name);
            out.push_str("</displayname>");
        }
        // Files carry no resourcetype at all; collections always do.
        if self.prop.is_collection {
            out.push_str("<resourcetype><collection/></resourcetype>");
        }
        if let Some(length) = self.prop.content_length {
            out.push_str("<getcontentlength>");
            out.push_str(&length.to_string());
            out.push_str("</getcontentlength>");
        }
        if let Some(content_type) = &self.prop.content_type {
            out.push_str("<getcontenttype>");
            escape_into(out, content_type);
            out.push_str("</getcontenttype>");
        }
        if let Some(modified) = self.prop.last_modified {
            out.push_str("<getlastmodified>");
            out.push_str(&format_http_date(modified));
            out.push_str("</getlastmodified>");
        }
        if let Some(etag) = &self.prop.etag {
            out.push_str("<getetag>");
            escape_into(out, etag);
            out.push_str("</getetag>");
        }

        out.push_str("</prop><status>");
        out.push_str(PROPSTAT_OK);
        out.push_str("</status></propstat></response>");
    }
}

/// Formats a timestamp as RFC1123 GMT, the date form WebDAV clients
/// expect.
pub fn format_http_date(t: DateTime<Utc>) -> String {
    t.format("%a, %d %b %Y %H:%M:%S GMT").to_string()
}

/// Parses an RFC1123 `Last-Modified` value.
pub fn parse_http_date(s: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc2822(s)
        .ok()
        .map(|t| t.with_timezone(&Utc))
}

/// Builds the change token for a file: its URL plus the last-modified
/// time collapsed to `YYYYMMDDHHMMSS`. A cheap freshness marker, not a
/// content hash.
pub fn generate_etag(url: &str, modified: DateTime<Utc>) -> String {
    format!("\"{}-{}\"", url, modified.format("%Y%m%d%H%M%S"))
}

fn escape_into(out: &mut String, text: &str) {
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            other => out.push(other),
        }
    }
}
