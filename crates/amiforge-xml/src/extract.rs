//! Field extraction from API response bodies.
//!
//! Responses are read with a streaming [`Reader`]; an element is matched by
//! its local name anywhere in the document and its raw inner content is
//! returned as a slice of the input. Nested elements of interest (for
//! example `regionName` inside `regionInfo`) are found by extracting the
//! outer element first and searching within it.

use quick_xml::Reader;
use quick_xml::events::Event;
use tracing::trace;

use crate::error::XmlError;

/// Return the raw inner content of every `<tag>` element, in document order.
///
/// Self-closing `<tag/>` elements yield an empty string. Elements nested
/// inside a match are not reported separately.
///
/// # Errors
///
/// Returns [`XmlError`] if the document is malformed or a matched element is
/// never closed.
///
/// # Examples
///
/// ```
/// use amiforge_xml::extract_all;
///
/// let body = "<r><item><regionName>eu-west-1</regionName></item><item><regionName>us-east-1</regionName></item></r>";
/// assert_eq!(extract_all(body, "regionName").unwrap(), vec!["eu-west-1", "us-east-1"]);
/// ```
pub fn extract_all<'a>(body: &'a str, tag: &str) -> Result<Vec<&'a str>, XmlError> {
    let mut reader = Reader::from_str(body);
    let mut found = Vec::new();

    loop {
        match reader.read_event()? {
            Event::Start(e) if e.local_name().as_ref() == tag.as_bytes() => {
                let start = position(&reader);
                let end = skip_to_matching_end(&mut reader, tag)?;
                found.push(&body[start..end]);
            }
            Event::Empty(e) if e.local_name().as_ref() == tag.as_bytes() => found.push(""),
            Event::Eof => return Ok(found),
            _ => {}
        }
    }
}

/// Return the raw inner content of the first `<tag>` element, if any.
///
/// # Errors
///
/// Returns [`XmlError`] if the document is malformed before the first match
/// is complete.
pub fn extract_first<'a>(body: &'a str, tag: &str) -> Result<Option<&'a str>, XmlError> {
    let mut reader = Reader::from_str(body);

    loop {
        match reader.read_event()? {
            Event::Start(e) if e.local_name().as_ref() == tag.as_bytes() => {
                let start = position(&reader);
                let end = skip_to_matching_end(&mut reader, tag)?;
                return Ok(Some(&body[start..end]));
            }
            Event::Empty(e) if e.local_name().as_ref() == tag.as_bytes() => return Ok(Some("")),
            Event::Eof => {
                trace!(tag, "element not found in response");
                return Ok(None);
            }
            _ => {}
        }
    }
}

/// Return the unescaped, trimmed text of the first `<tag>` element, if any.
///
/// # Errors
///
/// Returns [`XmlError`] if the document is malformed or the text contains an
/// invalid entity reference.
///
/// # Examples
///
/// ```
/// use amiforge_xml::extract_text;
///
/// let body = "<task><statusMessage> Pending &amp; queued </statusMessage></task>";
/// assert_eq!(extract_text(body, "statusMessage").unwrap().as_deref(), Some("Pending & queued"));
/// ```
pub fn extract_text(body: &str, tag: &str) -> Result<Option<String>, XmlError> {
    let Some(raw) = extract_first(body, tag)? else {
        return Ok(None);
    };
    let text = quick_xml::escape::unescape(raw.trim()).map_err(|err| XmlError::Text {
        tag: tag.to_owned(),
        message: err.to_string(),
    })?;
    Ok(Some(text.into_owned()))
}

/// Whether the body contains `<tag>value</tag>` verbatim.
#[must_use]
pub fn contains_element(body: &str, tag: &str, value: &str) -> bool {
    body.contains(&format!("<{tag}>{value}</{tag}>"))
}

fn position(reader: &Reader<&[u8]>) -> usize {
    usize::try_from(reader.buffer_position()).unwrap_or(usize::MAX)
}

/// Consume events through the end tag matching an already-read start tag and
/// return the byte offset where that end tag begins.
fn skip_to_matching_end(reader: &mut Reader<&[u8]>, tag: &str) -> Result<usize, XmlError> {
    let mut depth: u32 = 1;
    loop {
        let before = position(reader);
        match reader.read_event()? {
            Event::Start(_) => depth += 1,
            Event::End(_) => {
                depth -= 1;
                if depth == 0 {
                    return Ok(before);
                }
            }
            Event::Eof => return Err(XmlError::Unterminated(tag.to_owned())),
            _ => {}
        }
    }
}
