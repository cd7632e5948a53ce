//! Ampersand escaping for URLs embedded in manifest text.

/// Replace every `&` with `&amp;`.
///
/// Presigned query strings are otherwise free of XML-special characters, so
/// this is the only escaping needed before they are placed inside an element.
///
/// # Examples
///
/// ```
/// use amiforge_xml::escape_ampersands;
///
/// assert_eq!(escape_ampersands("a=1&b=2"), "a=1&amp;b=2");
/// ```
#[must_use]
pub fn escape_ampersands(input: &str) -> String {
    let extra = input.matches('&').count() * 4;
    let mut out = String::with_capacity(input.len() + extra);
    for (i, piece) in input.split('&').enumerate() {
        if i > 0 {
            out.push_str("&amp;");
        }
        out.push_str(piece);
    }
    out
}
