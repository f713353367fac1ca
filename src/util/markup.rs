use std::borrow::Cow;
use std::sync::LazyLock;

use regex::Regex;

static TAG_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)<!--.*?-->|<[^<>]*>").expect("valid tag regex"));

static ENTITY_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"&(#[0-9]{1,7}|#[xX][0-9a-fA-F]{1,6}|[a-zA-Z][a-zA-Z0-9]{1,8});")
        .expect("valid entity regex")
});

/// Remove markup tags and comments, keeping the text between them
pub fn strip_markup(s: &str) -> Cow<'_, str> {
    TAG_RE.replace_all(s, "")
}

/// Decode named and numeric HTML character references.
/// Unknown references are left as written.
pub fn decode_entities(s: &str) -> Cow<'_, str> {
    ENTITY_RE.replace_all(s, |caps: &regex::Captures| {
        let body = &caps[1];
        let decoded = if let Some(num) = body.strip_prefix('#') {
            let code = match num.strip_prefix(['x', 'X']) {
                Some(hex) => u32::from_str_radix(hex, 16).ok(),
                None => num.parse::<u32>().ok(),
            };
            code.and_then(char::from_u32).map(String::from)
        } else {
            named_entity(body).map(|c| c.to_string())
        };
        decoded.unwrap_or_else(|| caps[0].to_string())
    })
}

fn named_entity(name: &str) -> Option<char> {
    let c = match name {
        "amp" => '&',
        "lt" => '<',
        "gt" => '>',
        "quot" => '"',
        "apos" => '\'',
        "nbsp" => '\u{a0}',
        "ndash" => '\u{2013}',
        "mdash" => '\u{2014}',
        "hellip" => '\u{2026}',
        "laquo" => '\u{ab}',
        "raquo" => '\u{bb}',
        "copy" => '\u{a9}',
        _ => return None,
    };
    Some(c)
}

/// Escape a value for use inside a double-quoted attribute
pub fn escape_attribute(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '"' => out.push_str("&quot;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            _ => out.push(c),
        }
    }
    out
}

/// Markup-free, entity-decoded, whitespace-collapsed text
pub fn plain_text(s: &str) -> String {
    let stripped = strip_markup(s);
    let decoded = decode_entities(&stripped);
    decoded
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_tags_and_comments() {
        assert_eq!(
            strip_markup("<b>buy</b> <!-- x=\"1\" -->milk<br/>"),
            "buy milk"
        );
    }

    #[test]
    fn decodes_named_and_numeric_entities() {
        assert_eq!(decode_entities("a &amp; b &lt;c&gt;"), "a & b <c>");
        assert_eq!(decode_entities("&#65;&#x42;"), "AB");
        assert_eq!(decode_entities("&bogus; &"), "&bogus; &");
    }

    #[test]
    fn escape_then_decode() {
        let raw = r#"say "hi" & <go>"#;
        assert_eq!(decode_entities(&escape_attribute(raw)), raw);
    }

    #[test]
    fn plain_text_collapses_whitespace() {
        assert_eq!(plain_text("  <i>a</i>\t &nbsp;b "), "a b");
    }
}
