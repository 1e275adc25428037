//! Styling grammars embedded in message bodies.
//!
//! Group messages open with an optional name-color tag and a font tag:
//! `<n{HEX}/><f x{HEX}="{FONT}">text`. Private messages use a `<g>` tag
//! with an explicit size field: `<g x{SIZE}s{HEX}="{FONT}">`.
//!
//! The `<f x…>` hex blob is overloaded by length: 2 digits are a size,
//! 3 or 6 are a color, and 5 or 8 are a two-digit size followed by a
//! 3- or 6-digit color.

use std::sync::LazyLock;

use regex::Regex;

static NAME_COLOR_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"<n([\da-fA-F]{1,6})/>").unwrap());
static PUBLIC_STYLE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"<f x([\da-fA-F]+)?="([^"]*)">"#).unwrap());
static PRIVATE_STYLE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"<g x(\d+)?s([\da-fA-F]+)?="([^"]*)">"#).unwrap());
static ANON_SEED_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"<n(\d{4})/>").unwrap());

/// Text styling extracted from (or applied to) a message body.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct TextStyle {
    pub size: Option<u8>,
    pub color: Option<String>,
    pub font: Option<String>,
}

/// The `<n…/>` name color, when present. Valid colors are 1, 3 or 6 hex
/// digits; other lengths are ignored.
pub fn parse_name_color(body: &str) -> Option<String> {
    let caps = NAME_COLOR_RE.captures(body)?;
    let hex = caps.get(1)?.as_str();
    match hex.len() {
        1 | 3 | 6 => Some(hex.to_owned()),
        _ => None,
    }
}

/// The `<n{seed}/>` anonymous seed, when the body carries one.
pub fn parse_anon_seed(body: &str) -> Option<u32> {
    let caps = ANON_SEED_RE.captures(body)?;
    caps.get(1)?.as_str().parse().ok()
}

/// Decode the `<f x…>` tag of a group message body.
pub fn parse_public_style(body: &str) -> TextStyle {
    let Some(caps) = PUBLIC_STYLE_RE.captures(body) else {
        return TextStyle::default();
    };
    let font = caps
        .get(2)
        .map(|m| m.as_str())
        .filter(|f| !f.is_empty())
        .map(str::to_owned);
    let mut style = TextStyle {
        font,
        ..TextStyle::default()
    };
    if let Some(hex) = caps.get(1).map(|m| m.as_str()) {
        match hex.len() {
            2 => style.size = hex.parse().ok(),
            3 | 6 => style.color = Some(hex.to_owned()),
            5 | 8 => {
                style.size = hex[..2].parse().ok();
                style.color = Some(hex[2..].to_owned());
            }
            _ => {}
        }
    }
    style
}

/// Decode the `<g xNNsHEX="font">` tag of a private message body.
pub fn parse_private_style(body: &str) -> TextStyle {
    let Some(caps) = PRIVATE_STYLE_RE.captures(body) else {
        return TextStyle::default();
    };
    TextStyle {
        size: caps.get(1).and_then(|m| m.as_str().parse().ok()),
        color: caps.get(2).map(|m| m.as_str().to_owned()),
        font: caps
            .get(3)
            .map(|m| m.as_str())
            .filter(|f| !f.is_empty())
            .map(str::to_owned),
    }
}

/// Styled prefix for an outgoing group message body.
pub fn format_group_body(text: &str, name_color: &str, size: u8, color: &str, font: &str) -> String {
    let text = text.replace('\n', "<br/>");
    format!("<n{name_color}/><f x{size:02}{color}=\"{font}\">{text}")
}

/// Wrapped body for an outgoing private message.
pub fn format_private_body(
    text: &str,
    name_color: &str,
    size: u8,
    color: &str,
    font: &str,
) -> String {
    let text = text.replace('\n', "<br/>");
    format!("<n{name_color}/><m v=\"1\"><g x{size:02}s{color}=\"{font}\">{text}</g></m>")
}

/// Body for an outgoing anonymous group message: the seed rides in the
/// `<n…/>` tag instead of a color.
pub fn format_anon_body(text: &str, seed: u32) -> String {
    let text = text.replace('\n', "<br/>");
    format!("<n{seed:04}/>{text}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn name_color_lengths() {
        assert_eq!(parse_name_color("<nF00/>hello").as_deref(), Some("F00"));
        assert_eq!(parse_name_color("<n0/>x").as_deref(), Some("0"));
        assert_eq!(parse_name_color("<nC0FFEE/>x").as_deref(), Some("C0FFEE"));
        assert_eq!(parse_name_color("<nAB/>x"), None);
        assert_eq!(parse_name_color("no tag"), None);
    }

    #[test]
    fn public_style_five_digit_hex_splits_size_and_color() {
        let s = parse_public_style("<f x11F00=\"arial\">hi");
        assert_eq!(s.size, Some(11));
        assert_eq!(s.color.as_deref(), Some("F00"));
        assert_eq!(s.font.as_deref(), Some("arial"));
    }

    #[test]
    fn public_style_eight_digit_hex() {
        let s = parse_public_style("<f x14C0FFEE=\"1\">hi");
        assert_eq!(s.size, Some(14));
        assert_eq!(s.color.as_deref(), Some("C0FFEE"));
    }

    #[test]
    fn public_style_size_only_and_color_only() {
        assert_eq!(parse_public_style("<f x12=\"\">x").size, Some(12));
        assert_eq!(
            parse_public_style("<f xF00=\"\">x").color.as_deref(),
            Some("F00")
        );
        assert_eq!(parse_public_style("<f xF00=\"\">x").size, None);
    }

    #[test]
    fn private_style_parses_all_fields() {
        let s = parse_private_style("<g x12s00F=\"times\">hello</g>");
        assert_eq!(s.size, Some(12));
        assert_eq!(s.color.as_deref(), Some("00F"));
        assert_eq!(s.font.as_deref(), Some("times"));
    }

    #[test]
    fn anon_seed_requires_four_digits() {
        assert_eq!(parse_anon_seed("<n3953/>hi"), Some(3953));
        assert_eq!(parse_anon_seed("<n395/>hi"), None);
    }

    #[test]
    fn group_body_formats_newlines_and_style() {
        let body = format_group_body("a\nb", "F00", 11, "000", "1");
        assert_eq!(body, "<nF00/><f x11000=\"1\">a<br/>b");
    }

    #[test]
    fn formatted_bodies_parse_back() {
        let body = format_group_body("hi", "F00", 14, "ABC", "arial");
        assert_eq!(parse_name_color(&body).as_deref(), Some("F00"));
        let style = parse_public_style(&body);
        assert_eq!(style.size, Some(14));
        assert_eq!(style.color.as_deref(), Some("ABC"));

        let pm = format_private_body("hi", "0F0", 11, "000", "1");
        let style = parse_private_style(&pm);
        assert_eq!(style.size, Some(11));
        assert_eq!(style.color.as_deref(), Some("000"));
    }
}
