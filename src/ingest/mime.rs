//! MIME decoding: RFC 2047 header words and plain-text body extraction.
//!
//! Everything here is pure and infallible. Undecodable input degrades to
//! replacement characters or the body placeholder, never to an error.
//!
//! Headers are decoded here rather than with `MailHeader::get_value()`, which
//! decodes each encoded word alone and so breaks multibyte characters split
//! across adjacent words.

use base64::Engine;
use base64::alphabet;
use base64::engine::{DecodePaddingMode, GeneralPurpose, GeneralPurposeConfig};
use mailparse::{DispositionType, MailHeaderMap, ParsedMail};
use tracing::{debug, warn};

/// Body text used when no readable text part exists.
pub const BODY_PLACEHOLDER: &str = "[no readable body]";

const PLAIN: &str = "text/plain";
const HTML: &str = "text/html";

/// Encoded words in the wild are sloppy about padding.
const LENIENT_BASE64: GeneralPurpose = GeneralPurpose::new(
    &alphabet::STANDARD,
    GeneralPurposeConfig::new()
        .with_decode_padding_mode(DecodePaddingMode::Indifferent)
        .with_decode_allow_trailing_bits(true),
);

/// A body chosen from a message, with the MIME type it came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractedBody {
    pub text: String,
    pub content_type: String,
}

impl ExtractedBody {
    fn placeholder() -> Self {
        Self {
            text: BODY_PLACEHOLDER.to_string(),
            content_type: PLAIN.to_string(),
        }
    }
}

// ── Headers ─────────────────────────────────────────────────────────

/// Decode the first header called `name`, or an empty string if absent.
pub fn header_text(mail: &ParsedMail<'_>, name: &str) -> String {
    mail.headers
        .get_first_header(name)
        .map(|h| decode_header_text(h.get_value_raw()).trim().to_string())
        .unwrap_or_default()
}

#[derive(Debug)]
struct Segment {
    bytes: Vec<u8>,
    charset: Option<String>,
}

/// Decode a raw header value containing RFC 2047 encoded words.
///
/// Adjacent words in the same charset are concatenated before charset
/// decoding, so a multibyte sequence split across two words survives.
pub fn decode_header_text(raw: &[u8]) -> String {
    let input = unfold(raw);
    let mut segments: Vec<Segment> = Vec::new();
    let mut literal: Vec<u8> = Vec::new();
    let mut i = 0;

    while i < input.len() {
        if input[i..].starts_with(b"=?") {
            if let Some((charset, bytes, consumed)) = parse_encoded_word(&input[i..]) {
                let after_word = matches!(segments.last(), Some(s) if s.charset.is_some());
                let only_space = literal.iter().all(|b| b.is_ascii_whitespace());
                if !(after_word && only_space) {
                    push_segment(&mut segments, std::mem::take(&mut literal), None);
                }
                literal.clear();
                push_segment(&mut segments, bytes, Some(charset));
                i += consumed;
                continue;
            }
        }
        literal.push(input[i]);
        i += 1;
    }
    push_segment(&mut segments, literal, None);

    segments
        .iter()
        .map(|s| decode_charset(&s.bytes, s.charset.as_deref()))
        .collect()
}

fn push_segment(segments: &mut Vec<Segment>, bytes: Vec<u8>, charset: Option<String>) {
    if bytes.is_empty() {
        return;
    }
    if let Some(last) = segments.last_mut() {
        let same = match (&last.charset, &charset) {
            (Some(a), Some(b)) => a.eq_ignore_ascii_case(b),
            (None, None) => true,
            _ => false,
        };
        if same {
            last.bytes.extend_from_slice(&bytes);
            return;
        }
    }
    segments.push(Segment { bytes, charset });
}

/// Drop the line breaks left by header folding.
fn unfold(raw: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(raw.len());
    let mut i = 0;
    while i < raw.len() {
        match raw[i] {
            b'\r' if raw.get(i + 1) == Some(&b'\n') => i += 2,
            b'\r' | b'\n' => i += 1,
            b => {
                out.push(b);
                i += 1;
            }
        }
    }
    out
}

/// Parse `=?charset?enc?text?=` at the start of `input`.
///
/// Returns the charset, the transfer-decoded bytes and the bytes consumed.
fn parse_encoded_word(input: &[u8]) -> Option<(String, Vec<u8>, usize)> {
    let body = input.strip_prefix(b"=?")?;
    let q1 = body.iter().position(|&b| b == b'?')?;
    let charset = std::str::from_utf8(&body[..q1]).ok()?;
    if charset.is_empty() || charset.bytes().any(|b| b.is_ascii_whitespace()) {
        return None;
    }

    let rest = &body[q1 + 1..];
    if rest.len() < 2 || rest[1] != b'?' {
        return None;
    }
    let encoding = rest[0].to_ascii_uppercase();

    let text_start = &rest[2..];
    let end = text_start.windows(2).position(|w| w == b"?=")?;
    let text = &text_start[..end];
    if text.iter().any(|b| b.is_ascii_whitespace()) {
        return None;
    }

    let bytes = match encoding {
        b'B' => LENIENT_BASE64.decode(text).ok()?,
        b'Q' => decode_q(text),
        _ => return None,
    };

    let consumed = 2 + q1 + 1 + 2 + end + 2;
    Some((charset.to_string(), bytes, consumed))
}

/// Q-encoding: `_` is a space and `=XX` is a hex byte.
fn decode_q(input: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(input.len());
    let mut i = 0;
    while i < input.len() {
        match input[i] {
            b'_' => {
                out.push(b' ');
                i += 1;
            }
            b'=' if i + 2 < input.len() => {
                match (hex_val(input[i + 1]), hex_val(input[i + 2])) {
                    (Some(hi), Some(lo)) => {
                        out.push((hi << 4) | lo);
                        i += 3;
                    }
                    _ => {
                        out.push(b'=');
                        i += 1;
                    }
                }
            }
            b => {
                out.push(b);
                i += 1;
            }
        }
    }
    out
}

fn hex_val(b: u8) -> Option<u8> {
    match b {
        b'0'..=b'9' => Some(b - b'0'),
        b'a'..=b'f' => Some(b - b'a' + 10),
        b'A'..=b'F' => Some(b - b'A' + 10),
        _ => None,
    }
}

/// Decode bytes with a charset label, falling back to UTF-8.
///
/// Invalid sequences become U+FFFD. An RFC 2231 language suffix
/// (`utf-8*en`) is ignored.
pub fn decode_charset(bytes: &[u8], charset: Option<&str>) -> String {
    let Some(label) = charset else {
        return String::from_utf8_lossy(bytes).into_owned();
    };
    let label = label.split('*').next().unwrap_or(label).trim();

    if label.eq_ignore_ascii_case("utf-8") || label.eq_ignore_ascii_case("utf8") {
        return String::from_utf8_lossy(bytes).into_owned();
    }

    match encoding_rs::Encoding::for_label(label.as_bytes()) {
        Some(encoding) => {
            let (decoded, _) = encoding.decode_without_bom_handling(bytes);
            decoded.into_owned()
        }
        None => {
            warn!(charset = label, "Unknown charset, falling back to UTF-8");
            String::from_utf8_lossy(bytes).into_owned()
        }
    }
}

// ── Bodies ──────────────────────────────────────────────────────────

/// Choose the readable body of a parsed message.
///
/// A single text part is used as is. In a multipart tree the first
/// `text/plain` leaf wins, then the first `text/html` leaf. Attachments and
/// parts whose transfer encoding is broken are passed over.
pub fn extract_body(mail: &ParsedMail<'_>) -> ExtractedBody {
    if mail.subparts.is_empty() {
        let mimetype = mail.ctype.mimetype.to_ascii_lowercase();
        if !mimetype.starts_with("text/") {
            debug!(mimetype = %mimetype, "Single-part message has no text body");
            return ExtractedBody::placeholder();
        }
        return decode_part(mail)
            .map(|text| ExtractedBody {
                text,
                content_type: mimetype,
            })
            .unwrap_or_else(ExtractedBody::placeholder);
    }

    let mut leaves = Vec::new();
    collect_leaves(mail, &mut leaves);

    for wanted in [PLAIN, HTML] {
        for part in leaves.iter().filter(|p| p.ctype.mimetype.eq_ignore_ascii_case(wanted)) {
            if let Some(text) = decode_part(part) {
                return ExtractedBody {
                    text,
                    content_type: wanted.to_string(),
                };
            }
        }
    }

    ExtractedBody::placeholder()
}

/// Leaf parts in document order, attachments excluded.
fn collect_leaves<'a>(part: &'a ParsedMail<'a>, out: &mut Vec<&'a ParsedMail<'a>>) {
    if part.subparts.is_empty() {
        if part.get_content_disposition().disposition != DispositionType::Attachment {
            out.push(part);
        }
        return;
    }
    for sub in &part.subparts {
        collect_leaves(sub, out);
    }
}

fn decode_part(part: &ParsedMail<'_>) -> Option<String> {
    match part.get_body_raw() {
        Ok(bytes) => {
            let charset = part.ctype.params.get("charset").map(String::as_str);
            Some(decode_charset(&bytes, charset))
        }
        Err(e) => {
            debug!(error = %e, mimetype = %part.ctype.mimetype, "Part transfer decoding failed");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(raw: &str) -> ParsedMail<'_> {
        mailparse::parse_mail(raw.as_bytes()).unwrap()
    }

    // ── Header tests ────────────────────────────────────────────────

    #[test]
    fn base64_word_decodes() {
        assert_eq!(decode_header_text(b"=?UTF-8?B?0L/RgNC40LLQtdGC?="), "привет");
    }

    #[test]
    fn base64_and_q_agree() {
        let b = decode_header_text(b"=?UTF-8?B?0L/RgNC40LLQtdGC?=");
        let q = decode_header_text(b"=?utf-8?Q?=D0=BF=D1=80=D0=B8=D0=B2=D0=B5=D1=82?=");
        assert_eq!(b, q);
    }

    #[test]
    fn plain_header_untouched() {
        assert_eq!(decode_header_text(b"Meeting at 10"), "Meeting at 10");
    }

    #[test]
    fn mixed_literal_and_encoded() {
        assert_eq!(
            decode_header_text(b"Re: =?ISO-8859-1?Q?caf=E9?= ok"),
            "Re: café ok"
        );
    }

    #[test]
    fn whitespace_between_words_dropped() {
        assert_eq!(
            decode_header_text(b"=?UTF-8?Q?Hola?= =?UTF-8?Q?_mundo?="),
            "Hola mundo"
        );
    }

    #[test]
    fn split_multibyte_sequence_survives() {
        // "п" is D0 BF, split across two words.
        assert_eq!(decode_header_text(b"=?UTF-8?Q?=D0?= =?UTF-8?Q?=BF?="), "п");
    }

    #[test]
    fn folded_header_unfolded() {
        assert_eq!(
            decode_header_text(b"=?UTF-8?Q?Hola?=\r\n =?UTF-8?Q?_mundo?="),
            "Hola mundo"
        );
    }

    #[test]
    fn malformed_word_kept_literally() {
        assert_eq!(decode_header_text(b"=?UTF-8?X?abc?= tail"), "=?UTF-8?X?abc?= tail");
    }

    #[test]
    fn unknown_charset_falls_back() {
        assert_eq!(decode_header_text(b"=?x-made-up?Q?abc?="), "abc");
    }

    #[test]
    fn invalid_utf8_replaced() {
        assert_eq!(decode_header_text(b"ok \xff"), "ok \u{FFFD}");
    }

    #[test]
    fn header_text_reads_subject() {
        let mail = parse("Subject: =?UTF-8?B?0L/RgNC40LLQtdGC?=\r\n\r\nbody");
        assert_eq!(header_text(&mail, "Subject"), "привет");
        assert_eq!(header_text(&mail, "From"), "");
    }

    // ── Body tests ──────────────────────────────────────────────────

    #[test]
    fn single_part_plain() {
        let mail = parse("Content-Type: text/plain; charset=utf-8\r\n\r\nHello there");
        let body = extract_body(&mail);
        assert_eq!(body.text, "Hello there");
        assert_eq!(body.content_type, "text/plain");
    }

    #[test]
    fn single_part_declared_charset() {
        let raw = b"Content-Type: text/plain; charset=windows-1251\r\n\r\n\xef\xf0\xe8\xe2\xe5\xf2";
        let mail = mailparse::parse_mail(raw).unwrap();
        assert_eq!(extract_body(&mail).text, "привет");
    }

    #[test]
    fn single_part_invalid_bytes_replaced() {
        let raw = b"Content-Type: text/plain; charset=utf-8\r\n\r\nbad \xff byte";
        let mail = mailparse::parse_mail(raw).unwrap();
        assert_eq!(extract_body(&mail).text, "bad \u{FFFD} byte");
    }

    #[test]
    fn single_part_html_keeps_type() {
        let mail = parse("Content-Type: text/html\r\n\r\n<p>Hi</p>");
        let body = extract_body(&mail);
        assert_eq!(body.text, "<p>Hi</p>");
        assert_eq!(body.content_type, "text/html");
    }

    #[test]
    fn plain_wins_over_earlier_html() {
        let mail = parse(concat!(
            "Content-Type: multipart/alternative; boundary=\"b\"\r\n\r\n",
            "--b\r\nContent-Type: text/html\r\n\r\n<p>Hi</p>\r\n",
            "--b\r\nContent-Type: text/plain\r\n\r\nHi\r\n",
            "--b--\r\n",
        ));
        let body = extract_body(&mail);
        assert_eq!(body.text.trim_end(), "Hi");
        assert_eq!(body.content_type, "text/plain");
    }

    #[test]
    fn html_used_when_no_plain() {
        let mail = parse(concat!(
            "Content-Type: multipart/mixed; boundary=\"b\"\r\n\r\n",
            "--b\r\nContent-Type: text/html\r\n\r\n<b>only</b>\r\n",
            "--b--\r\n",
        ));
        let body = extract_body(&mail);
        assert_eq!(body.text.trim_end(), "<b>only</b>");
        assert_eq!(body.content_type, "text/html");
    }

    #[test]
    fn attachment_text_skipped() {
        let mail = parse(concat!(
            "Content-Type: multipart/mixed; boundary=\"b\"\r\n\r\n",
            "--b\r\nContent-Type: text/plain\r\nContent-Disposition: attachment; filename=\"a.txt\"\r\n\r\nattached\r\n",
            "--b\r\nContent-Type: text/plain\r\n\r\ninline\r\n",
            "--b--\r\n",
        ));
        assert_eq!(extract_body(&mail).text.trim_end(), "inline");
    }

    #[test]
    fn nested_alternative_found() {
        let mail = parse(concat!(
            "Content-Type: multipart/mixed; boundary=\"outer\"\r\n\r\n",
            "--outer\r\nContent-Type: multipart/alternative; boundary=\"inner\"\r\n\r\n",
            "--inner\r\nContent-Type: text/html\r\n\r\n<i>deep</i>\r\n",
            "--inner\r\nContent-Type: text/plain\r\n\r\ndeep\r\n",
            "--inner--\r\n",
            "--outer\r\nContent-Type: application/pdf\r\n\r\n%PDF\r\n",
            "--outer--\r\n",
        ));
        let body = extract_body(&mail);
        assert_eq!(body.text.trim_end(), "deep");
        assert_eq!(body.content_type, "text/plain");
    }

    #[test]
    fn broken_plain_part_passed_over_for_next_plain() {
        let mail = parse(concat!(
            "Content-Type: multipart/mixed; boundary=\"b\"\r\n\r\n",
            "--b\r\nContent-Type: text/plain\r\nContent-Transfer-Encoding: base64\r\n\r\n@@@!!!\r\n",
            "--b\r\nContent-Type: text/plain\r\n\r\nsecond\r\n",
            "--b--\r\n",
        ));
        let body = extract_body(&mail);
        assert_eq!(body.text.trim_end(), "second");
        assert_eq!(body.content_type, "text/plain");
    }

    #[test]
    fn broken_plain_part_falls_back_to_html() {
        let mail = parse(concat!(
            "Content-Type: multipart/alternative; boundary=\"b\"\r\n\r\n",
            "--b\r\nContent-Type: text/plain\r\nContent-Transfer-Encoding: base64\r\n\r\n@@@!!!\r\n",
            "--b\r\nContent-Type: text/html\r\n\r\n<p>fallback</p>\r\n",
            "--b--\r\n",
        ));
        let body = extract_body(&mail);
        assert_eq!(body.text.trim_end(), "<p>fallback</p>");
        assert_eq!(body.content_type, "text/html");
    }

    #[test]
    fn no_text_part_gives_placeholder() {
        let mail = parse(concat!(
            "Content-Type: multipart/mixed; boundary=\"b\"\r\n\r\n",
            "--b\r\nContent-Type: image/png\r\n\r\nPNG\r\n",
            "--b--\r\n",
        ));
        let body = extract_body(&mail);
        assert_eq!(body.text, BODY_PLACEHOLDER);
        assert_eq!(body.content_type, "text/plain");
    }

    #[test]
    fn base64_part_decoded() {
        let mail = parse(concat!(
            "Content-Type: text/plain; charset=utf-8\r\n",
            "Content-Transfer-Encoding: base64\r\n\r\n",
            "0L/RgNC40LLQtdGC\r\n",
        ));
        assert_eq!(extract_body(&mail).text, "привет");
    }

    #[test]
    fn charset_language_suffix_ignored() {
        assert_eq!(decode_charset("caf\u{e9}".as_bytes(), Some("utf-8*en")), "café");
    }
}
