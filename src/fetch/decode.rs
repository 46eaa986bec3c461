//! Body decoding with charset sniffing.
//!
//! Resolution order: byte-order mark, then `<meta charset>` declarations in
//! the first kilobyte, then the Content-Type `charset` parameter, then UTF-8
//! (lossy). Matches how browsers settle the question in practice.

use encoding_rs::Encoding;

/// Bytes of the body prefix searched for a `<meta charset>` declaration.
const META_SNIFF_WINDOW: usize = 1024;

/// Decode response bytes into text.
pub fn decode_body(bytes: &[u8], content_type: Option<&str>) -> String {
    if let Some((encoding, bom_len)) = Encoding::for_bom(bytes) {
        let (text, _) = encoding.decode_without_bom_handling(&bytes[bom_len..]);
        return text.into_owned();
    }

    if let Some(encoding) = sniff_meta_charset(bytes) {
        let (text, _) = encoding.decode_without_bom_handling(bytes);
        return text.into_owned();
    }

    if let Some(encoding) = header_charset(content_type) {
        let (text, _) = encoding.decode_without_bom_handling(bytes);
        return text.into_owned();
    }

    String::from_utf8_lossy(bytes).into_owned()
}

fn header_charset(content_type: Option<&str>) -> Option<&'static Encoding> {
    let header = content_type?;
    for param in header.split(';').skip(1) {
        let (key, value) = param.split_once('=')?;
        if key.trim().eq_ignore_ascii_case("charset") {
            let label = value.trim().trim_matches('"').trim_matches('\'');
            return Encoding::for_label(label.as_bytes());
        }
    }
    None
}

/// Look for `charset=...` inside the body prefix. Good enough for both the
/// HTML5 `<meta charset="x">` form and the legacy http-equiv variant.
fn sniff_meta_charset(bytes: &[u8]) -> Option<&'static Encoding> {
    let window = &bytes[..bytes.len().min(META_SNIFF_WINDOW)];
    let haystack: Vec<u8> = window.iter().map(u8::to_ascii_lowercase).collect();
    let needle = b"charset=";

    let start = haystack
        .windows(needle.len())
        .position(|w| w == needle)?
        + needle.len();

    let label: Vec<u8> = haystack[start..]
        .iter()
        .copied()
        .skip_while(|b| matches!(b, b'"' | b'\''))
        .take_while(|b| !matches!(b, b'"' | b'\'' | b';' | b'>' | b' ' | b'\t' | b'\r' | b'\n'))
        .collect();

    if label.is_empty() {
        None
    } else {
        Encoding::for_label(&label)
    }
}
