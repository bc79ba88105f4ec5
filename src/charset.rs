//! Charset resolution and body transcoding.
//!
//! Labels are resolved through `encoding_rs`, except where its web-oriented
//! aliasing changes what a label means: US-ASCII, ISO-8859-1, ISO-8859-9 and
//! ISO-8859-11 resolve to Windows code pages there, and UTF-16 can only be
//! decoded. Those are handled here so that bodies only ever contain bytes
//! valid in the charset they declare.

use crate::error::{Error, Result};
use encoding_rs::{EncoderResult, Encoding};
use std::borrow::Cow;

/// Substituted for characters the target charset cannot represent.
const UNMAPPABLE: u8 = b'?';

const LATIN1_LABELS: &[&str] = &[
    "iso-8859-1",
    "iso8859-1",
    "iso_8859-1",
    "iso_8859-1:1987",
    "iso-ir-100",
    "latin1",
    "l1",
    "cp819",
    "ibm819",
    "csisolatin1",
    "iso88591",
];

const ASCII_LABELS: &[&str] = &[
    "us-ascii",
    "ascii",
    "us",
    "iso646-us",
    "iso_646.irv:1991",
    "iso-ir-6",
    "ansi_x3.4-1968",
    "ansi_x3.4-1986",
    "cp367",
    "ibm367",
    "csascii",
    "646",
];

/// ISO-8859 labels that `encoding_rs` resolves to the Windows code page
/// sharing their upper half.
fn iso_over_windows(label: &str) -> Option<&'static Encoding> {
    match label {
        "iso-8859-9" | "iso8859-9" | "iso_8859-9" | "iso_8859-9:1989" | "iso88599"
        | "iso-ir-148" | "latin5" | "l5" | "csisolatin5" => Some(encoding_rs::WINDOWS_1254),
        "iso-8859-11" | "iso8859-11" | "iso885911" | "tis-620" => Some(encoding_rs::WINDOWS_874),
        _ => None,
    }
}

/// A resolved character set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Charset {
    Utf8,
    Ascii,
    Latin1,
    /// An ISO-8859 part encoded through the Windows code page with the same
    /// upper half; 0x80-0x9F stay C1 controls.
    IsoOverWindows(&'static Encoding),
    /// Big-endian with a byte order mark.
    Utf16,
    Utf16Be,
    Utf16Le,
    Other(&'static Encoding),
}

impl Charset {
    /// Resolve a charset label (case-insensitive, surrounding whitespace ignored).
    pub fn for_label(label: &str) -> Result<Self> {
        let normalized = label.trim().to_ascii_lowercase();

        if LATIN1_LABELS.contains(&normalized.as_str()) {
            return Ok(Charset::Latin1);
        }
        if ASCII_LABELS.contains(&normalized.as_str()) {
            return Ok(Charset::Ascii);
        }
        if let Some(encoding) = iso_over_windows(&normalized) {
            return Ok(Charset::IsoOverWindows(encoding));
        }
        match normalized.as_str() {
            "utf-16" | "utf16" => return Ok(Charset::Utf16),
            "utf-16be" | "utf16be" => return Ok(Charset::Utf16Be),
            "utf-16le" | "utf16le" => return Ok(Charset::Utf16Le),
            _ => {}
        }

        let encoding = Encoding::for_label(normalized.as_bytes())
            .ok_or_else(|| Error::UnsupportedEncoding(label.to_string()))?;

        if encoding == encoding_rs::UTF_8 {
            Ok(Charset::Utf8)
        } else if encoding.output_encoding() != encoding {
            // "replacement" and friends decode but cannot encode
            Err(Error::UnsupportedEncoding(label.to_string()))
        } else {
            Ok(Charset::Other(encoding))
        }
    }

    /// Encode text, replacing unrepresentable characters with `?`.
    pub fn encode(&self, text: &str) -> Vec<u8> {
        match self {
            Charset::Utf8 => text.as_bytes().to_vec(),
            Charset::Ascii => text
                .chars()
                .map(|c| if c.is_ascii() { c as u8 } else { UNMAPPABLE })
                .collect(),
            Charset::Latin1 => text
                .chars()
                .map(|c| u8::try_from(u32::from(c)).unwrap_or(UNMAPPABLE))
                .collect(),
            Charset::IsoOverWindows(encoding) => {
                text.chars().map(|c| encode_iso_char(*encoding, c)).collect()
            }
            Charset::Utf16 => [0xfe, 0xff]
                .into_iter()
                .chain(text.encode_utf16().flat_map(u16::to_be_bytes))
                .collect(),
            Charset::Utf16Be => text.encode_utf16().flat_map(u16::to_be_bytes).collect(),
            Charset::Utf16Le => text.encode_utf16().flat_map(u16::to_le_bytes).collect(),
            Charset::Other(encoding) => encode_with(*encoding, text),
        }
    }

    /// Decode bytes; malformed sequences become U+FFFD.
    pub fn decode(&self, bytes: &[u8]) -> String {
        match self {
            Charset::Utf8 => String::from_utf8_lossy(bytes).into_owned(),
            Charset::Ascii => bytes
                .iter()
                .map(|&b| if b.is_ascii() { char::from(b) } else { char::REPLACEMENT_CHARACTER })
                .collect(),
            Charset::Latin1 => encoding_rs::mem::decode_latin1(bytes).into_owned(),
            Charset::IsoOverWindows(encoding) => bytes
                .iter()
                .map(|&b| decode_iso_byte(*encoding, b))
                .collect(),
            Charset::Utf16 | Charset::Utf16Be => decode_utf16(encoding_rs::UTF_16BE, bytes),
            Charset::Utf16Le => decode_utf16(encoding_rs::UTF_16LE, bytes),
            Charset::Other(encoding) => encoding
                .decode_without_bom_handling(bytes)
                .0
                .into_owned(),
        }
    }
}

fn is_c1(value: u32) -> bool {
    (0x80..=0x9f).contains(&value)
}

fn encode_iso_char(encoding: &'static Encoding, c: char) -> u8 {
    if is_c1(u32::from(c)) {
        return c as u8;
    }
    let mut buf = [0u8; 4];
    match encode_with(encoding, c.encode_utf8(&mut buf)).as_slice() {
        // The Windows code page puts extra characters in the C1 range
        [byte] if !is_c1(u32::from(*byte)) => *byte,
        _ => UNMAPPABLE,
    }
}

fn decode_iso_byte(encoding: &'static Encoding, byte: u8) -> char {
    if is_c1(u32::from(byte)) {
        return char::from(byte);
    }
    encoding
        .decode_without_bom_handling(&[byte])
        .0
        .chars()
        .next()
        .unwrap_or(char::REPLACEMENT_CHARACTER)
}

fn decode_utf16(default: &'static Encoding, bytes: &[u8]) -> String {
    // A leading BOM overrides the declared byte order.
    let (encoding, skip) = Encoding::for_bom(bytes).unwrap_or((default, 0));
    let decoded: Cow<'_, str> = encoding.decode_without_bom_handling(&bytes[skip..]).0;
    decoded.into_owned()
}

fn encode_with(encoding: &'static Encoding, text: &str) -> Vec<u8> {
    let mut encoder = encoding.new_encoder();
    let mut out = Vec::with_capacity(text.len());
    let mut remaining = text;

    loop {
        let (result, read) =
            encoder.encode_from_utf8_to_vec_without_replacement(remaining, &mut out, true);
        remaining = &remaining[read..];
        match result {
            EncoderResult::InputEmpty => break,
            EncoderResult::OutputFull => {
                let needed = encoder
                    .max_buffer_length_from_utf8_without_replacement(remaining.len())
                    .unwrap_or(remaining.len() + 16);
                out.reserve(needed);
            }
            EncoderResult::Unmappable(_) => out.push(UNMAPPABLE),
        }
    }

    out
}

/// Extract the `charset` parameter from a `Content-Type` value.
///
/// `text/plain; charset="ISO-8859-1"` yields `Some("ISO-8859-1")`.
pub fn charset_param(content_type: &str) -> Option<&str> {
    content_type.split(';').skip(1).find_map(|param| {
        let (key, value) = param.split_once('=')?;
        if !key.trim().eq_ignore_ascii_case("charset") {
            return None;
        }
        let value = value.trim().trim_matches('"').trim();
        (!value.is_empty()).then_some(value)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_charset_param_extraction() {
        assert_eq!(charset_param("text/plain; charset=ISO-8859-1"), Some("ISO-8859-1"));
        assert_eq!(charset_param("text/html;CHARSET=\"utf-8\""), Some("utf-8"));
        assert_eq!(
            charset_param("multipart/form-data; boundary=x; charset=us-ascii"),
            Some("us-ascii")
        );
        assert_eq!(charset_param("application/json"), None);
        assert_eq!(charset_param("text/plain; charset="), None);
    }

    #[test]
    fn test_latin1_is_not_windows_1252() {
        let charset = Charset::for_label("ISO-8859-1").unwrap();
        assert_eq!(charset, Charset::Latin1);

        // C1 controls exist in ISO-8859-1 but not in windows-1252
        let text = "a\u{0085}\u{00e9}";
        let bytes = charset.encode(text);
        assert_eq!(bytes, vec![b'a', 0x85, 0xe9]);
        assert_eq!(charset.decode(&bytes), text);
    }

    #[test]
    fn test_unmappable_characters_become_question_marks() {
        assert_eq!(Charset::Latin1.encode("日本"), b"??");

        let ascii = Charset::for_label("windows-1252").unwrap();
        assert_eq!(ascii.encode("x日y"), b"x?y");
    }

    #[test]
    fn test_utf16_round_trip() {
        let text = "héllo 日本語";
        for label in ["UTF-16", "utf-16be", "utf-16le"] {
            let charset = Charset::for_label(label).unwrap();
            assert_eq!(charset.decode(&charset.encode(text)), text);
        }
        assert_eq!(Charset::Utf16Be.encode("A"), vec![0x00, 0x41]);
        assert_eq!(Charset::Utf16Le.encode("A"), vec![0x41, 0x00]);
    }

    #[test]
    fn test_bare_utf16_writes_big_endian_bom() {
        let charset = Charset::for_label("UTF-16").unwrap();
        assert_eq!(charset, Charset::Utf16);
        assert_eq!(charset.encode("A"), vec![0xfe, 0xff, 0x00, 0x41]);
        assert_eq!(charset.encode(""), vec![0xfe, 0xff]);

        // Without a BOM the bytes are read big-endian
        assert_eq!(charset.decode(&[0x00, 0x41]), "A");
        assert_eq!(charset.decode(&[0xff, 0xfe, 0x41, 0x00]), "A");
    }

    #[test]
    fn test_us_ascii_is_not_windows_1252() {
        for label in ["US-ASCII", "ascii", "ANSI_X3.4-1968"] {
            let charset = Charset::for_label(label).unwrap();
            assert_eq!(charset, Charset::Ascii);
            assert_eq!(charset.encode("café"), b"caf?");
        }
        assert_eq!(Charset::Ascii.decode(&[b'o', b'k', 0xe9]), "ok\u{fffd}");
    }

    #[test]
    fn test_iso_8859_9_keeps_c1_range() {
        let charset = Charset::for_label("ISO-8859-9").unwrap();
        assert_eq!(charset, Charset::IsoOverWindows(encoding_rs::WINDOWS_1254));

        // Turkish letters share the upper half with windows-1254
        let text = "ğış\u{0085}";
        let bytes = charset.encode(text);
        assert_eq!(bytes, vec![0xf0, 0xfd, 0xfe, 0x85]);
        assert_eq!(charset.decode(&bytes), text);

        // The euro sign lives at 0x80 in windows-1254 only
        assert_eq!(charset.encode("€"), b"?");
        assert_ne!(Charset::for_label("windows-1254").unwrap().encode("€"), b"?");
    }

    #[test]
    fn test_iso_8859_11_is_not_windows_874() {
        let charset = Charset::for_label("iso-8859-11").unwrap();
        assert_eq!(charset, Charset::IsoOverWindows(encoding_rs::WINDOWS_874));
        assert_eq!(charset.encode("ก…"), vec![0xa1, UNMAPPABLE]);
    }

    #[test]
    fn test_shift_jis_round_trip() {
        let charset = Charset::for_label("Shift_JIS").unwrap();
        let text = "日本語";
        let bytes = charset.encode(text);
        assert_ne!(bytes, text.as_bytes());
        assert_eq!(charset.decode(&bytes), text);
    }

    #[test]
    fn test_unknown_label_is_rejected() {
        match Charset::for_label("no-such-charset") {
            Err(Error::UnsupportedEncoding(label)) => assert_eq!(label, "no-such-charset"),
            other => panic!("Expected UnsupportedEncoding, got {:?}", other),
        }
        assert!(Charset::for_label("replacement").is_err());
    }
}
