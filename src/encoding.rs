//! Decoding of file contents that may not be UTF-8.
//!
//! Content is tried against UTF-8 first and then against the fallback
//! encodings in order. The same fallback list is used when a hunk's anchor
//! line does not match the original file, to detect a patch produced from a
//! differently encoded view of the file.

/// Text encodings understood by the decoder.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Encoding {
    Utf8,
    Iso8859_1,
    Latin1,
    Ascii,
    Utf16,
}

/// Encodings tried, in order, after UTF-8 fails.
pub const FALLBACK_ENCODINGS: [Encoding; 4] = [
    Encoding::Iso8859_1,
    Encoding::Latin1,
    Encoding::Ascii,
    Encoding::Utf16,
];

impl Encoding {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Utf8 => "utf-8",
            Self::Iso8859_1 => "iso-8859-1",
            Self::Latin1 => "latin-1",
            Self::Ascii => "ascii",
            Self::Utf16 => "utf-16",
        }
    }

    /// Decode bytes strictly. Returns `None` if the bytes are not valid in this encoding.
    pub fn decode(&self, bytes: &[u8]) -> Option<String> {
        match self {
            Self::Utf8 => std::str::from_utf8(bytes).ok().map(str::to_string),
            Self::Iso8859_1 | Self::Latin1 => Some(bytes.iter().map(|&b| b as char).collect()),
            Self::Ascii => bytes
                .is_ascii()
                .then(|| bytes.iter().map(|&b| b as char).collect()),
            Self::Utf16 => decode_utf16(bytes),
        }
    }

    /// Encode text strictly. Returns `None` if a character is not representable.
    pub fn encode(&self, text: &str) -> Option<Vec<u8>> {
        match self {
            Self::Utf8 => Some(text.as_bytes().to_vec()),
            Self::Iso8859_1 | Self::Latin1 => text
                .chars()
                .map(|c| u8::try_from(u32::from(c)).ok())
                .collect(),
            Self::Ascii => text.is_ascii().then(|| text.as_bytes().to_vec()),
            Self::Utf16 => {
                let mut bytes = vec![0xFF, 0xFE];
                for unit in text.encode_utf16() {
                    bytes.extend_from_slice(&unit.to_le_bytes());
                }
                Some(bytes)
            }
        }
    }
}

/// UTF-16 with an optional byte order mark; little-endian when absent.
fn decode_utf16(bytes: &[u8]) -> Option<String> {
    if bytes.len() % 2 != 0 {
        return None;
    }
    let (body, big_endian) = match bytes {
        [0xFE, 0xFF, rest @ ..] => (rest, true),
        [0xFF, 0xFE, rest @ ..] => (rest, false),
        _ => (bytes, false),
    };
    let units: Vec<u16> = body
        .chunks_exact(2)
        .map(|pair| {
            if big_endian {
                u16::from_be_bytes([pair[0], pair[1]])
            } else {
                u16::from_le_bytes([pair[0], pair[1]])
            }
        })
        .collect();
    String::from_utf16(&units).ok()
}

/// Decode bytes with UTF-8 and then each fallback encoding; first success wins.
pub fn decode_bytes(bytes: &[u8]) -> Option<(String, Encoding)> {
    std::iter::once(Encoding::Utf8)
        .chain(FALLBACK_ENCODINGS)
        .find_map(|encoding| encoding.decode(bytes).map(|text| (text, encoding)))
}

/// Re-encode text with `encoding` and read the bytes back as UTF-8.
///
/// This is how a line that was mis-decoded upstream looks to a UTF-8 reader.
pub fn reencode_as_utf8(text: &str, encoding: Encoding) -> Option<String> {
    let bytes = encoding.encode(text)?;
    String::from_utf8(bytes).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_utf8_wins_first() {
        let (text, encoding) = decode_bytes("héllo".as_bytes()).unwrap();
        assert_eq!(text, "héllo");
        assert_eq!(encoding, Encoding::Utf8);
    }

    #[test]
    fn test_latin1_fallback() {
        let bytes = [b'c', 0xE9, b'!'];
        let (text, encoding) = decode_bytes(&bytes).unwrap();
        assert_eq!(text, "cé!");
        assert_eq!(encoding, Encoding::Iso8859_1);
    }

    #[test]
    fn test_ascii_rejects_high_bytes() {
        assert!(Encoding::Ascii.decode(&[0x80]).is_none());
        assert_eq!(Encoding::Ascii.decode(b"abc").as_deref(), Some("abc"));
        assert!(Encoding::Ascii.encode("é").is_none());
    }

    #[test]
    fn test_utf16_with_bom() {
        let bytes = Encoding::Utf16.encode("hi").unwrap();
        assert_eq!(bytes, vec![0xFF, 0xFE, b'h', 0, b'i', 0]);
        assert_eq!(Encoding::Utf16.decode(&bytes).as_deref(), Some("hi"));
        assert_eq!(
            Encoding::Utf16.decode(&[0xFE, 0xFF, 0, b'o', 0, b'k']).as_deref(),
            Some("ok")
        );
        assert!(Encoding::Utf16.decode(&[0x00]).is_none());
    }

    #[test]
    fn test_reencode_as_utf8() {
        // Pure ASCII survives every single-byte encoding unchanged.
        assert_eq!(
            reencode_as_utf8("plain", Encoding::Latin1).as_deref(),
            Some("plain")
        );
        // A latin-1 encoded "é" is not valid UTF-8.
        assert!(reencode_as_utf8("é", Encoding::Latin1).is_none());
        // Characters outside latin-1 cannot be encoded at all.
        assert!(reencode_as_utf8("€", Encoding::Iso8859_1).is_none());
    }
}
