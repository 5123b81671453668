use binrw::BinRead;
use encoding_rs::SHIFT_JIS;
use thiserror::Error;

/// Text encoding declared by a PMX header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, BinRead)]
pub enum TextEncoding {
    #[br(magic = 0u8)]
    Utf16Le,
    #[br(magic = 1u8)]
    Utf8,
}

#[derive(Debug, Clone, Error)]
pub enum TextError {
    #[error("invalid UTF-8 text")]
    Utf8,
    #[error("invalid UTF-16LE text")]
    Utf16,
}

/// Length-prefixed PMX text as stored on disk.
#[derive(Debug, Clone, BinRead)]
pub struct PmxText {
    #[br(assert(length >= 0, "negative text length {}", length))]
    length: i32,
    #[br(count = length as usize)]
    bytes: Vec<u8>,
}

impl PmxText {
    pub fn decode(self, encoding: TextEncoding) -> Result<String, TextError> {
        match encoding {
            TextEncoding::Utf8 => String::from_utf8(self.bytes).map_err(|_| TextError::Utf8),
            TextEncoding::Utf16Le => {
                if self.bytes.len() % 2 != 0 {
                    return Err(TextError::Utf16);
                }
                let units: Vec<u16> = self
                    .bytes
                    .chunks_exact(2)
                    .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
                    .collect();
                String::from_utf16(&units).map_err(|_| TextError::Utf16)
            }
        }
    }
}

/// Decodes a fixed-width, null-terminated CP932 field.
///
/// Bytes after the first NUL are padding (often garbage in older files) and
/// are ignored. Unmappable sequences become U+FFFD.
pub fn decode_cp932(raw: &[u8]) -> String {
    let end = raw.iter().position(|&b| b == 0).unwrap_or(raw.len());
    let (text, _, _) = SHIFT_JIS.decode(&raw[..end]);
    text.into_owned()
}
