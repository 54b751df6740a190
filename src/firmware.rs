/*!
Firmware image handling: the `.ipod` container shim and raw payloads.

An `.ipod` container is an 8-byte header, a little-endian u32 checksum
followed by a 4-byte ASCII model tag, then the payload. The checksum is
the model number plus the sum of every payload byte, mod 2^32. The shim
strips the header before the payload is placed at its load address; a
checksum mismatch is logged but still loads, because the patching tools
that produce these images rewrite the field and firmware never checks
it.

Detection is the model tag at offset 4: bytes that do not carry one of
the six recognized tags are deterministically treated as a raw payload
(logged at debug), never rejected.
*/

use std::fmt;
use std::fs;
use std::path::Path;

use thiserror::Error;

/// Recognized model tags and their checksum model numbers.
const MODELS: [(&[u8; 4], u32); 6] = [
    (b"ipod", 1),
    (b"ip3g", 2),
    (b"ip4g", 3),
    (b"ip5g", 5),
    (b"ipvd", 5),
    (b"ip6g", 7),
];

pub const HEADER_LEN: usize = 8;

#[derive(Debug, Error)]
pub enum FirmwareError {
    #[error("failed to read firmware image: {0}")]
    Io(#[from] std::io::Error),
    #[error("firmware image is empty")]
    Empty,
    #[error("payload ({payload} bytes) does not fit at {addr:#010x}")]
    DoesNotFit { addr: u32, payload: usize },
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Model {
    pub tag: [u8; 4],
    pub number: u32,
}

impl fmt::Display for Model {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", String::from_utf8_lossy(&self.tag))
    }
}

/// A loaded image: payload bytes plus what the header said, if one was
/// present.
pub struct FirmwareImage {
    pub payload: Vec<u8>,
    pub model: Option<Model>,
    pub checksum_ok: bool,
}

impl FirmwareImage {
    /// Recognize and strip an `.ipod` header; anything else is raw.
    pub fn parse(bytes: &[u8]) -> Result<Self, FirmwareError> {
        if bytes.is_empty() {
            return Err(FirmwareError::Empty);
        }
        if bytes.len() > HEADER_LEN {
            if let Some(&(tag, number)) = MODELS
                .iter()
                .find(|(tag, _)| **tag == bytes[4..HEADER_LEN])
            {
                let stored = u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
                let payload = bytes[HEADER_LEN..].to_vec();
                let computed = checksum(&payload, number);
                let checksum_ok = stored == computed;
                if !checksum_ok {
                    log::warn!(
                        "ipod container checksum mismatch: header {:#010x}, computed {:#010x}",
                        stored,
                        computed
                    );
                }
                log::info!(
                    "ipod container: model {}, {} byte payload",
                    String::from_utf8_lossy(tag),
                    payload.len()
                );
                return Ok(Self {
                    payload,
                    model: Some(Model { tag: *tag, number }),
                    checksum_ok,
                });
            }
        }
        log::debug!("no ipod container header, loading {} raw bytes", bytes.len());
        Ok(Self {
            payload: bytes.to_vec(),
            model: None,
            checksum_ok: true,
        })
    }

    pub fn from_file(path: &Path) -> Result<Self, FirmwareError> {
        Self::parse(&fs::read(path)?)
    }
}

/// Container checksum: model number + sum of payload bytes.
pub fn checksum(payload: &[u8], model_number: u32) -> u32 {
    payload
        .iter()
        .fold(model_number, |acc, &b| acc.wrapping_add(b as u32))
}

/// Build a container header for a payload (the inverse of `parse`).
pub fn make_header(payload: &[u8], tag: &[u8; 4]) -> Option<[u8; HEADER_LEN]> {
    let number = MODELS.iter().find(|(t, _)| *t == tag)?.1;
    let mut header = [0u8; HEADER_LEN];
    header[..4].copy_from_slice(&checksum(payload, number).to_le_bytes());
    header[4..].copy_from_slice(tag);
    Some(header)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_strip_round_trip() {
        let payload = vec![0xFE, 0xFF, 0xFF, 0xEA, 1, 2, 3];
        let header = make_header(&payload, b"ipvd").unwrap();
        let mut image = header.to_vec();
        image.extend_from_slice(&payload);

        let fw = FirmwareImage::parse(&image).unwrap();
        assert_eq!(fw.payload, payload);
        assert_eq!(fw.model.unwrap().tag, *b"ipvd");
        assert!(fw.checksum_ok);
    }

    #[test]
    fn all_tags_recognized() {
        for (tag, _) in MODELS {
            let payload = vec![0u8; 16];
            let header = make_header(&payload, tag).unwrap();
            let mut image = header.to_vec();
            image.extend_from_slice(&payload);
            let fw = FirmwareImage::parse(&image).unwrap();
            assert_eq!(&fw.model.unwrap().tag, tag);
        }
    }

    #[test]
    fn bad_checksum_still_loads() {
        let payload = vec![9u8; 32];
        let mut image = vec![0xAA, 0xBB, 0xCC, 0xDD];
        image.extend_from_slice(b"ip5g");
        image.extend_from_slice(&payload);
        let fw = FirmwareImage::parse(&image).unwrap();
        assert!(!fw.checksum_ok);
        assert_eq!(fw.payload, payload);
    }

    #[test]
    fn unknown_tag_is_raw() {
        let mut image = vec![0, 0, 0, 0];
        image.extend_from_slice(b"xyz!");
        image.extend_from_slice(&[1, 2, 3]);
        let fw = FirmwareImage::parse(&image).unwrap();
        assert!(fw.model.is_none());
        assert_eq!(fw.payload.len(), image.len());
    }

    #[test]
    fn short_blob_is_raw() {
        let fw = FirmwareImage::parse(&[0xFE, 0xFF, 0xFF, 0xEA]).unwrap();
        assert!(fw.model.is_none());
        assert_eq!(fw.payload.len(), 4);
    }

    #[test]
    fn empty_is_an_error() {
        assert!(FirmwareImage::parse(&[]).is_err());
    }

    #[test]
    fn checksum_definition() {
        assert_eq!(checksum(&[1, 2, 3], 5), 11);
        assert_eq!(checksum(&[0xFF; 2], 0), 0x1FE);
    }
}
