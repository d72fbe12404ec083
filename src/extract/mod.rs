//! Archive extraction for downloaded portal payloads.
//!
//! Portals ship the same XML three ways: zipped, gzipped, or bare. The
//! container is detected from magic bytes, never from the file extension —
//! several portals serve gzip under a `.xml` name.

use std::io::{Cursor, Read};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("Corrupt ZIP archive: {0}")]
    Zip(#[from] zip::result::ZipError),

    #[error("Corrupt archive stream: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, ExtractError>;

/// Container format of a downloaded payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveFormat {
    Zip,
    Gzip,
    /// No recognized container; the payload is used as-is.
    Raw,
}

const ZIP_MAGIC: [u8; 4] = [0x50, 0x4B, 0x03, 0x04];
const GZIP_MAGIC: [u8; 2] = [0x1F, 0x8B];

/// Classify a payload by its leading bytes.
pub fn detect(bytes: &[u8]) -> ArchiveFormat {
    if bytes.len() >= 4 && bytes[..4] == ZIP_MAGIC {
        ArchiveFormat::Zip
    } else if bytes.len() >= 2 && bytes[..2] == GZIP_MAGIC {
        ArchiveFormat::Gzip
    } else {
        ArchiveFormat::Raw
    }
}

/// One XML document recovered from a payload.
#[derive(Debug, Clone)]
pub struct XmlPayload {
    /// Entry name inside the container, when the container carries one.
    pub name: Option<String>,
    pub data: Vec<u8>,
}

/// Extract the XML document(s) embedded in `bytes`.
///
/// ZIP: every entry ending in `.xml`. An archive with no XML entries yields
/// an empty list, not an error — "nothing to do" and "corrupt" are distinct
/// outcomes. GZIP: the single decompressed stream. Raw: the bytes unchanged.
pub fn extract(bytes: &[u8]) -> Result<Vec<XmlPayload>> {
    match detect(bytes) {
        ArchiveFormat::Zip => extract_zip(bytes),
        ArchiveFormat::Gzip => extract_gzip(bytes).map(|p| vec![p]),
        ArchiveFormat::Raw => Ok(vec![XmlPayload {
            name: None,
            data: bytes.to_vec(),
        }]),
    }
}

fn extract_zip(bytes: &[u8]) -> Result<Vec<XmlPayload>> {
    let reader = Cursor::new(bytes);
    let mut archive = zip::ZipArchive::new(reader)?;

    let mut payloads = Vec::new();
    for i in 0..archive.len() {
        let mut entry = archive.by_index(i)?;
        let name = entry.name().to_string();
        if !name.to_ascii_lowercase().ends_with(".xml") {
            continue;
        }

        let mut data = Vec::with_capacity(entry.size() as usize);
        entry.read_to_end(&mut data)?;
        payloads.push(XmlPayload {
            name: Some(name),
            data,
        });
    }

    Ok(payloads)
}

fn extract_gzip(bytes: &[u8]) -> Result<XmlPayload> {
    let mut decoder = flate2::read::GzDecoder::new(Cursor::new(bytes));
    let mut data = Vec::new();
    decoder.read_to_end(&mut data)?;
    Ok(XmlPayload { name: None, data })
}
