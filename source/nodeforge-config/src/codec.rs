//! Inline payload encoding and decoding.
//!
//! Config payloads arrive in one of three shapes: plain text, gzip, or
//! base64-wrapped gzip. File contents are RFC 2397 data-URLs with an optional
//! gzip layer underneath.

use std::io::Read;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use flate2::read::GzDecoder;

use crate::dialect::v3;
use crate::error::CodecError;

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

/// Decodes a payload that may be base64-wrapped and/or gzipped.
///
/// Returns [`CodecError::NotGzipped`] when no gzip layer was found; the
/// caller treats the original bytes as already-decoded configuration text.
pub fn decode_payload(raw: &[u8]) -> Result<Vec<u8>, CodecError> {
    // The base64 decoder tolerates line breaks the way streaming encoders
    // emit them.
    let stripped: Vec<u8> = raw
        .iter()
        .copied()
        .filter(|b| *b != b'\n' && *b != b'\r')
        .collect();

    match BASE64.decode(&stripped) {
        Ok(decoded) => decompress(&decoded),
        // Not base64 at all; the payload may still be bare gzip.
        Err(_) => decompress(raw),
    }
}

fn decompress(raw: &[u8]) -> Result<Vec<u8>, CodecError> {
    let Some(header) = raw.get(..2) else {
        return Err(CodecError::Truncated);
    };
    if header != GZIP_MAGIC {
        return Err(CodecError::NotGzipped);
    }

    let mut out = Vec::new();
    GzDecoder::new(raw)
        .read_to_end(&mut out)
        .map_err(CodecError::Gzip)?;
    Ok(out)
}

/// Returns the uncompressed, decoded inline contents of a file entry.
///
/// Remote resources are not handled here; they are assumed to have been
/// fetched already. A nil source means an empty file.
pub fn decode_file_contents(
    source: Option<&str>,
    compression: Option<&str>,
) -> Result<Vec<u8>, CodecError> {
    let Some(source) = source else {
        return Ok(Vec::new());
    };
    let data = dataurl::decode(source)?;
    match compression {
        None | Some("") => Ok(data),
        Some("gzip") => {
            let mut out = Vec::new();
            GzDecoder::new(data.as_slice())
                .read_to_end(&mut out)
                .map_err(CodecError::Gzip)?;
            Ok(out)
        }
        Some(other) => Err(CodecError::UnsupportedCompression(other.to_string())),
    }
}

/// A file entry from just path and contents.
///
/// The compression field is set to the explicit empty string so that a later
/// merge layer knows the input is not compressed. Default mode is 0644.
pub fn new_file(path: &str, contents: &[u8]) -> v3::File {
    v3::File {
        path: path.to_string(),
        overwrite: None,
        mode: Some(0o644),
        contents: v3::Resource {
            source: Some(dataurl::encode(contents)),
            compression: Some(String::new()),
        },
    }
}

/// Like [`new_file`], but overwrites existing files by default.
pub fn new_file_overwriting(path: &str, contents: &[u8]) -> v3::File {
    v3::File {
        overwrite: Some(true),
        ..new_file(path, contents)
    }
}

/// Decoded bytes of the file at `path`, or `None` when the config has no
/// inline contents for it.
pub fn file_data_by_path(config: &v3::Config, path: &str) -> Result<Option<Vec<u8>>, CodecError> {
    for file in &config.storage.files {
        if file.path == path {
            if let Some(source) = &file.contents.source {
                return dataurl::decode(source).map(Some);
            }
        }
    }
    Ok(None)
}

/// RFC 2397 data-URLs.
pub mod dataurl {
    use super::{CodecError, BASE64};
    use base64::Engine as _;

    pub fn encode(data: &[u8]) -> String {
        format!("data:;base64,{}", BASE64.encode(data))
    }

    pub fn decode(url: &str) -> Result<Vec<u8>, CodecError> {
        let rest = url
            .strip_prefix("data:")
            .ok_or_else(|| CodecError::DataUrl(format!("not a data-URL: {url:?}")))?;
        let (header, payload) = rest
            .split_once(',')
            .ok_or_else(|| CodecError::DataUrl("data-URL has no payload separator".to_string()))?;

        if header.split(';').any(|param| param == "base64") {
            BASE64
                .decode(payload.as_bytes())
                .map_err(|e| CodecError::DataUrl(e.to_string()))
        } else {
            percent_decode(payload)
        }
    }

    fn percent_decode(payload: &str) -> Result<Vec<u8>, CodecError> {
        let bytes = payload.as_bytes();
        let mut out = Vec::with_capacity(bytes.len());
        let mut idx = 0;
        while idx < bytes.len() {
            match bytes[idx] {
                b'%' => {
                    let hex = bytes.get(idx + 1..idx + 3).ok_or_else(|| {
                        CodecError::DataUrl("truncated percent escape".to_string())
                    })?;
                    let hex = std::str::from_utf8(hex)
                        .ok()
                        .and_then(|h| u8::from_str_radix(h, 16).ok())
                        .ok_or_else(|| {
                            CodecError::DataUrl("malformed percent escape".to_string())
                        })?;
                    out.push(hex);
                    idx += 3;
                }
                other => {
                    out.push(other);
                    idx += 1;
                }
            }
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    fn gzip(data: &[u8]) -> Vec<u8> {
        let mut encoder =
            flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::default());
        encoder.write_all(data).unwrap();
        encoder.finish().unwrap()
    }

    #[test]
    fn decodes_base64_of_gzip() {
        let payload = BASE64.encode(gzip(b"hello"));
        assert_eq!(decode_payload(payload.as_bytes()).unwrap(), b"hello");
    }

    #[test]
    fn decodes_bare_gzip() {
        assert_eq!(decode_payload(&gzip(b"hello")).unwrap(), b"hello");
    }

    #[test]
    fn plain_text_reports_not_gzipped() {
        let raw = br#"{"ignition": {"version": "3.2.0"}}"#;
        assert!(matches!(
            decode_payload(raw),
            Err(CodecError::NotGzipped)
        ));
    }

    #[test]
    fn corrupt_gzip_surfaces() {
        let mut data = gzip(b"hello");
        data.truncate(6);
        assert!(matches!(decode_payload(&data), Err(CodecError::Gzip(_))));
    }

    #[test]
    fn dataurl_roundtrip() {
        let url = dataurl::encode(b"some bytes");
        assert_eq!(dataurl::decode(&url).unwrap(), b"some bytes");
    }

    #[test]
    fn dataurl_percent_decoding() {
        assert_eq!(
            dataurl::decode("data:,hello%20world").unwrap(),
            b"hello world"
        );
        assert!(dataurl::decode("data:,bad%2").is_err());
        assert!(dataurl::decode("not-a-url").is_err());
    }

    #[test]
    fn nil_source_decodes_to_empty() {
        assert_eq!(decode_file_contents(None, Some("gzip")).unwrap(), b"");
    }

    #[test]
    fn gzip_compression_inflates_contents() {
        let url = dataurl::encode(&gzip(b"unit contents"));
        assert_eq!(
            decode_file_contents(Some(&url), Some("gzip")).unwrap(),
            b"unit contents"
        );
    }

    #[test]
    fn empty_and_absent_compression_are_equivalent() {
        let url = dataurl::encode(b"plain");
        assert_eq!(decode_file_contents(Some(&url), None).unwrap(), b"plain");
        assert_eq!(
            decode_file_contents(Some(&url), Some("")).unwrap(),
            b"plain"
        );
    }

    #[test]
    fn unknown_compression_is_rejected() {
        let url = dataurl::encode(b"plain");
        assert!(matches!(
            decode_file_contents(Some(&url), Some("zstd")),
            Err(CodecError::UnsupportedCompression(_))
        ));
    }

    #[test]
    fn new_file_sets_explicit_empty_compression() {
        let file = new_file("/etc/motd", b"hi");
        assert_eq!(file.mode, Some(0o644));
        assert_eq!(file.contents.compression.as_deref(), Some(""));
        assert_eq!(
            file_data_by_path(
                &v3::Config {
                    storage: v3::Storage { files: vec![file] },
                    ..v3::new_config()
                },
                "/etc/motd"
            )
            .unwrap()
            .as_deref(),
            Some(b"hi".as_slice())
        );
    }
}
