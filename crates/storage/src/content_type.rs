//! Content type detection for uploaded blobs

use mime::Mime;
use std::path::Path;

/// Guess a blob's content type from its name, then its leading bytes
pub fn detect_content_type(name: &str, data: &[u8]) -> Mime {
    if let Some(ext) = Path::new(name).extension().and_then(|e| e.to_str()) {
        match ext.to_lowercase().as_str() {
            "jpg" | "jpeg" => return mime::IMAGE_JPEG,
            "png" => return mime::IMAGE_PNG,
            "gif" => return mime::IMAGE_GIF,
            "pdf" => return mime::APPLICATION_PDF,
            "txt" => return mime::TEXT_PLAIN,
            "csv" => return mime::TEXT_CSV,
            "json" => return mime::APPLICATION_JSON,
            "xml" => return mime::TEXT_XML,
            _ => {}
        }
    }

    if data.len() >= 4 {
        match &data[..4] {
            [0xFF, 0xD8, 0xFF, _] => return mime::IMAGE_JPEG,
            [0x89, 0x50, 0x4E, 0x47] => return mime::IMAGE_PNG,
            [0x47, 0x49, 0x46, 0x38] => return mime::IMAGE_GIF,
            [0x25, 0x50, 0x44, 0x46] => return mime::APPLICATION_PDF,
            _ => {}
        }
    }

    mime::APPLICATION_OCTET_STREAM
}
