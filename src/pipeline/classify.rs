//! Format classification: filename + declared content-type + magic bytes →
//! [`DocumentKind`].
//!
//! Declared types are hints. Signatures decide whenever they are conclusive;
//! the hint only disambiguates container formats (an OLE2 compound file may
//! be a Word document, a spreadsheet or an Outlook message).

use crate::document::DocumentKind;
use std::io::Cursor;
use tracing::debug;

const OLE_MAGIC: [u8; 8] = [0xD0, 0xCF, 0x11, 0xE0, 0xA1, 0xB1, 0x1A, 0xE1];
const ZIP_MAGIC: &[u8] = b"PK\x03\x04";
const PDF_MAGIC: &[u8] = b"%PDF-";
/// PDF readers accept junk before the header; so do we, up to this offset.
const PDF_HEADER_WINDOW: usize = 1024;
const DOCX_MAIN_PART: &str = "word/document.xml";
const DOCX_MIME: &str = "application/vnd.openxmlformats-officedocument.wordprocessingml.document";

/// Classify a document. Pure; never fails.
pub fn classify(filename: &str, content_type: Option<&str>, bytes: &[u8]) -> DocumentKind {
    let hint = declared_hint(filename, content_type);
    let sniffed = sniff(bytes, hint);

    if let (Some(h), kind) = (hint, sniffed) {
        if kind != DocumentKind::Unknown && kind != h {
            debug!(
                filename,
                declared = %h,
                detected = %kind,
                "Declared type disagrees with content signature; using signature"
            );
        }
    }

    sniffed
}

/// Kind suggested by the declared content type, falling back to the
/// extension. `None` when both are absent or generic.
pub fn declared_hint(filename: &str, content_type: Option<&str>) -> Option<DocumentKind> {
    content_type
        .and_then(hint_from_content_type)
        .or_else(|| hint_from_extension(filename))
}

fn hint_from_content_type(content_type: &str) -> Option<DocumentKind> {
    let mime = content_type
        .split(';')
        .next()
        .unwrap_or("")
        .trim()
        .to_ascii_lowercase();
    match mime.as_str() {
        "application/pdf" | "application/x-pdf" => Some(DocumentKind::Pdf),
        DOCX_MIME => Some(DocumentKind::Docx),
        "application/msword" => Some(DocumentKind::LegacyDoc),
        m if m.starts_with("image/") => Some(DocumentKind::Image),
        _ => None,
    }
}

fn hint_from_extension(filename: &str) -> Option<DocumentKind> {
    let ext = filename.rsplit_once('.')?.1.to_ascii_lowercase();
    match ext.as_str() {
        "pdf" => Some(DocumentKind::Pdf),
        "docx" => Some(DocumentKind::Docx),
        "doc" => Some(DocumentKind::LegacyDoc),
        "jpg" | "jpeg" | "png" | "tiff" | "tif" | "bmp" | "gif" | "webp" => {
            Some(DocumentKind::Image)
        }
        _ => None,
    }
}

fn sniff(bytes: &[u8], hint: Option<DocumentKind>) -> DocumentKind {
    let window = &bytes[..bytes.len().min(PDF_HEADER_WINDOW)];
    if find(window, PDF_MAGIC).is_some() {
        return DocumentKind::Pdf;
    }

    if bytes.starts_with(ZIP_MAGIC) {
        return if zip_has_docx_main_part(bytes) {
            DocumentKind::Docx
        } else {
            DocumentKind::Unknown
        };
    }

    if bytes.starts_with(&OLE_MAGIC) {
        return if has_word_document_stream(bytes) || hint == Some(DocumentKind::LegacyDoc) {
            DocumentKind::LegacyDoc
        } else {
            DocumentKind::Unknown
        };
    }

    if is_image_signature(bytes) {
        return DocumentKind::Image;
    }

    DocumentKind::Unknown
}

fn zip_has_docx_main_part(bytes: &[u8]) -> bool {
    match zip::ZipArchive::new(Cursor::new(bytes)) {
        Ok(archive) => archive.file_names().any(|name| name == DOCX_MAIN_PART),
        Err(e) => {
            debug!("ZIP signature but unreadable archive: {}", e);
            false
        }
    }
}

/// OLE directory entries store names as UTF-16LE; a Word binary document
/// always has a `WordDocument` stream.
fn has_word_document_stream(bytes: &[u8]) -> bool {
    let needle: Vec<u8> = "WordDocument"
        .encode_utf16()
        .flat_map(|u| u.to_le_bytes())
        .collect();
    find(bytes, &needle).is_some()
}

fn is_image_signature(bytes: &[u8]) -> bool {
    bytes.starts_with(b"\x89PNG\r\n\x1a\n")
        || bytes.starts_with(&[0xFF, 0xD8, 0xFF])
        || bytes.starts_with(b"GIF87a")
        || bytes.starts_with(b"GIF89a")
        || bytes.starts_with(b"II*\x00")
        || bytes.starts_with(b"MM\x00*")
        || is_bmp(bytes)
        || (bytes.len() >= 12 && &bytes[..4] == b"RIFF" && &bytes[8..12] == b"WEBP")
}

/// "BM" alone also opens plenty of text files; require a known DIB header size.
fn is_bmp(bytes: &[u8]) -> bool {
    if bytes.len() < 18 || !bytes.starts_with(b"BM") {
        return false;
    }
    let dib_size = u32::from_le_bytes([bytes[14], bytes[15], bytes[16], bytes[17]]);
    matches!(dib_size, 12 | 40 | 52 | 56 | 108 | 124)
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.is_empty() || haystack.len() < needle.len() {
        return None;
    }
    haystack.windows(needle.len()).position(|w| w == needle)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn zip_with(names: &[&str]) -> Vec<u8> {
        let mut buf = Cursor::new(Vec::new());
        {
            let mut zw = zip::ZipWriter::new(&mut buf);
            let opts = zip::write::SimpleFileOptions::default();
            for name in names {
                zw.start_file(*name, opts).unwrap();
                zw.write_all(b"<x/>").unwrap();
            }
            zw.finish().unwrap();
        }
        buf.into_inner()
    }

    #[test]
    fn pdf_signature_wins_over_extension() {
        assert_eq!(
            classify("scan.jpg", Some("image/jpeg"), b"%PDF-1.7\n..."),
            DocumentKind::Pdf
        );
    }

    #[test]
    fn pdf_header_after_leading_junk() {
        let mut bytes = vec![b' '; 200];
        bytes.extend_from_slice(b"%PDF-1.4\n");
        assert_eq!(classify("x", None, &bytes), DocumentKind::Pdf);
    }

    #[test]
    fn docx_requires_main_part() {
        let docx = zip_with(&["[Content_Types].xml", "word/document.xml"]);
        assert_eq!(classify("a.bin", None, &docx), DocumentKind::Docx);

        let plain_zip = zip_with(&["readme.txt"]);
        assert_eq!(
            classify("a.docx", Some(DOCX_MIME), &plain_zip),
            DocumentKind::Unknown
        );
    }

    #[test]
    fn ole_with_word_stream_is_legacy_doc() {
        let mut bytes = OLE_MAGIC.to_vec();
        bytes.extend_from_slice(&[0u8; 64]);
        bytes.extend("WordDocument".encode_utf16().flat_map(|u| u.to_le_bytes()));
        assert_eq!(classify("upload", None, &bytes), DocumentKind::LegacyDoc);
    }

    #[test]
    fn ole_without_marker_needs_doc_hint() {
        let mut bytes = OLE_MAGIC.to_vec();
        bytes.extend_from_slice(&[0u8; 64]);
        assert_eq!(classify("sheet.xls", None, &bytes), DocumentKind::Unknown);
        assert_eq!(classify("letter.doc", None, &bytes), DocumentKind::LegacyDoc);
        assert_eq!(
            classify("upload", Some("application/msword"), &bytes),
            DocumentKind::LegacyDoc
        );
    }

    #[test]
    fn image_signatures() {
        assert_eq!(classify("a", None, b"\x89PNG\r\n\x1a\n...."), DocumentKind::Image);
        assert_eq!(classify("a", None, &[0xFF, 0xD8, 0xFF, 0xE0]), DocumentKind::Image);
        assert_eq!(classify("a", None, b"GIF89a...."), DocumentKind::Image);
        assert_eq!(classify("a", None, b"II*\x00...."), DocumentKind::Image);
        assert_eq!(classify("a", None, b"RIFF\x00\x00\x00\x00WEBPVP8 "), DocumentKind::Image);
    }

    #[test]
    fn bmp_needs_a_dib_header() {
        let mut bmp = b"BM".to_vec();
        bmp.extend_from_slice(&[0u8; 12]);
        bmp.extend_from_slice(&40u32.to_le_bytes());
        assert_eq!(classify("a", None, &bmp), DocumentKind::Image);

        assert_eq!(
            classify("notes.txt", Some("text/plain"), b"BMI table for the clinic intake"),
            DocumentKind::Unknown
        );
        assert_eq!(classify("a.bmp", None, b"BM"), DocumentKind::Unknown);
    }

    #[test]
    fn extension_alone_is_not_enough() {
        assert_eq!(
            classify("photo.png", Some("image/png"), b"plain text, not an image"),
            DocumentKind::Unknown
        );
    }

    #[test]
    fn generic_content_type_falls_back_to_extension_hint() {
        assert_eq!(
            declared_hint("Report.PDF", Some("application/octet-stream")),
            Some(DocumentKind::Pdf)
        );
        assert_eq!(declared_hint("noext", None), None);
        assert_eq!(
            declared_hint("x", Some("application/pdf; charset=binary")),
            Some(DocumentKind::Pdf)
        );
    }
}
