//! Text extraction for uploaded documents.
//!
//! Converts raw file bytes into plain text. PDF goes through `pdf-extract`,
//! DOCX is unpacked with `zip` and its `<w:t>` runs collected with
//! `quick-xml`, and plain-text formats are decoded after charset detection.

use std::io::Read;
use std::str::FromStr;

use crate::core::errors::RagError;

/// Declared type of an uploaded file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileKind {
    Pdf,
    Docx,
    Txt,
    Md,
}

impl FileKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FileKind::Pdf => "pdf",
            FileKind::Docx => "docx",
            FileKind::Txt => "txt",
            FileKind::Md => "md",
        }
    }
}

impl FromStr for FileKind {
    type Err = RagError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim_start_matches('.').to_ascii_lowercase().as_str() {
            "pdf" => Ok(FileKind::Pdf),
            "docx" => Ok(FileKind::Docx),
            "txt" => Ok(FileKind::Txt),
            "md" | "markdown" => Ok(FileKind::Md),
            other => Err(RagError::UnsupportedType(other.to_string())),
        }
    }
}

/// Decompressed-size guard for DOCX entries.
const MAX_XML_ENTRY_BYTES: u64 = 50 * 1024 * 1024;

/// Extract plain text from file bytes of the declared kind.
pub fn extract_text(bytes: &[u8], kind: FileKind) -> Result<String, RagError> {
    match kind {
        FileKind::Pdf => extract_pdf(bytes),
        FileKind::Docx => extract_docx(bytes),
        FileKind::Txt | FileKind::Md => Ok(decode_text(bytes)),
    }
}

fn extract_pdf(bytes: &[u8]) -> Result<String, RagError> {
    pdf_extract::extract_text_from_mem(bytes)
        .map_err(|err| RagError::ExtractionFailure(format!("pdf: {err}")))
}

fn extract_docx(bytes: &[u8]) -> Result<String, RagError> {
    let mut archive = zip::ZipArchive::new(std::io::Cursor::new(bytes))
        .map_err(|err| RagError::ExtractionFailure(format!("docx: {err}")))?;

    let entry = archive
        .by_name("word/document.xml")
        .map_err(|_| RagError::ExtractionFailure("docx: word/document.xml not found".to_string()))?;

    let mut doc_xml = Vec::new();
    entry
        .take(MAX_XML_ENTRY_BYTES)
        .read_to_end(&mut doc_xml)
        .map_err(|err| RagError::ExtractionFailure(format!("docx: {err}")))?;
    if doc_xml.len() as u64 >= MAX_XML_ENTRY_BYTES {
        return Err(RagError::ExtractionFailure(
            "docx: word/document.xml exceeds size limit".to_string(),
        ));
    }

    collect_text_runs(&doc_xml)
}

/// Walk the document XML, collecting `<w:t>` runs and turning paragraph
/// ends into line breaks so downstream chunking sees paragraph structure.
fn collect_text_runs(xml: &[u8]) -> Result<String, RagError> {
    let mut out = String::new();
    let mut reader = quick_xml::Reader::from_reader(xml);
    reader.config_mut().trim_text(true);
    let mut buf = Vec::new();
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(quick_xml::events::Event::Start(e)) => {
                if e.local_name().as_ref() == b"t" {
                    if let Ok(quick_xml::events::Event::Text(te)) = reader.read_event_into(&mut buf)
                    {
                        out.push_str(te.unescape().unwrap_or_default().as_ref());
                    }
                }
            }
            Ok(quick_xml::events::Event::End(e)) => {
                if e.local_name().as_ref() == b"p" && !out.ends_with('\n') {
                    out.push('\n');
                }
            }
            Ok(quick_xml::events::Event::Eof) => break,
            Err(err) => {
                return Err(RagError::ExtractionFailure(format!("docx: {err}")));
            }
            _ => {}
        }
        buf.clear();
    }
    Ok(out)
}

/// Decode TXT/MD bytes: BOM first, charset detection next, and a lossy
/// UTF-8 fallback so an odd byte never fails the whole document.
fn decode_text(bytes: &[u8]) -> String {
    if let Some((encoding, bom_len)) = encoding_rs::Encoding::for_bom(bytes) {
        let (decoded, _, _) = encoding.decode(&bytes[bom_len..]);
        return decoded.into_owned();
    }

    let mut detector = chardetng::EncodingDetector::new();
    detector.feed(bytes, true);
    let encoding = detector.guess(None, true);

    let (decoded, _, had_errors) = encoding.decode(bytes);
    if had_errors && encoding != encoding_rs::UTF_8 {
        return String::from_utf8_lossy(bytes).into_owned();
    }
    decoded.into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_type_is_rejected_before_reading_bytes() {
        let err = FileKind::from_str("exe").unwrap_err();
        assert!(matches!(err, RagError::UnsupportedType(kind) if kind == "exe"));
    }

    #[test]
    fn extensions_parse_case_insensitively() {
        assert_eq!(FileKind::from_str(".PDF").unwrap(), FileKind::Pdf);
        assert_eq!(FileKind::from_str("markdown").unwrap(), FileKind::Md);
    }

    #[test]
    fn corrupt_pdf_fails_extraction() {
        let err = extract_text(b"not a pdf", FileKind::Pdf).unwrap_err();
        assert!(matches!(err, RagError::ExtractionFailure(_)));
    }

    #[test]
    fn corrupt_docx_fails_extraction() {
        let err = extract_text(b"not a zip", FileKind::Docx).unwrap_err();
        assert!(matches!(err, RagError::ExtractionFailure(_)));
    }

    #[test]
    fn plain_utf8_text_passes_through() {
        let text = extract_text("xin chào thế giới".as_bytes(), FileKind::Txt).unwrap();
        assert_eq!(text, "xin chào thế giới");
    }

    #[test]
    fn utf16_bom_is_honoured() {
        let mut bytes = vec![0xFF, 0xFE];
        for unit in "hello".encode_utf16() {
            bytes.extend_from_slice(&unit.to_le_bytes());
        }
        let text = extract_text(&bytes, FileKind::Txt).unwrap();
        assert_eq!(text, "hello");
    }

    #[test]
    fn invalid_sequences_are_substituted_not_fatal() {
        // 0xC3 alone is a truncated UTF-8 sequence
        let bytes = b"abc \xC3 def";
        let text = extract_text(bytes, FileKind::Md).unwrap();
        assert!(text.starts_with("abc "));
        assert!(text.ends_with(" def"));
    }
}
