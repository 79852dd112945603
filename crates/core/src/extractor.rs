use crate::error::ParsingError;
use crate::models::{Document, SourceMetadata};
use sha2::{Digest, Sha256};
use std::path::Path;

/// Formats the parser understands, keyed by file extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileType {
    Pdf,
    Text,
}

impl FileType {
    pub fn from_file_name(file_name: &str) -> Result<Self, ParsingError> {
        let extension = Path::new(file_name)
            .extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| ext.to_ascii_lowercase());

        match extension.as_deref() {
            Some("pdf") => Ok(Self::Pdf),
            Some("txt") | Some("md") => Ok(Self::Text),
            Some(other) => Err(ParsingError::UnsupportedFileType(other.to_string())),
            None => Err(ParsingError::UnsupportedFileType(file_name.to_string())),
        }
    }
}

pub trait DocumentParser: Send + Sync {
    fn parse(
        &self,
        bytes: &[u8],
        file_type: FileType,
        file_name: &str,
    ) -> Result<Vec<Document>, ParsingError>;
}

/// Parses PDFs page by page with lopdf and plain text files whole.
#[derive(Debug, Default, Clone, Copy)]
pub struct FileParser;

impl DocumentParser for FileParser {
    fn parse(
        &self,
        bytes: &[u8],
        file_type: FileType,
        file_name: &str,
    ) -> Result<Vec<Document>, ParsingError> {
        let base_id = content_id(bytes);
        match file_type {
            FileType::Pdf => parse_pdf(bytes, &base_id, file_name),
            FileType::Text => Ok(parse_text(bytes, &base_id, file_name)),
        }
    }
}

fn content_id(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    let digest = format!("{:x}", hasher.finalize());
    digest[..16].to_string()
}

/// Drops control characters other than line breaks and tabs.
pub fn sanitize_text(text: &str) -> String {
    text.chars()
        .filter(|ch| !ch.is_control() || matches!(ch, '\n' | '\t'))
        .collect()
}

fn parse_pdf(bytes: &[u8], base_id: &str, file_name: &str) -> Result<Vec<Document>, ParsingError> {
    let pdf = lopdf::Document::load_mem(bytes).map_err(|error| ParsingError::Pdf(error.to_string()))?;
    let pages = pdf.get_pages();
    let total_pages = pages.len() as u32;

    let mut documents = Vec::new();
    for page_no in pages.keys() {
        let text = pdf
            .extract_text(&[*page_no])
            .map_err(|error| ParsingError::Pdf(error.to_string()))?;
        let text = sanitize_text(&text);
        if text.trim().is_empty() {
            continue;
        }

        documents.push(
            Document::new(format!("{base_id}-p{page_no}"), text).with_metadata(SourceMetadata {
                file_name: file_name.to_string(),
                page_number: Some(*page_no),
                total_pages: Some(total_pages),
            }),
        );
    }

    if documents.is_empty() {
        return Err(ParsingError::Pdf(format!(
            "pdf had no readable page text: {file_name}"
        )));
    }

    Ok(documents)
}

fn parse_text(bytes: &[u8], base_id: &str, file_name: &str) -> Vec<Document> {
    let text = sanitize_text(&String::from_utf8_lossy(bytes));
    if text.trim().is_empty() {
        return Vec::new();
    }

    vec![Document::new(base_id, text).with_metadata(SourceMetadata {
        file_name: file_name.to_string(),
        page_number: None,
        total_pages: None,
    })]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_type_follows_extension() {
        assert_eq!(FileType::from_file_name("manual.PDF").unwrap(), FileType::Pdf);
        assert_eq!(FileType::from_file_name("notes.md").unwrap(), FileType::Text);
        assert!(matches!(
            FileType::from_file_name("sheet.xlsx"),
            Err(ParsingError::UnsupportedFileType(ext)) if ext == "xlsx"
        ));
        assert!(FileType::from_file_name("README").is_err());
    }

    #[test]
    fn text_file_becomes_one_document() {
        let documents = FileParser
            .parse(b"Pump manual.\n\nCheck seals.", FileType::Text, "pump.txt")
            .unwrap();

        assert_eq!(documents.len(), 1);
        assert_eq!(documents[0].text, "Pump manual.\n\nCheck seals.");
        assert_eq!(documents[0].source_metadata.file_name, "pump.txt");
        assert_eq!(documents[0].source_metadata.page_number, None);
        assert_eq!(documents[0].id.len(), 16);
    }

    #[test]
    fn identical_bytes_share_an_id() {
        let first = FileParser.parse(b"same", FileType::Text, "a.txt").unwrap();
        let second = FileParser.parse(b"same", FileType::Text, "b.txt").unwrap();
        assert_eq!(first[0].id, second[0].id);
    }

    #[test]
    fn invalid_utf8_and_control_characters_are_cleaned() {
        let documents = FileParser
            .parse(b"pump\x00 seal \xff\x07ok", FileType::Text, "a.txt")
            .unwrap();
        assert_eq!(documents[0].text, "pump seal \u{fffd}ok");
    }

    #[test]
    fn blank_text_file_yields_nothing() {
        let documents = FileParser.parse(b"  \n ", FileType::Text, "a.txt").unwrap();
        assert!(documents.is_empty());
    }

    #[test]
    fn broken_pdf_is_a_parsing_error() {
        let result = FileParser.parse(b"%PDF-1.4\n%broken", FileType::Pdf, "broken.pdf");
        assert!(matches!(result, Err(ParsingError::Pdf(_))));
    }
}
