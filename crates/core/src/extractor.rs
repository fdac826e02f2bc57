use crate::chunking::normalize_whitespace;
use crate::error::ExtractionError;
use crate::models::RawDocument;
use lopdf::Document;
use tracing::{debug, warn};

#[derive(Debug, Clone)]
pub struct PageText {
    pub number: u32,
    pub text: String,
}

pub trait PdfExtractor {
    fn extract_pages(&self, document: &RawDocument) -> Result<Vec<PageText>, ExtractionError>;
}

#[derive(Default)]
pub struct LopdfExtractor;

impl PdfExtractor for LopdfExtractor {
    fn extract_pages(&self, document: &RawDocument) -> Result<Vec<PageText>, ExtractionError> {
        let parse_error = |error: lopdf::Error| ExtractionError::PdfParse {
            document_id: document.document_id.clone(),
            reason: error.to_string(),
        };

        let pdf = Document::load_mem(&document.bytes).map_err(parse_error)?;

        let mut pages = Vec::new();
        for (page_no, _page_id) in pdf.get_pages() {
            let text = pdf.extract_text(&[page_no]).map_err(parse_error)?;
            let text = normalize_whitespace(&text);

            if !text.is_empty() {
                pages.push(PageText {
                    number: page_no,
                    text,
                });
            }
        }

        if pages.is_empty() {
            return Err(ExtractionError::NoText(document.document_id.clone()));
        }

        Ok(pages)
    }
}

#[derive(Debug, Clone)]
pub struct ExtractedDocument {
    pub document_id: String,
    pub pages: Vec<PageText>,
}

impl ExtractedDocument {
    /// Page texts joined at their page boundaries.
    pub fn text(&self) -> String {
        self.pages
            .iter()
            .map(|page| page.text.as_str())
            .collect::<Vec<_>>()
            .join("\n")
    }
}

#[derive(Debug, Clone)]
pub struct SkippedDocument {
    pub document_id: String,
    pub reason: String,
}

#[derive(Debug, Clone, Default)]
pub struct ExtractionReport {
    pub documents: Vec<ExtractedDocument>,
    pub skipped: Vec<SkippedDocument>,
}

impl ExtractionReport {
    pub fn concatenated_text(&self) -> String {
        self.documents
            .iter()
            .map(ExtractedDocument::text)
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// Extracts every document, skipping the ones that fail instead of aborting.
///
/// Documents are consumed; only their text survives in the report.
pub fn extract_documents<E>(extractor: &E, documents: Vec<RawDocument>) -> ExtractionReport
where
    E: PdfExtractor + ?Sized,
{
    let mut report = ExtractionReport::default();

    for document in documents {
        match extractor.extract_pages(&document) {
            Ok(pages) => {
                debug!(
                    document_id = %document.document_id,
                    pages = pages.len(),
                    "extracted document"
                );
                report.documents.push(ExtractedDocument {
                    document_id: document.document_id,
                    pages,
                });
            }
            Err(error) => {
                warn!(document_id = %error.document_id(), reason = %error, "skipped document");
                report.skipped.push(SkippedDocument {
                    document_id: document.document_id,
                    reason: error.to_string(),
                });
            }
        }
    }

    report
}
