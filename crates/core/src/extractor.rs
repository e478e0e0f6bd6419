use crate::error::ExtractionFailure;
use lopdf::Document;
use std::path::Path;
use tracing::{info, warn};

/// A parsed PDF as seen by the text extractor.
pub trait PdfDocument {
    fn page_count(&self) -> usize;
    fn is_encrypted(&self) -> bool;
    /// Text of the zero-based page `index`.
    fn page_text(&self, index: usize) -> Result<String, String>;
}

#[derive(Debug)]
pub enum ParseFailure {
    Encrypted,
    Malformed(String),
}

/// Byte-level PDF parsing backend.
pub trait PdfParser {
    type Document: PdfDocument;

    fn parse(&self, path: &Path) -> Result<Self::Document, ParseFailure>;
}

/// Turns a document on disk into one normalized text blob.
pub trait PdfExtractor {
    fn extract_text(&self, path: &Path) -> Result<String, ExtractionFailure>;
}

impl<T: PdfExtractor + ?Sized> PdfExtractor for &T {
    fn extract_text(&self, path: &Path) -> Result<String, ExtractionFailure> {
        (**self).extract_text(path)
    }
}

pub struct LopdfDocument {
    document: Document,
    page_numbers: Vec<u32>,
}

impl PdfDocument for LopdfDocument {
    fn page_count(&self) -> usize {
        self.page_numbers.len()
    }

    fn is_encrypted(&self) -> bool {
        self.document.is_encrypted()
    }

    fn page_text(&self, index: usize) -> Result<String, String> {
        let page_no = self
            .page_numbers
            .get(index)
            .copied()
            .ok_or_else(|| format!("page index {index} out of range"))?;
        self.document
            .extract_text(&[page_no])
            .map_err(|error| error.to_string())
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct LopdfParser;

impl PdfParser for LopdfParser {
    type Document = LopdfDocument;

    fn parse(&self, path: &Path) -> Result<LopdfDocument, ParseFailure> {
        let document = Document::load(path).map_err(|error| {
            let message = error.to_string();
            if message.to_ascii_lowercase().contains("crypt") {
                ParseFailure::Encrypted
            } else {
                ParseFailure::Malformed(message)
            }
        })?;

        let page_numbers = document.get_pages().into_keys().collect();
        Ok(LopdfDocument {
            document,
            page_numbers,
        })
    }
}

/// Validates a PDF and joins the text of every readable page.
///
/// Pages that fail to extract are logged and skipped; only whole-document
/// problems are reported as an [`ExtractionFailure`].
#[derive(Debug, Default, Clone)]
pub struct PageTextExtractor<P = LopdfParser> {
    parser: P,
}

impl<P: PdfParser> PageTextExtractor<P> {
    pub fn new(parser: P) -> Self {
        Self { parser }
    }
}

impl<P: PdfParser> PdfExtractor for PageTextExtractor<P> {
    fn extract_text(&self, path: &Path) -> Result<String, ExtractionFailure> {
        if !path.exists() {
            return Err(ExtractionFailure::NotFound(path.to_path_buf()));
        }

        info!(path = %path.display(), "parsing pdf");
        let document = self.parser.parse(path).map_err(|failure| match failure {
            ParseFailure::Encrypted => ExtractionFailure::Encrypted(path.to_path_buf()),
            ParseFailure::Malformed(reason) => ExtractionFailure::Unreadable {
                path: path.to_path_buf(),
                reason,
            },
        })?;

        let page_count = document.page_count();
        if page_count == 0 {
            warn!(path = %path.display(), "pdf contains no pages");
            return Err(ExtractionFailure::Empty(path.to_path_buf()));
        }

        if document.is_encrypted() {
            warn!(path = %path.display(), "pdf is encrypted");
            return Err(ExtractionFailure::Encrypted(path.to_path_buf()));
        }

        let mut pages = Vec::with_capacity(page_count);
        for index in 0..page_count {
            match document.page_text(index) {
                Ok(text) => {
                    let text = text.trim_end();
                    if !text.trim().is_empty() {
                        pages.push(text.to_string());
                    }
                }
                Err(error) => {
                    warn!(
                        path = %path.display(),
                        page = index + 1,
                        %error,
                        "skipping page without extractable text"
                    );
                }
            }
        }

        let joined = pages.join("\n");
        if joined.trim().is_empty() {
            warn!(path = %path.display(), "no text content could be extracted");
            return Err(ExtractionFailure::NoExtractableText(path.to_path_buf()));
        }

        info!(path = %path.display(), pages = pages.len(), chars = joined.len(), "extracted text");
        Ok(joined)
    }
}
