//! Local PDF validation.
//!
//! Files are checked before any network call so obviously broken inputs are
//! rejected without an upload. Validation is structural: the document must
//! load (header, cross-reference table, trailer) and contain at least one
//! page. Page contents are not decoded.

/// Magic bytes every PDF starts with (after optional leading whitespace).
const PDF_MAGIC: &[u8] = b"%PDF-";
/// How far into the file the header may appear.
const HEADER_SEARCH_BYTES: usize = 1024;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PdfError {
    Empty,
    MissingHeader,
    Unparseable(String),
    NoPages,
}

impl std::fmt::Display for PdfError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PdfError::Empty => write!(f, "file is empty"),
            PdfError::MissingHeader => write!(f, "not a PDF (missing %PDF- header)"),
            PdfError::Unparseable(e) => write!(f, "invalid PDF: {}", e),
            PdfError::NoPages => write!(f, "PDF has no pages"),
        }
    }
}

impl std::error::Error for PdfError {}

/// Cheap structural check: the `%PDF-` marker within the first kilobyte.
pub fn check_header(bytes: &[u8]) -> Result<(), PdfError> {
    if bytes.is_empty() {
        return Err(PdfError::Empty);
    }
    let window = &bytes[..bytes.len().min(HEADER_SEARCH_BYTES)];
    if window.windows(PDF_MAGIC.len()).any(|w| w == PDF_MAGIC) {
        Ok(())
    } else {
        Err(PdfError::MissingHeader)
    }
}

/// Full validation: header check, then a structural load of the document.
///
/// Returns the page count. Blocking and CPU-bound on large files; callers
/// on the async runtime run it through `spawn_blocking`.
pub fn validate(bytes: &[u8]) -> Result<usize, PdfError> {
    check_header(bytes)?;
    let document =
        lopdf::Document::load_mem(bytes).map_err(|e| PdfError::Unparseable(e.to_string()))?;
    match document.get_pages().len() {
        0 => Err(PdfError::NoPages),
        pages => Ok(pages),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// One-page PDF with a single text run, offsets computed on the fly.
    fn minimal_pdf(text: &str) -> Vec<u8> {
        let content = format!("BT /F1 12 Tf 100 700 Td ({}) Tj ET", text);
        let objects = [
            "<< /Type /Catalog /Pages 2 0 R >>".to_string(),
            "<< /Type /Pages /Kids [3 0 R] /Count 1 >>".to_string(),
            "<< /Type /Page /Parent 2 0 R /MediaBox [0 0 612 792] /Contents 4 0 R \
             /Resources << /Font << /F1 5 0 R >> >> >>"
                .to_string(),
            format!(
                "<< /Length {} >>\nstream\n{}\nendstream",
                content.len(),
                content
            ),
            "<< /Type /Font /Subtype /Type1 /BaseFont /Helvetica >>".to_string(),
        ];

        let mut out = b"%PDF-1.4\n".to_vec();
        let mut offsets = Vec::new();
        for (i, body) in objects.iter().enumerate() {
            offsets.push(out.len());
            out.extend_from_slice(format!("{} 0 obj\n{}\nendobj\n", i + 1, body).as_bytes());
        }
        let xref_start = out.len();
        out.extend_from_slice(format!("xref\n0 {}\n", objects.len() + 1).as_bytes());
        out.extend_from_slice(b"0000000000 65535 f \n");
        for offset in offsets {
            out.extend_from_slice(format!("{:010} 00000 n \n", offset).as_bytes());
        }
        out.extend_from_slice(
            format!(
                "trailer\n<< /Size {} /Root 1 0 R >>\nstartxref\n{}\n%%EOF\n",
                objects.len() + 1,
                xref_start
            )
            .as_bytes(),
        );
        out
    }

    #[test]
    fn empty_bytes_rejected() {
        assert_eq!(check_header(b""), Err(PdfError::Empty));
    }

    #[test]
    fn text_file_rejected() {
        assert_eq!(
            check_header(b"hello, this is not a pdf"),
            Err(PdfError::MissingHeader)
        );
    }

    #[test]
    fn header_after_junk_accepted() {
        let mut bytes = b"\r\n\r\n".to_vec();
        bytes.extend_from_slice(b"%PDF-1.4\n");
        assert!(check_header(&bytes).is_ok());
    }

    #[test]
    fn header_too_far_in_rejected() {
        let mut bytes = vec![b' '; HEADER_SEARCH_BYTES];
        bytes.extend_from_slice(b"%PDF-1.4\n");
        assert_eq!(check_header(&bytes), Err(PdfError::MissingHeader));
    }

    #[test]
    fn well_formed_pdf_passes_full_validation() {
        assert_eq!(validate(&minimal_pdf("quarterly report")), Ok(1));
    }

    #[test]
    fn truncated_pdf_fails_full_validation() {
        assert!(matches!(
            validate(b"%PDF-1.4\n1 0 obj"),
            Err(PdfError::Unparseable(_) | PdfError::NoPages)
        ));
    }

    #[test]
    fn plain_text_fails_full_validation_before_parsing() {
        assert_eq!(validate(b"just some notes"), Err(PdfError::MissingHeader));
    }
}
