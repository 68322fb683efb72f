use std::path::Path;
use std::sync::Arc;

use docflow_shared::{DocflowError, Result};
use tracing::{info, instrument};

use crate::client::ConversionService;
use crate::detect::{FileKind, sniff};

/// Produces canonical PDF bytes from any accepted upload.
#[derive(Clone)]
pub struct Normalizer {
    service: Arc<dyn ConversionService>,
}

impl Normalizer {
    pub fn new(service: Arc<dyn ConversionService>) -> Self {
        Self { service }
    }

    /// PDF input comes back unchanged; anything else goes through the
    /// conversion service. Every failure surfaces as `NormalizationFailed`.
    #[instrument(skip_all, fields(kind = %kind, filename = %filename))]
    pub async fn normalize(&self, bytes: Vec<u8>, kind: FileKind, filename: &str) -> Result<Vec<u8>> {
        if kind.is_canonical() {
            return Ok(bytes);
        }

        let upload_name = conversion_filename(filename, kind);
        let location = self
            .service
            .submit(&bytes, &upload_name, kind.mime())
            .await
            .map_err(into_normalization_error)?;
        let converted = self
            .service
            .fetch(&location)
            .await
            .map_err(into_normalization_error)?;

        if !sniff(&converted).is_some_and(|mime| FileKind::from_mime(mime) == Some(FileKind::Pdf)) {
            return Err(DocflowError::NormalizationFailed(format!(
                "conversion returned {} instead of a PDF",
                sniff(&converted).unwrap_or("unrecognized content")
            )));
        }

        info!(
            from = bytes.len(),
            to = converted.len(),
            "converted to PDF"
        );
        Ok(converted)
    }
}

fn into_normalization_error(e: DocflowError) -> DocflowError {
    match e {
        DocflowError::NormalizationFailed(_) => e,
        other => DocflowError::NormalizationFailed(other.to_string()),
    }
}

/// Name sent to the conversion service: the upload's stem with the
/// extension of the detected type, so a mislabelled file still converts.
fn conversion_filename(filename: &str, kind: FileKind) -> String {
    let stem = Path::new(filename)
        .file_stem()
        .and_then(|s| s.to_str())
        .filter(|s| !s.is_empty())
        .unwrap_or("document");
    format!("{stem}.{}", kind.extension())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::{pdf_bytes, png_bytes};
    use async_trait::async_trait;
    use std::sync::Mutex;

    /// Records calls and returns canned results.
    struct StubService {
        fetched: Vec<u8>,
        fail_submit: bool,
        calls: Mutex<Vec<String>>,
    }

    impl StubService {
        fn returning(fetched: Vec<u8>) -> Arc<Self> {
            Arc::new(Self {
                fetched,
                fail_submit: false,
                calls: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl ConversionService for StubService {
        async fn submit(&self, _bytes: &[u8], filename: &str, content_type: &str) -> Result<String> {
            self.calls
                .lock()
                .unwrap()
                .push(format!("submit {filename} {content_type}"));
            if self.fail_submit {
                return Err(DocflowError::Network("connection reset".into()));
            }
            Ok("https://files/out.pdf".into())
        }

        async fn fetch(&self, location: &str) -> Result<Vec<u8>> {
            self.calls.lock().unwrap().push(format!("fetch {location}"));
            Ok(self.fetched.clone())
        }
    }

    #[tokio::test]
    async fn pdf_passes_through_untouched() {
        let service = StubService::returning(Vec::new());
        let normalizer = Normalizer::new(service.clone());
        let input = pdf_bytes();
        let out = normalizer
            .normalize(input.clone(), FileKind::Pdf, "a.pdf")
            .await
            .unwrap();
        assert_eq!(out, input);
        assert!(service.calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn converts_other_types() {
        let service = StubService::returning(pdf_bytes());
        let normalizer = Normalizer::new(service.clone());
        let out = normalizer
            .normalize(png_bytes(), FileKind::Png, "scan.jpeg")
            .await
            .unwrap();
        assert_eq!(out, pdf_bytes());
        assert_eq!(
            *service.calls.lock().unwrap(),
            vec![
                "submit scan.png image/png".to_string(),
                "fetch https://files/out.pdf".to_string()
            ]
        );
    }

    #[tokio::test]
    async fn non_pdf_result_is_rejected() {
        let service = StubService::returning(png_bytes());
        let normalizer = Normalizer::new(service);
        let err = normalizer
            .normalize(png_bytes(), FileKind::Png, "scan.png")
            .await
            .unwrap_err();
        assert!(matches!(err, DocflowError::NormalizationFailed(ref m) if m.contains("image/png")));
    }

    #[tokio::test]
    async fn transport_errors_become_normalization_failures() {
        let service = Arc::new(StubService {
            fetched: pdf_bytes(),
            fail_submit: true,
            calls: Mutex::new(Vec::new()),
        });
        let normalizer = Normalizer::new(service);
        let err = normalizer
            .normalize(png_bytes(), FileKind::Png, "scan.png")
            .await
            .unwrap_err();
        assert!(matches!(err, DocflowError::NormalizationFailed(_)));
    }

    #[test]
    fn conversion_filename_uses_detected_extension() {
        assert_eq!(conversion_filename("report.pdf", FileKind::Docx), "report.docx");
        assert_eq!(conversion_filename("noext", FileKind::Xlsx), "noext.xlsx");
        assert_eq!(conversion_filename("", FileKind::Ppt), "document.ppt");
    }
}
