use serde::{Deserialize, Serialize};

use crate::error::AppError;

/// One document as submitted for ingestion, shared between the synchronous
/// `/ingest` endpoint and batch job payloads.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct IngestDoc {
    pub tenant_id: String,
    pub project_id: String,
    pub filename: String,
    pub text: String,
    pub doc_id: Option<String>,
    pub user_id: Option<String>,
    pub mime_type: Option<String>,
    pub document_type: Option<String>,
    pub chunk_strategy: Option<String>,
    pub chunk_overlap: Option<usize>,
    pub metadata: Option<serde_json::Value>,
}

const MAX_IDENTIFIER_LEN: usize = 256;

impl IngestDoc {
    /// Edge validation: required fields present and non-empty, identifiers
    /// within the documented soft limit.
    pub fn validate(&self) -> Result<(), AppError> {
        for (field, value) in [
            ("tenant_id", &self.tenant_id),
            ("project_id", &self.project_id),
            ("filename", &self.filename),
        ] {
            if value.trim().is_empty() {
                return Err(AppError::Validation(format!("{field} must not be empty")));
            }
            if value.len() > MAX_IDENTIFIER_LEN {
                return Err(AppError::Validation(format!(
                    "{field} exceeds {MAX_IDENTIFIER_LEN} characters"
                )));
            }
        }
        if self.text.is_empty() {
            return Err(AppError::Validation("text must not be empty".to_owned()));
        }
        if let Some(doc_id) = &self.doc_id {
            if doc_id.trim().is_empty() || doc_id.len() > MAX_IDENTIFIER_LEN {
                return Err(AppError::Validation(
                    "doc_id must be non-empty and at most 256 characters".to_owned(),
                ));
            }
        }
        Ok(())
    }

    /// The logical document id: caller-provided, or derived from the
    /// filename stem so repeat uploads of the same file address the same
    /// document.
    pub fn resolved_doc_id(&self) -> String {
        if let Some(doc_id) = &self.doc_id {
            return doc_id.clone();
        }
        let stem = self
            .filename
            .rsplit('/')
            .next()
            .unwrap_or(&self.filename)
            .trim_end_matches(|c| c != '.')
            .trim_end_matches('.');
        let stem = if stem.is_empty() {
            self.filename.as_str()
        } else {
            stem
        };
        stem.chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                    c
                } else {
                    '-'
                }
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid_doc() -> IngestDoc {
        IngestDoc {
            tenant_id: "acme".to_owned(),
            project_id: "p1".to_owned(),
            filename: "notes.txt".to_owned(),
            text: "hello".to_owned(),
            doc_id: None,
            user_id: None,
            mime_type: None,
            document_type: None,
            chunk_strategy: None,
            chunk_overlap: None,
            metadata: None,
        }
    }

    #[test]
    fn accepts_valid_payload() {
        assert!(valid_doc().validate().is_ok());
    }

    #[test]
    fn rejects_empty_required_fields() {
        for field in ["tenant_id", "project_id", "filename"] {
            let mut doc = valid_doc();
            match field {
                "tenant_id" => doc.tenant_id = "  ".to_owned(),
                "project_id" => doc.project_id = String::new(),
                _ => doc.filename = String::new(),
            }
            let err = doc.validate().expect_err("should reject");
            assert!(err.to_string().contains(field), "error names {field}: {err}");
        }

        let mut doc = valid_doc();
        doc.text = String::new();
        assert!(doc.validate().is_err());
    }

    #[test]
    fn rejects_oversized_identifiers() {
        let mut doc = valid_doc();
        doc.tenant_id = "x".repeat(300);
        assert!(doc.validate().is_err());
    }

    #[test]
    fn doc_id_defaults_to_filename_stem() {
        let mut doc = valid_doc();
        assert_eq!(doc.resolved_doc_id(), "notes");

        doc.filename = "reports/q1 summary.pdf".to_owned();
        assert_eq!(doc.resolved_doc_id(), "q1-summary");

        doc.doc_id = Some("explicit".to_owned());
        assert_eq!(doc.resolved_doc_id(), "explicit");
    }

    #[test]
    fn doc_id_handles_extensionless_filenames() {
        let mut doc = valid_doc();
        doc.filename = "README".to_owned();
        assert_eq!(doc.resolved_doc_id(), "README");
    }
}
