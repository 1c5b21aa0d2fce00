use std::fmt;

use serde::{Deserialize, Serialize};

/// The unit of indexing and isolation: one dense index file, one BM25 state
/// and one `indices` row exist per partition.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Partition {
    pub tenant_id: String,
    pub namespace: String,
    pub document_type: String,
    pub embedding_version: String,
}

pub const DEFAULT_DOCUMENT_TYPE: &str = "default";

impl Partition {
    pub fn new(
        tenant_id: impl Into<String>,
        namespace: impl Into<String>,
        document_type: Option<&str>,
        embedding_version: impl Into<String>,
    ) -> Self {
        Self {
            tenant_id: tenant_id.into(),
            namespace: namespace.into(),
            document_type: document_type
                .filter(|s| !s.trim().is_empty())
                .unwrap_or(DEFAULT_DOCUMENT_TYPE)
                .to_owned(),
            embedding_version: embedding_version.into(),
        }
    }

    /// Stable identifier usable as both a record id and a file-name stem.
    pub fn slug(&self) -> String {
        format!(
            "{}_{}_{}_{}",
            sanitize(&self.tenant_id),
            sanitize(&self.namespace),
            sanitize(&self.document_type),
            sanitize(&self.embedding_version)
        )
    }

    pub fn index_file_name(&self) -> String {
        format!("{}.idx", self.slug())
    }
}

impl fmt::Display for Partition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{}/{}/{}",
            self.tenant_id, self.namespace, self.document_type, self.embedding_version
        )
    }
}

/// Keep identifiers path- and record-id-safe without losing uniqueness for
/// ordinary tenant/namespace values.
fn sanitize(value: &str) -> String {
    value
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '.' {
                c
            } else {
                '-'
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_document_type_when_missing_or_blank() {
        let p = Partition::new("acme", "p1", None, "v1");
        assert_eq!(p.document_type, "default");

        let p = Partition::new("acme", "p1", Some("  "), "v1");
        assert_eq!(p.document_type, "default");

        let p = Partition::new("acme", "p1", Some("manuals"), "v1");
        assert_eq!(p.document_type, "manuals");
    }

    #[test]
    fn slug_is_filesystem_safe() {
        let p = Partition::new("ac/me", "p 1", Some("t#y"), "v1");
        assert_eq!(p.slug(), "ac-me_p-1_t-y_v1");
        assert_eq!(p.index_file_name(), "ac-me_p-1_t-y_v1.idx");
    }
}
