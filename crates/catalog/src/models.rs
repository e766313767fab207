//! Catalog records.

use derive_more::Display;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use time::OffsetDateTime;

/// What a resource is, which decides how its backing file is named.
#[derive(Debug, Display, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResourceKind {
    #[display("image")]
    Image,
    #[display("pdf")]
    Pdf,
    #[display("html")]
    Html,
    #[display("other")]
    Other,
}
impl ResourceKind {
    pub const ALL: [ResourceKind; 4] = [Self::Image, Self::Pdf, Self::Html, Self::Other];

    /// File extension (without the dot) of the current naming scheme.
    pub fn extension(self) -> &'static str {
        match self {
            Self::Image => "png",
            Self::Pdf => "pdf",
            Self::Html => "html",
            Self::Other => "bin",
        }
    }

    /// Prefix of the current naming scheme's file stem.
    pub fn file_prefix(self) -> &'static str {
        match self {
            Self::Image => "img",
            Self::Pdf => "pdf",
            Self::Html => "page",
            Self::Other => "res",
        }
    }
}
impl FromStr for ResourceKind {
    type Err = ();
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL.into_iter().find(|kind| kind.to_string().eq_ignore_ascii_case(s)).ok_or(())
    }
}

/// A catalog-tracked resource.
///
/// `stored_path` may be relative to the resource base directory or absolute;
/// either way it must resolve under the base directory to be used.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceRecord {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stored_path: Option<String>,
    pub kind: ResourceKind,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
    #[serde(default)]
    pub deleted: bool,
}
impl ResourceRecord {
    pub fn new(id: impl Into<String>, kind: ResourceKind) -> Self {
        let now = OffsetDateTime::now_utc();
        Self {
            id: id.into(),
            stored_path: None,
            kind,
            created_at: now,
            updated_at: now,
            deleted: false,
        }
    }

    pub fn with_stored_path(mut self, path: impl Into<String>) -> Self {
        self.stored_path = Some(path.into());
        self
    }
}

/// Partial record sent to [`Catalog::update_resource`](crate::Catalog::update_resource).
/// Fields left as `None` are not touched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceUpdate {
    pub id: String,
    pub stored_path: Option<String>,
}
impl ResourceUpdate {
    pub fn stored_path(id: impl Into<String>, path: impl Into<String>) -> Self {
        Self { id: id.into(), stored_path: Some(path.into()) }
    }
}
