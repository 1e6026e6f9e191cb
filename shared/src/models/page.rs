//! Pages, page-referenced content and usage edges

use serde::{Deserialize, Serialize};
use validator::Validate;

use super::serde_helpers::{option_timestamp, timestamp};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Page {
    pub id: i64,
    pub site_id: i64,
    pub user_id: i64,
    pub slug: String,
    pub title: String,
    pub header_id: Option<i64>,
    pub footer_id: Option<i64>,
    /// Composed page body, rendered elsewhere
    pub body: serde_json::Value,
    #[serde(with = "timestamp")]
    pub created_at: i64,
    #[serde(with = "timestamp")]
    pub updated_at: i64,
    #[serde(default)]
    pub is_deleted: bool,
    #[serde(default, with = "option_timestamp")]
    pub deleted_at: Option<i64>,
}

impl Page {
    pub fn summary(&self) -> PageSummary {
        PageSummary {
            id: self.id,
            title: self.title.clone(),
            slug: self.slug.clone(),
            site_id: self.site_id,
        }
    }
}

/// Reverse-lookup result row
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageSummary {
    pub id: i64,
    pub title: String,
    pub slug: String,
    pub site_id: i64,
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct PageInput {
    pub site_id: i64,
    #[validate(custom(function = "crate::models::validate_slug"))]
    pub slug: String,
    #[validate(length(min = 1, max = 255))]
    pub title: String,
    pub header_id: Option<i64>,
    pub footer_id: Option<i64>,
    #[serde(default)]
    pub body: serde_json::Value,
}

/// Kind of entity a page can reference
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UsageKind {
    Product,
    Article,
    HeaderFooter,
}

impl UsageKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            UsageKind::Product => "product",
            UsageKind::Article => "article",
            UsageKind::HeaderFooter => "header_footer",
        }
    }
}

impl std::str::FromStr for UsageKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "product" => Ok(UsageKind::Product),
            "article" => Ok(UsageKind::Article),
            "header_footer" => Ok(UsageKind::HeaderFooter),
            other => Err(format!("unknown usage type: {other}")),
        }
    }
}

/// One row of a usage edge table
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct UsageEdge {
    pub page_id: i64,
    pub entity_id: i64,
    pub site_id: i64,
    pub user_id: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HeaderFooterKind {
    Header,
    Footer,
}

impl HeaderFooterKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            HeaderFooterKind::Header => "header",
            HeaderFooterKind::Footer => "footer",
        }
    }
}

impl std::str::FromStr for HeaderFooterKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "header" => Ok(HeaderFooterKind::Header),
            "footer" => Ok(HeaderFooterKind::Footer),
            other => Err(format!("unknown header/footer kind: {other}")),
        }
    }
}

/// Minimal article record (full article CRUD lives elsewhere)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Article {
    pub id: i64,
    pub site_id: i64,
    pub user_id: i64,
    pub title: String,
    #[serde(with = "timestamp")]
    pub created_at: i64,
    #[serde(default)]
    pub is_deleted: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeaderFooter {
    pub id: i64,
    pub site_id: i64,
    pub user_id: i64,
    pub title: String,
    pub kind: HeaderFooterKind,
    #[serde(with = "timestamp")]
    pub created_at: i64,
    #[serde(default)]
    pub is_deleted: bool,
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct ContentInput {
    pub site_id: i64,
    #[validate(length(min = 1, max = 255))]
    pub title: String,
    /// Only meaningful for headers/footers
    pub kind: Option<HeaderFooterKind>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn usage_kind_names() {
        assert_eq!("header_footer".parse::<UsageKind>(), Ok(UsageKind::HeaderFooter));
        assert_eq!(
            serde_json::to_string(&UsageKind::HeaderFooter).unwrap(),
            "\"header_footer\""
        );
        assert!("media".parse::<UsageKind>().is_err());
    }
}
