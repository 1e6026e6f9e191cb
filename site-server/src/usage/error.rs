use shared::error::{AppError, ErrorCode};
use shared::models::UsageKind;
use thiserror::Error;

use crate::db::RepoError;

#[derive(Debug, Error)]
pub enum UsageError {
    #[error(transparent)]
    Repo(#[from] RepoError),

    #[error(transparent)]
    Invalid(#[from] validator::ValidationErrors),

    /// Page and entities do not all belong to `site_id`
    #[error("page {page_id} cannot use entities outside site {site_id}")]
    SiteMismatch { page_id: i64, site_id: i64 },

    #[error("page {0} belongs to another user")]
    NotPageOwner(i64),

    #[error("unknown {} ids: {ids:?}", kind.as_str())]
    UnknownEntities { kind: UsageKind, ids: Vec<i64> },
}

fn not_found_code(kind: UsageKind) -> ErrorCode {
    match kind {
        UsageKind::Product => ErrorCode::ProductNotFound,
        UsageKind::Article => ErrorCode::ArticleNotFound,
        UsageKind::HeaderFooter => ErrorCode::HeaderFooterNotFound,
    }
}

impl From<UsageError> for AppError {
    fn from(err: UsageError) -> Self {
        match err {
            UsageError::Repo(e) => e.into(),
            UsageError::Invalid(e) => e.into(),
            UsageError::SiteMismatch { page_id, site_id } => AppError::new(ErrorCode::SiteMismatch)
                .with_detail("page_id", page_id)
                .with_detail("site_id", site_id),
            UsageError::NotPageOwner(_) => AppError::new(ErrorCode::PermissionDenied),
            UsageError::UnknownEntities { kind, ids } => {
                AppError::new(not_found_code(kind)).with_detail("entity_ids", ids)
            }
        }
    }
}
