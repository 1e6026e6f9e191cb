//! Domain models
//!
//! Money is always integer minor units (`i64`); timestamps are epoch millis
//! serialized as RFC 3339.

pub mod account;
pub mod basket;
pub mod discount;
pub mod gateway;
pub mod order;
pub mod page;
pub mod payment;
pub mod product;
pub mod serde_helpers;

pub use account::*;
pub use basket::*;
pub use discount::*;
pub use gateway::*;
pub use order::*;
pub use page::*;
pub use payment::*;
pub use product::*;

use validator::ValidationError;

/// Slugs: 1..=128 chars of lowercase ascii letters, digits and '-'
pub fn validate_slug(slug: &str) -> Result<(), ValidationError> {
    let ok = !slug.is_empty()
        && slug.len() <= 128
        && !slug.starts_with('-')
        && !slug.ends_with('-')
        && slug
            .bytes()
            .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || b == b'-');
    if ok {
        Ok(())
    } else {
        let mut err = ValidationError::new("slug");
        err.message = Some("slug must be lowercase letters, digits and '-'".into());
        Err(err)
    }
}

#[cfg(test)]
mod tests {
    use super::validate_slug;

    #[test]
    fn slug_rules() {
        assert!(validate_slug("summer-sale-2024").is_ok());
        assert!(validate_slug("").is_err());
        assert!(validate_slug("Summer").is_err());
        assert!(validate_slug("-lead").is_err());
        assert!(validate_slug("with space").is_err());
    }
}
