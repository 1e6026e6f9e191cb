//! Whitelisted sort fields and pagination helpers shared by both stores

use shared::query::{PaginatedResponse, PaginationRequest, SortOrder};

pub const PRODUCT_SORT: &[&str] = &["id", "name", "created_at", "updated_at", "selling_count"];
pub const DISCOUNT_SORT: &[&str] = &["id", "code", "created_at", "expiry_date"];
pub const PAGE_SORT: &[&str] = &["id", "title", "slug", "created_at", "updated_at"];
pub const ORDER_SORT: &[&str] = &["id", "created_at", "updated_at", "total_final_price"];
pub const PAYMENT_SORT: &[&str] = &["id", "created_at", "amount"];
pub const BASKET_SORT: &[&str] = &["id", "updated_at"];
pub const GATEWAY_SORT: &[&str] = &["id", "created_at", "updated_at"];

/// `ORDER BY` body for a whitelisted field; the field name never comes from input verbatim
pub fn order_clause(req: &PaginationRequest, allowed: &[&str], alias: &str) -> String {
    let field = req.sort_by(allowed, "id");
    let dir = req.sort().as_sql();
    if alias.is_empty() {
        format!("{field} {dir}, id {dir}")
    } else {
        format!("{alias}.{field} {dir}, {alias}.id {dir}")
    }
}

/// `%term%` for LIKE, with wildcards in the term escaped
pub fn like_pattern(term: &str) -> String {
    let escaped = term
        .replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_");
    format!("%{escaped}%")
}

/// Comparable value of one sort field
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub enum SortValue {
    Int(i64),
    Text(String),
}

/// In-memory sort + page, used by the memory store
pub fn paginate<T>(
    mut items: Vec<T>,
    req: &PaginationRequest,
    allowed: &[&str],
    key: impl Fn(&T, &str) -> SortValue,
    id: impl Fn(&T) -> i64,
) -> PaginatedResponse<T> {
    let field = req.sort_by(allowed, "id");
    items.sort_by(|a, b| {
        let ord = key(a, field).cmp(&key(b, field)).then(id(a).cmp(&id(b)));
        match req.sort() {
            SortOrder::Asc => ord,
            SortOrder::Desc => ord.reverse(),
        }
    });
    PaginatedResponse::from_vec(items, req)
}

/// Case-insensitive substring match used for `search`
pub fn matches_search(req: &PaginationRequest, fields: &[&str]) -> bool {
    match req.search() {
        None => true,
        Some(term) => {
            let term = term.to_lowercase();
            fields.iter().any(|f| f.to_lowercase().contains(&term))
        }
    }
}
