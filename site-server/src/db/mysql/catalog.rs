use std::collections::HashMap;

use async_trait::async_trait;
use shared::error::ErrorCode;
use shared::models::{
    Basket, BasketItem, Coupon, Discount, DiscountInput, DiscountType, Gateway, GatewayAccount,
    Product, ProductInput, ProductStatus, ProductVariant,
};
use shared::query::{PaginatedResponse, PaginationRequest};
use shared::util::now_millis;
use sqlx::{MySql, MySqlConnection, QueryBuilder};

use super::{MySqlStore, parse_col, placeholders};
use crate::db::filter::{ProductFilter, SortKind};
use crate::db::paging::{
    BASKET_SORT, DISCOUNT_SORT, GATEWAY_SORT, PRODUCT_SORT, like_pattern, order_clause,
};
use crate::db::{
    BasketStore, CatalogStore, DiscountStore, GatewayStore, RepoError, RepoResult,
};

// ============================================================================
// Rows
// ============================================================================

#[derive(sqlx::FromRow)]
struct ProductRow {
    id: i64,
    site_id: i64,
    user_id: i64,
    slug: String,
    name: String,
    description: String,
    status: String,
    weight: i64,
    free_send: bool,
    selling_count: i64,
    visited_count: i64,
    review_count: i64,
    rate: f64,
    created_at: i64,
    updated_at: i64,
    is_deleted: bool,
    deleted_at: Option<i64>,
}

const PRODUCT_COLUMNS: &str = "p.id, p.site_id, p.user_id, p.slug, p.name, p.description, \
     p.status, p.weight, p.free_send, p.selling_count, p.visited_count, p.review_count, p.rate, \
     p.created_at, p.updated_at, p.is_deleted, p.deleted_at";

#[derive(sqlx::FromRow)]
struct VariantRow {
    id: i64,
    product_id: i64,
    name: String,
    price: i64,
    stock: i64,
    version: i64,
}

#[derive(sqlx::FromRow)]
struct CouponRow {
    id: i64,
    product_id: i64,
    quantity: i64,
    discount_type: String,
    value: i64,
    expiry_date: i64,
}

#[derive(sqlx::FromRow)]
struct DiscountRow {
    id: i64,
    site_id: i64,
    user_id: i64,
    code: String,
    quantity: i64,
    discount_type: String,
    value: i64,
    expiry_date: i64,
    created_at: i64,
    updated_at: i64,
    is_deleted: bool,
    deleted_at: Option<i64>,
}

const DISCOUNT_COLUMNS: &str = "id, site_id, user_id, code, quantity, discount_type, value, \
     expiry_date, created_at, updated_at, is_deleted, deleted_at";

impl TryFrom<DiscountRow> for Discount {
    type Error = RepoError;

    fn try_from(r: DiscountRow) -> RepoResult<Self> {
        Ok(Discount {
            id: r.id,
            site_id: r.site_id,
            user_id: r.user_id,
            code: r.code,
            quantity: r.quantity,
            discount_type: parse_col::<DiscountType>(&r.discount_type, "discount_type")?,
            value: r.value,
            expiry_date: r.expiry_date,
            created_at: r.created_at,
            updated_at: r.updated_at,
            is_deleted: r.is_deleted,
            deleted_at: r.deleted_at,
        })
    }
}

#[derive(sqlx::FromRow)]
struct BasketRow {
    id: i64,
    site_id: i64,
    customer_id: i64,
    discount_id: Option<i64>,
    total_raw_price: i64,
    total_coupon_discount: i64,
    total_discount: i64,
    total_price_with_coupon_discount: i64,
    created_at: i64,
    updated_at: i64,
}

const BASKET_COLUMNS: &str = "id, site_id, customer_id, discount_id, total_raw_price, \
     total_coupon_discount, total_discount, total_price_with_coupon_discount, created_at, updated_at";

#[derive(sqlx::FromRow)]
struct BasketItemRow {
    id: i64,
    basket_id: i64,
    product_id: i64,
    product_variant_id: i64,
    quantity: i32,
    raw_price: i64,
    final_raw_price: i64,
    final_price_with_coupon_discount: i64,
    just_coupon_price: i64,
    just_discount_price: i64,
    version: i64,
}

#[derive(sqlx::FromRow)]
struct GatewayRow {
    id: i64,
    site_id: i64,
    user_id: i64,
    accounts: String,
    created_at: i64,
    updated_at: i64,
}

impl TryFrom<GatewayRow> for Gateway {
    type Error = RepoError;

    fn try_from(r: GatewayRow) -> RepoResult<Self> {
        Ok(Gateway {
            id: r.id,
            site_id: r.site_id,
            user_id: r.user_id,
            accounts: serde_json::from_str(&r.accounts)?,
            created_at: r.created_at,
            updated_at: r.updated_at,
        })
    }
}

// ============================================================================
// Product assembly
// ============================================================================

impl MySqlStore {
    /// Attach variants, coupon and link ids to product rows, keeping row order
    async fn assemble_products(&self, rows: Vec<ProductRow>) -> RepoResult<Vec<Product>> {
        if rows.is_empty() {
            return Ok(Vec::new());
        }
        let ids: Vec<i64> = rows.iter().map(|r| r.id).collect();
        let list = placeholders(ids.len());

        let sql = format!(
            "SELECT id, product_id, name, price, stock, version FROM product_variants \
             WHERE product_id IN ({list}) ORDER BY id"
        );
        let mut q = sqlx::query_as::<_, VariantRow>(&sql);
        for id in &ids {
            q = q.bind(id);
        }
        let mut variants: HashMap<i64, Vec<ProductVariant>> = HashMap::new();
        for v in q.fetch_all(&self.pool).await? {
            variants.entry(v.product_id).or_default().push(ProductVariant {
                id: v.id,
                product_id: v.product_id,
                name: v.name,
                price: v.price,
                stock: v.stock,
                version: v.version,
            });
        }

        let sql = format!(
            "SELECT id, product_id, quantity, discount_type, value, expiry_date FROM coupons \
             WHERE product_id IN ({list})"
        );
        let mut q = sqlx::query_as::<_, CouponRow>(&sql);
        for id in &ids {
            q = q.bind(id);
        }
        let mut coupons: HashMap<i64, Coupon> = HashMap::new();
        for c in q.fetch_all(&self.pool).await? {
            coupons.insert(
                c.product_id,
                Coupon {
                    id: c.id,
                    product_id: c.product_id,
                    quantity: c.quantity,
                    discount_type: parse_col(&c.discount_type, "discount_type")?,
                    value: c.value,
                    expiry_date: c.expiry_date,
                },
            );
        }

        let categories = self.link_ids("product_categories", "category_id", &ids).await?;
        let badges = self.link_ids("product_badges", "badge_id", &ids).await?;
        let attributes = self.link_ids("product_attributes", "attribute_id", &ids).await?;

        rows.into_iter()
            .map(|r| -> RepoResult<Product> {
                Ok(Product {
                    status: parse_col::<ProductStatus>(&r.status, "status")?,
                    variants: variants.remove(&r.id).unwrap_or_default(),
                    coupon: coupons.remove(&r.id),
                    category_ids: categories.get(&r.id).cloned().unwrap_or_default(),
                    badge_ids: badges.get(&r.id).cloned().unwrap_or_default(),
                    attribute_ids: attributes.get(&r.id).cloned().unwrap_or_default(),
                    id: r.id,
                    site_id: r.site_id,
                    user_id: r.user_id,
                    slug: r.slug,
                    name: r.name,
                    description: r.description,
                    weight: r.weight,
                    free_send: r.free_send,
                    selling_count: r.selling_count,
                    visited_count: r.visited_count,
                    review_count: r.review_count,
                    rate: r.rate,
                    created_at: r.created_at,
                    updated_at: r.updated_at,
                    is_deleted: r.is_deleted,
                    deleted_at: r.deleted_at,
                })
            })
            .collect()
    }

    async fn link_ids(
        &self,
        table: &str,
        column: &str,
        product_ids: &[i64],
    ) -> RepoResult<HashMap<i64, Vec<i64>>> {
        let sql = format!(
            "SELECT product_id, {column} FROM {table} WHERE product_id IN ({}) ORDER BY {column}",
            placeholders(product_ids.len())
        );
        let mut q = sqlx::query_as::<_, (i64, i64)>(&sql);
        for id in product_ids {
            q = q.bind(id);
        }
        let mut out: HashMap<i64, Vec<i64>> = HashMap::new();
        for (product_id, link_id) in q.fetch_all(&self.pool).await? {
            out.entry(product_id).or_default().push(link_id);
        }
        Ok(out)
    }

    async fn slug_taken(
        conn: &mut MySqlConnection,
        site_id: i64,
        slug: &str,
        except: i64,
    ) -> RepoResult<bool> {
        let row: Option<(i64,)> = sqlx::query_as(
            "SELECT id FROM products WHERE site_id = ? AND slug = ? AND is_deleted = FALSE AND id <> ? LIMIT 1",
        )
        .bind(site_id)
        .bind(slug)
        .bind(except)
        .fetch_optional(&mut *conn)
        .await?;
        Ok(row.is_some())
    }
}

/// Insert variants, coupon and link rows for a product
async fn write_children(
    conn: &mut MySqlConnection,
    product_id: i64,
    input: &ProductInput,
    now: i64,
) -> RepoResult<()> {
    for v in &input.variants {
        sqlx::query(
            "INSERT INTO product_variants (product_id, name, price, stock, version) VALUES (?, ?, ?, ?, ?)",
        )
        .bind(product_id)
        .bind(&v.name)
        .bind(v.price)
        .bind(v.stock)
        .bind(now)
        .execute(&mut *conn)
        .await?;
    }
    if let Some(c) = &input.coupon {
        sqlx::query(
            "INSERT INTO coupons (product_id, quantity, discount_type, value, expiry_date) VALUES (?, ?, ?, ?, ?)",
        )
        .bind(product_id)
        .bind(c.quantity)
        .bind(c.discount_type.as_str())
        .bind(c.value)
        .bind(c.expiry_date)
        .execute(&mut *conn)
        .await?;
    }
    let links = [
        ("product_categories", "category_id", &input.category_ids),
        ("product_badges", "badge_id", &input.badge_ids),
        ("product_attributes", "attribute_id", &input.attribute_ids),
    ];
    for (table, column, ids) in links {
        for id in ids {
            sqlx::query(&format!(
                "INSERT IGNORE INTO {table} (product_id, {column}) VALUES (?, ?)"
            ))
            .bind(product_id)
            .bind(id)
            .execute(&mut *conn)
            .await?;
        }
    }
    Ok(())
}

async fn delete_children(conn: &mut MySqlConnection, product_id: i64) -> RepoResult<()> {
    for table in [
        "product_variants",
        "coupons",
        "product_categories",
        "product_badges",
        "product_attributes",
    ] {
        sqlx::query(&format!("DELETE FROM {table} WHERE product_id = ?"))
            .bind(product_id)
            .execute(&mut *conn)
            .await?;
    }
    Ok(())
}

const PRODUCT_JOINS: &str = " FROM products p \
     LEFT JOIN (SELECT product_id, MIN(price) AS min_price FROM product_variants GROUP BY product_id) mp \
       ON mp.product_id = p.id \
     LEFT JOIN coupons c ON c.product_id = p.id ";

fn push_range<'args, T>(
    qb: &mut QueryBuilder<'args, MySql>,
    expr: &str,
    range: Option<&crate::db::RangeFilter<T>>,
) where
    T: Copy + Send + 'args + sqlx::Encode<'args, MySql> + sqlx::Type<MySql>,
{
    if let Some(r) = range {
        qb.push(format!(" AND {expr} BETWEEN "));
        qb.push_bind(r.min);
        qb.push(" AND ");
        qb.push_bind(r.max);
    }
}

fn push_link(qb: &mut QueryBuilder<'_, MySql>, table: &str, column: &str, ids: &[i64]) {
    if ids.is_empty() {
        return;
    }
    qb.push(format!(
        " AND EXISTS (SELECT 1 FROM {table} l WHERE l.product_id = p.id AND l.{column} IN ("
    ));
    let mut sep = qb.separated(", ");
    for id in ids {
        sep.push_bind(*id);
    }
    qb.push("))");
}

/// WHERE clause shared by the count and the page query
fn push_filter(qb: &mut QueryBuilder<'_, MySql>, site_id: i64, f: &ProductFilter) {
    qb.push(" WHERE p.site_id = ");
    qb.push_bind(site_id);
    qb.push(" AND p.is_deleted = FALSE");
    push_range(qb, "COALESCE(mp.min_price, 0)", f.price.as_ref());
    push_range(qb, "p.rate", f.rating.as_ref());
    push_range(qb, "p.selling_count", f.selling.as_ref());
    push_range(qb, "p.visited_count", f.visited.as_ref());
    push_range(qb, "p.review_count", f.review.as_ref());
    push_range(qb, "p.weight", f.weight.as_ref());
    push_range(qb, "p.created_at", f.added.as_ref());
    push_range(qb, "p.updated_at", f.updated.as_ref());
    push_range(qb, "c.value", f.coupon.as_ref());
    push_link(qb, "product_categories", "category_id", &f.category_ids);
    push_link(qb, "product_badges", "badge_id", &f.badge_ids);
    push_link(qb, "product_attributes", "attribute_id", &f.attribute_ids);
    push_link(qb, "product_variants", "id", &f.variant_ids);
    if !f.product_ids.is_empty() {
        qb.push(" AND p.id IN (");
        let mut sep = qb.separated(", ");
        for id in &f.product_ids {
            sep.push_bind(*id);
        }
        qb.push(")");
    }
    if let Some(free_send) = f.free_send {
        qb.push(" AND p.free_send = ");
        qb.push_bind(free_send);
    }
}

#[async_trait]
impl CatalogStore for MySqlStore {
    async fn create_product(&self, user_id: i64, input: &ProductInput) -> RepoResult<Product> {
        let mut tx = self.pool.begin().await?;
        if Self::slug_taken(&mut *tx, input.site_id, &input.slug, 0).await? {
            return Err(RepoError::Conflict(ErrorCode::SlugAlreadyExists));
        }
        let now = now_millis();
        let result = sqlx::query(
            "INSERT INTO products (site_id, user_id, slug, name, description, status, weight, free_send, created_at, updated_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(input.site_id)
        .bind(user_id)
        .bind(&input.slug)
        .bind(&input.name)
        .bind(&input.description)
        .bind(input.status.as_str())
        .bind(input.weight)
        .bind(input.free_send)
        .bind(now)
        .bind(now)
        .execute(&mut *tx)
        .await?;
        let id = result.last_insert_id() as i64;
        write_children(&mut *tx, id, input, now).await?;
        tx.commit().await?;
        self.get_product(id).await
    }

    async fn update_product(&self, id: i64, input: &ProductInput) -> RepoResult<Product> {
        let mut tx = self.pool.begin().await?;
        let (site_id,): (i64,) = sqlx::query_as(
            "SELECT site_id FROM products WHERE id = ? AND is_deleted = FALSE FOR UPDATE",
        )
        .bind(id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or(RepoError::NotFound(ErrorCode::ProductNotFound))?;
        if site_id != input.site_id {
            return Err(RepoError::Conflict(ErrorCode::SiteMismatch));
        }
        if Self::slug_taken(&mut *tx, site_id, &input.slug, id).await? {
            return Err(RepoError::Conflict(ErrorCode::SlugAlreadyExists));
        }
        let now = now_millis();
        sqlx::query(
            "UPDATE products SET slug = ?, name = ?, description = ?, status = ?, weight = ?, \
             free_send = ?, updated_at = ? WHERE id = ?",
        )
        .bind(&input.slug)
        .bind(&input.name)
        .bind(&input.description)
        .bind(input.status.as_str())
        .bind(input.weight)
        .bind(input.free_send)
        .bind(now)
        .bind(id)
        .execute(&mut *tx)
        .await?;
        delete_children(&mut *tx, id).await?;
        write_children(&mut *tx, id, input, now).await?;
        tx.commit().await?;
        self.get_product(id).await
    }

    async fn get_product(&self, id: i64) -> RepoResult<Product> {
        let sql = format!("SELECT {PRODUCT_COLUMNS} FROM products p WHERE p.id = ? AND p.is_deleted = FALSE");
        let row = sqlx::query_as::<_, ProductRow>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or(RepoError::NotFound(ErrorCode::ProductNotFound))?;
        self.assemble_products(vec![row])
            .await?
            .pop()
            .ok_or(RepoError::NotFound(ErrorCode::ProductNotFound))
    }

    async fn get_product_by_slug(&self, site_id: i64, slug: &str) -> RepoResult<Product> {
        let sql = format!(
            "SELECT {PRODUCT_COLUMNS} FROM products p WHERE p.site_id = ? AND p.slug = ? AND p.is_deleted = FALSE"
        );
        let row = sqlx::query_as::<_, ProductRow>(&sql)
            .bind(site_id)
            .bind(slug)
            .fetch_optional(&self.pool)
            .await?
            .ok_or(RepoError::NotFound(ErrorCode::ProductNotFound))?;
        self.assemble_products(vec![row])
            .await?
            .pop()
            .ok_or(RepoError::NotFound(ErrorCode::ProductNotFound))
    }

    async fn products_by_ids(&self, ids: &[i64]) -> RepoResult<Vec<Product>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let sql = format!(
            "SELECT {PRODUCT_COLUMNS} FROM products p WHERE p.id IN ({}) AND p.is_deleted = FALSE",
            placeholders(ids.len())
        );
        let mut q = sqlx::query_as::<_, ProductRow>(&sql);
        for id in ids {
            q = q.bind(id);
        }
        let rows = q.fetch_all(&self.pool).await?;
        self.assemble_products(rows).await
    }

    async fn list_products(
        &self,
        site_id: i64,
        page: &PaginationRequest,
    ) -> RepoResult<PaginatedResponse<Product>> {
        let pattern = page.search().map(like_pattern);
        let search = if pattern.is_some() {
            " AND (p.name LIKE ? OR p.slug LIKE ?)"
        } else {
            ""
        };

        let count_sql =
            format!("SELECT COUNT(*) FROM products p WHERE p.site_id = ? AND p.is_deleted = FALSE{search}");
        let mut count = sqlx::query_as::<_, (i64,)>(&count_sql).bind(site_id);
        if let Some(p) = &pattern {
            count = count.bind(p).bind(p);
        }
        let (total,) = count.fetch_one(&self.pool).await?;

        let sql = format!(
            "SELECT {PRODUCT_COLUMNS} FROM products p WHERE p.site_id = ? AND p.is_deleted = FALSE{search} \
             ORDER BY {} LIMIT ? OFFSET ?",
            order_clause(page, PRODUCT_SORT, "p")
        );
        let mut q = sqlx::query_as::<_, ProductRow>(&sql).bind(site_id);
        if let Some(p) = &pattern {
            q = q.bind(p).bind(p);
        }
        let rows = q
            .bind(i64::from(page.page_size()))
            .bind(page.offset() as i64)
            .fetch_all(&self.pool)
            .await?;
        let items = self.assemble_products(rows).await?;
        Ok(PaginatedResponse::new(items, total as u64, page))
    }

    async fn filter_products(
        &self,
        site_id: i64,
        filter: &ProductFilter,
        sort: SortKind,
        page: &PaginationRequest,
    ) -> RepoResult<PaginatedResponse<Product>> {
        let mut count: QueryBuilder<MySql> = QueryBuilder::new("SELECT COUNT(*)");
        count.push(PRODUCT_JOINS);
        push_filter(&mut count, site_id, filter);
        let (total,): (i64,) = count.build_query_as().fetch_one(&self.pool).await?;

        let mut qb: QueryBuilder<MySql> = QueryBuilder::new(format!(
            "SELECT {PRODUCT_COLUMNS}, COALESCE(mp.min_price, 0) AS min_price, COALESCE(c.value, 0) AS coupon_value"
        ));
        qb.push(PRODUCT_JOINS);
        push_filter(&mut qb, site_id, filter);
        qb.push(format!(" ORDER BY {} LIMIT ", sort.sql_order_by()));
        qb.push_bind(i64::from(page.page_size()));
        qb.push(" OFFSET ");
        qb.push_bind(page.offset() as i64);
        let rows: Vec<ProductRow> = qb.build_query_as().fetch_all(&self.pool).await?;

        let items = self.assemble_products(rows).await?;
        Ok(PaginatedResponse::new(items, total as u64, page))
    }

    async fn soft_delete_product(&self, id: i64) -> RepoResult<()> {
        let now = now_millis();
        let result = sqlx::query(
            "UPDATE products SET is_deleted = TRUE, deleted_at = ?, updated_at = ? WHERE id = ? AND is_deleted = FALSE",
        )
        .bind(now)
        .bind(now)
        .bind(id)
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(RepoError::NotFound(ErrorCode::ProductNotFound));
        }
        Ok(())
    }
}

// ============================================================================
// Discounts
// ============================================================================

impl MySqlStore {
    async fn code_taken(
        conn: &mut MySqlConnection,
        site_id: i64,
        code: &str,
        except: i64,
    ) -> RepoResult<bool> {
        let row: Option<(i64,)> = sqlx::query_as(
            "SELECT id FROM discounts WHERE site_id = ? AND code = ? AND is_deleted = FALSE AND id <> ? LIMIT 1",
        )
        .bind(site_id)
        .bind(code)
        .bind(except)
        .fetch_optional(&mut *conn)
        .await?;
        Ok(row.is_some())
    }
}

#[async_trait]
impl DiscountStore for MySqlStore {
    async fn create_discount(&self, user_id: i64, input: &DiscountInput) -> RepoResult<Discount> {
        let mut tx = self.pool.begin().await?;
        if Self::code_taken(&mut *tx, input.site_id, &input.code, 0).await? {
            return Err(RepoError::Duplicate(format!("discount code {}", input.code)));
        }
        let now = now_millis();
        let result = sqlx::query(
            "INSERT INTO discounts (site_id, user_id, code, quantity, discount_type, value, expiry_date, created_at, updated_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(input.site_id)
        .bind(user_id)
        .bind(&input.code)
        .bind(input.quantity)
        .bind(input.discount_type.as_str())
        .bind(input.value)
        .bind(input.expiry_date)
        .bind(now)
        .bind(now)
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;
        self.get_discount(result.last_insert_id() as i64).await
    }

    async fn update_discount(&self, id: i64, input: &DiscountInput) -> RepoResult<Discount> {
        let mut tx = self.pool.begin().await?;
        let (site_id,): (i64,) = sqlx::query_as(
            "SELECT site_id FROM discounts WHERE id = ? AND is_deleted = FALSE FOR UPDATE",
        )
        .bind(id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or(RepoError::NotFound(ErrorCode::DiscountNotFound))?;
        if site_id != input.site_id {
            return Err(RepoError::Conflict(ErrorCode::SiteMismatch));
        }
        if Self::code_taken(&mut *tx, site_id, &input.code, id).await? {
            return Err(RepoError::Duplicate(format!("discount code {}", input.code)));
        }
        sqlx::query(
            "UPDATE discounts SET code = ?, quantity = ?, discount_type = ?, value = ?, expiry_date = ?, updated_at = ? \
             WHERE id = ?",
        )
        .bind(&input.code)
        .bind(input.quantity)
        .bind(input.discount_type.as_str())
        .bind(input.value)
        .bind(input.expiry_date)
        .bind(now_millis())
        .bind(id)
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;
        self.get_discount(id).await
    }

    async fn get_discount(&self, id: i64) -> RepoResult<Discount> {
        let sql = format!("SELECT {DISCOUNT_COLUMNS} FROM discounts WHERE id = ? AND is_deleted = FALSE");
        sqlx::query_as::<_, DiscountRow>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or(RepoError::NotFound(ErrorCode::DiscountNotFound))?
            .try_into()
    }

    async fn find_discount_by_code(
        &self,
        site_id: i64,
        code: &str,
    ) -> RepoResult<Option<Discount>> {
        let sql = format!(
            "SELECT {DISCOUNT_COLUMNS} FROM discounts WHERE site_id = ? AND code = ? AND is_deleted = FALSE LIMIT 1"
        );
        sqlx::query_as::<_, DiscountRow>(&sql)
            .bind(site_id)
            .bind(code)
            .fetch_optional(&self.pool)
            .await?
            .map(Discount::try_from)
            .transpose()
    }

    async fn list_discounts(
        &self,
        site_id: Option<i64>,
        page: &PaginationRequest,
    ) -> RepoResult<PaginatedResponse<Discount>> {
        let pattern = page.search().map(like_pattern);
        let site = if site_id.is_some() { " AND site_id = ?" } else { "" };
        let search = if pattern.is_some() { " AND code LIKE ?" } else { "" };

        let count_sql =
            format!("SELECT COUNT(*) FROM discounts WHERE is_deleted = FALSE{site}{search}");
        let mut count = sqlx::query_as::<_, (i64,)>(&count_sql);
        if let Some(s) = site_id {
            count = count.bind(s);
        }
        if let Some(p) = &pattern {
            count = count.bind(p);
        }
        let (total,) = count.fetch_one(&self.pool).await?;

        let sql = format!(
            "SELECT {DISCOUNT_COLUMNS} FROM discounts WHERE is_deleted = FALSE{site}{search} \
             ORDER BY {} LIMIT ? OFFSET ?",
            order_clause(page, DISCOUNT_SORT, "")
        );
        let mut q = sqlx::query_as::<_, DiscountRow>(&sql);
        if let Some(s) = site_id {
            q = q.bind(s);
        }
        if let Some(p) = &pattern {
            q = q.bind(p);
        }
        let items = q
            .bind(i64::from(page.page_size()))
            .bind(page.offset() as i64)
            .fetch_all(&self.pool)
            .await?
            .into_iter()
            .map(Discount::try_from)
            .collect::<RepoResult<Vec<_>>>()?;
        Ok(PaginatedResponse::new(items, total as u64, page))
    }

    async fn soft_delete_discount(&self, id: i64) -> RepoResult<()> {
        let now = now_millis();
        let result = sqlx::query(
            "UPDATE discounts SET is_deleted = TRUE, deleted_at = ?, updated_at = ? WHERE id = ? AND is_deleted = FALSE",
        )
        .bind(now)
        .bind(now)
        .bind(id)
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(RepoError::NotFound(ErrorCode::DiscountNotFound));
        }
        Ok(())
    }

    async fn has_redeemed(&self, customer_id: i64, discount_id: i64) -> RepoResult<bool> {
        let row: Option<(i64,)> = sqlx::query_as(
            "SELECT id FROM customer_discounts WHERE customer_id = ? AND discount_id = ? LIMIT 1",
        )
        .bind(customer_id)
        .bind(discount_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.is_some())
    }
}

// ============================================================================
// Baskets
// ============================================================================

impl MySqlStore {
    async fn assemble_baskets(&self, rows: Vec<BasketRow>) -> RepoResult<Vec<Basket>> {
        if rows.is_empty() {
            return Ok(Vec::new());
        }
        let sql = format!(
            "SELECT id, basket_id, product_id, product_variant_id, quantity, raw_price, final_raw_price, \
             final_price_with_coupon_discount, just_coupon_price, just_discount_price, version \
             FROM basket_items WHERE basket_id IN ({}) ORDER BY id",
            placeholders(rows.len())
        );
        let mut q = sqlx::query_as::<_, BasketItemRow>(&sql);
        for r in &rows {
            q = q.bind(r.id);
        }
        let mut items: HashMap<i64, Vec<BasketItem>> = HashMap::new();
        for i in q.fetch_all(&self.pool).await? {
            items.entry(i.basket_id).or_default().push(BasketItem {
                id: i.id,
                basket_id: i.basket_id,
                product_id: i.product_id,
                product_variant_id: i.product_variant_id,
                quantity: i.quantity,
                raw_price: i.raw_price,
                final_raw_price: i.final_raw_price,
                final_price_with_coupon_discount: i.final_price_with_coupon_discount,
                just_coupon_price: i.just_coupon_price,
                just_discount_price: i.just_discount_price,
                version: i.version,
            });
        }
        Ok(rows
            .into_iter()
            .map(|r| Basket {
                items: items.remove(&r.id).unwrap_or_default(),
                id: r.id,
                site_id: r.site_id,
                customer_id: r.customer_id,
                discount_id: r.discount_id,
                total_raw_price: r.total_raw_price,
                total_coupon_discount: r.total_coupon_discount,
                total_discount: r.total_discount,
                total_price_with_coupon_discount: r.total_price_with_coupon_discount,
                created_at: r.created_at,
                updated_at: r.updated_at,
            })
            .collect())
    }

    async fn basket_page(
        &self,
        customer_id: Option<i64>,
        page: &PaginationRequest,
    ) -> RepoResult<PaginatedResponse<Basket>> {
        let filter = if customer_id.is_some() { " WHERE customer_id = ?" } else { "" };
        let count_sql = format!("SELECT COUNT(*) FROM baskets{filter}");
        let mut count = sqlx::query_as::<_, (i64,)>(&count_sql);
        if let Some(c) = customer_id {
            count = count.bind(c);
        }
        let (total,) = count.fetch_one(&self.pool).await?;

        let sql = format!(
            "SELECT {BASKET_COLUMNS} FROM baskets{filter} ORDER BY {} LIMIT ? OFFSET ?",
            order_clause(page, BASKET_SORT, "")
        );
        let mut q = sqlx::query_as::<_, BasketRow>(&sql);
        if let Some(c) = customer_id {
            q = q.bind(c);
        }
        let rows = q
            .bind(i64::from(page.page_size()))
            .bind(page.offset() as i64)
            .fetch_all(&self.pool)
            .await?;
        let items = self.assemble_baskets(rows).await?;
        Ok(PaginatedResponse::new(items, total as u64, page))
    }
}

#[async_trait]
impl BasketStore for MySqlStore {
    async fn get_basket(&self, customer_id: i64, site_id: i64) -> RepoResult<Option<Basket>> {
        let sql = format!("SELECT {BASKET_COLUMNS} FROM baskets WHERE customer_id = ? AND site_id = ?");
        let rows = sqlx::query_as::<_, BasketRow>(&sql)
            .bind(customer_id)
            .bind(site_id)
            .fetch_all(&self.pool)
            .await?;
        Ok(self.assemble_baskets(rows).await?.pop())
    }

    async fn upsert_basket(&self, basket: &Basket) -> RepoResult<Basket> {
        let mut tx = self.pool.begin().await?;
        let now = now_millis();
        sqlx::query(
            "INSERT INTO baskets (site_id, customer_id, discount_id, total_raw_price, total_coupon_discount, \
             total_discount, total_price_with_coupon_discount, created_at, updated_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?) \
             ON DUPLICATE KEY UPDATE discount_id = VALUES(discount_id), total_raw_price = VALUES(total_raw_price), \
             total_coupon_discount = VALUES(total_coupon_discount), total_discount = VALUES(total_discount), \
             total_price_with_coupon_discount = VALUES(total_price_with_coupon_discount), updated_at = VALUES(updated_at)",
        )
        .bind(basket.site_id)
        .bind(basket.customer_id)
        .bind(basket.discount_id)
        .bind(basket.total_raw_price)
        .bind(basket.total_coupon_discount)
        .bind(basket.total_discount)
        .bind(basket.total_price_with_coupon_discount)
        .bind(now)
        .bind(now)
        .execute(&mut *tx)
        .await?;

        let (basket_id,): (i64,) =
            sqlx::query_as("SELECT id FROM baskets WHERE customer_id = ? AND site_id = ? FOR UPDATE")
                .bind(basket.customer_id)
                .bind(basket.site_id)
                .fetch_one(&mut *tx)
                .await?;

        sqlx::query("DELETE FROM basket_items WHERE basket_id = ?")
            .bind(basket_id)
            .execute(&mut *tx)
            .await?;
        for item in &basket.items {
            sqlx::query(
                "INSERT INTO basket_items (id, basket_id, product_id, product_variant_id, quantity, raw_price, \
                 final_raw_price, final_price_with_coupon_discount, just_coupon_price, just_discount_price, version) \
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            )
            .bind((item.id > 0).then_some(item.id))
            .bind(basket_id)
            .bind(item.product_id)
            .bind(item.product_variant_id)
            .bind(item.quantity)
            .bind(item.raw_price)
            .bind(item.final_raw_price)
            .bind(item.final_price_with_coupon_discount)
            .bind(item.just_coupon_price)
            .bind(item.just_discount_price)
            .bind(item.version)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;

        self.get_basket(basket.customer_id, basket.site_id)
            .await?
            .ok_or(RepoError::NotFound(ErrorCode::BasketNotFound))
    }

    async fn list_customer_baskets(
        &self,
        customer_id: i64,
        page: &PaginationRequest,
    ) -> RepoResult<PaginatedResponse<Basket>> {
        self.basket_page(Some(customer_id), page).await
    }

    async fn list_baskets(&self, page: &PaginationRequest) -> RepoResult<PaginatedResponse<Basket>> {
        self.basket_page(None, page).await
    }
}

// ============================================================================
// Gateways
// ============================================================================

const GATEWAY_COLUMNS: &str = "id, site_id, user_id, accounts, created_at, updated_at";

#[async_trait]
impl GatewayStore for MySqlStore {
    async fn get_gateway(&self, id: i64) -> RepoResult<Gateway> {
        let sql = format!("SELECT {GATEWAY_COLUMNS} FROM gateways WHERE id = ?");
        sqlx::query_as::<_, GatewayRow>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or(RepoError::NotFound(ErrorCode::GatewayNotConfigured))?
            .try_into()
    }

    async fn gateway_for_site(&self, site_id: i64) -> RepoResult<Option<Gateway>> {
        let sql = format!("SELECT {GATEWAY_COLUMNS} FROM gateways WHERE site_id = ?");
        sqlx::query_as::<_, GatewayRow>(&sql)
            .bind(site_id)
            .fetch_optional(&self.pool)
            .await?
            .map(Gateway::try_from)
            .transpose()
    }

    async fn upsert_gateway(
        &self,
        site_id: i64,
        user_id: i64,
        accounts: Vec<GatewayAccount>,
    ) -> RepoResult<Gateway> {
        let mut tx = self.pool.begin().await?;
        let now = now_millis();
        let sql = format!("SELECT {GATEWAY_COLUMNS} FROM gateways WHERE site_id = ? FOR UPDATE");
        let existing = sqlx::query_as::<_, GatewayRow>(&sql)
            .bind(site_id)
            .fetch_optional(&mut *tx)
            .await?;

        match existing {
            Some(row) => {
                let mut gateway = Gateway::try_from(row)?;
                gateway.merge_accounts(accounts);
                sqlx::query("UPDATE gateways SET accounts = ?, updated_at = ? WHERE id = ?")
                    .bind(serde_json::to_string(&gateway.accounts)?)
                    .bind(now)
                    .bind(gateway.id)
                    .execute(&mut *tx)
                    .await?;
            }
            None => {
                let mut gateway = Gateway {
                    id: 0,
                    site_id,
                    user_id,
                    accounts: Vec::new(),
                    created_at: now,
                    updated_at: now,
                };
                gateway.merge_accounts(accounts);
                sqlx::query(
                    "INSERT INTO gateways (site_id, user_id, accounts, created_at, updated_at) VALUES (?, ?, ?, ?, ?)",
                )
                .bind(site_id)
                .bind(user_id)
                .bind(serde_json::to_string(&gateway.accounts)?)
                .bind(now)
                .bind(now)
                .execute(&mut *tx)
                .await?;
            }
        }
        tx.commit().await?;

        self.gateway_for_site(site_id)
            .await?
            .ok_or(RepoError::NotFound(ErrorCode::GatewayNotConfigured))
    }

    async fn list_gateways(&self, page: &PaginationRequest) -> RepoResult<PaginatedResponse<Gateway>> {
        let (total,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM gateways")
            .fetch_one(&self.pool)
            .await?;
        let sql = format!(
            "SELECT {GATEWAY_COLUMNS} FROM gateways ORDER BY {} LIMIT ? OFFSET ?",
            order_clause(page, GATEWAY_SORT, "")
        );
        let items = sqlx::query_as::<_, GatewayRow>(&sql)
            .bind(i64::from(page.page_size()))
            .bind(page.offset() as i64)
            .fetch_all(&self.pool)
            .await?
            .into_iter()
            .map(Gateway::try_from)
            .collect::<RepoResult<Vec<_>>>()?;
        Ok(PaginatedResponse::new(items, total as u64, page))
    }
}
