use std::collections::BTreeSet;

use async_trait::async_trait;
use shared::error::ErrorCode;
use shared::models::{
    Article, ContentInput, HeaderFooter, HeaderFooterKind, Page, PageInput, PageSummary, UsageKind,
};
use shared::query::{PaginatedResponse, PaginationRequest};
use shared::util::now_millis;
use sqlx::MySqlConnection;

use super::{MySqlStore, parse_col, placeholders};
use crate::db::paging::{PAGE_SORT, like_pattern, order_clause};
use crate::db::{PageStore, RepoError, RepoResult};

#[derive(sqlx::FromRow)]
struct PageRow {
    id: i64,
    site_id: i64,
    user_id: i64,
    slug: String,
    title: String,
    header_id: Option<i64>,
    footer_id: Option<i64>,
    body: String,
    created_at: i64,
    updated_at: i64,
    is_deleted: bool,
    deleted_at: Option<i64>,
}

const PAGE_COLUMNS: &str = "id, site_id, user_id, slug, title, header_id, footer_id, body, \
     created_at, updated_at, is_deleted, deleted_at";

impl TryFrom<PageRow> for Page {
    type Error = RepoError;

    fn try_from(r: PageRow) -> RepoResult<Self> {
        Ok(Page {
            id: r.id,
            site_id: r.site_id,
            user_id: r.user_id,
            slug: r.slug,
            title: r.title,
            header_id: r.header_id,
            footer_id: r.footer_id,
            body: serde_json::from_str(&r.body)?,
            created_at: r.created_at,
            updated_at: r.updated_at,
            is_deleted: r.is_deleted,
            deleted_at: r.deleted_at,
        })
    }
}

#[derive(sqlx::FromRow)]
struct HeaderFooterRow {
    id: i64,
    site_id: i64,
    user_id: i64,
    title: String,
    kind: String,
    created_at: i64,
    is_deleted: bool,
}

/// Edge table per usage kind
fn usage_table(kind: UsageKind) -> &'static str {
    match kind {
        UsageKind::Product => "page_product_usages",
        UsageKind::Article => "page_article_usages",
        UsageKind::HeaderFooter => "page_header_footer_usages",
    }
}

/// Entity table per usage kind
fn entity_table(kind: UsageKind) -> &'static str {
    match kind {
        UsageKind::Product => "products",
        UsageKind::Article => "articles",
        UsageKind::HeaderFooter => "header_footers",
    }
}

async fn page_slug_taken(
    conn: &mut MySqlConnection,
    site_id: i64,
    slug: &str,
    except: i64,
) -> RepoResult<bool> {
    let row: Option<(i64,)> = sqlx::query_as(
        "SELECT id FROM pages WHERE site_id = ? AND slug = ? AND is_deleted = FALSE AND id <> ? LIMIT 1",
    )
    .bind(site_id)
    .bind(slug)
    .bind(except)
    .fetch_optional(&mut *conn)
    .await?;
    Ok(row.is_some())
}

/// Replace the page's header/footer edges inside the page write
///
/// The referenced rows are share-locked so a concurrent delete cannot slip
/// between the check and the insert.
async fn write_layout_edges(
    conn: &mut MySqlConnection,
    page_id: i64,
    site_id: i64,
    user_id: i64,
    input: &PageInput,
) -> RepoResult<()> {
    let ids: BTreeSet<i64> = [input.header_id, input.footer_id].into_iter().flatten().collect();
    if !ids.is_empty() {
        let sql = format!(
            "SELECT id, site_id FROM header_footers WHERE id IN ({}) AND is_deleted = FALSE LOCK IN SHARE MODE",
            placeholders(ids.len())
        );
        let mut q = sqlx::query_as::<_, (i64, i64)>(&sql);
        for id in &ids {
            q = q.bind(id);
        }
        let found = q.fetch_all(&mut *conn).await?;
        if found.len() != ids.len() {
            return Err(RepoError::NotFound(ErrorCode::HeaderFooterNotFound));
        }
        if found.iter().any(|(_, site)| *site != site_id) {
            return Err(RepoError::Conflict(ErrorCode::SiteMismatch));
        }
    }

    sqlx::query("DELETE FROM page_header_footer_usages WHERE page_id = ?")
        .bind(page_id)
        .execute(&mut *conn)
        .await?;
    for entity_id in ids {
        sqlx::query(
            "INSERT INTO page_header_footer_usages (page_id, entity_id, site_id, user_id) VALUES (?, ?, ?, ?)",
        )
        .bind(page_id)
        .bind(entity_id)
        .bind(site_id)
        .bind(user_id)
        .execute(&mut *conn)
        .await?;
    }
    Ok(())
}

#[async_trait]
impl PageStore for MySqlStore {
    async fn create_page(&self, user_id: i64, input: &PageInput) -> RepoResult<Page> {
        let mut tx = self.pool.begin().await?;
        if page_slug_taken(&mut *tx, input.site_id, &input.slug, 0).await? {
            return Err(RepoError::Conflict(ErrorCode::SlugAlreadyExists));
        }
        let now = now_millis();
        let result = sqlx::query(
            "INSERT INTO pages (site_id, user_id, slug, title, header_id, footer_id, body, created_at, updated_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(input.site_id)
        .bind(user_id)
        .bind(&input.slug)
        .bind(&input.title)
        .bind(input.header_id)
        .bind(input.footer_id)
        .bind(serde_json::to_string(&input.body)?)
        .bind(now)
        .bind(now)
        .execute(&mut *tx)
        .await?;
        let id = result.last_insert_id() as i64;
        write_layout_edges(&mut *tx, id, input.site_id, user_id, input).await?;
        tx.commit().await?;
        self.get_page(id).await
    }

    async fn update_page(&self, id: i64, input: &PageInput) -> RepoResult<Page> {
        let mut tx = self.pool.begin().await?;
        let (site_id, owner_id): (i64, i64) =
            sqlx::query_as("SELECT site_id, user_id FROM pages WHERE id = ? AND is_deleted = FALSE FOR UPDATE")
                .bind(id)
                .fetch_optional(&mut *tx)
                .await?
                .ok_or(RepoError::NotFound(ErrorCode::PageNotFound))?;
        if site_id != input.site_id {
            return Err(RepoError::Conflict(ErrorCode::SiteMismatch));
        }
        if page_slug_taken(&mut *tx, site_id, &input.slug, id).await? {
            return Err(RepoError::Conflict(ErrorCode::SlugAlreadyExists));
        }
        sqlx::query(
            "UPDATE pages SET slug = ?, title = ?, header_id = ?, footer_id = ?, body = ?, updated_at = ? WHERE id = ?",
        )
        .bind(&input.slug)
        .bind(&input.title)
        .bind(input.header_id)
        .bind(input.footer_id)
        .bind(serde_json::to_string(&input.body)?)
        .bind(now_millis())
        .bind(id)
        .execute(&mut *tx)
        .await?;
        write_layout_edges(&mut *tx, id, site_id, owner_id, input).await?;
        tx.commit().await?;
        self.get_page(id).await
    }

    async fn get_page(&self, id: i64) -> RepoResult<Page> {
        let sql = format!("SELECT {PAGE_COLUMNS} FROM pages WHERE id = ? AND is_deleted = FALSE");
        sqlx::query_as::<_, PageRow>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or(RepoError::NotFound(ErrorCode::PageNotFound))?
            .try_into()
    }

    async fn get_page_by_slug(&self, site_id: i64, slug: &str) -> RepoResult<Page> {
        let sql = format!(
            "SELECT {PAGE_COLUMNS} FROM pages WHERE site_id = ? AND slug = ? AND is_deleted = FALSE LIMIT 1"
        );
        sqlx::query_as::<_, PageRow>(&sql)
            .bind(site_id)
            .bind(slug)
            .fetch_optional(&self.pool)
            .await?
            .ok_or(RepoError::NotFound(ErrorCode::PageNotFound))?
            .try_into()
    }

    async fn list_pages(
        &self,
        site_id: Option<i64>,
        page: &PaginationRequest,
    ) -> RepoResult<PaginatedResponse<Page>> {
        let pattern = page.search().map(like_pattern);
        let site = if site_id.is_some() { " AND site_id = ?" } else { "" };
        let search = if pattern.is_some() {
            " AND (title LIKE ? OR slug LIKE ?)"
        } else {
            ""
        };

        let count_sql =
            format!("SELECT COUNT(*) FROM pages WHERE is_deleted = FALSE{site}{search}");
        let mut count = sqlx::query_as::<_, (i64,)>(&count_sql);
        if let Some(s) = site_id {
            count = count.bind(s);
        }
        if let Some(p) = &pattern {
            count = count.bind(p).bind(p);
        }
        let (total,) = count.fetch_one(&self.pool).await?;

        let sql = format!(
            "SELECT {PAGE_COLUMNS} FROM pages WHERE is_deleted = FALSE{site}{search} \
             ORDER BY {} LIMIT ? OFFSET ?",
            order_clause(page, PAGE_SORT, "")
        );
        let mut q = sqlx::query_as::<_, PageRow>(&sql);
        if let Some(s) = site_id {
            q = q.bind(s);
        }
        if let Some(p) = &pattern {
            q = q.bind(p).bind(p);
        }
        let items = q
            .bind(i64::from(page.page_size()))
            .bind(page.offset() as i64)
            .fetch_all(&self.pool)
            .await?
            .into_iter()
            .map(Page::try_from)
            .collect::<RepoResult<Vec<_>>>()?;
        Ok(PaginatedResponse::new(items, total as u64, page))
    }

    async fn soft_delete_page(&self, id: i64) -> RepoResult<()> {
        let mut tx = self.pool.begin().await?;
        let now = now_millis();
        let result = sqlx::query(
            "UPDATE pages SET is_deleted = TRUE, deleted_at = ?, updated_at = ? WHERE id = ? AND is_deleted = FALSE",
        )
        .bind(now)
        .bind(now)
        .bind(id)
        .execute(&mut *tx)
        .await?;
        if result.rows_affected() == 0 {
            return Err(RepoError::NotFound(ErrorCode::PageNotFound));
        }
        for kind in [UsageKind::Product, UsageKind::Article, UsageKind::HeaderFooter] {
            sqlx::query(&format!("DELETE FROM {} WHERE page_id = ?", usage_table(kind)))
                .bind(id)
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn create_article(&self, user_id: i64, input: &ContentInput) -> RepoResult<Article> {
        let now = now_millis();
        let result = sqlx::query(
            "INSERT INTO articles (site_id, user_id, title, created_at) VALUES (?, ?, ?, ?)",
        )
        .bind(input.site_id)
        .bind(user_id)
        .bind(&input.title)
        .bind(now)
        .execute(&self.pool)
        .await?;
        Ok(Article {
            id: result.last_insert_id() as i64,
            site_id: input.site_id,
            user_id,
            title: input.title.clone(),
            created_at: now,
            is_deleted: false,
        })
    }

    async fn get_article(&self, id: i64) -> RepoResult<Article> {
        let row: Option<(i64, i64, i64, String, i64)> = sqlx::query_as(
            "SELECT id, site_id, user_id, title, created_at FROM articles WHERE id = ? AND is_deleted = FALSE",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        let (id, site_id, user_id, title, created_at) =
            row.ok_or(RepoError::NotFound(ErrorCode::ArticleNotFound))?;
        Ok(Article {
            id,
            site_id,
            user_id,
            title,
            created_at,
            is_deleted: false,
        })
    }

    async fn soft_delete_article(&self, id: i64) -> RepoResult<()> {
        let result =
            sqlx::query("UPDATE articles SET is_deleted = TRUE WHERE id = ? AND is_deleted = FALSE")
                .bind(id)
                .execute(&self.pool)
                .await?;
        if result.rows_affected() == 0 {
            return Err(RepoError::NotFound(ErrorCode::ArticleNotFound));
        }
        Ok(())
    }

    async fn create_header_footer(
        &self,
        user_id: i64,
        input: &ContentInput,
    ) -> RepoResult<HeaderFooter> {
        let now = now_millis();
        let kind = input.kind.unwrap_or(HeaderFooterKind::Header);
        let result = sqlx::query(
            "INSERT INTO header_footers (site_id, user_id, title, kind, created_at) VALUES (?, ?, ?, ?, ?)",
        )
        .bind(input.site_id)
        .bind(user_id)
        .bind(&input.title)
        .bind(kind.as_str())
        .bind(now)
        .execute(&self.pool)
        .await?;
        Ok(HeaderFooter {
            id: result.last_insert_id() as i64,
            site_id: input.site_id,
            user_id,
            title: input.title.clone(),
            kind,
            created_at: now,
            is_deleted: false,
        })
    }

    async fn get_header_footer(&self, id: i64) -> RepoResult<HeaderFooter> {
        let r = sqlx::query_as::<_, HeaderFooterRow>(
            "SELECT id, site_id, user_id, title, kind, created_at, is_deleted FROM header_footers \
             WHERE id = ? AND is_deleted = FALSE",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or(RepoError::NotFound(ErrorCode::HeaderFooterNotFound))?;
        Ok(HeaderFooter {
            id: r.id,
            site_id: r.site_id,
            user_id: r.user_id,
            title: r.title,
            kind: parse_col(&r.kind, "kind")?,
            created_at: r.created_at,
            is_deleted: r.is_deleted,
        })
    }

    async fn soft_delete_header_footer(&self, id: i64) -> RepoResult<()> {
        let result = sqlx::query(
            "UPDATE header_footers SET is_deleted = TRUE WHERE id = ? AND is_deleted = FALSE",
        )
        .bind(id)
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(RepoError::NotFound(ErrorCode::HeaderFooterNotFound));
        }
        Ok(())
    }

    async fn entity_sites(&self, kind: UsageKind, ids: &[i64]) -> RepoResult<Vec<(i64, i64)>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let sql = format!(
            "SELECT id, site_id FROM {} WHERE id IN ({}) AND is_deleted = FALSE",
            entity_table(kind),
            placeholders(ids.len())
        );
        let mut q = sqlx::query_as::<_, (i64, i64)>(&sql);
        for id in ids {
            q = q.bind(id);
        }
        Ok(q.fetch_all(&self.pool).await?)
    }

    async fn replace_usages(
        &self,
        kind: UsageKind,
        page_id: i64,
        site_id: i64,
        user_id: i64,
        entity_ids: &[i64],
    ) -> RepoResult<()> {
        let table = usage_table(kind);
        let mut tx = self.pool.begin().await?;
        sqlx::query(&format!("DELETE FROM {table} WHERE page_id = ?"))
            .bind(page_id)
            .execute(&mut *tx)
            .await?;
        let unique: BTreeSet<i64> = entity_ids.iter().copied().collect();
        let insert = format!("INSERT INTO {table} (page_id, entity_id, site_id, user_id) VALUES (?, ?, ?, ?)");
        for entity_id in unique {
            sqlx::query(&insert)
                .bind(page_id)
                .bind(entity_id)
                .bind(site_id)
                .bind(user_id)
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn usages_for_page(&self, kind: UsageKind, page_id: i64) -> RepoResult<Vec<i64>> {
        let sql = format!(
            "SELECT entity_id FROM {} WHERE page_id = ? ORDER BY entity_id",
            usage_table(kind)
        );
        let rows: Vec<(i64,)> = sqlx::query_as(&sql)
            .bind(page_id)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.into_iter().map(|(id,)| id).collect())
    }

    async fn pages_using(
        &self,
        kind: UsageKind,
        site_id: i64,
        entity_ids: &[i64],
    ) -> RepoResult<Vec<PageSummary>> {
        if entity_ids.is_empty() {
            return Ok(Vec::new());
        }
        let sql = format!(
            "SELECT DISTINCT p.id, p.title, p.slug, p.site_id FROM pages p \
             JOIN {} u ON u.page_id = p.id \
             WHERE u.site_id = ? AND p.site_id = ? AND p.is_deleted = FALSE AND u.entity_id IN ({}) \
             ORDER BY p.id",
            usage_table(kind),
            placeholders(entity_ids.len())
        );
        let mut q = sqlx::query_as::<_, (i64, String, String, i64)>(&sql)
            .bind(site_id)
            .bind(site_id);
        for id in entity_ids {
            q = q.bind(id);
        }
        Ok(q
            .fetch_all(&self.pool)
            .await?
            .into_iter()
            .map(|(id, title, slug, site_id)| PageSummary {
                id,
                title,
                slug,
                site_id,
            })
            .collect())
    }

    async fn delete_usages_for_entity(
        &self,
        kind: UsageKind,
        site_id: i64,
        entity_id: i64,
    ) -> RepoResult<u64> {
        let sql = format!(
            "DELETE FROM {} WHERE site_id = ? AND entity_id = ?",
            usage_table(kind)
        );
        let result = sqlx::query(&sql)
            .bind(site_id)
            .bind(entity_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}
