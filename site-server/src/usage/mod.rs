//! Page usage graph
//!
//! Owns the three edge tables (page ↔ product / article / header_footer).
//! Callers never write edges directly: usage syncs go through [`UsageGraph::sync`],
//! entity deletes through [`UsageGraph::on_entity_deleted`]. Header/footer edges
//! are written by the page store together with the page itself.
//!
//! Every edge stays inside one site. The page, every entity and the edge row
//! must agree on `site_id`, checked before anything is written.

mod error;

pub use error::UsageError;

use std::collections::BTreeSet;
use std::sync::Arc;

use serde::Deserialize;
use shared::models::{Page, PageSummary, UsageKind};
use validator::Validate;

use crate::db::PageStore;

/// Replace the edges of one `(page, kind)`
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct UsageSync {
    pub page_id: i64,
    pub site_id: i64,
    #[serde(rename = "type")]
    pub kind: UsageKind,
    #[validate(length(max = 500))]
    pub entity_ids: Vec<i64>,
}

/// Who is editing; admins may edit any page
#[derive(Debug, Clone, Copy)]
pub struct Editor {
    pub user_id: i64,
    pub is_admin: bool,
}

#[derive(Clone)]
pub struct UsageGraph {
    pages: Arc<dyn PageStore>,
}

impl UsageGraph {
    pub fn new(pages: Arc<dyn PageStore>) -> Self {
        Self { pages }
    }

    /// Make the edge set of `(page, kind)` exactly `entity_ids`
    ///
    /// Idempotent. Duplicated ids collapse to one edge.
    pub async fn sync(&self, editor: Editor, req: &UsageSync) -> Result<(), UsageError> {
        req.validate()?;
        let page = self.pages.get_page(req.page_id).await?;
        if page.site_id != req.site_id {
            return Err(UsageError::SiteMismatch {
                page_id: page.id,
                site_id: req.site_id,
            });
        }
        if !editor.is_admin && page.user_id != editor.user_id {
            return Err(UsageError::NotPageOwner(page.id));
        }
        self.replace(&page, req.kind, &req.entity_ids).await
    }

    /// Reject a header/footer pair that is unknown or lives on another site
    ///
    /// Lets callers fail before the page itself is written.
    pub async fn check_layout(
        &self,
        page_id: i64,
        site_id: i64,
        header_id: Option<i64>,
        footer_id: Option<i64>,
    ) -> Result<(), UsageError> {
        let ids: Vec<i64> = [header_id, footer_id].into_iter().flatten().collect();
        self.check_entities(UsageKind::HeaderFooter, page_id, site_id, &ids)
            .await
    }

    async fn check_entities(
        &self,
        kind: UsageKind,
        page_id: i64,
        site_id: i64,
        ids: &[i64],
    ) -> Result<(), UsageError> {
        if ids.is_empty() {
            return Ok(());
        }
        let found = self.pages.entity_sites(kind, ids).await?;
        let missing: Vec<i64> = ids
            .iter()
            .copied()
            .filter(|id| !found.iter().any(|(found_id, _)| found_id == id))
            .collect();
        if !missing.is_empty() {
            return Err(UsageError::UnknownEntities { kind, ids: missing });
        }
        let foreign: Vec<i64> = found
            .iter()
            .filter(|(_, site)| *site != site_id)
            .map(|(id, _)| *id)
            .collect();
        if !foreign.is_empty() {
            tracing::warn!(
                page_id,
                site_id,
                kind = kind.as_str(),
                entity_ids = ?foreign,
                "Cross-site usage rejected"
            );
            return Err(UsageError::SiteMismatch { page_id, site_id });
        }
        Ok(())
    }

    async fn replace(&self, page: &Page, kind: UsageKind, entity_ids: &[i64]) -> Result<(), UsageError> {
        let wanted: BTreeSet<i64> = entity_ids.iter().copied().collect();
        let ids: Vec<i64> = wanted.iter().copied().collect();
        self.check_entities(kind, page.id, page.site_id, &ids).await?;

        // 边的 user_id 跟随页面所有者，管理员代改也一样
        self.pages
            .replace_usages(kind, page.id, page.site_id, page.user_id, &ids)
            .await?;
        tracing::info!(
            page_id = page.id,
            site_id = page.site_id,
            kind = kind.as_str(),
            count = ids.len(),
            "Page usages synced"
        );
        Ok(())
    }

    /// Pages of `site_id` that use any of `entity_ids`
    pub async fn find_pages_using(
        &self,
        kind: UsageKind,
        site_id: i64,
        entity_ids: &[i64],
    ) -> Result<Vec<PageSummary>, UsageError> {
        if entity_ids.is_empty() {
            return Ok(Vec::new());
        }
        Ok(self.pages.pages_using(kind, site_id, entity_ids).await?)
    }

    pub async fn usages_for_page(&self, kind: UsageKind, page_id: i64) -> Result<Vec<i64>, UsageError> {
        Ok(self.pages.usages_for_page(kind, page_id).await?)
    }

    /// Drop every edge pointing at a deleted entity
    pub async fn on_entity_deleted(
        &self,
        kind: UsageKind,
        site_id: i64,
        entity_id: i64,
    ) -> Result<u64, UsageError> {
        let removed = self
            .pages
            .delete_usages_for_entity(kind, site_id, entity_id)
            .await?;
        if removed > 0 {
            tracing::info!(
                kind = kind.as_str(),
                site_id,
                entity_id,
                removed,
                "Usage edges removed for deleted entity"
            );
        }
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{CatalogStore, MemoryStore, RepoError};
    use shared::error::ErrorCode;
    use shared::models::{ContentInput, PageInput, ProductInput};

    const OWNER: Editor = Editor {
        user_id: 1,
        is_admin: false,
    };

    struct Fixture {
        store: Arc<MemoryStore>,
        graph: UsageGraph,
    }

    fn fixture() -> Fixture {
        let store = Arc::new(MemoryStore::new());
        let graph = UsageGraph::new(store.clone());
        Fixture { store, graph }
    }

    async fn page(f: &Fixture, site_id: i64, slug: &str) -> Page {
        let input: PageInput = serde_json::from_value(serde_json::json!({
            "site_id": site_id, "slug": slug, "title": slug, "body": {}
        }))
        .unwrap();
        f.store.create_page(OWNER.user_id, &input).await.unwrap()
    }

    async fn product(f: &Fixture, site_id: i64, slug: &str) -> i64 {
        let input: ProductInput = serde_json::from_value(serde_json::json!({
            "site_id": site_id, "slug": slug, "name": slug,
            "variants": [{"name": "default", "price": 100, "stock": 1}]
        }))
        .unwrap();
        f.store.create_product(OWNER.user_id, &input).await.unwrap().id
    }

    fn sync_req(page: &Page, kind: UsageKind, ids: &[i64]) -> UsageSync {
        UsageSync {
            page_id: page.id,
            site_id: page.site_id,
            kind,
            entity_ids: ids.to_vec(),
        }
    }

    fn page_ids(pages: &[PageSummary]) -> Vec<i64> {
        pages.iter().map(|p| p.id).collect()
    }

    #[tokio::test]
    async fn sync_replaces_the_edge_set() {
        let f = fixture();
        let home = page(&f, 1, "home").await;
        let mut p = Vec::new();
        for slug in ["a", "b", "c", "d"] {
            p.push(product(&f, 1, slug).await);
        }

        f.graph
            .sync(OWNER, &sync_req(&home, UsageKind::Product, &[p[0], p[1], p[2]]))
            .await
            .unwrap();
        f.graph
            .sync(OWNER, &sync_req(&home, UsageKind::Product, &[p[1], p[3]]))
            .await
            .unwrap();

        let mut expected = vec![p[1], p[3]];
        expected.sort_unstable();
        assert_eq!(
            f.graph.usages_for_page(UsageKind::Product, home.id).await.unwrap(),
            expected
        );
        let using_a = f.graph.find_pages_using(UsageKind::Product, 1, &[p[0]]).await.unwrap();
        assert!(using_a.is_empty());
        let using_d = f.graph.find_pages_using(UsageKind::Product, 1, &[p[3]]).await.unwrap();
        assert_eq!(page_ids(&using_d), vec![home.id]);
    }

    #[tokio::test]
    async fn sync_is_idempotent_and_dedups() {
        let f = fixture();
        let home = page(&f, 1, "home").await;
        let a = product(&f, 1, "a").await;
        let req = sync_req(&home, UsageKind::Product, &[a, a, a]);
        f.graph.sync(OWNER, &req).await.unwrap();
        f.graph.sync(OWNER, &req).await.unwrap();
        assert_eq!(
            f.graph.usages_for_page(UsageKind::Product, home.id).await.unwrap(),
            vec![a]
        );
    }

    #[tokio::test]
    async fn cross_site_entity_is_rejected_without_writing() {
        let f = fixture();
        let home = page(&f, 1, "home").await;
        let local = product(&f, 1, "local").await;
        let foreign = product(&f, 2, "foreign").await;
        f.graph
            .sync(OWNER, &sync_req(&home, UsageKind::Product, &[local]))
            .await
            .unwrap();

        let err = f
            .graph
            .sync(OWNER, &sync_req(&home, UsageKind::Product, &[local, foreign]))
            .await
            .unwrap_err();
        assert!(matches!(err, UsageError::SiteMismatch { .. }));
        assert_eq!(
            f.graph.usages_for_page(UsageKind::Product, home.id).await.unwrap(),
            vec![local]
        );
    }

    #[tokio::test]
    async fn page_of_another_site_is_rejected() {
        let f = fixture();
        let home = page(&f, 1, "home").await;
        let mut req = sync_req(&home, UsageKind::Product, &[]);
        req.site_id = 2;
        let err = f.graph.sync(OWNER, &req).await.unwrap_err();
        assert!(matches!(err, UsageError::SiteMismatch { .. }));
    }

    #[tokio::test]
    async fn only_owner_or_admin_may_sync() {
        let f = fixture();
        let home = page(&f, 1, "home").await;
        let a = product(&f, 1, "a").await;
        let req = sync_req(&home, UsageKind::Product, &[a]);

        let stranger = Editor {
            user_id: 99,
            is_admin: false,
        };
        let err = f.graph.sync(stranger, &req).await.unwrap_err();
        assert!(matches!(err, UsageError::NotPageOwner(_)));

        let admin = Editor {
            user_id: 99,
            is_admin: true,
        };
        f.graph.sync(admin, &req).await.unwrap();
    }

    #[tokio::test]
    async fn unknown_entities_are_reported() {
        let f = fixture();
        let home = page(&f, 1, "home").await;
        let err = f
            .graph
            .sync(OWNER, &sync_req(&home, UsageKind::Article, &[404]))
            .await
            .unwrap_err();
        match err {
            UsageError::UnknownEntities { kind, ids } => {
                assert_eq!(kind, UsageKind::Article);
                assert_eq!(ids, vec![404]);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn reverse_lookup_stays_inside_the_site() {
        let f = fixture();
        let a = product(&f, 1, "a").await;
        let home = page(&f, 1, "home").await;
        page(&f, 2, "home").await;
        f.graph
            .sync(OWNER, &sync_req(&home, UsageKind::Product, &[a]))
            .await
            .unwrap();

        assert_eq!(
            page_ids(&f.graph.find_pages_using(UsageKind::Product, 1, &[a]).await.unwrap()),
            vec![home.id]
        );
        assert!(f.graph.find_pages_using(UsageKind::Product, 2, &[a]).await.unwrap().is_empty());
        assert!(f.graph.find_pages_using(UsageKind::Product, 1, &[]).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn deleted_entity_loses_its_edges() {
        let f = fixture();
        let input = ContentInput {
            site_id: 1,
            title: "news".into(),
            kind: None,
        };
        let article = f.store.create_article(OWNER.user_id, &input).await.unwrap();
        let home = page(&f, 1, "home").await;
        let about = page(&f, 1, "about").await;
        for p in [&home, &about] {
            f.graph
                .sync(OWNER, &sync_req(p, UsageKind::Article, &[article.id]))
                .await
                .unwrap();
        }

        f.store.soft_delete_article(article.id).await.unwrap();
        let removed = f
            .graph
            .on_entity_deleted(UsageKind::Article, 1, article.id)
            .await
            .unwrap();
        assert_eq!(removed, 2);
        assert!(
            f.graph
                .find_pages_using(UsageKind::Article, 1, &[article.id])
                .await
                .unwrap()
                .is_empty()
        );
    }

    #[tokio::test]
    async fn layout_edges_follow_header_and_footer() {
        let f = fixture();
        let header = f
            .store
            .create_header_footer(
                OWNER.user_id,
                &ContentInput {
                    site_id: 1,
                    title: "top".into(),
                    kind: Some(shared::models::HeaderFooterKind::Header),
                },
            )
            .await
            .unwrap();
        let home = page(&f, 1, "home").await;
        let mut input: PageInput = serde_json::from_value(serde_json::json!({
            "site_id": 1, "slug": "home", "title": "home", "body": {}, "header_id": header.id
        }))
        .unwrap();
        f.store.update_page(home.id, &input).await.unwrap();
        assert_eq!(
            f.graph.usages_for_page(UsageKind::HeaderFooter, home.id).await.unwrap(),
            vec![header.id]
        );

        input.header_id = None;
        f.store.update_page(home.id, &input).await.unwrap();
        assert!(
            f.graph
                .usages_for_page(UsageKind::HeaderFooter, home.id)
                .await
                .unwrap()
                .is_empty()
        );
    }

    #[tokio::test]
    async fn layout_check_runs_before_any_write() {
        let f = fixture();
        let foreign = f
            .store
            .create_header_footer(
                OWNER.user_id,
                &ContentInput {
                    site_id: 2,
                    title: "other".into(),
                    kind: Some(shared::models::HeaderFooterKind::Footer),
                },
            )
            .await
            .unwrap();

        f.graph.check_layout(0, 1, None, None).await.unwrap();
        assert!(matches!(
            f.graph.check_layout(0, 1, None, Some(foreign.id)).await,
            Err(UsageError::SiteMismatch { site_id: 1, .. })
        ));
        assert!(matches!(
            f.graph.check_layout(0, 1, Some(999), None).await,
            Err(UsageError::UnknownEntities { kind: UsageKind::HeaderFooter, .. })
        ));
        f.graph.check_layout(0, 2, None, Some(foreign.id)).await.unwrap();
    }

    #[tokio::test]
    async fn page_write_fails_whole_when_header_vanished() {
        let f = fixture();
        let header = f
            .store
            .create_header_footer(
                OWNER.user_id,
                &ContentInput {
                    site_id: 1,
                    title: "top".into(),
                    kind: Some(shared::models::HeaderFooterKind::Header),
                },
            )
            .await
            .unwrap();
        // deleted after the layout check passed
        f.graph.check_layout(0, 1, Some(header.id), None).await.unwrap();
        f.store.soft_delete_header_footer(header.id).await.unwrap();

        let input: PageInput = serde_json::from_value(serde_json::json!({
            "site_id": 1, "slug": "landing", "title": "landing", "body": {}, "header_id": header.id
        }))
        .unwrap();
        let err = f.store.create_page(OWNER.user_id, &input).await.unwrap_err();
        assert!(matches!(err, RepoError::NotFound(ErrorCode::HeaderFooterNotFound)));
        assert!(f.store.get_page_by_slug(1, "landing").await.is_err());
    }
}
