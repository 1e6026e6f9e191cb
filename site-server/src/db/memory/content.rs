use std::collections::BTreeSet;

use async_trait::async_trait;
use shared::error::ErrorCode;
use shared::models::{
    Article, ContentInput, HeaderFooter, HeaderFooterKind, Page, PageInput, PageSummary, UsageEdge,
    UsageKind,
};
use shared::query::{PaginatedResponse, PaginationRequest};
use shared::util::now_millis;

use super::{MemoryState, MemoryStore};
use crate::db::paging::{PAGE_SORT, SortValue, matches_search, paginate};
use crate::db::{PageStore, RepoError, RepoResult};

impl MemoryState {
    fn live_page_mut(&mut self, id: i64) -> RepoResult<&mut Page> {
        self.pages
            .get_mut(&id)
            .filter(|p| !p.is_deleted)
            .ok_or(RepoError::NotFound(ErrorCode::PageNotFound))
    }

    fn page_slug_taken(&self, site_id: i64, slug: &str, except: i64) -> bool {
        self.pages
            .values()
            .any(|p| !p.is_deleted && p.site_id == site_id && p.slug == slug && p.id != except)
    }

    fn edges_mut(&mut self, kind: UsageKind) -> &mut Vec<UsageEdge> {
        self.usages.entry(kind).or_default()
    }

    fn edges(&self, kind: UsageKind) -> &[UsageEdge] {
        self.usages.get(&kind).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Header/footer ids of a page input, checked against live records of `site_id`
    fn layout_ids(&self, input: &PageInput) -> RepoResult<BTreeSet<i64>> {
        let ids: BTreeSet<i64> = [input.header_id, input.footer_id].into_iter().flatten().collect();
        for id in &ids {
            match self.entity_site(UsageKind::HeaderFooter, *id) {
                None => return Err(RepoError::NotFound(ErrorCode::HeaderFooterNotFound)),
                Some(site) if site != input.site_id => {
                    return Err(RepoError::Conflict(ErrorCode::SiteMismatch));
                }
                Some(_) => {}
            }
        }
        Ok(ids)
    }

    fn set_layout_edges(&mut self, page: &Page, ids: BTreeSet<i64>) {
        let edges = self.edges_mut(UsageKind::HeaderFooter);
        edges.retain(|e| e.page_id != page.id);
        edges.extend(ids.into_iter().map(|entity_id| UsageEdge {
            page_id: page.id,
            entity_id,
            site_id: page.site_id,
            user_id: page.user_id,
        }));
    }

    /// Site of a live entity of `kind`
    fn entity_site(&self, kind: UsageKind, id: i64) -> Option<i64> {
        match kind {
            UsageKind::Product => self
                .products
                .get(&id)
                .filter(|p| !p.is_deleted)
                .map(|p| p.site_id),
            UsageKind::Article => self
                .articles
                .get(&id)
                .filter(|a| !a.is_deleted)
                .map(|a| a.site_id),
            UsageKind::HeaderFooter => self
                .header_footers
                .get(&id)
                .filter(|h| !h.is_deleted)
                .map(|h| h.site_id),
        }
    }
}

#[async_trait]
impl PageStore for MemoryStore {
    async fn create_page(&self, user_id: i64, input: &PageInput) -> RepoResult<Page> {
        let mut state = self.state.lock();
        if state.page_slug_taken(input.site_id, &input.slug, 0) {
            return Err(RepoError::Conflict(ErrorCode::SlugAlreadyExists));
        }
        let layout = state.layout_ids(input)?;
        let now = now_millis();
        let page = Page {
            id: state.next_id(),
            site_id: input.site_id,
            user_id,
            slug: input.slug.clone(),
            title: input.title.clone(),
            header_id: input.header_id,
            footer_id: input.footer_id,
            body: input.body.clone(),
            created_at: now,
            updated_at: now,
            is_deleted: false,
            deleted_at: None,
        };
        state.pages.insert(page.id, page.clone());
        state.set_layout_edges(&page, layout);
        Ok(page)
    }

    async fn update_page(&self, id: i64, input: &PageInput) -> RepoResult<Page> {
        let mut state = self.state.lock();
        let site_id = state.live_page_mut(id)?.site_id;
        if site_id != input.site_id {
            return Err(RepoError::Conflict(ErrorCode::SiteMismatch));
        }
        if state.page_slug_taken(site_id, &input.slug, id) {
            return Err(RepoError::Conflict(ErrorCode::SlugAlreadyExists));
        }
        let layout = state.layout_ids(input)?;
        let page = state.live_page_mut(id)?;
        page.slug = input.slug.clone();
        page.title = input.title.clone();
        page.header_id = input.header_id;
        page.footer_id = input.footer_id;
        page.body = input.body.clone();
        page.updated_at = now_millis();
        let page = page.clone();
        state.set_layout_edges(&page, layout);
        Ok(page)
    }

    async fn get_page(&self, id: i64) -> RepoResult<Page> {
        let mut state = self.state.lock();
        state.live_page_mut(id).map(|p| p.clone())
    }

    async fn get_page_by_slug(&self, site_id: i64, slug: &str) -> RepoResult<Page> {
        self.state
            .lock()
            .pages
            .values()
            .find(|p| !p.is_deleted && p.site_id == site_id && p.slug == slug)
            .cloned()
            .ok_or(RepoError::NotFound(ErrorCode::PageNotFound))
    }

    async fn list_pages(
        &self,
        site_id: Option<i64>,
        page: &PaginationRequest,
    ) -> RepoResult<PaginatedResponse<Page>> {
        let state = self.state.lock();
        let items = state
            .pages
            .values()
            .filter(|p| !p.is_deleted && site_id.is_none_or(|s| p.site_id == s))
            .filter(|p| matches_search(page, &[&p.title, &p.slug]))
            .cloned()
            .collect();
        Ok(paginate(
            items,
            page,
            PAGE_SORT,
            |p, field| match field {
                "title" => SortValue::Text(p.title.clone()),
                "slug" => SortValue::Text(p.slug.clone()),
                "created_at" => SortValue::Int(p.created_at),
                "updated_at" => SortValue::Int(p.updated_at),
                _ => SortValue::Int(p.id),
            },
            |p| p.id,
        ))
    }

    async fn soft_delete_page(&self, id: i64) -> RepoResult<()> {
        let mut state = self.state.lock();
        let now = now_millis();
        let page = state.live_page_mut(id)?;
        page.is_deleted = true;
        page.deleted_at = Some(now);
        page.updated_at = now;
        for edges in state.usages.values_mut() {
            edges.retain(|e| e.page_id != id);
        }
        Ok(())
    }

    async fn create_article(&self, user_id: i64, input: &ContentInput) -> RepoResult<Article> {
        let mut state = self.state.lock();
        let article = Article {
            id: state.next_id(),
            site_id: input.site_id,
            user_id,
            title: input.title.clone(),
            created_at: now_millis(),
            is_deleted: false,
        };
        state.articles.insert(article.id, article.clone());
        Ok(article)
    }

    async fn get_article(&self, id: i64) -> RepoResult<Article> {
        self.state
            .lock()
            .articles
            .get(&id)
            .filter(|a| !a.is_deleted)
            .cloned()
            .ok_or(RepoError::NotFound(ErrorCode::ArticleNotFound))
    }

    async fn soft_delete_article(&self, id: i64) -> RepoResult<()> {
        let mut state = self.state.lock();
        let article = state
            .articles
            .get_mut(&id)
            .filter(|a| !a.is_deleted)
            .ok_or(RepoError::NotFound(ErrorCode::ArticleNotFound))?;
        article.is_deleted = true;
        Ok(())
    }

    async fn create_header_footer(
        &self,
        user_id: i64,
        input: &ContentInput,
    ) -> RepoResult<HeaderFooter> {
        let mut state = self.state.lock();
        let header_footer = HeaderFooter {
            id: state.next_id(),
            site_id: input.site_id,
            user_id,
            title: input.title.clone(),
            kind: input.kind.unwrap_or(HeaderFooterKind::Header),
            created_at: now_millis(),
            is_deleted: false,
        };
        state
            .header_footers
            .insert(header_footer.id, header_footer.clone());
        Ok(header_footer)
    }

    async fn get_header_footer(&self, id: i64) -> RepoResult<HeaderFooter> {
        self.state
            .lock()
            .header_footers
            .get(&id)
            .filter(|h| !h.is_deleted)
            .cloned()
            .ok_or(RepoError::NotFound(ErrorCode::HeaderFooterNotFound))
    }

    async fn soft_delete_header_footer(&self, id: i64) -> RepoResult<()> {
        let mut state = self.state.lock();
        let header_footer = state
            .header_footers
            .get_mut(&id)
            .filter(|h| !h.is_deleted)
            .ok_or(RepoError::NotFound(ErrorCode::HeaderFooterNotFound))?;
        header_footer.is_deleted = true;
        Ok(())
    }

    async fn entity_sites(&self, kind: UsageKind, ids: &[i64]) -> RepoResult<Vec<(i64, i64)>> {
        let state = self.state.lock();
        Ok(ids
            .iter()
            .filter_map(|&id| state.entity_site(kind, id).map(|site| (id, site)))
            .collect())
    }

    async fn replace_usages(
        &self,
        kind: UsageKind,
        page_id: i64,
        site_id: i64,
        user_id: i64,
        entity_ids: &[i64],
    ) -> RepoResult<()> {
        let mut state = self.state.lock();
        let edges = state.edges_mut(kind);
        edges.retain(|e| e.page_id != page_id);
        let unique: BTreeSet<i64> = entity_ids.iter().copied().collect();
        edges.extend(unique.into_iter().map(|entity_id| UsageEdge {
            page_id,
            entity_id,
            site_id,
            user_id,
        }));
        Ok(())
    }

    async fn usages_for_page(&self, kind: UsageKind, page_id: i64) -> RepoResult<Vec<i64>> {
        let state = self.state.lock();
        let mut ids: Vec<i64> = state
            .edges(kind)
            .iter()
            .filter(|e| e.page_id == page_id)
            .map(|e| e.entity_id)
            .collect();
        ids.sort_unstable();
        Ok(ids)
    }

    async fn pages_using(
        &self,
        kind: UsageKind,
        site_id: i64,
        entity_ids: &[i64],
    ) -> RepoResult<Vec<PageSummary>> {
        let state = self.state.lock();
        let page_ids: BTreeSet<i64> = state
            .edges(kind)
            .iter()
            .filter(|e| e.site_id == site_id && entity_ids.contains(&e.entity_id))
            .map(|e| e.page_id)
            .collect();
        Ok(page_ids
            .into_iter()
            .filter_map(|id| state.pages.get(&id))
            .filter(|p| !p.is_deleted && p.site_id == site_id)
            .map(Page::summary)
            .collect())
    }

    async fn delete_usages_for_entity(
        &self,
        kind: UsageKind,
        site_id: i64,
        entity_id: i64,
    ) -> RepoResult<u64> {
        let mut state = self.state.lock();
        let edges = state.edges_mut(kind);
        let before = edges.len();
        edges.retain(|e| !(e.site_id == site_id && e.entity_id == entity_id));
        Ok((before - edges.len()) as u64)
    }
}
