//! 分页查询类型
//!
//! 所有列表接口共用的分页请求与分页响应。

use serde::{Deserialize, Serialize};

use crate::error::AppError;

pub const DEFAULT_PAGE_SIZE: u32 = 20;
pub const MAX_PAGE_SIZE: u32 = 100;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    Asc,
    #[default]
    Desc,
}

impl SortOrder {
    pub fn as_sql(&self) -> &'static str {
        match self {
            SortOrder::Asc => "ASC",
            SortOrder::Desc => "DESC",
        }
    }
}

/// 分页请求 (query string)
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaginationRequest {
    /// 页码 (从 1 开始)
    #[serde(default)]
    pub page: Option<u32>,
    /// 每页数量
    #[serde(default)]
    pub page_size: Option<u32>,
    /// 名称 / 标题 / slug / code 子串匹配
    #[serde(default)]
    pub search: Option<String>,
    #[serde(default)]
    pub sort: Option<SortOrder>,
    /// 排序字段，由各实体白名单校验
    #[serde(default)]
    pub sort_by: Option<String>,
}

impl PaginationRequest {
    pub fn new(page: u32, page_size: u32) -> Self {
        Self {
            page: Some(page),
            page_size: Some(page_size),
            ..Default::default()
        }
    }

    /// 校验分页参数：page ≥ 1，page_size ∈ [1, 100]，sort_by 必须在白名单内
    pub fn check(&self, allowed_sort: &[&str]) -> Result<(), AppError> {
        if self.page == Some(0) {
            return Err(AppError::invalid_field("page", "must be at least 1"));
        }
        if let Some(size) = self.page_size
            && !(1..=MAX_PAGE_SIZE).contains(&size)
        {
            return Err(AppError::invalid_field(
                "page_size",
                format!("must be between 1 and {MAX_PAGE_SIZE}"),
            ));
        }
        if let Some(field) = self.sort_by.as_deref()
            && !allowed_sort.contains(&field)
        {
            return Err(AppError::invalid_field(
                "sort_by",
                format!("unsupported field: {field}"),
            ));
        }
        Ok(())
    }

    /// 页码，至少为 1
    pub fn page(&self) -> u32 {
        self.page.unwrap_or(1).max(1)
    }

    /// 每页数量，限制在 [1, 100]；入口处已由 `check` 拒绝越界值
    pub fn page_size(&self) -> u32 {
        self.page_size
            .unwrap_or(DEFAULT_PAGE_SIZE)
            .clamp(1, MAX_PAGE_SIZE)
    }

    pub fn offset(&self) -> u64 {
        u64::from(self.page() - 1) * u64::from(self.page_size())
    }

    pub fn sort(&self) -> SortOrder {
        self.sort.unwrap_or_default()
    }

    /// 非空的搜索词
    pub fn search(&self) -> Option<&str> {
        self.search
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
    }

    /// 白名单内的排序字段，否则回退到 `default`
    pub fn sort_by<'a>(&'a self, allowed: &[&'a str], default: &'a str) -> &'a str {
        match self.sort_by.as_deref() {
            Some(field) if allowed.contains(&field) => field,
            _ => default,
        }
    }
}

/// 分页响应
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaginatedResponse<T> {
    pub items: Vec<T>,
    pub total_count: u64,
    pub page: u32,
    pub page_size: u32,
    pub total_pages: u32,
}

impl<T> PaginatedResponse<T> {
    pub fn new(items: Vec<T>, total_count: u64, req: &PaginationRequest) -> Self {
        let page_size = req.page_size();
        let total_pages = total_count.div_ceil(u64::from(page_size)) as u32;
        Self {
            items,
            total_count,
            page: req.page(),
            page_size,
            total_pages,
        }
    }

    /// 对内存中的完整列表做分页
    pub fn from_vec(all: Vec<T>, req: &PaginationRequest) -> Self {
        let total = all.len() as u64;
        let items = all
            .into_iter()
            .skip(req.offset() as usize)
            .take(req.page_size() as usize)
            .collect();
        Self::new(items, total, req)
    }

    pub fn map<U>(self, f: impl FnMut(T) -> U) -> PaginatedResponse<U> {
        PaginatedResponse {
            items: self.items.into_iter().map(f).collect(),
            total_count: self.total_count,
            page: self.page,
            page_size: self.page_size,
            total_pages: self.total_pages,
        }
    }
}
