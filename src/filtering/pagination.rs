use sea_orm::DbErr;
use serde::Deserialize;

use crate::collection::Collection;

/// Pagination strategy used by a controller.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PaginationMode {
    /// Counts the collection and reports `count` and `pages`
    #[default]
    Classic,
    /// Over-fetches one row instead of counting
    Quick,
}

/// One page of a collection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Page<R> {
    pub objects: Vec<R>,
    /// 1-based page number actually served
    pub number: u64,
    pub limit: u64,
    /// Total records, absent in quick mode
    pub count: Option<u64>,
    /// Total pages, absent in quick mode
    pub pages: Option<u64>,
    pub has_next: bool,
}

impl<R> Page<R> {
    #[must_use]
    pub const fn has_previous(&self) -> bool {
        self.number > 1
    }
}

/// Clamp a requested limit into `[1, max_limit]`.
#[must_use]
pub fn clamp_limit(limit: i64, max_limit: u64) -> u64 {
    let max_limit = max_limit.max(1);
    let requested = u64::try_from(limit).ok();
    let clamped = requested.unwrap_or(1).clamp(1, max_limit);
    if requested != Some(clamped) {
        tracing::debug!(limit, effective = clamped, "limit clamped");
    }
    clamped
}

fn offset_of(number: u64, limit: u64) -> u64 {
    number.saturating_sub(1).saturating_mul(limit)
}

/// Classic paginator. Counts the collection; an out-of-range page falls back
/// to page 1.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Paginator {
    limit: u64,
}

impl Paginator {
    #[must_use]
    pub fn new(limit: i64, max_limit: u64) -> Self {
        Self {
            limit: clamp_limit(limit, max_limit),
        }
    }

    #[must_use]
    pub const fn limit(&self) -> u64 {
        self.limit
    }

    /// Number of pages for `count` records. Never less than one, so page 1
    /// always exists.
    #[must_use]
    pub const fn num_pages(&self, count: u64) -> u64 {
        let pages = count.div_ceil(self.limit);
        if pages == 0 { 1 } else { pages }
    }

    /// # Errors
    ///
    /// Propagates the collection's database error.
    pub async fn page<C: Collection>(&self, collection: &C, number: i64) -> Result<Page<C::Record>, DbErr> {
        let count = collection.count().await?;
        let pages = self.num_pages(count);

        let number = match u64::try_from(number) {
            Ok(n) if (1..=pages).contains(&n) => n,
            _ => {
                tracing::debug!(page = number, pages, "page is empty, serving page 1");
                1
            }
        };

        let objects = collection.slice(offset_of(number, self.limit), self.limit).await?;
        Ok(Page {
            objects,
            number,
            limit: self.limit,
            count: Some(count),
            pages: Some(pages),
            has_next: number < pages,
        })
    }
}

/// Count-free paginator for large collections. Fetches `limit + 1` rows and
/// reports whether the extra one existed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QuickPaginator {
    limit: u64,
}

impl QuickPaginator {
    #[must_use]
    pub fn new(limit: i64, max_limit: u64) -> Self {
        Self {
            limit: clamp_limit(limit, max_limit),
        }
    }

    #[must_use]
    pub const fn limit(&self) -> u64 {
        self.limit
    }

    /// # Errors
    ///
    /// Propagates the collection's database error.
    pub async fn page<C: Collection>(&self, collection: &C, number: i64) -> Result<Page<C::Record>, DbErr> {
        let number = u64::try_from(number).unwrap_or(1).max(1);
        let mut objects = collection
            .slice(offset_of(number, self.limit), self.limit.saturating_add(1))
            .await?;

        let limit = usize::try_from(self.limit).unwrap_or(usize::MAX);
        let has_next = objects.len() > limit;
        objects.truncate(limit);

        Ok(Page {
            objects,
            number,
            limit: self.limit,
            count: None,
            pages: None,
            has_next,
        })
    }
}
