use serde::{Deserialize, Serialize};

/// Largest page a listing will return
pub const MAX_PER_PAGE: usize = 100;

/// One-based page request. Out-of-range values are clamped, never rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Page {
    page: usize,
    per_page: usize,
}

impl Page {
    pub fn new(page: usize, per_page: usize) -> Self {
        Self {
            page: page.max(1),
            per_page: per_page.clamp(1, MAX_PER_PAGE),
        }
    }

    /// First page of `per_page` items
    pub fn first(per_page: usize) -> Self {
        Self::new(1, per_page)
    }

    pub fn page(&self) -> usize {
        self.page
    }

    pub fn per_page(&self) -> usize {
        self.per_page
    }

    /// Cut this page out of an already ordered listing.
    pub fn slice<T>(&self, items: Vec<T>) -> Paginated<T> {
        let total = items.len();
        let offset = (self.page - 1).saturating_mul(self.per_page);
        Paginated {
            items: items.into_iter().skip(offset).take(self.per_page).collect(),
            total,
            page: self.page,
            per_page: self.per_page,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Paginated<T> {
    pub items: Vec<T>,
    /// Matching records across all pages
    pub total: usize,
    pub page: usize,
    pub per_page: usize,
}

impl<T> Paginated<T> {
    pub fn last_page(&self) -> usize {
        self.total.div_ceil(self.per_page).max(1)
    }
}
