use serde::{Deserialize, Serialize};

use crate::constants::MAX_PAGE_SIZE;

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq)]
pub struct PageRequest {
    pub page: i64,
    pub limit: i64,
}

impl PageRequest {
    /// Pages are 1-based, `limit` is clamped to `1..=MAX_PAGE_SIZE`.
    pub fn new(page: Option<i64>, limit: Option<i64>, default_limit: i64) -> Self {
        Self {
            page: page.unwrap_or(1).max(1),
            limit: limit.unwrap_or(default_limit).clamp(1, MAX_PAGE_SIZE),
        }
    }

    /// Saturates instead of overflowing on absurd page numbers; such a page is just empty.
    pub fn offset(&self) -> i64 {
        (self.page - 1).saturating_mul(self.limit)
    }
}

#[derive(Serialize, Deserialize, Debug, PartialEq)]
pub struct Page<T> {
    pub count: i64,
    pub next: Option<i64>,
    pub previous: Option<i64>,
    pub results: Vec<T>,
}

impl<T> Page<T> {
    pub fn from_rows(results: Vec<T>, count: i64, request: PageRequest) -> Self {
        if results.is_empty() {
            return Self::no_rows(count, request);
        }

        let next = if request.offset().saturating_add(request.limit) < count {
            Some(request.page.saturating_add(1))
        } else {
            None
        };

        Self {
            count,
            next,
            previous: previous_page(request),
            results,
        }
    }

    /// An empty page still reports the total so clients past the end can navigate back.
    pub fn no_rows(count: i64, request: PageRequest) -> Self {
        Self {
            count,
            next: None,
            previous: previous_page(request),
            results: vec![],
        }
    }

    pub fn map<U, F>(self, f: F) -> Page<U>
    where
        F: FnMut(T) -> U,
    {
        Page {
            count: self.count,
            next: self.next,
            previous: self.previous,
            results: self.results.into_iter().map(f).collect(),
        }
    }
}

fn previous_page(request: PageRequest) -> Option<i64> {
    if request.page > 1 {
        Some(request.page - 1)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_is_clamped() {
        let request = PageRequest::new(Some(0), Some(10_000), 6);
        assert_eq!(request.page, 1);
        assert_eq!(request.limit, MAX_PAGE_SIZE);
        assert_eq!(request.offset(), 0);

        assert_eq!(PageRequest::new(Some(3), None, 6).offset(), 12);
    }

    #[test]
    fn huge_page_number_does_not_overflow() {
        let request = PageRequest::new(Some(i64::MAX), None, 6);
        assert_eq!(request.offset(), i64::MAX);

        let request = PageRequest::new(Some(i64::MAX / 2), Some(MAX_PAGE_SIZE), 6);
        assert_eq!(request.offset(), i64::MAX);

        let page: Page<i32> = Page::from_rows(vec![], 7, request);
        assert_eq!(page.count, 7);
        assert_eq!(page.next, None);
        assert_eq!(page.previous, Some(i64::MAX / 2 - 1));
    }

    #[test]
    fn middle_page_links_both_ways() {
        let page = Page::from_rows(vec![1, 2], 6, PageRequest::new(Some(2), Some(2), 6));
        assert_eq!(page.previous, Some(1));
        assert_eq!(page.next, Some(3));
        assert_eq!(page.count, 6);
    }

    #[test]
    fn last_page_has_no_next() {
        let page = Page::from_rows(vec![5, 6], 6, PageRequest::new(Some(3), Some(2), 6));
        assert_eq!(page.next, None);
        assert_eq!(page.previous, Some(2));
    }

    #[test]
    fn empty_first_page() {
        let page: Page<i32> = Page::from_rows(vec![], 0, PageRequest::new(None, None, 6));
        assert_eq!(page.next, None);
        assert_eq!(page.previous, None);
        assert!(page.results.is_empty());
    }
}
