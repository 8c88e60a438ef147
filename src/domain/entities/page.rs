use serde::{Deserialize, Serialize};

/// One page of a listing together with the server-side total.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub total_count: u64,
}

impl<T> Page<T> {
    pub fn new(items: Vec<T>, total_count: u64) -> Self {
        Self { items, total_count }
    }

    pub fn total_pages(&self, take: u32) -> u64 {
        total_pages(self.total_count, take)
    }

    pub fn has_next(&self, page: u32, take: u32) -> bool {
        u64::from(page) < self.total_pages(take)
    }

    pub fn map<U, F: FnMut(T) -> U>(self, f: F) -> Page<U> {
        Page {
            items: self.items.into_iter().map(f).collect(),
            total_count: self.total_count,
        }
    }
}

pub fn total_pages(total_count: u64, take: u32) -> u64 {
    if take == 0 {
        return 0;
    }
    total_count.div_ceil(u64::from(take))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn total_pages_rounds_up() {
        assert_eq!(total_pages(0, 10), 0);
        assert_eq!(total_pages(10, 10), 1);
        assert_eq!(total_pages(11, 10), 2);
        assert_eq!(total_pages(5, 0), 0);
    }

    #[test]
    fn has_next_stops_on_last_page() {
        let page = Page::new(vec![1, 2, 3], 23);
        assert!(page.has_next(2, 10));
        assert!(!page.has_next(3, 10));
    }
}
