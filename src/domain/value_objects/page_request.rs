use serde::{Deserialize, Serialize};

/// One-based page of a collection listing (`?Page={page}&Take={take}`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageRequest {
    pub page: u32,
    pub take: u32,
}

impl PageRequest {
    pub fn new(page: u32, take: u32) -> Result<Self, String> {
        if page == 0 {
            return Err("Page numbers start at 1".to_string());
        }
        if take == 0 {
            return Err("Take must be greater than 0".to_string());
        }
        Ok(Self { page, take })
    }

    pub fn first(take: u32) -> Result<Self, String> {
        Self::new(1, take)
    }

    pub fn next(&self) -> Self {
        Self {
            page: self.page.saturating_add(1),
            take: self.take,
        }
    }

    pub fn query_pairs(&self) -> [(&'static str, String); 2] {
        [("Page", self.page.to_string()), ("Take", self.take.to_string())]
    }
}
