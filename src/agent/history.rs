//! Bounded navigation history.

use std::collections::VecDeque;
use std::sync::Arc;

use reqwest::Method;
use url::Url;

use crate::page::Page;

/// The request that produced a history entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestDescriptor {
    pub method: Method,
    /// URI as first requested, before redirects.
    pub uri: Url,
}

#[derive(Debug, Clone)]
pub struct HistoryEntry {
    pub request: RequestDescriptor,
    pub page: Arc<Page>,
}

/// Ordered pages, oldest first. Pushing past `max_size` drops the oldest.
#[derive(Debug, Clone, Default)]
pub struct History {
    entries: VecDeque<HistoryEntry>,
    max_size: Option<usize>,
}

impl History {
    /// `None` keeps every entry.
    #[must_use]
    pub fn new(max_size: Option<usize>) -> Self {
        Self {
            entries: VecDeque::new(),
            max_size,
        }
    }

    pub fn push(&mut self, request: RequestDescriptor, page: Arc<Page>) {
        self.entries.push_back(HistoryEntry { request, page });
        if let Some(max) = self.max_size {
            while self.entries.len() > max {
                self.entries.pop_front();
            }
        }
    }

    /// Removes and returns the newest entry.
    pub fn pop(&mut self) -> Option<HistoryEntry> {
        self.entries.pop_back()
    }

    /// Removes and returns the oldest entry.
    pub fn shift(&mut self) -> Option<HistoryEntry> {
        self.entries.pop_front()
    }

    #[must_use]
    pub fn last(&self) -> Option<&HistoryEntry> {
        self.entries.back()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn iter(&self) -> impl Iterator<Item = &HistoryEntry> {
        self.entries.iter()
    }

    /// Most recent page whose final URI equals `uri`, ignoring fragments.
    #[must_use]
    pub fn visited(&self, uri: &Url) -> Option<&Arc<Page>> {
        let wanted = normalize(uri);
        self.entries
            .iter()
            .rev()
            .find(|entry| normalize(entry.page.uri()) == wanted)
            .map(|entry| &entry.page)
    }

    #[must_use]
    pub fn max_size(&self) -> Option<usize> {
        self.max_size
    }

    /// Changes the bound, dropping the oldest entries if needed.
    pub fn set_max_size(&mut self, max_size: Option<usize>) {
        self.max_size = max_size;
        if let Some(max) = max_size {
            while self.entries.len() > max {
                self.entries.pop_front();
            }
        }
    }
}

fn normalize(uri: &Url) -> Url {
    let mut uri = uri.clone();
    uri.set_fragment(None);
    if uri.query() == Some("") {
        uri.set_query(None);
    }
    uri
}
