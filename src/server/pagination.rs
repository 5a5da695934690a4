//! Cursor pagination for list operations
//!
//! A cursor is URL-safe base64 of `{"offset":N,"pageSize":M}`. Cursors the
//! server cannot read, including stale or tampered ones, restart from the
//! first page instead of failing the request.

use serde::{Deserialize, Serialize};

use crate::protocol::Cursor;
use crate::utils::base64::{decode_token, encode_token};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CursorState {
    offset: usize,
    page_size: usize,
}

/// Default and maximum page sizes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageLimits {
    pub default_size: usize,
    pub max_size: usize,
}

impl Default for PageLimits {
    fn default() -> Self {
        Self {
            default_size: 50,
            max_size: 100,
        }
    }
}

fn encode_cursor(state: CursorState) -> Option<Cursor> {
    serde_json::to_vec(&state).ok().map(|bytes| encode_token(&bytes))
}

fn decode_cursor(cursor: &str) -> Option<CursorState> {
    let bytes = decode_token(cursor)?;
    serde_json::from_slice(&bytes).ok()
}

/// Slice one page out of `items`.
///
/// Returns the page and the cursor for the next one, which is `None` on the last page.
pub fn paginate<T: Clone>(items: &[T], cursor: Option<&str>, limits: PageLimits) -> (Vec<T>, Option<Cursor>) {
    let max_size = limits.max_size.max(1);
    let state = cursor.and_then(decode_cursor).unwrap_or(CursorState {
        offset: 0,
        page_size: limits.default_size,
    });
    let page_size = state.page_size.clamp(1, max_size);
    let start = state.offset.min(items.len());
    let end = start.saturating_add(page_size).min(items.len());

    let next = (end < items.len())
        .then(|| encode_cursor(CursorState { offset: end, page_size }))
        .flatten();
    (items[start..end].to_vec(), next)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limits(default_size: usize) -> PageLimits {
        PageLimits {
            default_size,
            max_size: 100,
        }
    }

    #[test]
    fn test_ten_items_in_pages_of_three() {
        let items: Vec<u32> = (0..10).collect();
        let mut seen = Vec::new();
        let mut cursor: Option<String> = None;
        let mut pages = 0;

        loop {
            let (page, next) = paginate(&items, cursor.as_deref(), limits(3));
            pages += 1;
            seen.extend(page);
            match next {
                Some(next) => cursor = Some(next),
                None => break,
            }
        }

        assert_eq!(pages, 4);
        assert_eq!(seen, items);
    }

    #[test]
    fn test_malformed_cursor_restarts() {
        let items: Vec<u32> = (0..5).collect();
        for bad in ["", "%%%", "bm90IGpzb24", "eyJvZmZzZXQiOi0xfQ"] {
            let (page, _) = paginate(&items, Some(bad), limits(2));
            assert_eq!(page, vec![0, 1], "cursor {:?}", bad);
        }
    }

    #[test]
    fn test_page_size_is_clamped() {
        let items: Vec<u32> = (0..300).collect();
        let (page, next) = paginate(&items, None, limits(500));
        assert_eq!(page.len(), 100);
        assert!(next.is_some());

        let huge = encode_cursor(CursorState { offset: 0, page_size: 10_000 }).unwrap();
        let (page, _) = paginate(&items, Some(&huge), limits(10));
        assert_eq!(page.len(), 100);
    }

    #[test]
    fn test_exact_fit_has_no_cursor() {
        let items: Vec<u32> = (0..6).collect();
        let (page, next) = paginate(&items, None, limits(6));
        assert_eq!(page.len(), 6);
        assert!(next.is_none());

        let past_end = encode_cursor(CursorState { offset: 50, page_size: 3 }).unwrap();
        let (page, next) = paginate(&items, Some(&past_end), limits(3));
        assert!(page.is_empty());
        assert!(next.is_none());
    }
}
