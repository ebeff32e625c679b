use crate::pipeline::error::PipelineError;
use std::ops::Range;

pub const DEFAULT_PAGE_SIZE: usize = 30;

/// One requested page of a larger slice.
#[derive(Debug, Clone, PartialEq)]
pub struct PageSlice<'a, T> {
    /// The requested 1-based index, echoed back even when out of range.
    pub index: i64,
    pub page_size: usize,
    pub total_pages: usize,
    pub total_rows: usize,
    pub rows: &'a [T],
}

pub fn total_pages(total_rows: usize, page_size: usize) -> usize {
    total_rows.div_ceil(page_size)
}

/// Row range for a 1-based page, or `None` when the index is outside 1..=total_pages.
pub fn page_bounds(total_rows: usize, page_size: usize, index: i64) -> Option<Range<usize>> {
    if index < 1 || page_size == 0 {
        return None;
    }
    let idx = usize::try_from(index).ok()?;
    if idx > total_pages(total_rows, page_size) {
        return None;
    }
    let start = (idx - 1).checked_mul(page_size)?;
    let end = start.saturating_add(page_size).min(total_rows);
    Some(start..end)
}

/// Out-of-range indices produce an empty page rather than an error.
pub fn paginate<T>(
    rows: &[T],
    page_size: usize,
    index: i64,
) -> Result<PageSlice<'_, T>, PipelineError> {
    if page_size == 0 {
        return Err(PipelineError::InvalidPageSize(page_size));
    }

    let total_rows = rows.len();
    let slice = match page_bounds(total_rows, page_size, index) {
        Some(range) => &rows[range],
        None => &rows[..0],
    };

    Ok(PageSlice {
        index,
        page_size,
        total_pages: total_pages(total_rows, page_size),
        total_rows,
        rows: slice,
    })
}
