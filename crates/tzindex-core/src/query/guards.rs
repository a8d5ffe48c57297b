//! Shared guardrails for nesting depth, page sizes and cache bounds.

// Tree walk guards
pub const DEFAULT_MAX_DEPTH: usize = 512;
pub const MIN_DEPTH: usize = 8;
pub const MAX_DEPTH: usize = 4096;

// Schema cache guards
pub const DEFAULT_SCHEMA_CACHE_SIZE: usize = 1024;
pub const MAX_SCHEMA_CACHE_SIZE: usize = 65536;

// Text projection guards
pub const DEFAULT_LINE_SIZE: usize = 100;
pub const MIN_LINE_SIZE: usize = 20;
pub const MAX_LINE_SIZE: usize = 1000;

// Big map query guards
pub const DEFAULT_PAGE_SIZE: usize = 10;
pub const MAX_PAGE_SIZE: usize = 100;
pub const MAX_SEARCH_LENGTH: usize = 256;

pub fn clamp_int(value: usize, minimum: usize, maximum: usize) -> usize {
    value.max(minimum).min(maximum)
}

pub fn clamp_depth(value: usize) -> usize {
    clamp_int(value, MIN_DEPTH, MAX_DEPTH)
}

pub fn clamp_cache_size(value: usize) -> usize {
    clamp_int(value, 1, MAX_SCHEMA_CACHE_SIZE)
}

pub fn clamp_line_size(value: usize) -> usize {
    clamp_int(value, MIN_LINE_SIZE, MAX_LINE_SIZE)
}

/// Page sizes of zero fall back to the default rather than to one.
pub fn clamp_page_size(value: usize) -> usize {
    if value == 0 {
        DEFAULT_PAGE_SIZE
    } else {
        clamp_int(value, 1, MAX_PAGE_SIZE)
    }
}

pub fn truncate_search(query: &str) -> String {
    let stripped = query.trim();
    if stripped.len() <= MAX_SEARCH_LENGTH {
        return stripped.to_string();
    }
    let mut end = MAX_SEARCH_LENGTH;
    while !stripped.is_char_boundary(end) {
        end -= 1;
    }
    stripped[..end].to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clamps_depth_into_range() {
        assert_eq!(clamp_depth(0), MIN_DEPTH);
        assert_eq!(clamp_depth(100), 100);
        assert_eq!(clamp_depth(usize::MAX), MAX_DEPTH);
    }

    #[test]
    fn zero_page_size_uses_default() {
        assert_eq!(clamp_page_size(0), DEFAULT_PAGE_SIZE);
        assert_eq!(clamp_page_size(7), 7);
        assert_eq!(clamp_page_size(10_000), MAX_PAGE_SIZE);
    }

    #[test]
    fn truncate_search_respects_char_boundaries() {
        let long = "é".repeat(MAX_SEARCH_LENGTH);
        let truncated = truncate_search(&long);
        assert!(truncated.len() <= MAX_SEARCH_LENGTH);
        assert!(truncated.chars().all(|c| c == 'é'));
        assert_eq!(truncate_search("  tz1abc "), "tz1abc");
    }
}
