//! Patch block detection and removal by delimiter scanning.
//!
//! The engine never parses the files it patches. A block is whatever lies
//! between a start marker and the first end marker after it, markers
//! included. Blocks are matched leftmost-first and never nest.

use std::ops::Range;

/// Extension id used when the configuration does not name one.
pub const DEFAULT_EXTENSION_ID: &str = "backgroundCover";

/// Start/end delimiter pair unique to one installing extension.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Markers {
    extension_id: String,
    start: String,
    end: String,
}

impl Default for Markers {
    fn default() -> Self {
        Self::new(DEFAULT_EXTENSION_ID)
    }
}

impl Markers {
    pub fn new(extension_id: impl Into<String>) -> Self {
        let extension_id = extension_id.into();
        Self {
            start: format!("/*ext-{extension_id}-start*/"),
            end: format!("/*ext-{extension_id}-end*/"),
            extension_id,
        }
    }

    pub fn extension_id(&self) -> &str {
        &self.extension_id
    }

    pub fn start(&self) -> &str {
        &self.start
    }

    pub fn end(&self) -> &str {
        &self.end
    }

    /// Byte ranges of every complete block, in file order.
    pub fn block_ranges(&self, content: &str) -> Vec<Range<usize>> {
        let mut ranges = Vec::new();
        let mut cursor = 0;

        while let Some(offset) = content[cursor..].find(&self.start) {
            let start = cursor + offset;
            let body_start = start + self.start.len();
            let Some(end_offset) = content[body_start..].find(&self.end) else {
                // Unterminated start marker: not a block.
                break;
            };
            let end = body_start + end_offset + self.end.len();
            ranges.push(start..end);
            cursor = end;
        }

        ranges
    }

    /// Whether `content` holds at least one complete block.
    pub fn is_patched(&self, content: &str) -> bool {
        !self.block_ranges(content).is_empty()
    }

    pub fn count_blocks(&self, content: &str) -> usize {
        self.block_ranges(content).len()
    }

    /// Text of the first block, markers included.
    pub fn first_block<'a>(&self, content: &'a str) -> Option<&'a str> {
        self.block_ranges(content)
            .into_iter()
            .next()
            .map(|range| &content[range])
    }

    /// Remove every block from `content`.
    ///
    /// Whitespace left between the removed blocks and end-of-content is
    /// dropped with them; all other bytes are preserved. Content without a
    /// complete block is returned unchanged.
    pub fn strip(&self, content: &str) -> String {
        let mut current = self.strip_once(content);
        // Removing a block can splice marker fragments into a new marker.
        while self.is_patched(&current) {
            current = self.strip_once(&current);
        }
        current
    }

    fn strip_once(&self, content: &str) -> String {
        let ranges = self.block_ranges(content);
        if ranges.is_empty() {
            return content.to_string();
        }

        let mut out = String::with_capacity(content.len());
        let mut cursor = 0;
        // Position in `out` after which only whitespace has been kept.
        let mut trailing_from: Option<usize> = None;

        for range in ranges {
            let gap = &content[cursor..range.start];
            if !gap.trim().is_empty() {
                trailing_from = None;
            }
            out.push_str(gap);
            if trailing_from.is_none() {
                trailing_from = Some(out.len());
            }
            cursor = range.end;
        }

        let rest = &content[cursor..];
        if !rest.trim().is_empty() {
            trailing_from = None;
        }
        out.push_str(rest);

        if let Some(at) = trailing_from {
            out.truncate(at);
        }
        out
    }
}
