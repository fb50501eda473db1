//! Greedy-fill pagination of measured blocks.

use tracing::debug;

use crate::formatter::PageBlock;

/// Running header/footer content shared by every page of a report.
#[derive(Debug, Clone, PartialEq)]
pub struct RunningMatter {
    pub organization: String,
    pub department: Option<String>,
    pub report_title: String,
    /// Generation timestamp, already formatted for display.
    pub generated_at: String,
    pub has_logo: bool,
}

/// Per-page stamp. Identical on every page except for `page_number`.
#[derive(Debug, Clone, PartialEq)]
pub struct PageStamp {
    pub running: RunningMatter,
    /// 1-based.
    pub page_number: usize,
    pub page_count: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Page {
    pub stamp: PageStamp,
    pub blocks: Vec<PageBlock>,
}

impl Page {
    pub fn used_height(&self) -> f64 {
        self.blocks.iter().map(|b| b.height).sum()
    }
}

/// Packs `blocks` onto pages in order.
///
/// A block goes on the current page if it fits in the remaining height,
/// otherwise it starts a new page. Blocks are never split: a block taller
/// than `content_height` gets a page to itself. Records may straddle pages.
pub fn paginate(blocks: Vec<PageBlock>, content_height: f64, running: &RunningMatter) -> Vec<Page> {
    let mut groups: Vec<Vec<PageBlock>> = Vec::new();
    let mut current: Vec<PageBlock> = Vec::new();
    let mut used = 0.0;

    for block in blocks {
        if !current.is_empty() && used + block.height > content_height {
            groups.push(std::mem::take(&mut current));
            used = 0.0;
        }
        used += block.height;
        current.push(block);
    }
    if !current.is_empty() {
        groups.push(current);
    }

    let page_count = groups.len();
    debug!(page_count, content_height, "Blocks paginated");

    groups
        .into_iter()
        .enumerate()
        .map(|(index, blocks)| Page {
            stamp: PageStamp {
                running: running.clone(),
                page_number: index + 1,
                page_count,
            },
            blocks,
        })
        .collect()
}
