//! Page reconciliation: compiled page specs against the child pages observed
//! under each parent.
use std::collections::HashMap;
use tracing::debug;

use super::{ItemFailure, Operation, PageDraft, PageMetadata};
use crate::matcher::match_page;
use crate::model::{PageBody, PageSpec, PageSummary};

#[derive(Debug, Clone, Default)]
pub struct PagesOutcome {
    pub operations: Vec<Operation>,
    pub failures: Vec<ItemFailure>,
}

/// `bodies` holds the current body of every matched page, keyed by page id.
/// A matched page without an entry is treated as having changed.
pub fn reconcile_pages(
    pages: &[PageSpec],
    observed: &[PageSummary],
    bodies: &HashMap<String, PageBody>,
) -> PagesOutcome {
    let mut out = PagesOutcome::default();
    for page in pages {
        let current = match match_page(observed, &page.parent_page_id, &page.title) {
            Ok(current) => current,
            Err(err) => {
                out.failures.push(ItemFailure {
                    subject: page.source.display().to_string(),
                    error: err.into(),
                });
                continue;
            }
        };
        let Some(current) = current else {
            out.operations.push(Operation::CreatePage {
                draft: PageDraft {
                    parent_page_id: page.parent_page_id.clone(),
                    title: page.title.clone(),
                    icon: page.icon.clone(),
                    cover_url: page.cover_url.clone(),
                },
                blocks: page.blocks.clone(),
            });
            continue;
        };

        let body_changed = !bodies
            .get(&current.id)
            .is_some_and(|body| body.matches(&page.blocks));
        let metadata = PageMetadata {
            icon: page.icon.clone().filter(|i| current.icon.as_ref() != Some(i)),
            cover_url: page
                .cover_url
                .clone()
                .filter(|c| current.cover_url.as_ref() != Some(c)),
        };
        if !body_changed && metadata.is_empty() {
            debug!(page = %page.title, "page unchanged");
            continue;
        }
        out.operations.push(Operation::ReplacePageBody {
            page_id: current.id.clone(),
            title: page.title.clone(),
            blocks: body_changed.then(|| page.blocks.clone()),
            metadata: (!metadata.is_empty()).then_some(metadata),
        });
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ItemError;
    use crate::model::{Block, Span};
    use std::path::PathBuf;

    fn spec(title: &str, blocks: Vec<Block>) -> PageSpec {
        PageSpec {
            source: PathBuf::from(format!("{title}.md")),
            title: title.into(),
            parent_page_id: "root".into(),
            icon: Some("📘".into()),
            cover_url: None,
            blocks,
        }
    }

    fn summary(id: &str, title: &str, icon: Option<&str>) -> PageSummary {
        PageSummary {
            id: id.into(),
            parent_page_id: "root".into(),
            title: title.into(),
            icon: icon.map(str::to_string),
            cover_url: Some("https://img/cover.png".into()),
        }
    }

    fn body(text: &str) -> Vec<Block> {
        vec![Block::Paragraph {
            spans: vec![Span::plain(text)],
        }]
    }

    #[test]
    fn new_page_is_created_and_identical_page_is_left_alone() {
        let pages = vec![spec("Guide", body("hi")), spec("Intro", body("x"))];
        let observed = vec![summary("p1", "Guide", Some("📘"))];
        let bodies = HashMap::from([(
            "p1".to_string(),
            PageBody {
                blocks: body("hi"),
                unsupported: 0,
            },
        )]);
        let out = reconcile_pages(&pages, &observed, &bodies);
        assert_eq!(out.operations.len(), 1);
        assert!(matches!(&out.operations[0], Operation::CreatePage { draft, .. } if draft.title == "Intro"));
    }

    #[test]
    fn changed_body_or_icon_replaces_only_what_differs() {
        let pages = vec![spec("Guide", body("new"))];
        let observed = vec![summary("p1", "Guide", None)];
        let bodies = HashMap::from([(
            "p1".to_string(),
            PageBody {
                blocks: body("old"),
                unsupported: 0,
            },
        )]);
        let out = reconcile_pages(&pages, &observed, &bodies);
        let Operation::ReplacePageBody { blocks, metadata, .. } = &out.operations[0] else {
            panic!("expected replace");
        };
        assert_eq!(blocks.as_ref(), Some(&body("new")));
        assert_eq!(
            metadata,
            &Some(PageMetadata {
                icon: Some("📘".into()),
                cover_url: None
            })
        );
    }

    #[test]
    fn unsupported_remote_blocks_force_a_replace() {
        let pages = vec![spec("Guide", body("hi"))];
        let observed = vec![summary("p1", "Guide", Some("📘"))];
        let bodies = HashMap::from([(
            "p1".to_string(),
            PageBody {
                blocks: body("hi"),
                unsupported: 1,
            },
        )]);
        let out = reconcile_pages(&pages, &observed, &bodies);
        assert!(matches!(
            &out.operations[0],
            Operation::ReplacePageBody { blocks: Some(_), metadata: None, .. }
        ));
    }

    #[test]
    fn ambiguous_page_is_itemized() {
        let pages = vec![spec("Guide", body("hi"))];
        let observed = vec![summary("p1", "Guide", None), summary("p2", "Guide", None)];
        let out = reconcile_pages(&pages, &observed, &HashMap::new());
        assert!(out.operations.is_empty());
        assert!(matches!(out.failures[0].error, ItemError::Ambiguity(_)));
    }
}
