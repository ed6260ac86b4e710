//! Node specs for feed entries.
//!
//! The overlay deliberately does not copy the host page's class names; nodes
//! carry semantic `data-role` attributes instead, and every element gets the
//! overlay capability marker when materialized. Sub-node handles are captured
//! right after creation so later patches can address parts of an entry
//! without re-querying.

use crate::dom::{DomError, DomTree, EntryNodes, NodeId, NodeSpec};
use crate::feed::types::{FeedItem, StickerRef};
use crate::util::{linkify, Segment, TldList};

pub const POST_ID_ATTR: &str = "data-post-id";
pub const COMMENT_ID_ATTR: &str = "data-comment-id";
pub const ROLE_ATTR: &str = "data-role";
pub const SECTION_ATTR: &str = "data-section";
pub const LIKED_ATTR: &str = "data-liked";

pub const MORE_SECTION: &str = "more";

pub fn like_label(count: i64) -> String {
    format!("like {count}")
}

pub fn comment_label(count: i64) -> String {
    format!("comments {count}")
}

/// Body text as a list of text/anchor specs.
pub fn body_content(text: &str, tlds: &TldList) -> Vec<NodeSpec> {
    linkify::segments(text, tlds)
        .into_iter()
        .map(|segment| match segment {
            Segment::Text(t) => NodeSpec::text(t),
            Segment::Link { href, label } => NodeSpec::element("a")
                .attr("href", href)
                .attr("target", "_blank")
                .child(NodeSpec::text(label)),
        })
        .collect()
}

/// Contents of the sticker slot (empty when no sticker is attached).
pub fn sticker_content(sticker: Option<&StickerRef>) -> Vec<NodeSpec> {
    match sticker {
        Some(s) => {
            let mut img = NodeSpec::element("img").attr("data-sticker-id", s.id.clone());
            if let Some(image) = &s.image {
                img = img.attr("src", image.clone());
            }
            vec![img]
        }
        None => Vec::new(),
    }
}

/// Spec for one post list item.
pub fn post_spec(item: &FeedItem, tlds: &TldList, in_more_section: bool) -> NodeSpec {
    let mut root = NodeSpec::element("li").attr(POST_ID_ATTR, item.id.clone());
    if in_more_section {
        root = root.attr(SECTION_ATTR, MORE_SECTION);
    }
    root.child(
        NodeSpec::element("div")
            .attr(ROLE_ATTR, "author")
            .child(NodeSpec::text(item.author_display.clone())),
    )
    .child(
        NodeSpec::element("p")
            .attr(ROLE_ATTR, "body")
            .children(body_content(&item.body_text, tlds)),
    )
    .child(
        NodeSpec::element("span")
            .attr(ROLE_ATTR, "sticker")
            .children(sticker_content(item.sticker.as_ref())),
    )
    .child(
        NodeSpec::element("button")
            .attr(ROLE_ATTR, "like")
            .attr(LIKED_ATTR, item.is_liked_by_viewer.to_string())
            .child(NodeSpec::text(like_label(item.like_count))),
    )
    .child(
        NodeSpec::element("button")
            .attr(ROLE_ATTR, "comments")
            .child(NodeSpec::text(comment_label(item.comment_count))),
    )
}

/// Spec for one comment list item (no comment toggle).
pub fn comment_spec(item: &FeedItem, tlds: &TldList) -> NodeSpec {
    NodeSpec::element("li")
        .attr(COMMENT_ID_ATTR, item.id.clone())
        .child(
            NodeSpec::element("div")
                .attr(ROLE_ATTR, "author")
                .child(NodeSpec::text(item.author_display.clone())),
        )
        .child(
            NodeSpec::element("p")
                .attr(ROLE_ATTR, "body")
                .children(body_content(&item.body_text, tlds)),
        )
        .child(
            NodeSpec::element("span")
                .attr(ROLE_ATTR, "sticker")
                .children(sticker_content(item.sticker.as_ref())),
        )
        .child(
            NodeSpec::element("button")
                .attr(ROLE_ATTR, "like")
                .attr(LIKED_ATTR, item.is_liked_by_viewer.to_string())
                .child(NodeSpec::text(like_label(item.like_count))),
        )
}

fn find_role(tree: &DomTree, root: NodeId, role: &str) -> Result<NodeId, DomError> {
    tree.find_by_attr(root, ROLE_ATTR, role)
        .ok_or(DomError::Detached)
}

/// Captures sub-node handles from a freshly materialized entry. Must run
/// before any nested thread is mounted under the entry, otherwise role
/// lookups could land in a child comment.
pub fn capture_entry(
    tree: &DomTree,
    root: NodeId,
    with_comment_toggle: bool,
) -> Result<EntryNodes, DomError> {
    Ok(EntryNodes {
        root,
        body: find_role(tree, root, "body")?,
        like_button: find_role(tree, root, "like")?,
        comment_toggle: if with_comment_toggle {
            Some(find_role(tree, root, "comments")?)
        } else {
            None
        },
        sticker_slot: find_role(tree, root, "sticker")?,
    })
}
