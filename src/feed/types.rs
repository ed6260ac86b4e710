//! Domain types for the feed and comment threads.

use crate::net::{PostRow, StickerRow};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A sticker attached to a post or comment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StickerRef {
    pub id: String,
    /// Image filename, when the API supplied one.
    pub image: Option<String>,
}

impl From<StickerRow> for StickerRef {
    fn from(row: StickerRow) -> Self {
        Self {
            id: row.id,
            image: row.filename,
        }
    }
}

/// One post in the feed. Identity is `id`; everything else may be patched in
/// place by reconciliation or a confirmed action.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeedItem {
    pub id: String,
    pub author_id: String,
    pub author_display: String,
    pub created_at: Option<DateTime<Utc>>,
    pub body_text: String,
    pub sticker: Option<StickerRef>,
    pub like_count: i64,
    pub is_liked_by_viewer: bool,
    pub comment_count: i64,
}

/// Comments share the post shape; the per-thread pagination cursor lives on
/// the owning `ThreadState`, not the item.
pub type CommentItem = FeedItem;

impl From<PostRow> for FeedItem {
    fn from(row: PostRow) -> Self {
        let (author_id, author_display) = match row.user {
            Some(user) => {
                let display = user.nickname.unwrap_or_else(|| user.id.clone());
                (user.id, display)
            }
            None => (String::new(), String::new()),
        };
        Self {
            id: row.id,
            author_id,
            author_display,
            created_at: row
                .created
                .as_deref()
                .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
                .map(|dt| dt.with_timezone(&Utc)),
            body_text: row.content.unwrap_or_default(),
            sticker: row.sticker.map(StickerRef::from),
            like_count: row.likes_length,
            is_liked_by_viewer: row.is_like,
            comment_count: row.comments_length,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn row_conversion_fills_defaults() {
        let row: PostRow = serde_json::from_value(serde_json::json!({
            "id": "p1",
            "content": "hello",
            "created": "2026-08-30T12:00:00+09:00",
            "user": { "id": "u1", "nickname": "nick" },
            "likesLength": 2,
            "commentsLength": 5,
            "isLike": false
        }))
        .unwrap();
        let item = FeedItem::from(row);
        assert_eq!(item.author_display, "nick");
        assert_eq!(item.like_count, 2);
        assert!(item.created_at.is_some());

        let bare: PostRow = serde_json::from_value(serde_json::json!({ "id": "p2" })).unwrap();
        let item = FeedItem::from(bare);
        assert_eq!(item.body_text, "");
        assert_eq!(item.author_display, "");
        assert!(item.created_at.is_none());
    }
}
