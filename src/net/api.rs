//! Named GraphQL operations and their typed response rows.
//!
//! The exact query documents and field shapes are a thin collaborator seam:
//! each operation is a compact named document, and rows are deserialized
//! permissively (unknown fields ignored, most fields optional) so server-side
//! shape drift degrades into missing data instead of parse failures.

use super::client::{ApiClient, ApiError};
use serde::Deserialize;
use serde_json::{json, Value};

// ---------------------------------------------------------------------------
// Response rows
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserRow {
    pub id: String,
    pub nickname: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StickerRow {
    #[serde(deserialize_with = "id_as_string")]
    pub id: String,
    pub name: Option<String>,
    pub filename: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StickerTabRow {
    #[serde(deserialize_with = "id_as_string")]
    pub id: String,
    pub title: Option<String>,
    #[serde(default)]
    pub stickers: Vec<StickerRow>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PostRow {
    pub id: String,
    pub content: Option<String>,
    pub created: Option<String>,
    pub user: Option<UserRow>,
    #[serde(default)]
    pub likes_length: i64,
    #[serde(default)]
    pub comments_length: i64,
    #[serde(default)]
    pub is_like: bool,
    pub sticker: Option<StickerRow>,
}

/// Cursor-paginated list envelope shared by posts and comments.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PagedList {
    #[serde(default)]
    pub list: Vec<PostRow>,
    pub search_after: Option<Value>,
    pub total: Option<i64>,
}

/// Sticker ids occasionally arrive as numbers; normalize to strings.
fn id_as_string<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    match value {
        Value::String(s) => Ok(s),
        Value::Number(n) => Ok(n.to_string()),
        other => Err(serde::de::Error::custom(format!(
            "expected string or number id, got {other}"
        ))),
    }
}

// ---------------------------------------------------------------------------
// Query documents (compact; shapes are an external collaborator)
// ---------------------------------------------------------------------------

const SELECT_ENTRYSTORY: &str = "query SELECT_ENTRYSTORY($pageParam: PageParam, $query: String, $term: String, $searchAfter: JSON) { discussList(pageParam: $pageParam, query: $query, term: $term, searchAfter: $searchAfter) { total list { id content created commentsLength likesLength isLike user { id nickname } sticker { id name filename } } searchAfter } }";

const SELECT_COMMENTS: &str = "query SELECT_COMMENTS($pageParam: PageParam, $target: String, $searchAfter: JSON) { commentList(pageParam: $pageParam, target: $target, searchAfter: $searchAfter) { total searchAfter list { id content created likesLength isLike user { id nickname } sticker { id name filename } } } }";

const LIKE: &str = "mutation LIKE($target: String, $targetSubject: String) { like(target: $target, targetSubject: $targetSubject) { target } }";

const UNLIKE: &str = "mutation UNLIKE($target: String) { unlike(target: $target) { target } }";

const CREATE_COMMENT: &str = "mutation CREATE_COMMENT($content: String, $target: String, $targetSubject: String, $stickerItem: ID) { createComment(content: $content, target: $target, targetSubject: $targetSubject, stickerItem: $stickerItem) { comment { id } } }";

const UPDATE_DISCUSS: &str = "mutation UPDATE_DISCUSS($id: ID, $content: String, $stickerItem: ID) { updateDiscuss(id: $id, content: $content, stickerItem: $stickerItem) { id } }";

const UPDATE_COMMENT: &str = "mutation UPDATE_COMMENT($id: ID, $content: String, $stickerItem: ID) { updateComment(id: $id, content: $content, stickerItem: $stickerItem) { comment { id } } }";

const DELETE_DISCUSS: &str = "mutation DELETE_DISCUSS($id: ID) { deleteDiscuss(id: $id) { id } }";

const DELETE_COMMENT: &str = "mutation DELETE_COMMENT($id: ID) { deleteComment(id: $id) { id } }";

const SELECT_STICKERS: &str = "query SELECT_STICKERS { stickers { list { id title } } }";

const SELECT_STICKER: &str = "query SELECT_STICKER($id: ID) { sticker(id: $id) { id title stickers { id name filename } } }";

const SELECT_TOPICS: &str = "query SELECT_TOPICS($pageParam: PageParam) { topicList(pageParam: $pageParam) { list { id target } } }";

// ---------------------------------------------------------------------------
// Operations
// ---------------------------------------------------------------------------

/// Query parameters carried by the feed view (sort order, search term).
#[derive(Debug, Clone)]
pub struct FeedQuery {
    pub sort: String,
    pub term: String,
    pub query: Option<String>,
}

impl Default for FeedQuery {
    fn default() -> Self {
        Self {
            sort: "created".to_string(),
            term: "all".to_string(),
            query: None,
        }
    }
}

impl ApiClient {
    /// First or continued page of the post feed.
    pub async fn list_posts(
        &self,
        query: &FeedQuery,
        display: u32,
        cursor: Option<&Value>,
    ) -> Result<PagedList, ApiError> {
        let data = self
            .graphql(
                "SELECT_ENTRYSTORY",
                SELECT_ENTRYSTORY,
                json!({
                    "category": "free",
                    "searchType": "scroll",
                    "discussType": "entrystory",
                    "term": query.term,
                    "query": query.query,
                    "pageParam": { "display": display, "sort": query.sort },
                    "searchAfter": cursor,
                }),
            )
            .await?;
        parse_list(data, "discussList")
    }

    /// One page of a post's comment thread.
    pub async fn list_comments(
        &self,
        post_id: &str,
        display: u32,
        cursor: Option<&Value>,
    ) -> Result<PagedList, ApiError> {
        let data = self
            .graphql(
                "SELECT_COMMENTS",
                SELECT_COMMENTS,
                json!({
                    "target": post_id,
                    "pageParam": { "display": display, "sort": "created", "order": 1 },
                    "searchAfter": cursor,
                }),
            )
            .await?;
        parse_list(data, "commentList")
    }

    /// Likes a post or comment. The subject is `"discuss"` for posts and
    /// `"comment"` for comments. Resolves only on server confirmation.
    pub async fn like(&self, target: &str, target_subject: &str) -> Result<(), ApiError> {
        let data = self
            .graphql(
                "LIKE",
                LIKE,
                json!({ "target": target, "targetSubject": target_subject }),
            )
            .await?;
        confirm(data, "like")
    }

    pub async fn unlike(&self, target: &str) -> Result<(), ApiError> {
        let data = self
            .graphql("UNLIKE", UNLIKE, json!({ "target": target }))
            .await?;
        confirm(data, "unlike")
    }

    pub async fn create_comment(
        &self,
        post_id: &str,
        content: &str,
        sticker_item: Option<&str>,
    ) -> Result<(), ApiError> {
        let data = self
            .graphql(
                "CREATE_COMMENT",
                CREATE_COMMENT,
                json!({
                    "content": content,
                    "target": post_id,
                    "targetSubject": "discuss",
                    "stickerItem": sticker_item,
                }),
            )
            .await?;
        confirm(data, "createComment")
    }

    pub async fn edit_post(
        &self,
        post_id: &str,
        content: &str,
        sticker_item: Option<&str>,
    ) -> Result<(), ApiError> {
        let data = self
            .graphql(
                "UPDATE_DISCUSS",
                UPDATE_DISCUSS,
                json!({ "id": post_id, "content": content, "stickerItem": sticker_item }),
            )
            .await?;
        confirm(data, "updateDiscuss")
    }

    pub async fn edit_comment(
        &self,
        comment_id: &str,
        content: &str,
        sticker_item: Option<&str>,
    ) -> Result<(), ApiError> {
        let data = self
            .graphql(
                "UPDATE_COMMENT",
                UPDATE_COMMENT,
                json!({ "id": comment_id, "content": content, "stickerItem": sticker_item }),
            )
            .await?;
        confirm(data, "updateComment")
    }

    pub async fn delete_post(&self, post_id: &str) -> Result<(), ApiError> {
        let data = self
            .graphql("DELETE_DISCUSS", DELETE_DISCUSS, json!({ "id": post_id }))
            .await?;
        confirm(data, "deleteDiscuss")
    }

    pub async fn delete_comment(&self, comment_id: &str) -> Result<(), ApiError> {
        let data = self
            .graphql("DELETE_COMMENT", DELETE_COMMENT, json!({ "id": comment_id }))
            .await?;
        confirm(data, "deleteComment")
    }

    /// Sticker category tabs.
    pub async fn list_sticker_categories(&self) -> Result<Vec<StickerTabRow>, ApiError> {
        let data = self
            .graphql("SELECT_STICKERS", SELECT_STICKERS, json!({}))
            .await?;
        let list = data
            .pointer("/stickers/list")
            .cloned()
            .ok_or(ApiError::MissingData("stickers.list"))?;
        serde_json::from_value(list).map_err(|e| {
            tracing::warn!(error = %e, "sticker tab rows failed to deserialize");
            ApiError::MalformedResponse
        })
    }

    /// Stickers inside one category tab.
    pub async fn list_stickers_in_category(
        &self,
        tab_id: &str,
    ) -> Result<Vec<StickerRow>, ApiError> {
        let data = self
            .graphql("SELECT_STICKER", SELECT_STICKER, json!({ "id": tab_id }))
            .await?;
        let list = data
            .pointer("/sticker/stickers")
            .cloned()
            .ok_or(ApiError::MissingData("sticker.stickers"))?;
        serde_json::from_value(list).map_err(|e| {
            tracing::warn!(error = %e, "sticker rows failed to deserialize");
            ApiError::MalformedResponse
        })
    }

    /// Resolves the viewer's id from their topic feed. Best effort: an empty
    /// topic list yields `None`.
    pub async fn viewer_id(&self) -> Result<Option<String>, ApiError> {
        let data = self
            .graphql(
                "SELECT_TOPICS",
                SELECT_TOPICS,
                json!({ "pageParam": { "display": 5 } }),
            )
            .await?;
        Ok(data
            .pointer("/topicList/list/0/target")
            .and_then(Value::as_str)
            .map(str::to_string))
    }
}

fn parse_list(data: Value, key: &'static str) -> Result<PagedList, ApiError> {
    let list = data.get(key).cloned().ok_or(ApiError::MissingData(key))?;
    serde_json::from_value(list).map_err(|e| {
        tracing::warn!(key, error = %e, "list envelope failed to deserialize");
        ApiError::MalformedResponse
    })
}

/// Mutations confirm by echoing a non-null payload under their data key.
fn confirm(data: Value, key: &'static str) -> Result<(), ApiError> {
    match data.get(key) {
        Some(value) if !value.is_null() => Ok(()),
        _ => Err(ApiError::MissingData(key)),
    }
}
