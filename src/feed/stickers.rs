//! Sticker catalog and pending attachment.
//!
//! Category tabs load once; the stickers inside a tab load lazily on first
//! open and are cached for the session. A selected sticker is held as the
//! pending attachment until a composer submit consumes it.

use crate::feed::types::StickerRef;
use crate::net::{ApiClient, ApiError};
use std::collections::HashMap;

#[derive(Debug, Clone)]
pub struct StickerTab {
    pub id: String,
    pub title: String,
}

#[derive(Default)]
pub struct StickerCatalog {
    tabs: Vec<StickerTab>,
    loaded: HashMap<String, Vec<StickerRef>>,
    selection: Option<StickerRef>,
}

impl StickerCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn tabs(&self) -> &[StickerTab] {
        &self.tabs
    }

    /// Fetches the category tabs. Already-loaded tabs are kept.
    pub async fn load_tabs(&mut self, client: &ApiClient) -> Result<usize, ApiError> {
        if !self.tabs.is_empty() {
            return Ok(self.tabs.len());
        }
        let rows = client.list_sticker_categories().await?;
        self.tabs = rows
            .into_iter()
            .map(|row| StickerTab {
                title: row.title.unwrap_or_default(),
                id: row.id,
            })
            .collect();
        tracing::debug!(tabs = self.tabs.len(), "sticker tabs loaded");
        Ok(self.tabs.len())
    }

    /// Stickers inside one tab, fetched on first access.
    pub async fn stickers_in(
        &mut self,
        client: &ApiClient,
        tab_id: &str,
    ) -> Result<&[StickerRef], ApiError> {
        if !self.loaded.contains_key(tab_id) {
            let rows = client.list_stickers_in_category(tab_id).await?;
            let stickers: Vec<StickerRef> = rows.into_iter().map(StickerRef::from).collect();
            tracing::debug!(tab_id, count = stickers.len(), "sticker tab contents loaded");
            self.loaded.insert(tab_id.to_string(), stickers);
        }
        Ok(self.loaded[tab_id].as_slice())
    }

    /// Marks a loaded sticker as the pending attachment. Returns false when
    /// the sticker is not in the cache.
    pub fn select(&mut self, tab_id: &str, sticker_id: &str) -> bool {
        let found = self
            .loaded
            .get(tab_id)
            .and_then(|list| list.iter().find(|s| s.id == sticker_id))
            .cloned();
        match found {
            Some(sticker) => {
                self.selection = Some(sticker);
                true
            }
            None => false,
        }
    }

    pub fn selection(&self) -> Option<&StickerRef> {
        self.selection.as_ref()
    }

    /// Consumes the pending attachment, as a composer submit does.
    pub fn take_selection(&mut self) -> Option<StickerRef> {
        self.selection.take()
    }

    pub fn clear_selection(&mut self) {
        self.selection = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::tests::FakePage;
    use crate::auth::TokenStore;
    use serde_json::json;
    use std::sync::Arc;
    use std::time::Duration;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client_for(server_uri: &str) -> ApiClient {
        let state = json!({
            "props": { "initialState": { "common": { "user": { "xToken": "tok" } } } }
        });
        let store = TokenStore::new(Arc::new(FakePage::new(Some("csrf"), Some(state))));
        assert!(store.extract());
        ApiClient::new(
            reqwest::Client::new(),
            server_uri,
            Arc::new(store),
            0,
            Duration::from_millis(1),
            1.5,
        )
    }

    #[tokio::test]
    async fn tabs_load_once() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/graphql/SELECT_STICKERS"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "data": {
                "stickers": { "list": [
                    { "id": 1, "title": "animals" },
                    { "id": 2, "title": "faces" }
                ] }
            }})))
            .expect(1)
            .mount(&server)
            .await;

        let client = client_for(&server.uri());
        let mut catalog = StickerCatalog::new();
        assert_eq!(catalog.load_tabs(&client).await.unwrap(), 2);
        assert_eq!(catalog.tabs()[0].title, "animals");
        // Cached; no second request.
        assert_eq!(catalog.load_tabs(&client).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn tab_contents_are_lazy_and_cached() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/graphql/SELECT_STICKER"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "data": {
                "sticker": { "id": 1, "stickers": [
                    { "id": 11, "name": "wave", "filename": "wave.png" }
                ] }
            }})))
            .expect(1)
            .mount(&server)
            .await;

        let client = client_for(&server.uri());
        let mut catalog = StickerCatalog::new();
        let stickers = catalog.stickers_in(&client, "1").await.unwrap();
        assert_eq!(stickers.len(), 1);
        assert_eq!(stickers[0].image.as_deref(), Some("wave.png"));
        // Second access served from cache.
        assert_eq!(catalog.stickers_in(&client, "1").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn selection_is_consumed_on_take() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/graphql/SELECT_STICKER"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "data": {
                "sticker": { "id": 1, "stickers": [{ "id": 11, "name": "wave" }] }
            }})))
            .mount(&server)
            .await;

        let client = client_for(&server.uri());
        let mut catalog = StickerCatalog::new();
        catalog.stickers_in(&client, "1").await.unwrap();

        assert!(!catalog.select("1", "999"));
        assert!(catalog.select("1", "11"));
        assert_eq!(catalog.selection().unwrap().id, "11");
        assert_eq!(catalog.take_selection().unwrap().id, "11");
        assert!(catalog.selection().is_none());
    }
}
