//! Cache-or-fetch coordination per object kind.
//!
//! Every accessor follows the same sequence: look the key up in the
//! [`BlockCache`]; on a miss invoke the caller's fetch, register the
//! identifiers found in the payload with the [`AliasIndex`], rewrite them to
//! aliases, store the rewritten payload and return it keyed by alias.
//!
//! Fetch failures are logged and reported as `Ok(None)`. Validation errors
//! (a missing [`BlockTree`], a known identifier used as the wrong kind)
//! are returned as `Err`.

use super::payload;
use super::source::RemoteSource;
use crate::config::TtlSettings;
use crate::models::{Alias, BlockTree, CacheKey, DocumentId, ObjectKind};
use crate::storage::{AliasIndex, BlockCache};
use crate::{Error, Result};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::fmt::Display;
use std::future::Future;
use std::sync::Arc;
use tracing::instrument;

/// Fetched or cached content keyed by alias.
pub type AliasMap = BTreeMap<Alias, Value>;

/// Ties the alias index and block cache to caller-supplied fetches.
///
/// Cheap to share behind an `Arc`; holds no lock across a fetch.
pub struct CacheOrchestrator {
    aliases: Arc<AliasIndex>,
    cache: Arc<BlockCache>,
    ttl: TtlSettings,
}

impl CacheOrchestrator {
    /// Creates an orchestrator with default TTLs.
    #[must_use]
    pub fn new(aliases: Arc<AliasIndex>, cache: Arc<BlockCache>) -> Self {
        Self {
            aliases,
            cache,
            ttl: TtlSettings::default(),
        }
    }

    /// Sets the per-kind TTLs used when storing.
    #[must_use]
    pub fn with_ttl(mut self, ttl: TtlSettings) -> Self {
        self.ttl = ttl;
        self
    }

    /// The alias index.
    #[must_use]
    pub fn aliases(&self) -> &AliasIndex {
        &self.aliases
    }

    /// The block cache.
    #[must_use]
    pub fn cache(&self) -> &BlockCache {
        &self.cache
    }

    /// Returns the page `id`, fetching it on a miss.
    pub async fn get_or_fetch_page<F, Fut, E>(
        &self,
        id: DocumentId,
        fetch: F,
    ) -> Result<Option<AliasMap>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = std::result::Result<Value, E>>,
        E: Display,
    {
        self.get_or_fetch_document(id, ObjectKind::Page, fetch).await
    }

    /// Returns the database `id`, fetching it on a miss.
    pub async fn get_or_fetch_database<F, Fut, E>(
        &self,
        id: DocumentId,
        fetch: F,
    ) -> Result<Option<AliasMap>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = std::result::Result<Value, E>>,
        E: Display,
    {
        self.get_or_fetch_document(id, ObjectKind::Database, fetch).await
    }

    /// Returns the block `id`, fetching it on a miss, and records it in `tree`.
    ///
    /// When the block's complete child list is already cached, every cached
    /// descendant is returned too and recorded under it.
    ///
    /// # Errors
    ///
    /// Returns [`Error::BlockTreeRequired`] if `tree` is `None`.
    pub async fn get_or_fetch_block<F, Fut, E>(
        &self,
        id: DocumentId,
        tree: Option<&mut BlockTree>,
        fetch: F,
    ) -> Result<Option<AliasMap>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = std::result::Result<Value, E>>,
        E: Display,
    {
        let tree = require_tree(tree, "get_or_fetch_block")?;
        let Some(mut found) = self.get_or_fetch_document(id, ObjectKind::Block, fetch).await?
        else {
            return Ok(None);
        };

        if let Some(alias) = found.keys().next().copied() {
            tree.add_parent(alias);
            let key = CacheKey::document(id, ObjectKind::Block);
            if self.cache.are_children_fetched(&key) {
                self.gather_descendants(&key, alias, tree, &mut found);
            }
        }
        Ok(Some(found))
    }

    /// Returns the direct children of block `id`, fetching every page of
    /// them on a miss.
    ///
    /// `fetch` receives the pagination cursor (`None` for the first page).
    /// Children are stored as blocks under `id` and recorded in `tree`, and
    /// the parent is marked as having its complete child list cached.
    ///
    /// # Errors
    ///
    /// Returns [`Error::BlockTreeRequired`] if `tree` is `None`.
    #[instrument(skip(self, id, tree, fetch), fields(document_id = %id))]
    pub async fn get_or_fetch_block_children<F, Fut, E>(
        &self,
        id: DocumentId,
        tree: Option<&mut BlockTree>,
        mut fetch: F,
    ) -> Result<Option<AliasMap>>
    where
        F: FnMut(Option<DocumentId>) -> Fut,
        Fut: Future<Output = std::result::Result<Value, E>>,
        E: Display,
    {
        let tree = require_tree(tree, "get_or_fetch_block_children")?;
        let parent_key = CacheKey::document(id, ObjectKind::Block);
        let parent_alias = self.aliases.add_identifier(id, "")?;
        tree.add_parent(parent_alias);

        if self.cache.are_children_fetched(&parent_key) {
            if let Some(children) = self.cached_children(&parent_key) {
                return Ok(Some(record_children(tree, parent_alias, children)));
            }
            tracing::debug!("Cached child list incomplete, refetching");
        }

        let mut children = Vec::new();
        let mut cursor = None;
        loop {
            let page = match fetch(cursor).await {
                Ok(page) => page,
                Err(e) => {
                    fetch_failed(&parent_key, &e);
                    return Ok(None);
                },
            };

            for item in payload::results(&page) {
                let Some(child_id) = payload::document_id(item) else {
                    continue;
                };
                children.push(self.store_document(
                    child_id,
                    ObjectKind::Block,
                    item.clone(),
                    Some(&parent_key),
                )?);
            }

            match payload::next_cursor(&page) {
                Some(next) if cursor != Some(next) => cursor = Some(next),
                _ => break,
            }
        }

        if let Err(e) = self.cache.mark_children_fetched(&parent_key) {
            tracing::warn!(error = %e, "Failed to mark children fetched");
        }
        // A page's content lives under its block key.
        let page_key = CacheKey::document(id, ObjectKind::Page);
        if self.cache.contains(&page_key) {
            if let Err(e) = self.cache.add_relationship(&page_key, &parent_key) {
                tracing::warn!(error = %e, "Failed to link page to its block");
            }
        }

        Ok(Some(record_children(tree, parent_alias, children)))
    }

    /// Cached search results, one entry per result item.
    #[must_use]
    pub fn get_cached_search_results(
        &self,
        query: &str,
        filter: Option<&str>,
        cursor: Option<DocumentId>,
    ) -> Option<AliasMap> {
        self.cached_listing(&CacheKey::search(query, filter, cursor))
    }

    /// Stores a raw search response and returns its items keyed by alias.
    pub fn cache_search_results(
        &self,
        query: &str,
        filter: Option<&str>,
        cursor: Option<DocumentId>,
        response: &Value,
    ) -> Result<AliasMap> {
        self.cache_listing(&CacheKey::search(query, filter, cursor), response)
    }

    /// Returns search results, running `fetch` on a miss.
    #[instrument(skip(self, fetch))]
    pub async fn get_or_fetch_search_results<F, Fut, E>(
        &self,
        query: &str,
        filter: Option<&str>,
        cursor: Option<DocumentId>,
        fetch: F,
    ) -> Result<Option<AliasMap>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = std::result::Result<Value, E>>,
        E: Display,
    {
        let key = CacheKey::search(query, filter, cursor);
        if let Some(hit) = self.cached_listing(&key) {
            return Ok(Some(hit));
        }
        match fetch().await {
            Ok(response) => self.cache_listing(&key, &response).map(Some),
            Err(e) => {
                fetch_failed(&key, &e);
                Ok(None)
            },
        }
    }

    /// Cached query results for `database`, one entry per row.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ObjectTypeMismatch`] if `database` is cached only as
    /// another kind.
    pub fn get_cached_database_query_results(
        &self,
        database: DocumentId,
        filter: Option<&str>,
        cursor: Option<DocumentId>,
    ) -> Result<Option<AliasMap>> {
        self.cache
            .verify_kind_or_raise(database, ObjectKind::Database)?;
        Ok(self.cached_listing(&CacheKey::database_query(database, filter, cursor)))
    }

    /// Stores a raw database query response and returns its rows keyed by alias.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ObjectTypeMismatch`] if `database` is cached only as
    /// another kind.
    pub fn cache_database_query_results(
        &self,
        database: DocumentId,
        filter: Option<&str>,
        cursor: Option<DocumentId>,
        response: &Value,
    ) -> Result<AliasMap> {
        self.cache
            .verify_kind_or_raise(database, ObjectKind::Database)?;
        self.cache_listing(&CacheKey::database_query(database, filter, cursor), response)
    }

    /// Returns database query results, running `fetch` on a miss.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ObjectTypeMismatch`] before any fetch if `database`
    /// is cached only as another kind.
    #[instrument(skip(self, fetch))]
    pub async fn get_or_fetch_database_query_results<F, Fut, E>(
        &self,
        database: DocumentId,
        filter: Option<&str>,
        cursor: Option<DocumentId>,
        fetch: F,
    ) -> Result<Option<AliasMap>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = std::result::Result<Value, E>>,
        E: Display,
    {
        if let Some(hit) = self.get_cached_database_query_results(database, filter, cursor)? {
            return Ok(Some(hit));
        }
        let key = CacheKey::database_query(database, filter, cursor);
        match fetch().await {
            Ok(response) => self.cache_listing(&key, &response).map(Some),
            Err(e) => {
                fetch_failed(&key, &e);
                Ok(None)
            },
        }
    }

    /// [`get_or_fetch_page`](Self::get_or_fetch_page) against a [`RemoteSource`].
    pub async fn get_or_fetch_page_from<S: RemoteSource>(
        &self,
        source: &S,
        id: DocumentId,
    ) -> Result<Option<AliasMap>> {
        self.get_or_fetch_page(id, || source.fetch_page(id)).await
    }

    /// [`get_or_fetch_database`](Self::get_or_fetch_database) against a [`RemoteSource`].
    pub async fn get_or_fetch_database_from<S: RemoteSource>(
        &self,
        source: &S,
        id: DocumentId,
    ) -> Result<Option<AliasMap>> {
        self.get_or_fetch_database(id, || source.fetch_database(id)).await
    }

    /// [`get_or_fetch_block`](Self::get_or_fetch_block) against a [`RemoteSource`].
    pub async fn get_or_fetch_block_from<S: RemoteSource>(
        &self,
        source: &S,
        id: DocumentId,
        tree: Option<&mut BlockTree>,
    ) -> Result<Option<AliasMap>> {
        self.get_or_fetch_block(id, tree, || source.fetch_block(id)).await
    }

    /// [`get_or_fetch_block_children`](Self::get_or_fetch_block_children) against a [`RemoteSource`].
    pub async fn get_or_fetch_block_children_from<S: RemoteSource>(
        &self,
        source: &S,
        id: DocumentId,
        tree: Option<&mut BlockTree>,
    ) -> Result<Option<AliasMap>> {
        self.get_or_fetch_block_children(id, tree, |cursor| {
            source.fetch_block_children(id, cursor)
        })
        .await
    }

    /// [`get_or_fetch_search_results`](Self::get_or_fetch_search_results) against a [`RemoteSource`].
    pub async fn search_from<S: RemoteSource>(
        &self,
        source: &S,
        query: &str,
        filter: Option<&str>,
        cursor: Option<DocumentId>,
    ) -> Result<Option<AliasMap>> {
        self.get_or_fetch_search_results(query, filter, cursor, || {
            source.search(query, filter, cursor)
        })
        .await
    }

    /// [`get_or_fetch_database_query_results`](Self::get_or_fetch_database_query_results)
    /// against a [`RemoteSource`].
    pub async fn query_database_from<S: RemoteSource>(
        &self,
        source: &S,
        database: DocumentId,
        filter: Option<&str>,
        cursor: Option<DocumentId>,
    ) -> Result<Option<AliasMap>> {
        self.get_or_fetch_database_query_results(database, filter, cursor, || {
            source.query_database(database, filter, cursor)
        })
        .await
    }

    #[instrument(skip(self, id, kind, fetch), fields(document_id = %id, kind = %kind))]
    async fn get_or_fetch_document<F, Fut, E>(
        &self,
        id: DocumentId,
        kind: ObjectKind,
        fetch: F,
    ) -> Result<Option<AliasMap>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = std::result::Result<Value, E>>,
        E: Display,
    {
        let key = CacheKey::document(id, kind);
        if let Some(content) = self.cached_value(&key) {
            let Some(alias) = self.aliases.get_alias(id) else {
                tracing::error!(key = %key, "Cached entry has no alias");
                return Ok(None);
            };
            return Ok(Some(AliasMap::from([(alias, content)])));
        }

        let response = match fetch().await {
            Ok(response) => response,
            Err(e) => {
                fetch_failed(&key, &e);
                return Ok(None);
            },
        };

        let (alias, content) = self.store_document(id, kind, response, None)?;
        Ok(Some(AliasMap::from([(alias, content)])))
    }

    /// Aliases, rewrites and stores one fetched object.
    ///
    /// A payload newer than the cached copy invalidates the cached copy
    /// (and, for blocks and pages, its descendants) before the write.
    fn store_document(
        &self,
        id: DocumentId,
        kind: ObjectKind,
        mut content: Value,
        parent: Option<&CacheKey>,
    ) -> Result<(Alias, Value)> {
        let key = CacheKey::document(id, kind);
        if let Some(freshness) = payload::freshness(&content) {
            if let Err(e) = self.cache.invalidate_if_expired(&key, freshness) {
                tracing::warn!(key = %key, error = %e, "Freshness check failed");
            }
        }

        let alias = self.aliases.add_identifier(id, "")?;
        let ids = payload::collect_ids(&content);
        let aliases: HashMap<DocumentId, Alias> = ids
            .iter()
            .copied()
            .zip(self.aliases.add_identifiers(&ids)?)
            .collect();
        payload::rewrite_ids(&mut content, |found| aliases.get(&found).copied());

        self.store(&key, &content, parent);
        Ok((alias, content))
    }

    /// Stores listing items under their own keys, then the listing itself.
    fn cache_listing(&self, key: &CacheKey, response: &Value) -> Result<AliasMap> {
        let mut items = AliasMap::new();
        let mut item_keys = Vec::new();

        for item in payload::results(response) {
            let Some(item_id) = payload::document_id(item) else {
                continue;
            };
            let kind = payload::object_kind(item).unwrap_or(ObjectKind::Page);
            let (alias, content) = self.store_document(item_id, kind, item.clone(), None)?;
            item_keys.push(CacheKey::document(item_id, kind));
            items.insert(alias, content);
        }

        // Edges go in last: a stale item invalidates listings that reach it,
        // which would drop edges written earlier in this loop.
        let listing = serde_json::to_value(&items).map_err(|e| Error::OperationFailed {
            operation: "serialize_listing".to_string(),
            cause: e.to_string(),
        })?;
        self.store(key, &listing, None);
        for item_key in &item_keys {
            if let Err(e) = self.cache.add_relationship(key, item_key) {
                tracing::warn!(key = %key, error = %e, "Failed to link listing item");
            }
        }

        tracing::debug!(key = %key, items = items.len(), "Cached listing");
        Ok(items)
    }

    fn cached_listing(&self, key: &CacheKey) -> Option<AliasMap> {
        let raw = self.cache.get(key)?;
        serde_json::from_str(&raw)
            .map_err(|e| tracing::warn!(key = %key, error = %e, "Unreadable cached listing"))
            .ok()
    }

    fn cached_value(&self, key: &CacheKey) -> Option<Value> {
        let raw = self.cache.get(key)?;
        serde_json::from_str(&raw)
            .map_err(|e| tracing::warn!(key = %key, error = %e, "Unreadable cached entry"))
            .ok()
    }

    /// Writes `content` under `key`. Failures are logged.
    fn store(&self, key: &CacheKey, content: &Value, parent: Option<&CacheKey>) {
        let ttl = self.ttl.for_kind(key.kind());
        if let Err(e) = self.cache.put(key, &content.to_string(), ttl, parent) {
            tracing::warn!(key = %key, error = %e, "Failed to store cache entry");
        }
    }

    /// Direct children from the cache, or `None` if any of them is gone.
    fn cached_children(&self, parent: &CacheKey) -> Option<Vec<(Alias, Value)>> {
        self.cache
            .children_of(parent)
            .into_iter()
            .filter(|child| child.kind() == ObjectKind::Block)
            .map(|child| {
                let alias = self.aliases.get_alias(child.document_id()?)?;
                Some((alias, self.cached_value(&child)?))
            })
            .collect()
    }

    /// Adds every cached block descendant of `root` to `out` and `tree`.
    fn gather_descendants(
        &self,
        root: &CacheKey,
        root_alias: Alias,
        tree: &mut BlockTree,
        out: &mut AliasMap,
    ) {
        let mut visited = HashSet::from([root.clone()]);
        let mut queue = VecDeque::from([(root.clone(), root_alias)]);

        while let Some((parent, parent_alias)) = queue.pop_front() {
            for child in self.cache.children_of(&parent) {
                if child.kind() != ObjectKind::Block || !visited.insert(child.clone()) {
                    continue;
                }
                let Some(alias) = child.document_id().and_then(|id| self.aliases.get_alias(id))
                else {
                    continue;
                };
                let Some(content) = self.cached_value(&child) else {
                    continue;
                };
                tree.add_relationship(parent_alias, alias);
                out.insert(alias, content);
                queue.push_back((child, alias));
            }
        }
    }
}

fn require_tree<'a>(
    tree: Option<&'a mut BlockTree>,
    operation: &str,
) -> Result<&'a mut BlockTree> {
    tree.ok_or_else(|| Error::BlockTreeRequired {
        operation: operation.to_string(),
    })
}

fn record_children(tree: &mut BlockTree, parent: Alias, children: Vec<(Alias, Value)>) -> AliasMap {
    for (alias, _) in &children {
        tree.add_relationship(parent, *alias);
    }
    children.into_iter().collect()
}

fn fetch_failed(key: &CacheKey, error: &impl Display) {
    metrics::counter!("orchestrator_fetch_failures_total", "kind" => key.kind().as_str())
        .increment(1);
    tracing::warn!(key = %key, error = %error, "Fetch failed");
}
