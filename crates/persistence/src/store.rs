//! The object store.
//!
//! [`ObjectStore`] is the uniform CRUD surface over the search cluster. Every
//! backend call goes through the shared [`ConnectionManager`], every physical
//! index name comes from the [`IndexResolver`], and filters are translated by
//! the [`QueryTranslator`].

use std::fmt::{self, Debug};
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Map, Value, json};
use tracing::{debug, info, warn};

use crate::config::StoreConfig;
use crate::connection::ConnectionManager;
use crate::error::{StorageError, StorageResult};
use crate::index::IndexResolver;
use crate::patch::{FieldPatcher, PatchProcessor};
use crate::query::{FilterBuilder, QueryTranslator};
use crate::transport::{
    BulkAction, DocRef, SearchHit, SearchRequest, SearchResponse, SearchTransport,
};
use crate::types::{
    BatchResult, CountOptions, CountResult, DatabaseObject, DeleteRequest, GetObjectsResult,
    ObjectRef, Patch, SearchObjectsResult, SearchOptions, SortField,
};
use crate::update::OptimisticUpdater;

/// Receives the pages of a streaming search.
///
/// Pages arrive strictly in cursor order; the next page is not fetched until
/// the previous call returns. Returning an error stops the scan.
///
/// Closures returning a `'static` future implement this trait directly.
#[async_trait]
pub trait ScanHandler: Send {
    /// Handles one page of projected objects.
    async fn handle(&mut self, objects: Vec<Map<String, Value>>) -> StorageResult<()>;
}

#[async_trait]
impl<F, Fut> ScanHandler for F
where
    F: FnMut(Vec<Map<String, Value>>) -> Fut + Send,
    Fut: Future<Output = StorageResult<()>> + Send + 'static,
{
    async fn handle(&mut self, objects: Vec<Map<String, Value>>) -> StorageResult<()> {
        (self)(objects).await
    }
}

/// Object store over a search cluster.
///
/// Cloning is cheap; clones share the connection.
#[derive(Clone)]
pub struct ObjectStore {
    connection: ConnectionManager,
    resolver: IndexResolver,
    config: Arc<StoreConfig>,
    patcher: Arc<dyn PatchProcessor>,
}

impl Debug for ObjectStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObjectStore")
            .field("connection", &self.connection)
            .field("resolver", &self.resolver)
            .field("patcher", &self.patcher)
            .finish_non_exhaustive()
    }
}

impl ObjectStore {
    /// Creates a store that patches with [`FieldPatcher`].
    pub fn new(connection: ConnectionManager, config: StoreConfig) -> Self {
        Self::with_patcher(connection, config, Arc::new(FieldPatcher))
    }

    /// Creates a store with a custom patch processor.
    pub fn with_patcher(
        connection: ConnectionManager,
        config: StoreConfig,
        patcher: Arc<dyn PatchProcessor>,
    ) -> Self {
        Self {
            connection,
            resolver: IndexResolver::new(config.index_prefix.clone()),
            config: Arc::new(config),
            patcher,
        }
    }

    /// Builds an Elasticsearch-backed store from `config`.
    ///
    /// The store is returned unconnected; call
    /// [`ConnectionManager::connect`] or [`ConnectionManager::spawn_connect`]
    /// on [`connection`](Self::connection).
    #[cfg(feature = "elasticsearch")]
    pub fn elasticsearch(config: StoreConfig) -> StorageResult<Self> {
        config.validate()?;
        let transport =
            crate::backends::elasticsearch::ElasticsearchTransport::new(&config)?;
        let connection = ConnectionManager::from_config(&config, Arc::new(transport));
        Ok(Self::new(connection, config))
    }

    /// Returns the connection manager.
    pub fn connection(&self) -> &ConnectionManager {
        &self.connection
    }

    /// Returns the index resolver.
    pub fn resolver(&self) -> &IndexResolver {
        &self.resolver
    }

    /// Returns the configuration.
    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    pub(crate) fn patcher(&self) -> &dyn PatchProcessor {
        self.patcher.as_ref()
    }

    /// Fetches objects by reference in one round trip.
    ///
    /// Missing objects are reported as `ObjectNotFound` entries in `errors`;
    /// found objects carry their version in `versions`.
    pub async fn get_objects(&self, refs: &[ObjectRef]) -> StorageResult<GetObjectsResult> {
        if refs.is_empty() {
            return Err(StorageError::invalid_field_value([
                "getObjects: \"ids\" should be a non-empty array",
            ]));
        }

        let docs = refs
            .iter()
            .map(|r| {
                Ok(DocRef {
                    index: self.resolver.for_ref(r)?,
                    id: r.id.clone(),
                })
            })
            .collect::<StorageResult<Vec<_>>>()?;

        let items = self.connection.mget(docs).await?;

        let mut result = GetObjectsResult::default();
        for item in items {
            match (item.found, item.source) {
                (true, Some(source)) => {
                    let version = item.version.unwrap_or_default();
                    result
                        .results
                        .push(DatabaseObject::from_document(source, version.version)?);
                    result.versions.insert(item.id, version);
                }
                _ => {
                    if let Some(error) = &item.error {
                        debug!(index = %item.index, id = %item.id, error = %error, "Lookup failed");
                    }
                    result.errors.push(StorageError::object_not_found(item.id));
                }
            }
        }

        Ok(result)
    }

    /// Searches one model.
    ///
    /// With `options.fields` set the search streams: every page of projected
    /// objects is handed to `scan` and `Ok(None)` is returned. Otherwise the
    /// matching objects are returned directly, honouring sort, offset and limit.
    pub async fn search_objects(
        &self,
        options: &SearchOptions,
        scan: Option<&mut dyn ScanHandler>,
    ) -> StorageResult<Option<SearchObjectsResult>> {
        let index = self
            .resolver
            .resolve(&options.model, options.application_id.as_deref())?;
        let query = query_for(options.filters.as_ref());

        if let Some(fields) = &options.fields {
            let Some(handler) = scan else {
                return Err(StorageError::server_failure([
                    "searchObjects was provided with fields but no scan handler",
                ]));
            };
            self.scan(index, query, fields, handler).await?;
            return Ok(None);
        }

        let mut body = json!({ "query": query, "version": true });
        if !options.sort.is_empty() {
            body["sort"] = Value::Array(options.sort.iter().map(sort_clause).collect());
        }

        let response = self
            .connection
            .search(SearchRequest {
                index,
                body,
                from: options.offset,
                size: options.limit,
                ..Default::default()
            })
            .await?;

        let mut results = Vec::with_capacity(response.hits.len());
        for hit in response.hits {
            if let Some(source) = hit.source {
                results.push(DatabaseObject::from_document(
                    source,
                    hit.version.unwrap_or_default(),
                )?);
            }
        }
        if let Some(limit) = options.limit {
            results.truncate(usize::try_from(limit).unwrap_or(usize::MAX));
        }

        Ok(Some(SearchObjectsResult { results }))
    }

    async fn scan(
        &self,
        index: String,
        query: Value,
        fields: &[String],
        handler: &mut dyn ScanHandler,
    ) -> StorageResult<()> {
        let keep_alive = self.config.scroll_keep_alive.as_str();
        let first = self
            .connection
            .search(SearchRequest {
                index: index.clone(),
                body: json!({
                    "query": query,
                    "sort": ["_doc"],
                    "_source": false,
                    "fields": fields,
                    "track_total_hits": true,
                }),
                size: Some(self.config.scroll_page_size),
                scroll: Some(keep_alive.to_string()),
                ..Default::default()
            })
            .await?;

        let mut scroll_id = first.scroll_id.clone();
        let outcome = self
            .drain_pages(first, handler, &mut scroll_id, keep_alive)
            .await;

        if let Some(id) = scroll_id {
            if let Err(e) = self.connection.clear_scroll(&id).await {
                warn!(index = %index, error = %e, "Failed to clear scroll cursor");
            }
        }

        outcome
    }

    async fn drain_pages(
        &self,
        mut page: SearchResponse,
        handler: &mut dyn ScanHandler,
        scroll_id: &mut Option<String>,
        keep_alive: &str,
    ) -> StorageResult<()> {
        let mut collected: u64 = 0;

        loop {
            // an empty page ends the scan even if the total never matches
            if page.hits.is_empty() {
                return Ok(());
            }

            collected += page.hits.len() as u64;
            let objects = page.hits.iter().map(SearchHit::flat_fields).collect();
            handler.handle(objects).await?;

            if collected >= page.total {
                return Ok(());
            }
            let Some(id) = scroll_id.clone() else {
                return Ok(());
            };

            page = self.connection.scroll(&id, keep_alive).await?;
            if page.scroll_id.is_some() {
                *scroll_id = page.scroll_id.clone();
            }
        }
    }

    /// Counts the objects of `model` matching `options.filters`.
    ///
    /// With an aggregation, the aggregation's `value` is returned alongside
    /// the count.
    pub async fn count_objects(
        &self,
        model: &str,
        options: &CountOptions,
    ) -> StorageResult<CountResult> {
        let index = self
            .resolver
            .resolve(model, options.application_id.as_deref())?;
        let query = query_for(options.filters.as_ref());

        if let Some(aggregation) = &options.aggregation {
            let response = self
                .connection
                .search(SearchRequest {
                    index,
                    body: json!({
                        "query": query,
                        "size": 0,
                        "track_total_hits": true,
                        "aggs": { "aggregation": aggregation },
                    }),
                    request_cache: true,
                    ..Default::default()
                })
                .await?;

            let value = response
                .aggregations
                .as_ref()
                .and_then(|a| a.pointer("/aggregation/value"))
                .cloned();
            return Ok(CountResult {
                count: response.total,
                aggregation: Some(value.unwrap_or(Value::Null)),
            });
        }

        let count = self
            .connection
            .count(&index, json!({ "query": query }))
            .await?;
        Ok(CountResult {
            count,
            aggregation: None,
        })
    }

    /// Indexes new objects.
    ///
    /// Objects missing their id or type, or whose index cannot be resolved,
    /// are dropped with a warning; `Ok(None)` means nothing was left to write.
    /// A batch made of a single `application` object first provisions the
    /// application's indexes.
    pub async fn create_objects(
        &self,
        objects: Vec<DatabaseObject>,
    ) -> StorageResult<Option<BatchResult<String>>> {
        if objects.is_empty() {
            return Err(StorageError::invalid_field_value([
                "createObjects: \"objects\" should be a non-empty array",
            ]));
        }

        let mut refresh = false;
        let mut actions = Vec::with_capacity(objects.len());
        let mut types = Vec::with_capacity(objects.len());

        for object in &objects {
            if object.id.is_empty() || object.object_type.is_empty() {
                continue;
            }
            let index = match self.resolver.for_object(object) {
                Ok(index) => index,
                Err(e) => {
                    debug!(id = %object.id, error = %e, "Skipping object without an index");
                    continue;
                }
            };

            refresh |= object.is_global();
            types.push(object.object_type.clone());
            actions.push(BulkAction::Index {
                index,
                id: object.id.clone(),
                document: object.to_document()?,
            });
        }

        let dropped = objects.len() - actions.len();
        if dropped > 0 {
            warn!(
                dropped,
                "Some objects were missing their type and id and were not created"
            );
        }
        if actions.is_empty() {
            return Ok(None);
        }

        if let [application] = objects.as_slice() {
            if application.object_type == "application" {
                self.provision_application(application).await?;
            }
        }

        let response = self.connection.bulk(actions, refresh).await?;

        let mut result = BatchResult::new();
        for (item, object_type) in response.items.into_iter().zip(types) {
            if item.is_success() {
                result.results.push(item.id);
            } else {
                result.errors.push(StorageError::server_failure([format!(
                    "Error creating {} with ID {}: {}",
                    object_type,
                    item.id,
                    item.error.unwrap_or_else(|| format!("status {}", item.status))
                )]));
            }
        }

        Ok(Some(result))
    }

    async fn provision_application(&self, application: &DatabaseObject) -> StorageResult<()> {
        let mut indexes = vec![self.resolver.application_index(&application.id)];
        indexes.extend(
            application
                .schema_models()
                .iter()
                .map(|model| self.resolver.model_index(&application.id, model)),
        );

        for name in indexes {
            let response = self.connection.create_index(&name).await?;
            info!(index = %name, "Created index");
            debug!(index = %name, response = %response, "Index creation response");
        }
        Ok(())
    }

    /// Applies patches under optimistic concurrency control.
    ///
    /// `results` is always empty; failures are reported per object in `errors`.
    pub async fn update_objects(&self, patches: Vec<Patch>) -> StorageResult<BatchResult<String>> {
        OptimisticUpdater::new(self).run(patches).await
    }

    /// Deletes a keyed batch of objects.
    ///
    /// Non-string keys and unresolvable objects are reported and skipped.
    /// Missing documents are reported as `ObjectNotFound`.
    pub async fn delete_objects(
        &self,
        request: DeleteRequest,
    ) -> StorageResult<BatchResult<String>> {
        let mut result = BatchResult::new();
        let mut refresh = false;
        let mut actions = Vec::with_capacity(request.len());

        for (key, object) in request.entries() {
            let Some(id) = key.as_str() else {
                result.errors.push(StorageError::invalid_field_value([format!(
                    "object with ID \"{}\" supplied for deleteObjects is not a valid model type",
                    key
                )]));
                continue;
            };

            let index = match self.resolver.for_object(object) {
                Ok(index) => index,
                Err(e) => {
                    result.errors.push(e);
                    continue;
                }
            };

            refresh |= object.is_global();
            actions.push(BulkAction::Delete {
                index,
                id: id.to_string(),
            });
        }

        if actions.is_empty() {
            return Ok(result);
        }

        let response = self.connection.bulk(actions, refresh).await?;
        for item in response.items {
            if item.is_not_found() {
                result.errors.push(StorageError::object_not_found(item.id));
            } else if item.is_success() {
                result.results.push(item.id);
            } else {
                result.errors.push(StorageError::server_failure([format!(
                    "Error deleting {}: {}",
                    item.id,
                    item.error.unwrap_or_else(|| format!("status {}", item.status))
                )]));
            }
        }

        Ok(result)
    }
}

fn query_for(filters: Option<&FilterBuilder>) -> Value {
    match filters {
        Some(filters) if !filters.is_empty() => QueryTranslator::translate(filters),
        _ => json!({ "match_all": {} }),
    }
}

fn sort_clause(sort: &SortField) -> Value {
    let mut clause = Map::new();
    match &sort.geo {
        None => {
            clause.insert(
                sort.field.clone(),
                json!({ "order": sort.order.as_str(), "unmapped_type": "long" }),
            );
        }
        Some(poi) => {
            let mut distance = Map::new();
            distance.insert(sort.field.clone(), json!({ "lat": poi.lat, "lon": poi.long }));
            distance.insert("order".to_string(), json!(sort.order.as_str()));
            clause.insert("_geo_distance".to_string(), Value::Object(distance));
        }
    }
    Value::Object(clause)
}
