//! Elasticsearch transport integration tests.
//!
//! Configuration tests run everywhere. The `es_integration` module needs
//! Docker and starts a single shared cluster through testcontainers.
//!
//! Run with:
//!   cargo test -p nexxus-persistence --test elasticsearch_tests -- --include-ignored

#![cfg(feature = "elasticsearch")]

mod common;

use nexxus_persistence::backends::elasticsearch::ElasticsearchTransport;
use nexxus_persistence::{ErrorKind, ObjectStore, StoreConfig};

// ============================================================================
// Configuration Tests (no cluster required)
// ============================================================================

#[test]
fn test_store_builds_without_connecting() {
    let store = ObjectStore::elasticsearch(StoreConfig::default()).unwrap();
    assert!(!store.connection().is_connected());
    assert_eq!(store.resolver().prefix(), "nexxus");
}

#[test]
fn test_store_rejects_empty_configuration() {
    let config = StoreConfig {
        hosts: Vec::new(),
        host: None,
        ..Default::default()
    };
    let err = ObjectStore::elasticsearch(config).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ServerFailure);
}

#[test]
fn test_single_host_fallback() {
    let config = StoreConfig {
        hosts: Vec::new(),
        host: Some("http://search:9200".to_string()),
        ..Default::default()
    };
    let transport = ElasticsearchTransport::new(&config).unwrap();
    assert_eq!(transport.node_urls(), vec!["http://search:9200"]);
}

// ============================================================================
// Integration Tests (requires Docker for testcontainers)
// ============================================================================

mod es_integration {
    use std::sync::atomic::{AtomicU64, Ordering};

    use elasticsearch::http::transport::Transport;
    use elasticsearch::indices::IndicesRefreshParts;
    use elasticsearch::Elasticsearch;
    use nexxus_persistence::query::FilterBuilder;
    use nexxus_persistence::types::{
        CountOptions, DatabaseObject, DeleteRequest, ObjectRef, Patch, SearchOptions,
    };
    use nexxus_persistence::{ConnectionEvent, ErrorKind, ObjectStore, StoreConfig};
    use serde_json::json;
    use testcontainers::ImageExt;
    use testcontainers::runners::AsyncRunner;
    use testcontainers_modules::elastic_search::ElasticSearch;
    use tokio::sync::OnceCell;

    use super::common::CollectingHandler;

    /// Shared Elasticsearch container reused across all tests in this module.
    struct SharedEs {
        url: String,
        /// Kept alive for the duration of the test binary.
        _container: testcontainers::ContainerAsync<ElasticSearch>,
    }

    static SHARED_ES: OnceCell<SharedEs> = OnceCell::const_new();
    static NEXT_PREFIX: AtomicU64 = AtomicU64::new(0);

    async fn shared_es() -> &'static SharedEs {
        SHARED_ES
            .get_or_init(|| async {
                let container = ElasticSearch::default()
                    .with_env_var("ES_JAVA_OPTS", "-Xms256m -Xmx256m")
                    .with_startup_timeout(std::time::Duration::from_secs(120))
                    .start()
                    .await
                    .expect("Failed to start Elasticsearch container");

                let port = container
                    .get_host_port_ipv4(9200)
                    .await
                    .expect("Failed to get host port");
                let host = container.get_host().await.expect("Failed to get host");

                SharedEs {
                    url: format!("http://{}:{}", host, port),
                    _container: container,
                }
            })
            .await
    }

    /// Creates a connected store with an index prefix unique to the test.
    async fn create_store() -> ObjectStore {
        let es = shared_es().await;
        let prefix = format!(
            "nexxus-test-{}-{}",
            std::process::id(),
            NEXT_PREFIX.fetch_add(1, Ordering::SeqCst)
        );

        let config = StoreConfig {
            index_prefix: prefix,
            scroll_page_size: 2,
            ..StoreConfig::with_hosts([es.url.clone()])
        };
        let store = ObjectStore::elasticsearch(config).expect("Failed to build store");
        store
            .connection()
            .connect()
            .await
            .expect("Failed to connect to Elasticsearch");
        store
    }

    /// Makes freshly written local objects visible to search.
    async fn refresh(store: &ObjectStore) {
        let es = shared_es().await;
        let client = Elasticsearch::new(Transport::single_node(&es.url).expect("client"));
        let pattern = format!("{}-*", store.resolver().prefix());
        client
            .indices()
            .refresh(IndicesRefreshParts::Index(&[pattern.as_str()]))
            .send()
            .await
            .expect("refresh failed");
    }

    fn comment(id: &str, likes: i64) -> DatabaseObject {
        DatabaseObject::new("comment", id)
            .with_application("app-1")
            .with_attribute("status", json!(if likes % 2 == 0 { "open" } else { "closed" }))
            .with_attribute("likes", json!(likes))
    }

    #[tokio::test]
    #[ignore = "requires Docker"]
    async fn es_integration_connect_emits_ready() {
        let es = shared_es().await;
        let store =
            ObjectStore::elasticsearch(StoreConfig::with_hosts([es.url.clone()])).unwrap();
        let mut events = store.connection().subscribe();

        store.connection().connect().await.unwrap();
        assert_eq!(events.recv().await.unwrap(), ConnectionEvent::Ready);
    }

    #[tokio::test]
    #[ignore = "requires Docker"]
    async fn es_integration_create_get_delete() {
        let store = create_store().await;

        let created = store
            .create_objects(vec![comment("c-1", 1), comment("c-2", 2)])
            .await
            .unwrap()
            .unwrap();
        assert!(created.is_success());

        let refs = vec![
            ObjectRef::new("comment", "c-1").with_application("app-1"),
            ObjectRef::new("comment", "c-9").with_application("app-1"),
        ];
        let fetched = store.get_objects(&refs).await.unwrap();
        assert_eq!(fetched.results.len(), 1);
        assert_eq!(fetched.results[0].get("likes"), Some(&json!(1)));
        assert_eq!(fetched.errors[0].kind(), ErrorKind::ObjectNotFound);

        let mut request = DeleteRequest::new();
        request.insert("c-1", comment("c-1", 1));
        request.insert("c-9", comment("c-9", 9));
        let deleted = store.delete_objects(request).await.unwrap();
        assert_eq!(deleted.results, vec!["c-1".to_string()]);
        assert_eq!(deleted.errors[0].kind(), ErrorKind::ObjectNotFound);
    }

    #[tokio::test]
    #[ignore = "requires Docker"]
    async fn es_integration_application_provisioning() {
        let store = create_store().await;

        let application = DatabaseObject::new("application", "app-1")
            .with_attribute("schema", json!(["comment", "thread"]));
        store.create_objects(vec![application]).await.unwrap();

        // provisioned indexes exist even though they are still empty
        let count = store
            .count_objects("thread", &CountOptions::new().with_application("app-1"))
            .await
            .unwrap();
        assert_eq!(count.count, 0);

        let apps = store
            .search_objects(&SearchOptions::new("application"), None)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(apps.results.len(), 1);
    }

    #[tokio::test]
    #[ignore = "requires Docker"]
    async fn es_integration_search_count_and_scan() {
        let store = create_store().await;
        let objects = (1..=5).map(|i| comment(&format!("c-{i}"), i)).collect();
        store.create_objects(objects).await.unwrap();
        refresh(&store).await;

        let open = FilterBuilder::new().add_filter("is", "status", json!("open"));
        let result = store
            .search_objects(
                &SearchOptions::new("comment")
                    .with_application("app-1")
                    .with_filters(open.clone()),
                None,
            )
            .await
            .unwrap()
            .unwrap();
        assert_eq!(result.results.len(), 2);

        let count = store
            .count_objects(
                "comment",
                &CountOptions::new()
                    .with_application("app-1")
                    .with_filters(open)
                    .with_aggregation(json!({"sum": {"field": "likes"}})),
            )
            .await
            .unwrap();
        assert_eq!(count.count, 2);
        assert_eq!(count.aggregation, Some(json!(6.0)));

        let mut handler = CollectingHandler::new();
        store
            .search_objects(
                &SearchOptions::new("comment")
                    .with_application("app-1")
                    .with_fields(["likes"]),
                Some(&mut handler),
            )
            .await
            .unwrap();
        assert_eq!(handler.objects().len(), 5);
        assert_eq!(handler.pages.len(), 3);
    }

    #[tokio::test]
    #[ignore = "requires Docker"]
    async fn es_integration_versioned_update() {
        let store = create_store().await;
        store.create_objects(vec![comment("c-1", 1)]).await.unwrap();

        let patches = vec![
            Patch::increment("comment/c-1/likes", json!(4)).with_application("app-1"),
            Patch::append("comment/c-1/tags", json!("hot")).with_application("app-1"),
        ];
        let result = store.update_objects(patches).await.unwrap();
        assert!(result.is_success());

        let fetched = store
            .get_objects(&[ObjectRef::new("comment", "c-1").with_application("app-1")])
            .await
            .unwrap();
        let object = &fetched.results[0];
        assert_eq!(object.get("likes"), Some(&json!(5)));
        assert_eq!(object.get("tags"), Some(&json!(["hot"])));
        assert_eq!(object.version, 2);
    }
}
