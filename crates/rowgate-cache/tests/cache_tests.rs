use async_trait::async_trait;
use http::{Method, StatusCode};
use mockall::mock;
use rowgate_cache::{CacheConfig, CacheError, CacheHandler, CacheStore};
use rowgate_chain::{Gateway, GatewayConfig};
use rowgate_query::{
    AccessPlan, Catalog, Collection, DataRow, Entity, Executor, FieldType, Index, RawResultSet,
    Result, SourceRegistry, SqlDialect, Table,
};
use rowgate_query_sql::SqlSource;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

mock! {
    Store {}

    #[async_trait]
    impl CacheStore for Store {
        async fn get(&self, key: &str) -> std::result::Result<Option<String>, CacheError>;
        async fn set_ex(&self, key: &str, value: String, ttl_secs: u64) -> std::result::Result<(), CacheError>;
    }
}

/// Counts executions and answers every read with one order
#[derive(Default)]
struct CountingExecutor {
    calls: AtomicUsize,
}

#[async_trait]
impl Executor for CountingExecutor {
    async fn execute(&self, plan: &AccessPlan) -> Result<RawResultSet> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if plan.is_mutation() {
            return Ok(RawResultSet::affected(1, 0));
        }
        let row: DataRow = json!({"orderid": 10248, "shipcity": "Reims"})
            .as_object()
            .cloned()
            .unwrap();
        Ok(RawResultSet::new(vec![row], 0))
    }
}

impl CountingExecutor {
    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

async fn gateway(store: MockStore, executor: Arc<CountingExecutor>) -> Gateway {
    let table = Table::new("orders", "northwind")
        .with_column("orderid", FieldType::Int64)
        .with_column("shipcity", FieldType::String)
        .with_index(Index::primary("orderid", None));
    let catalog =
        Catalog::new().with_collection(Collection::new("orders", Entity::new(table).unwrap()));

    let sources = SourceRegistry::new();
    sources
        .register_source(Arc::new(SqlSource::new(
            "northwind",
            SqlDialect::Postgres,
            executor,
        )))
        .await;

    let config = CacheConfig::new("cache.internal", 6379).with_ttl_secs(60);
    Gateway::new(
        GatewayConfig::default().with_base_url("http://api.local/northwind"),
        catalog,
        sources,
    )
    .unwrap()
    .with_handler(Arc::new(CacheHandler::new(Arc::new(store), config)))
}

fn cached_body() -> Value {
    json!({"meta": {"rowCount": 1}, "data": [{"href": "cached"}]})
}

#[tokio::test]
async fn test_hit_short_circuits_the_chain() {
    let mut store = MockStore::new();
    store
        .expect_get()
        .withf(|key| key == "api.local/northwind/orders?shipcity=Reims")
        .times(1)
        .returning(|_| Ok(Some(cached_body().to_string())));
    store.expect_set_ex().never();

    let executor = Arc::new(CountingExecutor::default());
    let gateway = gateway(store, executor.clone()).await;

    let res = gateway
        .service(Method::GET, "orders?shipcity=Reims", None)
        .await;

    assert_eq!(res.status, StatusCode::OK);
    assert_eq!(res.body, Some(cached_body()));
    assert_eq!(executor.calls(), 0);
    assert!(res.plans.is_empty());
}

#[tokio::test]
async fn test_miss_runs_the_chain_once_and_stores() {
    let stored = Arc::new(Mutex::new(Vec::new()));

    let mut store = MockStore::new();
    store.expect_get().times(1).returning(|_| Ok(None));
    let sink = stored.clone();
    store
        .expect_set_ex()
        .times(1)
        .returning(move |key, value, ttl| {
            sink.lock().unwrap().push((key.to_string(), value, ttl));
            Ok(())
        });

    let executor = Arc::new(CountingExecutor::default());
    let gateway = gateway(store, executor.clone()).await;

    let res = gateway.service(Method::GET, "orders/10248", None).await;

    assert_eq!(res.status, StatusCode::OK);
    assert_eq!(executor.calls(), 1);

    let stored = stored.lock().unwrap();
    assert_eq!(stored.len(), 1);
    let (key, value, ttl) = &stored[0];
    assert_eq!(key, "api.local/northwind/orders/10248");
    assert_eq!(*ttl, 60);
    let value: Value = serde_json::from_str(value).unwrap();
    assert_eq!(Some(value), res.body);
}

#[tokio::test]
async fn test_key_ignores_parameter_order_and_bypass() {
    let keys = Arc::new(Mutex::new(Vec::new()));

    let mut store = MockStore::new();
    let seen = keys.clone();
    store.expect_get().returning(move |key| {
        seen.lock().unwrap().push(key.to_string());
        Ok(None)
    });
    store.expect_set_ex().returning(|_, _, _| Ok(()));

    let executor = Arc::new(CountingExecutor::default());
    let gateway = gateway(store, executor.clone()).await;

    gateway
        .service(Method::GET, "orders?shipcity=Reims&sort=-orderid", None)
        .await;
    gateway
        .service(Method::GET, "orders?sort=-orderid&shipcity=Reims", None)
        .await;

    let keys = keys.lock().unwrap();
    assert_eq!(keys.len(), 2);
    assert_eq!(keys[0], keys[1]);
    assert_eq!(keys[0], "api.local/northwind/orders?shipcity=Reims&sort=-orderid");
}

#[tokio::test]
async fn test_bypass_parameter_skips_the_cache() {
    let mut store = MockStore::new();
    store.expect_get().never();
    store.expect_set_ex().never();

    let executor = Arc::new(CountingExecutor::default());
    let gateway = gateway(store, executor.clone()).await;

    let res = gateway
        .service(Method::GET, "orders?shipcity=Reims&nocache", None)
        .await;

    // The bypass parameter never reaches the query
    assert_eq!(res.status, StatusCode::OK);
    assert_eq!(executor.calls(), 1);
    assert!(!res.plans[0].contains("nocache"));
}

#[tokio::test]
async fn test_repeated_bypass_parameter_is_fully_stripped() {
    let mut store = MockStore::new();
    store.expect_get().never();
    store.expect_set_ex().never();

    let executor = Arc::new(CountingExecutor::default());
    let gateway = gateway(store, executor.clone()).await;

    let res = gateway
        .service(Method::GET, "orders?nocache&shipcity=Reims&nocache=1", None)
        .await;

    assert_eq!(res.status, StatusCode::OK);
    assert_eq!(executor.calls(), 1);
    assert!(!res.plans[0].contains("nocache"));
}

#[tokio::test]
async fn test_store_failures_are_a_miss() {
    let mut store = MockStore::new();
    store
        .expect_get()
        .returning(|_| Err(CacheError::Connection("connection refused".into())));
    store
        .expect_set_ex()
        .times(1)
        .returning(|_, _, _| Err(CacheError::Timeout(2500)));

    let executor = Arc::new(CountingExecutor::default());
    let gateway = gateway(store, executor.clone()).await;

    let res = gateway.service(Method::GET, "orders/10248", None).await;

    assert_eq!(res.status, StatusCode::OK);
    assert_eq!(executor.calls(), 1);
    assert_eq!(res.find("data.0.shipcity"), Some(&json!("Reims")));
}

#[tokio::test]
async fn test_unreadable_entry_is_a_miss() {
    let mut store = MockStore::new();
    store
        .expect_get()
        .returning(|_| Ok(Some("not json".to_string())));
    store.expect_set_ex().times(1).returning(|_, _, _| Ok(()));

    let executor = Arc::new(CountingExecutor::default());
    let gateway = gateway(store, executor.clone()).await;

    let res = gateway.service(Method::GET, "orders/10248", None).await;
    assert_eq!(res.status, StatusCode::OK);
    assert_eq!(executor.calls(), 1);
}

#[tokio::test]
async fn test_errors_and_mutations_are_not_cached() {
    let mut store = MockStore::new();
    store.expect_get().times(1).returning(|_| Ok(None));
    store.expect_set_ex().never();

    let executor = Arc::new(CountingExecutor::default());
    let gateway = gateway(store, executor.clone()).await;

    // Unknown attribute fails in the planner
    let res = gateway.service(Method::GET, "orders?colour=red", None).await;
    assert_eq!(res.status, StatusCode::BAD_REQUEST);

    let res = gateway
        .service(Method::PUT, "orders/10248", Some(json!({"shipcity": "Lyon"})))
        .await;
    assert_eq!(res.status, StatusCode::OK);
    assert_eq!(executor.calls(), 1);
}

#[tokio::test]
async fn test_nested_requests_bypass_the_cache() {
    let mut store = MockStore::new();
    store.expect_get().never();
    store.expect_set_ex().never();

    let executor = Arc::new(CountingExecutor::default());
    let gateway = gateway(store, executor.clone()).await;

    let body = json!(["orders/10248", "orders/10249"]);
    let res = gateway.service(Method::DELETE, "orders", Some(body)).await;

    assert_eq!(res.status, StatusCode::OK);
    // One union selection and one delete
    assert_eq!(executor.calls(), 2);
}
