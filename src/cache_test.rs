use super::*;
use serde_json::json;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Serves canned subscribe results straight into the cache it wraps.
struct MockFetcher {
    cache: Arc<Cache>,
    responses: HashMap<String, Result<Value, frames::ResError>>,
    calls: AtomicUsize,
    delay: std::time::Duration,
}

impl MockFetcher {
    fn new(cache: &Arc<Cache>) -> Self {
        Self { cache: cache.clone(), responses: HashMap::new(), calls: AtomicUsize::new(0), delay: std::time::Duration::ZERO }
    }

    fn serve(mut self, rid: &str, result: Value) -> Self {
        self.responses.insert(rid.to_owned(), Ok(result));
        self
    }

    fn fail(mut self, rid: &str, code: &str) -> Self {
        self.responses.insert(rid.to_owned(), Err(frames::ResError::new(code, "nope")));
        self
    }

    fn slow(mut self, delay: std::time::Duration) -> Self {
        self.delay = delay;
        self
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ResourceFetcher for MockFetcher {
    async fn fetch(&self, rid: &str) -> Result<(), RequestError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(self.delay).await;
        match self.responses.get(rid) {
            Some(Ok(result)) => {
                if let Some(set) = ResourceSet::from_value(result) {
                    self.cache.merge(&set);
                }
                Ok(())
            }
            Some(Err(err)) => Err(RequestError::Protocol(err.clone())),
            None => Err(RequestError::Timeout { id: 99 }),
        }
    }
}

fn cache_with(rid: &str, model: Value) -> Arc<Cache> {
    let cache = Arc::new(Cache::new());
    cache.set(rid, Resource::model(model)).expect("set");
    cache
}

fn scalar(value: Value) -> ResourceValue {
    ResourceValue::Scalar(value)
}

// =============================================================================
// DECODING
// =============================================================================

#[test]
fn objects_with_rid_decode_as_references() {
    assert_eq!(
        ResourceValue::from_json(json!({"rid": "core.char.c1", "soft": true})),
        ResourceValue::Reference("core.char.c1".into())
    );
    assert!(matches!(ResourceValue::from_json(json!({"rid": 5})), ResourceValue::Mapping(_)));
    assert!(matches!(ResourceValue::from_json(json!({"data": ["a"]})), ResourceValue::Mapping(_)));
    assert!(matches!(ResourceValue::from_json(json!([1, 2])), ResourceValue::Sequence(_)));
    assert_eq!(ResourceValue::from_json(json!("x")), scalar(json!("x")));
}

#[test]
fn to_json_restores_wire_shape() {
    let wire = json!({"name": "Hall", "exits": [{"rid": "core.exit.e1"}], "data": {"n": 1}});
    assert_eq!(ResourceValue::from_json(wire.clone()).to_json(), wire);
}

// =============================================================================
// LOOKUP
// =============================================================================

#[tokio::test]
async fn get_descends_models_and_sequences() {
    let cache = cache_with("core.room.r1", json!({"name": "Hall", "tags": ["a", "b"]}));
    let fetcher = MockFetcher::new(&cache);

    assert_eq!(cache.get(&fetcher, "core.room.r1", &["name"]).await, Some(scalar(json!("Hall"))));
    assert_eq!(cache.get(&fetcher, "core.room.r1", &["tags", "1"]).await, Some(scalar(json!("b"))));
    assert_eq!(cache.get(&fetcher, "core.room.r1", &["tags", "7"]).await, None);
    assert_eq!(cache.get(&fetcher, "core.room.r1", &["missing"]).await, None);
    assert_eq!(fetcher.calls(), 0);
}

#[tokio::test]
async fn leaf_reference_is_dereferenced_transparently() {
    let cache = cache_with("core.bot.b1", json!({"char": {"rid": "core.char.c1"}}));
    cache.set("core.char.c1", Resource::model(json!({"id": "c1", "name": "Ada"}))).unwrap();
    let fetcher = MockFetcher::new(&cache);

    let Some(ResourceValue::Mapping(model)) = cache.get(&fetcher, "core.bot.b1", &["char"]).await else {
        panic!("reference should resolve to the character model");
    };
    assert_eq!(model.get("name"), Some(&scalar(json!("Ada"))));
    assert_eq!(cache.get(&fetcher, "core.bot.b1", &["char", "id"]).await, Some(scalar(json!("c1"))));
}

#[tokio::test]
async fn reference_mid_path_fetches_the_target() {
    let cache = cache_with("core.char.c1.owned", json!({"inRoom": {"rid": "core.room.r9"}}));
    let fetcher = MockFetcher::new(&cache)
        .serve("core.room.r9", json!({"models": {"core.room.r9": {"id": "r9", "name": "Tavern"}}}));

    assert_eq!(
        cache.get(&fetcher, "core.char.c1.owned", &["inRoom", "id"]).await,
        Some(scalar(json!("r9")))
    );
    assert_eq!(fetcher.calls(), 1);
    assert!(cache.contains("core.room.r9"));

    cache.get(&fetcher, "core.char.c1.owned", &["inRoom", "name"]).await;
    assert_eq!(fetcher.calls(), 1, "second lookup is served from cache");
}

#[tokio::test]
async fn concurrent_lookups_share_one_fetch() {
    let cache = Arc::new(Cache::new());
    let fetcher = MockFetcher::new(&cache)
        .serve("core.char.c3", json!({"models": {"core.char.c3": {"name": "Ama", "awake": true}}}))
        .slow(std::time::Duration::from_millis(50));

    let (name, awake) = tokio::join!(
        cache.get(&fetcher, "core.char.c3", &["name"]),
        cache.get(&fetcher, "core.char.c3", &["awake"]),
    );
    assert_eq!(name, Some(scalar(json!("Ama"))));
    assert_eq!(awake, Some(scalar(json!(true))));
    assert_eq!(fetcher.calls(), 1, "only one subscribe goes out");
}

#[tokio::test]
async fn concurrent_failed_fetch_is_not_repeated() {
    let cache = Arc::new(Cache::new());
    let fetcher = MockFetcher::new(&cache)
        .fail("core.char.gone", frames::NOT_FOUND)
        .slow(std::time::Duration::from_millis(50));

    let (first, second) = tokio::join!(
        cache.get(&fetcher, "core.char.gone", &["name"]),
        cache.get(&fetcher, "core.char.gone", &["name"]),
    );
    assert_eq!((first, second), (None, None));
    assert_eq!(fetcher.calls(), 1);
}

#[tokio::test]
async fn errored_rid_is_memoized_until_clear() {
    let cache = Arc::new(Cache::new());
    let fetcher = MockFetcher::new(&cache).fail("core.char.gone", frames::NOT_FOUND);
    let default = scalar(json!("unknown"));

    for _ in 0..3 {
        let value = cache.get_or(&fetcher, "core.char.gone", &["name"], default.clone()).await;
        assert_eq!(value, default);
    }
    assert_eq!(fetcher.calls(), 1);
    assert!(cache.is_errored("core.char.gone"));

    cache.clear();
    assert!(!cache.is_errored("core.char.gone"));
    cache.get(&fetcher, "core.char.gone", &[]).await;
    assert_eq!(fetcher.calls(), 2);
}

#[tokio::test]
async fn timeouts_are_not_memoized() {
    let cache = Arc::new(Cache::new());
    let fetcher = MockFetcher::new(&cache);

    assert_eq!(cache.get(&fetcher, "core.char.slow", &["name"]).await, None);
    assert_eq!(cache.get(&fetcher, "core.char.slow", &["name"]).await, None);
    assert_eq!(fetcher.calls(), 2);
    assert!(!cache.is_errored("core.char.slow"));
}

#[tokio::test]
async fn set_errors_mark_rids_errored() {
    let cache = Arc::new(Cache::new());
    let fetcher = MockFetcher::new(&cache).serve(
        "core.char.c2",
        json!({"errors": {"core.char.c2": {"code": "system.accessDenied", "message": "no"}}}),
    );

    assert_eq!(cache.get(&fetcher, "core.char.c2", &["name"]).await, None);
    assert!(cache.is_errored("core.char.c2"));
    cache.get(&fetcher, "core.char.c2", &["name"]).await;
    assert_eq!(fetcher.calls(), 1);
}

#[tokio::test]
async fn reference_cycles_terminate() {
    let cache = cache_with("a", json!({"next": {"rid": "b"}}));
    cache.set("b", Resource::model(json!({"next": {"rid": "a"}}))).unwrap();
    let fetcher = MockFetcher::new(&cache);

    let path = ["next"; 40];
    assert_eq!(cache.get(&fetcher, "a", &path).await, None);
}

// =============================================================================
// MUTATION
// =============================================================================

#[tokio::test]
async fn change_overwrites_and_deletes() {
    let cache = cache_with("core.room.R1", json!({"name": "Old Hall", "desc": "dusty"}));
    let fetcher = MockFetcher::new(&cache);

    let patch = json!({"name": "Tavern", "desc": {"action": "delete"}});
    cache.change("core.room.R1", patch.as_object().unwrap()).unwrap();

    assert_eq!(cache.get(&fetcher, "core.room.R1", &["name"]).await, Some(scalar(json!("Tavern"))));
    assert_eq!(cache.get(&fetcher, "core.room.R1", &["desc"]).await, None);
}

#[test]
fn change_rejects_missing_and_collections() {
    let cache = Cache::new();
    let values = Map::new();
    assert!(matches!(cache.change("nope", &values), Err(CacheError::NotCached { .. })));

    cache.set("list", Resource::collection(json!([]))).unwrap();
    assert!(matches!(cache.change("list", &values), Err(CacheError::ShapeMismatch { .. })));
}

#[test]
fn add_then_remove_leaves_collection_empty() {
    let cache = Cache::new();
    cache.set("core.chars.awake", Resource::collection(json!([]))).unwrap();

    cache.add("core.chars.awake", 0, json!({"rid": "core.char.c1"})).unwrap();
    let removed = cache.remove("core.chars.awake", 0).unwrap();

    assert_eq!(removed, ResourceValue::Reference("core.char.c1".into()));
    assert_eq!(cache.resource("core.chars.awake"), Some(Resource::Collection(Vec::new())));
}

#[test]
fn positional_ops_check_bounds_and_shape() {
    let cache = Cache::new();
    cache.set("list", Resource::collection(json!(["a"]))).unwrap();
    cache.set("model", Resource::model(json!({}))).unwrap();

    assert_eq!(
        cache.add("list", 3, json!("x")),
        Err(CacheError::IndexOutOfRange { rid: "list".into(), idx: 3, len: 1 })
    );
    assert!(matches!(cache.remove("list", 1), Err(CacheError::IndexOutOfRange { .. })));
    assert!(matches!(cache.add("model", 0, json!("x")), Err(CacheError::NotCollection { .. })));
    assert!(matches!(cache.remove("absent", 0), Err(CacheError::NotCached { .. })));

    cache.add("list", 1, json!("b")).unwrap();
    assert_eq!(
        cache.resource("list"),
        Some(Resource::Collection(vec![scalar(json!("a")), scalar(json!("b"))]))
    );
}

#[test]
fn set_refuses_shape_change() {
    let cache = Cache::new();
    cache.set("core.nodes", Resource::collection(json!([]))).unwrap();
    let err = cache.set("core.nodes", Resource::model(json!({}))).unwrap_err();
    assert_eq!(err.error_code(), "E_SHAPE_MISMATCH");
    assert!(matches!(cache.resource("core.nodes"), Some(Resource::Collection(_))));
}

#[test]
fn merge_stores_models_and_collections() {
    let cache = Cache::new();
    let set = ResourceSet::from_value(&json!({
        "models": {"core.info": {"version": "1"}},
        "collections": {"core.nodes": [{"rid": "core.node.n1"}]},
        "errors": {"tag.info": {"code": "system.accessDenied", "message": "no"}}
    }))
    .unwrap();
    cache.merge(&set);

    assert_eq!(cache.len(), 2);
    assert!(cache.contains("core.info"));
    assert!(cache.is_errored("tag.info"));
    assert!(cache.delete("core.info").is_some());
    assert!(!cache.contains("core.info"));
    cache.clear();
    assert!(cache.is_empty());
}
