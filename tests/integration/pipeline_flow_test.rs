use async_trait::async_trait;
use flowscribe_core::{
    image_key, interaction_key, CacheKind, CacheStore, DescribeFailurePolicy, DescriptionSource,
    Describer, FlowDocument, FlowscribeError, FlowscribeResult, GeneratedImage, ImageProvider,
    ImageRequest, Pipeline, RemoteImage, RetryConfig, RunConfig, TextPrompt,
};
use serde_json::json;
use std::path::Path;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use tempfile::{tempdir, TempDir};

struct MockDescriber {
    calls: AtomicU32,
    fail_interactions: bool,
}

impl MockDescriber {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicU32::new(0),
            fail_interactions: false,
        })
    }

    fn failing_interactions() -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicU32::new(0),
            fail_interactions: true,
        })
    }

    fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Describer for MockDescriber {
    fn provider_name(&self) -> &str {
        "mock"
    }

    async fn describe(&self, prompt: &TextPrompt) -> FlowscribeResult<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);

        if prompt.user.starts_with("Analyze this user flow") {
            return Ok(
                "The user searched Target for a scooter and added it to the cart.".to_string(),
            );
        }
        if self.fail_interactions {
            return Err(FlowscribeError::ApiServiceUnavailable("503".to_string()));
        }

        let text = prompt
            .user
            .lines()
            .find_map(|l| l.strip_prefix("- Clicked element text: "))
            .unwrap_or("something");
        Ok(format!("Clicked on {}", text))
    }
}

struct MockImages {
    generate_calls: AtomicU32,
    fail: bool,
}

impl MockImages {
    fn new(fail: bool) -> Arc<Self> {
        Arc::new(Self {
            generate_calls: AtomicU32::new(0),
            fail,
        })
    }

    fn calls(&self) -> u32 {
        self.generate_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ImageProvider for MockImages {
    fn provider_name(&self) -> &str {
        "mock-images"
    }

    async fn generate(&self, _request: &ImageRequest) -> FlowscribeResult<RemoteImage> {
        self.generate_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            return Err(FlowscribeError::ApiAuthenticationFailed {
                service: "mock".to_string(),
                message: "no image access".to_string(),
            });
        }
        Ok(RemoteImage {
            url: "https://cdn.example/img.png".to_string(),
            revised_prompt: None,
        })
    }

    async fn download(&self, _url: &str) -> FlowscribeResult<Vec<u8>> {
        Ok(b"\x89PNG\r\n".to_vec())
    }
}

fn add_to_cart_flow() -> FlowDocument {
    FlowDocument::from_json(
        &json!({
            "name": "Add Item to Cart",
            "uploadId": "upl-123",
            "createdBy": "tester",
            "useCase": "marketing",
            "schemaVersion": "1.0.0",
            "created": { "_seconds": 1700000000 },
            "steps": [
                {
                    "id": "c1", "type": "CHAPTER", "title": "Search",
                    "subtitle": "Finding a scooter on Target",
                    "clickContext": { "text": "Search bar", "elementType": "input" },
                    "pageContext": { "title": "Target", "url": "https://www.target.com" }
                },
                {
                    "id": "c2", "type": "CHAPTER", "title": "Pick",
                    "clickContext": { "text": "Razor scooter", "elementType": "image" },
                    "pageContext": { "title": "Results", "url": "https://www.target.com/s" }
                },
                {
                    "id": "c3", "type": "CHAPTER", "title": "Buy",
                    "clickContext": { "text": "Add to cart", "elementType": "button" },
                    "pageContext": { "title": "Product", "url": "https://www.target.com/p" }
                }
            ]
        })
        .to_string(),
    )
    .unwrap()
}

struct Workspace {
    dir: TempDir,
}

impl Workspace {
    fn new() -> Self {
        Self {
            dir: tempdir().unwrap(),
        }
    }

    fn cache(&self) -> Arc<CacheStore> {
        Arc::new(CacheStore::open(self.dir.path().join("cache")))
    }

    fn config(&self, skip_image: bool) -> RunConfig {
        RunConfig {
            skip_image,
            output_dir: self.dir.path().join("output"),
            ..RunConfig::default()
        }
    }

    fn pipeline(
        &self,
        describer: Arc<MockDescriber>,
        images: Option<Arc<MockImages>>,
        config: RunConfig,
    ) -> Pipeline {
        let images = images.map(|i| i as Arc<dyn ImageProvider>);
        Pipeline::new(describer, images, self.cache(), config).with_retry(RetryConfig::none())
    }
}

/// Drops the lines that legitimately differ between two runs.
fn stable_lines(path: &Path) -> Vec<String> {
    std::fs::read_to_string(path)
        .unwrap()
        .lines()
        .filter(|l| !l.starts_with("**Generated:**"))
        .map(str::to_string)
        .collect()
}

#[tokio::test]
async fn test_second_run_is_fully_cached() {
    let ws = Workspace::new();
    let flow = add_to_cart_flow();

    let first_describer = MockDescriber::new();
    let first_images = MockImages::new(false);
    let first = ws
        .pipeline(first_describer.clone(), Some(first_images.clone()), ws.config(false))
        .run(&flow)
        .await
        .unwrap();
    assert_eq!(first_describer.calls(), 4);
    assert_eq!(first_images.calls(), 1);

    let second_describer = MockDescriber::new();
    let second_images = MockImages::new(false);
    let second = ws
        .pipeline(second_describer.clone(), Some(second_images.clone()), ws.config(false))
        .run(&flow)
        .await
        .unwrap();

    assert_eq!(second_describer.calls(), 0);
    assert_eq!(second_images.calls(), 0);
    assert!(second.summary.cached);
    assert_eq!(second.cached_count(), 3);
    assert!(second.image.as_ref().unwrap().cached);
    assert_eq!(stable_lines(&first.report_path), stable_lines(&second.report_path));
}

#[tokio::test]
async fn test_add_item_to_cart_is_stable_across_runs() {
    let ws = Workspace::new();
    let flow = add_to_cart_flow();

    let first = ws
        .pipeline(MockDescriber::new(), None, ws.config(true))
        .run(&flow)
        .await
        .unwrap();
    let second = ws
        .pipeline(MockDescriber::new(), None, ws.config(true))
        .run(&flow)
        .await
        .unwrap();

    let descriptions = |o: &flowscribe_core::PipelineOutcome| {
        o.interactions
            .iter()
            .map(|i| i.description.clone())
            .collect::<Vec<_>>()
    };
    assert_eq!(
        descriptions(&first),
        vec![
            "Clicked on Search bar",
            "Clicked on Razor scooter",
            "Clicked on Add to cart"
        ]
    );
    assert_eq!(descriptions(&first), descriptions(&second));
    assert_eq!(first.summary.text, second.summary.text);

    let name = first.report_path.file_name().unwrap().to_string_lossy().to_string();
    assert!(name.starts_with("Flow_Analysis_Add_Item_to_Cart_upl-123_"));
    assert!(name.ends_with(".md"));
}

#[tokio::test]
async fn test_zero_interactions_still_reports() {
    let ws = Workspace::new();
    let flow = FlowDocument::from_json(
        &json!({
            "name": "Just Reading",
            "steps": [
                { "id": "c1", "type": "CHAPTER", "title": "Welcome" },
                { "id": "h1", "type": "HOTSPOT", "clickContext": { "text": "x" } }
            ]
        })
        .to_string(),
    )
    .unwrap();

    let describer = MockDescriber::new();
    let outcome = ws
        .pipeline(describer.clone(), None, ws.config(true))
        .run(&flow)
        .await
        .unwrap();

    assert!(outcome.interactions.is_empty());
    assert_eq!(describer.calls(), 1);
    let md = std::fs::read_to_string(&outcome.report_path).unwrap();
    assert!(md.contains("- **Total Interactions:** 0"));
}

#[tokio::test]
async fn test_image_failure_does_not_block_report() {
    let ws = Workspace::new();
    let images = MockImages::new(true);

    let outcome = ws
        .pipeline(MockDescriber::new(), Some(images.clone()), ws.config(false))
        .run(&add_to_cart_flow())
        .await
        .unwrap();

    assert_eq!(images.calls(), 1);
    assert!(outcome.image.is_none());
    let md = std::fs::read_to_string(&outcome.report_path).unwrap();
    assert!(md.contains("## Summary"));
    assert!(md.contains("### 3. Clicked on Add to cart"));
    assert!(md.contains("Image generation was not completed"));
    assert!(!md.contains("![Social Media Image]"));
}

#[tokio::test]
async fn test_cached_image_pointing_to_deleted_file_regenerates() {
    let ws = Workspace::new();
    let flow = add_to_cart_flow();

    let first = ws
        .pipeline(MockDescriber::new(), Some(MockImages::new(false)), ws.config(false))
        .run(&flow)
        .await
        .unwrap();
    let image = first.image.unwrap();
    std::fs::remove_file(&image.file_path).unwrap();

    // the cache record still points at the deleted file
    let key = image_key(&flow.name, &first.summary.text);
    let cached: GeneratedImage = ws.cache().get_as(&key).unwrap();
    assert_eq!(cached.file_path, image.file_path);

    let images = MockImages::new(false);
    let second = ws
        .pipeline(MockDescriber::new(), Some(images.clone()), ws.config(false))
        .run(&flow)
        .await
        .unwrap();

    assert_eq!(images.calls(), 1);
    let regenerated = second.image.unwrap();
    assert!(!regenerated.cached);
    assert!(regenerated.file_path.is_file());
}

#[tokio::test]
async fn test_corrupt_cache_entry_is_recomputed_and_overwritten() {
    let ws = Workspace::new();
    let cache_dir = ws.dir.path().join("cache");
    std::fs::create_dir_all(&cache_dir).unwrap();

    let key = interaction_key("c1", "Search bar");
    std::fs::write(cache_dir.join(format!("{}.json", key)), "{\"truncated\": ").unwrap();

    let outcome = ws
        .pipeline(MockDescriber::new(), None, ws.config(true))
        .run(&add_to_cart_flow())
        .await
        .unwrap();

    assert_eq!(outcome.interactions[0].source, DescriptionSource::Generated);
    assert_eq!(
        ws.cache().get_as::<String>(&key).as_deref(),
        Some("Clicked on Search bar")
    );
}

#[tokio::test]
async fn test_failure_policies() {
    let ws = Workspace::new();
    let flow = add_to_cart_flow();

    let placeholder = ws
        .pipeline(MockDescriber::failing_interactions(), None, ws.config(true))
        .run(&flow)
        .await
        .unwrap();
    let descriptions: Vec<_> = placeholder
        .interactions
        .iter()
        .map(|i| i.description.as_str())
        .collect();
    assert_eq!(
        descriptions,
        vec![
            "Interacted with: Search bar",
            "Clicked on image: Razor scooter",
            "Clicked on button: Add to cart"
        ]
    );
    assert_eq!(placeholder.fallback_count(), 3);
    // placeholders never reach the cache
    assert!(ws.cache().get(&interaction_key("c1", "Search bar")).is_none());

    let config = RunConfig {
        describe_failure_policy: DescribeFailurePolicy::FailFast,
        ..ws.config(true)
    };
    let describer = MockDescriber::failing_interactions();
    let err = ws
        .pipeline(describer.clone(), None, config)
        .run(&flow)
        .await
        .unwrap_err();

    assert_eq!(err.error_code(), "E4001");
    assert_eq!(describer.calls(), 1);
    let reports = std::fs::read_dir(ws.dir.path().join("output"))
        .unwrap()
        .filter(|e| {
            e.as_ref()
                .map(|e| e.path().extension().is_some_and(|x| x == "md"))
                .unwrap_or(false)
        })
        .count();
    // only the placeholder run produced a report
    assert_eq!(reports, 1);
}

#[tokio::test]
async fn test_parallel_description_matches_sequential() {
    let ws = Workspace::new();
    let flow = add_to_cart_flow();
    let config = RunConfig {
        describe_concurrency: 3,
        ..ws.config(true)
    };

    let describer = MockDescriber::new();
    let outcome = ws
        .pipeline(describer.clone(), None, config)
        .run(&flow)
        .await
        .unwrap();

    let numbers: Vec<_> = outcome.interactions.iter().map(|i| i.step_number).collect();
    assert_eq!(numbers, vec![1, 2, 3]);
    assert_eq!(outcome.interactions[1].step_id, "c2");
    assert_eq!(describer.calls(), 4);
}

#[tokio::test]
async fn test_disabled_cache_always_calls_out() {
    let ws = Workspace::new();
    let flow = add_to_cart_flow();
    let describer = MockDescriber::new();

    for _ in 0..2 {
        Pipeline::new(
            describer.clone(),
            None,
            Arc::new(CacheStore::disabled(ws.dir.path().join("cache"))),
            ws.config(true),
        )
        .run(&flow)
        .await
        .unwrap();
    }

    assert_eq!(describer.calls(), 8);
    assert!(!ws.dir.path().join("cache").exists());
}

#[tokio::test]
async fn test_summary_cache_entry_is_reused_for_same_count() {
    let ws = Workspace::new();
    let flow = add_to_cart_flow();
    let cache = ws.cache();

    let key = flowscribe_core::summary_key("Add Item to Cart", 3);
    cache.put(&key, CacheKind::Summary, &json!("Previously written summary."));

    let outcome = Pipeline::new(MockDescriber::new(), None, cache, ws.config(true))
        .run(&flow)
        .await
        .unwrap();

    assert!(outcome.summary.cached);
    assert_eq!(outcome.summary.text, "Previously written summary.");
}
