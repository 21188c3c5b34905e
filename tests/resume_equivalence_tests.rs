//! Resume equivalence: against a static source, a crawl interrupted by batch
//! pauses must converge to the same accumulated set - same ids, same first
//! discovery order - as an uninterrupted crawl.

use async_trait::async_trait;
use proptest::prelude::*;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use plate_watch::domain::errors::FetchError;
use plate_watch::domain::gateways::{SessionStore, SourceGateway};
use plate_watch::domain::session::{CrawlParams, CrawlSession};
use plate_watch::infrastructure::extractor::{ExtractorConfig, ListingExtractor};
use plate_watch::infrastructure::pagination::PaginationController;
use plate_watch::infrastructure::session_store::InMemorySessionStore;

const PAGE_SIZE: u32 = 10;

/// Static cursor-addressed source: page N at cursor N * PAGE_SIZE
struct StaticPagedSource {
    pages: Vec<String>,
}

#[async_trait]
impl SourceGateway for StaticPagedSource {
    async fn fetch(&self, cursor: u32) -> Result<Option<String>, FetchError> {
        let index = (cursor / PAGE_SIZE) as usize;
        Ok(self.pages.get(index).cloned())
    }
}

fn render_page(rows: &[(String, u64)]) -> String {
    let body = rows
        .iter()
        .map(|(id, price)| format!("<tr><td>{id}</td><td>{price} ₽</td></tr>"))
        .collect::<Vec<_>>()
        .join("\n");
    format!("<table>{body}</table>")
}

fn controller(pages: Vec<String>) -> (PaginationController, Arc<InMemorySessionStore>) {
    let store = Arc::new(InMemorySessionStore::new());
    let extractor = ListingExtractor::new(ExtractorConfig {
        min_price: 1,
        max_price: 100_000_000,
        ..Default::default()
    });
    (
        PaginationController::new(
            Arc::new(StaticPagedSource { pages }),
            store.clone(),
            extractor,
        ),
        store,
    )
}

fn params(batch_size: u32) -> CrawlParams {
    CrawlParams {
        page_size: PAGE_SIZE,
        batch_size,
        max_iterations: 100,
        request_delay_ms: 0,
        min_price: 1,
        max_price: 100_000_000,
    }
}

/// Drive a session to a terminal state through however many pause/resume
/// cycles it takes, returning the discovered ids in order.
async fn crawl_all(pages: Vec<String>, batch_size: u32) -> Vec<String> {
    let (controller, store) = controller(pages);
    let stop = CancellationToken::new();
    let mut session = CrawlSession::new("s".to_string(), params(batch_size));

    loop {
        let result = controller.run(&mut session, &stop).await.unwrap();
        if result.completed {
            break;
        }
        assert!(result.paused, "run must either pause or complete");
        // Simulate a process boundary: continue from the checkpoint only
        session = store.restore("s").await.unwrap().unwrap();
    }
    session
        .accumulated
        .iter()
        .map(|r| r.business_id.clone())
        .collect()
}

fn plate_pool() -> Vec<String> {
    vec![
        "A111AA77", "B222BB77", "C333CC77", "D444DD77", "E555EE77", "H666HH99", "K777KK50",
        "M888MM78",
    ]
    .into_iter()
    .map(String::from)
    .collect()
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    /// N fixed pages with possibly repeated ids: interrupted (small batch)
    /// and uninterrupted (huge batch) crawls agree on ids and order.
    #[test]
    fn interrupted_and_uninterrupted_runs_converge(
        page_specs in prop::collection::vec(
            prop::collection::vec((0usize..8, 1_000u64..100_000), 0..5),
            1..6,
        ),
        batch_size in 1u32..4,
    ) {
        let pool = plate_pool();
        let pages: Vec<String> = page_specs
            .iter()
            .map(|rows| {
                let rendered: Vec<(String, u64)> = rows
                    .iter()
                    .map(|(idx, price)| (pool[*idx].clone(), *price))
                    .collect();
                render_page(&rendered)
            })
            .collect();

        let rt = tokio::runtime::Builder::new_current_thread()
            .enable_time()
            .build()
            .unwrap();

        let interrupted = rt.block_on(crawl_all(pages.clone(), batch_size));
        let uninterrupted = rt.block_on(crawl_all(pages, 10_000));

        prop_assert_eq!(interrupted, uninterrupted);
    }
}

#[tokio::test]
async fn pause_resume_preserves_discovery_order() {
    let pages = vec![
        render_page(&[("A111AA77".to_string(), 10_000), ("B222BB77".to_string(), 20_000)]),
        render_page(&[("B222BB77".to_string(), 20_000), ("C333CC77".to_string(), 30_000)]),
        render_page(&[("D444DD77".to_string(), 40_000)]),
    ];

    let ids = crawl_all(pages, 2).await;
    assert_eq!(ids, vec!["A111AA77", "B222BB77", "C333CC77", "D444DD77"]);
}

#[tokio::test]
async fn checkpoint_carries_empty_response_counter() {
    // One real page, then exhaustion; the counter must survive checkpoints
    let pages = vec![render_page(&[("A111AA77".to_string(), 10_000)])];
    let (controller, store) = controller(pages);
    let stop = CancellationToken::new();
    let mut session = CrawlSession::new("s".to_string(), params(1));

    let first = controller.run(&mut session, &stop).await.unwrap();
    assert!(first.paused);

    let mut restored = store.restore("s").await.unwrap().unwrap();
    let second = controller.run(&mut restored, &stop).await.unwrap();
    assert!(second.completed);
    assert_eq!(second.count, 1);
}
