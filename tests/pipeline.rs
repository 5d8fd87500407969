use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use futures::stream::{self, BoxStream, StreamExt};
use tokio::io::BufReader;
use tokio::sync::{mpsc, Notify};

use paper_finder::ai::{ClassificationOracle, Judgement};
use paper_finder::config::{AiConfig, FailurePolicy};
use paper_finder::controller::{SearchController, SearchHandle, SearchState};
use paper_finder::error::ClassificationError;
use paper_finder::link::DeepLink;
use paper_finder::presenter::{run_session, LinkOpener, Presenter};
use paper_finder::search::{
    build_matcher, run_search, MatchResult, SearchEvent, SearchQuery, SearchSummary,
};
use paper_finder::source::{Channel, ChatKind, Document, HistoryBounds, Message, MessageSource};
use paper_finder::{Result, SearchError};

/// In-memory account: channels and their histories, newest first.
#[derive(Default)]
struct FakeSource {
    channels: Vec<Channel>,
    history: HashMap<i64, Vec<Message>>,
    failing: Option<i64>,
    gate: Option<Arc<Notify>>,
    /// Time `channels()` takes to answer.
    delay: Option<Duration>,
}

impl FakeSource {
    fn with_channel(mut self, channel: Channel, messages: Vec<Message>) -> Self {
        self.history.insert(channel.id, messages);
        self.channels.push(channel);
        self
    }
}

#[async_trait]
impl MessageSource for FakeSource {
    async fn channels(&self) -> Result<Vec<Channel>> {
        if let Some(gate) = &self.gate {
            gate.notified().await;
        }
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        Ok(self.channels.clone())
    }

    async fn resolve(&self, handle: &str) -> Result<Channel> {
        let handle = handle.trim_start_matches('@');
        self.channels
            .iter()
            .find(|c| c.username.as_deref() == Some(handle) || c.id.to_string() == handle)
            .cloned()
            .ok_or_else(|| SearchError::ChatNotFound(handle.to_string()))
    }

    fn history<'a>(
        &'a self,
        channel: &'a Channel,
        limit: Option<usize>,
    ) -> BoxStream<'a, Result<Message>> {
        if self.failing == Some(channel.id) {
            return stream::once(async {
                Err(SearchError::SourceUnavailable("connection reset".to_string()))
            })
            .boxed();
        }
        let messages = self.history.get(&channel.id).cloned().unwrap_or_default();
        let limit = limit.unwrap_or(usize::MAX);
        stream::iter(messages.into_iter().take(limit).map(Ok)).boxed()
    }
}

/// Relevant only when the text mentions a market. Slower for earlier messages
/// so answers come back out of order.
struct MarketOracle {
    calls: AtomicUsize,
}

impl MarketOracle {
    fn new() -> Self {
        Self {
            calls: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl ClassificationOracle for MarketOracle {
    async fn classify(
        &self,
        text: &str,
        _keywords: &str,
    ) -> std::result::Result<Judgement, ClassificationError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(40u64.saturating_sub(call as u64 * 10))).await;
        if text.to_lowercase().contains("market") {
            Ok(Judgement::relevant(0.9))
        } else {
            Ok(Judgement::not_relevant(0.9))
        }
    }
}

struct FailingOracle;

#[async_trait]
impl ClassificationOracle for FailingOracle {
    async fn classify(
        &self,
        _text: &str,
        _keywords: &str,
    ) -> std::result::Result<Judgement, ClassificationError> {
        Err(ClassificationError::Backend("model not loaded".to_string()))
    }
}

struct HangingOracle;

#[async_trait]
impl ClassificationOracle for HangingOracle {
    async fn classify(
        &self,
        _text: &str,
        _keywords: &str,
    ) -> std::result::Result<Judgement, ClassificationError> {
        tokio::time::sleep(Duration::from_secs(60)).await;
        Ok(Judgement::relevant(1.0))
    }
}

fn channel(id: i64, title: &str, username: Option<&str>) -> Channel {
    Channel {
        id,
        title: title.to_string(),
        username: username.map(str::to_string),
        kind: ChatKind::Broadcast,
    }
}

fn message(channel: &Channel, id: i32, text: &str, date: DateTime<Utc>) -> Message {
    Message {
        chat_id: channel.id,
        chat_username: channel.username.clone(),
        chat_title: channel.title.clone(),
        chat_kind: channel.kind,
        id,
        text: text.to_string(),
        date,
        sender: None,
        document: None,
    }
}

fn with_document(mut message: Message, name: &str, size: i64) -> Message {
    message.document = Some(Document {
        file_name: name.to_string(),
        size,
    });
    message
}

fn march_12() -> NaiveDate {
    NaiveDate::from_ymd_opt(2025, 3, 12).unwrap()
}

/// Midday of `date` in local time.
fn midday(date: NaiveDate) -> DateTime<Utc> {
    HistoryBounds::day(date).since.unwrap() + chrono::Duration::hours(12)
}

fn ai_config() -> AiConfig {
    AiConfig {
        timeout: Duration::from_millis(200),
        concurrency: 4,
        ..Default::default()
    }
}

async fn search<S: MessageSource>(
    source: &S,
    oracle: Arc<dyn ClassificationOracle>,
    ai: &AiConfig,
    query: &SearchQuery,
) -> Result<(SearchSummary, Vec<MatchResult>)> {
    let matcher = build_matcher(query, oracle, ai)?;
    let (tx, mut rx) = mpsc::unbounded_channel();
    let summary = run_search(source, &matcher, query, ai.concurrency, &tx).await?;
    drop(tx);
    let mut results = Vec::new();
    while let Some(event) = rx.recv().await {
        if let SearchEvent::Match(result) = event {
            results.push(result);
        }
    }
    Ok((summary, results))
}

async fn drain(mut handle: SearchHandle) -> Vec<SearchEvent> {
    let mut events = Vec::new();
    while let Some(event) = handle.events.recv().await {
        events.push(event);
    }
    handle.join().await;
    events
}

#[tokio::test]
async fn test_newspaper_search_returns_editions_in_source_order() {
    let papers = channel(100, "Daily ePapers", Some("dailyepapers"));
    let at = midday(march_12());
    let source = FakeSource::default().with_channel(
        papers.clone(),
        vec![
            message(&papers, 30, "Times of India Hyderabad edition 12 Mar, link:X", at),
            message(&papers, 29, "random chat", at),
            message(&papers, 28, "TOI Hyd 12 Mar, link:Y", at),
        ],
    );

    let query = SearchQuery::newspaper(march_12());
    let (summary, results) = search(&source, Arc::new(FailingOracle), &ai_config(), &query)
        .await
        .unwrap();

    let ids: Vec<i32> = results.iter().map(|r| r.message.id).collect();
    assert_eq!(ids, vec![30, 28]);
    assert_eq!(summary.matches, 2);
    assert_eq!(summary.scanned, 3);

    assert_ne!(results[0].link, results[1].link);
    for result in &results {
        assert!(result.link.points_to(&result.message));
        let reparsed: DeepLink = result.link.to_string().parse().unwrap();
        assert_eq!(reparsed, result.link);
    }
    assert_eq!(results[0].link.to_string(), "https://t.me/dailyepapers/30");
}

#[tokio::test]
async fn test_newspaper_search_skips_other_days_and_channels() {
    let papers = channel(100, "Newspaper Hub", None);
    let movies = channel(200, "Movie Club", Some("movies"));
    let today = midday(march_12());
    let yesterday = today - chrono::Duration::days(1);
    let tomorrow = today + chrono::Duration::days(1);

    let source = FakeSource::default()
        .with_channel(
            papers.clone(),
            vec![
                message(&papers, 12, "TOI Hyderabad 12-03-2025", tomorrow),
                message(&papers, 11, "TOI Hyderabad 12-03-2025", today),
                message(&papers, 10, "TOI Hyderabad 11-03-2025", yesterday),
            ],
        )
        .with_channel(
            movies.clone(),
            vec![message(&movies, 5, "TOI Hyderabad 12-03-2025", today)],
        );

    let query = SearchQuery::newspaper(march_12());
    let (summary, results) = search(&source, Arc::new(FailingOracle), &ai_config(), &query)
        .await
        .unwrap();

    assert_eq!(summary.channels, 1);
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].message.id, 11);
    assert_eq!(results[0].link.to_string(), "https://t.me/c/100/11");
}

#[tokio::test]
async fn test_magazine_search_asks_oracle_and_keeps_order() {
    let mags = channel(300, "Magazine Stand", Some("magstand"));
    let now = Utc::now();
    let source = FakeSource::default().with_channel(
        mags.clone(),
        vec![
            message(&mags, 4, "quarterly market review", now),
            message(&mags, 3, "lunch plans", now),
            message(&mags, 2, "stock market outlook", now),
            message(&mags, 1, "weekend hiking", now),
        ],
    );

    let oracle = Arc::new(MarketOracle::new());
    let query = SearchQuery::magazine("finance");
    let (summary, results) = search(&source, oracle.clone(), &ai_config(), &query)
        .await
        .unwrap();

    let ids: Vec<i32> = results.iter().map(|r| r.message.id).collect();
    assert_eq!(ids, vec![4, 2]);
    assert_eq!(summary.scanned, 4);
    assert_eq!(oracle.calls.load(Ordering::SeqCst), 4);
}

#[tokio::test]
async fn test_magazine_search_single_scenario() {
    let mags = channel(300, "Magazine Stand", Some("magstand"));
    let now = Utc::now();
    let source = FakeSource::default().with_channel(
        mags.clone(),
        vec![
            message(&mags, 2, "quarterly market review", now),
            message(&mags, 1, "lunch plans", now),
        ],
    );

    let query = SearchQuery::magazine("finance");
    let (_, results) = search(&source, Arc::new(MarketOracle::new()), &ai_config(), &query)
        .await
        .unwrap();

    assert_eq!(results.len(), 1);
    assert_eq!(results[0].message.text, "quarterly market review");
}

#[tokio::test]
async fn test_keyword_hit_skips_oracle() {
    let mags = channel(300, "Magazine Stand", None);
    let source = FakeSource::default().with_channel(
        mags.clone(),
        vec![message(&mags, 1, "Personal Finance monthly", Utc::now())],
    );

    let oracle = Arc::new(MarketOracle::new());
    let query = SearchQuery::magazine("finance");
    let (_, results) = search(&source, oracle.clone(), &ai_config(), &query)
        .await
        .unwrap();

    assert_eq!(results.len(), 1);
    assert_eq!(oracle.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_oracle_failures_exclude_by_default() {
    let mags = channel(300, "Magazine Stand", None);
    let source = FakeSource::default().with_channel(
        mags.clone(),
        vec![
            message(&mags, 2, "quarterly market review", Utc::now()),
            message(&mags, 1, "finance weekly", Utc::now()),
        ],
    );
    let query = SearchQuery::magazine("finance");

    let (summary, results) = search(&source, Arc::new(FailingOracle), &ai_config(), &query)
        .await
        .unwrap();
    assert_eq!(summary.scanned, 2);
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].message.id, 1);

    let (_, results) = search(&source, Arc::new(HangingOracle), &ai_config(), &query)
        .await
        .unwrap();
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].message.id, 1);
}

#[tokio::test]
async fn test_oracle_failures_included_when_configured() {
    let mags = channel(300, "Magazine Stand", None);
    let source = FakeSource::default().with_channel(
        mags.clone(),
        vec![message(&mags, 2, "quarterly market review", Utc::now())],
    );
    let ai = AiConfig {
        failure_policy: FailurePolicy::Include,
        ..ai_config()
    };
    let query = SearchQuery::magazine("finance");
    let (_, results) = search(&source, Arc::new(FailingOracle), &ai, &query)
        .await
        .unwrap();
    assert_eq!(results.len(), 1);
}

#[tokio::test]
async fn test_magazine_skips_junk_channels_and_duplicate_files() {
    let junk = channel(400, "Free Apps", None);
    let mags = channel(500, "Finance Mags", Some("financemags"));
    let now = Utc::now();
    let source = FakeSource::default()
        .with_channel(
            junk.clone(),
            vec![
                with_document(message(&junk, 2, "finance app", now), "FinanceApp.apk", 10),
                message(&junk, 1, "finance tips", now),
            ],
        )
        .with_channel(
            mags.clone(),
            vec![
                with_document(message(&mags, 3, "", now), "Finance_Today_March.pdf", 2048),
                with_document(message(&mags, 2, "reupload", now), "Finance_Today_March.pdf", 2048),
                with_document(message(&mags, 1, "", now), "Finance_Today_Feb.pdf", 1024),
            ],
        );

    let query = SearchQuery::magazine("finance");
    let (summary, results) = search(&source, Arc::new(FailingOracle), &ai_config(), &query)
        .await
        .unwrap();

    assert_eq!(summary.channels, 1);
    let ids: Vec<i32> = results.iter().map(|r| r.message.id).collect();
    assert_eq!(ids, vec![3, 1]);
    assert!(results[0].label.starts_with("Finance_Today_March.pdf | Finance Mags |"));
}

#[tokio::test]
async fn test_limit_and_single_chat_scope() {
    let mags = channel(500, "Finance Mags", Some("financemags"));
    let other = channel(600, "Other Finance", Some("other"));
    let now = Utc::now();
    let source = FakeSource::default()
        .with_channel(
            mags.clone(),
            vec![
                message(&mags, 3, "finance one", now),
                message(&mags, 2, "finance two", now),
                message(&mags, 1, "finance three", now),
            ],
        )
        .with_channel(other.clone(), vec![message(&other, 9, "finance", now)]);

    let query = SearchQuery::magazine("finance")
        .in_chat("@financemags")
        .with_limit(2);
    let (summary, results) = search(&source, Arc::new(FailingOracle), &ai_config(), &query)
        .await
        .unwrap();

    assert_eq!(summary.channels, 1);
    assert_eq!(summary.scanned, 2);
    let ids: Vec<i32> = results.iter().map(|r| r.message.id).collect();
    assert_eq!(ids, vec![3, 2]);

    let missing = SearchQuery::magazine("finance").in_chat("@nowhere");
    let err = search(&source, Arc::new(FailingOracle), &ai_config(), &missing)
        .await
        .unwrap_err();
    assert!(matches!(err, SearchError::ChatNotFound(_)));
}

#[tokio::test]
async fn test_controller_streams_events_and_completes() {
    let papers = channel(100, "Daily ePapers", Some("dailyepapers"));
    let source = FakeSource::default().with_channel(
        papers.clone(),
        vec![message(
            &papers,
            7,
            "TOI Hyderabad 12.03.2025",
            midday(march_12()),
        )],
    );
    let controller =
        SearchController::new(Arc::new(source), Arc::new(FailingOracle), ai_config());

    let handle = controller.start(SearchQuery::newspaper(march_12())).unwrap();
    let events = drain(handle).await;

    assert!(matches!(events.first(), Some(SearchEvent::Started { .. })));
    assert!(events.iter().any(|e| matches!(e, SearchEvent::Match(r) if r.message.id == 7)));
    assert!(matches!(
        events.last(),
        Some(SearchEvent::Completed(SearchSummary { matches: 1, .. }))
    ));
    assert!(!controller.is_running());
}

#[tokio::test]
async fn test_controller_rejects_second_search_while_running() {
    let gate = Arc::new(Notify::new());
    let source = FakeSource {
        gate: Some(Arc::clone(&gate)),
        ..Default::default()
    };
    let controller =
        SearchController::new(Arc::new(source), Arc::new(FailingOracle), ai_config());

    let first = controller.start(SearchQuery::magazine("finance")).unwrap();
    assert!(controller.is_running());

    let second = controller.start(SearchQuery::newspaper(march_12()));
    assert!(matches!(second, Err(SearchError::AlreadyRunning)));

    gate.notify_one();
    let events = drain(first).await;
    assert!(matches!(events.last(), Some(SearchEvent::Completed(_))));
    assert!(!controller.is_running());

    // The flag is released, so the next search starts.
    gate.notify_one();
    let third = controller.start(SearchQuery::magazine("finance")).unwrap();
    drain(third).await;
}

#[tokio::test]
async fn test_source_failure_aborts_search() {
    let mags = channel(300, "Magazine Stand", None);
    let mut source = FakeSource::default().with_channel(mags.clone(), Vec::new());
    source.failing = Some(300);
    let controller =
        SearchController::new(Arc::new(source), Arc::new(FailingOracle), ai_config());

    let handle = controller
        .start(SearchQuery::magazine("finance").in_chat("300"))
        .unwrap();
    let events = drain(handle).await;

    match events.last() {
        Some(SearchEvent::Aborted(SearchError::SourceUnavailable(reason))) => {
            assert!(reason.contains("connection reset"));
        }
        other => panic!("expected source failure, got {:?}", other),
    }
    assert!(!controller.is_running());
}

#[tokio::test]
async fn test_invalid_query_is_rejected_before_starting() {
    let controller = SearchController::new(
        Arc::new(FakeSource::default()),
        Arc::new(FailingOracle),
        ai_config(),
    );
    let result = controller.start(SearchQuery::magazine("   "));
    assert!(matches!(result, Err(SearchError::InvalidQuery(_))));
    assert!(!controller.is_running());
}

#[tokio::test]
async fn test_magazine_ignores_non_periodical_uploads() {
    let mags = channel(300, "Magazine Stand", None);
    let now = Utc::now();
    let source = FakeSource::default().with_channel(
        mags.clone(),
        vec![
            with_document(message(&mags, 3, "market day vlog", now), "vlog.mp4", 900),
            with_document(message(&mags, 2, "", now), "Market_Review_March.pdf", 900),
            message(&mags, 1, "quarterly market review", now),
        ],
    );

    let oracle = Arc::new(MarketOracle::new());
    let query = SearchQuery::magazine("finance");
    let (_, results) = search(&source, oracle.clone(), &ai_config(), &query)
        .await
        .unwrap();

    let ids: Vec<i32> = results.iter().map(|r| r.message.id).collect();
    assert_eq!(ids, vec![2, 1]);
    assert_eq!(oracle.calls.load(Ordering::SeqCst), 2);
}

struct NoOpener;

impl LinkOpener for NoOpener {
    fn open(&self, _link: &DeepLink) -> std::io::Result<()> {
        Ok(())
    }
}

fn slow_paper_source() -> FakeSource {
    let papers = channel(100, "Daily ePapers", Some("dailyepapers"));
    let mut source = FakeSource::default().with_channel(
        papers.clone(),
        vec![message(&papers, 7, "TOI Hyd 12-03-2025", midday(march_12()))],
    );
    source.delay = Some(Duration::from_millis(300));
    source
}

#[tokio::test]
async fn test_session_waits_for_search_after_input_ends() {
    for once in [true, false] {
        let controller = SearchController::new(
            Arc::new(slow_paper_source()),
            Arc::new(FailingOracle),
            ai_config(),
        );
        let mut presenter = Presenter::new(Vec::new(), NoOpener);

        run_session(
            &controller,
            &mut presenter,
            tokio::io::empty(),
            Some(SearchQuery::newspaper(march_12())),
            once,
        )
        .await
        .unwrap();

        assert_eq!(presenter.results().len(), 1, "once = {}", once);
        assert_eq!(presenter.state(), SearchState::Completed);
        assert!(!controller.is_running());
    }
}

#[tokio::test]
async fn test_session_once_returns_error_when_search_cannot_start() {
    let controller = SearchController::new(
        Arc::new(FakeSource::default()),
        Arc::new(FailingOracle),
        ai_config(),
    );
    let mut presenter = Presenter::new(Vec::new(), NoOpener);

    let outcome = tokio::time::timeout(
        Duration::from_secs(5),
        run_session(
            &controller,
            &mut presenter,
            BufReader::new(&b"help\n"[..]),
            Some(SearchQuery::magazine("finance").with_limit(0)),
            true,
        ),
    )
    .await
    .expect("session should not wait for input");

    let err = outcome.unwrap_err();
    assert!(matches!(
        err.downcast_ref::<SearchError>(),
        Some(SearchError::InvalidQuery(_))
    ));
}

#[tokio::test]
async fn test_session_runs_typed_commands() {
    let controller = SearchController::new(
        Arc::new(slow_paper_source()),
        Arc::new(FailingOracle),
        ai_config(),
    );
    let mut presenter = Presenter::new(Vec::new(), NoOpener);

    run_session(
        &controller,
        &mut presenter,
        BufReader::new(&b"toi 12-03-2025\nlist\n"[..]),
        None,
        false,
    )
    .await
    .unwrap();

    assert_eq!(presenter.results().len(), 1);
    assert_eq!(presenter.results().get(1).unwrap().message.id, 7);
}
