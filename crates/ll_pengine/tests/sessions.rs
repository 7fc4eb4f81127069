//! 查询会话: 分页、失败与错误、停止、销毁、源码加载、输出与扇出

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tokio_test::{assert_err, assert_ok};

use ll_core::LogicLoomError;
use ll_durable::{MemoryKv, PengineMetadata, Store};
use ll_engine::MiniLog;
use ll_pengine::{Event, Frame, PengineConfig, PengineHost, Reply, Request, StaticFetcher};

const FIVE: &str = "p(1). p(2). p(3). p(4). p(5).";

fn host() -> PengineHost<MiniLog> {
    host_with(StaticFetcher::new())
}

fn host_with(fetcher: StaticFetcher) -> PengineHost<MiniLog> {
    PengineHost::new(
        PengineConfig::default(),
        Arc::new(MemoryKv::default()),
        Arc::new(fetcher),
        MiniLog::new,
    )
}

async fn send(host: &PengineHost<MiniLog>, actor: &str, request: Request) -> Reply {
    assert_ok!(host.request(actor, request).await)
}

fn values(reply: &Reply) -> Vec<serde_json::Value> {
    reply.results.clone().unwrap_or_default()
}

#[tokio::test]
async fn test_pagination_preserves_order() {
    let host = host();
    send(&host, "alice", Request::create().with_src_text(FIVE)).await;

    let first = send(&host, "alice", Request::ask("p(X)").with_id("q").with_chunk(2)).await;
    assert_eq!(first.event, Event::Success);
    assert_eq!(first.id, "q");
    assert_eq!(values(&first), vec![json!({"X": 1}), json!({"X": 2})]);
    assert_eq!(first.more, Some(true));
    assert_eq!(first.projection, Some(vec!["X".to_string()]));

    let second = send(&host, "alice", Request::next("q").with_chunk(2)).await;
    assert_eq!(values(&second), vec![json!({"X": 3}), json!({"X": 4})]);
    assert_eq!(second.more, Some(true));

    let last = send(&host, "alice", Request::next("q")).await;
    assert_eq!(values(&last), vec![json!({"X": 5})]);
    assert_eq!(last.more, Some(false));
    assert_eq!(host.snapshot("alice").await.unwrap().jobs, 0);
}

#[tokio::test]
async fn test_exact_chunk_reports_no_more() {
    let host = host();
    send(&host, "alice", Request::create().with_src_text(FIVE)).await;

    let reply = send(&host, "alice", Request::ask("p(X)").with_chunk(5)).await;
    assert_eq!(values(&reply).len(), 5);
    assert_eq!(reply.more, Some(false));
}

#[tokio::test]
async fn test_default_chunk_from_config() {
    let host = PengineHost::new(
        PengineConfig {
            default_chunk: Some(3),
            max_chunk: 4,
            ..Default::default()
        },
        Arc::new(MemoryKv::default()),
        Arc::new(StaticFetcher::new()),
        MiniLog::new,
    );
    send(&host, "alice", Request::create().with_src_text(FIVE)).await;

    let reply = send(&host, "alice", Request::ask("p(X)").with_id("q")).await;
    assert_eq!(values(&reply).len(), 3);
    let reply = send(&host, "alice", Request::ask("p(X)").with_id("q").with_chunk(50)).await;
    assert_eq!(values(&reply).len(), 4);
    assert_eq!(reply.more, Some(true));
}

#[tokio::test]
async fn test_template_projection() {
    let host = host();
    send(&host, "alice", Request::create().with_src_text(FIVE)).await;
    let reply = send(
        &host,
        "alice",
        Request::ask("p(X), X > 3").with_template("double(X)"),
    )
    .await;
    assert_eq!(
        values(&reply),
        vec![
            json!({"functor": "double", "args": [4]}),
            json!({"functor": "double", "args": [5]}),
        ]
    );
}

#[tokio::test]
async fn test_failure_and_error_are_distinct() {
    let host = host();
    send(&host, "alice", Request::create().with_src_text(FIVE)).await;

    let failure = send(&host, "alice", Request::ask("p(9)")).await;
    assert_eq!(failure.event, Event::Failure);
    assert_eq!(failure.results, Some(vec![]));
    assert_eq!(failure.projection, Some(vec![]));
    assert!(failure.error.is_none());

    let error = send(&host, "alice", Request::ask("X is foo + 1")).await;
    assert_eq!(error.event, Event::Error);
    let info = error.error.unwrap();
    assert_eq!(info.kind, "type_error");
    assert_eq!(info.expected.as_deref(), Some("evaluable"));

    let missing = send(&host, "alice", Request::ask("no_such_thing(1)")).await;
    let info = missing.error.unwrap();
    assert_eq!(info.kind, "existence_error");
    assert_eq!(info.expected.as_deref(), Some("procedure"));

    let thrown = send(&host, "alice", Request::ask("throw(my_ball)")).await;
    assert_eq!(thrown.error.unwrap().ball, "my_ball");

    let syntax = send(&host, "alice", Request::ask("p(X")).await;
    assert_eq!(syntax.event, Event::Error);
    assert_eq!(syntax.error.unwrap().kind, "syntax_error");
    assert_eq!(host.snapshot("alice").await.unwrap().jobs, 0);
}

#[tokio::test]
async fn test_invalid_requests_never_reach_the_engine() {
    let host = host();
    let err = assert_err!(host.request("alice", Request::ask("p(X)").with_chunk(0)).await);
    assert!(matches!(err, LogicLoomError::Protocol(_)));
    let err = assert_err!(
        host.request(
            "alice",
            Request {
                next: true,
                ..Default::default()
            }
        )
        .await
    );
    assert!(matches!(err, LogicLoomError::Protocol(_)));
    assert!(host.actors().await.is_empty());
}

#[tokio::test]
async fn test_next_after_eviction_is_an_error_reply() {
    let host = host();
    send(&host, "alice", Request::create().with_src_text(FIVE)).await;
    send(&host, "alice", Request::ask("p(X)").with_id("q").with_chunk(1)).await;

    host.evict("alice").await;
    let reply = send(&host, "alice", Request::next("q")).await;
    assert_eq!(reply.event, Event::Error);
    let info = reply.error.unwrap();
    assert_eq!(info.ball, "existence_error(pengine, q)");
    assert_eq!(info.kind, "existence_error");
}

#[tokio::test]
async fn test_stop_is_idempotent() {
    let host = host();
    send(&host, "alice", Request::create().with_src_text(FIVE)).await;
    let first = send(&host, "alice", Request::ask("p(X)").with_id("q").with_chunk(1)).await;
    assert_eq!(first.more, Some(true));

    for _ in 0..2 {
        let reply = send(&host, "alice", Request::stop(Some("q".into()))).await;
        assert_eq!(reply.event, Event::Stop);
        assert_eq!(reply.id, "q");
    }
    let reply = send(&host, "alice", Request::next("q")).await;
    assert_eq!(reply.event, Event::Stop);
    let reply = send(&host, "alice", Request::stop(Some("unknown".into()))).await;
    assert_eq!(reply.event, Event::Stop);

    let reply = send(&host, "alice", Request::destroy(Some("q".into()))).await;
    assert_eq!(reply.event, Event::Destroy);
    let reply = send(&host, "alice", Request::next("q")).await;
    assert_eq!(reply.event, Event::Error);

    // 持久化的规则不受影响
    let reply = send(&host, "alice", Request::ask("p(5)")).await;
    assert_eq!(reply.event, Event::Success);
}

#[tokio::test]
async fn test_source_urls_are_fetched_once() {
    let fetcher = Arc::new(StaticFetcher::new().with_source("mem://rules.pl", "r(a). r(b)."));
    let host = PengineHost::new(
        PengineConfig::default(),
        Arc::new(MemoryKv::default()),
        fetcher.clone(),
        MiniLog::new,
    );

    for _ in 0..2 {
        let reply = send(&host, "alice", Request::create().with_src_url("mem://rules.pl")).await;
        assert_eq!(reply.event, Event::Create);
        assert_eq!(reply.meta.unwrap().src_urls, vec!["mem://rules.pl".to_string()]);
    }
    assert_eq!(fetcher.fetch_count(), 1);

    let reply = send(&host, "alice", Request::ask("findall(X, r(X), L)")).await;
    assert_eq!(values(&reply), vec![json!({"L": ["a", "b"]})]);
}

#[tokio::test]
async fn test_fetch_failure_aborts_the_request() {
    let host = host_with(StaticFetcher::new());
    let reply = send(
        &host,
        "alice",
        Request::ask("true").with_src_url("mem://missing.pl"),
    )
    .await;
    assert_eq!(reply.event, Event::Error);
    assert_eq!(reply.error.unwrap().kind, "fetch_error");

    let snapshot = host.snapshot("alice").await.unwrap();
    assert_eq!(snapshot.jobs, 0);
    assert_eq!(snapshot.txid, 0);
}

#[tokio::test]
async fn test_output_is_collected_per_job() {
    let host = host();
    let reply = send(&host, "alice", Request::ask("write(hello), nl")).await;
    assert_eq!(reply.output.as_deref(), Some("hello\n"));

    let reply = send(&host, "alice", Request::ask("true")).await;
    assert!(reply.output.is_none());
}

#[tokio::test]
async fn test_socket_replies_fan_out_to_other_sessions() {
    let host = host();
    let a = host.connect("alice").await.unwrap();
    let b = host.connect("alice").await.unwrap();

    let reply = assert_ok!(
        host.request_from("alice", &a.session, Request::ask("X = 1"))
            .await
    );
    let frame = tokio::time::timeout(Duration::from_secs(1), b.frames.recv_async())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(frame, Frame::Reply(reply));
    assert!(a.frames.try_recv().is_err());

    // 引擎输出推送给所有会话
    send(&host, "alice", Request::ask("write(hi)")).await;
    let frame = tokio::time::timeout(Duration::from_secs(1), a.frames.recv_async())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(frame, Frame::Output { text: "hi".into() });

    host.disconnect("alice", &b.session).await;
    assert_eq!(host.snapshot("alice").await.unwrap().sessions, 1);
}

async fn persisted_listeners(store: &Store) -> Vec<String> {
    store
        .get::<PengineMetadata>("meta")
        .await
        .unwrap()
        .unwrap_or_default()
        .listeners
}

#[tokio::test]
async fn test_client_sessions_are_recorded_as_listeners() {
    let backend = MemoryKv::default();
    let host = PengineHost::new(
        PengineConfig::default(),
        Arc::new(backend.clone()),
        Arc::new(StaticFetcher::new()),
        MiniLog::new,
    );
    let store = Store::new(Arc::new(backend.clone()), "alice");

    let a = host.connect("alice").await.unwrap();
    let b = host.connect("alice").await.unwrap();
    let snapshot = host.snapshot("alice").await.unwrap();
    assert_eq!(snapshot.listeners, vec![a.session.clone(), b.session.clone()]);
    assert!(snapshot.dirty);

    // 下一个请求结束时随元数据一起保存
    send(&host, "alice", Request::ask("true")).await;
    assert_eq!(persisted_listeners(&store).await, vec![a.session.clone(), b.session.clone()]);

    host.disconnect("alice", &a.session).await;
    assert_eq!(host.snapshot("alice").await.unwrap().listeners, vec![b.session.clone()]);
    send(&host, "alice", Request::ask("true")).await;
    assert_eq!(persisted_listeners(&store).await, vec![b.session.clone()]);

    // 重新激活后旧会话不再是监听者
    host.evict("alice").await;
    send(&host, "alice", Request::ask("true")).await;
    assert!(host.snapshot("alice").await.unwrap().listeners.is_empty());
    assert!(persisted_listeners(&store).await.is_empty());
}
