//! Integration tests for the stall-guarded stream adapter.

use std::time::Duration;

use futures_util::{stream, StreamExt};

use stallguard::config::DetectorConfig;
use stallguard::detector::DetectorPhase;
use stallguard::{guard_stream, AppError};

use super::test_helpers::{ms_config, scripted_probe};

fn quick_config() -> DetectorConfig {
    ms_config(1_000, 80, 40, 20)
}

#[tokio::test]
async fn passes_items_through_and_disposes_on_end() {
    let source = stream::iter(vec![Ok::<_, AppError>(1_u32), Ok(2), Ok(3)]);
    let mut guarded = guard_stream(source, quick_config(), "test", None);

    let mut seen = Vec::new();
    while let Some(item) = guarded.next().await {
        seen.push(item.expect("no errors expected"));
    }

    assert_eq!(seen, vec![1, 2, 3]);
    assert_eq!(guarded.detector().phase(), DetectorPhase::Disposed);
    assert!(!guarded.is_stalled());
}

#[tokio::test]
async fn hung_stream_ends_with_stall_error() {
    let source = stream::iter(vec![Ok::<_, AppError>("a"), Ok("b")]).chain(stream::pending());
    let mut guarded = guard_stream(source, quick_config(), "acme", None);
    let abort = guarded.abort_token();

    assert_eq!(guarded.next().await.map(Result::ok), Some(Some("a")));
    assert_eq!(guarded.next().await.map(Result::ok), Some(Some("b")));

    let item = tokio::time::timeout(Duration::from_secs(2), guarded.next())
        .await
        .expect("stall should end the stream")
        .expect("stall error item");
    let err = item.expect_err("stall surfaces as an error");

    match err {
        AppError::Stalled(ref msg) => {
            assert!(msg.starts_with("acme: "), "{msg}");
            assert!(msg.contains("no activity"), "{msg}");
        }
        ref other => panic!("expected stall error, got {other}"),
    }
    assert!(abort.is_cancelled(), "abort token fires on stall");
    assert!(guarded.is_stalled());
    assert!(guarded.next().await.is_none(), "stream ends after a stall");
}

#[tokio::test]
async fn stall_reason_from_probe_reaches_stream_error() {
    let (probe, _calls) = scripted_probe(Duration::from_millis(5), true);
    let source = stream::pending::<Result<u8, AppError>>();
    let mut guarded = guard_stream(source, ms_config(60, 80, 40, 30), "acme", Some(probe));

    let err = tokio::time::timeout(Duration::from_secs(2), guarded.next())
        .await
        .expect("stall should end the stream")
        .expect("stall error item")
        .expect_err("stall surfaces as an error");

    assert!(err.to_string().contains("responsive"), "{err}");
}

#[tokio::test]
async fn inner_errors_are_converted() {
    let source = stream::iter(vec![Err::<u8, std::io::Error>(std::io::Error::new(
        std::io::ErrorKind::ConnectionReset,
        "reset by peer",
    ))]);
    let mut guarded = guard_stream(source, quick_config(), "test", None);

    let err = guarded
        .next()
        .await
        .expect("one item")
        .expect_err("error item");
    assert!(matches!(err, AppError::Io(ref msg) if msg.contains("reset by peer")));
}

#[tokio::test]
async fn steady_stream_is_never_aborted() {
    let source = stream::unfold(0_u32, |n| async move {
        if n == 8 {
            return None;
        }
        tokio::time::sleep(Duration::from_millis(30)).await;
        Some((Ok::<_, AppError>(n), n + 1))
    });
    let guarded = guard_stream(source, quick_config(), "test", None);

    let items: Vec<_> = guarded.collect().await;

    assert_eq!(items.len(), 8);
    assert!(items.iter().all(Result::is_ok));
}
