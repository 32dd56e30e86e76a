use axum::{
    extract::State,
    http::HeaderMap,
    response::sse::{Event, KeepAlive, Sse},
    Json,
};
use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;
use tokio_stream::wrappers::IntervalStream;
use tokio_stream::StreamExt;

use super::collector::{MetricsCollector, MetricsSnapshot, WindowRecord};
use crate::AppState;

/// How often the feed polls the collector for newly closed windows.
const FEED_INTERVAL: Duration = Duration::from_millis(250);

// ─── GET /api/metrics ────────────────────────────────────────────

pub async fn get_metrics(State(state): State<Arc<AppState>>) -> Json<MetricsSnapshot> {
    Json(state.metrics.snapshot())
}

// ─── GET /api/windows/stream ─────────────────────────────────────
/// Server-Sent Events feed of aggregation windows.
///
/// Each `windows` event carries only the windows closed since the previous
/// event, and its SSE id is the newest window's `seq`. A reconnecting client
/// sending `Last-Event-ID` resumes after that window instead of replaying
/// the whole ring. Ticks without new windows send nothing.
pub async fn windows_stream(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Sse<impl tokio_stream::Stream<Item = Result<Event, Infallible>>> {
    let mut last_seq = last_event_id(&headers);

    let stream = IntervalStream::new(tokio::time::interval(FEED_INTERVAL)).filter_map(move |_| {
        let windows = next_batch(&state.metrics, &mut last_seq)?;
        let event = Event::default()
            .event("windows")
            .id(last_seq.to_string())
            .json_data(&windows)
            .ok()?;
        Some(Ok(event))
    });

    Sse::new(stream).keep_alive(KeepAlive::default())
}

/// Windows newer than `last_seq`, advancing it to the newest one returned.
fn next_batch(metrics: &MetricsCollector, last_seq: &mut u64) -> Option<Vec<WindowRecord>> {
    let windows = metrics.windows_since(*last_seq);
    *last_seq = windows.last()?.seq;
    Some(windows)
}

fn last_event_id(headers: &HeaderMap) -> u64 {
    headers
        .get("last-event-id")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregator::WindowReport;
    use crate::config::Config;
    use crate::workload::StreamKind;

    fn close_window(metrics: &MetricsCollector, stream: StreamKind, count: u64) {
        metrics.record_window(&WindowReport {
            stream,
            count,
            avg_us: 100,
        });
    }

    #[tokio::test]
    async fn get_metrics_returns_current_snapshot() {
        let metrics = Arc::new(MetricsCollector::new());
        metrics.record(StreamKind::Write, 250);
        let state = Arc::new(AppState {
            metrics,
            config: Config::default(),
        });

        let Json(snapshot) = get_metrics(State(state)).await;

        assert_eq!(snapshot.write.total_ops, 1);
        assert_eq!(snapshot.read.total_ops, 0);
    }

    #[test]
    fn batches_carry_only_new_windows() {
        let metrics = MetricsCollector::new();
        let mut last_seq = 0;
        assert!(next_batch(&metrics, &mut last_seq).is_none());

        close_window(&metrics, StreamKind::Read, 10);
        close_window(&metrics, StreamKind::Write, 20);
        let batch = next_batch(&metrics, &mut last_seq).unwrap();
        assert_eq!(batch.len(), 2);
        assert_eq!(last_seq, 2);

        assert!(next_batch(&metrics, &mut last_seq).is_none());

        close_window(&metrics, StreamKind::Read, 30);
        let batch = next_batch(&metrics, &mut last_seq).unwrap();
        assert_eq!(batch.len(), 1);
        assert_eq!(batch[0].count, 30);
        assert_eq!(last_seq, 3);
    }

    #[test]
    fn resumes_from_last_event_id() {
        let mut headers = HeaderMap::new();
        assert_eq!(last_event_id(&headers), 0);

        headers.insert("last-event-id", "17".parse().unwrap());
        assert_eq!(last_event_id(&headers), 17);

        headers.insert("last-event-id", "bogus".parse().unwrap());
        assert_eq!(last_event_id(&headers), 0);
    }
}
