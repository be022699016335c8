//! Server-sent event framing for streamed answers.
//!
//! The transport contract: every fragment becomes a `data: <fragment>`
//! event, and the stream always terminates with either `data: [DONE]` or
//! an in-band `data: [ERROR] <message>` event — never a silent close.

use futures_util::stream::Stream;
use tokio::sync::mpsc;

use crate::core::errors::RagError;

pub const DONE_EVENT: &str = "data: [DONE]\n\n";

pub fn data_event(fragment: &str) -> String {
    format!("data: {fragment}\n\n")
}

pub fn error_event(message: &str) -> String {
    format!("data: [ERROR] {message}\n\n")
}

/// Frame a fragment channel as an SSE event stream.
///
/// Fragments are forwarded as they arrive (no whole-response buffering).
/// A clean channel close emits `[DONE]`; a received error emits `[ERROR]`
/// and ends the stream so the consumer never hangs.
pub fn event_stream(
    rx: mpsc::Receiver<Result<String, RagError>>,
) -> impl Stream<Item = String> {
    futures_util::stream::unfold(Some(rx), |state| async move {
        let mut rx = state?;
        match rx.recv().await {
            Some(Ok(fragment)) => Some((data_event(&fragment), Some(rx))),
            Some(Err(err)) => Some((error_event(&err.to_string()), None)),
            None => Some((DONE_EVENT.to_string(), None)),
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::StreamExt;

    #[tokio::test]
    async fn fragments_are_framed_and_terminated_with_done() {
        let (tx, rx) = mpsc::channel(8);
        tokio::spawn(async move {
            tx.send(Ok("Hel".to_string())).await.unwrap();
            tx.send(Ok("lo".to_string())).await.unwrap();
        });

        let events: Vec<String> = event_stream(rx).collect().await;
        assert_eq!(
            events,
            vec![
                "data: Hel\n\n".to_string(),
                "data: lo\n\n".to_string(),
                "data: [DONE]\n\n".to_string(),
            ]
        );
    }

    #[tokio::test]
    async fn an_error_is_delivered_in_band_and_ends_the_stream() {
        let (tx, rx) = mpsc::channel(8);
        tokio::spawn(async move {
            tx.send(Ok("partial".to_string())).await.unwrap();
            tx.send(Err(RagError::ProviderTimeout("gemini request timed out".to_string())))
                .await
                .unwrap();
            // anything after the error must not surface
            let _ = tx.send(Ok("ignored".to_string())).await;
        });

        let events: Vec<String> = event_stream(rx).collect().await;
        assert_eq!(events.len(), 2);
        assert_eq!(events[0], "data: partial\n\n");
        assert!(events[1].starts_with("data: [ERROR] "));
        assert!(events[1].contains("timed out"));
        assert!(events[1].ends_with("\n\n"));
    }

    #[tokio::test]
    async fn empty_stream_still_terminates_with_done() {
        let (tx, rx) = mpsc::channel::<Result<String, RagError>>(1);
        drop(tx);

        let events: Vec<String> = event_stream(rx).collect().await;
        assert_eq!(events, vec!["data: [DONE]\n\n".to_string()]);
    }
}
