//! `feynman tail`: act as the viewer and print events to stdout.

use std::str::FromStr;
use std::time::Duration;

use feynman::{Event, EventKind};
use futures_util::StreamExt;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;

const RETRY_DELAY: Duration = Duration::from_millis(500);

pub fn parse_kinds(raw: &[String]) -> anyhow::Result<Vec<EventKind>> {
    raw.iter()
        .map(|s| EventKind::from_str(s).map_err(anyhow::Error::msg))
        .collect()
}

/// Entry point for `feynman tail`.
pub async fn cmd_tail(addr: &str, kinds: &[EventKind], follow: bool) -> anyhow::Result<()> {
    loop {
        tokio::select! {
            result = tail_once(addr, kinds) => {
                match result {
                    Ok(()) => tracing::info!(addr, "session closed the connection"),
                    Err(e) if follow => tracing::debug!(addr, error = %e, "not connected, retrying"),
                    Err(e) => return Err(e),
                }
            }
            _ = tokio::signal::ctrl_c() => { break; }
        }
        if !follow {
            break;
        }
        tokio::select! {
            _ = tokio::time::sleep(RETRY_DELAY) => {}
            _ = tokio::signal::ctrl_c() => { break; }
        }
    }
    Ok(())
}

async fn tail_once(addr: &str, kinds: &[EventKind]) -> anyhow::Result<()> {
    let (ws, _) = connect_async(addr).await?;
    tracing::info!(addr, "attached as viewer");
    let (_, mut rx) = ws.split();
    while let Some(msg) = rx.next().await {
        match msg? {
            Message::Text(text) => {
                if let Some(line) = render(&text, kinds) {
                    println!("{line}");
                }
            }
            Message::Close(_) => break,
            _ => {}
        }
    }
    Ok(())
}

/// The line to print for one frame, or `None` when filtered out.
///
/// Frames that do not parse as events are printed as received when no
/// filter is set.
fn render(text: &str, kinds: &[EventKind]) -> Option<String> {
    match serde_json::from_str::<Event>(text) {
        Ok(event) => {
            if !kinds.is_empty() && !kinds.contains(&event.kind()) {
                return None;
            }
            Some(text.to_owned())
        }
        Err(e) => {
            tracing::warn!(error = %e, "frame is not a feynman event");
            kinds.is_empty().then(|| text.to_owned())
        }
    }
}
