//! Best-effort launch of the presentation client.

use std::net::SocketAddr;

use crate::server::ws_url;

/// Placeholder replaced by the server's own `ws://` URL.
const WS_PLACEHOLDER: &str = "{ws}";

/// Expand a viewer URL/path template for a bound endpoint.
pub fn viewer_target(template: &str, addr: SocketAddr) -> String {
    template.replace(WS_PLACEHOLDER, &ws_url(addr))
}

/// Open the viewer with the platform's default handler. Failure is logged
/// and otherwise ignored.
pub fn launch_viewer(template: &str, addr: SocketAddr) -> bool {
    let target = viewer_target(template, addr);
    match open::that_detached(&target) {
        Ok(()) => {
            tracing::info!(target = %target, "viewer launched");
            true
        }
        Err(e) => {
            tracing::warn!(target = %target, error = %e, "failed to launch viewer, continuing without one");
            false
        }
    }
}
