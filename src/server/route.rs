//! WebSocket endpoint routing
//!
//! Canonical paths:
//!
//! ```text
//! /ingest/{telemetry|camera}/{real|sim}/{producer_id}
//! /view/{telemetry|camera}/{real|sim}/{producer_id}
//! /control/ws/{real|sim}/{producer_id}
//! ```
//!
//! Legacy paths still used by deployed robots and dashboards:
//!
//! ```text
//! /{state|camera}/ws/{robot|sim}/{producer_id}     (ingest)
//! /{state|camera}/view/{robot|sim}/{producer_id}   (view)
//! ```

use crate::payload::{ChannelKey, RobotId, Source, StreamKind};

/// A resolved endpoint
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Route {
    /// Producer sending telemetry or frames
    Ingest(ChannelKey),
    /// Viewer receiving broadcasts
    View(ChannelKey),
    /// Robot accepting control commands
    Control(RobotId),
}

impl Route {
    /// Resolve a request path. Returns `None` for unknown paths.
    pub fn parse(path: &str) -> Option<Self> {
        let segments: Vec<&str> = path.trim_start_matches('/').split('/').collect();
        let [first, second, source, producer_id] = segments.as_slice() else {
            return None;
        };
        if producer_id.is_empty() {
            return None;
        }
        let source = Source::parse(source)?;

        let route = match (*first, *second) {
            ("control", "ws") => Route::Control(RobotId::new(source, *producer_id)),
            ("ingest", kind) | (kind, "ws") => {
                Route::Ingest(ChannelKey::new(StreamKind::parse(kind)?, source, *producer_id))
            }
            ("view", kind) | (kind, "view") => {
                Route::View(ChannelKey::new(StreamKind::parse(kind)?, source, *producer_id))
            }
            _ => return None,
        };
        Some(route)
    }
}
