//! PBX connector: authenticated REST client plus a single persistent event
//! socket with exponential-backoff reconnect (spec.md §4.2). Grounded on
//! `original_source/app/services/asterisk.py`'s `AsteriskService` — same
//! REST probe/originate/hangup shape, same "non-fatal probe failure"
//! semantics — generalized from the raw-httpx/websockets pair to
//! `reqwest` + `tokio-tungstenite`, which the teacher already depends on
//! for `services/signaling`'s own socket surface.

mod rest;
mod stream;

pub use rest::{OriginateOutcome, PbxRestClient};
pub use stream::{EventHandler, PbxEventStream};

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Shared connectivity flags the health endpoint reads (spec.md §4.9).
#[derive(Clone, Default)]
pub struct PbxStatus {
    connected_ok: Arc<AtomicBool>,
    ws_connected: Arc<AtomicBool>,
}

impl PbxStatus {
    pub fn set_connected_ok(&self, value: bool) {
        self.connected_ok.store(value, Ordering::Relaxed);
    }

    pub fn connected_ok(&self) -> bool {
        self.connected_ok.load(Ordering::Relaxed)
    }

    pub fn set_ws_connected(&self, value: bool) {
        self.ws_connected.store(value, Ordering::Relaxed);
    }

    pub fn ws_connected(&self) -> bool {
        self.ws_connected.load(Ordering::Relaxed)
    }
}
