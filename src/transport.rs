// 📡 Beacon transport
// Sending is fire-and-forget: the core never waits for or inspects a response.

use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};

/// One request handed to the transport
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Beacon {
    pub tracker_url: String,
    pub request: String,
}

impl Beacon {
    /// GET url equivalent of this beacon
    pub fn to_url(&self) -> String {
        format!("{}?{}", self.tracker_url, self.request)
    }
}

pub trait Transport: Send + Sync {
    fn send(&self, beacon: Beacon);
}

/// Drops every beacon after logging it
#[derive(Debug, Clone, Copy, Default)]
pub struct NullTransport;

impl Transport for NullTransport {
    fn send(&self, beacon: Beacon) {
        tracing::debug!(tracker_url = %beacon.tracker_url, "dropping usage beacon");
    }
}

/// Keeps every beacon in memory
#[derive(Debug, Clone, Default)]
pub struct MemoryTransport {
    sent: Arc<Mutex<Vec<Beacon>>>,
}

impl MemoryTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sent(&self) -> Vec<Beacon> {
        self.sent.lock().map(|s| s.clone()).unwrap_or_default()
    }

    pub fn take(&self) -> Vec<Beacon> {
        self.sent
            .lock()
            .map(|mut s| std::mem::take(&mut *s))
            .unwrap_or_default()
    }
}

impl Transport for MemoryTransport {
    fn send(&self, beacon: Beacon) {
        if let Ok(mut sent) = self.sent.lock() {
            sent.push(beacon);
        }
    }
}
