// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Fleet event log - appends bus events to a plain-text file
//!
//! Each line reads `YYYY-MM-DD HH:MM:SS [tick N] <event>`. Reservation
//! bookkeeping is left out unless requested.
//!
//! # Architecture
//!
//! - **Layer:** Interface / Presentation Layer
//! - **Purpose:** Persist the live event stream for operators

use anyhow::{Context, Result};
use chrono::{DateTime, Local};
use std::path::{Path, PathBuf};
use tokio::fs::OpenOptions;
use tokio::io::{AsyncWriteExt, BufWriter};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use waypoint_core::domain::events::EventEnvelope;
use waypoint_core::infrastructure::event_bus::{EventBusError, EventReceiver};

pub const DEFAULT_EVENT_LOG: &str = "./logs/fleet_events.log";

pub struct EventLogWriter {
    path: PathBuf,
    include_reservations: bool,
}

impl EventLogWriter {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            include_reservations: false,
        }
    }

    pub fn with_reservations(mut self, include: bool) -> Self {
        self.include_reservations = include;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn format_line(timestamp: DateTime<Local>, envelope: &EventEnvelope) -> String {
        format!(
            "{} [tick {}] {}",
            timestamp.format("%Y-%m-%d %H:%M:%S"),
            envelope.tick,
            envelope.event
        )
    }

    /// Drain `receiver` on a background task until the bus closes.
    /// Resolves to the number of event lines written.
    pub fn spawn(self, receiver: EventReceiver) -> JoinHandle<Result<u64>> {
        tokio::spawn(self.run(receiver))
    }

    pub async fn run(self, mut receiver: EventReceiver) -> Result<u64> {
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("Failed to create log directory {:?}", parent))?;
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await
            .with_context(|| format!("Failed to open event log {:?}", self.path))?;
        let mut writer = BufWriter::new(file);
        let mut written = 0u64;

        loop {
            let line = match receiver.recv().await {
                Ok(envelope) => {
                    if envelope.event.is_reservation_change() && !self.include_reservations {
                        continue;
                    }
                    written += 1;
                    Self::format_line(Local::now(), &envelope)
                }
                Err(EventBusError::Lagged(dropped)) => {
                    warn!(dropped, "Event log fell behind the fleet");
                    format!(
                        "{} [lagged] {} events dropped",
                        Local::now().format("%Y-%m-%d %H:%M:%S"),
                        dropped
                    )
                }
                Err(EventBusError::Empty) => continue,
                Err(EventBusError::Closed) => break,
            };
            writer.write_all(line.as_bytes()).await?;
            writer.write_all(b"\n").await?;
        }

        writer.flush().await?;
        debug!(path = ?self.path, written, "Event log closed");
        Ok(written)
    }
}
