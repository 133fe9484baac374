use anyhow::{Context, Result};
use rollcall_store::DATE_FORMAT;
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;
use zbus::object_server::SignalEmitter;

mod config;
mod dbus_interface;
mod engine;

use dbus_interface::{AttendanceService, OBJECT_PATH};
use engine::{AnnotatedFrame, AttendanceEvent, EngineEvent, EventReceiver};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    tracing::info!(version = env!("CARGO_PKG_VERSION"), "rollcalld starting");

    let config = config::Config::from_env();
    tracing::debug!(?config, "configuration loaded");

    let engine = tokio::task::spawn_blocking({
        let config = config.clone();
        move || engine::build(&config)
    })
    .await
    .context("engine bootstrap panicked")??;

    let (handle, events) = engine.start()?;

    let service = AttendanceService::new(handle.clone(), config.camera_device.clone());
    let connection = match dbus_interface::serve(service).await {
        Ok(conn) => {
            tracing::info!(bus = dbus_interface::BUS_NAME, "D-Bus interface registered");
            Some(conn)
        }
        Err(e) => {
            tracing::warn!(error = %e, "D-Bus unavailable; running without it");
            None
        }
    };

    tracing::info!("rollcalld ready");

    let mut forwarder = tokio::spawn(forward_events(events, connection, config.preview_path.clone()));

    let mut forwarded = None;
    tokio::select! {
        res = tokio::signal::ctrl_c() => {
            res?;
            tracing::info!("interrupt received; shutting down");
        }
        res = &mut forwarder => {
            tracing::info!("engine stopped");
            forwarded = Some(res);
        }
    }

    handle.stop();
    let joiner = handle.clone();
    tokio::task::spawn_blocking(move || joiner.join())
        .await
        .context("engine join panicked")?;
    let forwarded = match forwarded {
        Some(res) => res,
        None => forwarder.await,
    };
    if let Err(e) = forwarded {
        tracing::warn!(error = %e, "event forwarder task failed");
    }

    tracing::info!(stats = ?handle.stats(), "rollcalld stopped");
    Ok(())
}

/// Events taken off the channel in one wakeup.
#[derive(Debug, Default)]
struct Batch {
    /// Every attendance event, in emission order.
    attendance: Vec<AttendanceEvent>,
    /// Newest frame only.
    frame: Option<AnnotatedFrame>,
    /// Older frames superseded by `frame`.
    stale_frames: usize,
}

/// Take `first` plus everything already queued behind it.
///
/// The engine sends without backpressure, so a slow preview write would let
/// full frames pile up; only the newest frame survives each batch. Attendance
/// events are never dropped.
fn next_batch(first: EngineEvent, events: &mut EventReceiver) -> Batch {
    let mut batch = Batch::default();
    let mut next = Some(first);
    while let Some(event) = next {
        match event {
            EngineEvent::Frame(frame) => {
                if batch.frame.replace(frame).is_some() {
                    batch.stale_frames += 1;
                }
            }
            EngineEvent::Attendance(event) => batch.attendance.push(event),
        }
        next = events.try_recv().ok();
    }
    batch
}

/// Drain engine events: publish attendance on D-Bus and refresh the preview.
async fn forward_events(
    mut events: EventReceiver,
    connection: Option<zbus::Connection>,
    preview: Option<PathBuf>,
) {
    while let Some(first) = events.recv().await {
        let batch = next_batch(first, &mut events);
        if batch.stale_frames > 0 {
            tracing::debug!(dropped = batch.stale_frames, "preview behind; stale frames dropped");
        }

        if let Some(conn) = &connection {
            for event in &batch.attendance {
                if let Err(e) = publish(conn, event).await {
                    tracing::warn!(error = %e, name = %event.name, "failed to emit AttendanceMarked");
                }
            }
        }
        if let (Some(frame), Some(path)) = (batch.frame, preview.clone()) {
            write_preview(frame, path).await;
        }
    }
}

async fn publish(conn: &zbus::Connection, event: &AttendanceEvent) -> zbus::Result<()> {
    let emitter = SignalEmitter::new(conn, OBJECT_PATH)?;
    let date = event.date.format(DATE_FORMAT).to_string();
    AttendanceService::attendance_marked(&emitter, &event.name, &date, event.outcome.as_str()).await
}

async fn write_preview(frame: AnnotatedFrame, path: PathBuf) {
    let sequence = frame.sequence;
    let result = tokio::task::spawn_blocking(move || save_jpeg(&frame, &path)).await;
    match result {
        Ok(Ok(())) => tracing::trace!(sequence, "preview updated"),
        Ok(Err(e)) => tracing::warn!(sequence, error = %e, "failed to write preview"),
        Err(e) => tracing::warn!(sequence, error = %e, "preview task failed"),
    }
}

/// Write to a sibling temp file and rename, so readers never see a partial JPEG.
fn save_jpeg(frame: &AnnotatedFrame, path: &Path) -> Result<()> {
    let tmp = path.with_extension("jpg.tmp");
    frame
        .image
        .save_with_format(&tmp, image::ImageFormat::Jpeg)
        .with_context(|| format!("encoding {}", tmp.display()))?;
    std::fs::rename(&tmp, path).with_context(|| format!("renaming to {}", path.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use image::RgbImage;
    use rollcall_store::AttendanceOutcome;
    use tokio::sync::mpsc;

    fn frame(sequence: u64) -> EngineEvent {
        EngineEvent::Frame(AnnotatedFrame {
            image: RgbImage::new(4, 4),
            sequence,
            matches: Vec::new(),
        })
    }

    fn marked(name: &str) -> EngineEvent {
        EngineEvent::Attendance(AttendanceEvent {
            name: name.into(),
            date: NaiveDate::from_ymd_opt(2024, 9, 16).unwrap(),
            outcome: AttendanceOutcome::Recorded,
        })
    }

    #[test]
    fn test_batch_keeps_newest_frame_and_all_attendance() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        for event in [frame(3), marked("Alice"), frame(6), marked("Bob"), frame(9)] {
            tx.send(event).unwrap();
        }

        let first = rx.try_recv().unwrap();
        let batch = next_batch(first, &mut rx);

        assert_eq!(batch.frame.map(|f| f.sequence), Some(9));
        assert_eq!(batch.stale_frames, 2);
        let names: Vec<&str> = batch.attendance.iter().map(|a| a.name.as_str()).collect();
        assert_eq!(names, vec!["Alice", "Bob"]);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_batch_of_one_event() {
        let (_tx, mut rx) = mpsc::unbounded_channel();
        let batch = next_batch(marked("Alice"), &mut rx);
        assert!(batch.frame.is_none());
        assert_eq!(batch.stale_frames, 0);
        assert_eq!(batch.attendance.len(), 1);
    }
}
