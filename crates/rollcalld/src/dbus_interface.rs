use crate::engine::EngineHandle;
use zbus::interface;
use zbus::object_server::SignalEmitter;

pub const BUS_NAME: &str = "org.rollcall.Attendance1";
pub const OBJECT_PATH: &str = "/org/rollcall/Attendance1";

/// D-Bus interface for the attendance daemon.
///
/// Bus name: org.rollcall.Attendance1
/// Object path: /org/rollcall/Attendance1
pub struct AttendanceService {
    engine: EngineHandle,
    camera_device: String,
}

impl AttendanceService {
    pub fn new(engine: EngineHandle, camera_device: String) -> Self {
        Self {
            engine,
            camera_device,
        }
    }

    fn status_json(&self) -> String {
        serde_json::json!({
            "version": env!("CARGO_PKG_VERSION"),
            "state": self.engine.state(),
            "camera": self.camera_device,
            "gallery_size": self.engine.gallery_size(),
            "stats": self.engine.stats(),
        })
        .to_string()
    }
}

#[interface(name = "org.rollcall.Attendance1")]
impl AttendanceService {
    /// Return engine state and counters as JSON.
    async fn status(&self) -> zbus::fdo::Result<String> {
        Ok(self.status_json())
    }

    /// Stop the capture loop. Returns false if it was already stopping.
    async fn stop(&self) -> zbus::fdo::Result<bool> {
        tracing::info!("stop requested over D-Bus");
        Ok(self.engine.stop())
    }

    /// Emitted for every admitted identity; `outcome` is `recorded` or
    /// `already_recorded`.
    #[zbus(signal)]
    pub async fn attendance_marked(
        emitter: &SignalEmitter<'_>,
        name: &str,
        date: &str,
        outcome: &str,
    ) -> zbus::Result<()>;
}

/// Claim the bus name on the session bus and export the service.
pub async fn serve(service: AttendanceService) -> zbus::Result<zbus::Connection> {
    zbus::connection::Builder::session()?
        .name(BUS_NAME)?
        .serve_at(OBJECT_PATH, service)?
        .build()
        .await
}
