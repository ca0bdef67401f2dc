use crate::consumer::{encode_png, SharedView};
use memora_core::{IdentityStore, PendingError, SharedState};
use std::sync::Arc;
use std::time::Instant;
use zbus::interface;

/// D-Bus interface for the Memora daemon.
///
/// Bus name: org.memora.Daemon1
/// Object path: /org/memora/Daemon1
pub struct MemoraService {
    pub shared: Arc<SharedState>,
    pub store: Arc<dyn IdentityStore>,
    pub view: SharedView,
    pub camera: String,
    pub tolerance: f32,
}

fn failed(e: impl std::fmt::Display) -> zbus::fdo::Error {
    zbus::fdo::Error::Failed(e.to_string())
}

#[interface(name = "org.memora.Daemon1")]
impl MemoraService {
    /// Return daemon status information.
    async fn status(&self) -> zbus::fdo::Result<String> {
        let view = Arc::clone(&*self.view.read());
        Ok(serde_json::json!({
            "version": env!("CARGO_PKG_VERSION"),
            "camera": self.camera,
            "frames_published": view.sequence,
            "detections": view.detections.len(),
            "active_tracks": view.active_tracks,
            "identities": self.shared.registry.len(),
            "tolerance": self.tolerance,
            "pending": view.pending.as_ref().map(|p| p.id),
            "pending_age_secs": view.pending.as_ref().map(|p| p.age_secs),
        })
        .to_string())
    }

    /// Summaries of the faces in the latest frame, as JSON.
    async fn detections(&self) -> zbus::fdo::Result<String> {
        let view = Arc::clone(&*self.view.read());
        let list: Vec<_> = view
            .detections
            .iter()
            .map(|d| {
                serde_json::json!({
                    "name": d.name,
                    "relation": d.relation,
                    "notes": d.notes_excerpt,
                    "identified": d.identified,
                })
            })
            .collect();
        Ok(serde_json::Value::from(list).to_string())
    }

    /// JPEG of the latest annotated frame; empty before the first frame.
    async fn frame(&self) -> zbus::fdo::Result<Vec<u8>> {
        Ok(self.view.read().frame_jpeg.clone())
    }

    /// PNG thumbnail of detection `index` in the latest frame.
    async fn detection_thumbnail(&self, index: u32) -> zbus::fdo::Result<Vec<u8>> {
        let view = Arc::clone(&*self.view.read());
        view.detections
            .get(index as usize)
            .map(|d| d.thumbnail_png.clone())
            .ok_or_else(|| zbus::fdo::Error::InvalidArgs(format!("no detection at index {index}")))
    }

    /// The pending registration as JSON, or `null`.
    async fn pending(&self) -> zbus::fdo::Result<String> {
        let now = Instant::now();
        let value = match self.shared.pending.current() {
            Some(entry) => serde_json::json!({
                "id": entry.id,
                "age_secs": entry.age(now).as_secs(),
                "width": entry.image.width(),
                "height": entry.image.height(),
            }),
            None => serde_json::Value::Null,
        };
        Ok(value.to_string())
    }

    /// PNG of the pending registration's representative crop.
    async fn pending_image(&self) -> zbus::fdo::Result<Vec<u8>> {
        let entry = self
            .shared
            .pending
            .current()
            .ok_or_else(|| zbus::fdo::Error::Failed("no pending registration".into()))?;

        let cached = self
            .view
            .read()
            .pending
            .as_ref()
            .filter(|p| p.id == entry.id)
            .map(|p| p.image_png.clone());
        match cached {
            Some(png) => Ok(png),
            None => tokio::task::spawn_blocking(move || encode_png(&entry.image))
                .await
                .map_err(failed)?
                .map_err(failed),
        }
    }

    /// Name pending registration `pending_id`. Returns the stored identity as JSON.
    async fn register(
        &self,
        pending_id: u64,
        name: &str,
        relation: &str,
    ) -> zbus::fdo::Result<String> {
        tracing::info!(pending = pending_id, name, relation, "register requested");
        let shared = Arc::clone(&self.shared);
        let store = Arc::clone(&self.store);
        let (name, relation) = (name.to_string(), relation.to_string());

        let result = tokio::task::spawn_blocking(move || {
            shared
                .pending
                .register(pending_id, &name, &relation, store.as_ref(), &shared.registry)
        })
        .await
        .map_err(failed)?;

        match result {
            Ok(identity) => Ok(serde_json::json!({
                "name": identity.name,
                "relation": identity.relation,
                "image": identity.reference_path,
            })
            .to_string()),
            Err(e @ PendingError::Validation(_)) => Err(zbus::fdo::Error::InvalidArgs(e.to_string())),
            Err(e @ PendingError::NotFound(_)) => Err(zbus::fdo::Error::InvalidArgs(e.to_string())),
            Err(e @ PendingError::InProgress(_)) => Err(failed(e)),
            Err(e) => {
                tracing::warn!(error = %e, "registration failed");
                Err(failed(e))
            }
        }
    }

    /// Discard the pending registration. Returns whether one was discarded;
    /// an entry that is mid-registration is kept.
    async fn cancel(&self) -> zbus::fdo::Result<bool> {
        let removed = self.shared.pending.cancel();
        if let Some(entry) = &removed {
            tracing::info!(pending = entry.id, "pending registration cancelled");
        }
        Ok(removed.is_some())
    }

    /// Known identities in match order, as JSON.
    async fn list_identities(&self) -> zbus::fdo::Result<String> {
        let registry = self.shared.registry.snapshot();
        let list: Vec<_> = registry
            .iter()
            .map(|id| {
                serde_json::json!({
                    "name": id.name,
                    "relation": id.relation,
                    "notes": id.notes,
                    "image": id.reference_path,
                })
            })
            .collect();
        Ok(serde_json::Value::from(list).to_string())
    }

    /// Reload the registry from the store in the background.
    ///
    /// Returns at once; the reload is never joined and its failure is only logged.
    async fn reload(&self) -> zbus::fdo::Result<()> {
        let shared = Arc::clone(&self.shared);
        let store = Arc::clone(&self.store);
        tokio::task::spawn_blocking(move || {
            if let Err(e) = shared.registry.reload(store.as_ref()) {
                tracing::warn!(error = %e, "background registry reload failed; keeping previous registry");
            }
        });
        Ok(())
    }
}
