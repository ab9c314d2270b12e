//! Message archive seam.
//!
//! When enabled, processed ET messages are written one file per message.
//! Archiving is best-effort: failures are logged and never affect
//! processing.

use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::Utc;
use tracing::warn;

use crate::siri::EstimatedVehicleJourney;

pub trait MessageArchive: Send + Sync {
    fn store_et(&self, journey: &EstimatedVehicleJourney);
}

pub struct NoopArchive;

impl MessageArchive for NoopArchive {
    fn store_et(&self, _journey: &EstimatedVehicleJourney) {}
}

pub struct FileArchive {
    dir: PathBuf,
    sequence: AtomicU64,
}

impl FileArchive {
    pub fn new(dir: impl Into<PathBuf>) -> std::io::Result<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)?;
        Ok(Self {
            dir,
            sequence: AtomicU64::new(0),
        })
    }
}

impl MessageArchive for FileArchive {
    fn store_et(&self, journey: &EstimatedVehicleJourney) {
        let xml = match quick_xml::se::to_string_with_root("EstimatedVehicleJourney", journey) {
            Ok(xml) => xml,
            Err(e) => {
                warn!(error = %e, "Could not serialize journey for the archive");
                return;
            }
        };
        let sequence = self.sequence.fetch_add(1, Ordering::Relaxed);
        let name = format!("et-{}-{:06}.xml", Utc::now().format("%Y%m%dT%H%M%S"), sequence);
        let path = self.dir.join(name);
        if let Err(e) = std::fs::write(&path, xml) {
            warn!(path = %path.display(), error = %e, "Could not write archived message");
        }
    }
}
