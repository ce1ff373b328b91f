//! Unknown-face archiver — fire-and-forget persistence of unmatched crops.
//!
//! A single shared timestamp gates saves to one per cooldown window across
//! all tracks; each accepted save runs on its own short-lived thread so the
//! frame loop never waits on the filesystem.

use chrono::Utc;
use image::RgbImage;
use std::path::PathBuf;
use std::sync::Mutex;
use std::time::{Duration, Instant};

pub struct UnknownFaceArchiver {
    dir: PathBuf,
    cooldown: Duration,
    last_saved: Mutex<Option<Instant>>,
}

impl UnknownFaceArchiver {
    pub fn new(dir: PathBuf, cooldown: Duration) -> Self {
        Self {
            dir,
            cooldown,
            last_saved: Mutex::new(None),
        }
    }

    /// Offer a crop for archiving. Returns whether the save was accepted;
    /// a rejected offer (still cooling down) is free.
    pub fn offer(&self, crop: &RgbImage) -> bool {
        {
            let mut last = self.last_saved.lock().unwrap_or_else(|e| e.into_inner());
            if let Some(t) = *last {
                if t.elapsed() < self.cooldown {
                    return false;
                }
            }
            *last = Some(Instant::now());
        }

        let crop = crop.clone();
        let dir = self.dir.clone();
        let spawned = std::thread::Builder::new()
            .name("unknown-face-save".to_string())
            .spawn(move || save_crop(&dir, &crop));
        if let Err(e) = spawned {
            tracing::warn!(error = %e, "could not spawn unknown-face save, writing inline");
            save_crop(&self.dir, &crop);
        }
        true
    }
}

fn save_crop(dir: &std::path::Path, crop: &RgbImage) {
    if let Err(e) = std::fs::create_dir_all(dir) {
        tracing::error!(dir = %dir.display(), error = %e, "failed to create unknown-face dir");
        return;
    }
    let stamp = Utc::now().format("%Y%m%d_%H%M%S_%6f");
    let path = dir.join(format!("unknown_{stamp}.jpg"));
    match crop.save(&path) {
        Ok(()) => tracing::info!(path = %path.display(), "saved unknown face"),
        Err(e) => tracing::error!(path = %path.display(), error = %e, "failed to save unknown face"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn crop() -> RgbImage {
        RgbImage::from_pixel(8, 8, image::Rgb([10, 20, 30]))
    }

    #[test]
    fn second_offer_within_cooldown_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let archiver =
            UnknownFaceArchiver::new(dir.path().to_path_buf(), Duration::from_secs(60));
        assert!(archiver.offer(&crop()));
        assert!(!archiver.offer(&crop()));
    }

    #[test]
    fn offer_after_cooldown_is_accepted() {
        let dir = tempfile::tempdir().unwrap();
        let archiver =
            UnknownFaceArchiver::new(dir.path().to_path_buf(), Duration::from_millis(30));
        assert!(archiver.offer(&crop()));
        std::thread::sleep(Duration::from_millis(60));
        assert!(archiver.offer(&crop()));
    }

    #[test]
    fn save_writes_a_jpeg_with_timestamped_name() {
        let dir = tempfile::tempdir().unwrap();
        save_crop(dir.path(), &crop());

        let entries: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(entries.len(), 1);
        assert!(entries[0].starts_with("unknown_"));
        assert!(entries[0].ends_with(".jpg"));
    }

    #[test]
    fn save_into_missing_directory_creates_it() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("a/b");
        save_crop(&nested, &crop());
        assert_eq!(std::fs::read_dir(&nested).unwrap().count(), 1);
    }
}
