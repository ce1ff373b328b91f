//! Centroid tracker — temporal identity for per-frame face detections.
//!
//! Greedy nearest-centroid association: no motion model, no appearance
//! features. Adequate for the frame rates and face densities this pipeline
//! runs at; it is not a general re-identification tracker.

use crate::types::BoundingBox;
use std::collections::BTreeMap;

struct TrackState {
    bbox: BoundingBox,
    frames_since_seen: u32,
}

/// Assigns stable ids to detections across frames.
///
/// Ids increase monotonically and are never reused while a track is alive.
/// A track unmatched for more than `max_lost` consecutive updates is removed.
pub struct CentroidTracker {
    next_id: u64,
    tracks: BTreeMap<u64, TrackState>,
    max_lost: u32,
}

impl CentroidTracker {
    pub fn new(max_lost: u32) -> Self {
        Self {
            next_id: 0,
            tracks: BTreeMap::new(),
            max_lost,
        }
    }

    pub fn len(&self) -> usize {
        self.tracks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tracks.is_empty()
    }

    pub fn contains(&self, id: u64) -> bool {
        self.tracks.contains_key(&id)
    }

    /// Current live tracks in id order.
    pub fn live_tracks(&self) -> Vec<(u64, BoundingBox)> {
        self.tracks.iter().map(|(&id, t)| (id, t.bbox)).collect()
    }

    fn spawn(&mut self, bbox: BoundingBox) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        self.tracks.insert(
            id,
            TrackState {
                bbox,
                frames_since_seen: 0,
            },
        );
        id
    }

    /// Associate `detections` with existing tracks and return `(id, bbox)`
    /// pairs in detection order.
    ///
    /// Association is greedy on squared centroid distance: repeatedly take
    /// the globally smallest remaining (track, detection) pair until rows or
    /// columns are exhausted. O(T·D) per pick, which is fine for the handful
    /// of faces a frame carries.
    pub fn update(&mut self, detections: &[BoundingBox]) -> Vec<(u64, BoundingBox)> {
        if self.tracks.is_empty() {
            return detections.iter().map(|&b| (self.spawn(b), b)).collect();
        }

        let track_ids: Vec<u64> = self.tracks.keys().copied().collect();
        let track_centroids: Vec<(f32, f32)> = track_ids
            .iter()
            .map(|id| self.tracks[id].bbox.centroid())
            .collect();
        let det_centroids: Vec<(f32, f32)> = detections.iter().map(|b| b.centroid()).collect();

        let t = track_centroids.len();
        let d = det_centroids.len();
        let mut dist = vec![vec![0.0f64; d]; t];
        for (i, tc) in track_centroids.iter().enumerate() {
            for (j, dc) in det_centroids.iter().enumerate() {
                let dx = (tc.0 - dc.0) as f64;
                let dy = (tc.1 - dc.1) as f64;
                dist[i][j] = dx * dx + dy * dy;
            }
        }

        let mut det_to_track: Vec<Option<u64>> = vec![None; d];
        let mut row_used = vec![false; t];
        let mut col_used = vec![false; d];

        for _ in 0..t.min(d) {
            let mut best: Option<(usize, usize, f64)> = None;
            for (i, row) in dist.iter().enumerate() {
                if row_used[i] {
                    continue;
                }
                for (j, &v) in row.iter().enumerate() {
                    if col_used[j] {
                        continue;
                    }
                    if best.map_or(true, |(_, _, bv)| v < bv) {
                        best = Some((i, j, v));
                    }
                }
            }
            let Some((i, j, _)) = best else { break };
            row_used[i] = true;
            col_used[j] = true;
            det_to_track[j] = Some(track_ids[i]);
        }

        let mut out = Vec::with_capacity(d);
        for (j, &bbox) in detections.iter().enumerate() {
            match det_to_track[j] {
                Some(id) => {
                    if let Some(track) = self.tracks.get_mut(&id) {
                        track.bbox = bbox;
                        track.frames_since_seen = 0;
                    }
                    out.push((id, bbox));
                }
                None => out.push((self.spawn(bbox), bbox)),
            }
        }

        // Age every track that neither matched nor was just spawned.
        let max_lost = self.max_lost;
        let mut stale = Vec::new();
        for (&id, track) in self.tracks.iter_mut() {
            if out.iter().any(|&(o, _)| o == id) {
                continue;
            }
            track.frames_since_seen += 1;
            if track.frames_since_seen > max_lost {
                stale.push(id);
            }
        }
        for id in stale {
            self.tracks.remove(&id);
        }

        out
    }
}
