//! Frame annotation: colored track rectangles drawn in place.
//!
//! The daemon runs headless; annotated frames exist for downstream sinks
//! (recordings, debugging) and the label itself travels as data in the
//! per-frame report.

use image::{Rgb, RgbImage};
use rollcall_core::BoundingBox;

use crate::pipeline::TrackLabel;

const COLOR_KNOWN: Rgb<u8> = Rgb([0, 200, 0]);
const COLOR_UNKNOWN: Rgb<u8> = Rgb([220, 0, 0]);
const COLOR_PENDING: Rgb<u8> = Rgb([230, 220, 0]);
const COLOR_REJECTED: Rgb<u8> = Rgb([160, 160, 160]);

fn label_style(label: &TrackLabel) -> (Rgb<u8>, u32) {
    match label {
        TrackLabel::Known { .. } => (COLOR_KNOWN, 2),
        TrackLabel::Unknown => (COLOR_UNKNOWN, 2),
        TrackLabel::Pending => (COLOR_PENDING, 1),
        TrackLabel::TooSmall | TrackLabel::Blurry | TrackLabel::Rejected(_) => {
            (COLOR_REJECTED, 1)
        }
    }
}

/// Draw one track's rectangle with the color/weight of its label.
pub fn draw_track(frame: &mut RgbImage, bbox: &BoundingBox, label: &TrackLabel) {
    let (color, thickness) = label_style(label);
    draw_rect(frame, bbox, color, thickness);
}

/// Axis-aligned rectangle outline, clamped to the frame.
pub fn draw_rect(frame: &mut RgbImage, bbox: &BoundingBox, color: Rgb<u8>, thickness: u32) {
    let (w, h) = frame.dimensions();
    if w == 0 || h == 0 || !bbox.is_valid() {
        return;
    }

    let x1 = (bbox.x1.max(0.0) as u32).min(w - 1);
    let y1 = (bbox.y1.max(0.0) as u32).min(h - 1);
    let x2 = (bbox.x2.max(0.0) as u32).min(w - 1);
    let y2 = (bbox.y2.max(0.0) as u32).min(h - 1);

    for t in 0..thickness {
        let top = (y1 + t).min(h - 1);
        let bottom = y2.saturating_sub(t);
        for x in x1..=x2 {
            frame.put_pixel(x, top, color);
            frame.put_pixel(x, bottom, color);
        }
        let left = (x1 + t).min(w - 1);
        let right = x2.saturating_sub(t);
        for y in y1..=y2 {
            frame.put_pixel(left, y, color);
            frame.put_pixel(right, y, color);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rect_edges_are_painted() {
        let mut frame = RgbImage::new(100, 100);
        let bbox = BoundingBox::new(10.0, 20.0, 40.0, 60.0);
        draw_rect(&mut frame, &bbox, Rgb([255, 0, 0]), 1);

        assert_eq!(frame.get_pixel(10, 20).0, [255, 0, 0]); // top-left corner
        assert_eq!(frame.get_pixel(40, 60).0, [255, 0, 0]); // bottom-right corner
        assert_eq!(frame.get_pixel(25, 20).0, [255, 0, 0]); // top edge
        assert_eq!(frame.get_pixel(10, 40).0, [255, 0, 0]); // left edge
        assert_eq!(frame.get_pixel(25, 40).0, [0, 0, 0]); // interior untouched
    }

    #[test]
    fn rect_clamps_outside_frame() {
        let mut frame = RgbImage::new(50, 50);
        let bbox = BoundingBox::new(-10.0, -10.0, 80.0, 80.0);
        draw_rect(&mut frame, &bbox, Rgb([0, 255, 0]), 2);
        assert_eq!(frame.get_pixel(0, 0).0, [0, 255, 0]);
        assert_eq!(frame.get_pixel(49, 49).0, [0, 255, 0]);
    }

    #[test]
    fn known_label_is_heavier_than_pending() {
        let mut known_frame = RgbImage::new(60, 60);
        let mut pending_frame = RgbImage::new(60, 60);
        let bbox = BoundingBox::new(10.0, 10.0, 50.0, 50.0);

        draw_track(
            &mut known_frame,
            &bbox,
            &TrackLabel::Known {
                name: "alice".to_string(),
                similarity: 0.9,
            },
        );
        draw_track(&mut pending_frame, &bbox, &TrackLabel::Pending);

        // Thickness 2 paints the row below the top edge too.
        assert_ne!(known_frame.get_pixel(30, 11).0, [0, 0, 0]);
        assert_eq!(pending_frame.get_pixel(30, 11).0, [0, 0, 0]);
    }
}
