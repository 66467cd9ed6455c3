use image::{GrayImage, Luma, RgbImage};
use imageproc::contours::{find_contours, BorderType};
use imageproc::distance_transform::Norm;
use imageproc::geometry::{approximate_polygon_dp, arc_length};
use imageproc::morphology::close;
use imageproc::point::Point;
use tracing::debug;

use crate::analysis::RegionLocator;
use crate::config::LocatorConfig;
use crate::debug::StageRecorder;
use crate::rect::BoundingBox;
use crate::video::frame::RawFrame;

/// Candidates whose width or height is this close (relative) to the frame's
/// are background, not overlay.
const FULL_SPAN_TOLERANCE: f64 = 0.1;

/// Douglas–Peucker epsilon as a fraction of the contour's arc length.
const APPROX_EPSILON_FRACTION: f64 = 0.1;

/// Locates the overlay as the most rectangular region of a given color.
///
/// color mask -> closing -> outer contours -> polygon approximation ->
/// bounding rectangle -> best candidate by perimeter deviation.
pub struct ColorRegionLocator {
    config: LocatorConfig,
    recorder: StageRecorder,
}

impl ColorRegionLocator {
    pub fn new(config: LocatorConfig, recorder: StageRecorder) -> Self {
        Self { config, recorder }
    }

    fn color_mask(&self, image: &RgbImage) -> GrayImage {
        let tol = self.config.color_tolerance;
        let target = self.config.color.0;
        let lo = target.map(|c| c.saturating_sub(tol));
        let hi = target.map(|c| c.saturating_add(tol));

        GrayImage::from_fn(image.width(), image.height(), |x, y| {
            let p = image.get_pixel(x, y).0;
            let inside = (0..3).all(|c| p[c] >= lo[c] && p[c] <= hi[c]);
            Luma([if inside { 255 } else { 0 }])
        })
    }
}

impl RegionLocator for ColorRegionLocator {
    fn locate(&self, frame: &RawFrame) -> BoundingBox {
        let mask = self.color_mask(&frame.image);
        self.recorder.record(frame.frame_index, "mask", &mask);

        let closed = if self.config.closing_radius > 0 {
            close(&mask, Norm::L1, self.config.closing_radius)
        } else {
            mask
        };
        self.recorder.record(frame.frame_index, "closed", &closed);

        let contours = find_contours::<i32>(&closed);
        let outer = contours
            .iter()
            .filter(|c| c.border_type == BorderType::Outer)
            .map(|c| c.points.as_slice());

        let bbox = select_region(outer, frame.width(), frame.height(), &self.config);
        debug!(
            frame_index = frame.frame_index,
            contour_count = contours.len(),
            %bbox,
            "region located"
        );
        bbox
    }
}

/// Pick the candidate outline whose polygon approximation best matches its
/// bounding rectangle. Ties keep the first candidate.
pub(crate) fn select_region<'a>(
    candidates: impl Iterator<Item = &'a [Point<i32>]>,
    frame_width: u32,
    frame_height: u32,
    config: &LocatorConfig,
) -> BoundingBox {
    let min_area = config.min_area_fraction * frame_width as f64 * frame_height as f64;

    let mut best = BoundingBox::ZERO;
    let mut best_deviation = f64::INFINITY;

    for points in candidates {
        let arc = arc_length(points, true);
        if arc <= 0.0 {
            continue;
        }
        let approx = approximate_polygon_dp(points, APPROX_EPSILON_FRACTION * arc, true);
        let traced = arc_length(&approx, true);
        if traced <= 0.0 {
            continue;
        }

        let Some(rect) = bounding_rect(&approx) else {
            continue;
        };
        let deviation = (rect.perimeter() - traced).abs() / traced;

        let qualifies = rect.area() as f64 >= min_area
            && deviation <= config.max_perimeter_deviation
            && !is_close(rect.w as f64, frame_width as f64, FULL_SPAN_TOLERANCE)
            && !is_close(rect.h as f64, frame_height as f64, FULL_SPAN_TOLERANCE);

        if qualifies && deviation < best_deviation {
            best = rect;
            best_deviation = deviation;
        }
    }

    best
}

/// Smallest pixel-inclusive rectangle containing every point.
fn bounding_rect(points: &[Point<i32>]) -> Option<BoundingBox> {
    let first = points.first()?;
    let (mut x0, mut y0, mut x1, mut y1) = (first.x, first.y, first.x, first.y);
    for p in points {
        x0 = x0.min(p.x);
        y0 = y0.min(p.y);
        x1 = x1.max(p.x);
        y1 = y1.max(p.y);
    }
    if x0 < 0 || y0 < 0 {
        return None;
    }
    Some(BoundingBox::new(
        x0 as u32,
        y0 as u32,
        (x1 - x0 + 1) as u32,
        (y1 - y0 + 1) as u32,
    ))
}

/// `|a - b| <= rel_tol * max(|a|, |b|)`
fn is_close(a: f64, b: f64, rel_tol: f64) -> bool {
    (a - b).abs() <= rel_tol * a.abs().max(b.abs())
}

#[cfg(test)]
mod tests {
    use image::Rgb;
    use tracing_test::traced_test;

    use super::*;

    const OVERLAY: Rgb<u8> = Rgb([21, 12, 67]);

    fn frame_with_overlay(w: u32, h: u32, overlay: Option<BoundingBox>) -> RawFrame {
        let mut image = RgbImage::from_pixel(w, h, Rgb([120, 130, 110]));
        if let Some(b) = overlay {
            for y in b.y..b.y + b.h {
                for x in b.x..b.x + b.w {
                    image.put_pixel(x, y, OVERLAY);
                }
            }
            // Light "digits" inside the overlay.
            for y in b.y + b.h / 4..b.y + 3 * b.h / 4 {
                for x in b.x + b.w / 5..b.x + 2 * b.w / 5 {
                    image.put_pixel(x, y, Rgb([240, 240, 240]));
                }
            }
        }
        RawFrame {
            image,
            frame_index: 0,
            offset_seconds: 0.0,
        }
    }

    fn locator() -> ColorRegionLocator {
        ColorRegionLocator::new(LocatorConfig::default(), StageRecorder::disabled())
    }

    fn rect_points(x: i32, y: i32, w: i32, h: i32) -> Vec<Point<i32>> {
        vec![
            Point::new(x, y),
            Point::new(x + w - 1, y),
            Point::new(x + w - 1, y + h - 1),
            Point::new(x, y + h - 1),
        ]
    }

    #[test]
    #[traced_test]
    fn finds_overlay_box() {
        let expected = BoundingBox::new(20, 24, 120, 60);
        let frame = frame_with_overlay(640, 360, Some(expected));
        assert_eq!(locator().locate(&frame), expected);
    }

    #[test]
    fn no_overlay_yields_zero_box() {
        let frame = frame_with_overlay(640, 360, None);
        assert_eq!(locator().locate(&frame), BoundingBox::ZERO);
    }

    #[test]
    fn full_frame_region_is_background() {
        let frame = frame_with_overlay(640, 360, Some(BoundingBox::new(0, 0, 640, 360)));
        assert_eq!(locator().locate(&frame), BoundingBox::ZERO);
    }

    #[test]
    fn small_regions_are_rejected() {
        // 1% of 640x360 is 2304 px; 40x40 = 1600.
        let frame = frame_with_overlay(640, 360, Some(BoundingBox::new(300, 100, 40, 40)));
        assert_eq!(locator().locate(&frame), BoundingBox::ZERO);
    }

    #[test]
    fn prefers_the_most_rectangular_candidate() {
        let triangle = vec![Point::new(10, 10), Point::new(200, 10), Point::new(10, 150)];
        let rect = rect_points(300, 50, 150, 100);
        let candidates = [triangle.as_slice(), rect.as_slice()];
        let config = LocatorConfig {
            max_perimeter_deviation: 1.0,
            ..Default::default()
        };
        let b = select_region(candidates.into_iter(), 640, 360, &config);
        assert_eq!(b, BoundingBox::new(300, 50, 150, 100));
    }

    #[test]
    fn ties_keep_first_candidate() {
        let a = rect_points(10, 10, 100, 50);
        let b = rect_points(300, 200, 100, 50);
        let candidates = [a.as_slice(), b.as_slice()];
        let found = select_region(candidates.into_iter(), 640, 360, &LocatorConfig::default());
        assert_eq!(found, BoundingBox::new(10, 10, 100, 50));
    }

    #[test]
    fn close_comparison_is_relative() {
        assert!(is_close(600.0, 640.0, 0.1));
        assert!(!is_close(500.0, 640.0, 0.1));
    }
}
