use image::imageops::{self, crop_imm};
use image::{GrayImage, Luma};
use imageproc::region_labelling::{connected_components, Connectivity};

use crate::analysis::FrameError;
use crate::config::PreprocessConfig;
use crate::debug::StageRecorder;
use crate::rect::BoundingBox;
use crate::video::frame::RawFrame;

/// Components are kept if at least `sqrt(crop area) / 10` pixels large...
const COMPONENT_AREA_DIVISOR: f64 = 10.0;
/// ...unless that comes out below this, in which case the floor applies.
const COMPONENT_AREA_CUTOFF: f64 = 12.0;
const COMPONENT_AREA_FLOOR: f64 = 4.0;

/// Turn the overlay region of a frame into dark-on-light text for recognition.
///
/// grayscale -> fixed-threshold binarization -> small component removal -> inversion
pub fn prepare_bitmap(
    frame: &RawFrame,
    bbox: BoundingBox,
    config: &PreprocessConfig,
    recorder: &StageRecorder,
) -> Result<GrayImage, FrameError> {
    if !bbox.fits_within(frame.width(), frame.height()) {
        return Err(FrameError::RegionInvalid(format!(
            "{bbox} is not inside the {}x{} frame",
            frame.width(),
            frame.height()
        )));
    }

    let cropped = crop_imm(&frame.image, bbox.x, bbox.y, bbox.w, bbox.h);
    let grayscale = imageops::grayscale(&*cropped);
    recorder.record(frame.frame_index, "grayscale", &grayscale);

    let black_white = binarize(&grayscale, config.intensity_threshold);
    recorder.record(frame.frame_index, "black_white", &black_white);

    let mut filtered = remove_small_components(&black_white, min_component_area(bbox.area()));
    recorder.record(frame.frame_index, "filtered", &filtered);

    imageops::invert(&mut filtered);
    recorder.record(frame.frame_index, "inverted", &filtered);

    Ok(filtered)
}

fn binarize(image: &GrayImage, threshold: u8) -> GrayImage {
    GrayImage::from_fn(image.width(), image.height(), |x, y| {
        Luma([if image.get_pixel(x, y)[0] >= threshold { 255 } else { 0 }])
    })
}

pub(crate) fn min_component_area(crop_area: u64) -> u64 {
    let scaled = (crop_area as f64).sqrt() / COMPONENT_AREA_DIVISOR;
    let area = if scaled < COMPONENT_AREA_CUTOFF {
        COMPONENT_AREA_FLOOR
    } else {
        scaled
    };
    area.ceil() as u64
}

/// Zero out 8-connected foreground components smaller than `min_area` pixels.
fn remove_small_components(image: &GrayImage, min_area: u64) -> GrayImage {
    let labels = connected_components(image, Connectivity::Eight, Luma([0u8]));

    let label_count = labels.pixels().map(|p| p[0]).max().unwrap_or(0) as usize;
    let mut sizes = vec![0u64; label_count + 1];
    for p in labels.pixels() {
        sizes[p[0] as usize] += 1;
    }

    GrayImage::from_fn(image.width(), image.height(), |x, y| {
        let label = labels.get_pixel(x, y)[0] as usize;
        let keep = label != 0 && sizes[label] >= min_area;
        Luma([if keep { 255 } else { 0 }])
    })
}

#[cfg(test)]
mod tests {
    use image::{Rgb, RgbImage};

    use super::*;

    fn frame() -> RawFrame {
        let mut image = RgbImage::from_pixel(200, 100, Rgb([20, 10, 60]));
        // A 10x20 bright stroke and a single bright speck.
        for y in 40..60 {
            for x in 50..60 {
                image.put_pixel(x, y, Rgb([250, 250, 250]));
            }
        }
        image.put_pixel(100, 50, Rgb([250, 250, 250]));
        RawFrame {
            image,
            frame_index: 7,
            offset_seconds: 0.0,
        }
    }

    #[test]
    fn component_area_floor() {
        assert_eq!(min_component_area(0), 4);
        assert_eq!(min_component_area(100 * 100), 4);
        assert_eq!(min_component_area(120 * 120), 12);
        assert_eq!(min_component_area(400 * 250), 32);
    }

    #[test]
    fn produces_dark_text_on_light_background() {
        let bbox = BoundingBox::new(0, 0, 200, 100);
        let out = prepare_bitmap(&frame(), bbox, &PreprocessConfig::default(), &StageRecorder::disabled())
            .unwrap();
        assert_eq!(out.dimensions(), (200, 100));
        // Stroke survives and is dark.
        assert_eq!(out.get_pixel(55, 50)[0], 0);
        // Speck is removed, background is light.
        assert_eq!(out.get_pixel(100, 50)[0], 255);
        assert_eq!(out.get_pixel(5, 5)[0], 255);
    }

    #[test]
    fn crop_is_relative_to_box() {
        let bbox = BoundingBox::new(45, 35, 30, 30);
        let out = prepare_bitmap(&frame(), bbox, &PreprocessConfig::default(), &StageRecorder::disabled())
            .unwrap();
        assert_eq!(out.dimensions(), (30, 30));
        assert_eq!(out.get_pixel(10, 10)[0], 0);
        assert_eq!(out.get_pixel(0, 0)[0], 255);
    }

    #[test]
    fn degenerate_boxes_are_invalid() {
        let f = frame();
        let cfg = PreprocessConfig::default();
        let rec = StageRecorder::disabled();
        for bbox in [BoundingBox::ZERO, BoundingBox::new(190, 0, 20, 10), BoundingBox::new(0, 0, 5, 0)] {
            assert!(matches!(
                prepare_bitmap(&f, bbox, &cfg, &rec),
                Err(FrameError::RegionInvalid(_))
            ));
        }
    }
}
