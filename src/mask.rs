//! Visibility masks for extracted frames.
//!
//! A mask tells the downstream reconstruction which pixels to trust: a crop
//! mask removes fixed borders (rig hardware, letterboxing), a radial mask
//! removes fisheye vignettes. Masks are binary rasters combined by
//! elementwise product, with "no mask" acting as the multiplicative
//! identity. One `mask.png` is written per downscale level, next to that
//! level's frame directory.

use std::fs;
use std::path::{Path, PathBuf};

use image::imageops::{self, FilterType};
use image::{GrayImage, Luma};
use serde::{Deserialize, Serialize};

use crate::error::{Outcome, PipelineError, Warning};

/// Fractional margins to crop from each side of the frame.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct CropFactor {
    pub top: f32,
    pub bottom: f32,
    pub left: f32,
    pub right: f32,
}

impl CropFactor {
    pub fn new(top: f32, bottom: f32, left: f32, right: f32) -> Self {
        Self {
            top,
            bottom,
            left,
            right,
        }
    }

    pub fn is_zero(&self) -> bool {
        self.top == 0.0 && self.bottom == 0.0 && self.left == 0.0 && self.right == 0.0
    }

    fn in_range(&self) -> bool {
        [self.top, self.bottom, self.left, self.right]
            .iter()
            .all(|m| (0.0..=1.0).contains(m))
    }
}

/// Elementwise product of two masks; `None` is the identity.
///
/// Two present masks must share dimensions; they always describe the same
/// frame raster.
pub fn combine(a: Option<GrayImage>, b: Option<GrayImage>) -> Option<GrayImage> {
    match (a, b) {
        (None, other) | (other, None) => other,
        (Some(mut a), Some(b)) => {
            debug_assert_eq!(a.dimensions(), b.dimensions());
            for (pa, pb) in a.pixels_mut().zip(b.pixels()) {
                pa[0] *= pb[0];
            }
            Some(a)
        }
    }
}

/// Rectangle mask that keeps everything inside the crop margins.
///
/// All-zero margins mean no cropping and return `None`. Out-of-range margins
/// are reported but the mask is still built from them, with the pixel
/// offsets clamped to the raster.
pub fn generate_crop_mask(
    width: u32,
    height: u32,
    crop: CropFactor,
    warnings: &mut Vec<Warning>,
) -> Option<GrayImage> {
    if crop.is_zero() {
        return None;
    }
    if !crop.in_range() {
        warnings.push(Warning::CropFactorOutOfRange {
            top: crop.top,
            bottom: crop.bottom,
            left: crop.left,
            right: crop.right,
        });
    }

    let clamp = |frac: f32, dim: u32| ((frac * dim as f32) as i64).clamp(0, dim as i64) as u32;
    let top = clamp(crop.top, height);
    let bottom = clamp(crop.bottom, height);
    let left = clamp(crop.left, width);
    let right = clamp(crop.right, width);

    let mut mask = GrayImage::new(width, height);
    for y in top..height.saturating_sub(bottom) {
        for x in left..width.saturating_sub(right) {
            mask.put_pixel(x, y, Luma([1]));
        }
    }
    Some(mask)
}

/// Filled-circle mask centered on the image.
///
/// The radius is a fraction of the half-diagonal; a radius of 1 or more
/// covers the whole frame and returns `None`. A non-positive radius is
/// reported but still produces a mask (an empty one).
pub fn generate_circle_mask(
    width: u32,
    height: u32,
    percent_radius: f32,
    warnings: &mut Vec<Warning>,
) -> Option<GrayImage> {
    if percent_radius >= 1.0 {
        return None;
    }
    if percent_radius <= 0.0 {
        warnings.push(Warning::NonPositiveRadius(percent_radius));
    }

    let half_diagonal = ((width as f64).powi(2) + (height as f64).powi(2)).sqrt() / 2.0;
    let radius = (percent_radius as f64 * half_diagonal) as i64;
    let (cx, cy) = (width as i64 / 2, height as i64 / 2);

    let mut mask = GrayImage::new(width, height);
    if radius > 0 {
        for y in 0..height {
            for x in 0..width {
                let dx = x as i64 - cx;
                let dy = y as i64 - cy;
                if dx * dx + dy * dy <= radius * radius {
                    mask.put_pixel(x, y, Luma([1]));
                }
            }
        }
    }
    Some(mask)
}

/// Combined crop and radial mask, or `None` when neither applies.
pub fn generate_mask(
    width: u32,
    height: u32,
    crop: CropFactor,
    percent_radius: f32,
    warnings: &mut Vec<Warning>,
) -> Option<GrayImage> {
    let crop_mask = generate_crop_mask(width, height, crop, warnings);
    let circle_mask = generate_circle_mask(width, height, percent_radius, warnings);
    combine(crop_mask, circle_mask)
}

/// Builds the mask for an extracted frame directory and persists it at every
/// downscale level.
///
/// Dimensions are taken from the first frame in `image_dir`. The base mask
/// lands in `<parent>/masks/mask.png`, each downscale level in
/// `<parent>/masks_<factor>/mask.png`, resized with nearest-neighbour so the
/// raster stays binary. Returns `None` when no masking is needed. With
/// `strict` set, invalid parameters abort instead of degrading.
pub fn save_mask(
    image_dir: &Path,
    num_downscales: u32,
    crop: CropFactor,
    percent_radius: f32,
    strict: bool,
) -> Result<Outcome<Option<PathBuf>>, PipelineError> {
    let reference = first_frame(image_dir)?;
    let (width, height) = image::image_dimensions(&reference)?;

    let mut warnings = Vec::new();
    let mask = generate_mask(width, height, crop, percent_radius, &mut warnings);
    if strict {
        if let Some(warning) = warnings.into_iter().next() {
            return Err(PipelineError::MaskParameters(warning));
        }
        warnings = Vec::new();
    }
    let Some(mask) = mask else {
        return Ok(Outcome::new(None, warnings));
    };

    // Stored as 0/255 so the file reads as a normal binary image.
    let mut mask = mask;
    for px in mask.pixels_mut() {
        px[0] *= 255;
    }

    let parent = image_dir.parent().unwrap_or_else(|| Path::new("."));
    let base_dir = parent.join("masks");
    fs::create_dir_all(&base_dir)?;
    let base_path = base_dir.join("mask.png");
    mask.save(&base_path)?;

    for level in 1..=num_downscales {
        let factor = 1u32 << level;
        let level_dir = parent.join(format!("masks_{factor}"));
        fs::create_dir_all(&level_dir)?;
        let resized = imageops::resize(
            &mask,
            (width / factor).max(1),
            (height / factor).max(1),
            FilterType::Nearest,
        );
        resized.save(level_dir.join("mask.png"))?;
    }

    log::info!("generated masks under {}", parent.display());
    Ok(Outcome::new(Some(base_path), warnings))
}

fn first_frame(image_dir: &Path) -> Result<PathBuf, PipelineError> {
    let mut frames: Vec<PathBuf> = fs::read_dir(image_dir)?
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| {
            path.file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| n.starts_with("frame_"))
        })
        .collect();
    frames.sort();
    frames
        .into_iter()
        .next()
        .ok_or_else(|| PipelineError::NoFrames(image_dir.to_path_buf()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ones(count: &GrayImage) -> usize {
        count.pixels().filter(|p| p[0] == 1).count()
    }

    #[test]
    fn combine_identities() {
        assert!(combine(None, None).is_none());

        let mut warnings = Vec::new();
        let crop = generate_crop_mask(8, 8, CropFactor::new(0.25, 0.25, 0.0, 0.0), &mut warnings);
        let combined = combine(crop.clone(), None).unwrap();
        assert_eq!(combined, crop.unwrap());
        assert!(warnings.is_empty());
    }

    #[test]
    fn combine_is_elementwise_product_and_identity_stable() {
        let mut warnings = Vec::new();
        let crop = generate_crop_mask(16, 16, CropFactor::new(0.5, 0.0, 0.0, 0.0), &mut warnings);
        let circle = generate_circle_mask(16, 16, 0.5, &mut warnings);
        let product = combine(crop, circle).unwrap();

        // Intersection only: nothing above the crop line survives.
        for y in 0..8 {
            for x in 0..16 {
                assert_eq!(product.get_pixel(x, y)[0], 0);
            }
        }
        assert!(ones(&product) > 0);

        // Re-combining with the identity changes nothing.
        let again = combine(Some(product.clone()), None).unwrap();
        assert_eq!(again, product);
    }

    #[test]
    #[should_panic(expected = "assertion")]
    fn combining_masks_of_different_sizes_is_rejected() {
        combine(Some(GrayImage::new(8, 8)), Some(GrayImage::new(4, 4)));
    }

    #[test]
    fn zero_crop_is_no_mask() {
        let mut warnings = Vec::new();
        assert!(generate_crop_mask(8, 8, CropFactor::default(), &mut warnings).is_none());
        assert!(warnings.is_empty());
    }

    #[test]
    fn crop_mask_keeps_inner_rectangle() {
        let mut warnings = Vec::new();
        let mask =
            generate_crop_mask(10, 10, CropFactor::new(0.1, 0.1, 0.2, 0.2), &mut warnings).unwrap();
        assert_eq!(mask.get_pixel(0, 0)[0], 0);
        assert_eq!(mask.get_pixel(5, 5)[0], 1);
        assert_eq!(mask.get_pixel(9, 9)[0], 0);
        // 8 rows x 6 cols retained
        assert_eq!(ones(&mask), 48);
        assert!(warnings.is_empty());
    }

    #[test]
    fn out_of_range_crop_warns_but_builds() {
        let mut warnings = Vec::new();
        let mask =
            generate_crop_mask(10, 10, CropFactor::new(1.5, 0.0, 0.0, 0.0), &mut warnings);
        assert!(mask.is_some());
        assert!(matches!(
            warnings.as_slice(),
            [Warning::CropFactorOutOfRange { .. }]
        ));
    }

    #[test]
    fn full_radius_is_no_mask() {
        let mut warnings = Vec::new();
        assert!(generate_circle_mask(8, 8, 1.0, &mut warnings).is_none());
        assert!(warnings.is_empty());
    }

    #[test]
    fn non_positive_radius_warns_and_yields_empty_disc() {
        let mut warnings = Vec::new();
        let mask = generate_circle_mask(8, 8, -0.5, &mut warnings).unwrap();
        assert_eq!(ones(&mask), 0);
        assert_eq!(warnings, vec![Warning::NonPositiveRadius(-0.5)]);
    }

    #[test]
    fn circle_mask_is_centered() {
        let mut warnings = Vec::new();
        let mask = generate_circle_mask(21, 21, 0.5, &mut warnings).unwrap();
        assert_eq!(mask.get_pixel(10, 10)[0], 1);
        assert_eq!(mask.get_pixel(0, 0)[0], 0);
    }

    #[test]
    fn save_mask_writes_every_level() {
        let dir = tempfile::tempdir().unwrap();
        let frames = dir.path().join("images");
        fs::create_dir_all(&frames).unwrap();
        GrayImage::new(64, 48)
            .save(frames.join("frame_00001.png"))
            .unwrap();

        let outcome = save_mask(&frames, 2, CropFactor::default(), 0.8, false).unwrap();
        let mask_path = outcome.into_value().unwrap();
        assert_eq!(mask_path, dir.path().join("masks").join("mask.png"));

        let base = image::open(&mask_path).unwrap().to_luma8();
        assert_eq!(base.dimensions(), (64, 48));
        assert!(base.pixels().all(|p| p[0] == 0 || p[0] == 255));

        let half = image::open(dir.path().join("masks_2").join("mask.png"))
            .unwrap()
            .to_luma8();
        assert_eq!(half.dimensions(), (32, 24));
        let quarter = image::open(dir.path().join("masks_4").join("mask.png"))
            .unwrap()
            .to_luma8();
        assert_eq!(quarter.dimensions(), (16, 12));
    }

    #[test]
    fn save_mask_skips_file_when_identity() {
        let dir = tempfile::tempdir().unwrap();
        let frames = dir.path().join("images");
        fs::create_dir_all(&frames).unwrap();
        GrayImage::new(8, 8)
            .save(frames.join("frame_00001.png"))
            .unwrap();

        let outcome = save_mask(&frames, 0, CropFactor::default(), 1.0, false).unwrap();
        assert!(outcome.into_value().is_none());
        assert!(!dir.path().join("masks").exists());
    }

    #[test]
    fn save_mask_strict_rejects_bad_radius() {
        let dir = tempfile::tempdir().unwrap();
        let frames = dir.path().join("images");
        fs::create_dir_all(&frames).unwrap();
        GrayImage::new(8, 8)
            .save(frames.join("frame_00001.png"))
            .unwrap();

        let err = save_mask(&frames, 0, CropFactor::default(), -1.0, true).unwrap_err();
        assert!(matches!(err, PipelineError::MaskParameters(_)));
    }
}
