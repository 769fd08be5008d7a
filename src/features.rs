//! Keypoint-based motion metric between consecutive frames.
//!
//! Frame-to-frame motion is what separates a useful new viewpoint from a
//! near-duplicate. Corners are detected with FAST-9 (`imageproc`), described
//! with 256-bit BRIEF-style binary descriptors sampled from a blurred patch,
//! and matched by nearest-neighbour Hamming distance. The motion score is
//! the median matched-keypoint displacement, normalised by the largest image
//! dimension so it is comparable across resolutions.
//!
//! The metric is directional: it is always computed from the previous frame
//! to the current one, never symmetrised.

use std::sync::OnceLock;

use image::GrayImage;
use imageproc::corners::corners_fast9;
use imageproc::filter::gaussian_blur_f32;

/// Number of bits in a descriptor, stored as four u64 lanes.
const DESCRIPTOR_BITS: usize = 256;
/// Intensity comparisons stay within this offset of the keypoint.
const SAMPLE_RADIUS: i32 = 13;
/// Keypoints closer than this to the border cannot be described.
const BORDER: u32 = 16;

/// Binary descriptor over a smoothed patch.
pub type Descriptor = [u64; 4];

/// Keypoints and descriptors detected in a single frame.
#[derive(Debug, Clone, Default)]
pub struct FeatureSet {
    pub keypoints: Vec<(f32, f32)>,
    pub descriptors: Vec<Descriptor>,
}

impl FeatureSet {
    pub fn is_empty(&self) -> bool {
        self.descriptors.is_empty()
    }

    pub fn len(&self) -> usize {
        self.descriptors.len()
    }
}

/// Fixed point-pair sampling pattern shared by every descriptor.
///
/// Generated once from a constant xorshift seed so detection is
/// deterministic across runs and platforms.
fn sampling_pattern() -> &'static [(i32, i32, i32, i32); DESCRIPTOR_BITS] {
    static PATTERN: OnceLock<[(i32, i32, i32, i32); DESCRIPTOR_BITS]> = OnceLock::new();
    PATTERN.get_or_init(|| {
        let mut state = 0x9e3779b97f4a7c15u64;
        let mut next_offset = || {
            state ^= state << 13;
            state ^= state >> 7;
            state ^= state << 17;
            (state % (2 * SAMPLE_RADIUS as u64 + 1)) as i32 - SAMPLE_RADIUS
        };
        let mut pairs = [(0, 0, 0, 0); DESCRIPTOR_BITS];
        for pair in pairs.iter_mut() {
            *pair = (next_offset(), next_offset(), next_offset(), next_offset());
        }
        pairs
    })
}

/// Detects FAST-9 corners and describes the strongest `max_keypoints`.
///
/// Corners too close to the border are dropped because their sampling patch
/// would leave the image.
pub fn detect_features(gray: &GrayImage, fast_threshold: u8, max_keypoints: usize) -> FeatureSet {
    let (width, height) = gray.dimensions();
    if width <= 2 * BORDER || height <= 2 * BORDER {
        return FeatureSet::default();
    }

    let mut corners = corners_fast9(gray, fast_threshold);
    corners.retain(|c| {
        c.x >= BORDER && c.y >= BORDER && c.x < width - BORDER && c.y < height - BORDER
    });
    corners.sort_unstable_by(|a, b| b.score.total_cmp(&a.score));
    corners.truncate(max_keypoints);

    let blurred = gaussian_blur_f32(gray, 2.0);
    let descriptors = corners.iter().map(|c| describe(&blurred, c.x, c.y)).collect();
    let keypoints = corners.iter().map(|c| (c.x as f32, c.y as f32)).collect();

    FeatureSet {
        keypoints,
        descriptors,
    }
}

fn describe(blurred: &GrayImage, cx: u32, cy: u32) -> Descriptor {
    let mut bits = [0u64; 4];
    for (i, &(x0, y0, x1, y1)) in sampling_pattern().iter().enumerate() {
        let a = blurred.get_pixel((cx as i32 + x0) as u32, (cy as i32 + y0) as u32)[0];
        let b = blurred.get_pixel((cx as i32 + x1) as u32, (cy as i32 + y1) as u32)[0];
        if a < b {
            bits[i / 64] |= 1 << (i % 64);
        }
    }
    bits
}

pub fn hamming_distance(a: &Descriptor, b: &Descriptor) -> u32 {
    a.iter()
        .zip(b.iter())
        .map(|(x, y)| (x ^ y).count_ones())
        .sum()
}

/// Nearest-neighbour match of every descriptor in `prev` against `curr`.
///
/// Returns `(prev_index, curr_index)` pairs. Every query keeps its best
/// match; robustness against outliers comes from the median in the motion
/// score, not from match pruning.
pub fn match_features(prev: &FeatureSet, curr: &FeatureSet) -> Vec<(usize, usize)> {
    if prev.is_empty() || curr.is_empty() {
        return Vec::new();
    }

    prev.descriptors
        .iter()
        .enumerate()
        .map(|(i, query)| {
            let mut best = (0usize, u32::MAX);
            for (j, candidate) in curr.descriptors.iter().enumerate() {
                let dist = hamming_distance(query, candidate);
                if dist < best.1 {
                    best = (j, dist);
                }
            }
            (i, best.0)
        })
        .collect()
}

/// Normalised median keypoint displacement from `prev` to `curr`.
///
/// Returns 0 when either frame has no descriptors or fewer than
/// `min_matches` matches are found; downstream treats that as "no evidence
/// of change" and drops the frame.
pub fn motion_score(prev: &FeatureSet, curr: &FeatureSet, max_dim: u32, min_matches: usize) -> f64 {
    if prev.is_empty() || curr.is_empty() || max_dim == 0 {
        return 0.0;
    }

    let matches = match_features(prev, curr);
    if matches.len() < min_matches {
        return 0.0;
    }

    let mut displacements: Vec<f64> = matches
        .into_iter()
        .map(|(i, j)| {
            let (x0, y0) = prev.keypoints[i];
            let (x1, y1) = curr.keypoints[j];
            ((x0 - x1) as f64).hypot((y0 - y1) as f64)
        })
        .collect();

    median(&mut displacements) / max_dim as f64
}

fn median(values: &mut [f64]) -> f64 {
    values.sort_unstable_by(|a, b| a.total_cmp(b));
    let mid = values.len() / 2;
    if values.len() % 2 == 1 {
        values[mid]
    } else {
        (values[mid - 1] + values[mid]) / 2.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Luma;

    fn feature_at(x: f32, y: f32, descriptor: Descriptor) -> ((f32, f32), Descriptor) {
        ((x, y), descriptor)
    }

    fn set_from(parts: Vec<((f32, f32), Descriptor)>) -> FeatureSet {
        let mut set = FeatureSet::default();
        for (kp, desc) in parts {
            set.keypoints.push(kp);
            set.descriptors.push(desc);
        }
        set
    }

    #[test]
    fn hamming_counts_differing_bits() {
        assert_eq!(hamming_distance(&[0, 0, 0, 0], &[0, 0, 0, 0]), 0);
        assert_eq!(hamming_distance(&[0b1011, 0, 0, 0], &[0b0001, 0, 0, 0]), 2);
        assert_eq!(hamming_distance(&[u64::MAX; 4], &[0; 4]), 256);
    }

    #[test]
    fn sampling_pattern_is_deterministic_and_in_bounds() {
        let pattern = sampling_pattern();
        assert_eq!(pattern, sampling_pattern());
        for &(x0, y0, x1, y1) in pattern.iter() {
            for offset in [x0, y0, x1, y1] {
                assert!(offset.abs() <= SAMPLE_RADIUS);
            }
        }
    }

    #[test]
    fn blank_image_yields_no_features() {
        let img = GrayImage::from_pixel(64, 64, Luma([200]));
        assert!(detect_features(&img, 32, 500).is_empty());
    }

    #[test]
    fn textured_image_yields_features_within_border() {
        // Checkerboard of 8px tiles has corners everywhere.
        let img = GrayImage::from_fn(128, 128, |x, y| {
            Luma([if (x / 8 + y / 8) % 2 == 0 { 0 } else { 255 }])
        });
        let features = detect_features(&img, 32, 500);
        assert!(!features.is_empty());
        assert_eq!(features.keypoints.len(), features.descriptors.len());
        for &(x, y) in &features.keypoints {
            assert!(x >= BORDER as f32 && y >= BORDER as f32);
            assert!(x < (128 - BORDER) as f32 && y < (128 - BORDER) as f32);
        }
    }

    #[test]
    fn motion_is_zero_without_descriptors() {
        let empty = FeatureSet::default();
        let one = set_from(vec![feature_at(20.0, 20.0, [1, 2, 3, 4])]);
        assert_eq!(motion_score(&empty, &one, 100, 8), 0.0);
        assert_eq!(motion_score(&one, &empty, 100, 8), 0.0);
    }

    #[test]
    fn motion_is_zero_below_match_minimum() {
        let a = set_from(vec![feature_at(10.0, 10.0, [7, 0, 0, 0])]);
        let b = set_from(vec![feature_at(30.0, 10.0, [7, 0, 0, 0])]);
        // One perfect match, but fewer than the required eight.
        assert_eq!(motion_score(&a, &b, 100, 8), 0.0);
        assert!(motion_score(&a, &b, 100, 1) > 0.0);
    }

    #[test]
    fn motion_is_median_displacement_over_max_dim() {
        // Nine distinctive descriptors, each shifted right by 10 pixels.
        let mut prev = Vec::new();
        let mut curr = Vec::new();
        for k in 0..9u64 {
            let descriptor = [1 << k, k, !k, k.wrapping_mul(0x1234_5678_9abc_def1)];
            prev.push(feature_at(20.0 + 5.0 * k as f32, 40.0, descriptor));
            curr.push(feature_at(30.0 + 5.0 * k as f32, 40.0, descriptor));
        }
        let prev = set_from(prev);
        let curr = set_from(curr);
        let score = motion_score(&prev, &curr, 200, 8);
        assert!((score - 10.0 / 200.0).abs() < 1e-9);
    }

    #[test]
    fn median_averages_even_counts() {
        assert_eq!(median(&mut [3.0, 1.0, 2.0]), 2.0);
        assert_eq!(median(&mut [4.0, 1.0, 2.0, 3.0]), 2.5);
    }
}
