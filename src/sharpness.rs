//! Sharpness metric for candidate frames.
//!
//! Blur is the main reason a frame hurts a reconstruction: COLMAP and splat
//! trainers both rely on crisp edges for feature matching. The variance of
//! the Laplacian is the standard blur detector: the Laplacian responds to
//! rapid intensity change, so a sharp image has a wide response distribution
//! and a blurred one a narrow one.

use image::GrayImage;

/// Variance of the 3x3 cross Laplacian over a grayscale image.
///
/// Higher means sharper. Pure per-frame function; images smaller than the
/// kernel score 0.
pub fn variance_of_laplacian(img: &GrayImage) -> f64 {
    let (width, height) = img.dimensions();
    if width < 3 || height < 3 {
        return 0.0;
    }

    let data = img.as_raw();
    let w = width as usize;
    let h = height as usize;

    // [ 0  1  0 ]
    // [ 1 -4  1 ]
    // [ 0  1  0 ]
    let mut sum = 0.0f64;
    let mut sum_sq = 0.0f64;
    for y in 1..h - 1 {
        let row = y * w;
        for x in 1..w - 1 {
            let idx = row + x;
            let response = data[idx - w] as i32
                + data[idx + w] as i32
                + data[idx - 1] as i32
                + data[idx + 1] as i32
                - 4 * data[idx] as i32;
            let response = response as f64;
            sum += response;
            sum_sq += response * response;
        }
    }

    let n = ((w - 2) * (h - 2)) as f64;
    let mean = sum / n;
    (sum_sq / n - mean * mean).max(0.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Luma;

    #[test]
    fn uniform_image_scores_zero() {
        let img = GrayImage::from_pixel(16, 16, Luma([128]));
        assert_eq!(variance_of_laplacian(&img), 0.0);
    }

    #[test]
    fn tiny_image_scores_zero() {
        let img = GrayImage::new(2, 2);
        assert_eq!(variance_of_laplacian(&img), 0.0);
    }

    #[test]
    fn hard_edge_scores_higher_than_soft_gradient() {
        let edge = GrayImage::from_fn(32, 32, |x, _| Luma([if x < 16 { 0 } else { 255 }]));
        let gradient = GrayImage::from_fn(32, 32, |x, _| Luma([(x * 8) as u8]));
        assert!(variance_of_laplacian(&edge) > variance_of_laplacian(&gradient));
        assert!(variance_of_laplacian(&gradient) >= 0.0);
    }
}
