//! Five-point face alignment for the ArcFace input.
//!
//! A similarity transform (scale, rotation, translation) is fitted from the
//! detected landmarks to the canonical 112×112 landmark layout by least
//! squares, then the frame is warped through it.

use image::{Rgb, RgbImage};
use imageproc::geometric_transformations::{warp_into, Interpolation, Projection};

/// Eye, eye, nose, mouth corner, mouth corner, in that order.
pub type Landmarks = [(f32, f32); 5];

pub const ALIGNED_SIZE: u32 = 112;

/// Canonical landmark positions in a 112×112 ArcFace crop.
pub const CANONICAL_LANDMARKS: Landmarks = [
    (38.2946, 51.6963),
    (73.5318, 51.5014),
    (56.0252, 71.7366),
    (41.5493, 92.3655),
    (70.7299, 92.2041),
];

/// Least-squares similarity mapping `src` onto `dst`, as a row-major 3×3
/// matrix. `None` when the source points coincide.
pub fn similarity_transform(src: &Landmarks, dst: &Landmarks) -> Option<[f32; 9]> {
    let mean = |pts: &Landmarks| {
        let (sx, sy) = pts.iter().fold((0.0, 0.0), |(ax, ay), &(x, y)| (ax + x, ay + y));
        (sx / pts.len() as f32, sy / pts.len() as f32)
    };
    let (smx, smy) = mean(src);
    let (dmx, dmy) = mean(dst);

    let (mut dot, mut cross, mut norm) = (0.0f32, 0.0f32, 0.0f32);
    for (&(sx, sy), &(dx, dy)) in src.iter().zip(dst) {
        let (sx, sy) = (sx - smx, sy - smy);
        let (dx, dy) = (dx - dmx, dy - dmy);
        dot += sx * dx + sy * dy;
        cross += sx * dy - sy * dx;
        norm += sx * sx + sy * sy;
    }
    if norm < 1e-6 {
        return None;
    }

    let (a, b) = (dot / norm, cross / norm);
    let tx = dmx - (a * smx - b * smy);
    let ty = dmy - (b * smx + a * smy);
    Some([a, -b, tx, b, a, ty, 0.0, 0.0, 1.0])
}

/// Warp `frame` so `landmarks` land on [`CANONICAL_LANDMARKS`].
/// `None` when no transform can be fitted.
pub fn align_face(frame: &RgbImage, landmarks: &Landmarks) -> Option<RgbImage> {
    let matrix = similarity_transform(landmarks, &CANONICAL_LANDMARKS)?;
    let projection = Projection::from_matrix(matrix)?;
    let mut aligned = RgbImage::new(ALIGNED_SIZE, ALIGNED_SIZE);
    warp_into(frame, &projection, Interpolation::Bilinear, Rgb([0, 0, 0]), &mut aligned);
    Some(aligned)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn apply(m: &[f32; 9], (x, y): (f32, f32)) -> (f32, f32) {
        (m[0] * x + m[1] * y + m[2], m[3] * x + m[4] * y + m[5])
    }

    #[test]
    fn test_identity_when_points_already_canonical() {
        let m = similarity_transform(&CANONICAL_LANDMARKS, &CANONICAL_LANDMARKS).unwrap();
        assert!((m[0] - 1.0).abs() < 1e-4);
        assert!(m[1].abs() < 1e-4 && m[3].abs() < 1e-4);
        assert!(m[2].abs() < 1e-3 && m[5].abs() < 1e-3);
    }

    #[test]
    fn test_recovers_scale_and_shift() {
        let src = CANONICAL_LANDMARKS.map(|(x, y)| (x * 2.0 + 100.0, y * 2.0 + 40.0));
        let m = similarity_transform(&src, &CANONICAL_LANDMARKS).unwrap();

        assert!((m[0] - 0.5).abs() < 1e-3, "scale {}", m[0]);
        for (s, d) in src.iter().zip(&CANONICAL_LANDMARKS) {
            let (x, y) = apply(&m, *s);
            assert!((x - d.0).abs() < 1e-2 && (y - d.1).abs() < 1e-2);
        }
    }

    #[test]
    fn test_recovers_rotation() {
        let (c, s) = (30f32.to_radians().cos(), 30f32.to_radians().sin());
        let src = CANONICAL_LANDMARKS.map(|(x, y)| (c * x - s * y + 200.0, s * x + c * y + 50.0));
        let m = similarity_transform(&src, &CANONICAL_LANDMARKS).unwrap();

        let (x, y) = apply(&m, src[2]);
        assert!((x - CANONICAL_LANDMARKS[2].0).abs() < 1e-2);
        assert!((y - CANONICAL_LANDMARKS[2].1).abs() < 1e-2);
    }

    #[test]
    fn test_coincident_points_have_no_transform() {
        assert!(similarity_transform(&[(5.0, 5.0); 5], &CANONICAL_LANDMARKS).is_none());
        assert!(align_face(&RgbImage::new(50, 50), &[(5.0, 5.0); 5]).is_none());
    }

    #[test]
    fn test_bright_eye_lands_on_canonical_eye() {
        let mut frame = RgbImage::new(240, 240);
        let src = CANONICAL_LANDMARKS.map(|(x, y)| (x * 1.5 + 30.0, y * 1.5 + 20.0));
        let (ex, ey) = (src[0].0.round() as i64, src[0].1.round() as i64);
        for y in ey - 3..=ey + 3 {
            for x in ex - 3..=ex + 3 {
                frame.put_pixel(x as u32, y as u32, Rgb([255, 255, 255]));
            }
        }

        let aligned = align_face(&frame, &src).unwrap();
        assert_eq!(aligned.dimensions(), (ALIGNED_SIZE, ALIGNED_SIZE));
        let (cx, cy) = (
            CANONICAL_LANDMARKS[0].0.round() as u32,
            CANONICAL_LANDMARKS[0].1.round() as u32,
        );
        assert!(aligned.get_pixel(cx, cy).0[0] > 200);
        assert_eq!(aligned.get_pixel(100, 10).0, [0, 0, 0]);
    }
}
