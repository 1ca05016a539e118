//! 64-bit DCT-based perceptual hash over a downscaled grayscale projection
//! (spec §4.7).

#![cfg(feature = "images")]

use std::path::Path;

use image::imageops::FilterType;
use image::GenericImageView;

use crate::core::errors::{DsError, Result};

/// Side length of the downscaled projection the DCT is computed over.
const DCT_SIZE: usize = 32;
/// Side length of the retained low-frequency block.
const HASH_BLOCK: usize = 8;

/// A 64-bit perceptual hash, compared by Hamming distance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PerceptualHash(pub u64);

impl PerceptualHash {
    #[must_use]
    pub fn hamming_distance(self, other: Self) -> u32 {
        (self.0 ^ other.0).count_ones()
    }
}

/// Compute the perceptual hash of the image at `path`.
///
/// Fails with `config_invalid`-adjacent `DsError::InvalidConfig` only at
/// configuration time (checked by the caller); here a decode failure is a
/// per-file fault and returns a plain IO-classified error for the caller to
/// fold into telemetry, matching the hash pipeline's error discipline.
pub fn compute(path: &Path) -> Result<PerceptualHash> {
    let img = image::open(path).map_err(|err| DsError::Io {
        path: path.to_path_buf(),
        source: std::io::Error::other(err.to_string()),
    })?;
    let gray = img
        .resize_exact(DCT_SIZE as u32, DCT_SIZE as u32, FilterType::Lanczos3)
        .to_luma8();

    let mut matrix = [[0.0f64; DCT_SIZE]; DCT_SIZE];
    for y in 0..DCT_SIZE {
        for x in 0..DCT_SIZE {
            matrix[y][x] = f64::from(gray.get_pixel(x as u32, y as u32).0[0]);
        }
    }

    let coeffs = dct_2d(&matrix);

    // Top-left HASH_BLOCK x HASH_BLOCK block, excluding the DC term (0,0),
    // thresholded against the mean of the remaining coefficients.
    let mut values = Vec::with_capacity(HASH_BLOCK * HASH_BLOCK - 1);
    for y in 0..HASH_BLOCK {
        for x in 0..HASH_BLOCK {
            if x == 0 && y == 0 {
                continue;
            }
            values.push(coeffs[y][x]);
        }
    }
    let mean: f64 = values.iter().sum::<f64>() / values.len() as f64;

    let mut bits: u64 = 0;
    let mut bit_index = 0;
    for y in 0..HASH_BLOCK {
        for x in 0..HASH_BLOCK {
            if x == 0 && y == 0 {
                continue;
            }
            if coeffs[y][x] > mean {
                bits |= 1 << bit_index;
            }
            bit_index += 1;
        }
    }

    Ok(PerceptualHash(bits))
}

/// Naive 2D DCT-II. `DCT_SIZE` is small (32) so the O(n^4) cost is
/// acceptable for per-image one-shot computation.
fn dct_2d(matrix: &[[f64; DCT_SIZE]; DCT_SIZE]) -> [[f64; DCT_SIZE]; DCT_SIZE] {
    let n = DCT_SIZE;
    let mut out = [[0.0f64; DCT_SIZE]; DCT_SIZE];

    for u in 0..n {
        for v in 0..n {
            let mut sum = 0.0;
            for y in 0..n {
                for x in 0..n {
                    sum += matrix[y][x]
                        * ((std::f64::consts::PI / n as f64) * (x as f64 + 0.5) * u as f64).cos()
                        * ((std::f64::consts::PI / n as f64) * (y as f64 + 0.5) * v as f64).cos();
                }
            }
            let cu = if u == 0 { (1.0 / n as f64).sqrt() } else { (2.0 / n as f64).sqrt() };
            let cv = if v == 0 { (1.0 / n as f64).sqrt() } else { (2.0 / n as f64).sqrt() };
            out[v][u] = cu * cv * sum;
        }
    }

    out
}

/// Map a user-supplied similarity in `[0.0, 1.0]` to a Hamming radius over
/// a 64-bit hash (spec §4.7 "Threshold semantics").
#[must_use]
pub fn similarity_to_radius(similarity: f64) -> u32 {
    ((1.0 - similarity) * 64.0).round() as u32
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn similarity_one_requires_exact_match() {
        assert_eq!(similarity_to_radius(1.0), 0);
    }

    #[test]
    fn similarity_zero_allows_full_radius() {
        assert_eq!(similarity_to_radius(0.0), 64);
    }

    #[test]
    fn hamming_distance_zero_for_identical_hash() {
        let a = PerceptualHash(0xDEAD_BEEF_0000_1234);
        assert_eq!(a.hamming_distance(a), 0);
    }

    #[test]
    fn hamming_distance_counts_differing_bits() {
        let a = PerceptualHash(0b0000);
        let b = PerceptualHash(0b1011);
        assert_eq!(a.hamming_distance(b), 3);
    }
}
