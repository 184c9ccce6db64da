//! Host-side arrays: initialization, preview rendering and a reference result.

use rand::Rng;
use std::fmt::{Display, Write};

/// Elements shown at each end of a truncated preview.
pub const PREVIEW_EDGE: usize = 5;

const PREVIEW_RULE: &str = "----------------------------";

/// `len` pseudo-random values in `[0, 99]`.
pub fn random_array<R: Rng + ?Sized>(len: usize, rng: &mut R) -> Vec<i32> {
    (0..len).map(|_| rng.gen_range(0..100)).collect()
}

/// Render the values line of a preview.
///
/// Arrays longer than `threshold` show the first and last
/// [`PREVIEW_EDGE`] values around an ellipsis.
pub fn preview_line<T: Display>(values: &[T], threshold: usize) -> String {
    let mut line = String::new();

    if values.len() > threshold && values.len() > 2 * PREVIEW_EDGE {
        for v in &values[..PREVIEW_EDGE] {
            let _ = write!(line, "{} ", v);
        }
        line.push_str(" ..... ");
        for v in &values[values.len() - PREVIEW_EDGE..] {
            let _ = write!(line, "{} ", v);
        }
    } else {
        for v in values {
            let _ = write!(line, "{} ", v);
        }
    }

    line
}

/// Preview line followed by the separator rule.
pub fn preview<T: Display>(values: &[T], threshold: usize) -> String {
    format!("{}\n{}", preview_line(values, threshold), PREVIEW_RULE)
}

/// Host reference for the elementwise add kernel.
pub fn elementwise_add_reference(a: &[i32], b: &[i32]) -> Vec<i32> {
    a.iter().zip(b).map(|(x, y)| x.wrapping_add(*y)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn test_random_values_in_range() {
        let mut rng = StdRng::seed_from_u64(7);
        let values = random_array(10_000, &mut rng);
        assert_eq!(values.len(), 10_000);
        assert!(values.iter().all(|v| (0..=99).contains(v)));
    }

    #[test]
    fn test_preview_truncates_long_arrays() {
        let values: Vec<i32> = (0..20).collect();
        let line = preview_line(&values, 15);
        assert_eq!(line, "0 1 2 3 4  ..... 15 16 17 18 19 ");
        let shown: Vec<&str> = line.split_whitespace().filter(|t| *t != ".....").collect();
        assert_eq!(shown.len(), 10);
    }

    #[test]
    fn test_preview_shows_short_arrays_in_full() {
        let values: Vec<i32> = (0..10).collect();
        assert_eq!(preview_line(&values, 15), "0 1 2 3 4 5 6 7 8 9 ");
    }

    #[test]
    fn test_preview_rule() {
        let rendered = preview(&[1, 2, 3], 15);
        assert_eq!(rendered, "1 2 3 \n----------------------------");
    }

    #[test]
    fn test_reference_add() {
        assert_eq!(elementwise_add_reference(&[1, 99], &[2, 99]), vec![3, 198]);
    }
}
