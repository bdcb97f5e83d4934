//! Utility functions.

use rand::seq::SliceRandom;
use rand::{RngCore, SeedableRng};
use rand_chacha::ChaCha8Rng;

/// Splittable pseudo-random key.
///
/// Every consumer of randomness takes a key, and callers derive fresh keys
/// with [`PrngKey::split`] instead of sharing a mutable generator. The same
/// key always yields the same stream.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct PrngKey(u64);

impl PrngKey {
    pub fn new(seed: u64) -> Self {
        Self(seed)
    }

    pub fn seed(&self) -> u64 {
        self.0
    }

    /// Derive `num` independent child keys.
    pub fn split(&self, num: usize) -> Vec<PrngKey> {
        let mut rng = self.rng();
        (0..num).map(|_| PrngKey(rng.next_u64())).collect()
    }

    /// Derive two child keys.
    pub fn split2(&self) -> (PrngKey, PrngKey) {
        let mut rng = self.rng();
        (PrngKey(rng.next_u64()), PrngKey(rng.next_u64()))
    }

    /// Generator seeded by this key.
    pub fn rng(&self) -> ChaCha8Rng {
        ChaCha8Rng::seed_from_u64(self.0)
    }

    /// Random permutation of `0..n`.
    pub fn permutation(&self, n: usize) -> Vec<usize> {
        let mut idxes: Vec<usize> = (0..n).collect();
        idxes.shuffle(&mut self.rng());
        idxes
    }
}

/// Abbreviate large numbers for display
pub fn abbreviate(num: u64) -> String {
    if num < 1_000 {
        format!("{}", num)
    } else if num < 1_000_000 {
        format!("{:.1}K", num as f64 / 1_000.0)
    } else if num < 1_000_000_000 {
        format!("{:.1}M", num as f64 / 1_000_000.0)
    } else {
        format!("{:.1}B", num as f64 / 1_000_000_000.0)
    }
}

/// Format duration in human-readable form
pub fn format_duration(seconds: f64) -> String {
    if seconds < 0.0 {
        return "0s".to_string();
    }

    let secs = seconds as u64;
    let h = secs / 3600;
    let m = (secs % 3600) / 60;
    let s = secs % 60;

    if h > 0 {
        format!("{}h {}m {}s", h, m, s)
    } else if m > 0 {
        format!("{}m {}s", m, s)
    } else {
        format!("{}s", s)
    }
}

/// Mean of a slice, 0 when empty.
pub fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        0.0
    } else {
        values.iter().sum::<f64>() / values.len() as f64
    }
}

/// Population standard deviation of a slice, 0 when empty.
pub fn std(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let mu = mean(values);
    (values.iter().map(|v| (v - mu).powi(2)).sum::<f64>() / values.len() as f64).sqrt()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_abbreviate() {
        assert_eq!(abbreviate(500), "500");
        assert_eq!(abbreviate(1500), "1.5K");
        assert_eq!(abbreviate(1_500_000), "1.5M");
        assert_eq!(abbreviate(1_500_000_000), "1.5B");
    }

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(30.0), "30s");
        assert_eq!(format_duration(90.0), "1m 30s");
        assert_eq!(format_duration(3661.0), "1h 1m 1s");
    }

    #[test]
    fn test_split_is_deterministic_and_distinct() {
        let key = PrngKey::new(7);
        let a = key.split(3);
        let b = key.split(3);
        assert_eq!(a, b);
        assert_ne!(a[0], a[1]);
        assert_ne!(a[1], a[2]);
    }

    #[test]
    fn test_permutation_covers_range() {
        let mut perm = PrngKey::new(3).permutation(10);
        perm.sort_unstable();
        assert_eq!(perm, (0..10).collect::<Vec<_>>());
    }

    #[test]
    fn test_mean_std() {
        assert_eq!(mean(&[]), 0.0);
        assert!((mean(&[1.0, 2.0, 3.0]) - 2.0).abs() < 1e-12);
        assert!((std(&[1.0, 3.0]) - 1.0).abs() < 1e-12);
    }
}
