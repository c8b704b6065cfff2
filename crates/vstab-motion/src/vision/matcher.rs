//! Brute-force Hamming matching of binary descriptors.

use rayon::prelude::*;

use super::{Descriptor, DescriptorMatcher, Feature, FeatureMatch};

/// Number of differing bits between two descriptors.
pub fn hamming_distance(a: &Descriptor, b: &Descriptor) -> u32 {
    a.iter().zip(b.iter()).map(|(x, y)| (x ^ y).count_ones()).sum()
}

/// Nearest-neighbour matcher over Hamming distance.
#[derive(Debug, Clone, Default)]
pub struct HammingMatcher {
    /// Keep only pairs that are mutual nearest neighbours
    pub cross_check: bool,
}

impl HammingMatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_cross_check(mut self, cross_check: bool) -> Self {
        self.cross_check = cross_check;
        self
    }

    fn nearest(descriptor: &Descriptor, candidates: &[Feature]) -> Option<(usize, u32)> {
        candidates
            .iter()
            .enumerate()
            .map(|(i, f)| (i, hamming_distance(descriptor, &f.descriptor)))
            .min_by_key(|&(_, d)| d)
    }
}

impl DescriptorMatcher for HammingMatcher {
    fn name(&self) -> &'static str {
        "hamming_brute_force"
    }

    fn match_features(&self, query: &[Feature], train: &[Feature]) -> Vec<FeatureMatch> {
        if query.is_empty() || train.is_empty() {
            return Vec::new();
        }

        query
            .par_iter()
            .enumerate()
            .filter_map(|(qi, q)| {
                let (ti, distance) = Self::nearest(&q.descriptor, train)?;
                if self.cross_check {
                    let (back, _) = Self::nearest(&train[ti].descriptor, query)?;
                    if back != qi {
                        return None;
                    }
                }
                Some(FeatureMatch {
                    query: qi,
                    train: ti,
                    distance: distance as f64,
                })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn feature(descriptor: Descriptor) -> Feature {
        Feature::new(0.0, 0.0, 1.0, descriptor)
    }

    #[test]
    fn test_hamming_distance() {
        let a = [0u8; 32];
        let mut b = [0u8; 32];
        b[0] = 0b1011;
        b[31] = 0xFF;
        assert_eq!(hamming_distance(&a, &b), 11);
        assert_eq!(hamming_distance(&b, &b), 0);
    }

    #[test]
    fn test_matches_nearest_descriptor() {
        let mut d1 = [0u8; 32];
        d1[0] = 0xFF;
        let mut d2 = [0u8; 32];
        d2[10] = 0xFF;

        let query = vec![feature(d1), feature(d2)];
        let mut near_d2 = d2;
        near_d2[11] = 0x01;
        let train = vec![feature(near_d2), feature(d1)];

        let matches = HammingMatcher::new().match_features(&query, &train);
        assert_eq!(matches.len(), 2);
        assert_eq!((matches[0].query, matches[0].train), (0, 1));
        assert_eq!(matches[0].distance, 0.0);
        assert_eq!((matches[1].query, matches[1].train), (1, 0));
        assert_eq!(matches[1].distance, 1.0);
    }

    #[test]
    fn test_cross_check_drops_one_sided_matches() {
        let a = [0u8; 32];
        let mut b = [0u8; 32];
        b[0] = 0x01;
        let query = vec![feature(a), feature(b)];
        let train = vec![feature(a)];

        assert_eq!(HammingMatcher::new().match_features(&query, &train).len(), 2);
        let checked = HammingMatcher::new()
            .with_cross_check(true)
            .match_features(&query, &train);
        assert_eq!(checked.len(), 1);
        assert_eq!(checked[0].query, 0);
    }

    #[test]
    fn test_empty_inputs() {
        let matcher = HammingMatcher::new();
        assert!(matcher.match_features(&[], &[feature([0; 32])]).is_empty());
        assert!(matcher.match_features(&[feature([0; 32])], &[]).is_empty());
    }
}
