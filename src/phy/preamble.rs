// Binary chirp preamble: +A/-A pulses whose width ramps 1..=n and back.

/// Samples in a preamble with ramp length `n`.
pub const fn preamble_len(n: usize) -> usize {
    2 * n * (n + 1)
}

pub fn generate_preamble(n: usize, amplitude: i32) -> Vec<i32> {
    let mut preamble = Vec::with_capacity(preamble_len(n));
    for width in (1..=n).chain((1..=n).rev()) {
        preamble.extend(std::iter::repeat_n(amplitude, width));
        preamble.extend(std::iter::repeat_n(-amplitude, width));
    }
    preamble
}

#[cfg(test)]
mod tests {
    use super::*;

    fn correlate(signal: &[i64], pattern: &[i64], lag: usize) -> i64 {
        pattern
            .iter()
            .enumerate()
            .map(|(i, &p)| p * signal.get(lag + i).copied().unwrap_or(0))
            .sum()
    }

    #[test]
    fn test_length_and_shape() {
        let preamble = generate_preamble(4, 100);
        assert_eq!(preamble.len(), 40);
        assert_eq!(preamble_len(4), 40);
        assert_eq!(&preamble[..6], &[100, -100, 100, 100, -100, -100]);
        assert_eq!(&preamble[34..], &[100, 100, -100, -100, 100, -100]);
        assert_eq!(preamble.iter().map(|&s| s as i64).sum::<i64>(), 0);
    }

    #[test]
    fn test_autocorrelation_peak_is_unique() {
        for n in 1..=8 {
            let pattern: Vec<i64> = generate_preamble(n, 1)
                .into_iter()
                .map(i64::from)
                .collect();
            let len = pattern.len();
            // Pad with silence on both sides
            let mut signal = vec![0i64; len];
            signal.extend(&pattern);
            signal.extend(vec![0i64; len]);

            let peak = correlate(&signal, &pattern, len);
            assert_eq!(peak, len as i64);
            for lag in 0..2 * len {
                if lag != len {
                    assert!(correlate(&signal, &pattern, lag) < peak, "n={n} lag={lag}");
                }
            }
        }
    }
}
