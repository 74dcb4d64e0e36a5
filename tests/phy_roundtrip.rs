use std::sync::Arc;

use aether_link::config::PhyConfig;
use aether_link::error::DecodeError;
use aether_link::phy::line_coding::CODEWORD_BITS;
use aether_link::phy::preamble::generate_preamble;
use aether_link::phy::{DemodEvent, Demodulator, Modulator};
use aether_link::utils::logging::init_test_logging;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

fn pair(config: &PhyConfig) -> (Modulator, Demodulator) {
    let preamble: Arc<[i32]> =
        generate_preamble(config.preamble.n, config.preamble_amplitude()).into();
    (
        Modulator::new(config, preamble.clone()),
        Demodulator::new(config, preamble),
    )
}

fn random_bytes(seed: u64, len: usize) -> Vec<u8> {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut bytes = vec![0u8; len];
    rng.fill(&mut bytes[..]);
    bytes
}

fn split(events: Vec<DemodEvent>) -> (Vec<Vec<u8>>, Vec<DecodeError>) {
    let mut packets = Vec::new();
    let mut errors = Vec::new();
    for event in events {
        match event {
            DemodEvent::Packet(packet) => packets.push(packet),
            DemodEvent::Error(err) => errors.push(err),
        }
    }
    (packets, errors)
}

/// Plays `signal` through a receiver whose clock runs `factor` times faster
/// than the sender's, starting `offset` samples into the first sample.
fn resample(signal: &[i32], factor: f64, offset: f64) -> Vec<i32> {
    let len = ((signal.len() as f64 - offset) / factor) as usize;
    (0..len)
        .map(|k| {
            let position = offset + k as f64 * factor;
            let i = position.floor() as usize;
            let frac = position - i as f64;
            let x0 = signal.get(i).copied().unwrap_or(0) as f64;
            let x1 = signal.get(i + 1).copied().unwrap_or(0) as f64;
            (x0 + (x1 - x0) * frac).round() as i32
        })
        .collect()
}

#[test]
fn thousand_bytes_in_eight_frames() {
    init_test_logging();
    let config = PhyConfig {
        byte_per_frame: 125,
        ..PhyConfig::default()
    };
    let (modulator, mut demodulator) = pair(&config);
    let payload = random_bytes(1, 1000);

    assert_eq!(modulator.frame_count(payload.len()), 8);
    let mut signal = vec![0i32; 300];
    signal.extend(modulator.modulate(&payload).unwrap());
    assert_eq!(signal.len(), 300 + 8 * modulator.frame_samples(125));
    signal.extend(std::iter::repeat_n(0, 500));

    let (packets, errors) = split(demodulator.process_samples(&signal));
    assert!(errors.is_empty(), "unexpected errors: {:?}", errors);
    assert_eq!(packets, vec![payload]);
}

#[test]
fn survives_additive_noise() {
    init_test_logging();
    let config = PhyConfig::default();
    let (modulator, mut demodulator) = pair(&config);
    let payload = random_bytes(2, 300);

    let mut rng = StdRng::seed_from_u64(3);
    let amplitude = (0.2 * i32::MAX as f64) as i32;
    let mut signal = vec![0i32; 1000];
    signal.extend(modulator.modulate(&payload).unwrap());
    signal.extend(std::iter::repeat_n(0, 1000));
    for sample in signal.iter_mut() {
        *sample = sample.saturating_add(rng.random_range(-amplitude..=amplitude));
    }

    let (packets, errors) = split(demodulator.process_samples(&signal));
    assert!(errors.is_empty(), "unexpected errors: {:?}", errors);
    assert_eq!(packets, vec![payload]);
}

#[test]
fn tolerates_clock_drift_on_short_frames() {
    init_test_logging();
    let mut config = PhyConfig {
        byte_per_frame: 4,
        ..PhyConfig::default()
    };
    config.carrier.size = 8;
    config.carrier.header_size = 8;
    let payload = random_bytes(4, 16);

    for factor in [1.005, 0.995] {
        for offset in [0.0, 0.3, 0.7] {
            let (modulator, mut demodulator) = pair(&config);
            let mut signal = vec![0i32; 200];
            signal.extend(modulator.modulate(&payload).unwrap());
            signal.extend(std::iter::repeat_n(0, 200));

            let received = resample(&signal, factor, offset);
            let (packets, errors) = split(demodulator.process_samples(&received));
            assert!(
                errors.is_empty(),
                "factor {factor}, offset {offset}: {:?}",
                errors
            );
            assert_eq!(packets, vec![payload.clone()], "factor {factor}, offset {offset}");
        }
    }
}

#[test]
fn corrupted_fifth_frame_drops_packet_then_resynchronizes() {
    init_test_logging();
    let config = PhyConfig {
        byte_per_frame: 125,
        ..PhyConfig::default()
    };
    let (modulator, mut demodulator) = pair(&config);
    let first = random_bytes(5, 1000);
    let second = random_bytes(6, 200);

    let mut signal = modulator.modulate(&first).unwrap();
    // Flip one payload bit of frame 4
    let frame_start = 4 * modulator.frame_samples(125);
    let preamble_len = generate_preamble(config.preamble.n, config.preamble_amplitude()).len();
    let header_len = 2 * CODEWORD_BITS * config.carrier.header_size;
    let bit = frame_start + preamble_len + header_len + 37 * config.carrier.size;
    for sample in &mut signal[bit..bit + config.carrier.size] {
        *sample = -*sample;
    }
    // Detection restarts inside the damaged frame's data and may lock onto
    // it; the gap lets any such false lock run out before the next packet.
    signal.extend(std::iter::repeat_n(0, 5000));
    signal.extend(modulator.modulate(&second).unwrap());
    signal.extend(std::iter::repeat_n(0, 200));

    let (packets, errors) = split(demodulator.process_samples(&signal));
    assert_eq!(packets, vec![second]);
    assert!(matches!(
        errors.first(),
        Some(DecodeError::InvalidSymbol(_)) | Some(DecodeError::CrcMismatch { .. })
    ));
    // Later frames of the damaged packet no longer follow an accepted frame
    assert!(
        errors
            .iter()
            .any(|e| matches!(e, DecodeError::UnexpectedIndex { expected: 0, got } if *got > 4)),
        "later frames not rejected: {:?}",
        errors
    );
}
