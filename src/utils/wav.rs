// WAV import/export for offline modulation and demodulation.

use std::path::Path;

use hound::{SampleFormat, WavReader, WavSpec, WavWriter};
use tracing::{debug, info};

use crate::device::{pcm_from_f32, pcm_to_f32};

pub fn write_wav(
    path: impl AsRef<Path>,
    samples: &[i32],
    sample_rate: u32,
) -> Result<(), hound::Error> {
    let spec = WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 32,
        sample_format: SampleFormat::Int,
    };
    let mut writer = WavWriter::create(path.as_ref(), spec)?;
    for &sample in samples {
        writer.write_sample(sample)?;
    }
    writer.finalize()?;
    info!(
        "Wrote {} samples ({:.2} s) to {}",
        samples.len(),
        samples.len() as f64 / sample_rate as f64,
        path.as_ref().display()
    );
    Ok(())
}

/// Reads the first channel of a WAV file as full-scale `i32` PCM.
pub fn read_wav(path: impl AsRef<Path>) -> Result<(Vec<i32>, u32), hound::Error> {
    let mut reader = WavReader::open(path.as_ref())?;
    let spec = reader.spec();
    let channels = spec.channels.max(1) as usize;
    debug!(
        "WAV spec: {} Hz, {} ch, {} bit {:?}",
        spec.sample_rate, spec.channels, spec.bits_per_sample, spec.sample_format
    );

    let interleaved: Vec<i32> = match spec.sample_format {
        SampleFormat::Float => reader
            .samples::<f32>()
            .map(|s| s.map(pcm_from_f32))
            .collect::<Result<_, _>>()?,
        SampleFormat::Int => {
            let shift = 32 - spec.bits_per_sample as u32;
            reader
                .samples::<i32>()
                .map(|s| s.map(|v| v << shift))
                .collect::<Result<_, _>>()?
        }
    };

    let samples = interleaved
        .into_iter()
        .step_by(channels)
        .collect::<Vec<_>>();
    Ok((samples, spec.sample_rate))
}

/// Peak level of a recording relative to full scale.
pub fn peak_level(samples: &[i32]) -> f32 {
    samples
        .iter()
        .map(|&s| pcm_to_f32(s).abs())
        .fold(0.0, f32::max)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wav_write_read() {
        let path = std::env::temp_dir().join(format!(
            "aether_link_wav_{}.wav",
            std::process::id()
        ));
        let samples = vec![0, i32::MAX, i32::MIN + 1, 12345, -67890];
        write_wav(&path, &samples, 48000).unwrap();
        let (read, rate) = read_wav(&path).unwrap();
        std::fs::remove_file(&path).ok();
        assert_eq!(rate, 48000);
        assert_eq!(read, samples);
        assert!(peak_level(&read) > 0.99);
    }
}
