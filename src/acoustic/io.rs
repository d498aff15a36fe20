use std::path::Path;

use crate::error::{LinkError, Result};

fn wav_error(err: hound::Error) -> LinkError {
    match err {
        hound::Error::IoError(io) => LinkError::Io(io),
        other => LinkError::Device(format!("wav: {other}")),
    }
}

/// Write mono samples as 16-bit PCM.
pub fn write_wav(signal: &[f32], sample_rate: u32, filename: &Path) -> Result<()> {
    if let Some(parent) = filename.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut writer = hound::WavWriter::create(filename, spec).map_err(wav_error)?;
    let amplitude = i16::MAX as f32;
    for &sample in signal {
        writer
            .write_sample((sample.clamp(-1.0, 1.0) * amplitude) as i16)
            .map_err(wav_error)?;
    }
    writer.finalize().map_err(wav_error)
}

/// Read the first channel of a WAV file, scaled to [-1, 1].
/// Returns the samples and the file's sample rate.
pub fn read_wav(filename: &Path) -> Result<(Vec<f32>, u32)> {
    let reader = hound::WavReader::open(filename).map_err(wav_error)?;
    let spec = reader.spec();
    let channels = spec.channels.max(1) as usize;

    let interleaved: Vec<f32> = match spec.sample_format {
        hound::SampleFormat::Float => reader
            .into_samples::<f32>()
            .collect::<std::result::Result<_, _>>()
            .map_err(wav_error)?,
        hound::SampleFormat::Int => {
            let amplitude =
                (1i64 << (spec.bits_per_sample.saturating_sub(1))) as f32;
            reader
                .into_samples::<i32>()
                .map(|sample| sample.map(|value| value as f32 / amplitude))
                .collect::<std::result::Result<_, _>>()
                .map_err(wav_error)?
        }
    };

    let mono = interleaved
        .into_iter()
        .step_by(channels)
        .collect();
    Ok((mono, spec.sample_rate))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wav_round_trip_keeps_rate_and_shape() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/frame.wav");
        let signal: Vec<f32> = (0..480)
            .map(|i| (i as f32 / 20.0).sin() * 0.5)
            .collect();

        write_wav(&signal, 48000, &path).unwrap();
        let (read, rate) = read_wav(&path).unwrap();

        assert_eq!(rate, 48000);
        assert_eq!(read.len(), signal.len());
        for (a, b) in signal.iter().zip(read.iter()) {
            assert!((a - b).abs() < 1e-3);
        }
    }

    #[test]
    fn test_missing_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(read_wav(&dir.path().join("absent.wav")).is_err());
    }
}
