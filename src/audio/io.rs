use hound::{SampleFormat, WavReader, WavSpec, WavWriter};
use std::fmt;
use std::path::{Path, PathBuf};

use super::LoopBuffer;
use crate::config::SampleEncoding;
use crate::error::{LooperError, Result};

/// Identifier returned by a take store for a persisted take.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TakeId(pub String);

impl fmt::Display for TakeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Durable storage for committed takes. Always called from the control path.
pub trait TakeStore: Send {
    fn store(&mut self, buffer: &LoopBuffer) -> Result<TakeId>;
}

/// Writes each take as an uncompressed PCM WAV file into a directory.
pub struct WavTakeStore {
    dir: PathBuf,
    encoding: SampleEncoding,
}

impl WavTakeStore {
    pub fn new<P: AsRef<Path>>(dir: P, encoding: SampleEncoding) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
            encoding,
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// `take_YYYYmmdd_HHMMSS.wav`, with a numeric suffix if a take was already
    /// saved in the same second.
    fn next_path(&self, buffer: &LoopBuffer) -> PathBuf {
        let stem = format!("take_{}", buffer.recorded_at().format("%Y%m%d_%H%M%S"));
        let mut path = self.dir.join(format!("{stem}.wav"));
        let mut n = 1;
        while path.exists() {
            path = self.dir.join(format!("{stem}_{n}.wav"));
            n += 1;
        }
        path
    }
}

impl TakeStore for WavTakeStore {
    fn store(&mut self, buffer: &LoopBuffer) -> Result<TakeId> {
        std::fs::create_dir_all(&self.dir).map_err(|e| LooperError::Persistence {
            path: self.dir.clone(),
            reason: e.to_string(),
        })?;

        let path = self.next_path(buffer);
        export_wav(&path, buffer, self.encoding).map_err(|e| LooperError::Persistence {
            path: path.clone(),
            reason: e.to_string(),
        })?;

        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());
        Ok(TakeId(name))
    }
}

pub fn export_wav<P: AsRef<Path>>(
    path: P,
    buffer: &LoopBuffer,
    encoding: SampleEncoding,
) -> std::result::Result<(), hound::Error> {
    let spec = WavSpec {
        channels: buffer.channels(),
        sample_rate: buffer.sample_rate(),
        bits_per_sample: match encoding {
            SampleEncoding::Float32 => 32,
            SampleEncoding::Int16 => 16,
        },
        sample_format: match encoding {
            SampleEncoding::Float32 => SampleFormat::Float,
            SampleEncoding::Int16 => SampleFormat::Int,
        },
    };

    let mut writer = WavWriter::create(&path, spec)?;
    match encoding {
        SampleEncoding::Float32 => {
            for sample in buffer.samples() {
                writer.write_sample(sample)?;
            }
        }
        SampleEncoding::Int16 => {
            for sample in buffer.samples() {
                writer.write_sample((sample.clamp(-1.0, 1.0) * i16::MAX as f32) as i16)?;
            }
        }
    }
    writer.finalize()?;
    Ok(())
}

/// Load a previously saved take as a loop. The file must match the stream's
/// sample rate; no resampling is done.
pub fn import_wav<P: AsRef<Path>>(
    path: P,
    sample_rate: u32,
    generation: u64,
) -> Result<LoopBuffer> {
    let path = path.as_ref();
    let persistence = |reason: String| LooperError::Persistence {
        path: path.to_path_buf(),
        reason,
    };

    let mut reader = WavReader::open(path).map_err(|e| persistence(e.to_string()))?;
    let spec = reader.spec();
    if spec.sample_rate != sample_rate {
        return Err(persistence(format!(
            "sample rate {} Hz does not match stream rate {} Hz",
            spec.sample_rate, sample_rate
        )));
    }

    let samples: Vec<f32> = match spec.sample_format {
        SampleFormat::Float => reader
            .samples::<f32>()
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| persistence(e.to_string()))?,
        SampleFormat::Int => {
            let max_value = (1_i64 << (spec.bits_per_sample - 1)) as f32;
            reader
                .samples::<i32>()
                .map(|s| s.map(|v| v as f32 / max_value))
                .collect::<std::result::Result<Vec<_>, _>>()
                .map_err(|e| persistence(e.to_string()))?
        }
    };

    // Downmix anything wider than stereo to mono.
    let (samples, channels) = if spec.channels > 2 {
        let ch = spec.channels as usize;
        let mono = samples
            .chunks(ch)
            .map(|frame| frame.iter().sum::<f32>() / ch as f32)
            .collect();
        (mono, 1)
    } else {
        (samples, spec.channels)
    };

    LoopBuffer::from_samples(samples, channels, sample_rate, generation)
}
