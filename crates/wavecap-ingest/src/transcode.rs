//! External audio transcoder driven over ffmpeg's stdio
//!
//! The pipeline feeds the uploaded blob to ffmpeg's stdin and takes the
//! re-encoded stream from stdout, so no temp files touch disk. Conversion
//! failure is never fatal to ingest; callers keep the original audio.

use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use wavecap_core::config::AudioConfig;
use wavecap_core::types::{AudioCodec, ConversionMode};
use wavecap_core::{utils, Error, Result};

/// Floor for the configured bitrate in kbps
const MIN_BITRATE_KBPS: u32 = 16;

/// libopus refuses bitrates above this
const MAX_OPUS_BITRATE_KBPS: u32 = 256;

/// AAC-LC ceiling
const MAX_AAC_BITRATE_KBPS: u32 = 320;

/// Labels stamped into the output container metadata
#[derive(Debug, Clone, Default)]
pub struct TranscodeMetadata {
    /// System label (artist)
    pub system_label: String,
    /// Talkgroup label (album)
    pub talkgroup_label: String,
    /// Talkgroup name (title)
    pub talkgroup_name: String,
    /// Tag label (genre), when the talkgroup has one
    pub tag: Option<String>,
    /// Call timestamp in milliseconds (date)
    pub timestamp_ms: i64,
}

/// Re-encoded audio produced by a conversion
#[derive(Debug, Clone)]
pub struct TranscodeOutput {
    /// Encoded bytes
    pub audio: Vec<u8>,
    /// MIME of the new container
    pub mime: &'static str,
    /// Filename with the extension swapped for the new container
    pub filename: String,
}

/// Handle to the external ffmpeg tool
#[derive(Debug)]
pub struct Transcoder {
    mode: ConversionMode,
    codec: AudioCodec,
    bitrate: u32,
    available: bool,
    warned: AtomicBool,
}

impl Transcoder {
    /// Probe for ffmpeg and capture the configured profile
    #[must_use]
    pub fn new(config: &AudioConfig) -> Self {
        let available = std::process::Command::new("ffmpeg")
            .arg("-version")
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .map(|status| status.success())
            .unwrap_or(false);

        if !available && config.conversion_mode != ConversionMode::Disabled {
            tracing::warn!("ffmpeg is not available, no audio conversion will be performed");
        }

        Self {
            mode: config.conversion_mode,
            codec: config.codec,
            bitrate: config.bitrate,
            available,
            warned: AtomicBool::new(false),
        }
    }

    /// A transcoder that never converts, for tests and disabled deployments
    #[must_use]
    pub const fn disabled() -> Self {
        Self {
            mode: ConversionMode::Disabled,
            codec: AudioCodec::Opus,
            bitrate: 32,
            available: false,
            warned: AtomicBool::new(false),
        }
    }

    /// Whether conversions will actually run
    #[must_use]
    pub const fn is_active(&self) -> bool {
        self.available && !matches!(self.mode, ConversionMode::Disabled)
    }

    /// The configured target codec
    #[must_use]
    pub const fn codec(&self) -> AudioCodec {
        self.codec
    }

    /// Re-encode one audio blob
    ///
    /// # Errors
    ///
    /// Returns `Transient` if ffmpeg is unavailable, exits non-zero or cannot
    /// be driven; callers degrade by keeping the original audio.
    pub async fn convert(
        &self,
        audio: &[u8],
        filename: &str,
        metadata: &TranscodeMetadata,
    ) -> Result<TranscodeOutput> {
        if !self.available {
            // Warn once, then stay quiet like the rest of the pipeline
            if !self.warned.swap(true, Ordering::Relaxed) {
                return Err(Error::Transient {
                    message: "ffmpeg is not available, keeping original audio".to_string(),
                });
            }
            return Err(Error::Transient {
                message: "ffmpeg unavailable".to_string(),
            });
        }

        let args = self.build_args(metadata);

        let mut child = Command::new("ffmpeg")
            .args(&args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| Error::Transient {
                message: format!("failed to spawn ffmpeg: {e}"),
            })?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin.write_all(audio).await.map_err(|e| Error::Transient {
                message: format!("failed to feed audio to ffmpeg: {e}"),
            })?;
            drop(stdin);
        }

        let output = child.wait_with_output().await.map_err(|e| Error::Transient {
            message: format!("ffmpeg did not exit cleanly: {e}"),
        })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(Error::Transient {
                message: format!("ffmpeg exited with {}: {}", output.status, stderr.trim()),
            });
        }

        let (mime, extension) = match self.codec {
            AudioCodec::Opus => ("audio/opus", "opus"),
            AudioCodec::Aac => ("audio/mp4", "m4a"),
        };

        Ok(TranscodeOutput {
            audio: output.stdout,
            mime,
            filename: utils::replace_extension(filename, extension),
        })
    }

    fn build_args(&self, metadata: &TranscodeMetadata) -> Vec<String> {
        let mut args: Vec<String> = vec!["-i".into(), "-".into()];

        if let Some(tag) = &metadata.tag {
            args.push("-metadata".into());
            args.push(format!("album={}", metadata.talkgroup_label));
            args.push("-metadata".into());
            args.push(format!("artist={}", metadata.system_label));
            args.push("-metadata".into());
            args.push(format!("date={}", metadata.timestamp_ms));
            args.push("-metadata".into());
            args.push(format!("genre={tag}"));
            args.push("-metadata".into());
            args.push(format!("title={}", metadata.talkgroup_name));
        }

        if let Some(filter) = filter_chain(self.mode) {
            args.push("-af".into());
            args.push(filter.into());
        }

        let bitrate = self.clamped_bitrate();
        match self.codec {
            AudioCodec::Opus => {
                // Opus does not support 44.1 kHz
                for arg in ["-ac", "2", "-ar", "48000", "-c:a", "libopus", "-b:a"] {
                    args.push(arg.into());
                }
                args.push(format!("{bitrate}k"));
                for arg in [
                    "-vbr",
                    "on",
                    "-compression_level",
                    "10",
                    "-application",
                    "voip",
                    "-f",
                    "opus",
                    "-",
                ] {
                    args.push(arg.into());
                }
            }
            AudioCodec::Aac => {
                for arg in ["-ac", "2", "-ar", "44100", "-c:a", "aac", "-profile:a", "aac_low", "-b:a"] {
                    args.push(arg.into());
                }
                args.push(format!("{bitrate}k"));
                for arg in [
                    "-movflags",
                    "frag_keyframe+empty_moov",
                    "-f",
                    "ipod",
                    "-",
                ] {
                    args.push(arg.into());
                }
            }
        }

        args
    }

    fn clamped_bitrate(&self) -> u32 {
        let ceiling = match self.codec {
            AudioCodec::Opus => MAX_OPUS_BITRATE_KBPS,
            AudioCodec::Aac => MAX_AAC_BITRATE_KBPS,
        };
        self.bitrate.clamp(MIN_BITRATE_KBPS, ceiling)
    }
}

/// The band-pass plus loudness chain for each normalization profile
const fn filter_chain(mode: ConversionMode) -> Option<&'static str> {
    match mode {
        ConversionMode::Disabled => None,
        // -16 LUFS: broadcast standard with minimal filtering (80 Hz - 8000 Hz)
        ConversionMode::Conservative => {
            Some("highpass=f=80:p=1,lowpass=f=8000:p=1,loudnorm=I=-16:TP=-2.0:LRA=11")
        }
        // -12 LUFS: recommended with gentle filtering (100 Hz - 7000 Hz)
        ConversionMode::Standard => {
            Some("highpass=f=100:p=1,lowpass=f=7000:p=1,loudnorm=I=-12:TP=-1.5:LRA=10")
        }
        // -10 LUFS: dispatcher optimized with moderate filtering (120 Hz - 6000 Hz)
        ConversionMode::Aggressive => {
            Some("highpass=f=120:p=1,lowpass=f=6000:p=1,loudnorm=I=-10:TP=-1.5:LRA=9")
        }
        // -8 LUFS: very loud with tighter filtering (150 Hz - 5000 Hz)
        ConversionMode::Maximum => {
            Some("highpass=f=150:p=1,lowpass=f=5000:p=1,loudnorm=I=-8:TP=-1.0:LRA=8")
        }
    }
}
