//! Audio extraction for transcription.

use std::path::Path;

use tracing::info;

use crate::command::{FfmpegCommand, FfmpegRunner};
use crate::error::MediaResult;

/// Sample rate expected by the transcription service.
pub const TRANSCRIPTION_SAMPLE_RATE: u32 = 16_000;

/// Build the command that converts `input` to 16 kHz mono PCM WAV.
pub fn extract_audio_command(input: &Path, output: &Path) -> FfmpegCommand {
    FfmpegCommand::new(input, output)
        .no_video()
        .output_args(["-ac", "1", "-ar"])
        .output_arg(TRANSCRIPTION_SAMPLE_RATE.to_string())
        .audio_codec("pcm_s16le")
        .output_args(["-f", "wav"])
}

/// Extract the audio track of `input` into `output`.
pub async fn extract_audio(runner: &FfmpegRunner, input: &Path, output: &Path) -> MediaResult<()> {
    if let Some(parent) = output.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    runner.run(&extract_audio_command(input, output)).await?;

    let size = tokio::fs::metadata(output).await?.len();
    info!(output = %output.display(), size_bytes = size, "Extracted audio");
    Ok(())
}
