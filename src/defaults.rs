//! Default configuration constants for papaya-voice.
//!
//! Shared by the config layer, the audio pipelines and the wire protocol so the
//! negotiated formats cannot drift apart.

/// Capture sample rate in Hz. The live service expects 16 kHz mono input.
pub const INPUT_SAMPLE_RATE: u32 = 16000;

/// Playback sample rate in Hz. The live service streams 24 kHz mono output.
pub const OUTPUT_SAMPLE_RATE: u32 = 24000;

/// Samples per outbound chunk (256 ms at 16 kHz).
pub const CAPTURE_FRAME_SIZE: usize = 4096;

/// Scale factor between normalized float samples and 16-bit PCM.
pub const PCM16_SCALE: f32 = 32768.0;

/// Output gain applied to every scheduled chunk.
pub const OUTPUT_GAIN: f32 = 1.0;

/// Upper bound for the configurable output gain.
pub const MAX_OUTPUT_GAIN: f32 = 2.0;

/// Live API websocket endpoint.
pub const DEFAULT_ENDPOINT: &str = "wss://generativelanguage.googleapis.com/ws/google.ai.generativelanguage.v1beta.GenerativeService.BidiGenerateContent";

/// Native-audio model used for the support voice chat.
pub const DEFAULT_MODEL: &str = "gemini-2.5-flash-native-audio-preview-09-2025";

/// Prebuilt voice the model answers with.
pub const DEFAULT_VOICE: &str = "Zephyr";

/// Greeting shown before the first turn of a support conversation.
pub const GREETING: &str =
    "Hello! I am PapayaBot 🍍. How can I help you with your sticker designs today?";

/// MIME descriptor for a PCM payload at the given rate.
pub fn pcm_mime_type(sample_rate: u32) -> String {
    format!("audio/pcm;rate={}", sample_rate)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn input_mime_type_matches_wire_descriptor() {
        assert_eq!(pcm_mime_type(INPUT_SAMPLE_RATE), "audio/pcm;rate=16000");
    }

    #[test]
    fn capture_frame_is_a_quarter_second_at_input_rate() {
        let ms = CAPTURE_FRAME_SIZE as u32 * 1000 / INPUT_SAMPLE_RATE;
        assert_eq!(ms, 256);
    }
}
