pub mod capture;
pub mod codec;
pub mod playback;
pub mod resample;

pub use capture::{AudioCapture, CaptureError};
pub use codec::{DecodeError, decode_audio, encode_audio};
pub use playback::{AudioPlayer, PlaybackError, PlaybackHandle};
pub use resample::resample_block;
