use serde::{Deserialize, Serialize};

use crate::error::PoolError;

/// Broad class of the media carried by a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(i64)]
pub enum MediaFormat {
    Video = 1,
    Audio = 2,
    Data = 3,
}

impl MediaFormat {
    pub fn from_code(code: i64) -> Option<Self> {
        match code {
            1 => Some(Self::Video),
            2 => Some(Self::Audio),
            3 => Some(Self::Data),
            _ => None,
        }
    }

    pub fn code(self) -> i64 {
        self as i64
    }
}

/// Pixel layout of a video frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(i64)]
pub enum SamplingFormat {
    Bgra = 1,
    Rgba = 2,
    Bgr = 3,
    Rgb = 4,
    YCbCr422 = 5,
}

impl SamplingFormat {
    pub fn from_code(code: i64) -> Option<Self> {
        match code {
            1 => Some(Self::Bgra),
            2 => Some(Self::Rgba),
            3 => Some(Self::Bgr),
            4 => Some(Self::Rgb),
            5 => Some(Self::YCbCr422),
            _ => None,
        }
    }

    pub fn code(self) -> i64 {
        self as i64
    }

    /// Samples per pixel for the layout, used when deriving a video media size.
    pub fn components(self) -> u32 {
        match self {
            Self::Bgra | Self::Rgba => 4,
            Self::Bgr | Self::Rgb => 3,
            Self::YCbCr422 => 2,
        }
    }
}

/// Tag addressing one field of [`FrameHeaders`] through the header accessors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HeaderKind {
    MediaFormat,
    MediaSize,
    Width,
    Height,
    Depth,
    SamplingFmt,
    Timestamp,
    FrameIndex,
}

/// Structured headers attached to every frame.
///
/// `media_size` is authoritative for the buffer length; for video it can be
/// derived from the geometry fields, for audio it must always be provided.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrameHeaders {
    pub media_format: MediaFormat,
    pub media_size: usize,
    pub width: u32,
    pub height: u32,
    pub depth: u32,
    pub sampling_fmt: Option<SamplingFormat>,
    pub timestamp: i64,
    pub frame_index: i64,
}

impl Default for FrameHeaders {
    fn default() -> Self {
        Self {
            media_format: MediaFormat::Data,
            media_size: 0,
            width: 0,
            height: 0,
            depth: 0,
            sampling_fmt: None,
            timestamp: 0,
            frame_index: 0,
        }
    }
}

impl FrameHeaders {
    /// Bits per pixel, when the sampling format and depth allow deriving it.
    pub fn pixel_bits(&self) -> Option<u32> {
        let fmt = self.sampling_fmt?;
        if self.depth == 0 {
            return None;
        }
        Some(fmt.components() * self.depth)
    }

    /// Media size in bytes derived from the video geometry.
    ///
    /// Returns `None` when any geometry field is missing or the sampling
    /// format is unknown; audio sizes are never derivable.
    pub fn derived_media_size(&self) -> Option<usize> {
        if self.media_format != MediaFormat::Video {
            return None;
        }
        if self.width == 0 || self.height == 0 {
            return None;
        }
        let bits = self.pixel_bits()? as usize;
        Some(self.width as usize * self.height as usize * bits / 8)
    }

    pub fn get(&self, kind: HeaderKind) -> i64 {
        match kind {
            HeaderKind::MediaFormat => self.media_format.code(),
            HeaderKind::MediaSize => self.media_size as i64,
            HeaderKind::Width => self.width as i64,
            HeaderKind::Height => self.height as i64,
            HeaderKind::Depth => self.depth as i64,
            HeaderKind::SamplingFmt => self.sampling_fmt.map_or(0, SamplingFormat::code),
            HeaderKind::Timestamp => self.timestamp,
            HeaderKind::FrameIndex => self.frame_index,
        }
    }

    /// Sets one header field from its numeric encoding.
    ///
    /// Returns false when the value does not encode anything for the kind
    /// (unknown enum code, negative size); the field is left untouched.
    pub fn set(&mut self, kind: HeaderKind, value: i64) -> bool {
        match kind {
            HeaderKind::MediaFormat => match MediaFormat::from_code(value) {
                Some(fmt) => self.media_format = fmt,
                None => return false,
            },
            HeaderKind::MediaSize => {
                if value < 0 {
                    return false;
                }
                self.media_size = value as usize;
            }
            HeaderKind::Width => {
                if value < 0 {
                    return false;
                }
                self.width = value as u32;
            }
            HeaderKind::Height => {
                if value < 0 {
                    return false;
                }
                self.height = value as u32;
            }
            HeaderKind::Depth => {
                if value < 0 {
                    return false;
                }
                self.depth = value as u32;
            }
            HeaderKind::SamplingFmt => match SamplingFormat::from_code(value) {
                Some(fmt) => self.sampling_fmt = Some(fmt),
                None => return false,
            },
            HeaderKind::Timestamp => self.timestamp = value,
            HeaderKind::FrameIndex => self.frame_index = value,
        }
        true
    }
}

/// Parameters for acquiring a frame with pre-populated headers.
///
/// Zero means "not provided" for the numeric fields, mirroring how callers
/// fill only what they know about the media they are about to produce.
#[derive(Debug, Clone, Copy, Default)]
pub struct FrameInit {
    pub media_format: Option<MediaFormat>,
    pub media_size: i64,
    pub width: u32,
    pub height: u32,
    pub depth: u32,
    pub sampling_fmt: Option<SamplingFormat>,
}

impl FrameInit {
    pub fn video(width: u32, height: u32, depth: u32, sampling_fmt: SamplingFormat) -> Self {
        Self {
            media_format: Some(MediaFormat::Video),
            media_size: 0,
            width,
            height,
            depth,
            sampling_fmt: Some(sampling_fmt),
        }
    }

    pub fn audio(media_size: i64) -> Self {
        Self {
            media_format: Some(MediaFormat::Audio),
            media_size,
            ..Self::default()
        }
    }

    /// Validates the init block and resolves it into complete headers.
    ///
    /// Video sizes are derived from geometry when absent; when both a size and
    /// the full geometry are given they must agree. Audio requires an explicit
    /// positive size.
    pub fn resolve(&self) -> Result<FrameHeaders, PoolError> {
        let mut headers = FrameHeaders {
            media_format: self.media_format.unwrap_or(MediaFormat::Data),
            width: self.width,
            height: self.height,
            depth: self.depth,
            sampling_fmt: self.sampling_fmt,
            ..FrameHeaders::default()
        };
        if self.media_size > 0 {
            headers.media_size = self.media_size as usize;
        }

        match headers.media_format {
            MediaFormat::Video => {
                let derived = headers.derived_media_size();
                if self.media_size <= 0 {
                    match derived {
                        Some(size) => headers.media_size = size,
                        None => {
                            return Err(PoolError::InvalidInit(
                                "video frame needs either a media size or full geometry"
                                    .to_string(),
                            ))
                        }
                    }
                } else if let Some(derived) = derived {
                    if derived != headers.media_size {
                        return Err(PoolError::InvalidInit(format!(
                            "media size {} does not match size {} derived from geometry",
                            headers.media_size, derived
                        )));
                    }
                }
            }
            MediaFormat::Audio => {
                if self.media_size <= 0 {
                    return Err(PoolError::InvalidInit(
                        "audio frame needs an explicit media size".to_string(),
                    ));
                }
            }
            MediaFormat::Data => {
                if self.media_size < 0 {
                    return Err(PoolError::InvalidInit(
                        "media size cannot be negative".to_string(),
                    ));
                }
            }
        }
        Ok(headers)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ycbcr_1080p_derives_expected_size() {
        let init = FrameInit::video(1920, 1080, 8, SamplingFormat::YCbCr422);
        let headers = init.resolve().expect("valid init");
        assert_eq!(headers.media_size, 1920 * 1080 * 2 * 8 / 8);
        assert_eq!(headers.media_size, 4_147_200);
    }

    #[test]
    fn mismatched_video_size_is_rejected() {
        let mut init = FrameInit::video(640, 480, 8, SamplingFormat::Rgb);
        init.media_size = 1234;
        assert!(init.resolve().is_err());
    }

    #[test]
    fn matching_explicit_video_size_is_accepted() {
        let mut init = FrameInit::video(640, 480, 8, SamplingFormat::Rgb);
        init.media_size = (640 * 480 * 3) as i64;
        let headers = init.resolve().expect("valid init");
        assert_eq!(headers.media_size, 640 * 480 * 3);
    }

    #[test]
    fn audio_without_size_is_rejected() {
        let init = FrameInit::audio(0);
        assert!(init.resolve().is_err());
    }

    #[test]
    fn video_with_unknown_sampling_needs_explicit_size() {
        let init = FrameInit {
            media_format: Some(MediaFormat::Video),
            width: 1920,
            height: 1080,
            depth: 8,
            sampling_fmt: None,
            media_size: 0,
        };
        assert!(init.resolve().is_err());

        let sized = FrameInit {
            media_size: 65_536,
            ..init
        };
        assert_eq!(sized.resolve().expect("valid init").media_size, 65_536);
    }

    #[test]
    fn header_roundtrip_through_kind_accessors() {
        let mut headers = FrameHeaders::default();
        assert!(headers.set(HeaderKind::MediaFormat, MediaFormat::Video.code()));
        assert!(headers.set(HeaderKind::Width, 1280));
        assert!(headers.set(HeaderKind::Height, 720));
        assert!(headers.set(HeaderKind::SamplingFmt, SamplingFormat::Bgra.code()));
        assert!(headers.set(HeaderKind::Timestamp, 90_000));
        assert!(!headers.set(HeaderKind::SamplingFmt, 99));

        assert_eq!(headers.get(HeaderKind::Width), 1280);
        assert_eq!(headers.get(HeaderKind::Height), 720);
        assert_eq!(
            headers.get(HeaderKind::SamplingFmt),
            SamplingFormat::Bgra.code()
        );
        assert_eq!(headers.get(HeaderKind::Timestamp), 90_000);
    }
}
