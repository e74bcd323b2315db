use crate::config::DecoderConfig;
use base64::{
    alphabet,
    engine::{general_purpose::GeneralPurposeConfig, DecodePaddingMode, GeneralPurpose},
    Engine as _,
};
use image::{ImageReader, Limits, RgbImage};
use std::{
    fmt::Debug,
    io::Cursor,
    panic::{self, AssertUnwindSafe},
};
use thiserror::Error;

/// Standard alphabet, padding optional.
const BASE64: GeneralPurpose = GeneralPurpose::new(
    &alphabet::STANDARD,
    GeneralPurposeConfig::new().with_decode_padding_mode(DecodePaddingMode::Indifferent),
);

const JPEG_SOI: [u8; 2] = [0xFF, 0xD8];
const JPEG_EOI: [u8; 2] = [0xFF, 0xD9];
const GENERIC_BINARY: &str = "application/octet-stream";
const MAX_IMAGE_SIDE: u32 = 16_384;
const MAX_DECODER_ALLOC: u64 = 512 * 1024 * 1024;

#[derive(Error, Debug)]
pub enum DecodeError {
    #[error("image payload is empty")]
    Empty,
    #[error("image payload is {size} bytes, the limit is {limit} bytes")]
    TooLarge { size: usize, limit: usize },
    #[error("unsupported image type `{0}`")]
    DisallowedMimeType(String),
    #[error("image field is not valid base64: {0}")]
    Base64(#[from] base64::DecodeError),
    #[error("could not decode image: {0}")]
    Image(String),
    #[error("decoded image has no pixels")]
    NoPixels,
    #[error("could not decode image: the decoder rejected a malformed stream")]
    Panicked,
}

/// An image exactly as it arrived in the request, before any decoding.
pub enum RawInput {
    MultipartFile {
        bytes: Vec<u8>,
        content_type: Option<String>,
    },
    /// Raw base64 or a `data:<mime>;base64,<data>` URI.
    Base64Payload(String),
}

impl Debug for RawInput {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RawInput::MultipartFile {
                bytes,
                content_type,
            } => write!(
                f,
                "MultipartFile {{ bytes: <{} bytes>, content_type: {:?} }}",
                bytes.len(),
                content_type
            ),
            RawInput::Base64Payload(payload) => {
                write!(f, "Base64Payload {{ <{} chars> }}", payload.len())
            }
        }
    }
}

/// A decoded RGB bitmap with non-zero dimensions.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedImage(RgbImage);

impl DecodedImage {
    pub fn new(image: RgbImage) -> Result<Self, DecodeError> {
        if image.width() == 0 || image.height() == 0 {
            return Err(DecodeError::NoPixels);
        }
        Ok(Self(image))
    }

    pub fn width(&self) -> u32 {
        self.0.width()
    }

    pub fn height(&self) -> u32 {
        self.0.height()
    }

    pub fn as_rgb(&self) -> &RgbImage {
        &self.0
    }
}

#[derive(Debug, Clone)]
pub struct ImageDecoder {
    config: DecoderConfig,
}

impl ImageDecoder {
    pub fn new(config: DecoderConfig) -> Self {
        Self { config }
    }

    pub fn decode(&self, input: RawInput) -> Result<DecodedImage, DecodeError> {
        let bytes = match input {
            RawInput::MultipartFile {
                bytes,
                content_type,
            } => {
                self.check_mime_type(content_type.as_deref())?;
                bytes
            }
            RawInput::Base64Payload(payload) => {
                let (mime_type, data) = split_data_uri(&payload);
                self.check_mime_type(mime_type)?;
                self.decode_base64(data)?
            }
        };

        if bytes.is_empty() {
            return Err(DecodeError::Empty);
        }
        self.check_size(bytes.len())?;

        let image = self.decode_image(&bytes)?;
        tracing::debug!(
            "Decoded {}x{} image from {} bytes",
            image.width(),
            image.height(),
            bytes.len()
        );
        DecodedImage::new(image)
    }

    fn check_size(&self, size: usize) -> Result<(), DecodeError> {
        let limit = self.config.max_payload_bytes;
        if size > limit {
            return Err(DecodeError::TooLarge { size, limit });
        }
        Ok(())
    }

    fn check_mime_type(&self, declared: Option<&str>) -> Result<(), DecodeError> {
        let allowed = &self.config.allowed_mime_types;
        let Some(declared) = declared else {
            return Ok(());
        };
        if allowed.is_empty() {
            return Ok(());
        }

        let mime_type = normalize_mime_type(declared);
        // Generic binary says nothing about the format, the content is sniffed instead.
        if mime_type == GENERIC_BINARY {
            return Ok(());
        }
        if allowed
            .iter()
            .any(|a| normalize_mime_type(a) == mime_type)
        {
            Ok(())
        } else {
            Err(DecodeError::DisallowedMimeType(mime_type))
        }
    }

    fn decode_base64(&self, data: &str) -> Result<Vec<u8>, DecodeError> {
        let compact: Vec<u8> = data
            .bytes()
            .filter(|b| !b.is_ascii_whitespace())
            .collect();
        if compact.is_empty() {
            return Err(DecodeError::Empty);
        }
        // Reject before allocating the decoded buffer.
        let padding = compact.iter().rev().take_while(|&&b| b == b'=').count();
        self.check_size((compact.len() - padding) * 3 / 4)?;

        Ok(BASE64.decode(compact)?)
    }

    fn decode_image(&self, bytes: &[u8]) -> Result<RgbImage, DecodeError> {
        match self.guarded_read(bytes) {
            Ok(image) => Ok(image),
            Err(err) if self.config.recover_truncated && is_truncated_jpeg(bytes) => {
                tracing::debug!("Retrying truncated JPEG stream with an end-of-image marker");
                let mut patched = Vec::with_capacity(bytes.len() + JPEG_EOI.len());
                patched.extend_from_slice(bytes);
                patched.extend_from_slice(&JPEG_EOI);
                self.guarded_read(&patched).map_err(|_| err)
            }
            Err(err) => Err(err),
        }
    }

    fn guarded_read(&self, bytes: &[u8]) -> Result<RgbImage, DecodeError> {
        catch_decoder_panic(|| self.read_image(bytes))
    }

    fn read_image(&self, bytes: &[u8]) -> Result<RgbImage, DecodeError> {
        let mut reader = ImageReader::new(Cursor::new(bytes))
            .with_guessed_format()
            .map_err(|e| DecodeError::Image(e.to_string()))?;
        reader.limits(decoder_limits());

        let image = reader
            .decode()
            .map_err(|e| DecodeError::Image(e.to_string()))?;

        Ok(image.to_rgb8())
    }
}

/// Turns a panic inside a codec into [`DecodeError::Panicked`]. Needs `panic = "unwind"`.
fn catch_decoder_panic<T>(
    read: impl FnOnce() -> Result<T, DecodeError>,
) -> Result<T, DecodeError> {
    panic::catch_unwind(AssertUnwindSafe(read)).map_err(|_| DecodeError::Panicked)?
}

fn decoder_limits() -> Limits {
    let mut limits = Limits::default();
    limits.max_image_width = Some(MAX_IMAGE_SIDE);
    limits.max_image_height = Some(MAX_IMAGE_SIDE);
    limits.max_alloc = Some(MAX_DECODER_ALLOC);
    limits
}

/// Splits `data:<mime>;base64,<data>` on the first comma, returning the declared mime type
/// (if any) and the payload.
fn split_data_uri(payload: &str) -> (Option<&str>, &str) {
    match payload.split_once(',') {
        None => (None, payload),
        Some((prefix, data)) => {
            let mime_type = prefix
                .trim()
                .strip_prefix("data:")
                .map(|m| m.split_once(';').map_or(m, |(mime, _)| mime).trim())
                .filter(|m| !m.is_empty());
            (mime_type, data)
        }
    }
}

fn normalize_mime_type(mime_type: &str) -> String {
    let essence = mime_type
        .split_once(';')
        .map_or(mime_type, |(essence, _)| essence)
        .trim()
        .to_ascii_lowercase();
    match essence.as_str() {
        "image/jpg" | "image/pjpeg" => "image/jpeg".into(),
        _ => essence,
    }
}

fn is_truncated_jpeg(bytes: &[u8]) -> bool {
    bytes.starts_with(&JPEG_SOI) && !bytes.ends_with(&JPEG_EOI)
}
