//! Content routing by declared MIME type.

/// Image formats the pipeline knows how to transform
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageFormat {
    Jpeg,
    Png,
}

/// Supported content types. Adding a format means adding a row here.
const SUPPORTED: &[(&str, ImageFormat)] = &[
    ("image/jpeg", ImageFormat::Jpeg),
    ("image/png", ImageFormat::Png),
];

impl ImageFormat {
    /// File extension used for staged results
    pub fn extension(self) -> &'static str {
        match self {
            Self::Jpeg => "jpg",
            Self::Png => "png",
        }
    }

    /// Canonical MIME type, used when uploading
    pub fn mime_type(self) -> &'static str {
        SUPPORTED
            .iter()
            .find(|(_, format)| *format == self)
            .map(|(mime, _)| *mime)
            .unwrap_or("application/octet-stream")
    }

    /// Codec used to encode the result
    pub fn codec(self) -> image::ImageFormat {
        match self {
            Self::Jpeg => image::ImageFormat::Jpeg,
            Self::Png => image::ImageFormat::Png,
        }
    }
}

/// Result of routing a record
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Classification {
    Supported(ImageFormat),
    Unsupported,
}

/// Classify a declared content type.
///
/// Matching ignores ASCII case and surrounding whitespace.
pub fn classify(content_type: &str) -> Classification {
    let content_type = content_type.trim();

    SUPPORTED
        .iter()
        .find(|(mime, _)| mime.eq_ignore_ascii_case(content_type))
        .map(|(_, format)| Classification::Supported(*format))
        .unwrap_or(Classification::Unsupported)
}
