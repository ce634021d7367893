use image::GenericImageView;
use reqwest::{blocking::Client, header::USER_AGENT};
use std::{
    fmt,
    path::{Path, PathBuf},
    sync::Arc,
};

/// Identifying header sent with every image download.
pub const DOWNLOAD_USER_AGENT: &str = "MedGemma-Test/1.0";

#[derive(Debug, thiserror::Error)]
pub enum AcquireError {
    #[error("Image download failed: {0}")]
    Download(String),
    #[error("Image download failed: {url} returned HTTP {status}")]
    Status { url: String, status: u16 },
    #[error("File not found: {}", .0.display())]
    NotFound(PathBuf),
    #[error("Failed to read {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Failed to decode image: {0}")]
    Decode(String),
}

/// A decoded image ready to be attached to a prompt.
///
/// The encoded bytes are kept as received so backends can forward them
/// without re-encoding.
#[derive(Clone)]
pub struct AnalysisImage {
    pub bytes: Arc<[u8]>,
    pub mime_type: &'static str,
    pub width: u32,
    pub height: u32,
}

impl fmt::Debug for AnalysisImage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AnalysisImage")
            .field("mime_type", &self.mime_type)
            .field("width", &self.width)
            .field("height", &self.height)
            .field("bytes", &self.bytes.len())
            .finish()
    }
}

impl AnalysisImage {
    /// Decodes encoded image bytes, sniffing the format from the content.
    pub fn decode(bytes: Vec<u8>) -> Result<Self, AcquireError> {
        let format = image::guess_format(&bytes).map_err(|e| AcquireError::Decode(e.to_string()))?;
        let decoded = image::load_from_memory_with_format(&bytes, format)
            .map_err(|e| AcquireError::Decode(e.to_string()))?;
        let (width, height) = decoded.dimensions();

        Ok(Self {
            bytes: bytes.into(),
            mime_type: format.to_mime_type(),
            width,
            height,
        })
    }

    #[cfg(test)]
    pub(crate) fn solid_for_tests(width: u32, height: u32) -> Self {
        Self::decode(png_for_tests(width, height)).expect("valid png")
    }
}

#[cfg(test)]
pub(crate) fn png_for_tests(width: u32, height: u32) -> Vec<u8> {
    let img = image::RgbImage::from_pixel(width, height, image::Rgb([32, 32, 32]));
    let mut buf = std::io::Cursor::new(Vec::new());
    image::DynamicImage::ImageRgb8(img)
        .write_to(&mut buf, image::ImageFormat::Png)
        .expect("encode png");
    buf.into_inner()
}

/// Downloads and decodes an image from `url`.
pub fn fetch_url(client: &Client, url: &str) -> Result<AnalysisImage, AcquireError> {
    log::debug!("GET {url}");
    let response = client
        .get(url)
        .header(USER_AGENT, DOWNLOAD_USER_AGENT)
        .send()
        .map_err(|e| AcquireError::Download(e.to_string()))?;

    let status = response.status();
    if !status.is_success() {
        return Err(AcquireError::Status {
            url: url.to_string(),
            status: status.as_u16(),
        });
    }

    let bytes = response
        .bytes()
        .map_err(|e| AcquireError::Download(e.to_string()))?;
    AnalysisImage::decode(bytes.to_vec())
}

/// Reads and decodes an image from the local filesystem.
///
/// A missing path is reported before any read or decode is attempted.
pub fn read_file(path: &Path) -> Result<AnalysisImage, AcquireError> {
    if !path.exists() {
        return Err(AcquireError::NotFound(path.to_path_buf()));
    }

    let bytes = std::fs::read(path).map_err(|source| AcquireError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    AnalysisImage::decode(bytes)
}
