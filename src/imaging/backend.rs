//! Image processing backend trait and shared types.
//!
//! The [`ImageBackend`] trait defines the operations every backend must
//! support: identify, encode (bounded re-encode), thumbnail, and a capability
//! check used for output format negotiation. All operations work on in-memory
//! buffers; uploads never touch the filesystem before they are stored.
//!
//! The production implementation is
//! [`RustBackend`](super::rust_backend::RustBackend), built on the `image`
//! crate.

use super::params::{EncodeParams, OutputFormat, ThumbnailParams};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BackendError {
    #[error("decode failed: {0}")]
    DecodeFailed(String),
    #[error("encode failed: {0}")]
    EncodeFailed(String),
    #[error("no encoder compiled in for {0}")]
    UnsupportedFormat(OutputFormat),
}

/// Result of an identify operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Dimensions {
    pub width: u32,
    pub height: u32,
}

/// Trait for image processing backends.
///
/// Backends are `Send + Sync` so one instance can be shared across upload
/// batches and moved onto the blocking pool for the CPU-heavy work.
pub trait ImageBackend: Send + Sync {
    /// Read dimensions from the encoded header.
    fn identify(&self, bytes: &[u8]) -> Result<Dimensions, BackendError>;

    /// Whether an encoder for `format` is available at runtime.
    fn supports(&self, format: OutputFormat) -> bool;

    /// Decode, resize to exactly `params.width` x `params.height`, re-encode.
    fn encode(&self, bytes: &[u8], params: &EncodeParams) -> Result<Vec<u8>, BackendError>;

    /// Decode, fill-resize, center-crop, optionally sharpen, encode.
    fn thumbnail(&self, bytes: &[u8], params: &ThumbnailParams) -> Result<Vec<u8>, BackendError>;
}

#[cfg(test)]
pub mod tests {
    use super::*;
    use crate::imaging::Quality;
    use std::sync::Mutex;

    /// Mock backend that records operations and returns canned bytes.
    /// Uses Mutex (not RefCell) so it is Sync and can cross the blocking pool.
    pub struct MockBackend {
        pub dimensions: Dimensions,
        pub supported: Vec<OutputFormat>,
        pub operations: Mutex<Vec<RecordedOp>>,
        pub fail_decode: bool,
        pub delay: Option<std::time::Duration>,
    }

    #[derive(Debug, Clone, PartialEq)]
    pub enum RecordedOp {
        Identify(usize),
        Encode {
            width: u32,
            height: u32,
            format: OutputFormat,
            quality: u32,
        },
        Thumbnail {
            crop_width: u32,
            crop_height: u32,
            format: OutputFormat,
            sharpening: Option<(f32, i32)>,
        },
    }

    impl MockBackend {
        pub fn new(width: u32, height: u32) -> Self {
            Self {
                dimensions: Dimensions { width, height },
                supported: vec![
                    OutputFormat::Avif,
                    OutputFormat::Jpeg,
                    OutputFormat::Png,
                    OutputFormat::Webp,
                ],
                operations: Mutex::new(Vec::new()),
                fail_decode: false,
                delay: None,
            }
        }

        pub fn without(mut self, format: OutputFormat) -> Self {
            self.supported.retain(|f| *f != format);
            self
        }

        pub fn failing(mut self) -> Self {
            self.fail_decode = true;
            self
        }

        /// Block every `identify` call for `delay`, simulating a slow decode.
        pub fn slow(mut self, delay: std::time::Duration) -> Self {
            self.delay = Some(delay);
            self
        }

        pub fn get_operations(&self) -> Vec<RecordedOp> {
            self.operations.lock().unwrap().clone()
        }
    }

    impl ImageBackend for MockBackend {
        fn identify(&self, bytes: &[u8]) -> Result<Dimensions, BackendError> {
            self.operations
                .lock()
                .unwrap()
                .push(RecordedOp::Identify(bytes.len()));
            if let Some(delay) = self.delay {
                std::thread::sleep(delay);
            }
            if self.fail_decode || bytes.is_empty() {
                return Err(BackendError::DecodeFailed("mock decode failure".into()));
            }
            Ok(self.dimensions)
        }

        fn supports(&self, format: OutputFormat) -> bool {
            self.supported.contains(&format)
        }

        fn encode(&self, _bytes: &[u8], params: &EncodeParams) -> Result<Vec<u8>, BackendError> {
            self.operations.lock().unwrap().push(RecordedOp::Encode {
                width: params.width,
                height: params.height,
                format: params.format,
                quality: params.quality.value(),
            });
            Ok(vec![0u8; (params.width as usize).max(1)])
        }

        fn thumbnail(
            &self,
            _bytes: &[u8],
            params: &ThumbnailParams,
        ) -> Result<Vec<u8>, BackendError> {
            self.operations.lock().unwrap().push(RecordedOp::Thumbnail {
                crop_width: params.crop_width,
                crop_height: params.crop_height,
                format: params.format,
                sharpening: params.sharpening.map(|s| (s.sigma, s.threshold)),
            });
            Ok(vec![1u8; 16])
        }
    }

    #[test]
    fn mock_records_identify() {
        let backend = MockBackend::new(800, 600);
        let dims = backend.identify(&[1, 2, 3]).unwrap();
        assert_eq!(dims, Dimensions { width: 800, height: 600 });
        assert_eq!(backend.get_operations(), vec![RecordedOp::Identify(3)]);
    }

    #[test]
    fn mock_failing_rejects_identify() {
        let backend = MockBackend::new(10, 10).failing();
        assert!(matches!(
            backend.identify(&[1]),
            Err(BackendError::DecodeFailed(_))
        ));
    }

    #[test]
    fn mock_records_encode() {
        let backend = MockBackend::new(800, 600);
        backend
            .encode(
                &[1],
                &EncodeParams {
                    width: 400,
                    height: 300,
                    format: OutputFormat::Jpeg,
                    quality: Quality::new(75),
                    background: [255, 255, 255],
                },
            )
            .unwrap();
        assert!(matches!(
            &backend.get_operations()[0],
            RecordedOp::Encode {
                width: 400,
                height: 300,
                format: OutputFormat::Jpeg,
                quality: 75,
            }
        ));
    }
}
