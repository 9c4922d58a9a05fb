//! MJPEG streaming of the newest captured frame.
//!
//! Every `/stream` connection gets its own [`StreamEncoder`]. The encoder
//! pulls from the shared [`FrameBuffer`], JPEG-encodes frames it has not
//! sent yet and wraps each one as a `multipart/x-mixed-replace` part. The
//! sequence never ends on its own; dropping it (the client disconnecting)
//! is what stops it.

use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use bytes::{BufMut, Bytes, BytesMut};
use futures::Stream;
use image::codecs::jpeg::JpegEncoder;
use image::RgbImage;
use tracing::{debug, warn};

use crate::frame_buffer::FrameBuffer;

/// `Content-Type` of the stream response.
pub const CONTENT_TYPE: &str = "multipart/x-mixed-replace; boundary=frame";

/// Encoder timing and quality.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamSettings {
    /// JPEG quality, 1-100.
    pub jpeg_quality: u8,
    /// Wait while no frame is published at all.
    pub idle_interval: Duration,
    /// Wait while the newest frame has already been sent.
    pub poll_interval: Duration,
}

impl Default for StreamSettings {
    fn default() -> Self {
        Self {
            jpeg_quality: 80,
            idle_interval: Duration::from_millis(100),
            poll_interval: Duration::from_millis(10),
        }
    }
}

/// Error type for frame encoding.
#[derive(Debug, thiserror::Error)]
pub enum EncodeError {
    /// The JPEG encoder rejected the frame.
    #[error("JPEG encoding failed: {0}")]
    Jpeg(#[from] image::ImageError),
    /// The blocking encode task did not complete.
    #[error("encode task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

/// Encode an RGB image as JPEG.
pub fn encode_jpeg(image: &RgbImage, quality: u8) -> Result<Bytes, EncodeError> {
    let mut jpeg = Vec::new();
    let encoder = JpegEncoder::new_with_quality(&mut jpeg, quality.clamp(1, 100));
    image.write_with_encoder(encoder)?;
    Ok(Bytes::from(jpeg))
}

/// Wrap a JPEG as one multipart part.
pub fn mjpeg_part(jpeg: &[u8]) -> Bytes {
    const HEADER: &[u8] = b"--frame\r\nContent-Type: image/jpeg\r\n\r\n";

    let mut part = BytesMut::with_capacity(HEADER.len() + jpeg.len() + 2);
    part.put_slice(HEADER);
    part.put_slice(jpeg);
    part.put_slice(b"\r\n");
    part.freeze()
}

/// Pull-driven producer of MJPEG parts for one connection.
pub struct StreamEncoder {
    frames: Arc<FrameBuffer>,
    settings: StreamSettings,
    last_sent: Option<u64>,
}

impl StreamEncoder {
    /// Create an encoder reading from `frames`.
    pub const fn new(frames: Arc<FrameBuffer>, settings: StreamSettings) -> Self {
        Self {
            frames,
            settings,
            last_sent: None,
        }
    }

    /// Wait for a frame this encoder has not sent yet and return it as a
    /// multipart part.
    pub async fn next_chunk(&mut self) -> Bytes {
        loop {
            let Some(frame) = self.frames.latest() else {
                tokio::time::sleep(self.settings.idle_interval).await;
                continue;
            };

            if self.last_sent == Some(frame.sequence) {
                tokio::time::sleep(self.settings.poll_interval).await;
                continue;
            }
            // A frame that fails to encode is not retried
            self.last_sent = Some(frame.sequence);

            let quality = self.settings.jpeg_quality;
            let image = Arc::clone(&frame.image);
            let encoded = tokio::task::spawn_blocking(move || encode_jpeg(&image, quality))
                .await
                .map_err(EncodeError::from)
                .and_then(|result| result);

            match encoded {
                Ok(jpeg) => {
                    debug!(sequence = frame.sequence, bytes = jpeg.len(), "encoded frame");
                    return mjpeg_part(&jpeg);
                }
                Err(err) => {
                    warn!(sequence = frame.sequence, error = %err, "failed to encode frame");
                    tokio::time::sleep(self.settings.idle_interval).await;
                }
            }
        }
    }

    /// Turn the encoder into an endless body stream.
    pub fn into_stream(self) -> impl Stream<Item = Result<Bytes, Infallible>> + Send {
        futures::stream::unfold(self, |mut encoder| async move {
            let chunk = encoder.next_chunk().await;
            Some((Ok(chunk), encoder))
        })
    }
}
