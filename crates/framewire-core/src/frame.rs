use std::sync::Mutex;

use crate::headers::{FrameHeaders, HeaderKind};

/// A media buffer plus its structured headers.
///
/// Frames are owned by pool slots and recycled: `create` re-initialises the
/// headers and sizes the buffer in place, so a reused slot keeps its previous
/// allocation when the capacity already fits.
#[derive(Debug, Default)]
pub struct Frame {
    headers: FrameHeaders,
    buffer: Vec<u8>,
}

impl Frame {
    /// Re-initialises the frame for a fresh acquisition.
    pub fn create(&mut self, headers: &FrameHeaders) {
        self.headers = *headers;
        self.buffer.resize(headers.media_size, 0);
    }

    pub fn headers(&self) -> &FrameHeaders {
        &self.headers
    }

    pub fn headers_mut(&mut self) -> &mut FrameHeaders {
        &mut self.headers
    }

    pub fn media_size(&self) -> usize {
        self.headers.media_size
    }

    pub fn buffer(&self) -> &[u8] {
        &self.buffer
    }

    pub fn buffer_mut(&mut self) -> &mut [u8] {
        &mut self.buffer
    }

    /// Copies `data` into the buffer, resizing it (and the size header) to fit.
    pub fn fill(&mut self, data: &[u8]) {
        self.buffer.clear();
        self.buffer.extend_from_slice(data);
        self.headers.media_size = data.len();
    }

    pub fn header(&self, kind: HeaderKind) -> i64 {
        self.headers.get(kind)
    }

    pub fn set_header(&mut self, kind: HeaderKind, value: i64) -> bool {
        self.headers.set(kind, value)
    }
}

/// Shared cell wrapping a frame so that buffer access never runs under the
/// pool's slot-table mutex.
///
/// The pool hands out `Arc<FrameCell>` clones; the cell stays pinned to its
/// slot across release/reacquire cycles, which is what keeps the buffer
/// stable for holders of a live reference.
#[derive(Debug, Default)]
pub struct FrameCell {
    inner: Mutex<Frame>,
}

impl FrameCell {
    pub fn with<R>(&self, f: impl FnOnce(&mut Frame) -> R) -> R {
        let mut frame = self.inner.lock().expect("frame cell poisoned");
        f(&mut frame)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::headers::{FrameInit, SamplingFormat};

    #[test]
    fn create_sizes_buffer_to_media_size() {
        let headers = FrameInit::video(16, 16, 8, SamplingFormat::Rgba)
            .resolve()
            .expect("valid init");
        let mut frame = Frame::default();
        frame.create(&headers);
        assert_eq!(frame.buffer().len(), 16 * 16 * 4);
        assert_eq!(frame.media_size(), frame.buffer().len());
    }

    #[test]
    fn fill_updates_size_header() {
        let mut frame = Frame::default();
        frame.fill(&[1, 2, 3, 4]);
        assert_eq!(frame.media_size(), 4);
        assert_eq!(frame.buffer(), &[1, 2, 3, 4]);
    }
}
