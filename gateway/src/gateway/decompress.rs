use flate2::{Decompress, DecompressError, FlushDecompress};

// 16 KiB
const CHUNK_SIZE: usize = 16 * 1024;

const ZLIB_SUFFIX: [u8; 4] = [0x00, 0x00, 0xff, 0xff];

/// Inflates a `zlib-stream` connection. The zlib context lives as long as the
/// connection; a message is complete once a frame ends in the sync flush
/// suffix.
pub struct Inflater {
    decompress: Decompress,
    buffer: Vec<u8>,
}

impl Inflater {
    pub fn new() -> Self {
        Self {
            decompress: Decompress::new(true),
            buffer: Vec::new(),
        }
    }

    /// Buffers `data` and returns the decompressed message once complete.
    pub fn push(&mut self, data: &[u8]) -> Result<Option<Vec<u8>>, DecompressError> {
        self.buffer.extend_from_slice(data);

        if !self.buffer.ends_with(&ZLIB_SUFFIX) {
            return Ok(None);
        }

        let mut output = Vec::with_capacity(CHUNK_SIZE.max(self.buffer.len() * 4));
        let mut offset = 0;

        loop {
            let before_in = self.decompress.total_in();
            let before_out = self.decompress.total_out();

            if output.len() == output.capacity() {
                output.reserve(CHUNK_SIZE);
            }

            let res = self
                .decompress
                .decompress_vec(&self.buffer[offset..], &mut output, FlushDecompress::Sync);

            if let Err(e) = res {
                self.reset();
                return Err(e);
            }

            let consumed = (self.decompress.total_in() - before_in) as usize;
            let produced = self.decompress.total_out() - before_out;
            offset += consumed;

            // all input consumed and the output buffer was not the limiting factor
            if offset >= self.buffer.len() && output.len() < output.capacity() {
                break;
            }

            if consumed == 0 && produced == 0 {
                break;
            }
        }

        self.buffer.clear();
        Ok(Some(output))
    }

    pub fn reset(&mut self) {
        self.decompress.reset(true);
        self.buffer.clear();
    }
}

impl Default for Inflater {
    fn default() -> Self {
        Self::new()
    }
}
