use crate::dispatch::StreamKind;

/// Splits raw output chunks into lines, one accumulator per stream.
///
/// Bytes are buffered until a `\n` arrives; the terminator is dropped and the
/// line is decoded lossily as UTF-8. A trailing fragment with no terminator
/// stays buffered and is never emitted, not even when the stream closes.
#[derive(Debug, Default)]
pub struct LineAssembler {
    stdout: Vec<u8>,
    stderr: Vec<u8>,
}

impl LineAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append `chunk` to the buffer of `stream`, calling `emit` once per
    /// completed line in arrival order.
    pub fn push(&mut self, stream: StreamKind, chunk: &[u8], mut emit: impl FnMut(&str)) {
        let buf = self.buffer_mut(stream);
        for &byte in chunk {
            if byte == b'\n' {
                {
                    let line = String::from_utf8_lossy(buf);
                    emit(&line);
                }
                buf.clear();
            } else {
                buf.push(byte);
            }
        }
    }

    /// Bytes received on `stream` since its last terminator
    pub fn pending(&self, stream: StreamKind) -> &[u8] {
        match stream {
            StreamKind::Stdout => &self.stdout,
            StreamKind::Stderr => &self.stderr,
        }
    }

    fn buffer_mut(&mut self, stream: StreamKind) -> &mut Vec<u8> {
        match stream {
            StreamKind::Stdout => &mut self.stdout,
            StreamKind::Stderr => &mut self.stderr,
        }
    }
}
