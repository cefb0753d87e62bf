use std::io::{Seek, SeekFrom, Write};
use std::sync::Arc;

use tokio::sync::Mutex;

/// A seekable destination accepting positional writes at arbitrary absolute
/// offsets. Blanket-implemented for anything `Write + Seek`, which covers
/// `std::fs::File` and `std::io::Cursor<Vec<u8>>`.
pub trait WriterAt: Send {
    fn write_all_at(&mut self, offset: u64, buf: &[u8]) -> std::io::Result<()>;
}

impl<T: Write + Seek + Send> WriterAt for T {
    fn write_all_at(&mut self, offset: u64, buf: &[u8]) -> std::io::Result<()> {
        self.seek(SeekFrom::Start(offset))?;
        self.write_all(buf)
    }
}

/// The sink shared by all workers. The mutex is the single write lock:
/// flushes are serialized, each landing at its own absolute offset.
pub type SharedSink = Arc<Mutex<Box<dyn WriterAt>>>;

pub fn shared(sink: Box<dyn WriterAt>) -> SharedSink {
    Arc::new(Mutex::new(sink))
}
