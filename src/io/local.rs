use std::fs::{File, OpenOptions};
use std::io::{self, BufWriter, Seek, SeekFrom, Write};
use std::path::Path;

use super::{ChannelInput, ChannelOutput};

/// Local file reader with random access support.
///
/// `offset_bias` shifts every read, so an archive embedded at a known position
/// inside a larger file reads as if it started at offset zero. Reads are
/// positional and safe to issue from several threads.
pub struct FileChannelInput {
    file: File,
    bias: u64,
    size: u64,
}

impl FileChannelInput {
    pub fn open(path: &Path) -> io::Result<Self> {
        Self::with_offset_bias(path, 0)
    }

    pub fn with_offset_bias(path: &Path, offset_bias: u64) -> io::Result<Self> {
        let file = File::open(path)?;
        let file_len = file.metadata()?.len();
        if offset_bias > file_len {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("offset bias {offset_bias} is past the end of a {file_len} byte file"),
            ));
        }
        Ok(Self {
            file,
            bias: offset_bias,
            size: file_len - offset_bias,
        })
    }

    pub fn offset_bias(&self) -> u64 {
        self.bias
    }
}

impl ChannelInput for FileChannelInput {
    fn read_at(&self, offset: u64, buf: &mut [u8]) -> io::Result<usize> {
        if offset >= self.size {
            return Ok(0);
        }
        let want = (buf.len() as u64).min(self.size - offset) as usize;
        let buf = &mut buf[..want];
        let position = self.bias + offset;

        #[cfg(unix)]
        {
            use std::os::unix::fs::FileExt;
            self.file.read_at(buf, position)
        }

        #[cfg(windows)]
        {
            use std::os::windows::fs::FileExt;
            self.file.seek_read(buf, position)
        }

        #[cfg(not(any(unix, windows)))]
        {
            use std::io::Read;
            // No positional read here: work on a private handle so the shared
            // cursor is never moved under another reader.
            let mut file = self.file.try_clone()?;
            file.seek(SeekFrom::Start(position))?;
            file.read(buf)
        }
    }

    fn length(&self) -> u64 {
        self.size
    }
}

/// Local file sink.
///
/// With a non-zero `offset_bias`, the first `offset_bias` bytes of an existing
/// file are kept (a launcher stub, for instance) and the archive is written
/// after them. [`current_offset`](ChannelOutput::current_offset) is relative to
/// the bias, matching what [`FileChannelInput::with_offset_bias`] expects.
pub struct FileChannelOutput {
    writer: Option<BufWriter<File>>,
    offset: u64,
}

impl FileChannelOutput {
    pub fn create(path: &Path) -> io::Result<Self> {
        Self::create_with_offset_bias(path, 0)
    }

    pub fn create_with_offset_bias(path: &Path, offset_bias: u64) -> io::Result<Self> {
        let mut file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(offset_bias == 0)
            .open(path)?;
        if offset_bias > 0 {
            let file_len = file.metadata()?.len();
            if file_len < offset_bias {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidInput,
                    format!("offset bias {offset_bias} is past the end of a {file_len} byte file"),
                ));
            }
            file.set_len(offset_bias)?;
            file.seek(SeekFrom::Start(offset_bias))?;
        }
        Ok(Self {
            writer: Some(BufWriter::new(file)),
            offset: 0,
        })
    }
}

fn closed() -> io::Error {
    io::Error::new(io::ErrorKind::BrokenPipe, "write to a closed channel")
}

impl ChannelOutput for FileChannelOutput {
    fn write(&mut self, data: &[u8]) -> io::Result<()> {
        let writer = self.writer.as_mut().ok_or_else(closed)?;
        writer.write_all(data)?;
        self.offset += data.len() as u64;
        Ok(())
    }

    fn current_offset(&self) -> u64 {
        self.offset
    }

    fn close(&mut self) -> io::Result<()> {
        let Some(writer) = self.writer.take() else {
            return Ok(());
        };
        let file = writer.into_inner().map_err(|e| e.into_error())?;
        file.sync_all()
    }
}
