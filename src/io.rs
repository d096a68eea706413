//! Custom AVIOContext glue for fully in-memory demuxing and muxing.
//!
//! The demuxer reads from a caller-owned byte slice through [`MemoryReader`];
//! the muxer streams into a growable [`MemoryWriter`] that is handed back to
//! the caller on success. Neither side ever touches the filesystem.
//!
//! # Thread safety
//! `MemoryReader` and `MemoryWriter` are intentionally NOT thread-safe. Each
//! transcoding call creates and consumes its own instances on a single
//! thread; FFmpeg can re-enter `seek` from within `write_packet` (e.g. while
//! patching the header during `write_trailer`), so the callbacks must not
//! take any lock.

use std::ffi::c_void;
use std::io::{Seek, SeekFrom, Write};
use std::ptr;

use ffmpeg_next as ffmpeg;

use crate::error::{Result, TranscodeError};

/// Size of the scratch buffer handed to `avio_alloc_context`.
const AVIO_BUFFER_SIZE: usize = 4096;

/// AVSEEK_SIZE: FFmpeg asks for the total stream size instead of seeking.
const AVSEEK_SIZE: i32 = 0x10000;

/// Read-only view over the source buffer.
///
/// Holds a raw pointer/length pair instead of a borrow so that the C callback
/// can name the type without a lifetime parameter; the owning container keeps
/// a `PhantomData` borrow of the source slice, which guarantees the region
/// stays valid while FFmpeg can still call back into us.
pub struct MemoryReader {
    data: *const u8,
    len: usize,
    position: usize,
}

impl MemoryReader {
    /// Create a reader over `source`. The caller must keep `source` alive for
    /// as long as the reader is registered with an `AVIOContext`.
    pub fn new(source: &[u8]) -> Self {
        Self {
            data: source.as_ptr(),
            len: source.len(),
            position: 0,
        }
    }

    /// Copy up to `out.len()` bytes into `out`, returning the count actually
    /// copied. Returns 0 at end of region.
    fn read_into(&mut self, out: &mut [u8]) -> usize {
        if self.position >= self.len {
            return 0;
        }
        let n = out.len().min(self.len - self.position);
        unsafe {
            ptr::copy_nonoverlapping(self.data.add(self.position), out.as_mut_ptr(), n);
        }
        self.position += n;
        n
    }

    fn seek_to(&mut self, pos: SeekFrom) -> std::io::Result<u64> {
        let new_pos = match pos {
            SeekFrom::Start(p) => p as i64,
            SeekFrom::Current(p) => self.position as i64 + p,
            SeekFrom::End(p) => self.len as i64 + p,
        };
        if new_pos < 0 {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                "seek before start of buffer",
            ));
        }
        self.position = new_pos as usize;
        Ok(self.position as u64)
    }
}

/// Growable destination buffer with independent position and logical size.
///
/// The logical size (`buffer.len()`) only grows when a write lands past it;
/// seeking backwards to patch a header does not shrink it. The final output is
/// the logical size at the moment the trailer write completes, not the
/// allocated capacity.
pub struct MemoryWriter {
    buffer: Vec<u8>,
    position: u64,
}

impl MemoryWriter {
    /// Create a writer whose backing storage starts at `capacity` bytes.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buffer: Vec::with_capacity(capacity),
            position: 0,
        }
    }

    /// Logical size of the written data so far.
    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    /// Consume the writer, returning the written bytes.
    pub fn into_inner(self) -> Vec<u8> {
        self.buffer
    }
}

impl Write for MemoryWriter {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        let pos = self.position as usize;
        let end = pos + buf.len();

        // Grow the backing region to exact need; Vec reallocation moves the
        // base address, so nothing outside this type may hold a pointer into
        // the buffer.
        if end > self.buffer.len() {
            self.buffer.resize(end, 0);
        }

        self.buffer[pos..end].copy_from_slice(buf);
        self.position += buf.len() as u64;

        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

impl Seek for MemoryWriter {
    fn seek(&mut self, pos: SeekFrom) -> std::io::Result<u64> {
        let buffer_len = self.buffer.len() as u64;

        let new_pos = match pos {
            SeekFrom::Start(p) => p,
            SeekFrom::Current(p) => (self.position as i64 + p) as u64,
            SeekFrom::End(p) => (buffer_len as i64 + p) as u64,
        };

        self.position = new_pos;
        Ok(self.position)
    }
}

// C-compatible callbacks for FFmpeg

unsafe extern "C" fn read_source(opaque: *mut c_void, buf: *mut u8, buf_size: i32) -> i32 {
    let reader = &mut *(opaque as *mut MemoryReader);
    let slice = std::slice::from_raw_parts_mut(buf, buf_size as usize);
    let n = reader.read_into(slice);
    if n == 0 {
        ffmpeg::ffi::AVERROR_EOF
    } else {
        n as i32
    }
}

unsafe extern "C" fn seek_source(opaque: *mut c_void, offset: i64, whence: i32) -> i64 {
    let reader = &mut *(opaque as *mut MemoryReader);

    if whence == AVSEEK_SIZE {
        return reader.len as i64;
    }

    let seek_from = match whence {
        0 => SeekFrom::Start(offset as u64),
        1 => SeekFrom::Current(offset),
        2 => SeekFrom::End(offset),
        _ => return -1,
    };
    match reader.seek_to(seek_from) {
        Ok(pos) => pos as i64,
        Err(_) => -1,
    }
}

unsafe extern "C" fn write_dest(opaque: *mut c_void, buf: *mut u8, buf_size: i32) -> i32 {
    let writer = &mut *(opaque as *mut MemoryWriter);
    let slice = std::slice::from_raw_parts(buf, buf_size as usize);
    match writer.write(slice) {
        Ok(n) => n as i32,
        Err(_) => -1,
    }
}

unsafe extern "C" fn seek_dest(opaque: *mut c_void, offset: i64, whence: i32) -> i64 {
    let writer = &mut *(opaque as *mut MemoryWriter);

    if whence == AVSEEK_SIZE {
        return writer.buffer.len() as i64;
    }

    let seek_from = match whence {
        0 => SeekFrom::Start(offset as u64),
        1 => SeekFrom::Current(offset),
        2 => SeekFrom::End(offset),
        _ => return -1,
    };
    match writer.seek(seek_from) {
        Ok(pos) => pos as i64,
        Err(_) => -1,
    }
}

/// Owns a custom `AVIOContext` and its scratch buffer.
///
/// Dropped after the format context that uses it (field order in the owning
/// struct guarantees this); `avformat_close_input` / `avformat_free_context`
/// never release a custom pb.
pub struct AvioGuard {
    ctx: *mut ffmpeg::ffi::AVIOContext,
}

impl Drop for AvioGuard {
    fn drop(&mut self) {
        unsafe {
            if !self.ctx.is_null() {
                ffmpeg::ffi::av_freep(
                    std::ptr::addr_of_mut!((*self.ctx).buffer) as *mut c_void
                );
                ffmpeg::ffi::avio_context_free(&mut self.ctx);
            }
        }
    }
}

unsafe fn alloc_avio_context(
    write_flag: i32,
    opaque: *mut c_void,
    read: Option<unsafe extern "C" fn(*mut c_void, *mut u8, i32) -> i32>,
    write: Option<unsafe extern "C" fn(*mut c_void, *mut u8, i32) -> i32>,
    seek: Option<unsafe extern "C" fn(*mut c_void, i64, i32) -> i64>,
) -> Result<AvioGuard> {
    let buffer = ffmpeg::ffi::av_malloc(AVIO_BUFFER_SIZE) as *mut u8;
    if buffer.is_null() {
        return Err(TranscodeError::AllocationFailure(
            "failed to allocate AVIO buffer".to_string(),
        ));
    }

    let avio_ctx = ffmpeg::ffi::avio_alloc_context(
        buffer,
        AVIO_BUFFER_SIZE as i32,
        write_flag,
        opaque,
        read,
        write,
        seek,
    );

    if avio_ctx.is_null() {
        ffmpeg::ffi::av_free(buffer as *mut c_void);
        return Err(TranscodeError::AllocationFailure(
            "failed to allocate AVIO context".to_string(),
        ));
    }

    Ok(AvioGuard { ctx: avio_ctx })
}

/// Open a demuxer over the bytes behind `reader`.
///
/// Returns the input context plus the AVIO guard; the boxed reader must be
/// kept alive alongside them (the AVIO context holds a raw pointer to it).
pub fn open_memory_input(
    mut reader: Box<MemoryReader>,
) -> Result<(ffmpeg::format::context::Input, AvioGuard, Box<MemoryReader>)> {
    unsafe {
        let opaque = &mut *reader as *mut MemoryReader as *mut c_void;
        let guard = alloc_avio_context(0, opaque, Some(read_source), None, Some(seek_source))?;

        let mut fmt_ptr = ffmpeg::ffi::avformat_alloc_context();
        if fmt_ptr.is_null() {
            return Err(TranscodeError::AllocationFailure(
                "failed to allocate input format context".to_string(),
            ));
        }
        (*fmt_ptr).pb = guard.ctx;
        // Without this flag avformat_close_input would avio_close our pb,
        // which only the guard may free.
        (*fmt_ptr).flags |= ffmpeg::ffi::AVFMT_FLAG_CUSTOM_IO;

        // On failure avformat_open_input frees the context and nulls the
        // pointer; the custom pb stays ours and is released by the guard.
        let ret = ffmpeg::ffi::avformat_open_input(
            &mut fmt_ptr,
            ptr::null(),
            ptr::null(),
            ptr::null_mut(),
        );
        if ret < 0 {
            return Err(TranscodeError::Io(format!(
                "could not open input container: {}",
                ffmpeg::Error::from(ret)
            )));
        }

        let mut input = ffmpeg::format::context::Input::wrap(fmt_ptr);

        let ret = ffmpeg::ffi::avformat_find_stream_info(input.as_mut_ptr(), ptr::null_mut());
        if ret < 0 {
            return Err(TranscodeError::Io(format!(
                "could not read stream info: {}",
                ffmpeg::Error::from(ret)
            )));
        }

        Ok((input, guard, reader))
    }
}

/// Create a muxer for the container identified by `format_name` that streams
/// into an in-memory writer starting at `capacity` bytes.
pub fn create_memory_output(
    format_name: &str,
    capacity: usize,
) -> Result<(ffmpeg::format::context::Output, AvioGuard, Box<MemoryWriter>)> {
    let c_format = std::ffi::CString::new(format_name)
        .map_err(|_| TranscodeError::UnsupportedCodec(format!("bad container name {format_name:?}")))?;

    unsafe {
        let mut writer = Box::new(MemoryWriter::with_capacity(capacity));
        let opaque = &mut *writer as *mut MemoryWriter as *mut c_void;
        let guard = alloc_avio_context(1, opaque, None, Some(write_dest), Some(seek_dest))?;

        let mut output_ptr: *mut ffmpeg::ffi::AVFormatContext = ptr::null_mut();
        let ret = ffmpeg::ffi::avformat_alloc_output_context2(
            &mut output_ptr,
            ptr::null_mut(),
            c_format.as_ptr(),
            ptr::null(),
        );
        if ret < 0 || output_ptr.is_null() {
            return Err(TranscodeError::UnsupportedCodec(format!(
                "no muxer registered for container {format_name:?}"
            )));
        }

        (*output_ptr).pb = guard.ctx;
        (*output_ptr).flags |= ffmpeg::ffi::AVFMT_FLAG_CUSTOM_IO;

        let output = ffmpeg::format::context::Output::wrap(output_ptr);

        Ok((output, guard, writer))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_writer_append() {
        let mut writer = MemoryWriter::with_capacity(8);
        writer.write_all(b"test").unwrap();
        assert_eq!(writer.len(), 4);
        assert_eq!(writer.into_inner(), b"test");
    }

    #[test]
    fn test_memory_writer_grows_past_capacity() {
        let mut writer = MemoryWriter::with_capacity(2);
        writer.write_all(b"0123456789").unwrap();
        assert_eq!(writer.len(), 10);
    }

    #[test]
    fn test_memory_writer_seek_back_keeps_logical_size() {
        // Header patching: seek to the start, overwrite, size stays put.
        let mut writer = MemoryWriter::with_capacity(0);
        writer.write_all(b"xxxxhello").unwrap();
        writer.seek(SeekFrom::Start(0)).unwrap();
        writer.write_all(b"RIFF").unwrap();
        assert_eq!(writer.len(), 9);
        assert_eq!(&writer.into_inner()[..4], b"RIFF");
    }

    #[test]
    fn test_memory_reader_read_and_eof() {
        let data = [1u8, 2, 3, 4, 5];
        let mut reader = MemoryReader::new(&data);
        let mut out = [0u8; 3];
        assert_eq!(reader.read_into(&mut out), 3);
        assert_eq!(out, [1, 2, 3]);
        assert_eq!(reader.read_into(&mut out), 2);
        assert_eq!(reader.read_into(&mut out), 0);
    }

    #[test]
    fn test_memory_reader_seek() {
        let data = [9u8; 100];
        let mut reader = MemoryReader::new(&data);
        assert_eq!(reader.seek_to(SeekFrom::End(-10)).unwrap(), 90);
        let mut out = [0u8; 64];
        assert_eq!(reader.read_into(&mut out), 10);
        assert!(reader.seek_to(SeekFrom::Current(-200)).is_err());
    }
}
