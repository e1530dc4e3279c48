/// Streaming RIFF AVI 1.0 writer and a small reader for verifying output.
///
/// ## File layout
/// ```text
/// RIFF 'AVI '
///   LIST 'hdrl'
///     'avih'                      main header (frame count, frame period)
///     LIST 'strl'                 stream 0: video
///       'strh' 'vids' 'DIB '      rate = fps, length = frames
///       'strf'                    BITMAPINFOHEADER, 24-bit BI_RGB
///     LIST 'strl'                 stream 1: audio (optional)
///       'strh' 'auds'             scale = block align, rate = bytes/s
///       'strf'                    WAVEFORMATEX, PCM
///   LIST 'movi'
///     '00db' frame | '01wb' pcm   one audio chunk after each frame
///   'idx1'                        offsets relative to the 'movi' fourcc
/// ```
///
/// The header has a fixed size for a given set of streams, so it is written
/// with zero counts on open and rewritten in place on finish.
use std::fs::{self, File};
use std::io::{self, BufReader, BufWriter, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use crate::models::error::ExportError;
use crate::models::media::{AudioFormat, Frame, VideoFormat, BYTES_PER_PIXEL};

const AVIF_HASINDEX: u32 = 0x10;
const AVIF_ISINTERLEAVED: u32 = 0x100;
const AVIIF_KEYFRAME: u32 = 0x10;

pub const VIDEO_CHUNK_ID: [u8; 4] = *b"00db";
pub const AUDIO_CHUNK_ID: [u8; 4] = *b"01wb";

/// Bytes of one bottom-up BGR24 frame with rows padded to 4 bytes.
pub fn padded_frame_len(video: &VideoFormat) -> usize {
    row_stride(video.width) * video.height as usize
}

fn row_stride(width: u32) -> usize {
    (width as usize * BYTES_PER_PIXEL + 3) & !3
}

/// Largest file an AVI 1.0 RIFF chunk can describe.
pub const MAX_AVI_BYTES: u64 = u32::MAX as u64;

/// Exact size of an AVI holding `frames` frames, each followed by one
/// 16-bit PCM block when `audio` is present.
pub fn clip_size_bound(video: &VideoFormat, audio: Option<&AudioFormat>, frames: usize) -> u64 {
    let header = build_header(video, audio, &StreamCounts::default()).len() as u64;
    let frames = frames as u64;
    let video_chunk = 8 + padded_frame_len(video) as u64;
    let (audio_chunk, chunks_per_frame) = match audio {
        Some(a) => {
            let pcm = a.samples_per_block(video.fps) as u64 * 2;
            (8 + pcm + pcm % 2, 2)
        }
        None => (0, 1),
    };
    let idx1 = 8 + frames * chunks_per_frame * 16;
    header + frames * (video_chunk + audio_chunk) + idx1
}

#[derive(Debug, Clone, Copy, Default)]
struct StreamCounts {
    frames: u32,
    audio_bytes: u32,
    largest_chunk: u32,
    riff_size: u32,
    movi_size: u32,
}

struct IndexEntry {
    id: [u8; 4],
    offset: u32,
    size: u32,
}

/// Writes an AVI file chunk by chunk.
///
/// Call [`AviWriter::write_frame`] and (if the file has an audio stream)
/// [`AviWriter::write_audio`] alternately, then [`AviWriter::finish`].
pub struct AviWriter {
    path: PathBuf,
    file: Option<BufWriter<File>>,
    video: VideoFormat,
    audio: Option<AudioFormat>,
    movi_fourcc_offset: u64,
    position: u64,
    index: Vec<IndexEntry>,
    counts: StreamCounts,
}

impl AviWriter {
    /// Create the file and write a placeholder header.
    pub fn create(path: &Path, video: VideoFormat, audio: Option<AudioFormat>) -> Result<Self, ExportError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .map_err(|e| ExportError::EncoderInitFailed(format!("failed to create directory: {}", e)))?;
        }
        let file = File::create(path)
            .map_err(|e| ExportError::EncoderInitFailed(format!("failed to create {}: {}", path.display(), e)))?;

        let header = build_header(&video, audio.as_ref(), &StreamCounts::default());
        let mut writer = Self {
            path: path.to_path_buf(),
            file: Some(BufWriter::new(file)),
            video,
            audio,
            movi_fourcc_offset: header.len() as u64 - 4,
            position: 0,
            index: Vec::new(),
            counts: StreamCounts::default(),
        };
        writer
            .write_raw(&header)
            .map_err(|e| ExportError::EncoderInitFailed(e.to_string()))?;
        Ok(writer)
    }

    /// Append one video frame, flipped bottom-up with padded rows.
    pub fn write_frame(&mut self, frame: &Frame) -> Result<(), ExportError> {
        if !frame.matches(&self.video) {
            return Err(ExportError::WriteFailed(format!(
                "frame is {}x{}, stream is {}x{}",
                frame.width, frame.height, self.video.width, self.video.height
            )));
        }

        let stride = row_stride(frame.width);
        let mut data = vec![0u8; padded_frame_len(&self.video)];
        for (out_row, y) in (0..frame.height).rev().enumerate() {
            let row = frame.row(y);
            let start = out_row * stride;
            data[start..start + row.len()].copy_from_slice(row);
        }

        self.write_chunk(VIDEO_CHUNK_ID, &data)?;
        self.counts.frames += 1;
        Ok(())
    }

    /// Append one chunk of interleaved little-endian PCM.
    pub fn write_audio(&mut self, pcm: &[u8]) -> Result<(), ExportError> {
        if self.audio.is_none() {
            return Err(ExportError::WriteFailed("file has no audio stream".into()));
        }
        self.write_chunk(AUDIO_CHUNK_ID, pcm)?;
        self.counts.audio_bytes = self
            .counts
            .audio_bytes
            .checked_add(pcm.len() as u32)
            .ok_or_else(|| ExportError::WriteFailed("audio stream exceeds 4 GiB".into()))?;
        Ok(())
    }

    /// Write the index, patch the header counts and flush.
    ///
    /// Returns the number of frames written.
    pub fn finish(mut self) -> Result<u32, ExportError> {
        let movi_end = self.position;

        let mut idx1 = Vec::with_capacity(self.index.len() * 16);
        for entry in &self.index {
            idx1.extend_from_slice(&entry.id);
            put_u32(&mut idx1, AVIIF_KEYFRAME);
            put_u32(&mut idx1, entry.offset);
            put_u32(&mut idx1, entry.size);
        }
        let mut chunk_bytes = Vec::with_capacity(idx1.len() + 8);
        chunk(&mut chunk_bytes, b"idx1", &idx1);
        self.write_raw(&chunk_bytes).map_err(write_failed)?;

        self.counts.movi_size = to_u32(movi_end - self.movi_fourcc_offset)?;
        self.counts.riff_size = to_u32(self.position - 8)?;
        let header = build_header(&self.video, self.audio.as_ref(), &self.counts);

        let file = self
            .file
            .as_mut()
            .ok_or_else(|| ExportError::WriteFailed("file is not open".into()))?;
        file.seek(SeekFrom::Start(0)).map_err(write_failed)?;
        file.write_all(&header).map_err(write_failed)?;
        file.flush().map_err(write_failed)?;
        file.get_ref().sync_all().map_err(write_failed)?;
        self.file = None;

        log::debug!(
            "finalized {} ({} frames, {} audio bytes)",
            self.path.display(),
            self.counts.frames,
            self.counts.audio_bytes
        );
        Ok(self.counts.frames)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn write_chunk(&mut self, id: [u8; 4], data: &[u8]) -> Result<(), ExportError> {
        let offset = to_u32(self.position - self.movi_fourcc_offset)?;
        let size = to_u32(data.len() as u64)?;
        if self.position + 8 + data.len() as u64 > u32::MAX as u64 {
            return Err(ExportError::WriteFailed("clip exceeds the 4 GiB AVI limit".into()));
        }

        self.write_raw(&id).map_err(write_failed)?;
        self.write_raw(&size.to_le_bytes()).map_err(write_failed)?;
        self.write_raw(data).map_err(write_failed)?;
        if data.len() % 2 == 1 {
            self.write_raw(&[0]).map_err(write_failed)?;
        }

        self.index.push(IndexEntry { id, offset, size });
        self.counts.largest_chunk = self.counts.largest_chunk.max(size);
        Ok(())
    }

    fn write_raw(&mut self, data: &[u8]) -> io::Result<()> {
        let file = self
            .file
            .as_mut()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotConnected, "file is not open"))?;
        file.write_all(data)?;
        self.position += data.len() as u64;
        Ok(())
    }
}

fn write_failed(e: io::Error) -> ExportError {
    ExportError::WriteFailed(e.to_string())
}

fn to_u32(value: u64) -> Result<u32, ExportError> {
    u32::try_from(value).map_err(|_| ExportError::WriteFailed("clip exceeds the 4 GiB AVI limit".into()))
}

fn put_u16(buf: &mut Vec<u8>, value: u16) {
    buf.extend_from_slice(&value.to_le_bytes());
}

fn put_u32(buf: &mut Vec<u8>, value: u32) {
    buf.extend_from_slice(&value.to_le_bytes());
}

fn chunk(buf: &mut Vec<u8>, id: &[u8; 4], body: &[u8]) {
    buf.extend_from_slice(id);
    put_u32(buf, body.len() as u32);
    buf.extend_from_slice(body);
    if body.len() % 2 == 1 {
        buf.push(0);
    }
}

fn list(buf: &mut Vec<u8>, kind: &[u8; 4], body: &[u8]) {
    buf.extend_from_slice(b"LIST");
    put_u32(buf, body.len() as u32 + 4);
    buf.extend_from_slice(kind);
    buf.extend_from_slice(body);
}

/// 56-byte AVISTREAMHEADER body.
struct StreamHeader {
    kind: [u8; 4],
    handler: [u8; 4],
    scale: u32,
    rate: u32,
    length: u32,
    suggested_buffer: u32,
    sample_size: u32,
    frame_rect: (u16, u16),
}

impl StreamHeader {
    fn encode(&self) -> Vec<u8> {
        let mut body = Vec::with_capacity(56);
        body.extend_from_slice(&self.kind);
        body.extend_from_slice(&self.handler);
        put_u32(&mut body, 0); // flags
        put_u16(&mut body, 0); // priority
        put_u16(&mut body, 0); // language
        put_u32(&mut body, 0); // initial frames
        put_u32(&mut body, self.scale);
        put_u32(&mut body, self.rate);
        put_u32(&mut body, 0); // start
        put_u32(&mut body, self.length);
        put_u32(&mut body, self.suggested_buffer);
        put_u32(&mut body, u32::MAX); // quality: driver default
        put_u32(&mut body, self.sample_size);
        put_u16(&mut body, 0);
        put_u16(&mut body, 0);
        put_u16(&mut body, self.frame_rect.0);
        put_u16(&mut body, self.frame_rect.1);
        body
    }
}

fn build_header(video: &VideoFormat, audio: Option<&AudioFormat>, counts: &StreamCounts) -> Vec<u8> {
    let frame_bytes = padded_frame_len(video) as u32;
    let audio_rate = audio.map(|a| a.bytes_per_second()).unwrap_or(0);

    let mut avih = Vec::with_capacity(56);
    put_u32(&mut avih, 1_000_000 / video.fps.max(1));
    put_u32(&mut avih, frame_bytes.saturating_mul(video.fps).saturating_add(audio_rate));
    put_u32(&mut avih, 0); // padding granularity
    put_u32(&mut avih, AVIF_HASINDEX | AVIF_ISINTERLEAVED);
    put_u32(&mut avih, counts.frames);
    put_u32(&mut avih, 0); // initial frames
    put_u32(&mut avih, if audio.is_some() { 2 } else { 1 });
    put_u32(&mut avih, counts.largest_chunk.max(frame_bytes));
    put_u32(&mut avih, video.width);
    put_u32(&mut avih, video.height);
    avih.extend_from_slice(&[0u8; 16]); // reserved

    let mut bitmap_info = Vec::with_capacity(40);
    put_u32(&mut bitmap_info, 40);
    put_u32(&mut bitmap_info, video.width);
    put_u32(&mut bitmap_info, video.height); // positive: bottom-up rows
    put_u16(&mut bitmap_info, 1); // planes
    put_u16(&mut bitmap_info, 24); // bits per pixel
    put_u32(&mut bitmap_info, 0); // BI_RGB
    put_u32(&mut bitmap_info, frame_bytes);
    bitmap_info.extend_from_slice(&[0u8; 16]); // ppm x/y, colours used/important

    let video_header = StreamHeader {
        kind: *b"vids",
        handler: *b"DIB ",
        scale: 1,
        rate: video.fps,
        length: counts.frames,
        suggested_buffer: frame_bytes,
        sample_size: 0,
        frame_rect: (video.width as u16, video.height as u16),
    };
    let mut video_strl = Vec::new();
    chunk(&mut video_strl, b"strh", &video_header.encode());
    chunk(&mut video_strl, b"strf", &bitmap_info);

    let mut hdrl = Vec::new();
    chunk(&mut hdrl, b"avih", &avih);
    list(&mut hdrl, b"strl", &video_strl);

    if let Some(audio) = audio {
        let block_align = audio.block_align() as u32;
        let fps = video.fps.max(1);
        let audio_header = StreamHeader {
            kind: *b"auds",
            handler: [0; 4],
            scale: block_align,
            rate: audio.bytes_per_second(),
            length: counts.audio_bytes / block_align.max(1),
            suggested_buffer: audio.bytes_per_second() / fps + block_align,
            sample_size: block_align,
            frame_rect: (0, 0),
        };

        let mut wave_format = Vec::with_capacity(18);
        put_u16(&mut wave_format, 1); // WAVE_FORMAT_PCM
        put_u16(&mut wave_format, audio.channels);
        put_u32(&mut wave_format, audio.sample_rate);
        put_u32(&mut wave_format, audio.bytes_per_second());
        put_u16(&mut wave_format, audio.block_align());
        put_u16(&mut wave_format, audio.bit_depth);
        put_u16(&mut wave_format, 0); // cbSize

        let mut audio_strl = Vec::new();
        chunk(&mut audio_strl, b"strh", &audio_header.encode());
        chunk(&mut audio_strl, b"strf", &wave_format);
        list(&mut hdrl, b"strl", &audio_strl);
    }

    let mut header = Vec::with_capacity(12 + hdrl.len() + 20);
    header.extend_from_slice(b"RIFF");
    put_u32(&mut header, counts.riff_size);
    header.extend_from_slice(b"AVI ");
    list(&mut header, b"hdrl", &hdrl);
    header.extend_from_slice(b"LIST");
    put_u32(&mut header, counts.movi_size);
    header.extend_from_slice(b"movi");
    header
}

/// Audio stream description read back from an AVI.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AviAudioInfo {
    pub sample_rate: u32,
    pub channels: u16,
    pub bit_depth: u16,
}

/// Summary of an AVI file as reported by [`inspect`].
#[derive(Debug, Clone, PartialEq)]
pub struct AviInfo {
    pub width: u32,
    pub height: u32,
    /// Video stream rate / scale.
    pub fps: f64,
    pub micros_per_frame: u32,
    /// Frame count declared in the main header.
    pub total_frames: u32,
    /// Video chunks actually present in 'movi'.
    pub video_chunks: u32,
    pub streams: u32,
    pub audio: Option<AviAudioInfo>,
    pub audio_bytes: u64,
    pub has_index: bool,
}

impl AviInfo {
    pub fn duration_secs(&self) -> f64 {
        if self.fps <= 0.0 {
            return 0.0;
        }
        self.video_chunks as f64 / self.fps
    }

    pub fn audio_duration_secs(&self) -> Option<f64> {
        self.audio.map(|a| {
            let bytes_per_sec = a.sample_rate as f64 * a.channels as f64 * a.bit_depth as f64 / 8.0;
            self.audio_bytes as f64 / bytes_per_sec
        })
    }
}

fn invalid(message: &str) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, message.to_string())
}

fn le_u16(bytes: &[u8], at: usize) -> io::Result<u16> {
    bytes
        .get(at..at + 2)
        .map(|b| u16::from_le_bytes([b[0], b[1]]))
        .ok_or_else(|| invalid("truncated header field"))
}

fn le_u32(bytes: &[u8], at: usize) -> io::Result<u32> {
    bytes
        .get(at..at + 4)
        .map(|b| u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        .ok_or_else(|| invalid("truncated header field"))
}

/// Iterate `(id, body)` pairs of consecutive RIFF chunks in `bytes`.
fn sub_chunks(bytes: &[u8]) -> impl Iterator<Item = ([u8; 4], &[u8])> + '_ {
    let mut at = 0usize;
    std::iter::from_fn(move || {
        if at + 8 > bytes.len() {
            return None;
        }
        let id = [bytes[at], bytes[at + 1], bytes[at + 2], bytes[at + 3]];
        let size = u32::from_le_bytes([bytes[at + 4], bytes[at + 5], bytes[at + 6], bytes[at + 7]]) as usize;
        let start = at + 8;
        let end = (start + size).min(bytes.len());
        at = start + size + (size & 1);
        Some((id, &bytes[start..end]))
    })
}

/// Parse an AVI file and summarize its streams.
///
/// Reads the header into memory and walks 'movi' by seeking over chunk
/// bodies, so multi-gigabyte clips are cheap to inspect.
pub fn inspect(path: &Path) -> io::Result<AviInfo> {
    let mut reader = BufReader::new(File::open(path)?);

    let mut riff = [0u8; 12];
    reader.read_exact(&mut riff)?;
    if &riff[0..4] != b"RIFF" || &riff[8..12] != b"AVI " {
        return Err(invalid("not a RIFF AVI file"));
    }

    let mut info = AviInfo {
        width: 0,
        height: 0,
        fps: 0.0,
        micros_per_frame: 0,
        total_frames: 0,
        video_chunks: 0,
        streams: 0,
        audio: None,
        audio_bytes: 0,
        has_index: false,
    };
    let mut saw_header = false;

    loop {
        let mut chunk_header = [0u8; 8];
        match reader.read_exact(&mut chunk_header) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => break,
            Err(e) => return Err(e),
        }
        let id = &chunk_header[0..4];
        let size = le_u32(&chunk_header, 4)? as u64;
        let padded = size + (size & 1);

        if id == b"LIST" {
            let mut kind = [0u8; 4];
            reader.read_exact(&mut kind)?;
            match &kind {
                b"hdrl" => {
                    let mut body = vec![0u8; size.saturating_sub(4) as usize];
                    reader.read_exact(&mut body)?;
                    parse_hdrl(&body, &mut info)?;
                    saw_header = true;
                    reader.seek_relative((padded - size) as i64)?;
                }
                b"movi" => {
                    walk_movi(&mut reader, size.saturating_sub(4), &mut info)?;
                    reader.seek_relative((padded - size) as i64)?;
                }
                _ => reader.seek_relative(padded as i64 - 4)?,
            }
        } else {
            if id == b"idx1" {
                info.has_index = true;
            }
            reader.seek_relative(padded as i64)?;
        }
    }

    if !saw_header {
        return Err(invalid("missing hdrl header list"));
    }
    Ok(info)
}

fn parse_hdrl(body: &[u8], info: &mut AviInfo) -> io::Result<()> {
    for (id, data) in sub_chunks(body) {
        match &id {
            b"avih" => {
                info.micros_per_frame = le_u32(data, 0)?;
                info.total_frames = le_u32(data, 16)?;
                info.streams = le_u32(data, 24)?;
                info.width = le_u32(data, 32)?;
                info.height = le_u32(data, 36)?;
            }
            b"LIST" if data.get(0..4) == Some(b"strl".as_slice()) => parse_strl(&data[4..], info)?,
            _ => {}
        }
    }
    Ok(())
}

fn parse_strl(body: &[u8], info: &mut AviInfo) -> io::Result<()> {
    let mut kind = [0u8; 4];
    for (id, data) in sub_chunks(body) {
        match &id {
            b"strh" => {
                kind.copy_from_slice(data.get(0..4).ok_or_else(|| invalid("truncated strh"))?);
                if &kind == b"vids" {
                    let scale = le_u32(data, 20)?;
                    let rate = le_u32(data, 24)?;
                    if scale > 0 {
                        info.fps = rate as f64 / scale as f64;
                    }
                }
            }
            b"strf" if &kind == b"auds" => {
                info.audio = Some(AviAudioInfo {
                    channels: le_u16(data, 2)?,
                    sample_rate: le_u32(data, 4)?,
                    bit_depth: le_u16(data, 14)?,
                });
            }
            _ => {}
        }
    }
    Ok(())
}

fn walk_movi<R: Read + Seek>(reader: &mut BufReader<R>, len: u64, info: &mut AviInfo) -> io::Result<()> {
    let mut consumed = 0u64;
    while consumed + 8 <= len {
        let mut chunk_header = [0u8; 8];
        reader.read_exact(&mut chunk_header)?;
        let size = le_u32(&chunk_header, 4)? as u64;
        let padded = size + (size & 1);

        match [chunk_header[0], chunk_header[1], chunk_header[2], chunk_header[3]] {
            VIDEO_CHUNK_ID => info.video_chunks += 1,
            AUDIO_CHUNK_ID => info.audio_bytes += size,
            _ => {}
        }
        reader.seek_relative(padded as i64)?;
        consumed += 8 + padded;
    }
    Ok(())
}
