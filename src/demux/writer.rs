use crate::demux::output::OutRecord;
use crate::errors::{DemarkError, Result};
use crossbeam_channel::{bounded, Sender};
use flate2::write::GzEncoder;
use flate2::Compression;
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::Path;
use std::thread::JoinHandle;

/// Records buffered per async writer before the producer blocks.
const ASYNC_QUEUE_DEPTH: usize = 1024;

/// Write one four-line FASTQ record.
pub fn write_fastq_record<W: Write>(writer: &mut W, rec: &OutRecord) -> io::Result<()> {
    writer.write_all(b"@")?;
    writer.write_all(&rec.name)?;
    writer.write_all(b"\n")?;
    writer.write_all(&rec.seq)?;
    writer.write_all(b"\n+\n")?;
    writer.write_all(&rec.qual)?;
    writer.write_all(b"\n")?;
    Ok(())
}

/// File writer that compresses iff the path ends in `.gz`.
enum FileWriter {
    Gz(GzEncoder<BufWriter<File>>),
    Plain(BufWriter<File>),
}

impl FileWriter {
    fn create(path: &Path, level: Compression) -> io::Result<Self> {
        let file = BufWriter::new(File::create(path)?);
        if path.extension().map_or(false, |e| e == "gz") {
            Ok(FileWriter::Gz(GzEncoder::new(file, level)))
        } else {
            Ok(FileWriter::Plain(file))
        }
    }

    fn finish(self) -> io::Result<()> {
        match self {
            FileWriter::Gz(enc) => enc.finish()?.flush(),
            FileWriter::Plain(mut w) => w.flush(),
        }
    }
}

impl Write for FileWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            FileWriter::Gz(w) => w.write(buf),
            FileWriter::Plain(w) => w.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            FileWriter::Gz(w) => w.flush(),
            FileWriter::Plain(w) => w.flush(),
        }
    }
}

enum SinkInner {
    Sync(FileWriter),
    Async {
        tx: Sender<OutRecord>,
        handle: JoinHandle<io::Result<()>>,
    },
}

/// One output FASTQ stream. Owns its file handle exclusively.
///
/// In asynchronous mode, writes go through a bounded queue to a dedicated
/// thread; a full queue exerts back-pressure on the producer.
pub struct FastqSink {
    inner: SinkInner,
}

impl FastqSink {
    pub fn create(path: &Path, level: Compression, asynchronous: bool) -> Result<Self> {
        let writer = FileWriter::create(path, level)?;
        let inner = if asynchronous {
            let (tx, rx) = bounded::<OutRecord>(ASYNC_QUEUE_DEPTH);
            let mut writer = writer;
            let handle = std::thread::spawn(move || -> io::Result<()> {
                for rec in rx {
                    write_fastq_record(&mut writer, &rec)?;
                }
                writer.finish()
            });
            SinkInner::Async { tx, handle }
        } else {
            SinkInner::Sync(writer)
        };
        Ok(FastqSink { inner })
    }

    /// Append one record. Blocks on a full async queue.
    pub fn write(&mut self, rec: OutRecord) -> Result<()> {
        match &mut self.inner {
            SinkInner::Sync(w) => write_fastq_record(w, &rec).map_err(DemarkError::Io),
            SinkInner::Async { tx, .. } => tx.send(rec).map_err(|_| {
                DemarkError::Io(io::Error::new(
                    io::ErrorKind::BrokenPipe,
                    "writer thread terminated",
                ))
            }),
        }
    }

    /// Close the stream, draining any queued records first.
    pub fn finish(self) -> Result<()> {
        match self.inner {
            SinkInner::Sync(w) => w.finish().map_err(DemarkError::Io),
            SinkInner::Async { tx, handle } => {
                drop(tx);
                match handle.join() {
                    Ok(result) => result.map_err(DemarkError::Io),
                    Err(_) => Err(DemarkError::Io(io::Error::new(
                        io::ErrorKind::Other,
                        "writer thread panicked",
                    ))),
                }
            }
        }
    }
}

/// Every sink of a demultiplex run: one per (sample, output stream), plus
/// optional per-input-stream unassigned sinks.
pub struct SampleSinks {
    per_sample: Vec<Vec<FastqSink>>,
    unassigned: Vec<FastqSink>,
}

impl SampleSinks {
    pub fn new(per_sample: Vec<Vec<FastqSink>>, unassigned: Vec<FastqSink>) -> Self {
        SampleSinks {
            per_sample,
            unassigned,
        }
    }

    pub fn has_unassigned(&self) -> bool {
        !self.unassigned.is_empty()
    }

    /// Write to output stream `stream_pos` (0-based position among the
    /// output layouts) of `sample_idx`.
    pub fn write(&mut self, sample_idx: usize, stream_pos: usize, rec: OutRecord) -> Result<()> {
        self.per_sample[sample_idx][stream_pos].write(rec)
    }

    /// Route an unassigned input record, unchanged, to the unassigned sink
    /// of its input stream.
    pub fn write_unassigned(&mut self, input_idx: usize, rec: OutRecord) -> Result<()> {
        self.unassigned[input_idx].write(rec)
    }

    /// Close every sink, reporting the first failure after attempting all.
    pub fn finish(self) -> Result<()> {
        let mut first_err = None;
        for sink in self
            .per_sample
            .into_iter()
            .flatten()
            .chain(self.unassigned)
        {
            if let Err(e) = sink.finish() {
                first_err.get_or_insert(e);
            }
        }
        match first_err {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}
