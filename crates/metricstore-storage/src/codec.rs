//! Segment codec: gzip compressed, newline delimited JSON objects
//!
//! Every record is written as `"\n"` followed by one JSON object, so a record
//! never shares a line with the tail of an earlier, possibly torn, write.
//! Files may hold several concatenated gzip members (one per writer session);
//! readers decode all of them as one stream.

use flate2::Compression;
use flate2::read::MultiGzDecoder;
use flate2::write::GzEncoder;
use metricstore_common::{Bucket, Document, Result, StoredMetric, TimestampFunction};
use std::fs::{File, OpenOptions};
use std::io::{self, BufRead, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

/// Writes documents into one gzip member
pub struct DocumentWriter<W: Write> {
    encoder: GzEncoder<W>,
    written: u64,
}

impl<W: Write> DocumentWriter<W> {
    pub fn new(inner: W) -> Self {
        Self {
            encoder: GzEncoder::new(inner, Compression::default()),
            written: 0,
        }
    }

    /// Append one document
    pub fn write(&mut self, document: &Document) -> Result<()> {
        self.encoder.write_all(b"\n")?;
        serde_json::to_writer(&mut self.encoder, document)?;
        self.written += 1;
        Ok(())
    }

    /// Documents written by this writer
    pub const fn written(&self) -> u64 {
        self.written
    }

    /// Finish the gzip member and return the inner sink
    pub fn finish(self) -> Result<W> {
        let mut inner = self.encoder.finish()?;
        inner.flush()?;
        Ok(inner)
    }
}

/// Writer appending to a segment file on disk
pub struct SegmentWriter {
    path: PathBuf,
    writer: DocumentWriter<BufWriter<File>>,
}

impl SegmentWriter {
    /// Open `path` for append; the parent directory must exist
    pub fn append(path: &Path) -> Result<Self> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self {
            path: path.to_path_buf(),
            writer: DocumentWriter::new(BufWriter::new(file)),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn write(&mut self, document: &Document) -> Result<()> {
        self.writer.write(document)
    }

    /// Flush and close the file
    pub fn close(self) -> Result<()> {
        self.writer.finish()?;
        Ok(())
    }
}

/// Reads documents back from gzip compressed input
///
/// Lines that are blank are skipped, lines that are not UTF-8 or do not parse
/// as a JSON object are skipped and counted.
pub struct DocumentReader<R: Read> {
    lines: BufReader<MultiGzDecoder<R>>,
    line: Vec<u8>,
    ignored: u64,
}

impl<R: Read> DocumentReader<R> {
    pub fn new(inner: R) -> Self {
        Self {
            lines: BufReader::new(MultiGzDecoder::new(inner)),
            line: Vec::new(),
            ignored: 0,
        }
    }

    /// Next document, `None` once the input is exhausted
    pub fn read(&mut self) -> Result<Option<Document>> {
        loop {
            self.line.clear();
            if self.lines.read_until(b'\n', &mut self.line)? == 0 {
                return Ok(None);
            }
            let line = self.line.trim_ascii();
            if line.is_empty() {
                continue;
            }
            match serde_json::from_slice::<Document>(line) {
                Ok(document) => return Ok(Some(document)),
                Err(_) => self.ignored += 1,
            }
        }
    }

    /// Lines skipped because they were not UTF-8 JSON objects
    pub const fn ignored(&self) -> u64 {
        self.ignored
    }
}

impl DocumentReader<BufReader<File>> {
    /// Open a segment or day file
    pub fn open(path: &Path) -> Result<Self> {
        Ok(Self::new(BufReader::new(File::open(path)?)))
    }
}

/// Resolves documents read from disk to stored metrics
///
/// Records whose timestamp cannot be resolved are skipped and counted.
pub struct StoredMetricReader<'a, R: Read> {
    reader: DocumentReader<R>,
    bucket: &'a Bucket,
    timestamps: &'a TimestampFunction,
    ignored_timestamps: u64,
}

impl<'a, R: Read> StoredMetricReader<'a, R> {
    pub const fn new(
        reader: DocumentReader<R>,
        bucket: &'a Bucket,
        timestamps: &'a TimestampFunction,
    ) -> Self {
        Self {
            reader,
            bucket,
            timestamps,
            ignored_timestamps: 0,
        }
    }

    pub fn read(&mut self) -> Result<Option<StoredMetric>> {
        while let Some(document) = self.reader.read()? {
            match self.timestamps.apply(&document) {
                Ok(timestamp) => {
                    return Ok(Some(StoredMetric::new(
                        self.bucket.clone(),
                        timestamp,
                        document,
                    )));
                }
                Err(_) => self.ignored_timestamps += 1,
            }
        }
        Ok(None)
    }

    /// Unparsable lines plus records without a valid timestamp
    pub const fn ignored(&self) -> u64 {
        self.reader.ignored() + self.ignored_timestamps
    }
}

/// Encode documents into one in-memory gzip blob
pub fn encode_documents<'a>(documents: impl IntoIterator<Item = &'a Document>) -> Result<Vec<u8>> {
    let mut writer = DocumentWriter::new(Vec::new());
    for document in documents {
        writer.write(document)?;
    }
    writer.finish()
}

/// Decode every document of an in-memory gzip blob
pub fn decode_documents(blob: &[u8]) -> Result<Vec<Document>> {
    let mut reader = DocumentReader::new(blob);
    let mut documents = Vec::new();
    while let Some(document) = reader.read()? {
        documents.push(document);
    }
    Ok(documents)
}

/// Copy the decompressed bytes of a segment file into `out`
pub fn copy_decompressed(path: &Path, out: &mut impl Write) -> Result<u64> {
    let mut decoder = MultiGzDecoder::new(BufReader::new(File::open(path)?));
    Ok(io::copy(&mut decoder, out)?)
}
