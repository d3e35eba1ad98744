//! Filesystem bucket store
//!
//! One [`FilesystemBucket`] exists per bucket directory. It is owned by the
//! storage worker thread and is the only code touching the bucket's files.
//!
//! Each day of a bucket is either expanded (one gzip segment per minute below
//! `<year>/<month>/<day>/`) or compact (`<year>/<month>/<day>.day`). Writes go
//! to minute segments and expand a compact day first; compaction concatenates
//! the decompressed segments into a single gzip stream. Both transitions stage
//! their output under a `-tmp` name and finish with a rename.

use crate::codec::{DocumentReader, SegmentWriter, StoredMetricReader, copy_decompressed};
use crate::layout::{PathLayout, TYPE_EXTENSION, minute_timestamp};
use crate::writer_cache::WriterCache;
use chrono::{DateTime, NaiveDate, TimeDelta, Utc};
use flate2::Compression;
use flate2::write::GzEncoder;
use metricstore_common::{Bucket, Document, Error, Interval, Result, StoredMetric, TimestampFunction};
use std::fs;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Identity of a bucket directory
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BucketData {
    bucket: Bucket,
    root: PathBuf,
}

impl BucketData {
    /// Load an existing bucket directory; the type comes from its marker file
    pub fn load(dir: &Path) -> Result<Self> {
        let name = dir
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| Error::storage(format!("invalid bucket directory: {}", dir.display())))?
            .to_string();
        let mut markers = Vec::new();
        for entry in fs::read_dir(dir)? {
            let path = entry?.path();
            if path.is_file()
                && path.extension().and_then(|e| e.to_str()) == Some(TYPE_EXTENSION)
            {
                if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                    markers.push(stem.to_string());
                }
            }
        }
        markers.sort();
        Ok(Self {
            bucket: Bucket::new(name, markers.into_iter().next()),
            root: dir.to_path_buf(),
        })
    }

    /// Create the bucket directory below `base` and write its type marker
    pub fn create(base: &Path, name: &str, bucket_type: Option<&str>) -> Result<Self> {
        validate_name("bucket name", name)?;
        if let Some(t) = bucket_type {
            validate_name("bucket type", t)?;
        }
        let root = base.join(name);
        fs::create_dir_all(&root).map_err(|e| {
            Error::storage(format!("failed to create bucket dir {}: {}", root.display(), e))
        })?;
        if let Some(t) = bucket_type {
            let marker = root.join(format!("{t}.{TYPE_EXTENSION}"));
            match fs::OpenOptions::new().write(true).create_new(true).open(&marker) {
                Ok(_) => {}
                Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {}
                Err(e) => {
                    return Err(Error::storage(format!(
                        "failed to create type marker {}: {}",
                        marker.display(),
                        e
                    )));
                }
            }
        }
        info!("Created bucket {} at {:?}", name, root);
        Ok(Self {
            bucket: Bucket::new(name, bucket_type.map(String::from)),
            root,
        })
    }

    pub const fn bucket(&self) -> &Bucket {
        &self.bucket
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

fn validate_name(what: &str, name: &str) -> Result<()> {
    if name.is_empty()
        || name == "."
        || name == ".."
        || name.contains(['/', '\\'])
    {
        return Err(Error::invalid_argument(format!("invalid {what}: '{name}'")));
    }
    Ok(())
}

/// Result of streaming an interval out of a bucket
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReadStatus {
    /// Records handed to the sink
    pub delivered: u64,
    /// Records skipped as unparsable or without a valid timestamp
    pub ignored: u64,
    /// The sink asked to stop
    pub stopped: bool,
}

/// Writable bucket backed by a directory tree
pub struct FilesystemBucket {
    data: BucketData,
    layout: PathLayout,
    timestamps: Arc<TimestampFunction>,
    writers: WriterCache,
}

impl FilesystemBucket {
    pub fn new(data: BucketData, timestamps: Arc<TimestampFunction>, max_cached_writers: usize) -> Self {
        let layout = PathLayout::new(data.root());
        Self {
            data,
            layout,
            timestamps,
            writers: WriterCache::new(max_cached_writers),
        }
    }

    pub const fn bucket(&self) -> &Bucket {
        self.data.bucket()
    }

    pub const fn layout(&self) -> &PathLayout {
        &self.layout
    }

    pub const fn writers(&self) -> &WriterCache {
        &self.writers
    }

    /// Append a document to the segment of its minute
    pub fn write(&mut self, document: Document) -> Result<StoredMetric> {
        let timestamp = self.timestamps.apply(&document)?;
        let minute_file = self.layout.minute_file(timestamp);
        if let Some(writer) = self.writers.get(&minute_file) {
            writer.write(&document)?;
        } else {
            let date = timestamp.date_naive();
            if self.layout.day_file(date).is_file() {
                self.expand(date)?;
            }
            if let Some(parent) = minute_file.parent() {
                fs::create_dir_all(parent).map_err(|e| {
                    Error::storage(format!("failed to create day dir {}: {}", parent.display(), e))
                })?;
            }
            let mut writer = SegmentWriter::append(&minute_file)?;
            writer.write(&document)?;
            close_evicted(self.writers.put(writer));
        }
        Ok(StoredMetric::new(self.bucket().clone(), timestamp, document))
    }

    /// Stream the records of `interval` into `sink` in timestamp order
    ///
    /// The sink returns `false` to stop the read early.
    pub fn read(
        &mut self,
        interval: &Interval,
        sink: &mut dyn FnMut(StoredMetric) -> bool,
    ) -> Result<ReadStatus> {
        let interval = interval.truncated_to_minutes();
        let end = interval.end();
        let mut status = ReadStatus::default();
        let mut current = interval.start();
        while current < end {
            let date = current.date_naive();
            let day_file = self.layout.day_file(date);
            if day_file.is_file() {
                self.read_file(&day_file, current, end, sink, &mut status)?;
                if status.stopped {
                    break;
                }
                current = minute_timestamp(date, 24 * 60 - 1);
            } else if self.layout.day_dir(date).is_dir() {
                let minute_file = self.layout.minute_file(current);
                if minute_file.is_file() {
                    self.read_file(&minute_file, current, end, sink, &mut status)?;
                    if status.stopped {
                        break;
                    }
                }
            } else {
                // Nothing stored for this day
                current = minute_timestamp(date, 24 * 60 - 1);
            }
            current += TimeDelta::minutes(1);
        }
        if status.ignored > 0 {
            debug!(
                "Bucket {}: ignored {} records while reading {}",
                self.bucket().name,
                status.ignored,
                interval
            );
        }
        Ok(status)
    }

    fn read_file(
        &mut self,
        path: &Path,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        sink: &mut dyn FnMut(StoredMetric) -> bool,
        status: &mut ReadStatus,
    ) -> Result<()> {
        self.close_writer(path)?;
        let mut reader = StoredMetricReader::new(
            DocumentReader::open(path)?,
            self.data.bucket(),
            &self.timestamps,
        );
        while let Some(metric) = reader.read()? {
            if metric.timestamp < start {
                continue;
            }
            if metric.timestamp >= end {
                break;
            }
            status.delivered += 1;
            if !sink(metric) {
                status.stopped = true;
                break;
            }
        }
        status.ignored += reader.ignored();
        Ok(())
    }

    /// Convert a compact day back into minute segments
    pub fn expand(&mut self, date: NaiveDate) -> Result<()> {
        let day_file = self.layout.day_file(date);
        let tmp_dir = self.layout.tmp_day_dir(date);
        if tmp_dir.exists() {
            fs::remove_dir_all(&tmp_dir).map_err(|e| {
                Error::storage(format!("failed to clear staging dir {}: {}", tmp_dir.display(), e))
            })?;
        }
        fs::create_dir_all(&tmp_dir).map_err(|e| {
            Error::storage(format!("failed to create staging dir {}: {}", tmp_dir.display(), e))
        })?;

        self.close_writer(&day_file)?;
        let mut reader = StoredMetricReader::new(
            DocumentReader::open(&day_file)?,
            self.data.bucket(),
            &self.timestamps,
        );
        let mut writer: Option<SegmentWriter> = None;
        while let Some(metric) = reader.read()? {
            let path = self.layout.tmp_minute_file(metric.timestamp);
            let current = match writer.take() {
                Some(w) if w.path() == path => w,
                Some(w) => {
                    w.close()?;
                    SegmentWriter::append(&path)?
                }
                None => SegmentWriter::append(&path)?,
            };
            let current = writer.insert(current);
            current.write(&metric.document)?;
        }
        if let Some(w) = writer {
            w.close()?;
        }

        let day_dir = self.layout.day_dir(date);
        if day_dir.exists() {
            // Left over by an interrupted transition; the day file is complete
            warn!(
                "Bucket {}: replacing stale day dir {}",
                self.bucket().name,
                day_dir.display()
            );
            self.remove_day_dir(date)?;
        }
        fs::rename(&tmp_dir, &day_dir).map_err(|e| {
            Error::storage(format!(
                "failed to move {} to {}: {}",
                tmp_dir.display(),
                day_dir.display(),
                e
            ))
        })?;
        fs::remove_file(&day_file).map_err(|e| {
            Error::storage(format!("failed to delete day file {}: {}", day_file.display(), e))
        })?;
        info!("Bucket {}: expanded day {}", self.bucket().name, date);
        Ok(())
    }

    /// Concatenate the minute segments of a day into its day file
    ///
    /// Returns `false` if the day was already compact or holds no data.
    pub fn compress(&mut self, date: NaiveDate) -> Result<bool> {
        let day_file = self.layout.day_file(date);
        let day_dir = self.layout.day_dir(date);
        if day_file.is_file() {
            if day_dir.is_dir() {
                warn!(
                    "Bucket {}: removing stale day dir {} next to its day file",
                    self.bucket().name,
                    day_dir.display()
                );
                self.remove_day_dir(date)?;
            }
            return Ok(false);
        }
        if !day_dir.is_dir() {
            return Ok(false);
        }
        let tmp_file = self.layout.tmp_day_file(date);
        let minutes = self.layout.minutes_of_day(date)?;
        {
            let file = fs::File::create(&tmp_file).map_err(|e| {
                Error::storage(format!("failed to create {}: {}", tmp_file.display(), e))
            })?;
            let mut encoder = GzEncoder::new(BufWriter::new(file), Compression::default());
            for (_, minute_file) in &minutes {
                self.close_writer(minute_file)?;
                copy_decompressed(minute_file, &mut encoder)?;
            }
            encoder.finish()?.flush()?;
        }
        fs::rename(&tmp_file, &day_file).map_err(|e| {
            Error::storage(format!(
                "failed to move {} to {}: {}",
                tmp_file.display(),
                day_file.display(),
                e
            ))
        })?;
        fs::remove_dir_all(&day_dir).map_err(|e| {
            Error::storage(format!("failed to delete day dir {}: {}", day_dir.display(), e))
        })?;
        info!(
            "Bucket {}: compressed day {} ({} minutes)",
            self.bucket().name,
            date,
            minutes.len()
        );
        Ok(true)
    }

    /// Compress every day strictly before `until`
    pub fn compress_all(&mut self, until: NaiveDate) -> Result<usize> {
        let mut compressed = 0;
        for date in self.layout.days()? {
            if date >= until {
                break;
            }
            if self.compress(date)? {
                compressed += 1;
            }
        }
        Ok(compressed)
    }

    /// Remove all data of a day, whichever representation it is in
    pub fn delete(&mut self, date: NaiveDate) -> Result<bool> {
        let day_file = self.layout.day_file(date);
        if day_file.is_file() {
            self.close_writer(&day_file)?;
            fs::remove_file(&day_file).map_err(|e| {
                Error::storage(format!("failed to delete day file {}: {}", day_file.display(), e))
            })?;
        } else {
            if !self.layout.day_dir(date).is_dir() {
                return Ok(false);
            }
            self.remove_day_dir(date)?;
        }
        info!("Bucket {}: deleted day {}", self.bucket().name, date);
        Ok(true)
    }

    /// Delete every day strictly before `until`
    pub fn delete_all(&mut self, until: NaiveDate) -> Result<usize> {
        let mut deleted = 0;
        for date in self.layout.days()? {
            if date >= until {
                break;
            }
            if self.delete(date)? {
                deleted += 1;
            }
        }
        Ok(deleted)
    }

    /// Close every cached writer, logging failures
    pub fn close(&mut self) {
        close_evicted(self.writers.drain());
    }

    fn remove_day_dir(&mut self, date: NaiveDate) -> Result<()> {
        for (_, minute_file) in self.layout.minutes_of_day(date)? {
            self.close_writer(&minute_file)?;
        }
        let day_dir = self.layout.day_dir(date);
        fs::remove_dir_all(&day_dir).map_err(|e| {
            Error::storage(format!("failed to delete day dir {}: {}", day_dir.display(), e))
        })
    }

    fn close_writer(&mut self, path: &Path) -> Result<()> {
        match self.writers.remove(path) {
            Some(writer) => writer.close(),
            None => Ok(()),
        }
    }
}

impl Drop for FilesystemBucket {
    fn drop(&mut self) {
        self.close();
    }
}

/// Close writers no longer cached, logging failures
///
/// The documents they hold were already accepted, so a failure here does not
/// fail the command that caused the eviction.
fn close_evicted(writers: Vec<SegmentWriter>) -> usize {
    let mut failed = 0;
    for writer in writers {
        let path = writer.path().to_path_buf();
        if let Err(e) = writer.close() {
            warn!("Failed to close writer for {:?}: {}", path, e);
            failed += 1;
        }
    }
    failed
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;
    use tempfile::tempdir;

    fn doc(ts: &str, value: i64) -> Document {
        json!({"timestamp": ts, "value": value})
            .as_object()
            .cloned()
            .unwrap()
    }

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn open_bucket(base: &Path, max_writers: usize) -> FilesystemBucket {
        let data = BucketData::create(base, "cpu", Some("gauge")).unwrap();
        FilesystemBucket::new(data, Arc::new(TimestampFunction::default()), max_writers)
    }

    fn read_values(bucket: &mut FilesystemBucket, interval: &Interval) -> Vec<i64> {
        let mut values = Vec::new();
        bucket
            .read(interval, &mut |m| {
                values.push(m.document["value"].as_i64().unwrap());
                true
            })
            .unwrap();
        values
    }

    fn whole_day(d: NaiveDate) -> Interval {
        Interval::day(d)
    }

    #[test]
    fn test_bucket_data_create_and_load() {
        let dir = tempdir().unwrap();
        let created = BucketData::create(dir.path(), "cpu", Some("gauge")).unwrap();
        assert!(dir.path().join("cpu/gauge.type").is_file());
        // Creating again keeps the marker
        BucketData::create(dir.path(), "cpu", Some("gauge")).unwrap();

        let loaded = BucketData::load(&dir.path().join("cpu")).unwrap();
        assert_eq!(loaded, created);
        assert_eq!(loaded.bucket(), &Bucket::typed("cpu", "gauge"));

        BucketData::create(dir.path(), "untyped", None).unwrap();
        let loaded = BucketData::load(&dir.path().join("untyped")).unwrap();
        assert_eq!(loaded.bucket().bucket_type, None);
    }

    #[test]
    fn test_bucket_data_rejects_bad_names() {
        let dir = tempdir().unwrap();
        assert!(BucketData::create(dir.path(), "", None).is_err());
        assert!(BucketData::create(dir.path(), "..", None).is_err());
        assert!(BucketData::create(dir.path(), "a/b", None).is_err());
    }

    #[test]
    fn test_write_and_read_roundtrip() {
        let dir = tempdir().unwrap();
        let mut bucket = open_bucket(dir.path(), 2);
        bucket.write(doc("2015-01-01T00:02:00Z", 3)).unwrap();
        bucket.write(doc("2015-01-01T00:00:00Z", 1)).unwrap();
        bucket.write(doc("2015-01-01T00:01:30Z", 2)).unwrap();
        bucket.write(doc("2015-01-01T00:00:59Z", 11)).unwrap();

        let values = read_values(&mut bucket, &whole_day(date(2015, 1, 1)));
        assert_eq!(values, vec![1, 11, 2, 3]);
        assert!(dir.path().join("cpu/2015/1/1/0").is_file());
        assert!(dir.path().join("cpu/2015/1/1/2").is_file());
    }

    #[test]
    fn test_write_rejects_missing_timestamp() {
        let dir = tempdir().unwrap();
        let mut bucket = open_bucket(dir.path(), 2);
        let document = json!({"value": 1}).as_object().cloned().unwrap();
        assert!(matches!(bucket.write(document), Err(Error::InvalidTimestamp(_))));
    }

    #[test]
    fn test_read_boundaries() {
        let dir = tempdir().unwrap();
        let mut bucket = open_bucket(dir.path(), 5);
        bucket.write(doc("2015-01-01T10:00:00Z", 1)).unwrap();
        bucket.write(doc("2015-01-01T10:01:00Z", 2)).unwrap();

        let t = |h, m| Utc.with_ymd_and_hms(2015, 1, 1, h, m, 0).unwrap();
        let first_minute = Interval::new(t(10, 0), t(10, 1)).unwrap();
        assert_eq!(read_values(&mut bucket, &first_minute), vec![1]);
        let empty = Interval::new(t(9, 0), t(9, 1)).unwrap();
        assert!(read_values(&mut bucket, &empty).is_empty());
    }

    #[test]
    fn test_compress_then_read_is_identical() {
        let dir = tempdir().unwrap();
        let mut bucket = open_bucket(dir.path(), 5);
        for (minute, value) in [(0, 1), (5, 2), (61, 3), (1439, 4)] {
            let ts = minute_timestamp(date(2015, 1, 1), minute);
            bucket.write(doc(&ts.to_rfc3339(), value)).unwrap();
        }
        let before = read_values(&mut bucket, &whole_day(date(2015, 1, 1)));

        assert!(bucket.compress(date(2015, 1, 1)).unwrap());
        assert!(dir.path().join("cpu/2015/1/1.day").is_file());
        assert!(!dir.path().join("cpu/2015/1/1").exists());
        assert!(!dir.path().join("cpu/2015/1/1.day-tmp").exists());

        // Second compress is a no-op
        assert!(!bucket.compress(date(2015, 1, 1)).unwrap());

        let after = read_values(&mut bucket, &whole_day(date(2015, 1, 1)));
        assert_eq!(before, after);
        assert_eq!(after, vec![1, 2, 3, 4]);
    }

    #[test]
    fn test_read_partial_day_from_day_file() {
        let dir = tempdir().unwrap();
        let mut bucket = open_bucket(dir.path(), 5);
        for minute in 0..10 {
            let ts = minute_timestamp(date(2015, 1, 1), minute);
            bucket.write(doc(&ts.to_rfc3339(), i64::from(minute))).unwrap();
        }
        bucket.compress(date(2015, 1, 1)).unwrap();

        let interval = Interval::new(
            minute_timestamp(date(2015, 1, 1), 3),
            minute_timestamp(date(2015, 1, 1), 6),
        )
        .unwrap();
        assert_eq!(read_values(&mut bucket, &interval), vec![3, 4, 5]);
    }

    #[test]
    fn test_write_into_compact_day_expands_it() {
        let dir = tempdir().unwrap();
        let mut bucket = open_bucket(dir.path(), 5);
        bucket.write(doc("2015-01-01T00:00:00Z", 1)).unwrap();
        bucket.write(doc("2015-01-01T00:03:00Z", 3)).unwrap();
        bucket.compress(date(2015, 1, 1)).unwrap();

        bucket.write(doc("2015-01-01T00:01:00Z", 2)).unwrap();
        assert!(!dir.path().join("cpu/2015/1/1.day").exists());
        assert!(dir.path().join("cpu/2015/1/1").is_dir());
        assert!(!dir.path().join("cpu/2015/1/1-tmp").exists());

        let values = read_values(&mut bucket, &whole_day(date(2015, 1, 1)));
        assert_eq!(values, vec![1, 2, 3]);
    }

    #[test]
    fn test_exactly_one_representation_per_day() {
        let dir = tempdir().unwrap();
        let mut bucket = open_bucket(dir.path(), 1);
        let layout = bucket.layout().clone();
        let day = date(2015, 6, 1);
        let check = |layout: &PathLayout| {
            assert!(layout.day_file(day).is_file() != layout.day_dir(day).is_dir());
        };
        bucket.write(doc("2015-06-01T12:00:00Z", 1)).unwrap();
        check(&layout);
        bucket.compress(day).unwrap();
        check(&layout);
        bucket.write(doc("2015-06-01T12:30:00Z", 2)).unwrap();
        check(&layout);
        bucket.compress(day).unwrap();
        check(&layout);
    }

    #[test]
    fn test_compress_all_and_delete_all_respect_cutoff() {
        let dir = tempdir().unwrap();
        let mut bucket = open_bucket(dir.path(), 5);
        for day in 1..=4 {
            bucket
                .write(doc(&format!("2015-01-0{day}T08:00:00Z"), i64::from(day)))
                .unwrap();
        }
        assert_eq!(bucket.compress_all(date(2015, 1, 3)).unwrap(), 2);
        assert!(dir.path().join("cpu/2015/1/1.day").is_file());
        assert!(dir.path().join("cpu/2015/1/2.day").is_file());
        assert!(dir.path().join("cpu/2015/1/3").is_dir());

        assert_eq!(bucket.delete_all(date(2015, 1, 4)).unwrap(), 3);
        assert_eq!(bucket.layout().days().unwrap(), vec![date(2015, 1, 4)]);

        let all = Interval::new(
            Utc.with_ymd_and_hms(2015, 1, 1, 0, 0, 0).unwrap(),
            Utc.with_ymd_and_hms(2015, 1, 5, 0, 0, 0).unwrap(),
        )
        .unwrap();
        assert_eq!(read_values(&mut bucket, &all), vec![4]);
    }

    #[test]
    fn test_delete_closes_open_writers() {
        let dir = tempdir().unwrap();
        let mut bucket = open_bucket(dir.path(), 5);
        bucket.write(doc("2015-01-01T08:00:00Z", 1)).unwrap();
        assert_eq!(bucket.writers().len(), 1);
        assert!(bucket.delete(date(2015, 1, 1)).unwrap());
        assert!(bucket.writers().is_empty());
        assert!(!bucket.delete(date(2015, 1, 1)).unwrap());
    }

    #[test]
    fn test_sink_can_stop_read() {
        let dir = tempdir().unwrap();
        let mut bucket = open_bucket(dir.path(), 5);
        for minute in 0..5 {
            let ts = minute_timestamp(date(2015, 1, 1), minute);
            bucket.write(doc(&ts.to_rfc3339(), i64::from(minute))).unwrap();
        }
        let mut seen = Vec::new();
        let status = bucket
            .read(&whole_day(date(2015, 1, 1)), &mut |m| {
                seen.push(m.document["value"].as_i64().unwrap());
                seen.len() < 2
            })
            .unwrap();
        assert!(status.stopped);
        assert_eq!(seen, vec![0, 1]);
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_failed_eviction_close_does_not_fail_write() {
        let dir = tempdir().unwrap();
        let mut bucket = open_bucket(dir.path(), 1);
        let mut full = SegmentWriter::append(Path::new("/dev/full")).unwrap();
        full.write(&doc("2015-01-01T00:00:00Z", 0)).unwrap();
        assert!(bucket.writers.put(full).is_empty());

        let stored = bucket.write(doc("2015-01-01T00:01:00Z", 1)).unwrap();
        assert_eq!(stored.document["value"], 1);
        assert!(!bucket.writers().contains(Path::new("/dev/full")));
        assert_eq!(read_values(&mut bucket, &whole_day(date(2015, 1, 1))), vec![1]);
    }

    #[test]
    fn test_expand_clears_leftover_staging() {
        let dir = tempdir().unwrap();
        let mut bucket = open_bucket(dir.path(), 5);
        let day = date(2015, 1, 1);
        bucket.write(doc("2015-01-01T00:00:00Z", 1)).unwrap();
        bucket.compress(day).unwrap();

        // Staging output of interrupted transitions
        let tmp_dir = bucket.layout().tmp_day_dir(day);
        fs::create_dir_all(&tmp_dir).unwrap();
        fs::write(tmp_dir.join("5"), b"partial").unwrap();
        fs::write(bucket.layout().tmp_day_file(day), b"partial").unwrap();
        assert_eq!(bucket.layout().days().unwrap(), vec![day]);

        bucket.write(doc("2015-01-01T00:02:00Z", 2)).unwrap();
        assert!(!tmp_dir.exists());
        assert_eq!(read_values(&mut bucket, &whole_day(day)), vec![1, 2]);

        assert!(bucket.compress(day).unwrap());
        assert!(!bucket.layout().tmp_day_file(day).exists());
        assert_eq!(read_values(&mut bucket, &whole_day(day)), vec![1, 2]);
    }

    /// Leaves both representations of `day`, as an interrupted expand would
    fn both_representations(bucket: &mut FilesystemBucket, day: NaiveDate) {
        let day_file = bucket.layout().day_file(day);
        let saved = fs::read(&day_file).unwrap();
        bucket.expand(day).unwrap();
        fs::write(&day_file, saved).unwrap();
        assert!(bucket.layout().day_dir(day).is_dir());
    }

    #[test]
    fn test_expand_replaces_stale_day_dir() {
        let dir = tempdir().unwrap();
        let mut bucket = open_bucket(dir.path(), 5);
        let day = date(2015, 1, 1);
        bucket.write(doc("2015-01-01T00:00:00Z", 1)).unwrap();
        bucket.write(doc("2015-01-01T00:03:00Z", 3)).unwrap();
        bucket.compress(day).unwrap();
        both_representations(&mut bucket, day);

        bucket.write(doc("2015-01-01T00:01:00Z", 2)).unwrap();
        assert!(!bucket.layout().day_file(day).exists());
        assert!(bucket.layout().day_dir(day).is_dir());
        assert_eq!(read_values(&mut bucket, &whole_day(day)), vec![1, 2, 3]);
    }

    #[test]
    fn test_compress_removes_stale_day_dir() {
        let dir = tempdir().unwrap();
        let mut bucket = open_bucket(dir.path(), 5);
        let day = date(2015, 1, 1);
        bucket.write(doc("2015-01-01T00:00:00Z", 1)).unwrap();
        bucket.write(doc("2015-01-01T00:03:00Z", 3)).unwrap();
        bucket.compress(day).unwrap();
        both_representations(&mut bucket, day);

        assert!(!bucket.compress(day).unwrap());
        assert!(bucket.layout().day_file(day).is_file());
        assert!(!bucket.layout().day_dir(day).exists());
        assert_eq!(read_values(&mut bucket, &whole_day(day)), vec![1, 3]);
    }

    #[test]
    fn test_writer_eviction_keeps_data() {
        let dir = tempdir().unwrap();
        let mut bucket = open_bucket(dir.path(), 1);
        bucket.write(doc("2015-01-01T00:00:00Z", 1)).unwrap();
        bucket.write(doc("2015-01-01T00:01:00Z", 2)).unwrap();
        bucket.write(doc("2015-01-01T00:00:30Z", 3)).unwrap();
        assert_eq!(bucket.writers().len(), 1);
        let values = read_values(&mut bucket, &whole_day(date(2015, 1, 1)));
        assert_eq!(values, vec![1, 3, 2]);
    }
}
