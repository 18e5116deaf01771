//! Growable per-channel line buffer.
//!
//! Uses index-based separation, like a packet buffer:
//! - HeapRb stores lightweight metadata (line number + slab key), oldest first
//! - Slab stores the actual line samples
//!
//! Lines are never evicted. When a channel reaches `capacity` the ring is
//! rebuilt at twice the size, moving only the metadata.

use std::collections::BTreeMap;
use std::fmt;

use nalgebra::DMatrix;
use ringbuf::{traits::*, HeapRb};
use slab::Slab;
use thiserror::Error;

/// Buffer misuse. The engine maps these onto device errors.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum BufferError {
    #[error("unknown channel {0}")]
    UnknownChannel(String),

    #[error("line for channel {channel} has {actual} bins, expected {expected}")]
    LengthMismatch {
        channel: String,
        expected: usize,
        actual: usize,
    },

    #[error("line ring for channel {0} has no free slot")]
    RingFull(String),
}

impl From<BufferError> for contracts::ContractError {
    fn from(err: BufferError) -> Self {
        contracts::ContractError::Other(err.to_string())
    }
}

/// Capacity change caused by a push
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Growth {
    pub from: usize,
    pub to: usize,
}

#[derive(Debug, Clone, Copy)]
struct LineMeta {
    /// 1-based line number since the last clear
    number: u64,
    slab_key: usize,
}

struct ChannelLines {
    index: HeapRb<LineMeta>,
    storage: Slab<Box<[f64]>>,
}

impl ChannelLines {
    fn new(capacity: usize) -> Self {
        Self {
            index: HeapRb::new(capacity),
            storage: Slab::with_capacity(capacity),
        }
    }

    #[inline]
    fn len(&self) -> usize {
        self.index.occupied_len()
    }

    /// Rebuild the ring at `capacity`, keeping line order
    fn regrow(&mut self, capacity: usize) {
        let metas: Vec<LineMeta> = self.index.pop_iter().collect();
        let mut index = HeapRb::new(capacity);
        index.push_iter(metas.into_iter());
        self.index = index;
        self.storage.reserve(capacity - self.storage.len());
    }

    /// Lines, newest first
    fn newest_first(&self) -> impl Iterator<Item = (u64, &[f64])> + '_ {
        let (head, tail) = self.index.as_slices();
        tail.iter()
            .rev()
            .chain(head.iter().rev())
            .map(|meta| (meta.number, &*self.storage[meta.slab_key]))
    }
}

/// Multi-channel store of reduced lines
pub struct FrameBuffer {
    bins: usize,
    initial_capacity: usize,
    capacity: usize,
    channels: BTreeMap<String, ChannelLines>,
}

impl fmt::Debug for FrameBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FrameBuffer")
            .field("bins", &self.bins)
            .field("capacity", &self.capacity)
            .field("elapsed_lines", &self.elapsed_lines())
            .field("channels", &self.channels.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl FrameBuffer {
    /// Create an empty buffer with `bins` values per line.
    ///
    /// A capacity of zero is raised to one line.
    pub fn new<I, C>(channels: I, bins: usize, capacity: usize) -> Self
    where
        I: IntoIterator<Item = C>,
        C: Into<String>,
    {
        let capacity = capacity.max(1);
        Self {
            bins,
            initial_capacity: capacity,
            capacity,
            channels: channels
                .into_iter()
                .map(|c| (c.into(), ChannelLines::new(capacity)))
                .collect(),
        }
    }

    #[inline]
    pub fn bins(&self) -> usize {
        self.bins
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn channels(&self) -> impl Iterator<Item = &str> {
        self.channels.keys().map(String::as_str)
    }

    /// Lines stored for the most advanced channel
    #[inline]
    pub fn elapsed_lines(&self) -> usize {
        self.channels.values().map(ChannelLines::len).max().unwrap_or(0)
    }

    /// Append one line to `channel` as the newest line.
    ///
    /// Doubles the capacity of every channel when `channel` is full and
    /// reports the change.
    pub fn push_line(
        &mut self,
        channel: &str,
        samples: &[f64],
    ) -> Result<Option<Growth>, BufferError> {
        let stored = self
            .channels
            .get(channel)
            .ok_or_else(|| BufferError::UnknownChannel(channel.to_string()))?
            .len();
        if samples.len() != self.bins {
            return Err(BufferError::LengthMismatch {
                channel: channel.to_string(),
                expected: self.bins,
                actual: samples.len(),
            });
        }

        let growth = (stored >= self.capacity).then(|| self.grow());

        let lines = self
            .channels
            .get_mut(channel)
            .ok_or_else(|| BufferError::UnknownChannel(channel.to_string()))?;
        let slab_key = lines.storage.insert(samples.into());
        let meta = LineMeta {
            number: stored as u64 + 1,
            slab_key,
        };
        if let Err(meta) = lines.index.try_push(meta) {
            lines.storage.remove(meta.slab_key);
            return Err(BufferError::RingFull(channel.to_string()));
        }
        Ok(growth)
    }

    /// Append one line to several channels at once.
    ///
    /// Every line is checked before any is stored, so a rejected call leaves
    /// all channels at the same line count.
    pub fn push_lines<'a, I>(&mut self, lines: I) -> Result<Option<Growth>, BufferError>
    where
        I: IntoIterator<Item = (&'a str, &'a [f64])>,
    {
        let lines: Vec<(&str, &[f64])> = lines.into_iter().collect();
        for (channel, samples) in &lines {
            if !self.channels.contains_key(*channel) {
                return Err(BufferError::UnknownChannel(channel.to_string()));
            }
            if samples.len() != self.bins {
                return Err(BufferError::LengthMismatch {
                    channel: channel.to_string(),
                    expected: self.bins,
                    actual: samples.len(),
                });
            }
        }

        let mut growth = None;
        for (channel, samples) in lines {
            growth = growth.or(self.push_line(channel, samples)?);
        }
        Ok(growth)
    }

    fn grow(&mut self) -> Growth {
        let from = self.capacity;
        let to = from.saturating_mul(2);
        for lines in self.channels.values_mut() {
            lines.regrow(to);
        }
        self.capacity = to;
        Growth { from, to }
    }

    /// Per-bin mean of the newest `max_lines` lines (0 means all).
    ///
    /// NaN samples are ignored; a bin with no valid sample averages to 0.
    pub fn average(&self, channel: &str, max_lines: usize) -> Result<Vec<f64>, BufferError> {
        let lines = self
            .channels
            .get(channel)
            .ok_or_else(|| BufferError::UnknownChannel(channel.to_string()))?;
        let take = match max_lines {
            0 => lines.len(),
            n => n.min(lines.len()),
        };

        let mut sums = vec![0.0; self.bins];
        let mut counts = vec![0u32; self.bins];
        for (_, line) in lines.newest_first().take(take) {
            for ((sum, count), value) in sums.iter_mut().zip(counts.iter_mut()).zip(line) {
                if !value.is_nan() {
                    *sum += value;
                    *count += 1;
                }
            }
        }

        Ok(sums
            .into_iter()
            .zip(counts)
            .map(|(sum, count)| if count == 0 { 0.0 } else { sum / f64::from(count) })
            .collect())
    }

    /// Full storage as a `bins x capacity` matrix.
    ///
    /// Column 0 holds the newest line; unfilled columns are NaN.
    pub fn raw(&self, channel: &str) -> Result<DMatrix<f64>, BufferError> {
        let lines = self
            .channels
            .get(channel)
            .ok_or_else(|| BufferError::UnknownChannel(channel.to_string()))?;
        let mut matrix = DMatrix::from_element(self.bins, self.capacity, f64::NAN);
        for (col, (_, line)) in lines.newest_first().enumerate() {
            matrix.column_mut(col).copy_from_slice(line);
        }
        Ok(matrix)
    }

    /// Line numbers of `channel`, newest first
    pub fn line_numbers(&self, channel: &str) -> Vec<u64> {
        self.channels
            .get(channel)
            .map(|lines| lines.newest_first().map(|(n, _)| n).collect())
            .unwrap_or_default()
    }

    /// Drop every line and return to the initial capacity
    pub fn clear(&mut self) {
        self.capacity = self.initial_capacity;
        for lines in self.channels.values_mut() {
            *lines = ChannelLines::new(self.initial_capacity);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn buffer(bins: usize, capacity: usize) -> FrameBuffer {
        FrameBuffer::new(["APD", "PD"], bins, capacity)
    }

    #[test]
    fn test_average_of_all_lines() {
        let mut buf = buffer(3, 4);
        buf.push_line("APD", &[1.0, 2.0, 3.0]).unwrap();
        buf.push_line("APD", &[3.0, 4.0, 5.0]).unwrap();

        assert_eq!(buf.average("APD", 0).unwrap(), vec![2.0, 3.0, 4.0]);
        assert_eq!(buf.elapsed_lines(), 2);
    }

    #[test]
    fn test_average_limited_to_newest_lines() {
        let mut buf = buffer(1, 8);
        for v in [10.0, 20.0, 30.0, 40.0] {
            buf.push_line("APD", &[v]).unwrap();
        }

        assert_eq!(buf.average("APD", 2).unwrap(), vec![35.0]);
        assert_eq!(buf.average("APD", 1).unwrap(), vec![40.0]);
        // more than elapsed averages over what exists
        assert_eq!(buf.average("APD", 100).unwrap(), vec![25.0]);
    }

    #[test]
    fn test_empty_channel_averages_to_zero() {
        let buf = buffer(5, 2);
        assert_eq!(buf.average("PD", 0).unwrap(), vec![0.0; 5]);
    }

    #[test]
    fn test_nan_samples_ignored() {
        let mut buf = buffer(2, 4);
        buf.push_line("APD", &[1.0, f64::NAN]).unwrap();
        buf.push_line("APD", &[3.0, f64::NAN]).unwrap();

        assert_eq!(buf.average("APD", 0).unwrap(), vec![2.0, 0.0]);
    }

    #[test]
    fn test_capacity_doubles_when_full() {
        let mut buf = buffer(2, 2);
        assert_eq!(buf.push_line("APD", &[1.0, 1.0]).unwrap(), None);
        assert_eq!(buf.push_line("APD", &[2.0, 2.0]).unwrap(), None);
        assert_eq!(buf.capacity(), 2);

        let growth = buf.push_line("APD", &[3.0, 3.0]).unwrap();
        assert_eq!(growth, Some(Growth { from: 2, to: 4 }));
        assert_eq!(buf.capacity(), 4);
        assert_eq!(buf.elapsed_lines(), 3);
        assert_eq!(buf.line_numbers("APD"), vec![3, 2, 1]);
        assert_eq!(buf.average("APD", 0).unwrap(), vec![2.0, 2.0]);
    }

    #[test]
    fn test_growth_applies_to_all_channels() {
        let mut buf = buffer(1, 1);
        buf.push_line("APD", &[1.0]).unwrap();
        buf.push_line("PD", &[1.0]).unwrap();
        assert!(buf.push_line("APD", &[2.0]).unwrap().is_some());
        // PD already sits in the grown ring
        assert_eq!(buf.push_line("PD", &[2.0]).unwrap(), None);
        assert_eq!(buf.elapsed_lines(), 2);
    }

    #[test]
    fn test_elapsed_never_exceeds_capacity() {
        let mut buf = buffer(1, 1);
        for i in 0..100 {
            buf.push_line("APD", &[f64::from(i)]).unwrap();
            assert!(buf.elapsed_lines() <= buf.capacity());
        }
        assert_eq!(buf.capacity(), 128);
    }

    #[test]
    fn test_raw_is_newest_first_with_nan_padding() {
        let mut buf = buffer(2, 3);
        buf.push_line("APD", &[1.0, 2.0]).unwrap();
        buf.push_line("APD", &[3.0, 4.0]).unwrap();

        let raw = buf.raw("APD").unwrap();
        assert_eq!(raw.shape(), (2, 3));
        assert_eq!(raw[(0, 0)], 3.0);
        assert_eq!(raw[(1, 0)], 4.0);
        assert_eq!(raw[(0, 1)], 1.0);
        assert!(raw[(0, 2)].is_nan());
        assert!(buf.raw("PD").unwrap().iter().all(|v| v.is_nan()));
    }

    #[test]
    fn test_rejects_wrong_length_and_unknown_channel() {
        let mut buf = buffer(3, 2);
        assert_eq!(
            buf.push_line("APD", &[1.0]),
            Err(BufferError::LengthMismatch {
                channel: "APD".into(),
                expected: 3,
                actual: 1
            })
        );
        assert!(matches!(
            buf.push_line("nope", &[1.0, 2.0, 3.0]),
            Err(BufferError::UnknownChannel(_))
        ));
        assert_eq!(buf.elapsed_lines(), 0);
    }

    #[test]
    fn test_push_lines_is_all_or_nothing() {
        let mut buf = buffer(2, 4);
        let err = buf
            .push_lines([("APD", &[1.0, 2.0][..]), ("PD", &[1.0][..])])
            .unwrap_err();
        assert!(matches!(err, BufferError::LengthMismatch { .. }));
        assert_eq!(buf.line_numbers("APD"), Vec::<u64>::new());

        assert!(buf
            .push_lines([("APD", &[1.0, 2.0][..]), ("nope", &[1.0, 2.0][..])])
            .is_err());
        assert_eq!(buf.elapsed_lines(), 0);

        buf.push_lines([("APD", &[1.0, 2.0][..]), ("PD", &[3.0, 4.0][..])])
            .unwrap();
        assert_eq!(buf.line_numbers("APD"), vec![1]);
        assert_eq!(buf.line_numbers("PD"), vec![1]);
    }

    #[test]
    fn test_push_lines_reports_growth_once() {
        let mut buf = buffer(1, 1);
        buf.push_lines([("APD", &[1.0][..]), ("PD", &[1.0][..])]).unwrap();
        let growth = buf
            .push_lines([("APD", &[2.0][..]), ("PD", &[2.0][..])])
            .unwrap();
        assert_eq!(growth, Some(Growth { from: 1, to: 2 }));
        assert_eq!(buf.line_numbers("PD"), vec![2, 1]);
    }

    #[test]
    fn test_clear_resets_lines_and_capacity() {
        let mut buf = buffer(1, 1);
        for i in 0..5 {
            buf.push_line("APD", &[f64::from(i)]).unwrap();
        }
        buf.clear();

        assert_eq!(buf.elapsed_lines(), 0);
        assert_eq!(buf.capacity(), 1);
        assert_eq!(buf.average("APD", 0).unwrap(), vec![0.0]);
        buf.push_line("APD", &[7.0]).unwrap();
        assert_eq!(buf.line_numbers("APD"), vec![1]);
    }
}
