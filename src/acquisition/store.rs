//! Fixed-capacity sample table.
//!
//! A session collects exactly [`CAPACITY`] frames of [`CHANNELS`] readings. Cells start
//! out unwritten (`None`) and only a store with every cell written can be turned into a
//! [`SampleTable`] for analysis.

use crate::error::{AppResult, DaqError};
use serde::{Deserialize, Serialize};

/// Number of probe channels.
pub const CHANNELS: usize = 5;

/// Number of frames in one acquisition.
pub const CAPACITY: usize = 20;

/// One validated line: five readings in channel order.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SampleFrame {
    /// Readings for channels 1..=5
    pub values: [f64; CHANNELS],
}

impl SampleFrame {
    /// Parse a frame from `"v1 v2 v3 v4 v5"`.
    ///
    /// The line is trimmed and split on single spaces; exactly five tokens are required
    /// and every token must parse as a finite number.
    pub fn parse(line: &str) -> AppResult<Self> {
        let trimmed = line.trim();
        let tokens: Vec<&str> = trimmed.split(' ').collect();
        if tokens.len() != CHANNELS {
            return Err(malformed(
                trimmed,
                format!("expected {CHANNELS} values, found {}", tokens.len()),
            ));
        }

        let mut values = [0.0; CHANNELS];
        for (slot, token) in values.iter_mut().zip(&tokens) {
            let value: f64 = token
                .parse()
                .map_err(|_| malformed(trimmed, format!("'{token}' is not a number")))?;
            if !value.is_finite() {
                return Err(malformed(trimmed, format!("'{token}' is not finite")));
            }
            *slot = value;
        }

        Ok(Self { values })
    }
}

fn malformed(line: &str, reason: String) -> DaqError {
    DaqError::MalformedFrame {
        line: line.to_string(),
        reason,
    }
}

/// Fill state of one acquisition.
///
/// The cursor only moves forward while a session is collecting; [`SampleStore::reset`]
/// is the only way back to zero.
#[derive(Debug, Clone, PartialEq)]
pub struct SampleStore {
    cells: [[Option<f64>; CHANNELS]; CAPACITY],
    count: usize,
}

impl Default for SampleStore {
    fn default() -> Self {
        Self::new()
    }
}

impl SampleStore {
    /// Empty store, every cell unwritten.
    pub fn new() -> Self {
        Self {
            cells: [[None; CHANNELS]; CAPACITY],
            count: 0,
        }
    }

    /// Clear every cell and rewind the cursor.
    pub fn reset(&mut self) {
        *self = Self::new();
    }

    /// Number of frames written so far.
    pub fn len(&self) -> usize {
        self.count
    }

    /// True when no frame has been written.
    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// True when the cursor has reached [`CAPACITY`].
    pub fn is_full(&self) -> bool {
        self.count == CAPACITY
    }

    /// Number of written cells.
    pub fn filled_cells(&self) -> usize {
        self.cells.iter().flatten().filter(|c| c.is_some()).count()
    }

    /// Write `frame` at the cursor and return its 1-based position.
    ///
    /// Fails with [`DaqError::BufferOverflow`] when the store is already full; the
    /// store is left untouched in that case.
    pub fn push(&mut self, frame: SampleFrame, line: &str) -> AppResult<usize> {
        if self.is_full() {
            return Err(self.overflow(line));
        }
        for (cell, value) in self.cells[self.count].iter_mut().zip(frame.values) {
            *cell = Some(value);
        }
        self.count += 1;
        Ok(self.count)
    }

    /// Validate `line` and write it at the cursor.
    ///
    /// Capacity is checked first: any line arriving at a full store is an overflow,
    /// malformed or not.
    pub fn push_line(&mut self, line: &str) -> AppResult<usize> {
        if self.is_full() {
            return Err(self.overflow(line));
        }
        let frame = SampleFrame::parse(line)?;
        self.push(frame, line)
    }

    fn overflow(&self, line: &str) -> DaqError {
        DaqError::BufferOverflow {
            capacity: CAPACITY,
            line: line.trim().to_string(),
        }
    }

    /// Hand the store over for analysis.
    ///
    /// Any unwritten cell makes this fail with [`DaqError::IncompleteAcquisition`];
    /// missing readings are never zero-filled.
    pub fn finalize(&self) -> AppResult<SampleTable> {
        let mut rows = [[0.0; CHANNELS]; CAPACITY];
        for (row, cells) in rows.iter_mut().zip(&self.cells) {
            for (value, cell) in row.iter_mut().zip(cells) {
                match cell {
                    Some(v) => *value = *v,
                    None => {
                        return Err(DaqError::IncompleteAcquisition {
                            filled: self.filled_cells(),
                            expected: CAPACITY * CHANNELS,
                        })
                    }
                }
            }
        }
        Ok(SampleTable { rows })
    }
}

/// A complete 20×5 acquisition, detached from the session that collected it.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SampleTable {
    rows: [[f64; CHANNELS]; CAPACITY],
}

impl SampleTable {
    /// Build a table from frames in arrival order.
    pub fn from_rows(rows: [[f64; CHANNELS]; CAPACITY]) -> Self {
        Self { rows }
    }

    /// Frames in arrival order.
    pub fn rows(&self) -> &[[f64; CHANNELS]; CAPACITY] {
        &self.rows
    }

    /// All readings of one channel, `channel` being 0-based.
    pub fn channel(&self, channel: usize) -> [f64; CAPACITY] {
        let mut series = [0.0; CAPACITY];
        for (value, row) in series.iter_mut().zip(&self.rows) {
            *value = row[channel];
        }
        series
    }

    /// Per-channel series, indexed by 0-based channel.
    pub fn channels(&self) -> [[f64; CAPACITY]; CHANNELS] {
        std::array::from_fn(|c| self.channel(c))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn line(i: usize) -> String {
        format!("{}.0 2.0 3.0 4.0 5.0", i + 1)
    }

    #[test]
    fn parses_five_numeric_tokens() {
        let frame = SampleFrame::parse("  1.5 -2 3e2 4.25 0\r").unwrap();
        assert_eq!(frame.values, [1.5, -2.0, 300.0, 4.25, 0.0]);
    }

    #[test]
    fn rejects_wrong_token_count() {
        let err = SampleFrame::parse("1 2 3 4").unwrap_err();
        assert!(matches!(err, DaqError::MalformedFrame { .. }));
        assert!(SampleFrame::parse("1 2 3 4 5 6").is_err());
    }

    #[test]
    fn rejects_double_spaces_and_non_numbers() {
        // Single-space split: an empty token is not a number
        assert!(SampleFrame::parse("1  2 3 4 5").is_err());
        assert!(SampleFrame::parse("1 2 x 4 5").is_err());
        assert!(SampleFrame::parse("1 2 NaN 4 5").is_err());
        assert!(SampleFrame::parse("1 2 inf 4 5").is_err());
    }

    #[test]
    fn cursor_advances_only_on_valid_lines() {
        let mut store = SampleStore::new();
        assert_eq!(store.push_line(&line(0)).unwrap(), 1);
        assert!(store.push_line("1 2 3 4").is_err());
        assert_eq!(store.len(), 1);
        assert_eq!(store.push_line(&line(1)).unwrap(), 2);
    }

    #[test]
    fn overflow_leaves_store_untouched() {
        let mut store = SampleStore::new();
        for i in 0..CAPACITY {
            store.push_line(&line(i)).unwrap();
        }
        let before = store.clone();

        let err = store.push_line("99 99 99 99 99").unwrap_err();
        assert!(matches!(err, DaqError::BufferOverflow { capacity: 20, .. }));
        assert_eq!(store, before);
    }

    #[test]
    fn malformed_line_into_full_store_is_overflow() {
        let mut store = SampleStore::new();
        for i in 0..CAPACITY {
            store.push_line(&line(i)).unwrap();
        }
        match store.push_line("1 2 3 4") {
            Err(DaqError::BufferOverflow { capacity, line }) => {
                assert_eq!(capacity, CAPACITY);
                assert_eq!(line, "1 2 3 4");
            }
            other => panic!("unexpected result: {other:?}"),
        }
        assert_eq!(store.len(), CAPACITY);
    }

    #[test]
    fn finalize_requires_every_cell() {
        let mut store = SampleStore::new();
        for i in 0..CAPACITY - 1 {
            store.push_line(&line(i)).unwrap();
        }
        match store.finalize() {
            Err(DaqError::IncompleteAcquisition { filled, expected }) => {
                assert_eq!(filled, 95);
                assert_eq!(expected, 100);
            }
            other => panic!("unexpected result: {other:?}"),
        }

        store.push_line(&line(CAPACITY - 1)).unwrap();
        let table = store.finalize().unwrap();
        assert_eq!(table.channel(0)[19], 20.0);
        assert_eq!(table.channel(4), [5.0; CAPACITY]);
    }

    #[test]
    fn reset_clears_cells() {
        let mut store = SampleStore::new();
        store.push_line(&line(0)).unwrap();
        store.reset();
        assert!(store.is_empty());
        assert_eq!(store.filled_cells(), 0);
    }
}
