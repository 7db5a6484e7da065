//! Types related to source files.
//!
//! Schema sources are compiled as one buffer: every loaded file is appended
//! to the buffer followed by a blank line, and tokens record byte ranges into
//! that combined buffer. The [`SourceMap`] attributes those ranges back to the
//! file they came from when diagnostics are rendered.

use std::fmt;
use std::ops::Range;

use codespan_reporting::files::{Files as _, SimpleFiles};

/// Handles to files loaded into a [`SourceMap`].
pub type FileId = usize;

/// Byte offsets into the combined source buffer.
pub type BytePos = u32;

pub const MAX_SOURCE_LEN: usize = u32::MAX as usize;

/// Separator appended after every file in the combined buffer.
const FILE_SEPARATOR: &str = "\n\n";

/// Half-open byte ranges in the combined source buffer.
#[derive(Copy, Clone, PartialEq, Eq, Hash)]
pub struct ByteRange {
    start: BytePos,
    end: BytePos,
}

impl fmt::Debug for ByteRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ByteRange({}..{})", self.start, self.end)
    }
}

impl ByteRange {
    pub const fn new(start: BytePos, end: BytePos) -> Self {
        Self { start, end }
    }

    pub const fn start(&self) -> BytePos {
        self.start
    }

    pub const fn end(&self) -> BytePos {
        self.end
    }
}

impl From<ByteRange> for Range<usize> {
    fn from(range: ByteRange) -> Self {
        (range.start as usize)..(range.end as usize)
    }
}

/// A line and column in a named source file. Both are 1-indexed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Location {
    pub file: String,
    pub line: usize,
    pub column: usize,
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.file, self.line, self.column)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceTooBig {
    pub actual_len: usize,
}

/// The combined source buffer, and the table of file boundaries within it.
pub struct SourceMap {
    files: SimpleFiles<String, String>,
    buffer: String,
    /// Start offset of each file in `buffer`, in load order.
    starts: Vec<(BytePos, FileId)>,
}

impl SourceMap {
    pub fn new() -> SourceMap {
        SourceMap {
            files: SimpleFiles::new(),
            buffer: String::new(),
            starts: Vec::new(),
        }
    }

    /// Append a file to the combined buffer.
    pub fn add(&mut self, name: String, source: &str) -> Result<FileId, SourceTooBig> {
        let padded = format!("{source}{FILE_SEPARATOR}");
        let actual_len = self.buffer.len() + padded.len();
        if actual_len > MAX_SOURCE_LEN {
            return Err(SourceTooBig { actual_len });
        }

        let start = self.buffer.len() as BytePos;
        self.buffer.push_str(&padded);
        let file_id = self.files.add(name, padded);
        self.starts.push((start, file_id));

        Ok(file_id)
    }

    /// The concatenation of every loaded file.
    pub fn buffer(&self) -> &str {
        &self.buffer
    }

    pub fn files(&self) -> &SimpleFiles<String, String> {
        &self.files
    }

    /// Attribute a range in the combined buffer to the file it originated
    /// from, returning the range relative to the start of that file.
    pub fn locate(&self, range: ByteRange) -> Option<(FileId, Range<usize>)> {
        let index = self
            .starts
            .partition_point(|(start, _)| *start <= range.start())
            .checked_sub(1)?;
        let (file_start, file_id) = self.starts[index];
        let file_len = self.files.get(file_id).ok()?.source().len();

        let start = (range.start() - file_start) as usize;
        let end = ((range.end() - file_start) as usize).min(file_len);
        Some((file_id, start..end.max(start)))
    }

    /// Resolve an offset in the combined buffer to a file, line and column.
    pub fn quote(&self, pos: BytePos) -> Option<Location> {
        let (file_id, range) = self.locate(ByteRange::new(pos, pos))?;
        let location = self.files.location(file_id, range.start).ok()?;

        Some(Location {
            file: self.files.name(file_id).ok()?,
            line: location.line_number,
            column: location.column_number,
        })
    }
}

impl Default for SourceMap {
    fn default() -> Self {
        Self::new()
    }
}
