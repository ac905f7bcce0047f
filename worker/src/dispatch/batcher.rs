//! Size-triggered buffer of parsed jobs.

use crate::queue::ParsedJob;

/// Jobs collected since the last flush.
#[derive(Debug)]
pub struct Batcher {
    size: usize,
    buffer: Vec<ParsedJob>,
}

impl Batcher {
    pub fn new(size: usize) -> Self {
        let size = size.max(1);
        Self {
            size,
            buffer: Vec::with_capacity(size),
        }
    }

    /// Append a job; returns the full batch once `size` jobs are buffered.
    pub fn push(&mut self, job: ParsedJob) -> Option<Vec<ParsedJob>> {
        self.buffer.push(job);
        if self.buffer.len() >= self.size {
            self.flush()
        } else {
            None
        }
    }

    /// Detach whatever is buffered. An empty buffer yields nothing.
    pub fn flush(&mut self) -> Option<Vec<ParsedJob>> {
        if self.buffer.is_empty() {
            return None;
        }
        Some(std::mem::replace(
            &mut self.buffer,
            Vec::with_capacity(self.size),
        ))
    }

    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }
}
