//! Single-byte delimiter splitter.

use super::{Split, Splitter};
use crate::types::Result;

/// Splits on a single delimiter byte, newline by default. The delimiter is
/// stripped from the payload unless `keep_delimiter` is set.
#[derive(Debug, Clone)]
pub struct TokenSplitter {
    delimiter: u8,
    keep_delimiter: bool,
}

impl TokenSplitter {
    pub fn new(delimiter: u8) -> Self {
        Self {
            delimiter,
            keep_delimiter: false,
        }
    }

    pub fn keep_delimiter(mut self, keep: bool) -> Self {
        self.keep_delimiter = keep;
        self
    }
}

impl Default for TokenSplitter {
    fn default() -> Self {
        Self::new(b'\n')
    }
}

impl Splitter for TokenSplitter {
    fn find_record<'a>(&self, buf: &'a [u8]) -> Result<Split<'a>> {
        match buf.iter().position(|&b| b == self.delimiter) {
            Some(pos) => {
                let end = if self.keep_delimiter { pos + 1 } else { pos };
                Ok(Split::record(pos + 1, &buf[..end]))
            }
            None => Ok(Split::need_more(0)),
        }
    }
}
