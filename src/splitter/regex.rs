//! Regex delimiter splitter.

use super::{Split, Splitter};
use crate::types::{Error, Result};

/// Splits on a regex delimiter.
///
/// With `capture_at_start` unset, the delimiter terminates a record: the
/// payload is everything before the match and the match itself is consumed.
/// With it set, the delimiter *begins* a record (e.g. a timestamp at the
/// start of each log line): a record spans from one match to the next, and
/// bytes before the first match are discarded as a partial head.
#[derive(Debug)]
pub struct RegexSplitter {
    delimiter: regex::bytes::Regex,
    capture_at_start: bool,
}

impl RegexSplitter {
    pub fn new(pattern: &str, capture_at_start: bool) -> Result<Self> {
        let delimiter = regex::bytes::Regex::new(pattern)
            .map_err(|e| Error::config(format!("bad splitter regex '{pattern}': {e}")))?;
        Ok(Self {
            delimiter,
            capture_at_start,
        })
    }
}

impl Splitter for RegexSplitter {
    fn find_record<'a>(&self, buf: &'a [u8]) -> Result<Split<'a>> {
        if self.capture_at_start {
            let Some(first) = self.delimiter.find(buf) else {
                return Ok(Split::need_more(0));
            };
            if first.start() > 0 {
                // Partial head from before the first record boundary.
                return Ok(Split::skip(first.start()));
            }
            match self
                .delimiter
                .find_at(buf, first.end().max(first.start() + 1))
            {
                Some(next) => Ok(Split::record(next.start(), &buf[..next.start()])),
                None => Ok(Split::need_more(0)),
            }
        } else {
            match self.delimiter.find(buf) {
                Some(m) => Ok(Split::record(m.end(), &buf[..m.start()])),
                None => Ok(Split::need_more(0)),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminating_delimiter_strips_match() {
        let splitter = RegexSplitter::new(r"\r?\n", false).unwrap();
        let split = splitter.find_record(b"line one\r\nline two\n").unwrap();
        assert_eq!(split.payload, Some(&b"line one"[..]));
        assert_eq!(split.consumed, 10);
    }

    #[test]
    fn capture_at_start_spans_between_matches() {
        let splitter = RegexSplitter::new(r"\d{4}-", true).unwrap();
        let buf = b"2024-first entry 2025-second";
        let split = splitter.find_record(buf).unwrap();
        assert_eq!(split.payload, Some(&b"2024-first entry "[..]));
        assert_eq!(split.consumed, 17);
    }

    #[test]
    fn capture_at_start_discards_partial_head() {
        let splitter = RegexSplitter::new(r"\d{4}-", true).unwrap();
        let split = splitter.find_record(b"tail of old 2024-entry").unwrap();
        assert_eq!(split.consumed, 12);
        assert!(split.payload.is_none());
    }

    #[test]
    fn needs_more_until_second_boundary() {
        let splitter = RegexSplitter::new(r"\d{4}-", true).unwrap();
        let split = splitter.find_record(b"2024-only one entry").unwrap();
        assert_eq!(split.consumed, 0);
        assert!(split.payload.is_none());
    }

    #[test]
    fn bad_pattern_is_a_config_error() {
        assert!(RegexSplitter::new("([unclosed", false).is_err());
    }
}
