//! Fuzz target: `LineReader::feed`
//!
//! Drives arbitrary serial bytes into the line assembler and asserts that
//! it never panics and never yields an empty or oversized line.
//!
//! cargo fuzz run fuzz_line_reader

#![no_main]

use cellmodem::at::line::{Line, LineReader, MAX_LINE_LEN};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let mut reader = LineReader::new();
    // Alternate the prompt arming on the first byte so both paths run.
    reader.expect_prompt(data.first().is_some_and(|b| b & 1 == 1));

    for line in reader.feed(data) {
        if let Line::Text(text) = line {
            assert!(!text.is_empty(), "reader must not yield empty lines");
            assert!(text.chars().count() <= MAX_LINE_LEN, "line exceeds MAX_LINE_LEN");
        }
    }

    // After a reset the reader must accept bytes cleanly again.
    reader.reset();
    let _ = reader.feed(data);
});
