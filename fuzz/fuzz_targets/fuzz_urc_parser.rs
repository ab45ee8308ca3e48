//! Fuzz target: `UrcParser::parse`
//!
//! Splits arbitrary bytes into lines the way the service does and feeds
//! every line to one parser, so half-received `+CMT:` pairs are exercised
//! too.  The parser must never panic.
//!
//! cargo fuzz run fuzz_urc_parser

#![no_main]

use cellmodem::at::line::{Line, LineReader};
use cellmodem::at::urc::{Parsed, UrcParser};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let mut reader = LineReader::new();
    let mut parser = UrcParser::new();
    let mut dropped = 0u32;

    for line in reader.feed(data) {
        if let Line::Text(text) = line {
            if parser.parse(&text) == Parsed::Unrecognized {
                dropped += 1;
            }
        }
    }

    assert!(parser.malformed() <= dropped, "malformed lines are a subset of dropped ones");
});
