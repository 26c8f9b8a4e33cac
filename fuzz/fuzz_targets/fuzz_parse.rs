#![no_main]

use libfuzzer_sys::fuzz_target;
use spinel_parser::{DebugLevel, DebugSink, ParseOptions};

struct Quiet;

impl DebugSink for Quiet {
    fn message(&self, _level: DebugLevel, _offset: usize, _message: &str) {}
}

fuzz_target!(|data: &[u8]| {
    // Arbitrary bytes must give an error, never a panic.
    let options = ParseOptions {
        debug_sink: &Quiet,
        ..ParseOptions::default()
    };
    if let Ok(shader) = spinel_parser::parse(data, &options) {
        let _ = spinel_ir::validate(&shader);
    }
});
