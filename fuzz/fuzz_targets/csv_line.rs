#![no_main]

use libfuzzer_sys::fuzz_target;
use tickprof::csv_parser::{join_fields, parse_line};

fuzz_target!(|data: &[u8]| {
    if let Ok(input) = std::str::from_utf8(data) {
        // Malformed escapes must surface as errors, never as panics
        if let Ok(fields) = parse_line(input) {
            if fields.len() == 1 && fields[0].is_empty() {
                return;
            }
            let rejoined = join_fields(&fields);
            assert_eq!(parse_line(&rejoined).ok(), Some(fields));
        }
    }
});
