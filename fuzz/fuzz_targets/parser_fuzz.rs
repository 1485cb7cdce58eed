//! Parser fuzz target: arbitrary bytes through parse, validate and convert.
//! Nothing may panic; invalid UTF-8 must come back as an encoding error.
//! Build with: cargo fuzz run parser_fuzz (requires nightly and cargo fuzz).

#![cfg_attr(fuzzing, no_main)]

#[cfg(fuzzing)]
use libfuzzer_sys::fuzz_target;

#[cfg(fuzzing)]
fuzz_target!(|data: &[u8]| {
    let parser = match ludco::Parser::with_options(
        ludco::ParseOptions::default().with_max_expressions(1_000_000),
    ) {
        Ok(p) => p,
        Err(_) => return,
    };
    if let Ok(packages) = parser.parse_bytes(data) {
        for package in &packages {
            if ludco::validate(package).is_empty() {
                let _ = ludco::convert(package);
            }
        }
    }
});

#[cfg(not(fuzzing))]
fn main() {
    eprintln!("Build with: cargo fuzz run parser_fuzz");
}
