// lib.rs - Incremental re-parsing core for a C/C++ source model.
//
// Everything lives under `reparse`; the parser itself is supplied by the
// embedding application through `reparse::Parser`.

pub mod reparse;
// test_utils is available in test builds and when the `test-support` feature is enabled.
// This allows benchmarks and integration tests to import directly instead of #[path] hacks.
#[cfg(any(test, feature = "test-support"))]
pub mod test_utils;
