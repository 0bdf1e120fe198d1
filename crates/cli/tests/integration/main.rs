mod common;
mod gc_tests;
mod store_tests;
