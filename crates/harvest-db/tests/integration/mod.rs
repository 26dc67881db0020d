mod common;
mod job_store_tests;
mod result_tests;
