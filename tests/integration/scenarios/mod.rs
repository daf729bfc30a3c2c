pub mod client_subject_tests;
pub mod server_subject_tests;
pub mod suite_tests;
