mod common;
mod local_provider_tests;
mod resume_tests;
mod scenario_tests;
