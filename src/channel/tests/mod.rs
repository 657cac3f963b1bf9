mod helpers;

mod basic_tests;
mod bracket_tests;
mod driver_tests;
mod provide_tests;
