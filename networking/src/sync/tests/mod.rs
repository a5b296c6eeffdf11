mod common;

mod monitor_tests;
