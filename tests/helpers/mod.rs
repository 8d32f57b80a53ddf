#![allow(dead_code)]

pub mod test_data_builder;
