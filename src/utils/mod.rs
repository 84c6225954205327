pub mod parse_time;
