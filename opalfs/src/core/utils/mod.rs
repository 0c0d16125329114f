pub mod path_utils;
pub mod time_utils;
