pub mod db;
pub mod process;
