pub mod db;
pub mod progress;
