pub mod config;
pub mod enumerate;
pub mod ftp;
pub mod migrate;
pub mod replay;
pub mod scores;
pub mod store;
