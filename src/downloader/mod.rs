pub mod http_downloader;
pub mod instance_state;
pub mod monitor;
pub mod sink;
pub mod worker;
