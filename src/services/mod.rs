pub mod compile;
pub mod downloader;
pub mod fetcher;
pub mod learn;
pub mod link_proxy;
pub mod linked_file;
pub mod managers;
pub mod project_store;
pub mod snippets;
pub mod storage;
