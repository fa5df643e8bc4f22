//! datastore - Uniform key-based access to local and cloud blob storage
//!
//! This crate provides interchangeable data store backends with:
//! - A shared `DataStore` contract (get, put, upload, download, stat, listdir)
//! - A local filesystem store rooted at a base directory
//! - An Azure Blob Storage store over an injectable `ObjectClient`
//! - Credential lookup through an ordered secret-provider chain

pub mod config;
pub mod object_client;
pub mod secrets;
pub mod store;
pub mod url;

pub use store::{
    AzureBlobStore, DataStore, DataStoreError, FileStats, LocalStore, StoreInfo, WriteHandle,
};
