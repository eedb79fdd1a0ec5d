pub mod clients;
pub mod config;
pub mod db;
pub mod embedding;
pub mod error;
pub mod geocode;
pub mod importer;
pub mod ingest;
pub mod library;
pub mod metadata;
pub mod models;
pub mod records;
pub mod search;
pub mod semantic;
pub mod storage;
pub mod synonyms;
pub mod tagger;
pub mod tags;
pub mod thumbnail;
pub mod vectorizer;
pub mod walker;
pub mod web_server;

pub use crate::error::{AppError, Result};
pub use crate::library::{Collaborators, PhotoLibrary};
