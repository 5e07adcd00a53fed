// src/lib.rs - Outlier detection and proofreading for multi-camera pose tracking
pub mod app;
pub mod body;
pub mod cache;
pub mod config;
pub mod data;
pub mod detection;
pub mod error;
pub mod logging;
pub mod pose;
pub mod review;
pub mod video;
