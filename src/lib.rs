#![allow(dead_code)]

pub mod cache;
pub mod config;
pub mod curriculum;
pub mod db;
pub mod logging;
pub mod services;
pub mod state;
