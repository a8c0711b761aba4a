pub mod api;
pub mod app;
pub mod braille;
pub mod config;
pub mod content;
pub mod engine;
pub mod interaction;
pub mod model;
pub mod panel;
pub mod scenario;
pub mod ui;
pub mod view;
