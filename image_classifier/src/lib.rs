mod routes;

pub mod app;
pub mod config;
pub mod decoder;
pub mod inference_service;
pub mod model_handle;
pub mod model_service;
pub mod ort_service;
pub mod preprocess;
pub mod response;
pub mod server;
pub mod state;
pub mod telemetry;

pub use app::start_app;
