//! Webhook server for the keeper GitHub App
//!
//! Serves `GET /` (redirect to the source code), `GET /health` and the
//! webhook receiver on `POST /`.

pub mod app;
pub mod cli;
pub mod dispatch;
pub mod server;
pub mod telemetry;

pub use app::App;
pub use dispatch::{DispatchError, Dispatcher, Outcome};
pub use server::{build_router, HttpState};
