#![forbid(unsafe_code)]
#![deny(unreachable_pub)]

//! The print host engine: transport, protocol, driver, bot worker, worker
//! manager, bot source, API façade, and downloader.

pub mod api;
pub mod downloader;
pub mod driver;
pub mod manager;
pub mod protocol;
pub mod source;
pub mod transport;
pub mod worker;

pub use manager::WorkerManager;
pub use source::{BotEvent, BotSource};
pub use worker::{BotWorkerHandle, WorkerCommand};
