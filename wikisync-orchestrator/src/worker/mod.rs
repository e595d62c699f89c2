//! Worker processes: wire protocol, spawning and lifecycle

pub mod manager;
pub mod protocol;
pub mod spawner;

pub use manager::{StopReport, WorkerInfo, WorkerManager, WorkerStatus};
pub use protocol::{WorkerCommand, WorkerEvent, WorkerInit, WorkerMessage, WORKER_DATA_ENV};
pub use spawner::{ProcessSpawner, SpawnedWorker, WorkerControl, WorkerSpawner};
