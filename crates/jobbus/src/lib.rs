pub mod archive;
pub mod bus;
pub mod config;
pub mod deposit;
pub mod dispatch;
pub mod error;
pub mod logging;
pub mod message;

pub use archive::ArchiveEntry;
pub use bus::JobBus;
pub use config::{load_config, Config};
pub use deposit::{DepositHandler, DepositRegistry, DepositRoot, DepositService, FileLocker};
pub use dispatch::{DispatchPool, Dispatcher, JobExecutor, ResultHandler, ResultRouter};
pub use error::{
    ArchiveError, ConfigError, DepositError, DispatchError, JobBusError, Result, ValidationError,
};
pub use logging::{init_logging, LoggingError};
pub use message::{Messages, Meta, MultiFilesJob, MultiFilesResult, Source, WorkItem};
