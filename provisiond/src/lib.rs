//! provisiond - turns repository URLs into ready-to-use development environments
//!
//! Each accepted request is recorded, then driven in the background through
//! fetching the repository, creating an environment (behind a bounded FIFO
//! admission queue), patching policy files and running the repository's init
//! script against the new environment. Status lands in a record store and the
//! per-request workspace is always removed at the end.

pub mod cleaner;
pub mod config;
pub mod credentials;
pub mod error;
pub mod events;
pub mod intake;
pub mod model;
pub mod orchestrator;
pub mod pipeline;
pub mod process;
pub mod provisioner;
pub mod queue;
pub mod records;
pub mod reporter;
pub mod server;
pub mod source;

pub use cleaner::WorkspaceCleaner;
pub use config::Config;
pub use credentials::{Credential, CredentialProvider, FileCredentialProvider};
pub use error::{
    AuthError, ConfigError, FetchError, IntakeError, PipelineError, PostProvisionError,
    ProcessError, ProvisionError, ReportingError,
};
pub use events::{
    EventPublisher, LogEventPublisher, MemoryEventPublisher, NatsEventPublisher, ProvisionEvent,
};
pub use intake::{Accepted, Intake};
pub use model::{EnvironmentDescriptor, InitCommand, ProvisionRequest, RequestStatus};
pub use orchestrator::Orchestrator;
pub use pipeline::{CommandRewriter, PostProvisionPipeline};
pub use process::{CommandOutput, ProcessRunner, ShellProcessRunner};
pub use provisioner::CliEnvironmentProvisioner;
pub use queue::{EnvironmentProvisioner, ProvisioningQueue, Ticket};
pub use records::{LocalRecordStore, RecordFields, RecordStatus, RecordStore, TrackingRecord};
pub use reporter::StatusReporter;
pub use source::{GitSourceFetcher, SourceControlClient};
