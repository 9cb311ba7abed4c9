pub mod docker;
pub mod locks;

pub use docker::{wait_for_daemon, ContainerRuntime, CreateSpec, DockerRuntime};
pub use locks::{NameGuard, NameLocks};
