pub mod docker_manager;
pub mod ignite;
pub mod locator;
pub mod vm;

pub use docker_manager::{ContainerEngine, DockerManager};
pub use ignite::{IgniteManager, VmManager};
pub use locator::VmLocator;
pub use vm::{VmDescriptor, VmRecord};
