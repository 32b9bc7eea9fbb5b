use std::sync::Arc;
use tracing::debug;

use crate::core::ignite::VmManager;
use crate::core::vm::VmDescriptor;
use crate::errors::{CntrError, CntrResult};

/// Turns a VM identifier into a descriptor that is safe to connect to.
#[derive(Clone)]
pub struct VmLocator {
    vms: Arc<dyn VmManager>,
}

impl VmLocator {
    pub fn new(vms: Arc<dyn VmManager>) -> Self {
        Self { vms }
    }

    /// Fails with `VmNotFound`, `VmNotRunning` or `NoUsableAddress`, in that order.
    pub async fn resolve(&self, identifier: &str) -> CntrResult<VmDescriptor> {
        let record = self
            .vms
            .find(identifier)
            .await?
            .ok_or_else(|| CntrError::VmNotFound {
                vm: identifier.to_string(),
            })?;

        if !record.running {
            return Err(CntrError::VmNotRunning { vm: record.name });
        }

        if record.ip_addresses.is_empty() {
            return Err(CntrError::NoUsableAddress { vm: record.name });
        }

        let credential_path = record.ssh_key_path();
        debug!(
            vm = %record.name,
            uid = %record.uid,
            address = %record.ip_addresses[0],
            key = %credential_path.display(),
            "resolved VM"
        );

        Ok(VmDescriptor {
            uid: record.uid,
            name: record.name,
            running: record.running,
            ip_addresses: record.ip_addresses,
            credential_path,
        })
    }
}
