use serde::Deserialize;
use std::net::IpAddr;
use std::path::PathBuf;

/// ignite names the per-VM SSH key `id_<uid>` inside the VM object directory.
pub const SSH_KEY_PREFIX: &str = "id_";

/// A VM as reported by the VM manager, before any validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VmRecord {
    pub uid: String,
    pub name: String,
    pub running: bool,
    pub ip_addresses: Vec<IpAddr>,
    pub object_path: PathBuf,
}

impl VmRecord {
    pub fn ssh_key_path(&self) -> PathBuf {
        self.object_path.join(format!("{}{}", SSH_KEY_PREFIX, self.uid))
    }
}

/// A running, addressable VM. Built fresh by every resolution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VmDescriptor {
    pub uid: String,
    pub name: String,
    pub running: bool,
    pub ip_addresses: Vec<IpAddr>,
    pub credential_path: PathBuf,
}

impl VmDescriptor {
    /// First reported address, the one commands are sent to.
    pub fn address(&self) -> Option<IpAddr> {
        self.ip_addresses.first().copied()
    }
}

// ignite's on-disk VM object (metadata.json). Only the fields we read.

#[derive(Debug, Deserialize)]
pub struct VmObject {
    pub metadata: ObjectMeta,
    #[serde(default)]
    pub status: VmObjectStatus,
}

#[derive(Debug, Deserialize)]
pub struct ObjectMeta {
    pub name: String,
    pub uid: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VmObjectStatus {
    #[serde(default)]
    pub running: bool,
    // v1alpha2 and earlier
    #[serde(default)]
    pub ip_addresses: Vec<String>,
    // v1alpha3 and later
    #[serde(default)]
    pub network: Option<VmNetworkStatus>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VmNetworkStatus {
    #[serde(default)]
    pub ip_addresses: Vec<String>,
}

impl VmObject {
    pub fn into_record(self, object_path: PathBuf) -> VmRecord {
        let raw = match self.status.network {
            Some(network) if !network.ip_addresses.is_empty() => network.ip_addresses,
            _ => self.status.ip_addresses,
        };

        VmRecord {
            uid: self.metadata.uid,
            name: self.metadata.name,
            running: self.status.running,
            ip_addresses: raw.iter().filter_map(|ip| ip.parse().ok()).collect(),
            object_path,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_network_status_layout() {
        let json = r#"{
            "kind": "VM",
            "apiVersion": "ignite.weave.works/v1alpha4",
            "metadata": {"name": "vm1", "uid": "8f3a2b1c0d9e7f60"},
            "spec": {"cpus": 1},
            "status": {
                "running": true,
                "network": {"plugin": "cni", "ipAddresses": ["10.61.0.5"]}
            }
        }"#;
        let obj: VmObject = serde_json::from_str(json).unwrap();
        let record = obj.into_record(PathBuf::from("/var/lib/firecracker/vm/8f3a2b1c0d9e7f60"));

        assert!(record.running);
        assert_eq!(record.ip_addresses, vec!["10.61.0.5".parse::<IpAddr>().unwrap()]);
        assert_eq!(
            record.ssh_key_path(),
            PathBuf::from("/var/lib/firecracker/vm/8f3a2b1c0d9e7f60/id_8f3a2b1c0d9e7f60")
        );
    }

    #[test]
    fn parses_legacy_status_layout_and_skips_garbage() {
        let json = r#"{
            "metadata": {"name": "old", "uid": "0011"},
            "status": {"running": true, "ipAddresses": ["not-an-ip", "172.17.0.3"]}
        }"#;
        let obj: VmObject = serde_json::from_str(json).unwrap();
        let record = obj.into_record(PathBuf::from("/tmp/vm/0011"));
        assert_eq!(record.ip_addresses, vec!["172.17.0.3".parse::<IpAddr>().unwrap()]);
    }

    #[test]
    fn descriptor_without_addresses_has_no_address() {
        let vm = VmDescriptor {
            uid: "42".into(),
            name: "fresh".into(),
            running: true,
            ip_addresses: Vec::new(),
            credential_path: PathBuf::from("/tmp/vm/42/id_42"),
        };
        assert_eq!(vm.address(), None);
    }

    #[test]
    fn missing_status_means_stopped() {
        let json = r#"{"metadata": {"name": "fresh", "uid": "42"}}"#;
        let obj: VmObject = serde_json::from_str(json).unwrap();
        let record = obj.into_record(PathBuf::from("/tmp/vm/42"));
        assert!(!record.running);
        assert!(record.ip_addresses.is_empty());
    }
}
