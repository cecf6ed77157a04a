use std::path::PathBuf;

use envconfig::Envconfig;

/// Process configuration handed over by the Juju agent plus a few
/// charm-owned overrides.
#[derive(Envconfig, Clone, Debug)]
pub struct CharmEnv {
    #[envconfig(from = "JUJU_UNIT_NAME", default = "kubevirt/0")]
    pub unit_name: String,

    /// `hooks/<name>` or `actions/<name>`.
    #[envconfig(from = "JUJU_DISPATCH_PATH")]
    pub dispatch_path: Option<String>,

    #[envconfig(from = "JUJU_RELATION_ID")]
    pub relation_id: Option<String>,

    #[envconfig(from = "JUJU_CHARM_DIR", default = ".")]
    pub charm_dir: PathBuf,

    /// Where `state.json` and `deferred.json` live.
    /// Env: KUBEVIRT_CHARM_STATE_DIR
    #[envconfig(from = "KUBEVIRT_CHARM_STATE_DIR")]
    pub state_dir: Option<PathBuf>,

    #[envconfig(from = "KUBEVIRT_CHARM_KUBECONFIG", default = "/root/.kube/config")]
    pub kubeconfig: PathBuf,

    /// Optional CA bundle referenced from the generated kubeconfig.
    #[envconfig(from = "KUBEVIRT_CHARM_CA_PATH")]
    pub ca_path: Option<PathBuf>,

    #[envconfig(from = "KUBEVIRT_CHARM_KVM_DEVICE", default = "/dev/kvm")]
    pub kvm_device: PathBuf,

    /// `;` separated commands run on install and by `sync-install`.
    #[envconfig(from = "KUBEVIRT_CHARM_HOST_SETUP")]
    pub host_setup: Option<String>,

    #[envconfig(from = "KUBEVIRT_CHARM_FIELD_MANAGER", default = "kubevirt-charm")]
    pub field_manager: String,
}

impl CharmEnv {
    pub fn state_dir(&self) -> PathBuf {
        self.state_dir
            .clone()
            .unwrap_or_else(|| self.charm_dir.join(".unit-state"))
    }

    pub fn upstream_dir(&self) -> PathBuf {
        self.charm_dir.join("upstream")
    }

    pub fn host_setup_commands(&self) -> Vec<Vec<String>> {
        self.host_setup
            .as_deref()
            .unwrap_or_default()
            .split(';')
            .map(|cmd| {
                cmd.split_whitespace().map(str::to_string).collect::<Vec<_>>()
            })
            .filter(|argv| !argv.is_empty())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> CharmEnv {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        CharmEnv::init_from_hashmap(&map).unwrap()
    }

    #[test]
    fn defaults_apply_without_env() {
        let cfg = env(&[]);
        assert_eq!(cfg.unit_name, "kubevirt/0");
        assert_eq!(cfg.kvm_device, PathBuf::from("/dev/kvm"));
        assert_eq!(cfg.state_dir(), PathBuf::from("./.unit-state"));
        assert!(cfg.host_setup_commands().is_empty());
    }

    #[test]
    fn explicit_values_win() {
        let cfg = env(&[
            ("JUJU_UNIT_NAME", "kv/3"),
            ("JUJU_CHARM_DIR", "/var/lib/juju/agents/unit-kv-3/charm"),
            ("KUBEVIRT_CHARM_STATE_DIR", "/tmp/kv"),
            (
                "KUBEVIRT_CHARM_HOST_SETUP",
                "apt-get install -y qemu-kvm; aa-complain /usr/sbin/libvirtd ;",
            ),
        ]);
        assert_eq!(cfg.unit_name, "kv/3");
        assert_eq!(cfg.state_dir(), PathBuf::from("/tmp/kv"));
        assert_eq!(
            cfg.upstream_dir(),
            PathBuf::from("/var/lib/juju/agents/unit-kv-3/charm/upstream")
        );
        let cmds = cfg.host_setup_commands();
        assert_eq!(cmds.len(), 2);
        assert_eq!(cmds[0], vec!["apt-get", "install", "-y", "qemu-kvm"]);
    }
}
