use std::process::Command;
use std::sync::Arc;

use tracing::{debug, error, warn};

/// Capability interface for the host firewall.
///
/// Implementations are fire-and-forget: they must return immediately and
/// never surface failure to the caller — a rule that could not be applied
/// is logged, and the logical block state in the store stays authoritative.
pub trait FirewallEnforcer: Send + Sync {
    fn apply_block(&self, ip: &str);
    fn apply_unblock(&self, ip: &str);
    fn backend_name(&self) -> &'static str;
}

/// Build the enforcer selected by the `blocking.firewall` setting.
/// Unrecognized values fall back to the no-op backend.
pub fn from_config(backend: &str) -> Arc<dyn FirewallEnforcer> {
    match backend {
        "iptables" => Arc::new(IptablesEnforcer),
        "ufw" => Arc::new(UfwEnforcer),
        "none" => Arc::new(NoopEnforcer),
        other => {
            warn!(backend = other, "Unknown firewall backend, rules will not be enforced");
            Arc::new(NoopEnforcer)
        }
    }
}

/// Run a firewall command off-thread and log the outcome.
fn run_detached(program: &'static str, args: Vec<String>) {
    std::thread::spawn(move || {
        match Command::new(program).args(&args).output() {
            Ok(output) if output.status.success() => {
                debug!(program, args = ?args, "Firewall rule applied");
            }
            Ok(output) => {
                error!(
                    program,
                    args = ?args,
                    status = %output.status,
                    stderr = %String::from_utf8_lossy(&output.stderr),
                    "Firewall command failed"
                );
            }
            Err(e) => {
                error!(program, args = ?args, error = %e, "Failed to run firewall command");
            }
        }
    });
}

/// `iptables`-backed enforcement: DROP rules on the INPUT chain.
pub struct IptablesEnforcer;

impl FirewallEnforcer for IptablesEnforcer {
    fn apply_block(&self, ip: &str) {
        run_detached(
            "iptables",
            vec![
                "-A".into(),
                "INPUT".into(),
                "-s".into(),
                ip.to_string(),
                "-j".into(),
                "DROP".into(),
            ],
        );
    }

    fn apply_unblock(&self, ip: &str) {
        run_detached(
            "iptables",
            vec![
                "-D".into(),
                "INPUT".into(),
                "-s".into(),
                ip.to_string(),
                "-j".into(),
                "DROP".into(),
            ],
        );
    }

    fn backend_name(&self) -> &'static str {
        "iptables"
    }
}

/// `ufw`-backed enforcement.
pub struct UfwEnforcer;

impl FirewallEnforcer for UfwEnforcer {
    fn apply_block(&self, ip: &str) {
        run_detached("ufw", vec!["deny".into(), "from".into(), ip.to_string()]);
    }

    fn apply_unblock(&self, ip: &str) {
        run_detached(
            "ufw",
            vec![
                "delete".into(),
                "deny".into(),
                "from".into(),
                ip.to_string(),
            ],
        );
    }

    fn backend_name(&self) -> &'static str {
        "ufw"
    }
}

/// No-op backend for tests and deployments where another system owns the
/// firewall.
pub struct NoopEnforcer;

impl FirewallEnforcer for NoopEnforcer {
    fn apply_block(&self, ip: &str) {
        debug!(ip, "Firewall enforcement disabled, block not applied");
    }

    fn apply_unblock(&self, ip: &str) {
        debug!(ip, "Firewall enforcement disabled, unblock not applied");
    }

    fn backend_name(&self) -> &'static str {
        "none"
    }
}
