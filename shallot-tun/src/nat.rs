//! IPv4 forwarding and masquerade setup for the exit node
//!
//! The exit node decapsulates client traffic onto its TUN interface and
//! relies on the kernel to forward and source-NAT it. This module owns
//! that OS state: the `ip_forward` sysctl and the iptables MASQUERADE
//! rule on the virtual subnet. Rules are remembered and removed on
//! cleanup; shutdown must not leave masquerade rules behind.

use std::process::Command;

use crate::error::{Error, Result};

const IP_FORWARD_SYSCTL: &str = "/proc/sys/net/ipv4/ip_forward";

/// A source-NAT masquerade rule
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NatRule {
    /// Source network to masquerade (CIDR)
    pub source: String,
}

impl NatRule {
    /// Create a masquerade rule for a source network
    pub fn masquerade(source: impl Into<String>) -> Self {
        Self {
            source: source.into(),
        }
    }

    fn iptables_args<'a>(&'a self, action: &'a str) -> [&'a str; 8] {
        [
            "-t",
            "nat",
            action,
            "POSTROUTING",
            "-s",
            &self.source,
            "-j",
            "MASQUERADE",
        ]
    }
}

/// Manager for forwarding and NAT state
///
/// Remembers what it changed and undoes it in [`cleanup`](Self::cleanup);
/// `Drop` runs the same cleanup best-effort.
pub struct NatManager {
    applied_rules: Vec<NatRule>,
    enabled_forwarding: bool,
}

impl NatManager {
    /// Create a new NAT manager
    pub fn new() -> Self {
        Self {
            applied_rules: Vec::new(),
            enabled_forwarding: false,
        }
    }

    /// Enable IPv4 forwarding
    pub fn enable_ip_forwarding(&mut self) -> Result<()> {
        let already_on = std::fs::read_to_string(IP_FORWARD_SYSCTL)
            .map(|v| v.trim() == "1")
            .unwrap_or(false);

        if !already_on {
            std::fs::write(IP_FORWARD_SYSCTL, "1")
                .map_err(|e| Error::Nat(format!("failed to enable IPv4 forwarding: {}", e)))?;
            self.enabled_forwarding = true;
        }

        log::info!("IPv4 forwarding enabled");
        Ok(())
    }

    /// Install a masquerade rule, skipping it if an identical rule exists
    pub fn add_rule(&mut self, rule: &NatRule) -> Result<()> {
        // -C probes for an existing identical rule
        let exists = Command::new("iptables")
            .args(rule.iptables_args("-C"))
            .output()
            .map_err(|e| Error::Nat(format!("failed to run iptables: {}", e)))?
            .status
            .success();

        if !exists {
            let output = Command::new("iptables")
                .args(rule.iptables_args("-A"))
                .output()
                .map_err(|e| Error::Nat(format!("failed to run iptables: {}", e)))?;

            if !output.status.success() {
                return Err(Error::Nat(format!(
                    "iptables failed: {}",
                    String::from_utf8_lossy(&output.stderr)
                )));
            }
        }

        self.applied_rules.push(rule.clone());
        log::info!("Masquerading {}", rule.source);
        Ok(())
    }

    /// Remove a previously installed masquerade rule
    pub fn remove_rule(&mut self, rule: &NatRule) -> Result<()> {
        let output = Command::new("iptables")
            .args(rule.iptables_args("-D"))
            .output()
            .map_err(|e| Error::Nat(format!("failed to run iptables: {}", e)))?;

        if !output.status.success() {
            log::warn!(
                "Failed to remove NAT rule for {}: {}",
                rule.source,
                String::from_utf8_lossy(&output.stderr)
            );
        }

        self.applied_rules.retain(|r| r != rule);
        log::info!("Removed masquerade on {}", rule.source);
        Ok(())
    }

    /// Remove all installed rules and restore forwarding if this process
    /// enabled it
    pub fn cleanup(&mut self) {
        let rules: Vec<NatRule> = self.applied_rules.drain(..).collect();
        for rule in &rules {
            let _ = self.remove_rule(rule);
        }

        if self.enabled_forwarding {
            if let Err(e) = std::fs::write(IP_FORWARD_SYSCTL, "0") {
                log::warn!("Failed to restore ip_forward: {}", e);
            }
            self.enabled_forwarding = false;
        }
    }

    /// Rules currently installed by this manager
    pub fn applied_rules(&self) -> &[NatRule] {
        &self.applied_rules
    }
}

impl Default for NatManager {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for NatManager {
    fn drop(&mut self) {
        self.cleanup();
    }
}
