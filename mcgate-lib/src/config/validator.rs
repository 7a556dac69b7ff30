use ahash::AHashSet;

use crate::config::security::AccessPolicy;
use crate::config::service::{OutboundConfig, ServiceConfig};
use crate::config::Config;

pub fn validate(config: &Config) -> Result<(), String> {
    if config.services.is_empty() {
        return Err("at least one service is required".into());
    }
    if config.timeout.sniff_ms == 0 {
        return Err("sniff_ms must be > 0".into());
    }
    if config.timeout.connect_ms == 0 {
        return Err("connect_ms must be > 0".into());
    }

    let limiter = &config.traffic_limiter;
    if limiter.enabled {
        if limiter.limit_mb <= 0 {
            return Err("traffic_limiter.limit_mb must be > 0 when the limiter is enabled".into());
        }
        if limiter.save_interval_secs == 0 || limiter.reset_check_interval_secs == 0 {
            return Err("traffic_limiter intervals must be > 0".into());
        }
        if limiter.retention_days <= 0 {
            return Err("traffic_limiter.retention_days must be > 0".into());
        }
    }

    let mut names = AHashSet::new();
    let mut ports = AHashSet::new();
    for service in &config.services {
        if service.name.trim().is_empty() {
            return Err("service name cannot be empty".into());
        }
        if !names.insert(service.name.as_str()) {
            return Err(format!("duplicate service name: {}", service.name));
        }
        if service.listen != 0 && !ports.insert(service.listen_addr()) {
            return Err(format!(
                "service {}: listen address {} is already used",
                service.name,
                service.listen_addr()
            ));
        }
        validate_service(config, service).map_err(|e| format!("service {}: {e}", service.name))?;
    }
    Ok(())
}

fn validate_service(config: &Config, service: &ServiceConfig) -> Result<(), String> {
    let any_dest = service
        .minecraft
        .as_ref()
        .and_then(|mc| mc.any_dest.as_ref());

    if service.target_address.trim().is_empty() && any_dest.is_none() {
        return Err("target_address cannot be empty".into());
    }
    if service.target_port == 0 {
        return Err("target_port must be > 0".into());
    }

    check_tags(config, "ip_access", &service.ip_access)?;

    if let Some(tls) = &service.tls_sniffing {
        for tag in &tls.sni_allow_list_tags {
            if !config.lists.has_tag(tag) {
                return Err(format!("tls_sniffing references unknown list: {tag}"));
            }
        }
    }

    if let Some(mc) = &service.minecraft {
        check_tags(config, "hostname_access", &mc.hostname_access)?;
        check_tags(config, "name_access", &mc.name_access)?;
        if let Some(hostname) = &mc.rewritten_hostname {
            if hostname.trim().is_empty() {
                return Err("rewritten_hostname cannot be empty".into());
            }
            if any_dest.is_some() {
                return Err("rewritten_hostname and any_dest are mutually exclusive".into());
            }
        }
        if let Some(any_dest) = any_dest {
            if any_dest.wildcard_root_domain.trim_matches('.').is_empty() {
                return Err("any_dest.wildcard_root_domain cannot be empty".into());
            }
        }
        if mc.online_count.enable_max_limit && mc.online_count.max < 0 {
            return Err("online_count.max must be >= 0".into());
        }
    }

    if let OutboundConfig::Socks5 { address } = &service.outbound {
        if address.trim().is_empty() {
            return Err("socks5 outbound address cannot be empty".into());
        }
    }
    Ok(())
}

fn check_tags(config: &Config, field: &str, policy: &AccessPolicy) -> Result<(), String> {
    for tag in &policy.list_tags {
        if !config.lists.has_tag(tag) {
            return Err(format!("{field} references unknown list: {tag}"));
        }
    }
    Ok(())
}
