use std::fmt;
use std::net::IpAddr;

use crate::config::{AccessMode, AccessPolicy};

/// Something an access policy can be evaluated against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Identity<'a> {
    /// Peer address, matched against IP and CIDR entries
    Ip(IpAddr),
    /// TLS SNI or handshake hostname, matched case-insensitively
    Hostname(&'a str),
    /// Player name from login start, matched exactly
    Player(&'a str),
}

impl fmt::Display for Identity<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Identity::Ip(ip) => write!(f, "ip {ip}"),
            Identity::Hostname(host) => write!(f, "hostname {host}"),
            Identity::Player(name) => write!(f, "player {name}"),
        }
    }
}

/// Membership lookup over the named lists.
pub trait ListResolver {
    fn contains(&self, tag: &str, identity: &Identity<'_>) -> bool;
}

/// Check whether an identity passes a policy
///
/// Returns `true` if the identity should be allowed, `false` if it should be blocked.
///
/// # Logic:
/// - `Disabled`: always allow
/// - `Accept`: allow only if the identity is in one of the tagged lists
/// - `Deny`: block if the identity is in one of the tagged lists
pub fn evaluate<R>(policy: &AccessPolicy, identity: &Identity<'_>, resolver: &R) -> bool
where
    R: ListResolver + ?Sized,
{
    let listed = || {
        policy
            .list_tags
            .iter()
            .any(|tag| resolver.contains(tag, identity))
    };
    match policy.mode {
        AccessMode::Disabled => true,
        // No tags = nothing listed = deny all
        AccessMode::Accept => listed(),
        AccessMode::Deny => !listed(),
    }
}

/// Check a server name against allow lists; absent SNI never matches.
pub fn sni_allowed<R>(sni: Option<&str>, tags: &[String], resolver: &R) -> bool
where
    R: ListResolver + ?Sized,
{
    match sni {
        Some(host) => {
            let identity = Identity::Hostname(host);
            tags.iter().any(|tag| resolver.contains(tag, &identity))
        }
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::NamedLists;
    use std::collections::HashMap;

    fn resolver() -> NamedLists {
        let mut raw = HashMap::new();
        raw.insert("staff".to_string(), vec!["Alice".to_string()]);
        raw.insert("lan".to_string(), vec!["192.168.1.0/24".to_string()]);
        raw.insert("hosts".to_string(), vec!["play.example.com".to_string()]);
        raw.into()
    }

    #[test]
    fn test_mode_truth_table() {
        let lists = resolver();
        let listed = Identity::Player("Alice");
        let unlisted = Identity::Player("Mallory");

        let cases = [
            (AccessMode::Disabled, &listed, true),
            (AccessMode::Disabled, &unlisted, true),
            (AccessMode::Accept, &listed, true),
            (AccessMode::Accept, &unlisted, false),
            (AccessMode::Deny, &listed, false),
            (AccessMode::Deny, &unlisted, true),
        ];
        for (mode, identity, expected) in cases {
            let policy = AccessPolicy::new(mode, &["staff"]);
            assert_eq!(evaluate(&policy, identity, &lists), expected, "{mode:?} {identity}");
        }
    }

    #[test]
    fn test_union_of_tags() {
        let lists = resolver();
        let policy = AccessPolicy::new(AccessMode::Accept, &["staff", "lan"]);
        let ip: IpAddr = [192, 168, 1, 7].into();
        assert!(evaluate(&policy, &Identity::Ip(ip), &lists));
        assert!(evaluate(&policy, &Identity::Player("Alice"), &lists));
        assert!(!evaluate(&policy, &Identity::Player("Bob"), &lists));
    }

    #[test]
    fn test_accept_without_tags_denies_all() {
        let lists = resolver();
        let policy = AccessPolicy::new(AccessMode::Accept, &[]);
        assert!(!evaluate(&policy, &Identity::Player("Alice"), &lists));

        let policy = AccessPolicy::new(AccessMode::Deny, &[]);
        assert!(evaluate(&policy, &Identity::Player("Alice"), &lists));
    }

    #[test]
    fn test_hostname_case_insensitive() {
        let lists = resolver();
        let policy = AccessPolicy::new(AccessMode::Accept, &["hosts"]);
        assert!(evaluate(&policy, &Identity::Hostname("PLAY.Example.com"), &lists));
    }

    #[test]
    fn test_sni_allowed() {
        let lists = resolver();
        let tags = vec!["hosts".to_string()];
        assert!(sni_allowed(Some("play.example.com"), &tags, &lists));
        assert!(!sni_allowed(Some("other.example.com"), &tags, &lists));
        assert!(!sni_allowed(None, &tags, &lists));
    }
}
