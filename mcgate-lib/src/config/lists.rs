use ahash::{AHashMap, AHashSet};
use ipnet::IpNet;
use serde::Deserialize;
use std::collections::HashMap;
use std::net::IpAddr;
use std::str::FromStr;

use crate::security::access::{Identity, ListResolver};

/// One named list, pre-indexed for every identity kind.
///
/// Entries are kept verbatim for player names, lowercased for host names, and
/// parsed as networks when they look like an IP address or a CIDR block.
#[derive(Debug, Clone, Default)]
pub struct NamedList {
    exact: AHashSet<String>,
    folded: AHashSet<String>,
    networks: Vec<IpNet>,
}

impl NamedList {
    pub fn from_entries<I, S>(entries: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut list = NamedList::default();
        for entry in entries {
            let entry = entry.as_ref().trim();
            if entry.is_empty() {
                continue;
            }
            if let Ok(net) = IpNet::from_str(entry) {
                list.networks.push(net);
            } else if let Ok(ip) = IpAddr::from_str(entry) {
                list.networks.push(IpNet::from(ip));
            }
            list.exact.insert(entry.to_string());
            list.folded.insert(fold_hostname(entry));
        }
        list
    }

    pub fn contains(&self, identity: &Identity<'_>) -> bool {
        match identity {
            Identity::Ip(ip) => self.networks.iter().any(|net| net.contains(ip)),
            Identity::Hostname(host) => self.folded.contains(&fold_hostname(host)),
            Identity::Player(name) => self.exact.contains(*name),
        }
    }

    pub fn len(&self) -> usize {
        self.exact.len()
    }

    pub fn is_empty(&self) -> bool {
        self.exact.is_empty()
    }
}

/// The `[lists]` table: tag -> entries.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(from = "HashMap<String, Vec<String>>")]
pub struct NamedLists {
    lists: AHashMap<String, NamedList>,
}

impl NamedLists {
    pub fn has_tag(&self, tag: &str) -> bool {
        self.lists.contains_key(tag)
    }

    pub fn get(&self, tag: &str) -> Option<&NamedList> {
        self.lists.get(tag)
    }

    pub fn len(&self) -> usize {
        self.lists.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lists.is_empty()
    }
}

impl From<HashMap<String, Vec<String>>> for NamedLists {
    fn from(raw: HashMap<String, Vec<String>>) -> Self {
        let lists = raw
            .into_iter()
            .map(|(tag, entries)| (tag, NamedList::from_entries(entries)))
            .collect();
        Self { lists }
    }
}

impl ListResolver for NamedLists {
    fn contains(&self, tag: &str, identity: &Identity<'_>) -> bool {
        self.lists
            .get(tag)
            .is_some_and(|list| list.contains(identity))
    }
}

fn fold_hostname(host: &str) -> String {
    host.trim_end_matches('.').to_ascii_lowercase()
}
