//! The split-tunnel matcher.
//!
//! Destinations given as IP literals can be excluded from the tunnel by CIDR rules. The rules
//! live in a pair of binary prefix tries (one per address family) behind an atomic swap: updates
//! build a complete replacement off-line and publish it in one store, so queries always see
//! either the previous or the new rule set, never a mixture. Readers never block.

use arc_swap::ArcSwap;
use ipnet::IpNet;
use std::net::IpAddr;
use std::path::Path;
use std::str::FromStr;
use tokio::fs::File;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{debug, info, warn};

/// The swappable rule set answering "does this address bypass the tunnel?".
pub struct SplitRules {
    table: ArcSwap<RuleTable>,
}

impl SplitRules {
    pub fn new() -> Self {
        Self {
            table: ArcSwap::from_pointee(RuleTable::default()),
        }
    }

    /// Rebuilds the rule set from the given files and swaps it in.
    ///
    /// Each file holds one entry per line: a CIDR block or a bare address (implied `/32` or
    /// `/128`). Blank lines, `#` comments and malformed entries are skipped; unreadable files are
    /// logged and skipped as well. The swap happens only after every file has been consumed.
    pub async fn update<P: AsRef<Path>>(&self, paths: &[P]) {
        let mut table = RuleTable::default();
        let mut rules = 0usize;

        for path in paths {
            let path = path.as_ref();
            let file = match File::open(path).await {
                Ok(file) => file,
                Err(err) => {
                    warn!(
                        cause = err.to_string(),
                        path = path.display().to_string(),
                        "skipping unreadable rule file"
                    );
                    continue;
                }
            };

            let mut lines = BufReader::new(file).lines();
            loop {
                let line = match lines.next_line().await {
                    Ok(Some(line)) => line,
                    Ok(None) => break,
                    Err(err) => {
                        warn!(
                            cause = err.to_string(),
                            path = path.display().to_string(),
                            "stopping rule file read"
                        );
                        break;
                    }
                };

                let Some(network) = parse_rule(&line) else {
                    continue;
                };
                table.insert(&network);
                rules += 1;
            }
        }

        self.table.store(std::sync::Arc::new(table));
        info!(rules, files = paths.len(), "split-tunnel rules replaced");
    }

    /// Whether the address is covered by the current rule set.
    pub fn should_bypass(&self, address: IpAddr) -> bool {
        self.table.load().contains(address)
    }
}

impl Default for SplitRules {
    fn default() -> Self {
        Self::new()
    }
}

fn parse_rule(line: &str) -> Option<IpNet> {
    let entry = line.trim();
    if entry.is_empty() || entry.starts_with('#') {
        return None;
    }

    if let Ok(network) = IpNet::from_str(entry) {
        return Some(network);
    }
    if let Ok(address) = IpAddr::from_str(entry) {
        return Some(IpNet::from(address));
    }

    debug!(entry, "skipping malformed split-tunnel rule");
    None
}

#[derive(Default)]
struct RuleTable {
    v4: PrefixTrie,
    v6: PrefixTrie,
}

impl RuleTable {
    fn insert(&mut self, network: &IpNet) {
        match network {
            IpNet::V4(net) => self.v4.insert(
                u128::from(u32::from(net.network())) << 96,
                net.prefix_len(),
            ),
            IpNet::V6(net) => self.v6.insert(u128::from(net.network()), net.prefix_len()),
        }
    }

    fn contains(&self, address: IpAddr) -> bool {
        match address {
            IpAddr::V4(v4) => self.v4.contains(u128::from(u32::from(v4)) << 96, 32),
            IpAddr::V6(v6) => self.v6.contains(u128::from(v6), 128),
        }
    }
}

/// A binary trie over address prefixes, walked from the most significant bit.
///
/// A terminal node marks the end of a stored prefix; its subtree is pruned on insert because a
/// shorter prefix covers every longer one below it.
struct PrefixTrie {
    nodes: Vec<Node>,
}

#[derive(Clone, Default)]
struct Node {
    children: [Option<u32>; 2],
    terminal: bool,
}

impl Default for PrefixTrie {
    fn default() -> Self {
        Self {
            nodes: vec![Node::default()],
        }
    }
}

impl PrefixTrie {
    fn insert(&mut self, bits: u128, prefix_len: u8) {
        let mut node = 0usize;
        for position in 0..prefix_len {
            if self.nodes[node].terminal {
                return;
            }
            let bit = ((bits >> (127 - position)) & 1) as usize;
            node = match self.nodes[node].children[bit] {
                Some(next) => next as usize,
                None => {
                    let next = self.nodes.len();
                    self.nodes.push(Node::default());
                    self.nodes[node].children[bit] = Some(next as u32);
                    next
                }
            };
        }

        let leaf = &mut self.nodes[node];
        leaf.terminal = true;
        leaf.children = [None, None];
    }

    fn contains(&self, bits: u128, width: u8) -> bool {
        let mut node = 0usize;
        for position in 0..width {
            if self.nodes[node].terminal {
                return true;
            }
            let bit = ((bits >> (127 - position)) & 1) as usize;
            match self.nodes[node].children[bit] {
                Some(next) => node = next as usize,
                None => return false,
            }
        }
        self.nodes[node].terminal
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn rule_file(content: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().expect("temp file failed");
        file.write_all(content.as_bytes()).expect("write failed");
        file
    }

    fn addr(value: &str) -> IpAddr {
        value.parse().expect("invalid address")
    }

    #[tokio::test]
    async fn matches_cidr_blocks() {
        let file = rule_file("10.0.0.0/8\n192.168.1.0/24\n2001:db8::/32\n");
        let rules = SplitRules::new();
        rules.update(&[file.path()]).await;

        assert!(rules.should_bypass(addr("10.1.2.3")));
        assert!(rules.should_bypass(addr("10.255.255.255")));
        assert!(rules.should_bypass(addr("192.168.1.77")));
        assert!(rules.should_bypass(addr("2001:db8::1")));

        assert!(!rules.should_bypass(addr("11.0.0.1")));
        assert!(!rules.should_bypass(addr("192.168.2.1")));
        assert!(!rules.should_bypass(addr("2001:db9::1")));
    }

    #[tokio::test]
    async fn treats_bare_addresses_as_host_routes() {
        let file = rule_file("172.16.5.4\nfe80::1\n");
        let rules = SplitRules::new();
        rules.update(&[file.path()]).await;

        assert!(rules.should_bypass(addr("172.16.5.4")));
        assert!(!rules.should_bypass(addr("172.16.5.5")));
        assert!(rules.should_bypass(addr("fe80::1")));
        assert!(!rules.should_bypass(addr("fe80::2")));
    }

    #[tokio::test]
    async fn skips_comments_and_malformed_lines() {
        let file = rule_file("# corporate ranges\n\n10.0.0.0/8\nnot-a-cidr\n300.1.2.3/8\n");
        let rules = SplitRules::new();
        rules.update(&[file.path()]).await;

        assert!(rules.should_bypass(addr("10.1.2.3")));
        assert!(!rules.should_bypass(addr("1.2.3.4")));
    }

    #[tokio::test]
    async fn update_replaces_the_whole_set() {
        let first = rule_file("10.0.0.0/8\n");
        let second = rule_file("192.168.0.0/16\n");
        let rules = SplitRules::new();

        rules.update(&[first.path()]).await;
        assert!(rules.should_bypass(addr("10.1.2.3")));

        rules.update(&[second.path()]).await;
        assert!(!rules.should_bypass(addr("10.1.2.3")));
        assert!(rules.should_bypass(addr("192.168.1.1")));
    }

    #[tokio::test]
    async fn merges_multiple_files() {
        let first = rule_file("10.0.0.0/8\n");
        let second = rule_file("192.168.0.0/16\n");
        let rules = SplitRules::new();
        rules.update(&[first.path(), second.path()]).await;

        assert!(rules.should_bypass(addr("10.1.2.3")));
        assert!(rules.should_bypass(addr("192.168.1.1")));
    }

    #[tokio::test]
    async fn empty_rule_set_bypasses_nothing() {
        let rules = SplitRules::new();
        assert!(!rules.should_bypass(addr("10.1.2.3")));
        assert!(!rules.should_bypass(addr("::1")));
    }

    #[test]
    fn shorter_prefix_wins() {
        let mut trie = PrefixTrie::default();
        trie.insert(u128::from(u32::from_be_bytes([10, 0, 0, 0])) << 96, 8);
        trie.insert(u128::from(u32::from_be_bytes([10, 1, 0, 0])) << 96, 16);

        assert!(trie.contains(u128::from(u32::from_be_bytes([10, 1, 2, 3])) << 96, 32));
        assert!(trie.contains(u128::from(u32::from_be_bytes([10, 200, 0, 1])) << 96, 32));
    }
}
