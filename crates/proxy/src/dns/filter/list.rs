//! List-backed rule matcher. Supports adblock-style name rules
//! (`||domain^`, plain `domain`, `@@` exceptions) and hosts-style
//! `<ip> <hostname>` rules.

use super::RuleMatcher;
use rustc_hash::FxHashMap;
use std::net::IpAddr;
use tracing::{debug, warn};
use warden_dns_domain::{is_blocking_ip, DnsError, FilterParams, FilterRule};

#[derive(Default)]
pub struct ListMatcher {
    /// Rules matching the keyed domain and all of its subdomains.
    suffix_rules: FxHashMap<String, Vec<FilterRule>>,
    /// Hosts-style rules, exact hostname only.
    exact_hosts: FxHashMap<String, Vec<FilterRule>>,
    rule_count: usize,
}

impl ListMatcher {
    /// Build the matcher from configured lists. Unreadable files are
    /// fatal; unparseable lines are skipped and summarized in the
    /// returned warning.
    pub fn new(params: &FilterParams) -> Result<(Self, Option<String>), DnsError> {
        let mut matcher = Self::default();
        let mut skipped = 0usize;

        for list in &params.lists {
            if let Some(path) = &list.path {
                let contents = std::fs::read_to_string(path).map_err(|e| {
                    DnsError::FilterError(format!("Failed to read filter list {path}: {e}"))
                })?;
                for line in contents.lines() {
                    if !matcher.add_rule(line, list.id) {
                        skipped += 1;
                    }
                }
            }
            for line in &list.rules {
                if !matcher.add_rule(line, list.id) {
                    skipped += 1;
                }
            }
        }

        debug!(rules = matcher.rule_count, lists = params.lists.len(), "Filter lists compiled");

        let warning = (skipped > 0).then(|| format!("{skipped} unsupported rule(s) skipped"));
        Ok((matcher, warning))
    }

    pub fn rule_count(&self) -> usize {
        self.rule_count
    }

    /// Returns `false` for lines that are neither rules nor comments.
    fn add_rule(&mut self, line: &str, filter_id: i32) -> bool {
        let line = line.trim();
        if line.is_empty() || line.starts_with('!') || line.starts_with('#') {
            return true;
        }
        if line.starts_with('/') {
            // Regex rules are out of scope for the list matcher.
            return false;
        }

        let (body, is_exception) = match line.strip_prefix("@@") {
            Some(rest) => (rest, true),
            None => (line, false),
        };

        if let Some(domains) = parse_hosts_rule(body) {
            if is_exception {
                warn!(rule = line, "Exception hosts rules are unsupported, skipping");
                return false;
            }
            let (ip, names) = domains;
            for name in names {
                self.exact_hosts
                    .entry(name.to_lowercase())
                    .or_default()
                    .push(FilterRule::hosts(line, filter_id, ip));
            }
            self.rule_count += 1;
            return true;
        }

        let domain = body
            .strip_prefix("||")
            .unwrap_or(body)
            .trim_end_matches('^')
            .trim_end_matches('.')
            .to_lowercase();
        if domain.is_empty() || domain.contains(|c: char| c.is_whitespace()) {
            return false;
        }

        let rule = if is_exception {
            FilterRule::exception(line, filter_id)
        } else {
            FilterRule::adblock(line, filter_id)
        };
        self.suffix_rules.entry(domain).or_default().push(rule);
        self.rule_count += 1;
        true
    }
}

/// `<ip> <host> [host...]` where the first token is an address literal or
/// one of the bracketed blocking sentinels.
fn parse_hosts_rule(line: &str) -> Option<(&str, Vec<&str>)> {
    let mut tokens = line.split_whitespace();
    let first = tokens.next()?;
    if first.parse::<IpAddr>().is_err() && !is_blocking_ip(first) {
        return None;
    }
    let names: Vec<&str> = tokens.collect();
    if names.is_empty() {
        return None;
    }
    Some((first, names))
}

impl RuleMatcher for ListMatcher {
    fn match_hostname(&self, hostname: &str) -> Vec<FilterRule> {
        let host = hostname.trim_end_matches('.').to_lowercase();
        if host.is_empty() {
            return Vec::new();
        }

        let mut matched = Vec::new();
        if let Some(rules) = self.exact_hosts.get(&host) {
            matched.extend(rules.iter().cloned());
        }

        // The keyed domain and every parent domain may carry rules.
        let mut suffix = host.as_str();
        loop {
            if let Some(rules) = self.suffix_rules.get(suffix) {
                matched.extend(rules.iter().cloned());
            }
            match suffix.split_once('.') {
                Some((_, rest)) if !rest.is_empty() => suffix = rest,
                _ => break,
            }
        }
        matched
    }
}
