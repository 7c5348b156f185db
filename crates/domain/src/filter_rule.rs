/// A single filter rule matched against a hostname (or, for the
/// post-filter, an IP literal found in a response).
///
/// `ip` keeps the literal exactly as written in the rule so that the
/// blocking sentinels `[::]` and `[::1]` survive round-tripping.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilterRule {
    /// Rule text as it appeared in the list.
    pub text: String,
    /// Id of the list this rule came from.
    pub filter_id: i32,
    /// Target address for hosts-style rules; `None` for adblock-style.
    pub ip: Option<String>,
    /// Exception (`@@`) rules unblock instead of blocking.
    pub is_exception: bool,
}

impl FilterRule {
    pub fn adblock(text: impl Into<String>, filter_id: i32) -> Self {
        Self {
            text: text.into(),
            filter_id,
            ip: None,
            is_exception: false,
        }
    }

    pub fn hosts(text: impl Into<String>, filter_id: i32, ip: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            filter_id,
            ip: Some(ip.into()),
            is_exception: false,
        }
    }

    pub fn exception(text: impl Into<String>, filter_id: i32) -> Self {
        Self {
            text: text.into(),
            filter_id,
            ip: None,
            is_exception: true,
        }
    }
}

/// Address literals that mean "block this name" rather than "answer with
/// this address" when they appear in a hosts-style rule.
const BLOCKING_IPS: [&str; 6] = ["0.0.0.0", "127.0.0.1", "::", "::1", "[::]", "[::1]"];

pub fn is_blocking_ip(ip: &str) -> bool {
    BLOCKING_IPS.contains(&ip)
}

/// Reduce the matched candidates to the rules that decide the verdict.
///
/// An exception rule overrides everything and is returned alone. Otherwise
/// hosts-style rules aggregate (a name may resolve to several addresses),
/// and failing that the first adblock-style rule stands alone. Order of
/// the input is preserved; index 0 is the primary verdict.
pub fn effective_rules(candidates: &[FilterRule]) -> Vec<&FilterRule> {
    if let Some(exception) = candidates.iter().find(|r| r.is_exception) {
        return vec![exception];
    }

    let hosts: Vec<&FilterRule> = candidates.iter().filter(|r| r.ip.is_some()).collect();
    if !hosts.is_empty() {
        return hosts;
    }

    candidates.first().map(|r| vec![r]).unwrap_or_default()
}
