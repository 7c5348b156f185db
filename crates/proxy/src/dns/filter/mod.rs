//! Rule matching behind the forwarder's pre- and post-filters. The
//! forwarder only depends on the [`RuleMatcher`] contract; [`ListMatcher`]
//! is the built-in list-backed implementation.

pub mod list;

pub use list::ListMatcher;

use warden_dns_domain::FilterRule;

/// Returns every rule matching a hostname (or an IP literal, for the
/// response post-filter). Verdict resolution happens elsewhere; matchers
/// report candidates only.
pub trait RuleMatcher: Send + Sync {
    fn match_hostname(&self, hostname: &str) -> Vec<FilterRule>;
}
