//! Service registry and URL normalization (spec §4.2, §9 "a small static
//! mapping plus an ordered rewrite-rule list; extensible by config, not by
//! inheritance").
//!
//! Incoming `/api/v1/{segment}/...` paths are matched, in order, against a
//! small list of rewrite rules for nested resources first (e.g.
//! `wallets/{id}/transactions`, which belongs to the transaction service
//! even though its first segment is `wallets`). If no rule matches, the
//! first path segment is looked up in a static segment table.
//!
//! Alias segments (`auth`, `users`, `wallets`, `transactions`, `accounts`,
//! `journal-entries`, `check-permission`) forward the request path
//! untouched — the backend itself is written to expect the externally
//! documented `/api/v1/...` shape. Non-alias segments (`identity`,
//! `wallet`, `transaction`) are the same services' internal/raw surface:
//! the matched segment is stripped before forwarding, so `/api/v1/wallet/5`
//! reaches the wallet service as `/5`.

use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Service {
    Identity,
    Wallet,
    Transaction,
    Ledger,
    Rbac,
}

impl Service {
    #[must_use]
    pub fn env_var(self) -> &'static str {
        match self {
            Service::Identity => "IDENTITY_SERVICE_URL",
            Service::Wallet => "WALLET_SERVICE_URL",
            Service::Transaction => "TRANSACTION_SERVICE_URL",
            Service::Ledger => "LEDGER_SERVICE_URL",
            Service::Rbac => "RBAC_SERVICE_URL",
        }
    }
}

struct SegmentRoute {
    service: Service,
    /// Alias segments preserve the full request path; non-alias segments
    /// have the matched segment stripped before forwarding.
    alias: bool,
}

struct RewriteRule {
    matches: fn(&str) -> bool,
    service: Service,
}

/// Matches `/api/v1/wallets/{id}/transactions` and anything nested under it.
fn matches_wallet_transactions(path: &str) -> bool {
    let mut parts = path.trim_start_matches('/').split('/');
    parts.next() == Some("api")
        && parts.next() == Some("v1")
        && parts.next() == Some("wallets")
        && parts.next().is_some_and(|segment| !segment.is_empty())
        && parts.next() == Some("transactions")
}

/// Matches `/api/v1/journal-entries/{id}/post|void|reverse` exactly, no
/// trailing segments.
fn matches_journal_entry_transition(path: &str) -> bool {
    let mut parts = path.trim_start_matches('/').split('/');
    let prefix_matches = parts.next() == Some("api")
        && parts.next() == Some("v1")
        && parts.next() == Some("journal-entries")
        && parts.next().is_some_and(|segment| !segment.is_empty());
    prefix_matches && matches!(parts.next(), Some("post" | "void" | "reverse")) && parts.next().is_none()
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteTarget {
    pub service: Service,
    pub forward_path: String,
}

pub struct ServiceRegistry {
    rewrite_rules: Vec<RewriteRule>,
    segments: HashMap<&'static str, SegmentRoute>,
}

impl ServiceRegistry {
    /// Builds the fixed ordered rewrite-rule list and the static segment
    /// table (spec §9: "extensible by config, not by inheritance" — both
    /// are plain data, not a trait-object plugin system).
    #[must_use]
    pub fn new() -> Self {
        let rewrite_rules = vec![
            RewriteRule { matches: matches_wallet_transactions, service: Service::Transaction },
            RewriteRule { matches: matches_journal_entry_transition, service: Service::Ledger },
        ];

        let mut segments = HashMap::new();
        segments.insert("auth", SegmentRoute { service: Service::Identity, alias: true });
        segments.insert("users", SegmentRoute { service: Service::Identity, alias: true });
        segments.insert("wallets", SegmentRoute { service: Service::Wallet, alias: true });
        segments.insert("transactions", SegmentRoute { service: Service::Transaction, alias: true });
        segments.insert("accounts", SegmentRoute { service: Service::Ledger, alias: true });
        segments.insert("journal-entries", SegmentRoute { service: Service::Ledger, alias: true });
        segments.insert("check-permission", SegmentRoute { service: Service::Rbac, alias: true });
        segments.insert("identity", SegmentRoute { service: Service::Identity, alias: false });
        segments.insert("wallet", SegmentRoute { service: Service::Wallet, alias: false });
        segments.insert("transaction", SegmentRoute { service: Service::Transaction, alias: false });

        Self { rewrite_rules, segments }
    }

    /// Resolves an incoming request path to a backend service and the path
    /// to forward, or `None` if nothing matches.
    #[must_use]
    pub fn resolve(&self, path: &str) -> Option<RouteTarget> {
        for rule in &self.rewrite_rules {
            if (rule.matches)(path) {
                return Some(RouteTarget {
                    service: rule.service,
                    forward_path: path.to_string(),
                });
            }
        }

        let mut parts = path.trim_start_matches('/').split('/');
        if parts.next() != Some("api") || parts.next() != Some("v1") {
            return None;
        }
        let segment = parts.next()?;
        let route = self.segments.get(segment)?;

        let forward_path = if route.alias {
            path.to_string()
        } else {
            let rest: Vec<&str> = parts.collect();
            format!("/{}", rest.join("/"))
        };
        Some(RouteTarget { service: route.service, forward_path })
    }
}

impl Default for ServiceRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn nested_wallet_transactions_overrides_the_wallets_alias() {
        let registry = ServiceRegistry::new();
        let target = registry.resolve("/api/v1/wallets/abc-123/transactions").expect("matches");
        assert_eq!(target.service, Service::Transaction);
        assert_eq!(target.forward_path, "/api/v1/wallets/abc-123/transactions");
    }

    #[test]
    fn alias_segment_preserves_full_path() {
        let registry = ServiceRegistry::new();
        let target = registry.resolve("/api/v1/wallets/abc-123/balance").expect("matches");
        assert_eq!(target.service, Service::Wallet);
        assert_eq!(target.forward_path, "/api/v1/wallets/abc-123/balance");
    }

    #[test]
    fn non_alias_segment_is_stripped() {
        let registry = ServiceRegistry::new();
        let target = registry.resolve("/api/v1/identity/users/5").expect("matches");
        assert_eq!(target.service, Service::Identity);
        assert_eq!(target.forward_path, "/users/5");
    }

    #[test]
    fn unknown_segment_resolves_to_none() {
        let registry = ServiceRegistry::new();
        assert!(registry.resolve("/api/v1/unknown-thing").is_none());
    }

    #[test]
    fn journal_entry_transition_routes_to_ledger() {
        let registry = ServiceRegistry::new();
        let target = registry.resolve("/api/v1/journal-entries/je-1/post").expect("matches");
        assert_eq!(target.service, Service::Ledger);
    }
}
