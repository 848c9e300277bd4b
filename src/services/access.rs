//! Access resolution.
//!
//! Given (principal, entity, requested source) the resolver picks the single
//! lease that covers the request:
//!
//! 1. No active leases: deny.
//! 2. No lease for the entity: deny, listing the entities that do have one.
//! 3. With a requested source: an exact specifier match wins, then `global`.
//! 4. Without one: only a `global` lease qualifies. A source-scoped lease
//!    never grants unscoped access.
//!
//! Leases arrive newest-created first, so within a tier the most recently
//! created lease wins.

use super::LeaseManager;
use crate::models::{Lease, Principal};
use crate::Result;
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::instrument;

/// Outcome of access resolution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AccessDecision {
    /// The lease covering the request.
    Granted(Lease),
    /// Human-readable reason listing the available alternatives.
    Denied(String),
}

impl AccessDecision {
    /// Returns the granted lease, if any.
    #[must_use]
    pub const fn lease(&self) -> Option<&Lease> {
        match self {
            Self::Granted(lease) => Some(lease),
            Self::Denied(_) => None,
        }
    }
}

/// Picks the lease covering a request, in order of precedence.
///
/// `leases` must already be filtered to active leases and ordered by
/// preference.
#[must_use]
pub fn resolve_among(
    leases: &[Lease],
    entity: &str,
    requested_source: Option<&str>,
) -> AccessDecision {
    if leases.is_empty() {
        return AccessDecision::Denied("no active leases".to_string());
    }

    let for_entity: Vec<&Lease> = leases.iter().filter(|l| l.entity == entity).collect();
    if for_entity.is_empty() {
        let entities = sorted_unique(leases.iter().map(|l| l.entity.as_str()));
        return AccessDecision::Denied(format!(
            "no lease for entity '{entity}'; leases exist for: {entities}"
        ));
    }

    let exact = requested_source
        .and_then(|source| for_entity.iter().find(|l| l.access_specifier.as_str() == source));
    let chosen = exact.or_else(|| for_entity.iter().find(|l| l.access_specifier.is_global()));
    if let Some(lease) = chosen {
        return AccessDecision::Granted((*lease).clone());
    }

    let specifiers = sorted_unique(for_entity.iter().map(|l| l.access_specifier.as_str()));
    let reason = requested_source.map_or_else(
        || format!("entity '{entity}' has no global lease; available access: {specifiers}"),
        |source| {
            format!(
                "entity '{entity}' cannot access source '{source}'; \
                 available access: {specifiers}"
            )
        },
    );
    AccessDecision::Denied(reason)
}

fn sorted_unique<'a>(items: impl Iterator<Item = &'a str>) -> String {
    items.collect::<BTreeSet<_>>().into_iter().collect::<Vec<_>>().join(", ")
}

/// Resolves requests against a principal's active leases.
pub struct AccessResolver {
    leases: Arc<LeaseManager>,
}

impl AccessResolver {
    /// Creates a resolver reading through the lease manager.
    #[must_use]
    pub const fn new(leases: Arc<LeaseManager>) -> Self {
        Self { leases }
    }

    /// Resolves `(principal, entity, requested_source)` to a lease.
    ///
    /// # Errors
    ///
    /// Returns an error only if the leases cannot be loaded; denials are
    /// [`AccessDecision::Denied`].
    #[instrument(skip(self), fields(operation = "resolve_access", principal = %principal))]
    pub fn resolve(
        &self,
        principal: &Principal,
        entity: &str,
        requested_source: Option<&str>,
    ) -> Result<AccessDecision> {
        let leases = self.leases.list_active_leases(principal)?;
        let decision = resolve_among(&leases, entity, requested_source);
        match &decision {
            AccessDecision::Granted(lease) => {
                tracing::debug!(
                    lease.id = %lease.id,
                    access = %lease.access_specifier,
                    "Access resolved"
                );
            },
            AccessDecision::Denied(reason) => {
                tracing::debug!(reason = %reason, "Access denied");
            },
        }
        Ok(decision)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{AccessSpecifier, LeaseId};
    use test_case::test_case;

    fn lease(id: &str, entity: &str, spec: &str) -> Lease {
        Lease {
            id: LeaseId::new(id),
            principal: Principal::parse("0xabc").unwrap(),
            entity: entity.to_string(),
            access_specifier: AccessSpecifier::parse(spec).unwrap(),
            created_at: 0,
            expires_at: u64::MAX,
            revoked: false,
            revoked_at: None,
            creation_tx: String::new(),
            revocation_tx: None,
        }
    }

    fn granted_id(decision: &AccessDecision) -> Option<&str> {
        decision.lease().map(|l| l.id.as_str())
    }

    fn reason(decision: AccessDecision) -> String {
        match decision {
            AccessDecision::Denied(reason) => reason,
            AccessDecision::Granted(lease) => format!("unexpectedly granted {}", lease.id),
        }
    }

    #[test_case(&[("g", "E", "global"), ("s", "E", "S")], "E", Some("S"), Some("s") ; "exact source beats global")]
    #[test_case(&[("s", "E", "S"), ("g", "E", "global")], "E", Some("S"), Some("s") ; "exact source beats global in any order")]
    #[test_case(&[("g", "E", "global"), ("s", "E", "S")], "E", Some("T"), Some("g") ; "global covers other sources")]
    #[test_case(&[("g", "E", "global"), ("s", "E", "S")], "E", None, Some("g") ; "unscoped request takes global")]
    #[test_case(&[("s", "E", "S")], "E", None, None ; "no global bleed through")]
    #[test_case(&[("s", "E", "S")], "E", Some("T"), None ; "wrong source denied")]
    #[test_case(&[("g", "F", "global")], "E", None, None ; "other entity denied")]
    #[test_case(&[("g1", "E", "global"), ("g2", "E", "global")], "E", None, Some("g1") ; "first in order wins ties")]
    fn test_precedence(
        leases: &[(&str, &str, &str)],
        entity: &str,
        source: Option<&str>,
        expected: Option<&str>,
    ) {
        let leases: Vec<Lease> = leases.iter().map(|(id, e, s)| lease(id, e, s)).collect();
        let decision = resolve_among(&leases, entity, source);
        assert_eq!(granted_id(&decision), expected);
    }

    #[test]
    fn test_no_leases_reason() {
        assert_eq!(
            resolve_among(&[], "E", None),
            AccessDecision::Denied("no active leases".to_string())
        );
    }

    #[test]
    fn test_wrong_entity_lists_alternatives() {
        let leases = vec![
            lease("1", "zeta", "global"),
            lease("2", "alpha", "S"),
            lease("3", "zeta", "S"),
        ];
        let denied = reason(resolve_among(&leases, "E", None));
        assert!(denied.contains("leases exist for: alpha, zeta"), "{denied}");
    }

    #[test]
    fn test_wrong_source_lists_specifiers() {
        let leases = vec![lease("1", "E", "notion"), lease("2", "E", "claude")];
        let scoped = reason(resolve_among(&leases, "E", Some("gmail")));
        assert!(scoped.contains("cannot access source 'gmail'"), "{scoped}");
        assert!(scoped.contains("available access: claude, notion"), "{scoped}");

        let unscoped = reason(resolve_among(&leases, "E", None));
        assert!(unscoped.contains("no global lease"), "{unscoped}");
        assert!(unscoped.contains("available access: claude, notion"), "{unscoped}");
    }
}
