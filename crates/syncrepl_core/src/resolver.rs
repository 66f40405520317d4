//! Search-definition conflict resolution.

use crate::url::{UrlDescriptor, UrlError};

/// What to do with a requested descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    /// Nothing is stored: record the requested descriptor and start fresh.
    Adopt,
    /// The stored descriptor matches: resume with the stored cookie.
    Proceed,
}

/// Decides whether a mirror can serve the requested search.
///
/// Attribute lists are compared in order and never merged; scope is never
/// widened. Any difference is a conflict and the caller decides what to do
/// with the existing mirror.
///
/// # Errors
///
/// Returns [`UrlError::Conflict`] carrying both descriptors and the fields
/// that differ.
pub fn resolve(
    stored: Option<&UrlDescriptor>,
    requested: &UrlDescriptor,
) -> Result<Resolution, UrlError> {
    let Some(stored) = stored else {
        return Ok(Resolution::Adopt);
    };

    let fields = stored.differing_fields(requested);
    if fields.is_empty() {
        return Ok(Resolution::Proceed);
    }

    Err(UrlError::Conflict {
        current: Box::new(stored.clone()),
        requested: Box::new(requested.clone()),
        fields,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::url::{DescriptorField, LdapUrl, Scope};

    fn people(scope: Scope) -> UrlDescriptor {
        UrlDescriptor::new("ou=People,dc=example,dc=com", scope, "(objectClass=*)", ["uid", "cn"])
    }

    #[test]
    fn nothing_stored_adopts() {
        assert_eq!(resolve(None, &people(Scope::Subtree)).unwrap(), Resolution::Adopt);
    }

    #[test]
    fn identical_proceeds() {
        let d = people(Scope::Subtree);
        assert_eq!(resolve(Some(&d), &d.clone()).unwrap(), Resolution::Proceed);
    }

    #[test]
    fn parsed_url_matches_constructed_descriptor() {
        let url = LdapUrl::parse("ldap://h/ou=People,dc=example,dc=com?uid,cn?sub").unwrap();
        let stored = people(Scope::Subtree);
        assert_eq!(resolve(Some(&stored), url.descriptor()).unwrap(), Resolution::Proceed);
    }

    #[test]
    fn scope_change_conflicts_with_both_descriptors() {
        let stored = people(Scope::Subtree);
        let requested = people(Scope::One);

        match resolve(Some(&stored), &requested) {
            Err(UrlError::Conflict {
                current,
                requested: req,
                fields,
            }) => {
                assert_eq!(*current, stored);
                assert_eq!(*req, requested);
                assert_eq!(fields, vec![DescriptorField::Scope]);
            }
            other => panic!("expected conflict, got {other:?}"),
        }
    }

    #[test]
    fn attribute_order_matters() {
        let stored = people(Scope::Subtree);
        let reordered = UrlDescriptor::new(
            "ou=People,dc=example,dc=com",
            Scope::Subtree,
            "(objectClass=*)",
            ["cn", "uid"],
        );
        assert!(resolve(Some(&stored), &reordered).is_err());
    }

    #[test]
    fn attribute_superset_is_not_merged() {
        let stored = people(Scope::Subtree);
        let wider = UrlDescriptor::new(
            "ou=People,dc=example,dc=com",
            Scope::Subtree,
            "(objectClass=*)",
            ["uid", "cn", "mail"],
        );
        match resolve(Some(&stored), &wider) {
            Err(UrlError::Conflict { fields, .. }) => {
                assert_eq!(fields, vec![DescriptorField::Attributes]);
            }
            other => panic!("expected conflict, got {other:?}"),
        }
    }
}
