//! Name/id prefix resolution shared by every provider's `get_*` operations.

use crate::error::{Result, UnikitError};
use crate::types::Resolvable;

/// Resolves `query` against `items`.
///
/// An exact id match wins, then an exact name match. Otherwise every entity
/// whose id or name starts with `query` is a candidate; exactly one candidate
/// resolves, several are an `AmbiguousMatch` and none is `NotFound`.
pub fn resolve<T, I>(items: I, query: &str) -> Result<T>
where
    T: Resolvable,
    I: IntoIterator<Item = T>,
{
    if query.is_empty() {
        return Err(UnikitError::InvalidInput(format!(
            "{} name or id must not be empty",
            T::KIND
        )));
    }

    let mut exact_name = None;
    let mut candidates: Vec<T> = Vec::new();

    for item in items {
        if item.id() == query {
            return Ok(item);
        }
        if item.name() == query {
            if exact_name.is_none() {
                exact_name = Some(item);
            }
            continue;
        }
        if item.id().starts_with(query) || item.name().starts_with(query) {
            candidates.push(item);
        }
    }

    if let Some(item) = exact_name {
        return Ok(item);
    }

    match candidates.len() {
        0 => Err(UnikitError::not_found(T::KIND, query)),
        1 => Ok(candidates.remove(0)),
        _ => Err(UnikitError::AmbiguousMatch {
            entity: T::KIND,
            query: query.to_string(),
            matches: candidates
                .iter()
                .map(|c| format!("{} ({})", c.name(), c.id()))
                .collect(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{EntityKind, ErrorKind};

    #[derive(Debug, Clone)]
    struct Thing {
        id: String,
        name: String,
    }

    impl Resolvable for Thing {
        const KIND: EntityKind = EntityKind::Instance;

        fn id(&self) -> &str {
            &self.id
        }

        fn name(&self) -> &str {
            &self.name
        }
    }

    fn things() -> Vec<Thing> {
        vec![
            Thing {
                id: "a1b2c3".to_string(),
                name: "web-1".to_string(),
            },
            Thing {
                id: "d4e5f6".to_string(),
                name: "web-2".to_string(),
            },
            Thing {
                id: "a1ffff".to_string(),
                name: "db".to_string(),
            },
        ]
    }

    #[test]
    fn test_shared_prefix_is_ambiguous() {
        let err = resolve(things(), "web-").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::AmbiguousMatch);
    }

    #[test]
    fn test_full_name_resolves() {
        let thing = resolve(things(), "web-1").unwrap();
        assert_eq!(thing.id, "a1b2c3");
    }

    #[test]
    fn test_id_prefix_resolves() {
        let thing = resolve(things(), "d4").unwrap();
        assert_eq!(thing.name, "web-2");

        let err = resolve(things(), "a1").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::AmbiguousMatch);
    }

    #[test]
    fn test_exact_name_beats_longer_names() {
        let mut items = things();
        items.push(Thing {
            id: "999999".to_string(),
            name: "web-10".to_string(),
        });
        let thing = resolve(items, "web-1").unwrap();
        assert_eq!(thing.id, "a1b2c3");
    }

    #[test]
    fn test_missing_and_empty_queries() {
        assert_eq!(
            resolve(things(), "zzz").unwrap_err().kind(),
            ErrorKind::NotFound
        );
        assert_eq!(
            resolve(things(), "").unwrap_err().kind(),
            ErrorKind::InvalidInput
        );
    }
}
