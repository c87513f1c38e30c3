//! Shared plumbing for the observable collections.

use std::sync::atomic::{AtomicBool, Ordering};

/// Holds a collection's "refresh in progress" flag for the length of a refresh.
///
/// A second refresh while the flag is held is dropped unless forced; a
/// forced refresh runs alongside and leaves the flag to its owner.
pub(crate) struct RefreshGuard<'a> {
    flag: &'a AtomicBool,
    owned: bool,
}

impl<'a> RefreshGuard<'a> {
    pub(crate) fn acquire(flag: &'a AtomicBool, force: bool) -> Option<Self> {
        let owned = flag
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok();
        (owned || force).then_some(Self { flag, owned })
    }
}

impl Drop for RefreshGuard<'_> {
    fn drop(&mut self) {
        if self.owned {
            self.flag.store(false, Ordering::Release);
        }
    }
}

/// Substring match used by the `by_partial_name` queries.
pub(crate) fn name_matches(name: &str, search: &str, case_sensitive: bool, partial: bool) -> bool {
    if case_sensitive {
        if partial { name.contains(search) } else { name == search }
    } else {
        let (name, search) = (name.to_lowercase(), search.to_lowercase());
        if partial { name.contains(&search) } else { name == search }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_refresh_is_dropped_unless_forced() {
        let flag = AtomicBool::new(false);
        let first = RefreshGuard::acquire(&flag, false);
        assert!(first.is_some());
        assert!(RefreshGuard::acquire(&flag, false).is_none());

        let forced = RefreshGuard::acquire(&flag, true);
        assert!(forced.is_some());
        drop(forced);
        assert!(flag.load(Ordering::Acquire), "forced refresh must not clear the owner's flag");

        drop(first);
        assert!(!flag.load(Ordering::Acquire));
    }

    #[test]
    fn name_matching_modes() {
        assert!(name_matches("Gordon", "gordon", false, false));
        assert!(!name_matches("Gordon", "gordon", true, false));
        assert!(name_matches("Gordon Freeman", "free", false, true));
        assert!(!name_matches("Gordon Freeman", "free", true, true));
    }
}
