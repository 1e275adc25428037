//! Composable boolean predicates over events.

use std::collections::HashSet;
use std::sync::Arc;

use ch_client::{Event, event_type};
use regex::Regex;

/// A predicate over events.
pub trait Filter: Send + Sync + 'static {
    fn check(&self, event: &Event) -> bool;
}

/// A cheap-to-clone filter handle with combinators.
///
/// `and`/`or` short-circuit; `xor` evaluates both sides.
#[derive(Clone)]
pub struct FilterBox(Arc<dyn Filter>);

impl FilterBox {
    pub fn new<F: Filter>(filter: F) -> Self {
        FilterBox(Arc::new(filter))
    }

    pub fn check(&self, event: &Event) -> bool {
        self.0.check(event)
    }

    pub fn and(self, other: FilterBox) -> FilterBox {
        FilterBox::new(And(self, other))
    }

    pub fn or(self, other: FilterBox) -> FilterBox {
        FilterBox::new(Or(self, other))
    }

    pub fn xor(self, other: FilterBox) -> FilterBox {
        FilterBox::new(Xor(self, other))
    }

    #[allow(clippy::should_implement_trait)]
    pub fn not(self) -> FilterBox {
        FilterBox::new(Not(self))
    }
}

impl Filter for FilterBox {
    fn check(&self, event: &Event) -> bool {
        self.0.check(event)
    }
}

struct And(FilterBox, FilterBox);

impl Filter for And {
    fn check(&self, event: &Event) -> bool {
        self.0.check(event) && self.1.check(event)
    }
}

struct Or(FilterBox, FilterBox);

impl Filter for Or {
    fn check(&self, event: &Event) -> bool {
        self.0.check(event) || self.1.check(event)
    }
}

struct Xor(FilterBox, FilterBox);

impl Filter for Xor {
    fn check(&self, event: &Event) -> bool {
        self.0.check(event) != self.1.check(event)
    }
}

struct Not(FilterBox);

impl Filter for Not {
    fn check(&self, event: &Event) -> bool {
        !self.0.check(event)
    }
}

/// Matches events whose user name is in the set, case-insensitively.
pub struct UserFilter {
    names: HashSet<String>,
}

impl UserFilter {
    pub fn new<I, S>(names: I) -> FilterBox
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        FilterBox::new(UserFilter {
            names: names
                .into_iter()
                .map(|n| n.as_ref().to_lowercase())
                .collect(),
        })
    }
}

impl Filter for UserFilter {
    fn check(&self, event: &Event) -> bool {
        event
            .user()
            .is_some_and(|u| self.names.contains(&u.name.to_lowercase()))
    }
}

/// Matches events from one of the named group rooms.
pub struct ChatFilter {
    names: HashSet<String>,
}

impl ChatFilter {
    pub fn new<I, S>(names: I) -> FilterBox
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        FilterBox::new(ChatFilter {
            names: names
                .into_iter()
                .map(|n| n.as_ref().to_lowercase())
                .collect(),
        })
    }
}

impl Filter for ChatFilter {
    fn check(&self, event: &Event) -> bool {
        event
            .group()
            .is_some_and(|g| self.names.contains(g.name()))
    }
}

/// Matches group messages whose plain text matches the pattern.
pub struct RegexFilter {
    re: Regex,
}

impl RegexFilter {
    pub fn new(pattern: &str) -> Result<FilterBox, regex::Error> {
        Ok(FilterBox::new(RegexFilter {
            re: Regex::new(pattern)?,
        }))
    }
}

impl Filter for RegexFilter {
    fn check(&self, event: &Event) -> bool {
        event.kind() == event_type::MESSAGE
            && event.message().is_some_and(|m| self.re.is_match(&m.text))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Filters with fixed truth values, for checking the algebra alone.
    struct Const(bool);

    impl Filter for Const {
        fn check(&self, _event: &Event) -> bool {
            self.0
        }
    }

    fn boxed(b: bool) -> FilterBox {
        FilterBox::new(Const(b))
    }

    fn any_event() -> Event {
        Event::Error {
            original: None,
            message: String::new(),
        }
    }

    #[test]
    fn algebra_truth_tables() {
        let e = any_event();
        for a in [false, true] {
            for b in [false, true] {
                assert_eq!(boxed(a).and(boxed(b)).check(&e), a && b);
                assert_eq!(boxed(a).or(boxed(b)).check(&e), a || b);
                assert_eq!(boxed(a).xor(boxed(b)).check(&e), a != b);
            }
            assert_eq!(boxed(a).not().check(&e), !a);
        }
    }

    #[test]
    fn composed_expressions_nest() {
        let e = any_event();
        // (T and not F) xor F == T
        let expr = boxed(true).and(boxed(false).not()).xor(boxed(false));
        assert!(expr.check(&e));
    }

    #[test]
    fn user_filter_ignores_events_without_users() {
        let f = UserFilter::new(["Alice"]);
        assert!(!f.check(&any_event()));
    }
}
