//! Names of test components, for log output.

use std::collections::HashMap;
use tcx_types::ComponentRef;

/// Component reference → user-given name.
///
/// The first name seen for a reference sticks; later mentions (from
/// connect requests, status reports, ...) never rename it.
#[derive(Debug, Default)]
pub struct ComponentNames {
    names: HashMap<ComponentRef, String>,
}

impl ComponentNames {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records `name` for `component` unless it already has one.
    pub fn register(&mut self, component: ComponentRef, name: Option<&str>) {
        let Some(name) = name.filter(|n| !n.is_empty()) else {
            return;
        };
        self.names
            .entry(component)
            .or_insert_with(|| name.to_owned());
    }

    #[must_use]
    pub fn get(&self, component: ComponentRef) -> Option<&str> {
        self.names.get(&component).map(String::as_str)
    }

    /// `name(ref)` when named, the bare reference otherwise.
    #[must_use]
    pub fn describe(&self, component: ComponentRef) -> String {
        match self.get(component) {
            Some(name) => format!("{name}({component})"),
            None => component.to_string(),
        }
    }

    pub fn clear(&mut self) {
        self.names.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_name_wins() {
        let mut names = ComponentNames::new();
        let ptc = ComponentRef::new(7);
        names.register(ptc, Some("client"));
        names.register(ptc, Some("server"));
        assert_eq!(names.get(ptc), Some("client"));
        assert_eq!(names.describe(ptc), "client(7)");
    }

    #[test]
    fn empty_name_is_not_recorded() {
        let mut names = ComponentNames::new();
        let ptc = ComponentRef::new(7);
        names.register(ptc, Some(""));
        names.register(ptc, None);
        assert_eq!(names.get(ptc), None);
        assert_eq!(names.describe(ptc), "7");
    }
}
