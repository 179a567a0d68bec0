//! Grouped navigation hints for a device's UI layer.
//!
//! Menus carry no authorization of their own — they are pure presentation
//! metadata over oids the client must still separately have read access to
//! — and are only serialized by the device serializer at the `Full` detail
//! level (`dm_proto::DetailLevel::Full`).

use std::collections::HashMap;

/// One named group of param oids within a [`MenuGroup`].
#[derive(Clone, Debug)]
pub struct Menu {
    pub name: String,
    pub param_oids: Vec<String>,
    pub hidden: bool,
}

impl Menu {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            param_oids: Vec::new(),
            hidden: false,
        }
    }

    pub fn with_oids(mut self, oids: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.param_oids = oids.into_iter().map(Into::into).collect();
        self
    }

    pub fn hidden(mut self, hidden: bool) -> Self {
        self.hidden = hidden;
        self
    }
}

/// `{id, name, menus}` — one top-level menu group identified by `id`.
#[derive(Clone, Debug)]
pub struct MenuGroup {
    pub id: String,
    pub name: String,
    pub menus: HashMap<String, Menu>,
}

impl MenuGroup {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            menus: HashMap::new(),
        }
    }

    pub fn with_menu(mut self, key: impl Into<String>, menu: Menu) -> Self {
        self.menus.insert(key.into(), menu);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_collects_oids_and_keys_menus_by_name() {
        let group = MenuGroup::new("main", "Main Menu").with_menu(
            "settings",
            Menu::new("Settings").with_oids(["/a", "/b"]).hidden(false),
        );
        assert_eq!(group.id, "main");
        let settings = group.menus.get("settings").unwrap();
        assert_eq!(settings.param_oids, vec!["/a".to_string(), "/b".to_string()]);
        assert!(!settings.hidden);
    }
}
