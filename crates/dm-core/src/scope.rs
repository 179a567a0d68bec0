//! Closed scope set and the permission-string convention ("<scope>" /
//! "<scope>:w").

use std::fmt;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Scope {
    Undefined,
    Monitor,
    Operate,
    Config,
    Admin,
}

impl Scope {
    pub fn as_str(self) -> &'static str {
        match self {
            Scope::Undefined => "undefined",
            Scope::Monitor => "monitor",
            Scope::Operate => "operate",
            Scope::Config => "config",
            Scope::Admin => "admin",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "undefined" => Some(Scope::Undefined),
            "monitor" => Some(Scope::Monitor),
            "operate" => Some(Scope::Operate),
            "config" => Some(Scope::Config),
            "admin" => Some(Scope::Admin),
            _ => None,
        }
    }

    /// `"<scope>"` — the read permission string.
    pub fn read_perm(self) -> String {
        self.as_str().to_string()
    }

    /// `"<scope>:w"` — the write permission string.
    pub fn write_perm(self) -> String {
        format!("{}:w", self.as_str())
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn perm_strings() {
        assert_eq!(Scope::Admin.read_perm(), "admin");
        assert_eq!(Scope::Admin.write_perm(), "admin:w");
    }

    #[test]
    fn parse_round_trip() {
        for s in [
            Scope::Undefined,
            Scope::Monitor,
            Scope::Operate,
            Scope::Config,
            Scope::Admin,
        ] {
            assert_eq!(Scope::parse(s.as_str()), Some(s));
        }
        assert_eq!(Scope::parse("bogus"), None);
    }
}
