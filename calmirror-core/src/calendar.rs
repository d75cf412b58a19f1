//! Calendars as listed by the upstream service.

use std::fmt;

use serde::{Deserialize, Serialize};

fn default_timezone() -> String {
    "UTC".to_string()
}

/// An upstream calendar. The `id` is assigned upstream and never changes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Calendar {
    pub id: String,
    pub name: String,
    pub description: Option<String>,
    #[serde(default = "default_timezone")]
    pub timezone: String,
    /// Hex background color, e.g. `#039be5`
    pub color: Option<String>,
    pub foreground_color: Option<String>,
    #[serde(default)]
    pub is_primary: bool,
    #[serde(default)]
    pub is_owned_by_user: bool,
    #[serde(default)]
    pub read_only: bool,
    pub grant_id: String,
}

impl Calendar {
    /// Pick the account's primary calendar: primary and owned by the user,
    /// otherwise the first one listed.
    pub fn primary_of(calendars: &[Calendar]) -> Option<&Calendar> {
        calendars
            .iter()
            .find(|c| c.is_primary && c.is_owned_by_user)
            .or_else(|| calendars.first())
    }
}

impl fmt::Display for Calendar {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn calendar(id: &str, is_primary: bool, is_owned_by_user: bool) -> Calendar {
        Calendar {
            id: id.to_string(),
            name: id.to_string(),
            description: None,
            timezone: default_timezone(),
            color: None,
            foreground_color: None,
            is_primary,
            is_owned_by_user,
            read_only: false,
            grant_id: "grant".to_string(),
        }
    }

    #[test]
    fn test_primary_requires_ownership() {
        let calendars = vec![
            calendar("shared", true, false),
            calendar("work", false, true),
            calendar("personal", true, true),
        ];
        assert_eq!(Calendar::primary_of(&calendars).unwrap().id, "personal");
    }

    #[test]
    fn test_primary_falls_back_to_first() {
        let calendars = vec![calendar("a", false, true), calendar("b", true, false)];
        assert_eq!(Calendar::primary_of(&calendars).unwrap().id, "a");
        assert!(Calendar::primary_of(&[]).is_none());
    }
}
