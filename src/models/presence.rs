use serde::{Deserialize, Serialize};

/// One active user in a document room.
///
/// Derived from the authenticated identity attached to the connection;
/// its lifecycle mirrors the user's session in the room.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PresenceEntry {
    pub user_id: String,
    pub name: String,
    pub initials: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub avatar: Option<String>,
}

impl PresenceEntry {
    /// Derive display initials from a name: first letter of the first
    /// two words, uppercased.
    pub fn initials_from_name(name: &str) -> String {
        name.split_whitespace()
            .take(2)
            .filter_map(|word| word.chars().next())
            .flat_map(|c| c.to_uppercase())
            .collect()
    }
}

/// Viewport-relative caret geometry plus an optional selection region.
///
/// Coordinates are captured relative to the sender's scrollable editing
/// container at broadcast time, not absolute document coordinates.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CursorPosition {
    pub x: f64,
    pub y: f64,
    pub height: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub selection: Option<SelectionRegion>,
}

/// A selection is either a single bounding rectangle (preferred) or a
/// pair of endpoint coordinates when range geometry is unavailable.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(untagged)]
pub enum SelectionRegion {
    #[serde(rename_all = "camelCase")]
    Rect {
        x: f64,
        y: f64,
        width: f64,
        height: f64,
    },
    #[serde(rename_all = "camelCase")]
    Endpoints {
        from_x: f64,
        from_y: f64,
        to_x: f64,
        to_y: f64,
    },
}
