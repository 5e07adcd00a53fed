// src/body.rs - Typed limb identity, parsed once at ingestion
use std::collections::HashMap;
use std::fmt;

use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Side {
    Left,
    Right,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Leg {
    Front,
    Mid,
    Hind,
}

impl Side {
    pub const ALL: [Side; 2] = [Side::Right, Side::Left];

    pub fn from_code(c: char) -> Option<Self> {
        match c {
            'L' => Some(Side::Left),
            'R' => Some(Side::Right),
            _ => None,
        }
    }

    pub fn code(self) -> char {
        match self {
            Side::Left => 'L',
            Side::Right => 'R',
        }
    }
}

impl Leg {
    pub const ALL: [Leg; 3] = [Leg::Front, Leg::Mid, Leg::Hind];

    /// Angle channels number legs 1..=3 front to back.
    pub fn from_number(c: char) -> Option<Self> {
        match c {
            '1' => Some(Leg::Front),
            '2' => Some(Leg::Mid),
            '3' => Some(Leg::Hind),
            _ => None,
        }
    }

    /// Coordinate columns name legs F/M/H.
    pub fn from_code(s: &str) -> Option<Self> {
        match s {
            "F" => Some(Leg::Front),
            "M" => Some(Leg::Mid),
            "H" => Some(Leg::Hind),
            _ => None,
        }
    }

    pub fn number(self) -> u8 {
        match self {
            Leg::Front => 1,
            Leg::Mid => 2,
            Leg::Hind => 3,
        }
    }

    pub fn code(self) -> &'static str {
        match self {
            Leg::Front => "F",
            Leg::Mid => "M",
            Leg::Hind => "H",
        }
    }
}

/// A tracked 3D joint such as `R-F-TiTa`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BodyPartKey {
    pub side: Side,
    pub leg: Leg,
    pub joint: String,
}

impl BodyPartKey {
    pub fn new(side: Side, leg: Leg, joint: impl Into<String>) -> Self {
        Self {
            side,
            leg,
            joint: joint.into(),
        }
    }

    /// Parses `{L|R}-{F|M|H}-{joint}`. Parts outside the legs (antennae,
    /// wing hinges, notum) return `None`.
    pub fn parse(label: &str) -> Option<Self> {
        let mut pieces = label.splitn(3, '-');
        let side = pieces.next()?;
        let leg = pieces.next()?;
        let joint = pieces.next()?;
        if side.len() != 1 || joint.is_empty() {
            return None;
        }
        Some(Self {
            side: Side::from_code(side.chars().next()?)?,
            leg: Leg::from_code(leg)?,
            joint: joint.to_string(),
        })
    }
}

impl fmt::Display for BodyPartKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}-{}", self.side.code(), self.leg.code(), self.joint)
    }
}

/// Identity carried by an angle channel name such as `R1D_flex`:
/// side, leg number, joint letter (A..D proximal to distal) and degree of freedom.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ChannelKey {
    pub side: Side,
    pub leg: Leg,
    pub joint: char,
    pub dof: String,
}

impl ChannelKey {
    pub fn parse(name: &str) -> Option<Self> {
        let (head, dof) = name.split_once('_')?;
        let mut chars = head.chars();
        let side = Side::from_code(chars.next()?)?;
        let leg = Leg::from_number(chars.next()?)?;
        let joint = chars.next()?;
        if chars.next().is_some() || !joint.is_ascii_uppercase() || dof.is_empty() {
            return None;
        }
        Some(Self {
            side,
            leg,
            joint,
            dof: dof.to_string(),
        })
    }
}

/// Angle channel name to the body part it describes.
static NAMING_CONVERSIONS: Lazy<HashMap<String, String>> = Lazy::new(|| {
    let joints = [
        ('A', "ThC", &["flex", "rot", "abduct"][..]),
        ('B', "CTr", &["flex", "rot"][..]),
        ('C', "FTi", &["flex", "rot"][..]),
        ('D', "TaG", &["flex"][..]),
    ];
    let mut map = HashMap::new();
    for side in Side::ALL {
        for leg in Leg::ALL {
            for (letter, part, dofs) in joints {
                for dof in dofs {
                    let channel = format!("{}{}{}_{}", side.code(), leg.number(), letter, dof);
                    let body_part = format!("{}-{}-{}", side.code(), leg.code(), part);
                    map.insert(channel, body_part);
                }
            }
        }
    }
    map
});

/// Body part label to the cameras that see it, in preference order.
static CAMERAS: Lazy<HashMap<&'static str, &'static [&'static str]>> = Lazy::new(|| {
    let mut map: HashMap<&'static str, &'static [&'static str]> = HashMap::new();
    let table: [(&'static str, &'static [&'static str]); 35] = [
        ("R-F-ThC", &["A", "B"]),
        ("R-F-CTr", &["A", "B", "H"]),
        ("R-F-FTi", &["A", "B", "H"]),
        ("R-F-TiTa", &["A", "B", "H"]),
        ("R-F-TaG", &["A", "B", "H"]),
        ("R-M-ThC", &["A", "B"]),
        ("R-M-CTr", &["A", "B", "H"]),
        ("R-M-FTi", &["A", "B", "H"]),
        ("R-M-TiTa", &["A", "B", "H"]),
        ("R-M-TaG", &["A", "B", "H"]),
        ("R-H-ThC", &["A", "C"]),
        ("R-H-CTr", &["A", "C"]),
        ("R-H-FTi", &["A", "C"]),
        ("R-H-TiTa", &["A", "C"]),
        ("R-H-TaG", &["A", "C"]),
        ("L-F-ThC", &["D", "E"]),
        ("L-F-CTr", &["D", "E", "H"]),
        ("L-F-FTi", &["D", "E", "H"]),
        ("L-F-TiTa", &["D", "E", "H"]),
        ("L-F-TaG", &["D", "E", "H"]),
        ("L-M-ThC", &["D", "F"]),
        ("L-M-CTr", &["D", "F"]),
        ("L-M-FTi", &["D", "F"]),
        ("L-M-TiTa", &["D", "F"]),
        ("L-M-TaG", &["D", "F"]),
        ("L-H-ThC", &["D", "F"]),
        ("L-H-CTr", &["D", "F"]),
        ("L-H-FTi", &["D", "F"]),
        ("L-H-TiTa", &["D", "F"]),
        ("L-H-TaG", &["D", "F"]),
        ("L-WH", &["D", "E"]),
        ("R-WH", &["A", "B"]),
        ("R-antenna", &["A", "H"]),
        ("L-antenna", &["D", "H"]),
        ("Notum", &["A", "D", "B", "E"]),
    ];
    for (part, cams) in table {
        map.insert(part, cams);
    }
    map
});

/// Body part an angle channel belongs to, or the name itself when it is
/// already a body part label.
pub fn body_part_for(name: &str) -> &str {
    NAMING_CONVERSIONS
        .get(name)
        .map(String::as_str)
        .unwrap_or(name)
}

/// True when `name` (a channel or body part) refers to one of `parts`.
pub fn refers_to_any(name: &str, parts: &[String]) -> bool {
    let body_part = body_part_for(name);
    parts.iter().any(|p| p == name || p == body_part)
}

/// Cameras recommended for a channel or body part, best first.
pub fn recommended_cameras(name: &str) -> &'static [&'static str] {
    CAMERAS
        .get(body_part_for(name))
        .or_else(|| CAMERAS.get(name))
        .copied()
        .unwrap_or(&[])
}

/// Every camera letter that appears in the recommendation table, sorted.
pub fn all_cameras() -> Vec<&'static str> {
    let mut cams: Vec<&'static str> = CAMERAS.values().flat_map(|c| c.iter().copied()).collect();
    cams.sort_unstable();
    cams.dedup();
    cams
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_channel_key_parse() {
        let key = ChannelKey::parse("R1D_flex").unwrap();
        assert_eq!(key.side, Side::Right);
        assert_eq!(key.leg, Leg::Front);
        assert_eq!(key.joint, 'D');
        assert_eq!(key.dof, "flex");

        let key = ChannelKey::parse("L3A_abduct").unwrap();
        assert_eq!(key.side, Side::Left);
        assert_eq!(key.leg, Leg::Hind);
    }

    #[test]
    fn test_channel_key_rejects_foreign_names() {
        assert!(ChannelKey::parse("frame").is_none());
        assert!(ChannelKey::parse("X1D_flex").is_none());
        assert!(ChannelKey::parse("R4D_flex").is_none());
        assert!(ChannelKey::parse("R1D").is_none());
        assert!(ChannelKey::parse("R1DD_flex").is_none());
    }

    #[test]
    fn test_body_part_key_roundtrip_label() {
        let key = BodyPartKey::parse("L-M-TiTa").unwrap();
        assert_eq!(key, BodyPartKey::new(Side::Left, Leg::Mid, "TiTa"));
        assert_eq!(key.to_string(), "L-M-TiTa");
        assert!(BodyPartKey::parse("Notum").is_none());
        assert!(BodyPartKey::parse("R-antenna").is_none());
    }

    #[test]
    fn test_naming_conversions() {
        assert_eq!(body_part_for("R1D_flex"), "R-F-TaG");
        assert_eq!(body_part_for("L2B_rot"), "L-M-CTr");
        assert_eq!(body_part_for("unknown"), "unknown");
    }

    #[test]
    fn test_recommended_cameras() {
        assert_eq!(recommended_cameras("R1D_flex"), &["A", "B", "H"]);
        assert_eq!(recommended_cameras("L3C_flex"), &["D", "F"]);
        assert_eq!(recommended_cameras("Notum"), &["A", "D", "B", "E"]);
        assert!(recommended_cameras("nothing").is_empty());
    }

    #[test]
    fn test_refers_to_any() {
        let parts = vec!["R-F-TaG".to_string()];
        assert!(refers_to_any("R1D_flex", &parts));
        assert!(refers_to_any("R-F-TaG", &parts));
        assert!(!refers_to_any("L1D_flex", &parts));
    }

    #[test]
    fn test_all_cameras_sorted_unique() {
        assert_eq!(all_cameras(), vec!["A", "B", "C", "D", "E", "F", "H"]);
    }
}
