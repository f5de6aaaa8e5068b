//! Game outcome and game level classification.

use std::fmt;

/// The result of a game, in its 2-bit wire encoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[repr(u8)]
pub enum Outcome {
    #[default]
    Unknown = 0,
    WhiteWin = 1,
    BlackWin = 2,
    Draw = 3,
}

impl Outcome {
    /// The three decided outcomes, in partition-directory order.
    pub const DECIDED: [Outcome; 3] = [Outcome::WhiteWin, Outcome::BlackWin, Outcome::Draw];

    /// Decodes the 2-bit wire value.
    #[inline]
    pub const fn from_bits(bits: u8) -> Outcome {
        match bits & 0b11 {
            1 => Outcome::WhiteWin,
            2 => Outcome::BlackWin,
            3 => Outcome::Draw,
            _ => Outcome::Unknown,
        }
    }

    /// Returns the 2-bit wire value.
    #[inline]
    pub const fn to_bits(self) -> u8 {
        self as u8
    }

    /// Parses a PGN result tag value.
    pub fn from_tag(tag: &str) -> Outcome {
        match tag {
            "1-0" => Outcome::WhiteWin,
            "0-1" => Outcome::BlackWin,
            "1/2-1/2" => Outcome::Draw,
            _ => Outcome::Unknown,
        }
    }

    /// Returns the partition directory name, or None for unknown results.
    ///
    /// Results are keyed from white's perspective: win, loss, draw.
    pub const fn dir_name(self) -> Option<&'static str> {
        match self {
            Outcome::WhiteWin => Some("w"),
            Outcome::BlackWin => Some("l"),
            Outcome::Draw => Some("d"),
            Outcome::Unknown => None,
        }
    }

    /// Inverse of [`dir_name`](Self::dir_name).
    pub fn from_dir_name(name: &str) -> Option<Outcome> {
        match name {
            "w" => Some(Outcome::WhiteWin),
            "l" => Some(Outcome::BlackWin),
            "d" => Some(Outcome::Draw),
            _ => None,
        }
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tag = match self {
            Outcome::WhiteWin => "1-0",
            Outcome::BlackWin => "0-1",
            Outcome::Draw => "1/2-1/2",
            Outcome::Unknown => "*",
        };
        write!(f, "{}", tag)
    }
}

/// The provenance class of a game, the top-level partition key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum GameLevel {
    Human = 0,
    Engine = 1,
    Server = 2,
}

impl GameLevel {
    /// All levels in directory order.
    pub const ALL: [GameLevel; 3] = [GameLevel::Human, GameLevel::Engine, GameLevel::Server];

    /// Returns the partition directory name.
    pub const fn dir_name(self) -> &'static str {
        match self {
            GameLevel::Human => "human",
            GameLevel::Engine => "engine",
            GameLevel::Server => "server",
        }
    }

    /// Inverse of [`dir_name`](Self::dir_name).
    pub fn from_dir_name(name: &str) -> Option<GameLevel> {
        match name {
            "human" => Some(GameLevel::Human),
            "engine" => Some(GameLevel::Engine),
            "server" => Some(GameLevel::Server),
            _ => None,
        }
    }
}

impl fmt::Display for GameLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.dir_name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn outcome_bits_roundtrip() {
        for outcome in [
            Outcome::Unknown,
            Outcome::WhiteWin,
            Outcome::BlackWin,
            Outcome::Draw,
        ] {
            assert_eq!(Outcome::from_bits(outcome.to_bits()), outcome);
        }
    }

    #[test]
    fn outcome_from_tag() {
        assert_eq!(Outcome::from_tag("1-0"), Outcome::WhiteWin);
        assert_eq!(Outcome::from_tag("0-1"), Outcome::BlackWin);
        assert_eq!(Outcome::from_tag("1/2-1/2"), Outcome::Draw);
        assert_eq!(Outcome::from_tag("*"), Outcome::Unknown);
        assert_eq!(Outcome::from_tag("garbage"), Outcome::Unknown);
    }

    #[test]
    fn outcome_dir_names() {
        assert_eq!(Outcome::WhiteWin.dir_name(), Some("w"));
        assert_eq!(Outcome::BlackWin.dir_name(), Some("l"));
        assert_eq!(Outcome::Draw.dir_name(), Some("d"));
        assert_eq!(Outcome::Unknown.dir_name(), None);
        for outcome in Outcome::DECIDED {
            assert_eq!(
                Outcome::from_dir_name(outcome.dir_name().unwrap()),
                Some(outcome)
            );
        }
    }

    #[test]
    fn level_dir_names() {
        for level in GameLevel::ALL {
            assert_eq!(GameLevel::from_dir_name(level.dir_name()), Some(level));
        }
        assert_eq!(GameLevel::from_dir_name("alien"), None);
    }
}
