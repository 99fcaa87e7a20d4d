//! Lesson and chapter data model.
//!
//! The core never talks to storage: lessons arrive as data (JSON via the
//! persistence gateway) and leave as updated chapter text strings.

use serde::{Deserialize, Serialize};
use shakmaty::Color;

/// One independently-tracked move tree: a title plus movetext parseable
/// into a single tree.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Chapter {
    pub title: String,
    pub text: String,
}

/// An ordered collection of chapters with shared metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Lesson {
    pub title: String,
    /// Side the student plays in every chapter of this lesson.
    #[serde(with = "color_name")]
    pub user_color: Color,
    pub chapters: Vec<Chapter>,
    /// Optional preview line shown on lesson cards.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_line: Option<String>,
}

mod color_name {
    use serde::{Deserialize, Deserializer, Serializer};
    use shakmaty::Color;

    pub fn serialize<S: Serializer>(color: &Color, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(if color.is_white() { "white" } else { "black" })
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Color, D::Error> {
        let raw = String::deserialize(d)?;
        match raw.as_str() {
            "white" | "w" => Ok(Color::White),
            "black" | "b" => Ok(Color::Black),
            other => Err(serde::de::Error::custom(format!("bad color: {other}"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lesson_json_round_trip() {
        let lesson = Lesson {
            title: "Italian Game".to_string(),
            user_color: Color::White,
            chapters: vec![Chapter {
                title: "Main line".to_string(),
                text: "1. e4 e5 2. Nf3 Nc6 3. Bc4".to_string(),
            }],
            display_line: None,
        };

        let json = serde_json::to_string(&lesson).unwrap();
        assert!(json.contains(r#""user_color":"white""#));
        assert!(!json.contains("display_line"));

        let back: Lesson = serde_json::from_str(&json).unwrap();
        assert_eq!(back.title, lesson.title);
        assert_eq!(back.user_color, Color::White);
        assert_eq!(back.chapters.len(), 1);
    }

    #[test]
    fn test_color_letter_accepted() {
        let json = r#"{"title":"t","user_color":"b","chapters":[]}"#;
        let lesson: Lesson = serde_json::from_str(json).unwrap();
        assert_eq!(lesson.user_color, Color::Black);
    }
}
