//! Rule-based document classifier
//!
//! Routes a document to a blueprint folder from its path and the start of its
//! extracted text. Each folder scores up to 0.6 for a file-name pattern match
//! and up to 0.4 for keyword hits (0.1 per distinct keyword).

use regex::{Regex, RegexBuilder};
use serde::Serialize;

use crate::models::{Blueprint, ClassificationStatus};

const PATTERN_WEIGHT: f64 = 0.6;
const KEYWORD_WEIGHT: f64 = 0.4;
const KEYWORD_STEP: f64 = 0.1;
/// Characters of text scanned for keywords
pub const KEYWORD_WINDOW: usize = 4000;

pub const DEFAULT_AUTO_ACCEPT: f64 = 0.6;
pub const DEFAULT_REVIEW_FLOOR: f64 = 0.25;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Thresholds {
    pub auto_accept: f64,
    pub review_floor: f64,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            auto_accept: DEFAULT_AUTO_ACCEPT,
            review_floor: DEFAULT_REVIEW_FLOOR,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Classification {
    pub folder: String,
    pub confidence: f64,
    pub status: ClassificationStatus,
}

#[derive(Debug)]
struct FolderRule {
    name: String,
    patterns: Vec<Regex>,
    keywords: Vec<String>,
}

#[derive(Debug)]
pub struct Classifier {
    rules: Vec<FolderRule>,
    fallback: String,
}

pub(crate) fn compile_pattern(pattern: &str) -> Result<Regex, regex::Error> {
    RegexBuilder::new(pattern).case_insensitive(true).build()
}

impl Classifier {
    pub fn new(blueprint: &Blueprint) -> Result<Self, regex::Error> {
        let rules = blueprint
            .folders
            .iter()
            .map(|folder| {
                Ok(FolderRule {
                    name: folder.name.clone(),
                    patterns: folder
                        .patterns
                        .iter()
                        .map(|p| compile_pattern(p))
                        .collect::<Result<_, _>>()?,
                    keywords: folder.keywords.iter().map(|k| k.to_lowercase()).collect(),
                })
            })
            .collect::<Result<_, regex::Error>>()?;

        Ok(Self {
            rules,
            fallback: blueprint.fallback_folder.clone(),
        })
    }

    /// Score of every folder, in blueprint order
    pub fn scores(&self, path: &str, text: Option<&str>) -> Vec<(&str, f64)> {
        let window = text
            .map(|t| t.chars().take(KEYWORD_WINDOW).collect::<String>().to_lowercase())
            .unwrap_or_default();

        self.rules
            .iter()
            .map(|rule| {
                let pattern_score = if rule.patterns.iter().any(|re| re.is_match(path)) {
                    PATTERN_WEIGHT
                } else {
                    0.0
                };
                let hits = rule
                    .keywords
                    .iter()
                    .filter(|k| !window.is_empty() && window.contains(k.as_str()))
                    .count();
                let keyword_score = (hits as f64 * KEYWORD_STEP).min(KEYWORD_WEIGHT);
                (rule.name.as_str(), pattern_score + keyword_score)
            })
            .collect()
    }

    pub fn classify(&self, path: &str, text: Option<&str>, thresholds: Thresholds) -> Classification {
        // First folder wins ties
        let best = self
            .scores(path, text)
            .into_iter()
            .fold(None::<(&str, f64)>, |best, candidate| match best {
                Some((_, score)) if score >= candidate.1 => best,
                _ => Some(candidate),
            });

        let (folder, confidence) = best.unwrap_or((self.fallback.as_str(), 0.0));
        let confidence = (confidence * 100.0).round() / 100.0;

        if confidence >= thresholds.auto_accept {
            Classification {
                folder: folder.to_string(),
                confidence,
                status: ClassificationStatus::Classified,
            }
        } else if confidence >= thresholds.review_floor {
            Classification {
                folder: folder.to_string(),
                confidence,
                status: ClassificationStatus::NeedsReview,
            }
        } else {
            Classification {
                folder: self.fallback.clone(),
                confidence,
                status: ClassificationStatus::Unclassified,
            }
        }
    }

    /// Decision for a reviewer's reclassification
    pub fn manual(folder: &str) -> Classification {
        Classification {
            folder: folder.to_string(),
            confidence: 1.0,
            status: ClassificationStatus::Manual,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::BlueprintFolder;

    fn blueprint() -> Blueprint {
        Blueprint {
            key: "test".to_string(),
            name: "Test".to_string(),
            description: String::new(),
            folders: vec![
                BlueprintFolder {
                    name: "Corporate".to_string(),
                    patterns: vec![r"articles|bylaws|register".to_string()],
                    keywords: vec!["shareholder".into(), "board".into(), "resolution".into()],
                },
                BlueprintFolder {
                    name: "Contracts".to_string(),
                    patterns: vec![r"agreement|contract".to_string()],
                    keywords: vec![
                        "termination".into(),
                        "governing law".into(),
                        "indemnif".into(),
                        "party".into(),
                        "warrant".into(),
                    ],
                },
            ],
            fallback_folder: "Other".to_string(),
            expected_documents: vec![],
            questions: vec![],
        }
    }

    #[test]
    fn test_pattern_and_keywords_accept() {
        let classifier = Classifier::new(&blueprint()).unwrap();
        let result = classifier.classify(
            "Deal/Supply Agreement.docx",
            Some("This agreement may be subject to TERMINATION by either party."),
            Thresholds::default(),
        );
        assert_eq!(result.folder, "Contracts");
        assert_eq!(result.status, ClassificationStatus::Classified);
        assert!((result.confidence - 0.8).abs() < 1e-9);
    }

    #[test]
    fn test_keyword_score_saturates() {
        let classifier = Classifier::new(&blueprint()).unwrap();
        let text = "termination governing law indemnification party warranty";
        let scores = classifier.scores("misc.txt", Some(text));
        assert_eq!(scores[1], ("Contracts", 0.4));
    }

    #[test]
    fn test_keywords_only_needs_review() {
        let classifier = Classifier::new(&blueprint()).unwrap();
        let result = classifier.classify(
            "scan_0001.txt",
            Some("Minutes of the board meeting. The shareholder resolution passed."),
            Thresholds::default(),
        );
        assert_eq!(result.folder, "Corporate");
        assert_eq!(result.status, ClassificationStatus::NeedsReview);
    }

    #[test]
    fn test_no_signal_goes_to_fallback() {
        let classifier = Classifier::new(&blueprint()).unwrap();
        let result = classifier.classify("photo.jpg", None, Thresholds::default());
        assert_eq!(result.folder, "Other");
        assert_eq!(result.status, ClassificationStatus::Unclassified);
        assert_eq!(result.confidence, 0.0);
    }

    #[test]
    fn test_patterns_are_case_insensitive() {
        let classifier = Classifier::new(&blueprint()).unwrap();
        let result = classifier.classify("ARTICLES OF ASSOCIATION.pdf", None, Thresholds::default());
        assert_eq!(result.folder, "Corporate");
        assert_eq!(result.status, ClassificationStatus::Classified);
    }

    #[test]
    fn test_keywords_beyond_window_ignored() {
        let classifier = Classifier::new(&blueprint()).unwrap();
        let text = format!("{}termination", "x".repeat(KEYWORD_WINDOW));
        let scores = classifier.scores("notes.txt", Some(&text));
        assert_eq!(scores[1].1, 0.0);
    }

    #[test]
    fn test_manual() {
        let result = Classifier::manual("Contracts");
        assert_eq!(result.status, ClassificationStatus::Manual);
        assert_eq!(result.confidence, 1.0);
    }
}
