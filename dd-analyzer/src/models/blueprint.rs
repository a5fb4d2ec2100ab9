//! Transaction-type blueprints

use serde::{Deserialize, Serialize};

/// Standard folder with its routing rules
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BlueprintFolder {
    pub name: String,
    /// Case-insensitive regexes matched against the file path
    #[serde(default)]
    pub patterns: Vec<String>,
    /// Words looked for in the first characters of the text
    #[serde(default)]
    pub keywords: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ExpectedDocument {
    pub name: String,
    pub folder: String,
    #[serde(default)]
    pub required: bool,
    /// File-name regexes; empty means any document in `folder` matches
    #[serde(default)]
    pub patterns: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BlueprintQuestion {
    pub folder: String,
    pub question: String,
    /// Risk category assigned to findings answering this question
    pub category: String,
}

/// Expected documents and questions for one transaction type
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Blueprint {
    /// Transaction type key (e.g. `m_and_a`)
    pub key: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub folders: Vec<BlueprintFolder>,
    /// Folder receiving documents the classifier cannot place
    pub fallback_folder: String,
    #[serde(default)]
    pub expected_documents: Vec<ExpectedDocument>,
    #[serde(default)]
    pub questions: Vec<BlueprintQuestion>,
}

impl Blueprint {
    pub fn folder(&self, name: &str) -> Option<&BlueprintFolder> {
        self.folders.iter().find(|f| f.name == name)
    }

    /// Questions for a folder; documents outside any folder get them all
    pub fn questions_for(&self, folder: Option<&str>) -> Vec<&BlueprintQuestion> {
        match folder {
            Some(name) if self.questions.iter().any(|q| q.folder == name) => {
                self.questions.iter().filter(|q| q.folder == name).collect()
            }
            _ => self.questions.iter().collect(),
        }
    }
}
